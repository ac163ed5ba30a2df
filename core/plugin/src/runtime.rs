use std::sync::{Arc, Mutex};
use std::time::Duration;

use wasmtime::{Config, Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::host::{self, HostState};
use crate::memory;

/// Every exported function a loaded module must provide, resolved once at
/// load time so later calls never have to re-look-up exports.
struct Exports {
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    plugin_handle_request: TypedFunc<(i32, i32, i32, i32, i32, i32), i32>,
    plugin_get_public_key: TypedFunc<(i32, i32), i32>,
    plugin_get_metadata: TypedFunc<(i32, i32), i32>,
}

#[derive(Clone, Copy)]
enum OutExport {
    PublicKey,
    Metadata,
}

struct LoadedModule {
    store: Store<HostState>,
    #[allow(dead_code)]
    instance: Instance,
    memory: Memory,
    exports: Exports,
}

/// Output buffer capacity offered to the module for `plugin_handle_request`.
/// A module whose response would not fit gets a non-zero status back, the
/// same as any other module-reported failure.
const RESPONSE_BUFFER_CAPACITY: u32 = 64 * 1024;

/// The epoch tick period backing call deadlines. Shorter ticks give finer
/// timeout resolution at the cost of more background wakeups.
const EPOCH_TICK: Duration = Duration::from_millis(20);

/// Loads and runs a single sandboxed plugin module. Calls into the module
/// are serialized by construction: everything that touches the loaded
/// module goes through `state`, held for the duration of the call.
pub struct PluginRuntime {
    engine: Engine,
    linker: Linker<HostState>,
    state: Arc<Mutex<Option<LoadedModule>>>,
    call_timeout: Duration,
    _epoch_ticker: tokio::task::JoinHandle<()>,
}

impl PluginRuntime {
    pub fn new(call_timeout: Duration) -> anyhow::Result<Self> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config)?;

        let mut linker = Linker::new(&engine);
        host::link_host_imports(&mut linker)?;

        let ticker_engine = engine.clone();
        let epoch_ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(EPOCH_TICK);
            loop {
                interval.tick().await;
                ticker_engine.increment_epoch();
            }
        });

        Ok(Self {
            engine,
            linker,
            state: Arc::new(Mutex::new(None)),
            call_timeout,
            _epoch_ticker: epoch_ticker,
        })
    }

    fn ticks_for_timeout(&self) -> u64 {
        let ticks = self.call_timeout.as_millis() as u64 / EPOCH_TICK.as_millis() as u64;
        ticks.max(1)
    }

    fn is_timeout(err: &anyhow::Error) -> bool {
        err.to_string().to_lowercase().contains("epoch")
    }

    /// Compile, instantiate and initialize a fresh module, discarding any
    /// previously loaded one. A trap during `plugin_init` disposes the
    /// half-initialized instance just like a trap during normal operation.
    pub async fn load(&self, wasm_bytes: Vec<u8>, config: PluginConfig) -> Result<(), PluginError> {
        let engine = self.engine.clone();
        let linker = self.linker.clone();
        let state = Arc::clone(&self.state);
        let timeout_ticks = self.ticks_for_timeout();
        let cfg_blob = config.encode();

        tokio::task::spawn_blocking(move || {
            let module = Module::new(&engine, &wasm_bytes).map_err(|err| PluginError::Load(err.to_string()))?;
            let mut store = Store::new(&engine, HostState);
            let instance = linker
                .instantiate(&mut store, &module)
                .map_err(|err| PluginError::Load(err.to_string()))?;

            let memory = instance
                .get_memory(&mut store, "memory")
                .ok_or_else(|| PluginError::MissingExport("memory".into()))?;
            let exports = Exports {
                malloc: instance
                    .get_typed_func(&mut store, "malloc")
                    .map_err(|_| PluginError::MissingExport("malloc".into()))?,
                free: instance
                    .get_typed_func(&mut store, "free")
                    .map_err(|_| PluginError::MissingExport("free".into()))?,
                plugin_handle_request: instance
                    .get_typed_func(&mut store, "plugin_handle_request")
                    .map_err(|_| PluginError::MissingExport("plugin_handle_request".into()))?,
                plugin_get_public_key: instance
                    .get_typed_func(&mut store, "plugin_get_public_key")
                    .map_err(|_| PluginError::MissingExport("plugin_get_public_key".into()))?,
                plugin_get_metadata: instance
                    .get_typed_func(&mut store, "plugin_get_metadata")
                    .map_err(|_| PluginError::MissingExport("plugin_get_metadata".into()))?,
            };
            let plugin_init: TypedFunc<(i32, i32), i32> = instance
                .get_typed_func(&mut store, "plugin_init")
                .map_err(|_| PluginError::MissingExport("plugin_init".into()))?;

            let cfg_ptr = exports
                .malloc
                .call(&mut store, cfg_blob.len() as i32)
                .map_err(classify)?;
            if cfg_ptr == 0 {
                return Err(PluginError::AllocationFailed);
            }
            memory::write_bytes(&mut store, &memory, cfg_ptr as u32, &cfg_blob)?;

            store.set_epoch_deadline(timeout_ticks);
            let init_result = plugin_init.call(&mut store, (cfg_ptr, cfg_blob.len() as i32));
            let _ = exports.free.call(&mut store, cfg_ptr);
            let status = init_result.map_err(classify)?;
            if status != 0 {
                return Err(PluginError::InitFailed(status));
            }

            Ok(LoadedModule {
                store,
                instance,
                memory,
                exports,
            })
        })
        .await
        .expect("plugin load task panicked")
        .map(|loaded| {
            *state.lock().expect("plugin runtime mutex poisoned") = Some(loaded);
        })
    }

    /// Dispatch one request into the loaded module. Every allocation made
    /// on the module's behalf is freed before this returns, on both the
    /// success and error paths, matching the ABI's no-leak guarantee.
    pub async fn handle_request(&self, request: Vec<u8>, host_header: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        let state = Arc::clone(&self.state);
        let timeout_ticks = self.ticks_for_timeout();

        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().expect("plugin runtime mutex poisoned");
            let loaded = guard.as_mut().ok_or(PluginError::NotLoaded)?;
            let result = run_request(loaded, &request, &host_header, timeout_ticks);
            if let Err(err) = &result {
                if matches!(err, PluginError::ModuleTrap(_) | PluginError::Timeout(_)) {
                    // The instance may be in an inconsistent state after a trap;
                    // dispose it so the next call starts from a clean load.
                    *guard = None;
                }
            }
            result
        })
        .await
        .expect("plugin handle_request task panicked")
    }

    pub async fn get_public_key(&self) -> Result<Vec<u8>, PluginError> {
        self.call_out_buffer(OutExport::PublicKey).await
    }

    pub async fn get_metadata(&self) -> Result<Vec<u8>, PluginError> {
        self.call_out_buffer(OutExport::Metadata).await
    }

    async fn call_out_buffer(&self, which: OutExport) -> Result<Vec<u8>, PluginError> {
        let state = Arc::clone(&self.state);
        let timeout_ticks = self.ticks_for_timeout();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().expect("plugin runtime mutex poisoned");
            let loaded = guard.as_mut().ok_or(PluginError::NotLoaded)?;

            let out_ptr = loaded
                .exports
                .malloc
                .call(&mut loaded.store, RESPONSE_BUFFER_CAPACITY as i32)
                .map_err(classify)?;
            if out_ptr == 0 {
                return Err(PluginError::AllocationFailed);
            }

            let func = match which {
                OutExport::PublicKey => loaded.exports.plugin_get_public_key,
                OutExport::Metadata => loaded.exports.plugin_get_metadata,
            };
            loaded.store.set_epoch_deadline(timeout_ticks);
            let result = func.call(&mut loaded.store, (out_ptr, RESPONSE_BUFFER_CAPACITY as i32));
            let outcome = match result {
                Ok(n) if n >= 0 => memory::read_bytes(&loaded.store, &loaded.memory, out_ptr as u32, n as u32),
                Ok(n) => Err(PluginError::ModuleTrap(format!("export returned error code {n}"))),
                Err(err) => Err(classify(err)),
            };
            let _ = loaded.exports.free.call(&mut loaded.store, out_ptr);
            outcome
        })
        .await
        .expect("plugin call task panicked")
    }

    /// Dispose the currently loaded module, freeing all of its memory
    /// deterministically by dropping the store.
    pub fn close(&self) {
        *self.state.lock().expect("plugin runtime mutex poisoned") = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().expect("plugin runtime mutex poisoned").is_some()
    }
}

impl Drop for PluginRuntime {
    fn drop(&mut self) {
        self._epoch_ticker.abort();
    }
}

fn classify(err: anyhow::Error) -> PluginError {
    if PluginRuntime::is_timeout(&err) {
        PluginError::Timeout(0)
    } else {
        PluginError::ModuleTrap(err.to_string())
    }
}

fn run_request(
    loaded: &mut LoadedModule,
    request: &[u8],
    host_header: &[u8],
    timeout_ticks: u64,
) -> Result<Vec<u8>, PluginError> {
    let req_ptr = alloc_and_write(loaded, request)?;
    let hdr_ptr = alloc_and_write(loaded, host_header).inspect_err(|_| {
        let _ = loaded.exports.free.call(&mut loaded.store, req_ptr as i32);
    })?;
    let out_ptr = loaded
        .exports
        .malloc
        .call(&mut loaded.store, RESPONSE_BUFFER_CAPACITY as i32)
        .map_err(classify)
        .inspect_err(|_| {
            let _ = loaded.exports.free.call(&mut loaded.store, req_ptr as i32);
            let _ = loaded.exports.free.call(&mut loaded.store, hdr_ptr as i32);
        })?;
    let out_len_ptr = loaded
        .exports
        .malloc
        .call(&mut loaded.store, 4)
        .map_err(classify)
        .inspect_err(|_| {
            let _ = loaded.exports.free.call(&mut loaded.store, req_ptr as i32);
            let _ = loaded.exports.free.call(&mut loaded.store, hdr_ptr as i32);
            let _ = loaded.exports.free.call(&mut loaded.store, out_ptr as i32);
        })?;

    loaded.store.set_epoch_deadline(timeout_ticks);
    let call_result = loaded.exports.plugin_handle_request.call(
        &mut loaded.store,
        (
            req_ptr,
            request.len() as i32,
            hdr_ptr,
            out_ptr,
            RESPONSE_BUFFER_CAPACITY as i32,
            out_len_ptr,
        ),
    );

    let outcome = match call_result {
        Ok(status) if status == 0 => memory::read_u32_le(&loaded.store, &loaded.memory, out_len_ptr as u32)
            .and_then(|len| memory::read_bytes(&loaded.store, &loaded.memory, out_ptr as u32, len)),
        Ok(status) => Err(PluginError::ModuleTrap(format!("plugin returned status {status}"))),
        Err(err) => Err(classify(err)),
    };

    let _ = loaded.exports.free.call(&mut loaded.store, req_ptr);
    let _ = loaded.exports.free.call(&mut loaded.store, hdr_ptr);
    let _ = loaded.exports.free.call(&mut loaded.store, out_ptr);
    let _ = loaded.exports.free.call(&mut loaded.store, out_len_ptr);

    outcome
}

fn alloc_and_write(loaded: &mut LoadedModule, bytes: &[u8]) -> Result<i32, PluginError> {
    let ptr = loaded
        .exports
        .malloc
        .call(&mut loaded.store, bytes.len() as i32)
        .map_err(classify)?;
    if ptr == 0 {
        return Err(PluginError::AllocationFailed);
    }
    memory::write_bytes(&mut loaded.store, &loaded.memory, ptr as u32, bytes)?;
    Ok(ptr)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal guest: a bump allocator that counts every `malloc`/`free`
    /// call in exported globals, plus a `plugin_handle_request` that always
    /// answers with a one-byte "valid" verdict.
    const COUNTING_MODULE_WAT: &str = r#"
        (module
          (memory (export "memory") 4)
          (global $malloc_calls (mut i32) (i32.const 0))
          (global $free_calls (mut i32) (i32.const 0))
          (global $next_free (mut i32) (i32.const 1024))
          (export "malloc_calls" (global $malloc_calls))
          (export "free_calls" (global $free_calls))

          (func (export "malloc") (param $size i32) (result i32)
            (local $ptr i32)
            (global.set $malloc_calls (i32.add (global.get $malloc_calls) (i32.const 1)))
            (local.set $ptr (global.get $next_free))
            (global.set $next_free (i32.add (global.get $next_free) (local.get $size)))
            (local.get $ptr))

          (func (export "free") (param $ptr i32)
            (global.set $free_calls (i32.add (global.get $free_calls) (i32.const 1))))

          (func (export "plugin_init") (param $cfg_ptr i32) (param $cfg_len i32) (result i32)
            (i32.const 0))

          (func (export "plugin_handle_request")
            (param $req_ptr i32) (param $req_len i32) (param $hdr_ptr i32)
            (param $out_ptr i32) (param $out_cap i32) (param $out_len_ptr i32)
            (result i32)
            (i32.store8 (local.get $out_ptr) (i32.const 1))
            (i32.store (local.get $out_len_ptr) (i32.const 1))
            (i32.const 0))

          (func (export "plugin_get_public_key") (param $buf i32) (param $cap i32) (result i32)
            (i32.store8 (local.get $buf) (i32.const 0xAA))
            (i32.const 1))

          (func (export "plugin_get_metadata") (param $buf i32) (param $cap i32) (result i32)
            (i32.store8 (local.get $buf) (i32.const 0xBB))
            (i32.const 1))
        )
    "#;

    fn test_config() -> PluginConfig {
        PluginConfig {
            signing_priv: [0u8; 32],
            signing_pub: [0u8; 65],
            secret: Vec::new(),
            domains: Vec::new(),
            epoch_period_ms: 1,
            max_skew_ms: 1,
            lease_ms: 1,
        }
    }

    fn read_i32_global(loaded: &mut LoadedModule, name: &str) -> i32 {
        let instance = loaded.instance;
        let global = instance
            .get_global(&mut loaded.store, name)
            .unwrap_or_else(|| panic!("module must export global `{name}`"));
        match global.get(&mut loaded.store) {
            wasmtime::Val::I32(n) => n,
            other => panic!("expected i32 global `{name}`, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_request_round_trip_balances_malloc_and_free() {
        let runtime = PluginRuntime::new(Duration::from_millis(500)).unwrap();
        let wasm = wat::parse_str(COUNTING_MODULE_WAT).unwrap();
        runtime.load(wasm, test_config()).await.unwrap();
        assert!(runtime.is_loaded());

        let response = runtime.handle_request(vec![0xAB], vec![0xCD]).await.unwrap();
        assert_eq!(response, vec![1u8]);

        let mut guard = runtime.state.lock().expect("plugin runtime mutex poisoned");
        let loaded = guard
            .as_mut()
            .expect("module stays loaded after a successful request");
        let mallocs = read_i32_global(loaded, "malloc_calls");
        let frees = read_i32_global(loaded, "free_calls");
        assert!(mallocs > 0);
        assert_eq!(
            mallocs, frees,
            "every malloc made on the module's behalf must be matched by a free"
        );
    }

    #[tokio::test]
    async fn calls_before_load_return_not_loaded() {
        let runtime = PluginRuntime::new(Duration::from_millis(200)).unwrap();
        assert!(!runtime.is_loaded());
        let err = runtime.handle_request(vec![1], vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::NotLoaded));
        let err = runtime.get_public_key().await.unwrap_err();
        assert!(matches!(err, PluginError::NotLoaded));
    }

    #[tokio::test]
    async fn close_is_idempotent_without_a_loaded_module() {
        let runtime = PluginRuntime::new(Duration::from_millis(200)).unwrap();
        runtime.close();
        runtime.close();
        assert!(!runtime.is_loaded());
    }

    #[tokio::test]
    async fn rejects_module_missing_required_exports() {
        let runtime = PluginRuntime::new(Duration::from_millis(200)).unwrap();
        // The empty module is valid WASM but exports nothing, so loading it
        // must fail at export resolution rather than panic.
        let empty_module = wat::parse_str("(module)").unwrap();
        let config = PluginConfig {
            signing_priv: [0u8; 32],
            signing_pub: [0u8; 65],
            secret: Vec::new(),
            domains: Vec::new(),
            epoch_period_ms: 1,
            max_skew_ms: 1,
            lease_ms: 1,
        };
        let err = runtime.load(empty_module, config).await.unwrap_err();
        assert!(matches!(err, PluginError::MissingExport(_)));
    }
}
