use rand::RngCore;
use wasmtime::{Caller, Linker};

/// State threaded through every host call. Carries nothing plugin-specific;
/// the host imports are intentionally the entire surface a module can
/// reach, and none of them need per-module state today.
#[derive(Default)]
pub struct HostState;

fn memory_slice<'a>(caller: &'a mut Caller<'_, HostState>) -> Option<&'a mut [u8]> {
    let memory = caller.get_export("memory")?.into_memory()?;
    Some(memory.data_mut(caller))
}

/// Registers the three host imports a module may call: `clock_now_ms`,
/// `random_bytes`, `log`. This is the entirety of the module's reach into
/// the host; nothing else is ever linked under the `env` module name.
pub fn link_host_imports(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap("env", "clock_now_ms", |_caller: Caller<'_, HostState>| -> i64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        now.as_millis() as i64
    })?;

    linker.func_wrap(
        "env",
        "random_bytes",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            if ptr < 0 || len < 0 {
                return -1;
            }
            let (ptr, len) = (ptr as usize, len as usize);
            let Some(memory) = memory_slice(&mut caller) else {
                return -1;
            };
            let Some(region) = memory.get_mut(ptr..ptr + len) else {
                return -1;
            };
            rand::thread_rng().fill_bytes(region);
            0
        },
    )?;

    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
            if ptr < 0 || len < 0 {
                return;
            }
            let (ptr, len) = (ptr as usize, len as usize);
            let Some(memory) = memory_slice(&mut caller) else {
                return;
            };
            let Some(region) = memory.get(ptr..ptr + len) else {
                return;
            };
            let message = String::from_utf8_lossy(region);
            match level {
                0 => tracing::debug!(target: "plugin", "{message}"),
                1 => tracing::info!(target: "plugin", "{message}"),
                2 => tracing::warn!(target: "plugin", "{message}"),
                _ => tracing::error!(target: "plugin", "{message}"),
            }
        },
    )?;

    Ok(())
}
