use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use astra_exchange::{Dispatcher, ExchangeHandler};
use astra_health::HealthTracker;
use astra_identity::{DerivedIdentity, MnemonicSource};
use astra_plugin::{PluginConfig, PluginError, PluginRuntime};
use astra_registry::{PeerRegistry, TrustScaledRateLimiter};
use astra_store::Store;
use astra_tipqueue::{Fetcher, Pinner, TipQueue};
use astra_topics::TopicManager;
use astra_types::{CoreError, CoreResult, PeerId, SchemaName, Tip, TrustLevel};
use astra_validator::{DeepValidator, SchemaValidator};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Publisher, TrustQuery};
use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

/// The node: sole owner of the store, registry, topic manager, tip queue,
/// plugin runtime and health tracker. Every other subsystem reaches these
/// only through the capability interfaces it was constructed with, never
/// by holding a reference back to this struct.
pub struct Node {
    pub config: NodeConfig,
    pub identity: DerivedIdentity,
    pub store: Arc<Store>,
    pub registry: Arc<PeerRegistry>,
    pub validator: Arc<SchemaValidator>,
    pub topics: Arc<TopicManager>,
    pub tip_queue: Arc<TipQueue>,
    pub plugin: Arc<PluginRuntime>,
    pub health: Arc<HealthTracker>,
    pub rate_limiter: Arc<TrustScaledRateLimiter>,
    pub exchange: Arc<ExchangeHandler>,
    shutdown: CancellationToken,
    accepting: AtomicBool,
}

impl Node {
    /// Bring up every subsystem in dependency order: identity first (the
    /// peer id everything else is keyed on), then the store and registry,
    /// then the components built on top of them.
    pub async fn init(config: NodeConfig, mnemonic_source: Option<&dyn MnemonicSource>) -> NodeResult<Arc<Node>> {
        let identity = astra_identity::load_or_generate(&config.identity, mnemonic_source)
            .map_err(|err| NodeError::Identity(err.to_string()))?;
        tracing::info!(peer_id = %identity.peer_id, mode = ?identity.mode, "identity ready");

        let store = Arc::new(Store::init(config.store.clone()).map_err(NodeError::Store)?);
        let registry = Arc::new(PeerRegistry::init(config.registry.clone()).map_err(NodeError::Registry)?);
        let rate_limiter = Arc::new(TrustScaledRateLimiter::new(
            config.registry.base_messages_per_second,
            config.registry.base_messages_per_minute,
            config.registry.base_burst,
        ));

        let plugin =
            Arc::new(PluginRuntime::new(config.plugin_call_timeout).map_err(|err| NodeError::Plugin(err.to_string()))?);
        if config.plugin.enabled {
            load_plugin(&plugin, &config).await?;
        }

        let mut validator = SchemaValidator::new(config.max_record_size);
        if config.plugin.enabled {
            validator = validator.with_deep_validator(Box::new(PluginDeepValidator(plugin.clone())));
        }
        let validator = Arc::new(validator);

        let topics = Arc::new(TopicManager::new(
            config.topic_prefix.clone(),
            identity.peer_id.clone(),
            validator.clone(),
        ));

        let tip_queue = Arc::new(
            TipQueue::new(config.tip_queue.clone(), identity.peer_id.clone(), topics.clone())
                .with_fetcher(Arc::new(StoreFetcher(store.clone())) as Arc<dyn Fetcher>)
                .with_pinner(Arc::new(StorePinner) as Arc<dyn Pinner>),
        );

        let health = Arc::new(HealthTracker::new());

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(NodeDispatcher {
            store: store.clone(),
            tip_queue: tip_queue.clone(),
        });
        let exchange = Arc::new(ExchangeHandler::new(
            config.exchange.clone(),
            registry.clone(),
            rate_limiter.clone(),
            validator.clone(),
            dispatcher,
        ));

        Ok(Arc::new(Node {
            config,
            identity,
            store,
            registry,
            validator,
            topics,
            tip_queue,
            plugin,
            health,
            rate_limiter,
            exchange,
            shutdown: CancellationToken::new(),
            accepting: AtomicBool::new(true),
        }))
    }

    /// Cancellation token attached to this node's lifetime. Cloned out to
    /// every long-running task spawned on the node's behalf so a single
    /// `shutdown()` call can reach all of them.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run the ordered shutdown sequence from §5: stop accepting, cancel,
    /// drain, close the plugin runtime, close the store. Each step is
    /// bounded by its own configured deadline; exceeding one is logged and
    /// shutdown proceeds regardless rather than hanging.
    pub async fn shutdown(&self) {
        tracing::info!("shutdown: no longer accepting new connections");
        self.accepting.store(false, Ordering::SeqCst);

        tracing::info!("shutdown: cancelling long-running operations");
        self.shutdown.cancel();

        if tokio::time::timeout(self.config.shutdown.drain_deadline, self.drain())
            .await
            .is_err()
        {
            tracing::warn!("drain deadline exceeded, proceeding ungracefully");
        }

        if tokio::time::timeout(self.config.shutdown.plugin_close_deadline, self.close_plugin())
            .await
            .is_err()
        {
            tracing::warn!("plugin close deadline exceeded");
        }

        let store_close_deadline = self.config.shutdown.store_close_deadline;
        if tokio::time::timeout(store_close_deadline, self.close_store())
            .await
            .is_err()
        {
            tracing::warn!("store close deadline exceeded");
        }
    }

    /// In-flight requests are tracked by whatever owns the listener
    /// (outside this crate's scope); here draining means letting already
    /// spawned tip fetch/pin tasks observe the cancellation token and
    /// finish or abandon their work.
    async fn drain(&self) {
        self.tip_queue.close();
        self.topics.close();
        tokio::task::yield_now().await;
    }

    async fn close_plugin(&self) {
        self.plugin.close();
    }

    async fn close_store(&self) {
        // The store's connection is closed when the last `Arc<Store>` drops;
        // nothing left here needs it once requests have stopped arriving.
    }
}

#[async_trait]
impl Publisher for Node {
    async fn publish_tip(&self, cid: String, schema: SchemaName, signature: Option<Vec<u8>>) -> CoreResult<()> {
        self.tip_queue.publish_tip(cid, schema, signature, now_unix())
    }
}

impl TrustQuery for Node {
    fn trust_level(&self, peer: &PeerId) -> TrustLevel {
        self.registry.get(peer).map(|p| p.trust_level).unwrap_or_default()
    }
}

/// Fetcher backed by the node's own store. There is no network transport
/// in scope for this crate, so the only content a tip's announced cid can
/// resolve to is a record this node already has locally -- fetching
/// remote content is the excluded transport layer's job.
struct StoreFetcher(Arc<Store>);

#[async_trait]
impl Fetcher for StoreFetcher {
    async fn fetch(&self, cid: &str, schema: SchemaName) -> CoreResult<Vec<u8>> {
        self.0.get(schema, cid.to_string()).await
    }
}

/// The store doesn't distinguish pinned from ephemeral retention -- every
/// stored record is retained until `garbage_collect` ages it out. Pin state
/// for a tip is tracked only in `TipQueue`'s own `pinned_cids` set, so this
/// is a no-op that exists to satisfy the capability interface.
struct StorePinner;

#[async_trait]
impl Pinner for StorePinner {
    async fn pin(&self, _cid: &str, _bytes: &[u8], _ttl: Duration) -> CoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    day: Option<String>,
    norad_cat_id: Option<u32>,
    entity_id: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    cid: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse<'a> {
    records: &'a [astra_types::Record],
}

struct NodeDispatcher {
    store: Arc<Store>,
    tip_queue: Arc<TipQueue>,
}

#[async_trait]
impl Dispatcher for NodeDispatcher {
    async fn store(
        &self,
        peer: &PeerId,
        schema: SchemaName,
        body: &[u8],
        signature: Option<Bytes>,
    ) -> CoreResult<Vec<u8>> {
        let cid = self
            .store
            .store(schema, body.to_vec(), peer.clone(), signature.map(|s| s.to_vec()))
            .await?;
        Ok(cid.into_bytes())
    }

    async fn query(&self, schema: SchemaName, body: &[u8]) -> CoreResult<Vec<u8>> {
        let request: QueryRequest =
            serde_json::from_slice(body).map_err(|err| CoreError::Validation(format!("malformed query: {err}")))?;
        let limit = request.limit.unwrap_or_else(|| self.store.default_query_limit());
        let records = self
            .store
            .query_by_index(schema, request.day, request.norad_cat_id, request.entity_id, limit)
            .await?;
        serde_json::to_vec(&QueryResponse { records: &records })
            .map_err(|err| CoreError::Internal(err.to_string()))
    }

    async fn push(
        &self,
        peer: &PeerId,
        schema: SchemaName,
        body: &[u8],
        signature: Option<Bytes>,
    ) -> CoreResult<Vec<u8>> {
        let request: PushRequest =
            serde_json::from_slice(body).map_err(|err| CoreError::Validation(format!("malformed push: {err}")))?;
        let tip = Tip {
            peer_id: peer.clone(),
            cid: request.cid,
            schema,
            received_at: now_unix(),
            signature: signature.map(|s| s.to_vec()),
        };
        self.tip_queue
            .on_tip(tip)
            .map_err(|err| CoreError::Validation(err.to_string()))?;
        Ok(Vec::new())
    }
}

/// Delegates deep validation to the plugin module's `plugin_handle_request`
/// export. By convention the module's response's first byte is a verdict
/// flag (non-zero = valid, zero = invalid); an absent or trapping module
/// surfaces as `Verdict::Unavailable` through the validator's own timeout
/// and error handling, never blocks or panics here.
struct PluginDeepValidator(Arc<PluginRuntime>);

#[async_trait]
impl DeepValidator for PluginDeepValidator {
    async fn validate_deep(&self, schema: SchemaName, bytes: &[u8]) -> CoreResult<bool> {
        let response = self
            .0
            .handle_request(bytes.to_vec(), schema.file_identifier().to_vec())
            .await?;
        Ok(response.first().copied().unwrap_or(0) != 0)
    }
}

async fn load_plugin(plugin: &PluginRuntime, config: &NodeConfig) -> NodeResult<()> {
    let wasm_bytes = std::fs::read(&config.plugin.module_path)
        .map_err(|err| NodeError::PluginLoad(PluginError::Load(err.to_string())))?;

    let signing_priv: [u8; 32] = config
        .plugin
        .signing_priv
        .as_slice()
        .try_into()
        .map_err(|_| NodeError::PluginLoad(PluginError::Load("signing_priv must be 32 bytes".into())))?;
    let signing_pub: [u8; 65] = config
        .plugin
        .signing_pub
        .as_slice()
        .try_into()
        .map_err(|_| NodeError::PluginLoad(PluginError::Load("signing_pub must be 65 bytes".into())))?;

    let plugin_config = PluginConfig {
        signing_priv,
        signing_pub,
        secret: config.plugin.secret.clone(),
        domains: config.plugin.domains.clone(),
        epoch_period_ms: config.plugin.epoch_period_ms,
        max_skew_ms: config.plugin.max_skew_ms,
        lease_ms: config.plugin.lease_ms,
    };
    plugin.load(wasm_bytes, plugin_config).await.map_err(NodeError::PluginLoad)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use astra_exchange::{encode_request, RequestKind};
    use astra_types::TrustLevel;

    use super::*;

    fn omm_bytes(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SchemaName::Omm.file_identifier().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    async fn test_node(suffix: &str) -> Arc<Node> {
        Node::init(NodeConfig::test(suffix), None).await.unwrap()
    }

    #[tokio::test]
    async fn brings_up_every_subsystem_with_random_identity() {
        let node = test_node("init").await;
        assert!(!node.identity.peer_id.0.is_empty());
        assert!(node.is_accepting());
        assert_eq!(node.store.count(SchemaName::Omm).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_round_trips_through_exchange_handler() {
        let node = test_node("store-roundtrip").await;
        let peer = PeerId::from("peer-standard");
        node.registry.add_peer(peer.clone(), TrustLevel::Standard, 0).unwrap();

        let body = omm_bytes(b"payload");
        let envelope = encode_request(RequestKind::Store, SchemaName::Omm, &body);
        let response = node.exchange.handle(&peer, envelope, Instant::now()).await.unwrap();
        let cid = String::from_utf8(response).unwrap();
        assert_eq!(cid, Store::compute_cid(&body));
        assert_eq!(node.store.count(SchemaName::Omm).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_returns_previously_stored_record() {
        let node = test_node("query-roundtrip").await;
        let peer = PeerId::from("peer-standard");
        node.registry.add_peer(peer.clone(), TrustLevel::Standard, 0).unwrap();

        let body = omm_bytes(b"payload");
        node.exchange
            .handle(
                &peer,
                encode_request(RequestKind::Store, SchemaName::Omm, &body),
                Instant::now(),
            )
            .await
            .unwrap();

        let query_body = serde_json::to_vec(&serde_json::json!({"limit": 10})).unwrap();
        let response = node
            .exchange
            .handle(
                &peer,
                encode_request(RequestKind::Query, SchemaName::Omm, &query_body),
                Instant::now(),
            )
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(parsed["records"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trust_query_reflects_registry_state() {
        let node = test_node("trust-query").await;
        let peer = PeerId::from("peer-trusted");
        node.registry.add_peer(peer.clone(), TrustLevel::Trusted, 0).unwrap();
        assert_eq!(node.trust_level(&peer), TrustLevel::Trusted);
        assert_eq!(node.trust_level(&PeerId::from("unknown")), TrustLevel::Untrusted);
    }

    #[tokio::test]
    async fn publisher_emits_a_tip_without_error() {
        let node = test_node("publisher").await;
        node.publish_tip("cid-1".to_string(), SchemaName::Omm, None).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_and_closes_subsystems() {
        let node = test_node("shutdown").await;
        node.shutdown().await;
        assert!(!node.is_accepting());
        let rejected = node.tip_queue.on_tip(Tip {
            peer_id: PeerId::from("peer-p"),
            cid: "cid-z".into(),
            schema: SchemaName::Omm,
            received_at: 0,
            signature: None,
        });
        assert!(rejected.is_err());
    }
}
