use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use astra_topics::TopicManager;
use astra_types::{CoreError, CoreResult, PeerId, ResolvedConfig, SchemaName, Tip, TipQueueConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum TipQueueError {
    #[error("tip queue is closed")]
    Closed,
    #[error("malformed tip")]
    Malformed,
}

/// Capability interface for fetching the content a tip points at. Injected
/// so the tip queue never depends on a concrete transport.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, cid: &str, schema: SchemaName) -> CoreResult<Vec<u8>>;
}

/// Capability interface for pinning previously fetched content.
#[async_trait]
pub trait Pinner: Send + Sync {
    async fn pin(&self, cid: &str, bytes: &[u8], ttl: Duration) -> CoreResult<()>;
}

/// Called synchronously, in registration order, for every tip accepted
/// into the queue -- including ones later evicted for being over budget.
pub trait TipHandler: Send + Sync {
    fn on_tip(&self, tip: &Tip, resolved: &ResolvedConfig);
}

#[derive(Debug, Clone)]
struct StoredTip {
    tip: Tip,
    resolved: ResolvedConfig,
}

struct State {
    tips: VecDeque<StoredTip>,
    pinned_cids: std::collections::HashSet<String>,
    closed: bool,
}

/// Bounded in-memory buffer of tip announcements, with policy resolution,
/// handler notification and optional asynchronous fetch/pin.
pub struct TipQueue {
    config: TipQueueConfig,
    local_peer: PeerId,
    topics: Arc<TopicManager>,
    state: RwLock<State>,
    handlers: RwLock<Vec<Arc<dyn TipHandler>>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    pinner: Option<Arc<dyn Pinner>>,
    fetch_permits: Arc<Semaphore>,
}

impl TipQueue {
    pub fn new(config: TipQueueConfig, local_peer: PeerId, topics: Arc<TopicManager>) -> Self {
        let fetch_permits = Arc::new(Semaphore::new(config.max_in_flight_fetches.max(1)));
        Self {
            config,
            local_peer,
            topics,
            state: RwLock::new(State {
                tips: VecDeque::new(),
                pinned_cids: std::collections::HashSet::new(),
                closed: false,
            }),
            handlers: RwLock::new(Vec::new()),
            fetcher: None,
            pinner: None,
            fetch_permits,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_pinner(mut self, pinner: Arc<dyn Pinner>) -> Self {
        self.pinner = Some(pinner);
        self
    }

    pub fn add_handler(&self, handler: Arc<dyn TipHandler>) {
        self.handlers.write().push(handler);
    }

    /// Accept an incoming tip: resolve its policy, append it to the bound
    /// buffer (evicting the globally oldest entries if necessary), notify
    /// handlers synchronously, then kick off fetch/pin asynchronously if
    /// the resolved policy calls for it.
    pub fn on_tip(self: &Arc<Self>, tip: Tip) -> Result<(), TipQueueError> {
        if tip.cid.is_empty() {
            return Err(TipQueueError::Malformed);
        }
        let resolved = self.config.resolve(&tip.peer_id, tip.schema);

        let evicted = {
            let mut state = self.state.write();
            if state.closed {
                return Err(TipQueueError::Closed);
            }
            state.tips.push_back(StoredTip {
                tip: tip.clone(),
                resolved,
            });
            let mut evicted = Vec::new();
            while state.tips.len() > self.config.max_queue_size {
                if let Some(oldest) = state.tips.pop_front() {
                    evicted.push(oldest.tip.cid);
                }
            }
            evicted
        };
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted tips over queue bound");
        }

        for handler in self.handlers.read().iter() {
            handler.on_tip(&tip, &resolved);
        }

        if resolved.auto_fetch {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                // Bound the tip -> fetch -> pin fan-out to max_in_flight_fetches.
                // Closed semaphore (during shutdown) just skips the fetch.
                let Ok(_permit) = this.fetch_permits.clone().acquire_owned().await else {
                    return;
                };
                this.fetch_and_maybe_pin(tip, resolved).await;
            });
        }

        Ok(())
    }

    async fn fetch_and_maybe_pin(&self, tip: Tip, resolved: ResolvedConfig) {
        let Some(fetcher) = &self.fetcher else {
            return;
        };
        match fetcher.fetch(&tip.cid, tip.schema).await {
            Ok(bytes) => {
                if resolved.auto_pin {
                    if let Some(pinner) = &self.pinner {
                        match pinner.pin(&tip.cid, &bytes, resolved.ttl).await {
                            Ok(()) => {
                                self.state.write().pinned_cids.insert(tip.cid.clone());
                            }
                            Err(err) => {
                                tracing::warn!(%err, cid = %tip.cid, "failed to pin fetched content");
                            }
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, cid = %tip.cid, "failed to fetch tip content");
            }
        }
    }

    pub fn get_tips(&self, schema: SchemaName) -> Vec<Tip> {
        self.state
            .read()
            .tips
            .iter()
            .filter(|s| s.tip.schema == schema)
            .map(|s| s.tip.clone())
            .collect()
    }

    pub fn get_all_tips(&self) -> Vec<Tip> {
        self.state.read().tips.iter().map(|s| s.tip.clone()).collect()
    }

    pub fn clear_tips(&self, schema: SchemaName) {
        self.state.write().tips.retain(|s| s.tip.schema != schema);
    }

    pub fn clear_all_tips(&self) {
        self.state.write().tips.clear();
    }

    pub fn remove_tip(&self, cid: &str) -> bool {
        let mut state = self.state.write();
        let before = state.tips.len();
        state.tips.retain(|s| s.tip.cid != cid);
        state.tips.len() != before
    }

    pub fn queue_size(&self) -> usize {
        self.state.read().tips.len()
    }

    pub fn get_pinned_cids(&self) -> Vec<String> {
        self.state.read().pinned_cids.iter().cloned().collect()
    }

    pub fn close(&self) {
        let mut state = self.state.write();
        state.closed = true;
        state.tips.clear();
        self.fetch_permits.close();
    }

    /// Construct and publish a tip announcement on the schema's topic.
    /// Never adds the announcement to this node's own queue -- a node does
    /// not queue its own tips, it only emits them.
    pub fn publish_tip(&self, cid: String, schema: SchemaName, signature: Option<Vec<u8>>, now: i64) -> CoreResult<()> {
        if cid.is_empty() {
            return Err(CoreError::Validation("empty cid".into()));
        }
        let tip = Tip {
            peer_id: self.local_peer.clone(),
            cid,
            schema,
            received_at: now,
            signature,
        };
        let bytes = encode_tip(&tip);
        self.topics
            .publish(schema, bytes)
            .map_err(|err| CoreError::Internal(err.to_string()))
    }
}

/// Minimal canonical wire form for a tip announcement: schema file
/// identifier followed by the cid and an optional signature, each
/// length-prefixed. Real transports are free to use their own envelope;
/// this just needs to be self-describing enough for the topic's
/// receive-side validator to recognize it as belonging to the schema.
fn encode_tip(tip: &Tip) -> Vec<u8> {
    let mut out = tip.schema.file_identifier().to_vec();
    let cid_bytes = tip.cid.as_bytes();
    out.extend_from_slice(&(cid_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(cid_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_validator::SchemaValidator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn queue(max_queue_size: usize) -> Arc<TipQueue> {
        let topics = Arc::new(TopicManager::new(
            "astra",
            PeerId::from("local"),
            Arc::new(SchemaValidator::default()),
        ));
        let config = TipQueueConfig {
            max_queue_size,
            ..Default::default()
        };
        Arc::new(TipQueue::new(config, PeerId::from("local"), topics))
    }

    fn tip(cid: &str, received_at: i64) -> Tip {
        Tip {
            peer_id: PeerId::from("peer-p"),
            cid: cid.to_string(),
            schema: SchemaName::Omm,
            received_at,
            signature: None,
        }
    }

    #[test]
    fn s6_bounded_queue_evicts_oldest_across_schemas() {
        let q = queue(3);
        for i in 0..5 {
            q.on_tip(tip(&format!("cid-{i}"), i)).unwrap();
        }
        assert!(q.queue_size() <= 3);
        let all: Vec<String> = q.get_all_tips().into_iter().map(|t| t.cid).collect();
        assert!(!all.contains(&"cid-0".to_string()));
        assert!(!all.contains(&"cid-1".to_string()));
    }

    #[test]
    fn remove_tip_removes_single_entry() {
        let q = queue(10);
        q.on_tip(tip("cid-a", 1)).unwrap();
        q.on_tip(tip("cid-b", 2)).unwrap();
        assert!(q.remove_tip("cid-a"));
        assert!(!q.remove_tip("cid-a"));
        assert_eq!(q.queue_size(), 1);
    }

    #[test]
    fn handlers_are_notified_synchronously() {
        struct CountingHandler(AtomicUsize);
        impl TipHandler for CountingHandler {
            fn on_tip(&self, _tip: &Tip, _resolved: &ResolvedConfig) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let q = queue(10);
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        q.add_handler(handler.clone());
        q.on_tip(tip("cid-a", 1)).unwrap();
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_tip_is_rejected() {
        let q = queue(10);
        assert!(matches!(q.on_tip(tip("", 1)), Err(TipQueueError::Malformed)));
    }

    #[test]
    fn closed_queue_rejects_new_tips() {
        let q = queue(10);
        q.close();
        assert!(matches!(q.on_tip(tip("cid-a", 1)), Err(TipQueueError::Closed)));
    }

    struct RecordingFetcher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for RecordingFetcher {
        async fn fetch(&self, cid: &str, _schema: SchemaName) -> CoreResult<Vec<u8>> {
            self.calls.lock().unwrap().push(cid.to_string());
            Ok(vec![1, 2, 3])
        }
    }

    struct RecordingPinner {
        pinned: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Pinner for RecordingPinner {
        async fn pin(&self, cid: &str, _bytes: &[u8], _ttl: Duration) -> CoreResult<()> {
            self.pinned.lock().unwrap().push(cid.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn auto_fetch_and_pin_are_triggered() {
        let topics = Arc::new(TopicManager::new(
            "astra",
            PeerId::from("local"),
            Arc::new(SchemaValidator::default()),
        ));
        let mut config = TipQueueConfig::default();
        config.default_auto_fetch = true;
        config.default_auto_pin = true;
        let fetcher = Arc::new(RecordingFetcher {
            calls: Mutex::new(Vec::new()),
        });
        let pinner = Arc::new(RecordingPinner {
            pinned: Mutex::new(Vec::new()),
        });
        let q = Arc::new(
            TipQueue::new(config, PeerId::from("local"), topics)
                .with_fetcher(fetcher.clone())
                .with_pinner(pinner.clone()),
        );
        q.on_tip(tip("cid-fetch", 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls.lock().unwrap().as_slice(), ["cid-fetch"]);
        assert_eq!(pinner.pinned.lock().unwrap().as_slice(), ["cid-fetch"]);
        assert_eq!(q.get_pinned_cids(), vec!["cid-fetch".to_string()]);
    }
}
