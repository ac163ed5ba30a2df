use std::collections::HashMap;
use std::sync::Arc;

use astra_types::{PeerId, SchemaName};
use astra_validator::SchemaValidator;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};

const TOPIC_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic manager is closed")]
    Closed,
}

/// A message received on a schema's topic, after self-filtering but before
/// the subscriber has looked at it.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub sender: PeerId,
    pub schema: SchemaName,
    pub bytes: Arc<[u8]>,
}

fn topic_name(prefix: &str, schema: SchemaName) -> String {
    format!("{prefix}/{schema}")
}

struct Topic {
    name: String,
    tx: broadcast::Sender<TopicMessage>,
}

/// One broadcast topic per schema, named `<prefix>/<schema>`. Publishing is
/// local fan-out only; wiring a topic to an actual network transport is the
/// caller's responsibility -- this type owns the subscription/filtering
/// semantics that both directions share.
pub struct TopicManager {
    prefix: String,
    local_peer: PeerId,
    validator: Arc<SchemaValidator>,
    topics: RwLock<HashMap<SchemaName, Topic>>,
    closed: RwLock<bool>,
}

impl TopicManager {
    pub fn new(prefix: impl Into<String>, local_peer: PeerId, validator: Arc<SchemaValidator>) -> Self {
        Self {
            prefix: prefix.into(),
            local_peer,
            validator,
            topics: RwLock::new(HashMap::new()),
            closed: RwLock::new(false),
        }
    }

    fn ensure_topic(&self, schema: SchemaName) -> String {
        let mut topics = self.topics.write();
        let topic = topics.entry(schema).or_insert_with(|| {
            let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
            Topic {
                name: topic_name(&self.prefix, schema),
                tx,
            }
        });
        topic.name.clone()
    }

    /// Join `schema`'s topic, creating it if this is the first join.
    /// Returns the fully qualified topic name.
    pub fn join(&self, schema: SchemaName) -> Result<String, TopicError> {
        if *self.closed.read() {
            return Err(TopicError::Closed);
        }
        Ok(self.ensure_topic(schema))
    }

    /// Publish `bytes` as though from the local peer. Messages published
    /// here are filtered back out of our own subscriptions.
    pub fn publish(&self, schema: SchemaName, bytes: Vec<u8>) -> Result<(), TopicError> {
        if *self.closed.read() {
            return Err(TopicError::Closed);
        }
        self.ensure_topic(schema);
        let topics = self.topics.read();
        if let Some(topic) = topics.get(&schema) {
            let message = TopicMessage {
                sender: self.local_peer.clone(),
                schema,
                bytes: Arc::from(bytes.into_boxed_slice()),
            };
            // No subscribers is not an error -- the topic simply has no
            // local listeners right now.
            let _ = topic.tx.send(message);
        }
        Ok(())
    }

    /// Deliver a message as though received from a remote peer. Real
    /// transport integration calls this on receipt; it applies the same
    /// self-filtering and validation every local subscriber expects.
    pub fn deliver_remote(&self, sender: PeerId, schema: SchemaName, bytes: Vec<u8>) -> Result<(), TopicError> {
        if *self.closed.read() {
            return Err(TopicError::Closed);
        }
        if sender == self.local_peer {
            return Ok(());
        }
        if let Err(err) = self.validator.validate(schema, &bytes) {
            tracing::debug!(%err, %schema, %sender, "dropping invalid message on receipt");
            return Ok(());
        }
        self.ensure_topic(schema);
        let topics = self.topics.read();
        if let Some(topic) = topics.get(&schema) {
            let message = TopicMessage {
                sender,
                schema,
                bytes: Arc::from(bytes.into_boxed_slice()),
            };
            let _ = topic.tx.send(message);
        }
        Ok(())
    }

    /// Subscribe to `schema`'s topic. The returned stream already excludes
    /// messages sent by the local peer and skips entries this subscriber
    /// lagged past (logging the loss); it never yields a hard error.
    pub fn subscribe(
        &self,
        schema: SchemaName,
    ) -> Result<impl Stream<Item = TopicMessage> + Send + 'static, TopicError> {
        if *self.closed.read() {
            return Err(TopicError::Closed);
        }
        self.ensure_topic(schema);
        let rx = {
            let topics = self.topics.read();
            topics.get(&schema).expect("just ensured").tx.subscribe()
        };
        let local_peer = self.local_peer.clone();
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(message) if message.sender != local_peer => Some(message),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "subscriber lagged, dropped messages");
                None
            }
        });
        Ok(stream)
    }

    /// Shut down the manager. Existing subscriptions observe the channel
    /// close; further joins, publishes and subscribes are rejected.
    pub fn close(&self) {
        *self.closed.write() = true;
        self.topics.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Arc<SchemaValidator> {
        Arc::new(SchemaValidator::default())
    }

    fn omm_bytes(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SchemaName::Omm.file_identifier().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn publish_is_filtered_from_own_subscription() {
        let manager = TopicManager::new("astra", PeerId::from("local"), validator());
        let mut sub = Box::pin(manager.subscribe(SchemaName::Omm).unwrap());
        manager.publish(SchemaName::Omm, omm_bytes(b"x")).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(result.unwrap_or(None).is_none());
    }

    #[tokio::test]
    async fn remote_message_is_delivered() {
        let manager = TopicManager::new("astra", PeerId::from("local"), validator());
        let mut sub = Box::pin(manager.subscribe(SchemaName::Omm).unwrap());
        manager
            .deliver_remote(PeerId::from("remote"), SchemaName::Omm, omm_bytes(b"y"))
            .unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.sender, PeerId::from("remote"));
    }

    #[tokio::test]
    async fn invalid_remote_message_is_dropped() {
        let manager = TopicManager::new("astra", PeerId::from("local"), validator());
        let mut sub = Box::pin(manager.subscribe(SchemaName::Omm).unwrap());
        manager
            .deliver_remote(PeerId::from("remote"), SchemaName::Omm, b"garbage".to_vec())
            .unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(result.unwrap_or(None).is_none());
    }

    #[test]
    fn join_returns_prefixed_topic_name() {
        let manager = TopicManager::new("astra", PeerId::from("local"), validator());
        assert_eq!(manager.join(SchemaName::Cdm).unwrap(), "astra/CDM");
    }

    #[test]
    fn closed_manager_rejects_operations() {
        let manager = TopicManager::new("astra", PeerId::from("local"), validator());
        manager.close();
        assert!(matches!(manager.join(SchemaName::Omm), Err(TopicError::Closed)));
        assert!(matches!(
            manager.publish(SchemaName::Omm, vec![]),
            Err(TopicError::Closed)
        ));
    }
}
