use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use astra_types::{CoreError, CoreResult, PeerId, PeerMetadata, TrustLevel, TrustedPeer};
use parking_lot::RwLock;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::RegistryConfig;
use crate::events::RegistryEvent;
use crate::persist;

/// Trust level given to a peer auto-created on its first successful
/// connection while the registry is not in strict mode. Not `Untrusted`:
/// the peer already completed a handshake, so it's treated as a known
/// quantity with conservative limits rather than shut out entirely.
pub const AUTO_CREATED_TRUST_LEVEL: TrustLevel = TrustLevel::Limited;

struct Inner {
    peers: HashMap<PeerId, TrustedPeer>,
    strict_mode: bool,
}

/// Trust records, blocklist, a strict-mode flag and a best-effort event
/// feed. One reader-writer lock guards peer state; the blocklist has its
/// own lock so the gate's hot-path blocklist check never contends with
/// registry mutations.
pub struct PeerRegistry {
    inner: RwLock<Inner>,
    blocklist: RwLock<HashSet<PeerId>>,
    db: Arc<Mutex<Connection>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl PeerRegistry {
    pub fn init(config: RegistryConfig) -> CoreResult<Self> {
        astra_utils::config::ensure_parent_dir(&config.db_path)
            .map_err(|e| CoreError::Io(e))?;
        let conn = Connection::open(&config.db_path)
            .map_err(|e| CoreError::Database(e.to_string()))?;
        persist::ensure_schema(&conn).map_err(|e| CoreError::Database(e.to_string()))?;

        let loaded_peers = persist::load_peers(&conn)
            .map_err(|e| CoreError::Database(e.to_string()))?;
        let loaded_blocklist = persist::load_blocklist(&conn)
            .map_err(|e| CoreError::Database(e.to_string()))?;

        let peers = loaded_peers.into_iter().map(|p| (p.id.clone(), p)).collect();
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            inner: RwLock::new(Inner {
                peers,
                strict_mode: config.strict_mode,
            }),
            blocklist: RwLock::new(loaded_blocklist.into_iter().collect()),
            db: Arc::new(Mutex::new(conn)),
            events,
        })
    }

    fn persist_peer(&self, peer: &TrustedPeer) {
        let conn = self.db.lock().expect("registry db mutex poisoned");
        if let Err(err) = persist::save_peer(&conn, peer) {
            tracing::warn!(%err, peer = %peer.id, "failed to persist peer");
        }
    }

    fn notify(&self, event: RegistryEvent) {
        // Best-effort: a send error only means there are no subscribers
        // right now, which is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn is_strict_mode(&self) -> bool {
        self.inner.read().strict_mode
    }

    pub fn set_strict_mode(&self, strict: bool) {
        self.inner.write().strict_mode = strict;
    }

    pub fn get(&self, id: &PeerId) -> Option<TrustedPeer> {
        self.inner.read().peers.get(id).cloned()
    }

    pub fn list(&self) -> Vec<TrustedPeer> {
        self.inner.read().peers.values().cloned().collect()
    }

    pub fn add_peer(&self, id: PeerId, trust_level: TrustLevel, now: i64) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if inner.peers.contains_key(&id) {
            return Err(CoreError::AlreadyExists);
        }
        let peer = TrustedPeer::new(id.clone(), trust_level, now);
        inner.peers.insert(id.clone(), peer.clone());
        drop(inner);
        self.persist_peer(&peer);
        self.notify(RegistryEvent::PeerAdded(id));
        Ok(())
    }

    /// Create a registry entry the first time a peer successfully connects,
    /// if the registry isn't in strict mode and the peer isn't already
    /// known. A no-op if the peer is already present.
    pub fn ensure_on_connect(&self, id: &PeerId, now: i64) {
        {
            let inner = self.inner.read();
            if inner.strict_mode || inner.peers.contains_key(id) {
                return;
            }
        }
        let _ = self.add_peer(id.clone(), AUTO_CREATED_TRUST_LEVEL, now);
    }

    pub fn update_metadata(&self, id: &PeerId, metadata: PeerMetadata) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let peer = inner.peers.get_mut(id).ok_or(CoreError::NotFound)?;
        peer.metadata = Some(metadata);
        let snapshot = peer.clone();
        drop(inner);
        self.persist_peer(&snapshot);
        self.notify(RegistryEvent::PeerUpdated(id.clone()));
        Ok(())
    }

    pub fn add_to_group(&self, id: &PeerId, group: String) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let peer = inner.peers.get_mut(id).ok_or(CoreError::NotFound)?;
        let metadata = peer.metadata.get_or_insert_with(PeerMetadata::default);
        if !metadata.groups.contains(&group) {
            metadata.groups.push(group);
        }
        let snapshot = peer.clone();
        drop(inner);
        self.persist_peer(&snapshot);
        self.notify(RegistryEvent::PeerUpdated(id.clone()));
        Ok(())
    }

    pub fn set_trust_level(&self, id: &PeerId, new: TrustLevel) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let peer = inner.peers.get_mut(id).ok_or(CoreError::NotFound)?;
        let old = peer.trust_level;
        peer.trust_level = new;
        let snapshot = peer.clone();
        drop(inner);
        self.persist_peer(&snapshot);
        if old != new {
            self.notify(RegistryEvent::TrustLevelChanged {
                peer_id: id.clone(),
                old,
                new,
            });
        }
        Ok(())
    }

    pub fn remove(&self, id: &PeerId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if inner.peers.remove(id).is_none() {
            return Err(CoreError::NotFound);
        }
        drop(inner);
        let conn = self.db.lock().expect("registry db mutex poisoned");
        if let Err(err) = persist::delete_peer(&conn, id) {
            tracing::warn!(%err, peer = %id, "failed to delete persisted peer");
        }
        drop(conn);
        self.notify(RegistryEvent::PeerRemoved(id.clone()));
        Ok(())
    }

    /// Record an established connection: bump counters and
    /// `last_connected`. Always succeeds even for a peer not yet in the
    /// registry under non-strict mode, creating it first.
    pub fn record_connection(&self, id: &PeerId, now: i64) {
        self.ensure_on_connect(id, now);
        let mut inner = self.inner.write();
        if let Some(peer) = inner.peers.get_mut(id) {
            peer.counters.connection_count += 1;
            peer.last_connected = Some(now);
            let snapshot = peer.clone();
            drop(inner);
            self.persist_peer(&snapshot);
        }
    }

    pub fn block(&self, id: PeerId) {
        self.blocklist.write().insert(id.clone());
        let conn = self.db.lock().expect("registry db mutex poisoned");
        if let Err(err) = persist::add_block(&conn, &id) {
            tracing::warn!(%err, peer = %id, "failed to persist blocklist entry");
        }
    }

    pub fn unblock(&self, id: &PeerId) {
        self.blocklist.write().remove(id);
        let conn = self.db.lock().expect("registry db mutex poisoned");
        if let Err(err) = persist::remove_block(&conn, id) {
            tracing::warn!(%err, peer = %id, "failed to remove blocklist entry");
        }
    }

    pub fn is_blocked(&self, id: &PeerId) -> bool {
        self.blocklist.read().contains(id)
    }

    pub fn export(&self) -> Vec<TrustedPeer> {
        self.list()
    }

    pub fn import(&self, peers: Vec<TrustedPeer>) {
        {
            let mut inner = self.inner.write();
            for peer in &peers {
                inner.peers.insert(peer.id.clone(), peer.clone());
            }
        }
        for peer in &peers {
            self.persist_peer(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_remove_peer() {
        let registry = PeerRegistry::init(RegistryConfig::test("basic")).unwrap();
        let id = PeerId::from("peer-1");
        registry.add_peer(id.clone(), TrustLevel::Standard, 100).unwrap();
        assert_eq!(registry.get(&id).unwrap().trust_level, TrustLevel::Standard);

        assert!(matches!(
            registry.add_peer(id.clone(), TrustLevel::Standard, 100),
            Err(CoreError::AlreadyExists)
        ));

        registry.remove(&id).unwrap();
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn trust_level_change_emits_event() {
        let registry = PeerRegistry::init(RegistryConfig::test("events")).unwrap();
        let mut rx = registry.subscribe();
        let id = PeerId::from("peer-2");
        registry.add_peer(id.clone(), TrustLevel::Standard, 0).unwrap();
        registry.set_trust_level(&id, TrustLevel::Trusted).unwrap();

        let mut saw_change = false;
        while let Ok(event) = rx.try_recv() {
            if let RegistryEvent::TrustLevelChanged { new, .. } = event {
                assert_eq!(new, TrustLevel::Trusted);
                saw_change = true;
            }
        }
        assert!(saw_change);
    }

    #[test]
    fn blocklist_is_independent_of_peer_entries() {
        let registry = PeerRegistry::init(RegistryConfig::test("blocklist")).unwrap();
        let id = PeerId::from("peer-3");
        registry.block(id.clone());
        assert!(registry.is_blocked(&id));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn non_strict_mode_auto_creates_on_connect() {
        let registry = PeerRegistry::init(RegistryConfig::test("auto-create")).unwrap();
        let id = PeerId::from("peer-4");
        registry.record_connection(&id, 42);
        let peer = registry.get(&id).unwrap();
        assert_eq!(peer.trust_level, AUTO_CREATED_TRUST_LEVEL);
        assert_eq!(peer.counters.connection_count, 1);
    }
}
