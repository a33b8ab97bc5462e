//! Correlation store
//!
//! Keyed state for every participant the bridge is currently tracking.
//! The store exclusively owns record lifetime; handlers and liveness
//! tasks reference records by key and re-fetch rather than cache, since
//! a record can be concurrently mutated or deleted.
//!
//! Lifecycle is explicit: the core "started" event opens it, "shutdown"
//! closes it. Operations against a closed store report [`BridgeError::StoreClosed`].

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::errors::{BridgeError, Result};

/// Unique key for one media-plugin attachment within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantKey {
    pub session_id: u64,
    pub handle_id: u64,
}

impl ParticipantKey {
    pub fn new(session_id: u64, handle_id: u64) -> Self {
        Self { session_id, handle_id }
    }
}

/// Correlated state of one participant across the lifetime of a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub user_id: String,
    /// Numeric participant id assigned by the media plugin on join
    pub user_num: Option<String>,
    /// Conference identifier, already URL-safe
    pub conf_id: String,
    pub conf_num: String,
    pub device_id: String,
    pub audio_ssrc: Option<String>,
    pub video_ssrc: Option<String>,
    pub local_candidate: Option<String>,
    pub remote_candidate: Option<String>,
    /// Backend-assigned connection id, present once join delivery succeeded
    pub connection_id: Option<String>,
    /// Bearer token from the identity authority, present once attach
    /// authentication succeeded
    pub token: Option<String>,
}

/// In-memory keyed store of active participants
pub struct CorrelationStore {
    records: DashMap<ParticipantKey, ParticipantRecord>,
    open: AtomicBool,
}

impl CorrelationStore {
    /// A new store starts closed; see [`CorrelationStore::open`].
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the store, discarding anything left from a previous run.
    pub fn open(&self) {
        self.records.clear();
        self.open.store(true, Ordering::SeqCst);
        debug!("Correlation store opened");
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.records.clear();
        debug!("Correlation store closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BridgeError::StoreClosed)
        }
    }

    /// Insert a record, overwriting any record already present for the
    /// key. Recreation is idempotent by design, never a duplicate.
    pub fn insert(&self, key: ParticipantKey, record: ParticipantRecord) -> Result<()> {
        self.ensure_open()?;
        self.records.insert(key, record);
        Ok(())
    }

    /// Fetch a record. `Ok(None)` is a normal outcome, not an error.
    pub fn get(&self, key: &ParticipantKey) -> Result<Option<ParticipantRecord>> {
        self.ensure_open()?;
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    pub fn set_token(&self, key: &ParticipantKey, token: String) -> Result<()> {
        self.update(key, |r| r.token = Some(token))
    }

    pub fn set_user_num(&self, key: &ParticipantKey, user_num: String) -> Result<()> {
        self.update(key, |r| r.user_num = Some(user_num))
    }

    pub fn set_connection_id(&self, key: &ParticipantKey, connection_id: String) -> Result<()> {
        self.update(key, |r| r.connection_id = Some(connection_id))
    }

    fn update<F: FnOnce(&mut ParticipantRecord)>(&self, key: &ParticipantKey, f: F) -> Result<()> {
        self.ensure_open()?;
        match self.records.get_mut(key) {
            Some(mut record) => {
                f(&mut record);
                Ok(())
            }
            None => Err(BridgeError::NotFound),
        }
    }

    /// Remove a record; `true` when one was present.
    pub fn remove(&self, key: &ParticipantKey) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.records.remove(key).is_some())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str) -> ParticipantRecord {
        ParticipantRecord {
            user_id: user.to_string(),
            conf_id: "Demo-Room".to_string(),
            conf_num: "1234".to_string(),
            device_id: "d1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = CorrelationStore::new();
        let key = ParticipantKey::new(1, 2);
        assert!(matches!(store.insert(key, record("u1")), Err(BridgeError::StoreClosed)));
        assert!(matches!(store.get(&key), Err(BridgeError::StoreClosed)));
    }

    #[test]
    fn insert_overwrites_instead_of_duplicating() {
        let store = CorrelationStore::new();
        store.open();
        let key = ParticipantKey::new(1, 2);
        store.insert(key, record("u1")).unwrap();
        store.insert(key, record("u2")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().unwrap().user_id, "u2");
    }

    #[test]
    fn targeted_setters_enrich_the_record() {
        let store = CorrelationStore::new();
        store.open();
        let key = ParticipantKey::new(1, 2);
        store.insert(key, record("u1")).unwrap();

        store.set_token(&key, "tok".to_string()).unwrap();
        store.set_user_num(&key, "555".to_string()).unwrap();
        store.set_connection_id(&key, "conn-1".to_string()).unwrap();

        let rec = store.get(&key).unwrap().unwrap();
        assert_eq!(rec.token.as_deref(), Some("tok"));
        assert_eq!(rec.user_num.as_deref(), Some("555"));
        assert_eq!(rec.connection_id.as_deref(), Some("conn-1"));
    }

    #[test]
    fn setters_on_absent_key_report_not_found() {
        let store = CorrelationStore::new();
        store.open();
        let key = ParticipantKey::new(1, 2);
        assert!(matches!(
            store.set_token(&key, "tok".to_string()),
            Err(BridgeError::NotFound)
        ));
    }

    #[test]
    fn remove_reports_presence_and_absence() {
        let store = CorrelationStore::new();
        store.open();
        let key = ParticipantKey::new(1, 2);
        store.insert(key, record("u1")).unwrap();
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn close_clears_state() {
        let store = CorrelationStore::new();
        store.open();
        store.insert(ParticipantKey::new(1, 2), record("u1")).unwrap();
        store.close();
        store.open();
        assert!(store.is_empty());
    }
}
