use std::collections::BTreeMap;
use std::sync::RwLock;

use strum_macros::{AsRefStr, EnumString};

/// Slots a [`SessionStore`] can hold a session identity in.
///
/// The window slot is scoped to a single running frontend instance and is
/// never carried over when that instance is cloned. The persistent slot
/// survives restarts of the same instance and seeds the first connection
/// attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKey {
    WindowClientId,
    PersistentClientId,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<SessionKey> for String {
    fn from(value: SessionKey) -> Self {
        value.as_ref().to_string()
    }
}

/// Storage backend for session identities.
///
/// Embedders back this with whatever scoping their platform offers. The
/// in-memory [`MemorySessionStore`] is used when nothing else is supplied.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: SessionKey) -> Option<String>;
    fn set(&self, key: SessionKey, value: &str);
    fn take(&self, key: SessionKey) -> Option<String>;
}

impl std::fmt::Debug for dyn SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{{dyn SessionStore}}")
    }
}

/// Process-local [`SessionStore`] with no persistence across restarts.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<BTreeMap<SessionKey, String>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    fn get(&self, key: SessionKey) -> Option<String> {
        self.values.read().unwrap().get(&key).cloned()
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    fn set(&self, key: SessionKey, value: &str) {
        log::trace!("set: key={key} value={value}");
        self.values.write().unwrap().insert(key, value.to_string());
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    fn take(&self, key: SessionKey) -> Option<String> {
        self.values.write().unwrap().remove(&key)
    }
}

/// Resolves the effective session identity from `store`, preferring the
/// window slot over the persistent slot.
pub(crate) fn client_id(store: &dyn SessionStore) -> Option<String> {
    store
        .get(SessionKey::WindowClientId)
        .or_else(|| store.get(SessionKey::PersistentClientId))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn memory_store_round_trips_values() {
        let store = MemorySessionStore::new();

        assert_eq!(store.get(SessionKey::WindowClientId), None);

        store.set(SessionKey::WindowClientId, "abc123");

        assert_eq!(
            store.get(SessionKey::WindowClientId),
            Some("abc123".to_string())
        );
        assert_eq!(store.take(SessionKey::WindowClientId), Some("abc123".to_string()));
        assert_eq!(store.get(SessionKey::WindowClientId), None);
    }

    #[test_log::test]
    fn client_id_prefers_window_slot() {
        let store = MemorySessionStore::new();

        assert_eq!(client_id(&store), None);

        store.set(SessionKey::PersistentClientId, "persisted");

        assert_eq!(client_id(&store), Some("persisted".to_string()));

        store.set(SessionKey::WindowClientId, "windowed");

        assert_eq!(client_id(&store), Some("windowed".to_string()));
    }

    #[test_log::test]
    fn session_key_serializes_to_screaming_snake_case() {
        assert_eq!(SessionKey::WindowClientId.to_string(), "WINDOW_CLIENT_ID");
        assert_eq!(
            String::from(SessionKey::PersistentClientId),
            "PERSISTENT_CLIENT_ID"
        );
    }
}
