use std::sync::RwLock;

use renderbox_models::api::FeatureFlagMap;
use serde_json::Value;

/// Capability negotiation state for one channel.
///
/// The client map is fixed at construction and announced to the server as
/// the first frame of every connection. The server map is populated when
/// the server announces its own flags and is replaced wholesale on every
/// receipt. Accessors hand out copies so callers can never alias the
/// negotiated state.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    client: FeatureFlagMap,
    server: RwLock<Option<FeatureFlagMap>>,
}

impl FeatureFlags {
    #[must_use]
    pub const fn new(client: FeatureFlagMap) -> Self {
        Self {
            client,
            server: RwLock::new(None),
        }
    }

    /// The capability map this client announces on connect.
    #[must_use]
    pub fn client(&self) -> FeatureFlagMap {
        self.client.clone()
    }

    /// Replaces the stored server snapshot.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn set_server(&self, flags: FeatureFlagMap) {
        log::debug!("set_server: server announced {} flag(s)", flags.len());
        self.server.write().unwrap().replace(flags);
    }

    /// Whether the server announced `name` with a boolean `true` value.
    ///
    /// Any other value, including truthy non-booleans, reads as
    /// unsupported.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn server_supports(&self, name: &str) -> bool {
        self.server
            .read()
            .unwrap()
            .as_ref()
            .and_then(|flags| flags.get(name))
            .is_some_and(|value| value == &Value::Bool(true))
    }

    /// The raw value the server announced for `name`, if any.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn server_feature(&self, name: &str) -> Option<Value> {
        self.server
            .read()
            .unwrap()
            .as_ref()
            .and_then(|flags| flags.get(name).cloned())
    }

    /// A copy of the full server snapshot, empty before any announcement.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn server_features(&self) -> FeatureFlagMap {
        self.server.read().unwrap().clone().unwrap_or_default()
    }
}
