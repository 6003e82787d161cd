#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! # RenderBox Client
//!
//! Realtime API client for a RenderBox engine. One persistent websocket
//! channel fans server push messages out to name-keyed listeners, and the
//! engine's HTTP surface rides alongside it on the same configuration.
//!
//! ## Main Components
//!
//! * [`ApiClient`] - entry point tying the channel, listeners, session
//!   identity, and HTTP operations together
//! * [`ClientConfig`] - host, path, and capability configuration
//! * [`events::EventEmitter`] - name-keyed listener registry
//! * [`channel::ChannelHandle`] - send/close handle for a running channel
//!
//! ## Usage
//!
//! ```no_run
//! use renderbox_client::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ApiClient::new(ClientConfig::new("localhost:8188"));
//!
//!     client.on("progress", |event| {
//!         println!("progress: {event:?}");
//!     });
//!
//!     client.init();
//! }
//! ```

pub mod channel;
pub mod events;
pub mod flags;
pub mod http;
pub mod session;

use std::sync::{Arc, RwLock};

use renderbox_models::api::FeatureFlagMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelClient, ChannelContext, ChannelHandle};
use crate::events::{EventEmitter, ListenerId};
use crate::flags::FeatureFlags;
use crate::session::{MemorySessionStore, SessionKey, SessionStore};

pub use renderbox_models as models;
pub use renderbox_models::events::ChannelEvent;

/// Connection settings for an [`ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    host: String,
    base_path: String,
    secure: bool,
    user: Option<String>,
    client_features: FeatureFlagMap,
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            base_path: String::new(),
            secure: false,
            user: None,
            client_features: default_client_features(),
        }
    }

    /// Path prefix when the engine is mounted below the server root.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Use `https`/`wss` instead of `http`/`ws`.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// User id sent with every request on multi-user servers.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Overrides one capability announced to the server on connect.
    #[must_use]
    pub fn with_client_feature(mut self, name: impl Into<String>, value: Value) -> Self {
        self.client_features.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[must_use]
    pub const fn client_features(&self) -> &FeatureFlagMap {
        &self.client_features
    }

    fn http_base(&self) -> String {
        format!(
            "{}://{}{}",
            if self.secure { "https" } else { "http" },
            self.host,
            self.base_path,
        )
    }

    /// Absolute URL for an engine API route.
    #[must_use]
    pub fn api_url(&self, route: &str) -> String {
        format!("{}/api{route}", self.http_base())
    }

    /// Absolute URL for an internal engine route with no stability
    /// guarantees.
    #[must_use]
    pub fn internal_url(&self, route: &str) -> String {
        format!("{}/internal{route}", self.http_base())
    }

    /// Absolute URL for the realtime channel endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!(
            "{}://{}{}/ws",
            if self.secure { "wss" } else { "ws" },
            self.host,
            self.base_path,
        )
    }
}

fn default_client_features() -> FeatureFlagMap {
    let mut features = FeatureFlagMap::new();
    features.insert("supports_preview_metadata".to_string(), Value::Bool(true));
    features
}

/// Client for one RenderBox engine: realtime channel lifecycle, event
/// listeners, session identity, and the HTTP API surface.
///
/// Cloning is cheap and every clone shares the same channel, listeners,
/// and session state.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    emitter: Arc<EventEmitter>,
    session: Arc<dyn SessionStore>,
    flags: Arc<FeatureFlags>,
    channel: Arc<RwLock<Option<ChannelHandle>>>,
}

impl ApiClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let flags = Arc::new(FeatureFlags::new(config.client_features.clone()));

        Self {
            config: Arc::new(config),
            emitter: Arc::new(EventEmitter::new()),
            session: Arc::new(MemorySessionStore::new()),
            flags,
            channel: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the in-memory session store, e.g. with one backed by
    /// platform storage so session identity survives restarts.
    #[must_use]
    pub fn with_session_store(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    #[must_use]
    pub fn feature_flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Registers `callback` for channel events named `name`.
    pub fn on(
        &self,
        name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.emitter.on(name, callback)
    }

    /// Unregisters a previously registered listener.
    pub fn off(&self, listener: &ListenerId) -> bool {
        self.emitter.off(listener)
    }

    /// The current session identity, if the server assigned one or an
    /// earlier run persisted one.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        session::client_id(&*self.session)
    }

    /// The session identity, minting and persisting a local one when none
    /// exists yet.
    pub fn client_id_or_init(&self) -> String {
        self.client_id().unwrap_or_else(|| {
            let id = nanoid::nanoid!();
            log::debug!("client_id_or_init: generated local client id {id}");
            self.session.set(SessionKey::PersistentClientId, &id);
            id
        })
    }

    /// Opens the realtime channel.
    ///
    /// A no-op when the channel is already running. The connection is
    /// maintained in the background, reconnecting as needed, until
    /// [`Self::shutdown`].
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn init(&self) {
        let mut channel = self.channel.write().unwrap();

        if channel.is_some() {
            log::debug!("init: channel already running");
            return;
        }

        log::debug!("init: opening channel to {}", self.config.ws_url());

        let context = Arc::new(ChannelContext::new(
            self.config.ws_url(),
            self.config.api_url("/prompt"),
            self.config.user.clone(),
            self.emitter.clone(),
            self.session.clone(),
            self.flags.clone(),
        ));
        let (client, handle) = ChannelClient::new(context, CancellationToken::new());

        channel.replace(handle);
        drop(channel);

        tokio::spawn(async move { client.start().await });
    }

    /// Closes the realtime channel and stops any polling fallback.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn shutdown(&self) {
        if let Some(handle) = self.channel.write().unwrap().take() {
            log::debug!("shutdown: closing channel");
            handle.close();
        }
    }

    /// Handle to the running channel, if one is open.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn sender(&self) -> Option<ChannelHandle> {
        self.channel.read().unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test_log::test]
    fn config_builds_api_and_ws_urls() {
        let config = ClientConfig::new("localhost:8188");

        assert_eq!(config.api_url("/prompt"), "http://localhost:8188/api/prompt");
        assert_eq!(
            config.internal_url("/logs/raw"),
            "http://localhost:8188/internal/logs/raw"
        );
        assert_eq!(config.ws_url(), "ws://localhost:8188/ws");
    }

    #[test_log::test]
    fn config_honors_base_path_and_secure() {
        let config = ClientConfig::new("render.example.com")
            .with_secure(true)
            .with_base_path("/render");

        assert_eq!(
            config.api_url("/queue"),
            "https://render.example.com/render/api/queue"
        );
        assert_eq!(config.ws_url(), "wss://render.example.com/render/ws");
    }

    #[test_log::test]
    fn client_id_or_init_persists_generated_identity() {
        let client = ApiClient::new(ClientConfig::new("localhost:8188"));

        assert_eq!(client.client_id(), None);

        let id = client.client_id_or_init();

        assert!(!id.is_empty());
        assert_eq!(client.client_id(), Some(id.clone()));
        assert_eq!(client.client_id_or_init(), id);
    }

    #[test_log::test]
    fn default_capabilities_announce_preview_metadata_support() {
        let client = ApiClient::new(ClientConfig::new("localhost:8188"));

        assert_eq!(
            client
                .feature_flags()
                .client()
                .get("supports_preview_metadata"),
            Some(&json!(true))
        );
    }

    #[test_log::test]
    fn client_feature_overrides_default() {
        let config = ClientConfig::new("localhost:8188")
            .with_client_feature("supports_preview_metadata", json!(false))
            .with_client_feature("max_upload_size", json!(1024));
        let client = ApiClient::new(config);

        let features = client.feature_flags().client();
        assert_eq!(features.get("supports_preview_metadata"), Some(&json!(false)));
        assert_eq!(features.get("max_upload_size"), Some(&json!(1024)));
    }

    #[test_log::test(tokio::test)]
    async fn init_twice_keeps_one_channel() {
        let client = ApiClient::new(ClientConfig::new("127.0.0.1:1"));

        client.init();
        let first = client.sender().unwrap();

        client.init();
        let second = client.sender().unwrap();

        first.close();
        assert!(second.is_closed());

        client.shutdown();
        assert!(client.sender().is_none());
    }
}
