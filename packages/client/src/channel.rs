use std::collections::BTreeSet;
use std::str::FromStr as _;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_channel::mpsc::UnboundedSender;
use futures_util::{StreamExt as _, future, pin_mut};
use renderbox_models::api::FeatureFlagMap;
use renderbox_models::events::{ChannelEvent, Envelope, EnvelopeType, ExecutingData, StatusData};
use renderbox_models::frame::{self, DecodedFrame};
use serde_json::Value;
use thiserror::Error;
use tokio::select;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error, protocol::Message},
};
use tokio_util::sync::CancellationToken;

use crate::events::EventEmitter;
use crate::flags::FeatureFlags;
use crate::http;
use crate::session::{self, SessionKey, SessionStore};

/// Delay between losing a connection and dialing the next attempt.
const RECONNECT_DELAY: Duration = Duration::from_millis(300);
/// Cadence of the HTTP status fallback when the channel never connected.
const POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// Cadence of protocol-level pings on a live connection.
const PING_INTERVAL: Duration = Duration::from_millis(5000);

/// Outbound payload for the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
    Ping,
}

#[derive(Debug, Error)]
pub enum ChannelSendError {
    #[error("Channel send failed: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), ChannelSendError>;
    async fn send_binary(&self, bytes: Bytes) -> Result<(), ChannelSendError>;
    async fn ping(&self) -> Result<(), ChannelSendError>;
}

impl core::fmt::Debug for dyn ChannelSender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("{{dyn ChannelSender}}")
    }
}

/// Handle to a running channel, used to send messages and to shut the
/// connection down for good.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    sender: Arc<RwLock<Option<UnboundedSender<ChannelMessage>>>>,
    cancellation_token: CancellationToken,
}

impl ChannelHandle {
    /// Permanently closes the channel. No further reconnect attempts are
    /// made after this.
    pub fn close(&self) {
        log::debug!("close: shutting down channel");
        self.cancellation_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    fn send_message(&self, message: ChannelMessage) -> Result<(), ChannelSendError> {
        self.sender.read().unwrap().as_ref().map_or_else(
            || {
                log::debug!("send_message: No channel sender to send to");
                Ok(())
            },
            |sender| {
                sender
                    .unbounded_send(message)
                    .map_err(|e| ChannelSendError::SendFailed(e.to_string()))
            },
        )
    }
}

#[async_trait]
impl ChannelSender for ChannelHandle {
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    async fn send(&self, message: &str) -> Result<(), ChannelSendError> {
        self.send_message(ChannelMessage::Text(message.to_string()))
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    async fn send_binary(&self, bytes: Bytes) -> Result<(), ChannelSendError> {
        self.send_message(ChannelMessage::Binary(bytes))
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    async fn ping(&self) -> Result<(), ChannelSendError> {
        self.send_message(ChannelMessage::Ping)
    }
}

/// Shared state behind one realtime channel: event fan-out, session
/// identity, capability negotiation, and decoded message dispatch.
#[derive(Debug)]
pub(crate) struct ChannelContext {
    ws_url: String,
    status_url: String,
    user: Option<String>,
    emitter: Arc<EventEmitter>,
    session: Arc<dyn SessionStore>,
    flags: Arc<FeatureFlags>,
    warned_unknown_types: RwLock<BTreeSet<String>>,
}

impl ChannelContext {
    pub(crate) fn new(
        ws_url: String,
        status_url: String,
        user: Option<String>,
        emitter: Arc<EventEmitter>,
        session: Arc<dyn SessionStore>,
        flags: Arc<FeatureFlags>,
    ) -> Self {
        Self {
            ws_url,
            status_url,
            user,
            emitter,
            session,
            flags,
            warned_unknown_types: RwLock::new(BTreeSet::new()),
        }
    }

    fn connect_url(&self) -> String {
        let client_id_param = session::client_id(&*self.session)
            .map_or_else(String::new, |id| format!("?clientId={id}"));

        format!("{}{client_id_param}", self.ws_url)
    }

    fn capability_announcement(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            kind: EnvelopeType::FeatureFlags.as_ref().to_string(),
            data: serde_json::to_value(self.flags.client())?,
        })
    }

    /// Translates one raw websocket message into channel events.
    fn handle_message(&self, message: Message) {
        match message {
            Message::Text(text) => self.handle_text(text.as_str()),
            Message::Binary(bytes) => self.handle_binary(&bytes),
            Message::Ping(_) | Message::Pong(_) => log::trace!("Received ping/pong"),
            Message::Close(frame) => log::debug!("Received close frame: {frame:?}"),
            Message::Frame(frame) => log::trace!("Received raw frame: {frame:?}"),
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.dispatch_envelope(envelope),
            Err(e) => log::error!("Failed to parse incoming message: {e:?} ({text})"),
        }
    }

    /// Routes one decoded envelope to its listeners.
    ///
    /// A malformed payload never takes the channel down. It is logged and
    /// the message dropped.
    fn dispatch_envelope(&self, envelope: Envelope) {
        log::trace!("dispatch_envelope: type={}", envelope.kind);

        match EnvelopeType::from_str(&envelope.kind) {
            Ok(EnvelopeType::Status) => self.handle_status(envelope.data),
            Ok(EnvelopeType::Executing) => self.handle_executing(envelope.data),
            Ok(EnvelopeType::FeatureFlags) => self.handle_feature_flags(envelope.data),
            Ok(EnvelopeType::ExecutionStart) => {
                self.emitter.emit(&ChannelEvent::ExecutionStart(envelope.data));
            }
            Ok(EnvelopeType::ExecutionError) => {
                self.emitter.emit(&ChannelEvent::ExecutionError(envelope.data));
            }
            Ok(EnvelopeType::ExecutionInterrupted) => {
                self.emitter
                    .emit(&ChannelEvent::ExecutionInterrupted(envelope.data));
            }
            Ok(EnvelopeType::ExecutionCached) => {
                self.emitter.emit(&ChannelEvent::ExecutionCached(envelope.data));
            }
            Ok(EnvelopeType::ExecutionSuccess) => {
                self.emitter.emit(&ChannelEvent::ExecutionSuccess(envelope.data));
            }
            Ok(EnvelopeType::Progress) => {
                self.emitter.emit(&ChannelEvent::Progress(envelope.data));
            }
            Ok(EnvelopeType::ProgressState) => {
                self.emitter.emit(&ChannelEvent::ProgressState(envelope.data));
            }
            Ok(EnvelopeType::Executed) => {
                self.emitter.emit(&ChannelEvent::Executed(envelope.data));
            }
            Ok(EnvelopeType::GraphChanged) => {
                self.emitter.emit(&ChannelEvent::GraphChanged(envelope.data));
            }
            Ok(EnvelopeType::PromptQueued) => {
                self.emitter.emit(&ChannelEvent::PromptQueued(envelope.data));
            }
            Ok(EnvelopeType::Logs) => {
                self.emitter.emit(&ChannelEvent::Logs(envelope.data));
            }
            // A JSON-origin preview notification has no blob to decode, so
            // it fans out under its wire name untouched.
            Ok(EnvelopeType::BPreview) => {
                self.emitter.emit(&ChannelEvent::Custom {
                    name: envelope.kind,
                    data: envelope.data,
                });
            }
            Err(_) => self.handle_unknown(envelope.kind, envelope.data),
        }
    }

    fn handle_status(&self, data: Value) {
        match serde_json::from_value::<StatusData>(data) {
            Ok(StatusData { status, sid }) => {
                if let Some(sid) = sid {
                    self.adopt_session_id(&sid);
                }
                self.emitter.emit(&ChannelEvent::Status(status));
            }
            Err(e) => log::error!("Invalid status payload: {e:?}"),
        }
    }

    fn handle_executing(&self, data: Value) {
        if data.is_null() {
            self.emitter.emit(&ChannelEvent::Executing(None));
            return;
        }

        match serde_json::from_value::<ExecutingData>(data) {
            Ok(executing) => {
                self.emitter
                    .emit(&ChannelEvent::Executing(executing.target_node().cloned()));
            }
            Err(e) => log::error!("Invalid executing payload: {e:?}"),
        }
    }

    fn handle_feature_flags(&self, data: Value) {
        match serde_json::from_value::<FeatureFlagMap>(data) {
            Ok(flags) => self.flags.set_server(flags),
            Err(e) => log::error!("Invalid feature_flags payload: {e:?}"),
        }
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    fn handle_unknown(&self, kind: String, data: Value) {
        if self.emitter.has_listeners(&kind) {
            self.emitter.emit(&ChannelEvent::Custom { name: kind, data });
        } else {
            let mut warned = self.warned_unknown_types.write().unwrap();

            if !warned.contains(&kind) {
                log::warn!("Unknown message type {kind}");
                warned.insert(kind);
            }
        }
    }

    fn handle_binary(&self, bytes: &Bytes) {
        match frame::decode(bytes) {
            Ok(DecodedFrame::Preview(blob)) => {
                self.emitter.emit(&ChannelEvent::BPreview(blob));
            }
            Ok(DecodedFrame::ProgressText(progress)) => {
                self.emitter.emit(&ChannelEvent::ProgressText(progress));
            }
            // A preview with metadata also fans out as a bare preview so
            // listeners that ignore metadata see every frame.
            Ok(DecodedFrame::PreviewWithMetadata(preview)) => {
                let blob = preview.blob.clone();
                self.emitter
                    .emit(&ChannelEvent::BPreviewWithMetadata(preview));
                self.emitter.emit(&ChannelEvent::BPreview(blob));
            }
            Err(e) => {
                log::error!("Failed to decode {} byte binary frame: {e:?}", bytes.len());
            }
        }
    }

    fn adopt_session_id(&self, sid: &str) {
        log::debug!("adopt_session_id: sid={sid}");
        self.session.set(SessionKey::WindowClientId, sid);
        self.session.set(SessionKey::PersistentClientId, sid);
    }

    /// Degrades to polling the queue status over HTTP when the realtime
    /// transport never connected.
    fn spawn_status_poller(self: &Arc<Self>, cancellation_token: CancellationToken) {
        let context = self.clone();

        tokio::spawn(async move {
            log::info!("Polling queue status every {POLL_INTERVAL:?}");

            loop {
                #[allow(clippy::redundant_pub_crate)]
                select!(
                    () = cancellation_token.cancelled() => {
                        log::debug!("Cancelling status poller");
                        break;
                    }
                    () = sleep(POLL_INTERVAL) => {
                        // Each tick polls independently. A slow response can
                        // overlap the next tick and still emits on arrival.
                        tokio::spawn({
                            let context = context.clone();
                            async move {
                                match http::fetch_queue_status(
                                    &context.status_url,
                                    context.user.as_deref(),
                                )
                                .await
                                {
                                    Ok(status) => {
                                        context.emitter.emit(&ChannelEvent::Status(Some(status)));
                                    }
                                    Err(e) => {
                                        log::debug!("Status poll failed: {e:?}");
                                        context.emitter.emit(&ChannelEvent::Status(None));
                                    }
                                }
                            }
                        });
                    }
                );
            }
        });
    }
}

/// Persistent realtime channel with automatic reconnection.
#[derive(Debug)]
pub(crate) struct ChannelClient {
    context: Arc<ChannelContext>,
    sender: Arc<RwLock<Option<UnboundedSender<ChannelMessage>>>>,
    cancellation_token: CancellationToken,
}

impl ChannelClient {
    pub(crate) fn new(
        context: Arc<ChannelContext>,
        cancellation_token: CancellationToken,
    ) -> (Self, ChannelHandle) {
        let sender = Arc::new(RwLock::new(None));
        let handle = ChannelHandle {
            sender: sender.clone(),
            cancellation_token: cancellation_token.clone(),
        };

        (
            Self {
                context,
                sender,
                cancellation_token,
            },
            handle,
        )
    }

    /// Runs the connection loop until the cancellation token fires.
    ///
    /// Failures never propagate to the caller. A lost connection retries
    /// after [`RECONNECT_DELAY`], and a connection that never succeeded
    /// falls back to status polling instead.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub(crate) async fn start(&self) {
        let sender_arc = self.sender.clone();
        let cancellation_token = self.cancellation_token.clone();
        let context = self.context.clone();

        let mut is_reconnect = false;

        loop {
            let close_token = CancellationToken::new();

            let (txf, rxf) = futures_channel::mpsc::unbounded();

            // Queued before the sender is published so it is the first
            // frame on the wire after every handshake.
            match context.capability_announcement() {
                Ok(announcement) => {
                    if let Err(e) = txf.unbounded_send(ChannelMessage::Text(announcement)) {
                        log::error!("Failed to queue capability announcement: {e:?}");
                    }
                }
                Err(e) => {
                    log::error!("Failed to serialize capability announcement: {e:?}");
                }
            }

            sender_arc.write().unwrap().replace(txf.clone());

            let url = context.connect_url();
            log::debug!("Connecting to websocket '{url}'...");
            #[allow(clippy::redundant_pub_crate)]
            match select!(
                resp = connect_async(url) => resp,
                () = cancellation_token.cancelled() => {
                    log::debug!("Cancelling connect");
                    break;
                }
            ) {
                Ok((ws_stream, _)) => {
                    log::debug!("WebSocket handshake has been successfully completed");

                    if is_reconnect {
                        log::info!("WebSocket successfully reconnected");
                        context.emitter.emit(&ChannelEvent::Reconnected);
                    }

                    let (write, read) = ws_stream.split();

                    let ws_writer = rxf
                        .map(|message| match message {
                            ChannelMessage::Text(message) => {
                                log::trace!("Sending text packet message={message}");
                                Ok(Message::Text(message.into()))
                            }
                            ChannelMessage::Binary(bytes) => {
                                log::trace!("Sending binary packet ({} bytes)", bytes.len());
                                Ok(Message::Binary(bytes))
                            }
                            ChannelMessage::Ping => {
                                log::trace!("Sending ping");
                                Ok(Message::Ping(vec![].into()))
                            }
                        })
                        .forward(write);

                    let ws_reader = read.for_each(|m| async {
                        match m {
                            Ok(m) => context.handle_message(m),
                            Err(e) => {
                                log::error!("Read loop error: {e:?}");
                                close_token.cancel();
                            }
                        }
                    });

                    let pinger = tokio::spawn({
                        let txf = txf.clone();
                        let close_token = close_token.clone();
                        let cancellation_token = cancellation_token.clone();

                        async move {
                            loop {
                                #[allow(clippy::redundant_pub_crate)]
                                select!(
                                    () = close_token.cancelled() => { break; }
                                    () = cancellation_token.cancelled() => { break; }
                                    () = sleep(PING_INTERVAL) => {
                                        log::trace!("Sending ping to server");
                                        if let Err(e) = txf.unbounded_send(ChannelMessage::Ping) {
                                            log::error!("Pinger send error: {e:?}");
                                            close_token.cancel();
                                            break;
                                        }
                                    }
                                );
                            }
                        }
                    });

                    pin_mut!(ws_writer, ws_reader);
                    #[allow(clippy::redundant_pub_crate)]
                    select!(
                        () = close_token.cancelled() => {}
                        () = cancellation_token.cancelled() => {}
                        _ = future::select(ws_writer, ws_reader) => {}
                    );
                    if !close_token.is_cancelled() {
                        close_token.cancel();
                    }
                    log::debug!("start: Waiting for pinger to finish...");
                    if let Err(e) = pinger.await {
                        log::warn!("start: Pinger failed to finish: {e:?}");
                    }
                    log::info!("WebSocket connection closed");

                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    // A lost connection leaves the queue state unknown until
                    // the next status push.
                    context.emitter.emit(&ChannelEvent::Status(None));
                    context.emitter.emit(&ChannelEvent::Reconnecting);
                }
                Err(err) => {
                    if let Error::Http(response) = &err {
                        if let Some(body) = response
                            .body()
                            .as_ref()
                            .and_then(|x| std::str::from_utf8(x).ok())
                        {
                            log::error!("Websocket connect error ({}): {body}", response.status());
                        } else {
                            log::error!("Websocket connect error ({})", response.status());
                        }
                    } else {
                        log::error!("Failed to connect to websocket server: {err:?}");
                    }

                    if !is_reconnect {
                        log::warn!("Websocket never connected. Falling back to status polling");
                        context.spawn_status_poller(cancellation_token.clone());
                        break;
                    }
                }
            }

            #[allow(clippy::redundant_pub_crate)]
            select!(
                () = sleep(RECONNECT_DELAY) => {}
                () = cancellation_token.cancelled() => {
                    log::debug!("Cancelling retry");
                    break;
                }
            );
            is_reconnect = true;
        }

        log::debug!("Handler closed");
    }
}
