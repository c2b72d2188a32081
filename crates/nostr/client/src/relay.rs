//! Single relay connection management.

use crate::config::{AckMode, ClientConfig};
use crate::error::{ClientError, Result};
use crate::subscription::{Subscription, SubscriptionRegistry};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostr::Event;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type PendingAcks = HashMap<String, oneshot::Sender<(bool, String)>>;

/// State of the underlying WebSocket link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

/// Relay message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Closed(String, String),
    Notice(String),
    Auth(String),
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub relay_url: String,
    /// The signed event that was submitted.
    pub event: Event,
    pub accepted: bool,
    pub message: String,
}

impl PublishConfirmation {
    pub fn event_id(&self) -> &str {
        &self.event.id
    }
}

/// Relay connection.
pub struct RelayConnection {
    url: Url,
    config: ClientConfig,
    link: Arc<RwLock<LinkState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    pending_acks: Arc<Mutex<PendingAcks>>,
    recv_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Shared handles the background reader routes frames into.
struct ReaderContext {
    relay_url: String,
    verify_incoming: bool,
    link: Arc<RwLock<LinkState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: Arc<Mutex<SubscriptionRegistry>>,
    pending_acks: Arc<Mutex<PendingAcks>>,
}

impl RelayConnection {
    /// Create a relay connection for `config.relay_url`. Nothing is opened yet.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let parsed_url = Url::parse(&config.relay_url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            url: parsed_url,
            config,
            link: Arc::new(RwLock::new(LinkState::Down)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(SubscriptionRegistry::default())),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current link state.
    pub async fn link_state(&self) -> LinkState {
        *self.link.read().await
    }

    pub async fn is_up(&self) -> bool {
        self.link_state().await == LinkState::Up
    }

    /// Open the WebSocket and start the background receive loop. No-op when already up.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut link = self.link.write().await;
            match *link {
                LinkState::Up => return Ok(()),
                LinkState::Connecting => {
                    return Err(ClientError::Connection(format!(
                        "connection to {} already in progress",
                        self.url
                    )));
                }
                LinkState::Down => *link = LinkState::Connecting,
            }
        }

        let stream = match self.open_stream().await {
            Ok(stream) => stream,
            Err(error) => {
                *self.link.write().await = LinkState::Down;
                return Err(error);
            }
        };

        if let Some(stale) = self.recv_task.lock().await.take() {
            stale.abort();
        }

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.link.write().await = LinkState::Up;

        let context = ReaderContext {
            relay_url: self.url.to_string(),
            verify_incoming: self.config.verify_incoming,
            link: Arc::clone(&self.link),
            writer: Arc::clone(&self.writer),
            subscriptions: Arc::clone(&self.subscriptions),
            pending_acks: Arc::clone(&self.pending_acks),
        };
        let task = tokio::spawn(read_frames(reader, context));
        *self.recv_task.lock().await = Some(task);

        info!("connected to relay {}", self.url);
        Ok(())
    }

    async fn open_stream(&self) -> Result<WsStream> {
        if self.url.scheme() == "wss" {
            // Ignore the error: another component may have installed a provider already.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let handshake = connect_async(self.url.as_str());
        let result = match self.config.connect_timeout {
            Some(limit) => timeout(limit, handshake)
                .await
                .map_err(|_| ClientError::ConnectTimeout(limit))?,
            None => handshake.await,
        };

        let (stream, _response) = result.map_err(|error| {
            ClientError::Connection(format!("failed to connect to {}: {}", self.url, error))
        })?;
        Ok(stream)
    }

    /// Tear the link down: close every subscription, fail pending publishes, stop the reader.
    ///
    /// The link goes `Down` and the writer is taken first, so a publish or subscribe racing
    /// with this call either lands before the drain below or fails on send.
    pub async fn disconnect(&self) {
        let mut writer = {
            let mut writer = self.writer.lock().await;
            *self.link.write().await = LinkState::Down;
            writer.take()
        };

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }

        let closing = self.subscriptions.lock().await.drain();
        for subscription in closing {
            subscription.deactivate();
            let Some(sink) = writer.as_mut() else {
                continue;
            };
            let frame = json!(["CLOSE", subscription.id.as_str()]).to_string();
            if let Err(error) = sink.send(Message::Text(frame.into())).await {
                debug!(
                    "failed to send CLOSE for {} on {}: {}",
                    subscription.id, self.url, error
                );
            }
        }

        fail_pending_acks(&self.pending_acks).await;

        if let Some(mut sink) = writer
            && let Err(error) = sink.send(Message::Close(None)).await
        {
            debug!("close frame to {} failed: {}", self.url, error);
        }

        info!("disconnected from relay {}", self.url);
    }

    /// Submit an event and, depending on [`AckMode`], wait for the relay's `OK`.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let ack_rx = match self.config.ack_mode {
            AckMode::WaitForOk => {
                let (tx, rx) = oneshot::channel();
                self.pending_acks.lock().await.insert(event.id.clone(), tx);
                Some(rx)
            }
            AckMode::SendOnly => None,
        };

        if let Err(error) = self.send_json(&json!(["EVENT", event])).await {
            self.pending_acks.lock().await.remove(&event.id);
            return Err(match error {
                ClientError::NotConnected => ClientError::NotConnected,
                other => ClientError::Publish(format!(
                    "failed to submit event {} to {}: {}",
                    event.id, self.url, other
                )),
            });
        }

        let Some(ack_rx) = ack_rx else {
            return Ok(PublishConfirmation {
                relay_url: self.url.to_string(),
                event: event.clone(),
                accepted: true,
                message: "sent".to_string(),
            });
        };

        let closed = || {
            ClientError::Connection(format!(
                "connection to {} closed before OK for event {}",
                self.url, event.id
            ))
        };
        let (accepted, message) = match self.config.ack_timeout {
            Some(limit) => match timeout(limit, ack_rx).await {
                Ok(outcome) => outcome.map_err(|_| closed())?,
                Err(_) => {
                    self.pending_acks.lock().await.remove(&event.id);
                    return Err(ClientError::AckTimeout(event.id.clone()));
                }
            },
            None => ack_rx.await.map_err(|_| closed())?,
        };

        if !accepted {
            return Err(ClientError::Rejected {
                event_id: event.id.clone(),
                message,
            });
        }

        debug!("relay {} accepted event {}", self.url, event.id);
        Ok(PublishConfirmation {
            relay_url: self.url.to_string(),
            event: event.clone(),
            accepted,
            message,
        })
    }

    /// Register and send subscription request. The registration happens first so events
    /// arriving right after the `REQ` are never dropped.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        let frame = subscription.request_frame()?;
        let id = subscription.id.clone();
        self.subscriptions.lock().await.insert(subscription);

        if let Err(error) = self.send_json(&frame).await {
            if let Some(removed) = self.subscriptions.lock().await.remove(id.as_str()) {
                removed.deactivate();
            }
            return Err(error);
        }
        debug!("opened subscription {} on {}", id, self.url);
        Ok(())
    }

    /// Re-send `REQ` for every open subscription, used after the link came back.
    /// The relay replays stored events, so each subscription waits for a fresh EOSE.
    pub async fn resubscribe_all(&self) -> Result<()> {
        let open = self.subscriptions.lock().await.snapshot();
        for subscription in open {
            subscription.reset_eose();
            self.send_json(&subscription.request_frame()?).await?;
        }
        Ok(())
    }

    /// Forget a subscription locally and close it on the relay. Returns false for unknown ids.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<bool> {
        let Some(subscription) = self.subscriptions.lock().await.remove(subscription_id) else {
            return Ok(false);
        };
        subscription.deactivate();

        if self.is_up().await {
            self.send_json(&json!(["CLOSE", subscription_id])).await?;
        }
        debug!("closed subscription {} on {}", subscription_id, self.url);
        Ok(true)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn has_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().await.contains(subscription_id)
    }

    pub async fn has_eose(&self, subscription_id: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .get(subscription_id)
            .is_some_and(|subscription| subscription.has_eose())
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        if !self.is_up().await {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send(Message::Text(text.into())).await.map_err(|error| {
            ClientError::Connection(format!("websocket write to {} failed: {}", self.url, error))
        })
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut task) = self.recv_task.try_lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }
    }
}

async fn fail_pending_acks(pending_acks: &Mutex<PendingAcks>) {
    // Dropping the senders wakes every waiting publish with a closed-channel error.
    pending_acks.lock().await.clear();
}

async fn read_frames(mut reader: WsReader, context: ReaderContext) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                Ok(Some(message)) => route_message(&context, message).await,
                Ok(None) => {}
                Err(error) => {
                    warn!("protocol parse error on {}: {}", context.relay_url, error);
                }
            },
            Ok(Message::Ping(payload)) => {
                debug!(
                    "received ping from {} ({} bytes)",
                    context.relay_url,
                    payload.len()
                );
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {}
            Ok(Message::Frame(_)) => {}
            Err(error) => {
                warn!("websocket read error on {}: {}", context.relay_url, error);
                break;
            }
        }
    }

    // Acks fail only after the link reads Down.
    let mut writer = context.writer.lock().await;
    let mut link = context.link.write().await;
    *link = LinkState::Down;
    writer.take();
    fail_pending_acks(&context.pending_acks).await;
    drop(link);
    drop(writer);
    warn!("connection to {} closed", context.relay_url);
}

async fn route_message(context: &ReaderContext, message: RelayMessage) {
    match message {
        RelayMessage::Event(subscription_id, event) => {
            if context.verify_incoming
                && let Err(error) = event.verify()
            {
                warn!(
                    "dropping unverifiable event {} on {} ({}): {}",
                    event.id, context.relay_url, subscription_id, error
                );
                return;
            }
            let subscription = { context.subscriptions.lock().await.get(&subscription_id) };
            match subscription {
                Some(subscription) => {
                    if let Err(error) = subscription.handle_event(event) {
                        warn!(
                            "subscription callback error on {}: {}",
                            context.relay_url, error
                        );
                    }
                }
                None => debug!(
                    "event for unknown subscription {} on {}",
                    subscription_id, context.relay_url
                ),
            }
        }
        RelayMessage::Ok(event_id, accepted, message) => {
            let waiter = context.pending_acks.lock().await.remove(&event_id);
            match waiter {
                Some(waiter) => {
                    // The publisher may have timed out and gone away.
                    let _ = waiter.send((accepted, message));
                }
                None => debug!("unsolicited OK for {} on {}", event_id, context.relay_url),
            }
        }
        RelayMessage::Eose(subscription_id) => {
            let subscription = { context.subscriptions.lock().await.get(&subscription_id) };
            if let Some(subscription) = subscription {
                debug!(
                    "end of stored events for {} on {}",
                    subscription_id, context.relay_url
                );
                subscription.mark_eose();
            }
        }
        RelayMessage::Closed(subscription_id, message) => {
            let removed = { context.subscriptions.lock().await.remove(&subscription_id) };
            if let Some(subscription) = removed {
                warn!(
                    "relay {} closed subscription {}: {}",
                    context.relay_url, subscription_id, message
                );
                subscription.handle_closed(&message);
            }
        }
        RelayMessage::Notice(message) => {
            info!("notice from {}: {}", context.relay_url, message);
        }
        RelayMessage::Auth(challenge) => {
            debug!(
                "ignoring AUTH challenge from {} ({} bytes)",
                context.relay_url,
                challenge.len()
            );
        }
    }
}

fn string_field(array: &[Value], index: usize, what: &str) -> Result<String> {
    array[index]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ClientError::Protocol(format!("invalid {what}")))
}

/// Parse relay protocol JSON text message into typed relay message.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    if array.is_empty() {
        return Ok(None);
    }

    let kind = array[0]
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    match kind {
        "EVENT" => {
            if array.len() < 3 {
                return Err(ClientError::Protocol("invalid EVENT message".to_string()));
            }
            let subscription_id = string_field(array, 1, "EVENT subscription id")?;
            let event: Event = serde_json::from_value(array[2].clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {}", error))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            if array.len() < 4 {
                return Err(ClientError::Protocol("invalid OK message".to_string()));
            }
            let event_id = string_field(array, 1, "OK event id")?;
            let accepted = array[2]
                .as_bool()
                .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
            let message = string_field(array, 3, "OK message text")?;
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid EOSE message".to_string()));
            }
            let subscription_id = string_field(array, 1, "EOSE subscription id")?;
            Ok(Some(RelayMessage::Eose(subscription_id)))
        }
        "CLOSED" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid CLOSED message".to_string()));
            }
            let subscription_id = string_field(array, 1, "CLOSED subscription id")?;
            let message = match array.get(2) {
                Some(_) => string_field(array, 2, "CLOSED message text")?,
                None => String::new(),
            };
            Ok(Some(RelayMessage::Closed(subscription_id, message)))
        }
        "NOTICE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid NOTICE message".to_string()));
            }
            let message = string_field(array, 1, "NOTICE message text")?;
            Ok(Some(RelayMessage::Notice(message)))
        }
        "AUTH" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid AUTH message".to_string()));
            }
            let challenge = string_field(array, 1, "AUTH challenge")?;
            Ok(Some(RelayMessage::Auth(challenge)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn parse_known_message_kinds() -> Result<()> {
        let event = serde_json::to_string(&json!(["EVENT", "sub", sample_event()]))?;
        match parse_relay_message(&event)? {
            Some(RelayMessage::Event(subscription_id, parsed)) => {
                assert_eq!(subscription_id, "sub");
                assert_eq!(parsed, sample_event());
            }
            other => return Err(ClientError::Internal(format!("unexpected {other:?}"))),
        }

        assert!(matches!(
            parse_relay_message(r#"["OK","event-id",false,"blocked: spam"]"#)?,
            Some(RelayMessage::Ok(id, false, message)) if id == "event-id" && message == "blocked: spam"
        ));
        assert!(matches!(
            parse_relay_message(r#"["EOSE","sub"]"#)?,
            Some(RelayMessage::Eose(id)) if id == "sub"
        ));
        assert!(matches!(
            parse_relay_message(r#"["CLOSED","sub","error: shutting down"]"#)?,
            Some(RelayMessage::Closed(id, message)) if id == "sub" && message == "error: shutting down"
        ));
        assert!(matches!(
            parse_relay_message(r#"["CLOSED","sub"]"#)?,
            Some(RelayMessage::Closed(_, message)) if message.is_empty()
        ));
        assert!(matches!(
            parse_relay_message(r#"["NOTICE","maintenance"]"#)?,
            Some(RelayMessage::Notice(message)) if message == "maintenance"
        ));
        assert!(matches!(
            parse_relay_message(r#"["AUTH","challenge-token"]"#)?,
            Some(RelayMessage::Auth(challenge)) if challenge == "challenge-token"
        ));
        Ok(())
    }

    #[test]
    fn parse_unknown_message_kind_returns_none() -> Result<()> {
        assert!(parse_relay_message(r#"["UNKNOWN","data"]"#)?.is_none());
        assert!(parse_relay_message("[]")?.is_none());
        Ok(())
    }

    #[test]
    fn parse_malformed_messages() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "non-array payload",
                input: r#"{"kind":"EVENT"}"#,
                expected_error_fragment: "expected JSON array relay message",
            },
            Case {
                name: "kind is not string",
                input: "[123]",
                expected_error_fragment: "missing relay message kind",
            },
            Case {
                name: "event too short",
                input: r#"["EVENT","sub"]"#,
                expected_error_fragment: "invalid EVENT message",
            },
            Case {
                name: "event payload shape",
                input: r#"["EVENT","sub",{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT payload",
            },
            Case {
                name: "event subscription id type",
                input: r#"["EVENT",123,{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT subscription id",
            },
            Case {
                name: "ok too short",
                input: r#"["OK","event-id",true]"#,
                expected_error_fragment: "invalid OK message",
            },
            Case {
                name: "ok accepted type",
                input: r#"["OK","event-id","yes","accepted"]"#,
                expected_error_fragment: "invalid OK accepted flag",
            },
            Case {
                name: "eose subscription id type",
                input: r#"["EOSE",42]"#,
                expected_error_fragment: "invalid EOSE subscription id",
            },
            Case {
                name: "closed too short",
                input: r#"["CLOSED"]"#,
                expected_error_fragment: "invalid CLOSED message",
            },
            Case {
                name: "closed message type",
                input: r#"["CLOSED","sub",7]"#,
                expected_error_fragment: "invalid CLOSED message text",
            },
            Case {
                name: "notice text type",
                input: r#"["NOTICE",{"text":"msg"}]"#,
                expected_error_fragment: "invalid NOTICE message text",
            },
        ];

        for case in cases {
            let result = parse_relay_message(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);

            if let Err(error) = result {
                let rendered = error.to_string();
                assert!(
                    rendered.contains(case.expected_error_fragment),
                    "{}: expected error fragment '{}' in '{}'",
                    case.name,
                    case.expected_error_fragment,
                    rendered
                );
            }
        }
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let result = RelayConnection::new(ClientConfig::for_relay("https://relay.example"));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));

        let result = RelayConnection::new(ClientConfig::for_relay("not a url"));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn operations_before_connect_report_not_connected() -> Result<()> {
        let connection = RelayConnection::new(ClientConfig::for_relay("ws://127.0.0.1:9"))?;
        assert_eq!(connection.link_state().await, LinkState::Down);

        let published = connection.publish(&sample_event()).await;
        assert!(matches!(published, Err(ClientError::NotConnected)));
        assert!(!connection.unsubscribe("missing").await?);
        Ok(())
    }
}
