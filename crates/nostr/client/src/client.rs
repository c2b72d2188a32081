//! The relay client exposed to the host application.
//!
//! A [`RelayClient`] owns one identity, one relay connection and the subscriptions opened
//! through it. Its lifecycle is `Unconnected -> Connected -> Disconnected`; the last state is
//! terminal and every later publish/subscribe fails with a connection error.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::relay::{PublishConfirmation, RelayConnection};
use crate::subscription::{
    EventCallback, Subscription, SubscriptionHandlers, SubscriptionId, SubscriptionIdGenerator,
};
use nostr::{Event, Filter, Keys, UnsignedEvent};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connected,
    Disconnected,
}

/// Signing, publishing and subscribing against a single relay.
pub struct RelayClient {
    keys: Keys,
    connection: RelayConnection,
    state: RwLock<ClientState>,
    ids: SubscriptionIdGenerator,
    event_channel_capacity: usize,
}

impl RelayClient {
    /// Client for `relay_url` with a freshly generated identity.
    pub fn new(relay_url: &str) -> Result<Self> {
        Self::with_keys(relay_url, Keys::generate())
    }

    /// Client for `relay_url` publishing under caller-supplied keys.
    pub fn with_keys(relay_url: &str, keys: Keys) -> Result<Self> {
        Self::with_config(ClientConfig::for_relay(relay_url), keys)
    }

    pub fn with_config(config: ClientConfig, keys: Keys) -> Result<Self> {
        let event_channel_capacity = config.event_channel_capacity;
        let connection = RelayConnection::new(config)?;
        Ok(Self {
            keys,
            connection,
            state: RwLock::new(ClientState::Unconnected),
            ids: SubscriptionIdGenerator::new(),
            event_channel_capacity,
        })
    }

    pub fn relay_url(&self) -> &str {
        self.connection.url()
    }

    /// Hex public key events are published under.
    pub fn public_key(&self) -> String {
        self.keys.public_key_hex()
    }

    pub fn npub(&self) -> Result<String> {
        self.keys
            .npub()
            .map_err(|error| ClientError::Internal(error.to_string()))
    }

    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Whether the underlying WebSocket is currently open.
    pub async fn is_link_up(&self) -> bool {
        self.connection.is_up().await
    }

    /// Open the relay connection.
    ///
    /// Calling this while connected is a no-op. If the link dropped since the last call it is
    /// reopened and every open subscription is requested again.
    pub async fn connect(&self) -> Result<()> {
        let previous = self.state().await;
        let link_up = self.connection.is_up().await;
        match previous {
            ClientState::Disconnected => return Err(ClientError::Disconnected),
            ClientState::Connected if link_up => return Ok(()),
            ClientState::Connected | ClientState::Unconnected => {}
        }

        self.connection.connect().await?;

        let mut state = self.state.write().await;
        if *state == ClientState::Disconnected {
            drop(state);
            self.connection.disconnect().await;
            return Err(ClientError::Disconnected);
        }
        *state = ClientState::Connected;
        drop(state);

        if previous == ClientState::Connected {
            info!("reconnected to {}, restoring subscriptions", self.relay_url());
            self.connection.resubscribe_all().await?;
        }
        Ok(())
    }

    /// Sign a copy of `event` and submit it to the relay.
    pub async fn publish(&self, event: &UnsignedEvent) -> Result<PublishConfirmation> {
        self.ensure_connected().await?;

        let signed = event
            .sign(&self.keys)
            .map_err(|error| ClientError::Publish(format!("failed to sign event: {error}")))?;
        debug!(
            "publishing kind {} event {} to {}",
            signed.kind,
            signed.id,
            self.relay_url()
        );

        let result = self.connection.publish(&signed).await;
        self.terminal_aware(result).await
    }

    /// Subscribe with an optional per-event callback.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: Option<EventCallback>,
    ) -> Result<SubscriptionId> {
        self.subscribe_with(filters, SubscriptionHandlers::from(on_event))
            .await
    }

    /// Subscribe with event, end-of-stored-events and relay-close handlers.
    pub async fn subscribe_with(
        &self,
        filters: Vec<Filter>,
        handlers: SubscriptionHandlers,
    ) -> Result<SubscriptionId> {
        self.ensure_connected().await?;
        validate_filters(&filters)?;

        let id = self.ids.next_id();
        let subscription = Subscription::with_handlers(id.clone(), filters, handlers);
        let result = self.connection.subscribe(subscription).await;
        self.terminal_aware(result).await?;
        // A concurrent disconnect drains the registration it raced with.
        self.ensure_connected().await?;
        Ok(id)
    }

    /// Subscribe and receive matching events on a bounded channel.
    pub async fn subscribe_channel(
        &self,
        filters: Vec<Filter>,
    ) -> Result<(SubscriptionId, mpsc::Receiver<Event>)> {
        self.ensure_connected().await?;
        validate_filters(&filters)?;

        let id = self.ids.next_id();
        let (subscription, rx) =
            Subscription::with_channel(id.clone(), filters, self.event_channel_capacity);
        let result = self.connection.subscribe(subscription).await;
        self.terminal_aware(result).await?;
        self.ensure_connected().await?;
        Ok((id, rx))
    }

    /// Close one subscription. Unknown ids are ignored.
    ///
    /// No event callback starts once this returns; one already running on the reader task
    /// is allowed to finish.
    pub async fn unsubscribe(&self, id: &SubscriptionId) {
        match self.connection.unsubscribe(id.as_str()).await {
            Ok(true) => {}
            Ok(false) => debug!("unsubscribe for unknown subscription {}", id),
            Err(error) => warn!(
                "failed to send CLOSE for {} to {}: {}",
                id,
                self.relay_url(),
                error
            ),
        }
    }

    /// Close every subscription and the connection. The client cannot be reused afterwards.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ClientState::Disconnected {
                return;
            }
            *state = ClientState::Disconnected;
        }
        self.connection.disconnect().await;
    }

    pub async fn subscription_count(&self) -> usize {
        self.connection.subscription_count().await
    }

    pub async fn has_subscription(&self, id: &SubscriptionId) -> bool {
        self.connection.has_subscription(id.as_str()).await
    }

    /// Whether the relay has signalled end of stored events for `id`.
    pub async fn has_eose(&self, id: &SubscriptionId) -> bool {
        self.connection.has_eose(id.as_str()).await
    }

    async fn ensure_connected(&self) -> Result<()> {
        match self.state().await {
            ClientState::Connected => Ok(()),
            ClientState::Unconnected => Err(ClientError::NotConnected),
            ClientState::Disconnected => Err(ClientError::Disconnected),
        }
    }

    /// Report connection failures caused by a concurrent `disconnect` as `Disconnected`.
    async fn terminal_aware<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(error) if error.is_connection_error() => {
                if self.state().await == ClientState::Disconnected {
                    Err(ClientError::Disconnected)
                } else {
                    Err(error)
                }
            }
            other => other,
        }
    }
}

fn validate_filters(filters: &[Filter]) -> Result<()> {
    if filters.is_empty() {
        return Err(ClientError::Subscription(
            "at least one filter is required".to_string(),
        ));
    }
    for filter in filters {
        filter
            .validate()
            .map_err(|error| ClientError::Subscription(error.to_string()))?;
    }
    Ok(())
}
