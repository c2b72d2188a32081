//! Single-relay Nostr client.
//!
//! This crate intentionally exposes a small surface:
//! - `RelayClient`: connect, publish, subscribe, unsubscribe, disconnect
//! - `RelayConnection`: the WebSocket transport and relay frame routing underneath it
//! - `ClientConfig`: relay URL, acknowledgement policy and optional timeouts

pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod subscription;

pub use client::{ClientState, RelayClient};
pub use config::{AckMode, ClientConfig, ConfigError};
pub use error::{ClientError, ErrorKind, Result};
pub use relay::{LinkState, PublishConfirmation, RelayConnection, RelayMessage, parse_relay_message};
pub use subscription::{
    ClosedCallback, EoseCallback, EventCallback, Subscription, SubscriptionHandlers,
    SubscriptionId,
};
