//! # Shared Bus - Transport Session
//!
//! Wraps a publish/subscribe broker connection for the rest of the runtime.
//!
//! ## Layers
//!
//! ```text
//! ┌────────────────────┐  subscribe_messages()  ┌──────────────────┐
//! │  Correlator /      │ ◄───────────────────── │ TransportSession │
//! │  Lifecycle / ...   │ ─────────────────────► │  (dispatch task) │
//! └────────────────────┘  publish / subscribe   └────────┬─────────┘
//!                                                        │ BrokerLink
//!                                               ┌────────▼─────────┐
//!                                               │  broker (MQTT or │
//!                                               │  InMemoryBroker) │
//!                                               └──────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - `connect`, `subscribe` and `publish` resolve only once the broker has
//!   acknowledged them (ConnAck / SubAck / PubAck).
//! - Every inbound message fans out to every live [`MessageSubscription`],
//!   including messages the session published to a topic it subscribes to.
//! - A last will must be registered before `connect`.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod error;
pub mod filter;
pub mod link;
pub mod message;
pub mod session;
pub mod subscriber;

// Re-export main types
pub use broker::{InMemoryBroker, LoopbackLink};
pub use error::{TransportError, TransportResult};
pub use filter::{FilterError, TopicFilter};
pub use link::{
    BrokerLink, ConnectOptions, ConnectReturnCode, LinkError, LinkEvent, LinkFactory, PacketId,
};
pub use message::{InboundMessage, LastWill, OutboundMessage, QoS};
pub use session::{ConnectionState, SessionConfig, TransportSession};
pub use subscriber::{MessageSubscription, SubscriptionError};

/// Inbound messages buffered per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Keep-alive interval requested from the broker.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
