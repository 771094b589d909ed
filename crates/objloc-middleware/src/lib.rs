//! `objloc-middleware` – message plumbing for the localization node.
//!
//! Routes sensor input and localization output between components without
//! caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`inbound`] – Bounded, ordered queue feeding sensor input to the node.
//! - [`source`] – The [`SensorSource`] adapter trait and the NDJSON
//!   [`ReplaySource`] used to feed recorded sensor traffic to the node.

pub mod bus;
pub mod inbound;
pub mod source;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use inbound::{DEFAULT_INBOUND_CAPACITY, InboundReceiver, InboundSender, inbound_channel};
pub use source::{ReplaySource, SensorSource, StdinSource};
