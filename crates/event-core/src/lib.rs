//! # Event-Core - The statsbridge pipeline
//!
//! Receives gateway lifecycle events, classifies and correlates them,
//! and forwards the interesting subset to a call-analytics backend:
//!
//! ```text
//! producer -> IngressQueue -> Dispatcher -> handlers
//!                                   |          |
//!                                   |          +-> CorrelationStore
//!                                   |          +-> AuthClient (tokens)
//!                                   |          +-> DeliveryClient (HTTPS)
//!                                   +-> LivenessMonitor (one task per join)
//! ```
//!
//! The producer calls [`EventBridge::submit`] and is never blocked; a
//! single consumer drains the queue in arrival order. Per-event failures
//! are logged at the handler boundary and never stop the pipeline.

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod liveness;
pub mod logging;
pub mod queue;
pub mod store;

pub use bridge::EventBridge;
pub use config::{BridgeConfig, EventMask};
pub use delivery::{DeliveryClient, DeliveryConfig};
pub use dispatch::{Dispatcher, DispatcherState, EventHandler};
pub use errors::{BridgeError, Result};
pub use events::{Event, EventType, OpaqueIdentity};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use queue::{IngressQueue, QueueConsumer, QueueItem};
pub use store::{CorrelationStore, ParticipantKey, ParticipantRecord};
