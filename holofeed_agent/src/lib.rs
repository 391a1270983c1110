//! holofeed_agent: samples host metrics and pushes them to subscribed displays as
//! server-sent events.
//!
//! The HTTP handlers ([`acceptor`]) register subscribers in the shared
//! [`registry::ClientRegistry`]; the broadcast loop ([`broadcast`]) samples
//! ([`sampler`]) once per period and queues the event for every subscriber.

pub mod acceptor;
pub mod broadcast;
pub mod config;
pub mod cpu;
pub mod error;
pub mod logging;
pub mod probe;
pub mod rate;
pub mod registry;
pub mod sampler;
pub mod sensors;
pub mod server;
pub mod types;

pub use config::AgentConfig;
pub use error::{ConfigError, ServerError};
pub use sampler::{MetricSampler, SnapshotSource};
pub use server::Server;
pub use types::MetricSnapshot;
