//! ThingSpeak forwarder for home-automation port values.
//!
//! This crate forwards value changes of selected ports to a ThingSpeak
//! channel through its `update.json` API, mapping each port to a channel
//! field.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Zenoh Network  │────>│ ValueForwarder  │────>│   ThingSpeak    │
//! │ (qtoggle/ports) │     │ (cache/policy)  │     │  update.json    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Sending Modes
//!
//! - **min_period**: values are sent as they change, at most once per
//!   `min_period` seconds; changes in between are batched.
//! - **period**: the last-read value of every configured port is sent every
//!   `period` seconds, regardless of changes.
//!
//! # Usage
//!
//! ```bash
//! thingspeak-forwarder --config thingspeak.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ForwarderConfig`] for configuration options.

pub mod client;
pub mod config;
pub mod forwarder;
pub mod payload;
pub mod stats;
pub mod subscriber;
pub mod transport;

pub use client::ThingSpeakClient;
pub use config::{ForwarderConfig, SendMode, ThingSpeakConfig};
pub use forwarder::ValueForwarder;
pub use stats::ForwarderStats;
pub use subscriber::PortSubscriber;
pub use transport::{HttpTransport, SendError, UpdateTransport};
