//! Shared building blocks for the ThingSpeak forwarder.
//!
//! - [`port`] - Port values, change events and bus messages
//! - [`registry`] - Last-read value lookup (`PortRegistry`, `PortTable`)
//! - [`keyexpr`] - Key expressions for port updates
//! - [`serialization`] - JSON/CBOR payload decoding
//! - [`config`] - Shared configuration sections
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod port;
pub mod registry;
pub mod serialization;
pub mod session;

pub use config::{LogFormat, LoggingConfig, ZenohConfig};
pub use error::{Error, Result};
pub use keyexpr::{PORT_KEY_PREFIX, port_id_from_key, ports_wildcard};
pub use port::{
    Attributes, NullablePortValue, PortUpdate, PortValue, ValueChangeEvent,
    current_timestamp_millis,
};
pub use registry::{PortRegistry, PortTable};
pub use serialization::{Format, decode, decode_port_update};
pub use session::connect;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Example
///
/// ```ignore
/// use thingspeak_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
