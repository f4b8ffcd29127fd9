//! Zenoh subscriber acting as the port event bus.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use zenoh::sample::SampleKind;
use thingspeak_common::config::ZenohConfig;
use thingspeak_common::keyexpr::{port_id_from_key, ports_wildcard};
use thingspeak_common::port::{PortUpdate, ValueChangeEvent, current_timestamp_millis};
use thingspeak_common::registry::PortTable;
use thingspeak_common::serialization::decode_port_update;

use crate::forwarder::ValueForwarder;
use crate::stats::ForwarderStats;
use crate::transport::UpdateTransport;

/// Feeds port updates from Zenoh into the port table and the forwarder.
pub struct PortSubscriber<T> {
    forwarder: ValueForwarder<T>,
    ports: Arc<PortTable>,
    zenoh_config: ZenohConfig,
    key_prefix: String,
}

impl<T: UpdateTransport> PortSubscriber<T> {
    pub fn new(
        forwarder: ValueForwarder<T>,
        ports: Arc<PortTable>,
        zenoh_config: ZenohConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            forwarder,
            ports,
            zenoh_config,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn forwarder(&self) -> &ValueForwarder<T> {
        &self.forwarder
    }

    /// Record an update for `port_id` and notify the forwarder.
    ///
    /// Updates for ports missing from the table are dropped.
    pub async fn apply_update(&mut self, port_id: &str, update: PortUpdate) {
        let Some(old_value) = self.ports.update(port_id, update.value.clone()) else {
            trace!(port = %port_id, "Ignoring update for undeclared port");
            return;
        };

        let event = ValueChangeEvent {
            timestamp: update.timestamp.unwrap_or_else(current_timestamp_millis),
            port_id: port_id.to_string(),
            old_value,
            new_value: update.value,
            attrs: update.attrs,
        };

        self.forwarder.on_value_change(&event).await;
    }

    /// Handle a raw bus sample.
    pub async fn handle_sample(&mut self, key: &str, kind: SampleKind, payload: &[u8]) {
        let Some(port_id) = port_id_from_key(&self.key_prefix, key) else {
            trace!(key = %key, "Ignoring key outside port prefix");
            return;
        };
        let port_id = port_id.to_string();

        let update = match kind {
            SampleKind::Delete => PortUpdate::new(None),
            _ => match decode_port_update(payload) {
                Ok(update) => update,
                Err(e) => {
                    debug!(
                        key = %key,
                        payload_len = payload.len(),
                        error = %e,
                        "Failed to decode port update"
                    );
                    return;
                }
            },
        };

        trace!(port = %port_id, value = ?update.value, "Received port update");
        self.apply_update(&port_id, update).await;
    }

    /// Run until the shutdown signal is received, returning the final stats.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<ForwarderStats> {
        let session = thingspeak_common::connect(&self.zenoh_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;

        let key_expr = ports_wildcard(&self.key_prefix);
        info!(key_expr = %key_expr, "Subscribing to port updates");
        let subscriber = session
            .declare_subscriber(&key_expr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create subscriber: {}", e))?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping subscriber");
                        break;
                    }
                }

                sample = subscriber.recv_async() => {
                    match sample {
                        Ok(sample) => {
                            let payload = sample.payload().to_bytes();
                            self.handle_sample(sample.key_expr().as_str(), sample.kind(), &payload)
                                .await;
                        }
                        Err(e) => {
                            warn!("Subscriber channel closed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        self.forwarder.shutdown().await;

        subscriber
            .undeclare()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to undeclare subscriber: {}", e))?;
        session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close session: {}", e))?;

        info!("Subscriber stopped");
        Ok(self.forwarder.stats())
    }
}
