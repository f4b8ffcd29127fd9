//! Value forwarding policy.
//!
//! A [`ValueForwarder`] works in one of two modes, fixed at construction:
//!
//! - **Rate limited** (`min_period`): every tracked value change is cached;
//!   the whole cache is sent once at least `min_period` has elapsed since the
//!   previous send, then cleared whether or not the send succeeded.
//! - **Periodic** (`period`): a background task polls the last-read value of
//!   every tracked port and sends the snapshot every `period`. Change events
//!   are ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use thingspeak_common::port::ValueChangeEvent;
use thingspeak_common::registry::PortRegistry;

use crate::client::ThingSpeakClient;
use crate::config::{ConfigError, FieldMapping, SendMode, ThingSpeakConfig};
use crate::payload::{FieldValues, MAX_FIELDS, created_at_from_millis};
use crate::stats::{ForwarderStats, SharedStats, StatsRecorder};
use crate::transport::UpdateTransport;

/// Forwards tracked port values to a ThingSpeak channel.
pub struct ValueForwarder<T> {
    fields: Arc<FieldMapping>,
    mode: SendMode,
    client: Arc<ThingSpeakClient<T>>,
    cache: FieldValues,
    last_send: Instant,
    periodic: Option<PeriodicTask>,
    stats: SharedStats,
}

struct PeriodicTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<T: UpdateTransport> ValueForwarder<T> {
    /// Create a forwarder.
    ///
    /// Fails unless exactly one of `period` and `min_period` is configured.
    /// In periodic mode the polling task is spawned immediately, so this must
    /// be called from within a Tokio runtime.
    pub fn new(
        config: &ThingSpeakConfig,
        transport: T,
        registry: Arc<dyn PortRegistry>,
    ) -> Result<Self, ConfigError> {
        let mode = config.send_mode()?;

        for (port_id, field_no) in &config.fields {
            if !(1..=MAX_FIELDS).contains(field_no) {
                warn!(
                    port = %port_id,
                    field = field_no,
                    "Field number outside 1..{}, ThingSpeak will ignore it", MAX_FIELDS
                );
            }
        }

        let fields = Arc::new(config.fields.clone());
        let client = Arc::new(ThingSpeakClient::new(config.api_key.clone(), transport));
        let stats: SharedStats = Arc::new(StatsRecorder::default());

        let periodic = match mode {
            SendMode::Periodic { period } => {
                let (shutdown, shutdown_rx) = watch::channel(false);
                let sender = PeriodicSender {
                    fields: fields.clone(),
                    registry,
                    client: client.clone(),
                    period,
                    stats: stats.clone(),
                };
                let handle = tokio::spawn(sender.run(shutdown_rx));
                Some(PeriodicTask { shutdown, handle })
            }
            SendMode::RateLimited { .. } => None,
        };

        info!(
            mode = ?mode,
            fields = fields.len(),
            "ThingSpeak forwarder created"
        );

        Ok(Self {
            fields,
            mode,
            client,
            cache: FieldValues::new(),
            last_send: Instant::now(),
            periodic,
            stats,
        })
    }

    /// Handle a port value change.
    ///
    /// Never fails: send errors are logged and the pending batch is dropped.
    pub async fn on_value_change(&mut self, event: &ValueChangeEvent) {
        self.stats.update(|s| s.events_received += 1);

        let SendMode::RateLimited { min_period } = self.mode else {
            // The periodic task owns sending.
            self.stats.update(|s| s.events_ignored += 1);
            return;
        };

        let Some(&field_no) = self.fields.get(&event.port_id) else {
            trace!(port = %event.port_id, "Port not tracked");
            self.stats.update(|s| s.events_ignored += 1);
            return;
        };

        self.cache.insert(field_no, event.new_value.clone());

        let now = Instant::now();
        if now.duration_since(self.last_send) < min_period {
            trace!(
                port = %event.port_id,
                field = field_no,
                pending = self.cache.len(),
                "Rate limited, value cached"
            );
            self.stats.update(|s| s.events_rate_limited += 1);
            return;
        }

        self.last_send = now;
        let created_at = created_at_from_millis(event.timestamp).unwrap_or_else(|| {
            warn!(
                timestamp = event.timestamp,
                "Event timestamp out of range, using current time"
            );
            Utc::now()
        });

        let values = std::mem::take(&mut self.cache);
        match self.client.send_values(&values, created_at).await {
            Ok(()) => self.stats.update(|s| s.sends_succeeded += 1),
            Err(e) => {
                error!(error = %e, dropped = values.len(), "Sending values failed");
                self.stats.update(|s| {
                    s.sends_failed += 1;
                    s.values_dropped += values.len() as u64;
                });
            }
        }
    }

    /// Values cached since the last send.
    pub fn cached_values(&self) -> &FieldValues {
        &self.cache
    }

    pub fn mode(&self) -> SendMode {
        self.mode
    }

    pub fn stats(&self) -> ForwarderStats {
        self.stats.snapshot()
    }

    /// Stop the periodic task, if any, and wait for it to exit.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.periodic.take() else {
            return;
        };

        // The task exits on its own if the receiver is already gone.
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            error!(error = %e, "Periodic send task failed");
        }
    }
}

impl<T> Drop for ValueForwarder<T> {
    fn drop(&mut self) {
        if let Some(task) = self.periodic.take() {
            task.handle.abort();
        }
    }
}

/// Background loop of the periodic mode.
struct PeriodicSender<T> {
    fields: Arc<FieldMapping>,
    registry: Arc<dyn PortRegistry>,
    client: Arc<ThingSpeakClient<T>>,
    period: Duration,
    stats: SharedStats,
}

impl<T: UpdateTransport> PeriodicSender<T> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(period_secs = self.period.as_secs(), "Periodic send loop started");

        loop {
            let values = self.collect_values();

            if values.is_empty() {
                debug!("not sending empty values");
            } else {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    result = self.client.send_values(&values, Utc::now()) => match result {
                        Ok(()) => self.stats.update(|s| s.sends_succeeded += 1),
                        Err(e) => {
                            error!(error = %e, "Sending values failed");
                            self.stats.update(|s| {
                                s.sends_failed += 1;
                                s.values_dropped += values.len() as u64;
                            });
                        }
                    },
                }
            }

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.period) => {}
            }
        }

        debug!("periodic send values loop cancelled");
    }

    /// Snapshot of the tracked ports that currently have a value.
    fn collect_values(&self) -> FieldValues {
        let mut values = FieldValues::new();

        for (port_id, &field_no) in self.fields.iter() {
            match self.registry.last_read_value(port_id) {
                Some(Some(value)) => {
                    values.insert(field_no, Some(value));
                }
                Some(None) => trace!(port = %port_id, "Port has no value"),
                None => trace!(port = %port_id, "Port unknown to registry"),
            }
        }

        values
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
