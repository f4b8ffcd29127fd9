//! Channel writer: turns field values into update requests.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::payload::{FieldValues, build_update_body, describe_fields, format_created_at};
use crate::transport::{SendError, UpdateTransport};

/// Writes field values to a single ThingSpeak channel.
pub struct ThingSpeakClient<T> {
    api_key: String,
    transport: T,
}

impl<T: UpdateTransport> ThingSpeakClient<T> {
    pub fn new(api_key: impl Into<String>, transport: T) -> Self {
        Self {
            api_key: api_key.into(),
            transport,
        }
    }

    /// Send one batch of field values stamped with `created_at`.
    ///
    /// An empty batch is rejected before any request is made.
    pub async fn send_values(
        &self,
        values: &FieldValues,
        created_at: DateTime<Utc>,
    ) -> Result<(), SendError> {
        if values.is_empty() {
            return Err(SendError::EmptyValues);
        }

        let body = build_update_body(&self.api_key, values, &created_at);
        self.transport.post_update(&body).await?;

        debug!(
            "sent {} at {}",
            describe_fields(values),
            format_created_at(&created_at)
        );
        Ok(())
    }
}
