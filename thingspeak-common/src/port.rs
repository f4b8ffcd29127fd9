use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Free-form attributes delivered alongside a value change.
///
/// The forwarder never inspects them; they travel with the event so that
/// other consumers on the same bus can.
pub type Attributes = HashMap<String, serde_json::Value>;

/// A port value that may be absent (port never read, or explicitly null).
pub type NullablePortValue = Option<PortValue>;

/// Value carried by a host port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    /// Boolean port (on/off, open/closed).
    Boolean(bool),

    /// Numeric port (temperature, counter, level).
    Number(f64),

    /// Text value.
    Text(String),
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Boolean(v) => write!(f, "{}", v),
            PortValue::Number(v) => write!(f, "{}", v),
            PortValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for PortValue {
    fn from(v: bool) -> Self {
        PortValue::Boolean(v)
    }
}

impl From<f64> for PortValue {
    fn from(v: f64) -> Self {
        PortValue::Number(v)
    }
}

impl From<i64> for PortValue {
    fn from(v: i64) -> Self {
        PortValue::Number(v as f64)
    }
}

impl From<String> for PortValue {
    fn from(v: String) -> Self {
        PortValue::Text(v)
    }
}

impl From<&str> for PortValue {
    fn from(v: &str) -> Self {
        PortValue::Text(v.to_string())
    }
}

/// Render a nullable value for log output.
pub fn display_nullable(value: &NullablePortValue) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

/// Notification that a port's value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChangeEvent {
    /// Unix epoch milliseconds at which the change was observed.
    pub timestamp: i64,

    /// Identifier of the port that changed.
    pub port_id: String,

    /// Value before the change.
    pub old_value: NullablePortValue,

    /// Value after the change.
    pub new_value: NullablePortValue,

    /// Opaque attributes delivered with the event.
    pub attrs: Attributes,
}

impl ValueChangeEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        port_id: impl Into<String>,
        old_value: NullablePortValue,
        new_value: NullablePortValue,
    ) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            port_id: port_id.into(),
            old_value,
            new_value,
            attrs: Attributes::new(),
        }
    }

    /// Override the event timestamp (Unix epoch milliseconds).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach an attribute to the event.
    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }
}

/// Message published on the event bus when a port gets a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortUpdate {
    /// Unix epoch milliseconds; receivers stamp the update themselves when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// The new value (`null` when the port became unavailable).
    ///
    /// Required; a null update must say so explicitly.
    #[serde(deserialize_with = "deserialize_required")]
    pub value: NullablePortValue,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attrs: Attributes,
}

impl PortUpdate {
    pub fn new(value: NullablePortValue) -> Self {
        Self {
            timestamp: None,
            value,
            attrs: Attributes::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

fn deserialize_required<'de, D>(deserializer: D) -> Result<NullablePortValue, D::Error>
where
    D: Deserializer<'de>,
{
    NullablePortValue::deserialize(deserializer)
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
