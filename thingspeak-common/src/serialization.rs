use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::port::PortUpdate;

/// Wire encoding of port updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,

    /// Compact binary encoding.
    Cbor,
}

impl Format {
    /// Guess the encoding of a payload from its first byte.
    ///
    /// JSON objects, arrays and scalars are recognised; anything else is
    /// assumed to be CBOR. Several CBOR items also start with these bytes,
    /// so the guess can be wrong.
    pub fn detect(data: &[u8]) -> Format {
        match data.iter().copied().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{' | b'[' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n') => Format::Json,
            _ => Format::Cbor,
        }
    }

    fn other(self) -> Format {
        match self {
            Format::Json => Format::Cbor,
            Format::Cbor => Format::Json,
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Decode a port update payload.
///
/// Publishers may send either a full [`PortUpdate`] object or a bare value
/// (`21.5`, `true`, `"open"`, `null`), which is wrapped into an update
/// without timestamp. The detected format is tried first, then the other
/// one; the error of the detected format is returned if both fail.
pub fn decode_port_update(data: &[u8]) -> Result<PortUpdate> {
    let format = Format::detect(data);
    decode_port_update_as(data, format)
        .or_else(|e| decode_port_update_as(data, format.other()).map_err(|_| e))
}

fn decode_port_update_as(data: &[u8], format: Format) -> Result<PortUpdate> {
    if let Ok(update) = decode::<PortUpdate>(data, format) {
        return Ok(update);
    }
    decode(data, format).map(PortUpdate::new)
}
