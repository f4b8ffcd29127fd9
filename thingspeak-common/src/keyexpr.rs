//! Key expressions for port updates on the event bus.
//!
//! Port updates are published under `<prefix>/<port_id>`, where the port id
//! may itself contain `/` separators.

/// Default key expression prefix for port updates.
pub const PORT_KEY_PREFIX: &str = "qtoggle/ports";

/// Wildcard matching every port under a prefix.
///
/// # Example
/// ```
/// use thingspeak_common::keyexpr::ports_wildcard;
///
/// assert_eq!(ports_wildcard("qtoggle/ports"), "qtoggle/ports/**");
/// ```
pub fn ports_wildcard(prefix: &str) -> String {
    format!("{}/**", prefix.trim_end_matches('/'))
}

/// Extract the port id from a key expression published under `prefix`.
///
/// Returns `None` if the key is outside the prefix or names no port.
pub fn port_id_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() { None } else { Some(rest) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_trailing_slash() {
        assert_eq!(ports_wildcard("home/"), "home/**");
        assert_eq!(port_id_from_key("home/", "home/temp"), Some("temp"));
    }

    #[test]
    fn test_port_id_from_key() {
        assert_eq!(
            port_id_from_key(PORT_KEY_PREFIX, "qtoggle/ports/relay1"),
            Some("relay1")
        );
        assert_eq!(
            port_id_from_key(PORT_KEY_PREFIX, "qtoggle/ports/slave1/temp"),
            Some("slave1/temp")
        );
    }

    #[test]
    fn test_port_id_outside_prefix() {
        assert_eq!(port_id_from_key(PORT_KEY_PREFIX, "other/relay1"), None);
        assert_eq!(port_id_from_key(PORT_KEY_PREFIX, "qtoggle/ports"), None);
        assert_eq!(port_id_from_key(PORT_KEY_PREFIX, "qtoggle/ports/"), None);
        assert_eq!(port_id_from_key(PORT_KEY_PREFIX, "qtoggle/portsx/a"), None);
    }
}
