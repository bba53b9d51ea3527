/// Default key expression prefix for all PLC bridge traffic.
pub const KEY_PREFIX: &str = "plclink";

/// Builder for the key expressions of one PLC connection.
///
/// Key expressions follow the pattern:
/// `<prefix>/<connection>/signal/<signal_name>` for change events and
/// `<prefix>/<connection>/@/<channel>` for the administrative channels
/// (status, commands, replies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExprBuilder {
    prefix: String,
    connection: String,
}

impl KeyExprBuilder {
    /// Create a builder for a connection under the default prefix.
    pub fn new(connection: &str) -> Self {
        Self::with_prefix(KEY_PREFIX, connection)
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>, connection: &str) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            connection: sanitize_chunk(connection),
        }
    }

    /// Prefix in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key expression for a signal's change events.
    ///
    /// # Example
    /// ```
    /// use plclink_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("plc01");
    /// assert_eq!(builder.signal_key("temp"), "plclink/plc01/signal/temp");
    /// ```
    pub fn signal_key(&self, signal: &str) -> String {
        format!(
            "{}/{}/signal/{}",
            self.prefix,
            self.connection,
            sanitize_chunk(signal)
        )
    }

    /// Wildcard over every signal of the connection.
    ///
    /// # Example
    /// ```
    /// use plclink_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("plc01");
    /// assert_eq!(builder.signals_wildcard(), "plclink/plc01/signal/*");
    /// ```
    pub fn signals_wildcard(&self) -> String {
        format!("{}/{}/signal/*", self.prefix, self.connection)
    }

    /// Key expression for periodic status.
    pub fn status_key(&self) -> String {
        self.admin_key("status")
    }

    /// Key expression commands are received on.
    pub fn command_key(&self) -> String {
        self.admin_key("commands")
    }

    /// Key expression command replies are published on.
    pub fn reply_key(&self) -> String {
        self.admin_key("replies")
    }

    fn admin_key(&self, channel: &str) -> String {
        format!("{}/{}/@/{}", self.prefix, self.connection, channel)
    }
}

/// Key expression for the bridge-level status of a prefix.
///
/// # Example
/// ```
/// use plclink_common::keyexpr::bridge_status_key;
///
/// assert_eq!(bridge_status_key("plclink"), "plclink/@/status");
/// ```
pub fn bridge_status_key(prefix: &str) -> String {
    format!("{}/@/status", prefix.trim_end_matches('/'))
}

/// Wildcard over every change event published under a prefix.
pub fn all_signals_wildcard(prefix: &str) -> String {
    format!("{}/*/signal/*", prefix.trim_end_matches('/'))
}

/// Make an arbitrary name usable as a single key expression chunk.
///
/// Separators and the characters Zenoh reserves for wildcards and
/// selectors are replaced with `_`.
pub fn sanitize_chunk(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '*' | '$' | '?' | '#' | '@' | ' ' => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Parse a change-event key back into its connection and signal chunks.
///
/// Returns `None` if the key doesn't follow the signal key layout.
pub fn parse_signal_key<'a>(prefix: &str, key: &'a str) -> Option<ParsedSignalKey<'a>> {
    let rest = key
        .strip_prefix(prefix.trim_end_matches('/'))?
        .strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();

    match parts.as_slice() {
        [connection, "signal", signal] => Some(ParsedSignalKey { connection, signal }),
        _ => None,
    }
}

/// Components of a change-event key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignalKey<'a> {
    pub connection: &'a str,
    pub signal: &'a str,
}
