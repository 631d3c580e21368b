//! Transport configuration and connection parameters.
//!
//! This type intentionally contains no broker-specific concepts. Bus
//! connectors are responsible for interpreting the normalized server list
//! and security settings into concrete connection settings.

use std::time::Duration;

use crate::ConnectOptions;

/// Default upper bound on establishing a client connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a dialed client waits for a reply in `recv()`.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval at which a listener's accept loop re-checks for
/// shutdown while idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Transport-layer encryption settings handed to the bus connector.
///
/// Certificate handling is the bus client's business; only the
/// verification toggle is passed through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Skip certificate verification (testing only).
    pub insecure_skip_verify: bool,
}

/// Normalized transport configuration.
///
/// Usually produced by [`TransportBuilder`](crate::TransportBuilder).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    // ---
    /// Bus server addresses as supplied by the caller. Normalized per bus
    /// scheme by [`TransportConfig::connect_options`].
    pub addrs: Vec<String>,

    /// Require an encrypted bus connection.
    pub secure: bool,

    /// TLS settings. When present, the connection is secure regardless of
    /// `secure`.
    pub tls: Option<TlsConfig>,

    /// Upper bound on establishing a client connection.
    pub dial_timeout: Duration,

    /// Time a dialed client waits for the next message in `recv()`.
    pub recv_timeout: Duration,

    /// Idle poll interval of a listener's accept loop. Bounds the latency
    /// between `Listener::close()` and `accept()` returning.
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    /// - `dial_timeout`: 5s
    /// - `recv_timeout`: 10s
    /// - `poll_interval`: 60s
    fn default() -> Self {
        // ---
        Self {
            addrs: Vec::new(),
            secure: false,
            tls: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TransportConfig {
    // ---
    /// Whether connections must be encrypted.
    pub fn is_secure(&self) -> bool {
        // secure might not be set explicitly when TLS settings are supplied
        self.secure || self.tls.is_some()
    }

    /// Normalize the configured addresses for a bus `scheme`.
    ///
    /// Empty entries are dropped; entries without a `scheme://` prefix get
    /// one. When nothing remains, `default_url` is used.
    ///
    /// ```
    /// use mom_transport::TransportConfig;
    ///
    /// let config = TransportConfig {
    ///     addrs: vec!["".into(), "10.0.0.1:6379".into(), "redis://cache:6379".into()],
    ///     ..TransportConfig::default()
    /// };
    /// assert_eq!(
    ///     config.normalized_addrs("redis", "redis://127.0.0.1:6379"),
    ///     vec!["redis://10.0.0.1:6379", "redis://cache:6379"],
    /// );
    /// ```
    pub fn normalized_addrs(&self, scheme: &str, default_url: &str) -> Vec<String> {
        // ---
        let prefix = format!("{scheme}://");

        let addrs: Vec<String> = self
            .addrs
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
            .map(|addr| {
                if addr.contains("://") {
                    addr.to_string()
                } else {
                    format!("{prefix}{addr}")
                }
            })
            .collect();

        if addrs.is_empty() {
            vec![default_url.to_string()]
        } else {
            addrs
        }
    }

    /// Build the options a bus connector receives.
    pub fn connect_options(
        &self,
        scheme: &str,
        default_url: &str,
        timeout: Duration,
    ) -> ConnectOptions {
        // ---
        ConnectOptions {
            servers: self.normalized_addrs(scheme, default_url),
            secure: self.is_secure(),
            tls: self.tls.clone(),
            timeout,
        }
    }
}
