//! Protocol constants and wire types.
//!
//! [`Options`] is the one-shot handshake frame a client sends after the
//! transport connects; it is always encoded as JSON so both sides can decode
//! it before a codec has been agreed on. [`Header`] precedes every request
//! and response body on the wire and is encoded with the negotiated codec.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies a well-formed GeeRPC connection; anything else is rejected
/// during the handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default path the RPC endpoint is mounted on in HTTP mode.
pub const DEFAULT_RPC_PATH: &str = "/_geeprc_";

/// Default path of the HTML debug listing in HTTP mode.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/geerpc";

/// Default path of the registry endpoint.
pub const DEFAULT_REGISTRY_PATH: &str = "/_geerpc_/registry";

/// Status a server answers a CONNECT with, and the exact string the client
/// compares against.
pub const CONNECTED_STATUS: &str = "200 connected to Gee RPC";

/// Response header carrying the comma-joined alive server list on a
/// registry GET.
pub const SERVERS_HEADER: &str = "X-Geerpc-Servers";

/// Request header carrying a single server address on a registry POST.
pub const SERVER_HEADER: &str = "X-Geerpc-Server";

/// Connect timeout applied by [`Options::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire header sent before every request and response body.
///
/// Correlation between requests and responses is purely by `seq`; responses
/// may arrive in any order. An empty `error` marks success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Method target of the form `"ServiceName.MethodName"`.
    pub service_method: String,
    /// Sequence number assigned by the client, unique per connection.
    pub seq: u64,
    /// Error string; empty on success.
    pub error: String,
}

/// Connection handshake, sent once as the first frame.
///
/// Timeouts are carried in milliseconds on the wire; zero means unlimited.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use geerpc_common::{codec, Options};
///
/// let opt = Options::default()
///     .with_codec(codec::JSON_CODEC)
///     .with_handle_timeout(Duration::from_secs(1));
/// assert_eq!(opt.codec_type, "application/json");
/// assert_eq!(opt.handle_timeout(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Must equal [`MAGIC_NUMBER`]; used to reject mis-dialed peers.
    pub magic_number: u32,
    /// Name of a registered codec, e.g. `"application/postcard"`.
    pub codec_type: String,
    /// Client-side limit on dial + handshake, in milliseconds. Zero means
    /// no limit.
    pub connect_timeout_ms: u64,
    /// Server-side limit on a single user-method execution, in
    /// milliseconds. Zero means no limit.
    pub handle_timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: crate::codec::BINARY_CODEC.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            handle_timeout_ms: 0,
        }
    }
}

impl Options {
    /// Sets the codec used for all frames after the handshake.
    pub fn with_codec(mut self, codec_type: impl Into<String>) -> Self {
        self.codec_type = codec_type.into();
        self
    }

    /// Sets the connect timeout. `Duration::ZERO` means no limit.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the server-side handle timeout. `Duration::ZERO` means no limit.
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handle_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let opt = Options::default();
        assert_eq!(opt.magic_number, MAGIC_NUMBER);
        assert_eq!(opt.codec_type, crate::codec::BINARY_CODEC);
        assert_eq!(opt.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(opt.handle_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_options_builders() {
        let opt = Options::default()
            .with_codec(crate::codec::JSON_CODEC)
            .with_connect_timeout(Duration::ZERO)
            .with_handle_timeout(Duration::from_millis(1500));
        assert_eq!(opt.codec_type, "application/json");
        assert_eq!(opt.connect_timeout_ms, 0);
        assert_eq!(opt.handle_timeout_ms, 1500);
    }

    #[test]
    fn test_options_handshake_encoding_is_json() {
        // The handshake must stay decodable without knowing the codec, so it
        // always goes over the wire as JSON.
        let opt = Options::default();
        let bytes = serde_json::to_vec(&opt).unwrap();
        let decoded: Options = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(opt, decoded);
    }

    #[test]
    fn test_header_error_empty_on_success() {
        let header = Header {
            service_method: "Foo.Sum".to_string(),
            seq: 7,
            error: String::new(),
        };
        assert!(header.error.is_empty());
    }
}
