//! Target address resolution for firehose endpoints.
//!
//! A caller supplies a base WebSocket URL and a subscription identifier; the
//! session connects to `<scheme>://<host>:<port>/firehose/<subscription-id>`.
//! Scheme and port rules are deterministic and checked before any socket is
//! opened: `ws` defaults to port 80, `wss` to 443, and anything else is an
//! address error rather than a connection attempt.

use std::fmt;

use url::Url;

use crate::error::{FirehoseError, Result};

/// Path prefix the aggregation endpoint serves event streams under.
pub const FIREHOSE_PATH_PREFIX: &str = "/firehose/";

/// Transport scheme of a firehose endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// Plaintext WebSocket (`ws`), default port 80.
    Ws,
    /// TLS WebSocket (`wss`), default port 443.
    Wss,
}

impl Scheme {
    /// Port implied by the scheme when the URL names none.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    /// Whether connections under this scheme negotiate TLS first.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Scheme::Wss)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved firehose target: scheme, host, port, and stream path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Resolve `base` and `subscription_id` into a connectable endpoint.
    ///
    /// Any path on the base URL is replaced by the firehose stream path. Fails
    /// with an `Address` error for unparseable URLs and for schemes other than
    /// `ws`/`wss`; no socket is opened on either failure.
    pub fn resolve(base: &str, subscription_id: &str) -> Result<Self> {
        let parsed = Url::parse(base)
            .map_err(|e| FirehoseError::address(format!("cannot parse '{base}': {e}")))?;

        let scheme = match parsed.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(FirehoseError::address(format!(
                    "unsupported scheme '{other}' (expected ws or wss)"
                )));
            }
        };

        let host = parsed.host_str().unwrap_or("127.0.0.1").to_string();
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());
        let path = format!("{FIREHOSE_PATH_PREFIX}{subscription_id}");

        Ok(Self { scheme, host, port, path })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The full URL the upgrade request is issued against.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
