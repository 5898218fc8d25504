//! Building push payloads and handing them to a networking backend.
use crate::config::{AuthenticationMethod, LokiConfig};
use crate::error::{LokiError, Result};
use crate::labels::{merge_maps, Fields, Value};
use crate::noop::NoopBackend;
use crate::{Stream, Streams};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// The path of the push endpoint, relative to the base url of the Loki instance
pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// Pushes a single log line to Loki.
pub trait LogSender: Send + Sync {
    /// Push `message` with the given Loki level name and extra labels, stamped with the current
    /// time.
    fn send_log(&self, level: &str, message: &str, params: &Fields) -> Result<()> {
        self.send_log_at(SystemTime::now(), level, message, params)
    }

    /// Push `message` stamped with `timestamp` instead of the current time.
    fn send_log_at(
        &self,
        timestamp: SystemTime,
        level: &str,
        message: &str,
        params: &Fields,
    ) -> Result<()>;
}

/// The `LokiBackend` trait is used to specify the interfaces which are required for the
/// communication with the remote endpoint.
pub trait LokiBackend: Send + Sync {
    /// Post an already serialized push payload to the remote endpoint
    fn send(&self, serialized_streams: Vec<u8>) -> Result<()>;

    /// A short name of the implementation, used in diagnostics
    fn name(&self) -> &'static str;

    /// Get the configured `AuthenticationMethod` for the backend
    fn authentication_method(&self) -> AuthenticationMethod;
}

/// The `NetworkingBackend` defines all possible networking backends which can be used within
/// the crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkingBackend {
    /// The `None` network backend does exactly what it says: it does nothing at all
    None,

    /// The `Ureq` backend uses the `ureq` library for network requests
    #[cfg(feature = "ureq")]
    Ureq,

    /// The `Reqwest` backend uses the blocking client of the `reqwest` library
    #[cfg(feature = "reqwest")]
    Reqwest,
}

impl Default for NetworkingBackend {
    #[allow(unreachable_code)]
    fn default() -> Self {
        #[cfg(feature = "ureq")]
        return NetworkingBackend::Ureq;
        #[cfg(feature = "reqwest")]
        return NetworkingBackend::Reqwest;
        NetworkingBackend::None
    }
}

/// A [`LogSender`] which labels every line with the configured `job` and `app` and pushes it
/// through a [`LokiBackend`].
pub struct LokiClient {
    backend: Box<dyn LokiBackend>,
    base_labels: Fields,
}

impl LokiClient {
    /// Create a client which talks to Loki through one of the built-in backends.
    ///
    /// # Example
    /// ```
    /// use loki_provider::{LokiClient, LokiConfig, NetworkingBackend};
    /// use url::Url;
    ///
    /// let config = LokiConfig::new(Url::parse("http://localhost:3100").unwrap(), "svc", "api");
    /// let client = LokiClient::new(config, NetworkingBackend::None).unwrap();
    /// assert_eq!(client.backend_name(), "noop");
    /// ```
    pub fn new(config: LokiConfig, network: NetworkingBackend) -> Result<Self> {
        let push_url = push_url(&config.url)?;
        let backend: Box<dyn LokiBackend> = match network {
            NetworkingBackend::None => Box::new(NoopBackend),

            #[cfg(feature = "ureq")]
            NetworkingBackend::Ureq => Box::new(crate::ureq::UreqBackend::new(push_url, &config)),

            #[cfg(feature = "reqwest")]
            NetworkingBackend::Reqwest => {
                Box::new(crate::reqwest::ReqwestBackend::new(push_url, &config)?)
            }
        };
        #[cfg(not(any(feature = "ureq", feature = "reqwest")))]
        let _ = push_url;

        Ok(Self::with_backend(config, backend))
    }

    /// Create a client which hands its payloads to a custom backend.
    pub fn with_backend(config: LokiConfig, backend: Box<dyn LokiBackend>) -> Self {
        let base_labels = Fields::from([
            ("job".to_string(), Value::String(config.job)),
            ("app".to_string(), Value::String(config.app)),
        ]);
        LokiClient {
            backend,
            base_labels,
        }
    }

    /// Attach an additional static label to every line. A tag named `job` or `app` replaces the
    /// configured value.
    pub fn tag(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.base_labels.insert(name.into(), value.into());
    }

    /// The name of the backend which is used for the network requests
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The authentication method the backend uses
    pub fn authentication_method(&self) -> AuthenticationMethod {
        self.backend.authentication_method()
    }

    /// Build the payload for a single line.
    ///
    /// The labels are merged from the static labels, the `level` label and `params`, in this
    /// order, so `params` can replace any of the others by reusing its key.
    pub fn payload(
        &self,
        timestamp: SystemTime,
        level: &str,
        message: &str,
        params: &Fields,
    ) -> Streams {
        let level_label = Fields::from([("level".to_string(), Value::from(level))]);
        let labels = merge_maps([&self.base_labels, &level_label, params]);

        Streams {
            streams: vec![Stream {
                stream: labels,
                values: vec![[unix_nanos(timestamp), message.to_string()]],
            }],
        }
    }
}

impl LogSender for LokiClient {
    fn send_log_at(
        &self,
        timestamp: SystemTime,
        level: &str,
        message: &str,
        params: &Fields,
    ) -> Result<()> {
        let streams = self.payload(timestamp, level, message, params);
        let serialized = serde_json::to_vec(&streams)?;
        self.backend.send(serialized)
    }
}

/// Build the url of the push endpoint below `base`, keeping any path prefix of `base`.
pub fn push_url(base: &Url) -> Result<Url> {
    if base.cannot_be_a_base() {
        return Err(LokiError::config(
            "LokiConfig",
            format!("'{}' cannot be used as base url", base),
        ));
    }
    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), PUSH_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Map a response status of the push endpoint to a result. Only `200` and `204` count as
/// success.
pub fn check_status(status: u16) -> Result<()> {
    match status {
        200 | 204 => Ok(()),
        status => Err(LokiError::Status { status }),
    }
}

fn unix_nanos(timestamp: SystemTime) -> String {
    // a clock before 1970 is clamped to the epoch
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_nanos())
        .unwrap_or_default()
        .to_string()
}
