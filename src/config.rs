//! Plain configuration structs for the client and the provider.
//!
//! Both structs derive `Deserialize`, so they can be embedded into whatever configuration format
//! the host application already reads. This crate itself never reads files or the environment.
use crate::Level;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// The default timeout of a single push request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The default time [`crate::LokiProvider::close`] waits for pending pushes
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The default number of entries which can wait for a worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// The default number of worker threads pushing entries to Loki
pub const DEFAULT_WORKERS: usize = 2;

/// The `AuthenticationMethod` enum is used to specify the authentication method to use when
/// sending the log messages to the remote endpoint.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub enum AuthenticationMethod {
    /// Do not use any authentication when sending the log messages to the remote endpoint
    #[default]
    None,
    /// Use the HTTP Basic Auth when sending the log messages to the remote endpoint
    Basic,
}

/// Username and password for HTTP Basic Auth.
#[derive(Clone, Eq, PartialEq, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// The base64 encoded `username:password` pair as it is sent in the `Authorization` header.
    pub fn encoded(&self) -> String {
        use base64::{engine::general_purpose, Engine};

        general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and as whom log entries are pushed.
#[derive(Clone, Debug, Deserialize)]
pub struct LokiConfig {
    /// The base url of the Loki instance, e.g. `http://localhost:3100`
    pub url: Url,
    /// The value of the `job` label attached to every entry
    pub job: String,
    /// The value of the `app` label attached to every entry
    pub app: String,
    /// The timeout of a single push request
    #[serde(default = "default_request_timeout")]
    pub timeout: Duration,
    /// Credentials for HTTP Basic Auth, if the endpoint requires them
    #[serde(default)]
    pub basic_auth: Option<BasicCredentials>,
}

impl LokiConfig {
    /// Create a configuration with the default timeout and without authentication.
    ///
    /// # Example
    /// ```
    /// use loki_provider::LokiConfig;
    /// use url::Url;
    ///
    /// let config = LokiConfig::new(Url::parse("http://localhost:3100").unwrap(), "svc", "api");
    /// assert_eq!(config.job, "svc");
    /// ```
    pub fn new(url: Url, job: impl Into<String>, app: impl Into<String>) -> Self {
        LokiConfig {
            url,
            job: job.into(),
            app: app.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            basic_auth: None,
        }
    }

    /// The authentication method which follows from the configured credentials.
    pub fn authentication_method(&self) -> AuthenticationMethod {
        match self.basic_auth {
            Some(_) => AuthenticationMethod::Basic,
            None => AuthenticationMethod::None,
        }
    }
}

/// How the provider filters and dispatches log entries.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Entries below this level are dropped without any side effect
    pub level: Level,
    /// The number of worker threads pushing entries concurrently
    pub workers: usize,
    /// The number of entries which may wait for a free worker before new ones are dropped
    pub queue_capacity: usize,
    /// How long closing the provider waits for pending pushes
    pub shutdown_timeout: Duration,
}

impl ProviderConfig {
    /// The Loki name of the configured minimum level.
    pub fn level_label(&self) -> &'static str {
        self.level.as_loki_str()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            level: Level::Info,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_are_base64_encoded() {
        let credentials = BasicCredentials {
            username: "username".to_string(),
            password: "password".to_string(),
        };
        assert_eq!(credentials.encoded(), "dXNlcm5hbWU6cGFzc3dvcmQ=");
    }

    #[test]
    fn debug_output_does_not_leak_the_password() {
        let credentials = BasicCredentials {
            username: "username".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }

    #[test]
    fn loki_config_deserializes_with_defaults() {
        let config: LokiConfig = serde_json::from_str(
            r#"{"url": "http://localhost:3100", "job": "svc", "app": "api"}"#,
        )
        .unwrap();
        assert_eq!(config.url.as_str(), "http://localhost:3100/");
        assert_eq!(config.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.authentication_method(), AuthenticationMethod::None);
    }

    #[test]
    fn provider_config_accepts_loki_level_names() {
        let config: ProviderConfig = serde_json::from_str(r#"{"level": "warning"}"#).unwrap();
        assert_eq!(config.level, Level::Warn);
        assert_eq!(config.level_label(), "warning");
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
