//! The provider which connects a logging frontend to Loki.
use crate::client::{LogSender, LokiBackend, LokiClient, NetworkingBackend};
use crate::config::{AuthenticationMethod, BasicCredentials, LokiConfig, ProviderConfig};
use crate::dispatch::{log_error_handler, Dispatcher, Entry, ErrorHandler, ProviderMetrics};
use crate::error::{LokiError, Result};
use crate::labels::{Fields, Value};
use crate::{Level, LoggerProvider, DIAGNOSTIC_TARGET};
use log::{Log, Metadata, Record};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

/// The endpoint used when the builder is not given one
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3100";

/// Records from these crates are never forwarded, since sending them would log again
const IGNORED_TARGETS: [&str; 7] = [
    DIAGNOSTIC_TARGET,
    "ureq",
    "ureq_proto",
    "reqwest",
    "hyper",
    "h2",
    "rustls",
];

/// `true` for the ignored crates and their modules, but not for crates sharing a name prefix.
fn is_ignored_target(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// The `LokiProvider` struct implements the communication interface with a
/// [Loki](https://grafana.com/oss/loki/) instance.
///
/// Records which pass the configured level are queued and pushed by a small pool of worker
/// threads, so neither [`LoggerProvider::write`] nor [`Log::log`] wait for the network. Failed
/// pushes are reported to the error handler and never reach the caller.
///
/// To create a new instance either use [`LokiProvider::builder`] or combine a [`LokiClient`] with
/// a [`ProviderConfig`] through [`LokiProvider::new`].
pub struct LokiProvider {
    config: ProviderConfig,
    dispatcher: Dispatcher,
}

impl LokiProvider {
    /// Create a provider which pushes through `client` and reports failures through the `log`
    /// facade.
    ///
    /// # Example
    /// ```
    /// use loki_provider::{Level, LokiClient, LokiConfig, LokiProvider, NetworkingBackend, ProviderConfig};
    /// use std::sync::Arc;
    /// use url::Url;
    ///
    /// let config = LokiConfig::new(Url::parse("http://localhost:3100").unwrap(), "my-service", "user-api");
    /// let client = LokiClient::new(config, NetworkingBackend::None).unwrap();
    /// let provider = LokiProvider::new(
    ///     ProviderConfig { level: Level::Info, ..Default::default() },
    ///     Arc::new(client),
    /// )
    /// .unwrap();
    /// ```
    pub fn new(config: ProviderConfig, client: Arc<dyn LogSender>) -> Result<Self> {
        Self::with_error_handler(config, client, log_error_handler())
    }

    /// Like [`LokiProvider::new`], with a custom callback for failed pushes.
    pub fn with_error_handler(
        config: ProviderConfig,
        client: Arc<dyn LogSender>,
        on_error: ErrorHandler,
    ) -> Result<Self> {
        let dispatcher =
            Dispatcher::start(client, config.workers, config.queue_capacity, on_error)?;
        Ok(LokiProvider { config, dispatcher })
    }

    /// Create a new `LokiProviderBuilder` with all required parameters.
    ///
    /// # Example
    /// ```
    /// use loki_provider::LokiProvider;
    ///
    /// let builder = LokiProvider::builder();
    /// ```
    pub fn builder() -> LokiProviderBuilder {
        LokiProviderBuilder {
            endpoint: None,
            job: String::new(),
            app: String::new(),
            request_timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
            credentials: None,
            network_backend: NetworkingBackend::default(),
            custom_backend: None,
            additional_tags: Fields::new(),
            provider: ProviderConfig::default(),
            on_error: None,
        }
    }

    /// The minimum level of records which are forwarded
    pub fn level(&self) -> Level {
        self.config.level
    }

    /// Counters of queued, sent, failed and dropped entries
    pub fn metrics(&self) -> &ProviderMetrics {
        self.dispatcher.metrics()
    }

    /// Wait until every entry written so far was pushed (or failed), without closing the
    /// provider.
    pub fn flush_within(&self, timeout: Duration) -> Result<()> {
        self.dispatcher.flush(timeout)
    }
}

impl LoggerProvider for LokiProvider {
    fn write(&self, level: Level, message: &str, fields: &Fields) -> Result<()> {
        if !self.should_log(level) {
            return Ok(());
        }

        // the entry owns its copy of the fields, the caller keeps the original
        let entry = Entry {
            timestamp: SystemTime::now(),
            level: level.as_loki_str(),
            message: message.to_string(),
            fields: fields.clone(),
        };
        self.dispatcher.dispatch(entry);
        Ok(())
    }

    fn should_log(&self, level: Level) -> bool {
        level >= self.config.level
    }

    fn close(&self) -> Result<()> {
        self.dispatcher.shutdown(self.config.shutdown_timeout)
    }
}

impl Log for LokiProvider {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if is_ignored_target(metadata.target()) {
            return false;
        }
        self.should_log(metadata.level().into())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let fields = record_fields(record);
        let _ = self.write(
            record.level().into(),
            &record.args().to_string(),
            &fields,
        );
    }

    fn flush(&self) {
        if let Err(error) = self.flush_within(self.config.shutdown_timeout) {
            log::warn!(target: DIAGNOSTIC_TARGET, "Flushing the Loki provider failed: {}", error);
        }
    }
}

impl Drop for LokiProvider {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!(target: DIAGNOSTIC_TARGET, "Closing the Loki provider failed: {}", error);
        }
    }
}

/// The key-values attached to a record, if structured logging is enabled.
#[cfg(not(feature = "structured_logging"))]
fn record_fields(_: &Record) -> Fields {
    Fields::new()
}

/// The key-values attached to a record, if structured logging is enabled.
#[cfg(feature = "structured_logging")]
fn record_fields(record: &Record) -> Fields {
    use log::kv::{Error, Key, VisitSource};

    struct FieldVisitor<'a>(&'a mut Fields);

    impl<'kvs, 'a> VisitSource<'kvs> for FieldVisitor<'a> {
        fn visit_pair(
            &mut self,
            key: Key<'kvs>,
            value: log::kv::Value<'kvs>,
        ) -> std::result::Result<(), Error> {
            self.0.insert(key.as_str().to_string(), field_value(&value));
            Ok(())
        }
    }

    let source = record.key_values();
    let mut fields = Fields::with_capacity(source.count());
    if source.visit(&mut FieldVisitor(&mut fields)).is_err() {
        log::debug!(target: DIAGNOSTIC_TARGET, "Could not read all key-values of a record");
    }
    fields
}

#[cfg(feature = "structured_logging")]
fn field_value(value: &log::kv::Value) -> Value {
    if let Some(value) = value.to_bool() {
        Value::Bool(value)
    } else if let Some(value) = value.to_i64() {
        Value::Int(value)
    } else if let Some(value) = value.to_u64() {
        Value::UInt(value)
    } else if let Some(value) = value.to_f64() {
        Value::Float(value)
    } else {
        Value::String(value.to_string())
    }
}

/// The `LokiProviderBuilder` struct is used to create a new instance of `LokiProvider` using the
/// builder pattern.
pub struct LokiProviderBuilder {
    /// The loki `endpoint` which is used to send log information to
    endpoint: Option<Url>,
    /// The value of the `job` label
    job: String,
    /// The value of the `app` label
    app: String,
    /// The timeout of a single push request
    request_timeout: Duration,
    /// The credentials to use to authenticate against the remote `endpoint`
    credentials: Option<BasicCredentials>,
    /// The `network_backend` which should be used for the network requests
    network_backend: NetworkingBackend,
    /// A backend supplied by the caller, replacing `network_backend`
    custom_backend: Option<Box<dyn LokiBackend>>,
    /// A map of additional tags which should be attached to all log messages
    additional_tags: Fields,
    /// Level, pool size and shutdown timeout
    provider: ProviderConfig,
    /// The callback for failed pushes
    on_error: Option<ErrorHandler>,
}

impl LokiProviderBuilder {
    /// Set the endpoint which should be used for sending the log messages to.
    ///
    /// # Example
    /// ```
    /// use url::Url;
    /// use loki_provider::LokiProvider;
    ///
    /// let builder = LokiProvider::builder()
    ///     .endpoint(Url::parse("https://loki.example.com").unwrap());
    /// ```
    pub fn endpoint(mut self, endpoint: Url) -> LokiProviderBuilder {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the value of the `job` label attached to every entry.
    pub fn job(mut self, job: impl Into<String>) -> LokiProviderBuilder {
        self.job = job.into();
        self
    }

    /// Set the value of the `app` label attached to every entry.
    pub fn app(mut self, app: impl Into<String>) -> LokiProviderBuilder {
        self.app = app.into();
        self
    }

    /// Select the library which performs the network requests.
    ///
    /// # Example
    /// ```
    /// use loki_provider::{LokiProvider, NetworkingBackend};
    ///
    /// let builder = LokiProvider::builder()
    ///     .network(NetworkingBackend::None);
    /// ```
    pub fn network(mut self, backend: NetworkingBackend) -> LokiProviderBuilder {
        self.network_backend = backend;
        self
    }

    /// Push through a custom [`LokiBackend`] instead of one of the built-in ones.
    pub fn backend(mut self, backend: Box<dyn LokiBackend>) -> LokiProviderBuilder {
        self.custom_backend = Some(backend);
        self
    }

    /// Ensure our client uses the supplied credentials for authentication against the remote endpoint.
    ///
    /// # Example
    /// ```
    /// use loki_provider::{AuthenticationMethod, LokiProvider};
    ///
    /// let builder = LokiProvider::builder()
    ///     .with_authentication(AuthenticationMethod::Basic, "foo".to_string(), "bar".to_string());
    /// ```
    pub fn with_authentication(
        mut self,
        method: AuthenticationMethod,
        username: String,
        password: String,
    ) -> LokiProviderBuilder {
        self.credentials = match method {
            AuthenticationMethod::None => None,
            AuthenticationMethod::Basic => Some(BasicCredentials { username, password }),
        };
        self
    }

    /// Add an additional tag to all logging messages which are sent to Loki.
    ///
    /// # Example
    /// ```
    /// use loki_provider::LokiProvider;
    ///
    /// let builder = LokiProvider::builder()
    ///     .tag("environment", "production")
    ///     .tag("replica", 3);
    /// ```
    pub fn tag(mut self, name: &str, value: impl Into<Value>) -> LokiProviderBuilder {
        self.additional_tags.insert(name.to_string(), value.into());
        self
    }

    /// Drop every record below `level`.
    pub fn level(mut self, level: Level) -> LokiProviderBuilder {
        self.provider.level = level;
        self
    }

    /// Set the timeout of a single push request.
    pub fn timeout(mut self, timeout: Duration) -> LokiProviderBuilder {
        self.request_timeout = timeout;
        self
    }

    /// Set the number of worker threads pushing to Loki.
    pub fn workers(mut self, workers: usize) -> LokiProviderBuilder {
        self.provider.workers = workers;
        self
    }

    /// Set how many entries may wait for a worker before new entries are dropped.
    pub fn queue_capacity(mut self, capacity: usize) -> LokiProviderBuilder {
        self.provider.queue_capacity = capacity;
        self
    }

    /// Set how long closing the provider waits for pending pushes.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> LokiProviderBuilder {
        self.provider.shutdown_timeout = timeout;
        self
    }

    /// Replace the default error handler, which logs failed pushes through the `log` facade.
    pub fn on_send_error<F>(mut self, handler: F) -> LokiProviderBuilder
    where
        F: Fn(&LokiError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Create a new `LokiProvider` instance with the parameters supplied to this struct before
    /// calling `build()`.
    ///
    /// # Example
    /// ```
    /// use url::Url;
    /// use loki_provider::{Level, LokiProvider, NetworkingBackend};
    ///
    /// let provider = LokiProvider::builder()
    ///     .endpoint(Url::parse("https://loki.example.com").unwrap())
    ///     .network(NetworkingBackend::None)
    ///     .job("my-service")
    ///     .app("user-api")
    ///     .level(Level::Info)
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn build(self) -> Result<LokiProvider> {
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => Url::parse(DEFAULT_ENDPOINT)
                .map_err(|e| LokiError::config("LokiProviderBuilder", e.to_string()))?,
        };

        let config = LokiConfig {
            url: endpoint,
            job: self.job,
            app: self.app,
            timeout: self.request_timeout,
            basic_auth: self.credentials,
        };

        let mut client = match self.custom_backend {
            Some(backend) => {
                // still validate the endpoint, even though the backend decides where to send
                crate::client::push_url(&config.url)?;
                LokiClient::with_backend(config, backend)
            }
            None => LokiClient::new(config, self.network_backend)?,
        };
        for (name, value) in self.additional_tags {
            client.tag(name, value);
        }

        LokiProvider::with_error_handler(
            self.provider,
            Arc::new(client),
            self.on_error.unwrap_or_else(log_error_handler),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        level: String,
        message: String,
        params: Fields,
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Sent>>,
    }

    impl LogSender for RecordingSender {
        fn send_log_at(
            &self,
            _: SystemTime,
            level: &str,
            message: &str,
            params: &Fields,
        ) -> Result<()> {
            self.sent.lock().push(Sent {
                level: level.to_string(),
                message: message.to_string(),
                params: params.clone(),
            });
            Ok(())
        }
    }

    fn provider(level: Level) -> (LokiProvider, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let config = ProviderConfig {
            level,
            ..Default::default()
        };
        let provider = LokiProvider::new(config, sender.clone()).unwrap();
        (provider, sender)
    }

    #[test]
    fn should_log_compares_against_the_threshold() {
        let (provider, _) = provider(Level::Warn);
        assert!(!provider.should_log(Level::Debug));
        assert!(!provider.should_log(Level::Info));
        assert!(provider.should_log(Level::Warn));
        assert!(provider.should_log(Level::Error));
        assert!(provider.should_log(Level::Fatal));
    }

    #[test]
    fn records_below_the_threshold_are_dropped_silently() {
        let (provider, sender) = provider(Level::Info);

        assert!(provider
            .write(Level::Debug, "not interesting", &Fields::new())
            .is_ok());
        provider.close().unwrap();

        assert!(sender.sent.lock().is_empty());
        assert_eq!(provider.metrics().queued(), 0);
        assert_eq!(provider.metrics().dropped(), 0);
    }

    #[test]
    fn levels_are_translated_before_sending() {
        let (provider, sender) = provider(Level::Debug);

        for level in [
            Level::Debug,
            Level::Info,
            Level::Warn,
            Level::Error,
            Level::Fatal,
        ] {
            provider.write(level, "message", &Fields::new()).unwrap();
        }
        provider.close().unwrap();

        let mut levels: Vec<String> = sender
            .sent
            .lock()
            .iter()
            .map(|sent| sent.level.clone())
            .collect();
        levels.sort();
        assert_eq!(
            levels,
            vec!["critical", "debug", "error", "info", "warning"]
        );
    }

    #[test]
    fn fields_are_copied_into_the_entry() {
        let (provider, sender) = provider(Level::Info);
        let mut fields = Fields::from([("disk".to_string(), Value::from("/dev/sda1"))]);

        provider.write(Level::Warn, "disk full", &fields).unwrap();
        fields.insert("later".to_string(), Value::from(true));
        provider.close().unwrap();

        let sent = sender.sent.lock();
        assert_eq!(
            sent[0],
            Sent {
                level: "warning".to_string(),
                message: "disk full".to_string(),
                params: Fields::from([("disk".to_string(), Value::from("/dev/sda1"))]),
            }
        );
    }

    #[test]
    fn close_can_be_called_more_than_once() {
        let (provider, sender) = provider(Level::Info);
        provider.write(Level::Info, "first", &Fields::new()).unwrap();

        assert!(provider.close().is_ok());
        assert!(provider.close().is_ok());
        assert!(provider.write(Level::Info, "late", &Fields::new()).is_ok());

        assert_eq!(sender.sent.lock().len(), 1);
        assert_eq!(provider.metrics().dropped(), 1);
    }

    #[test]
    fn closing_with_an_unbounded_timeout_waits_for_the_queue() {
        let sender = Arc::new(RecordingSender::default());
        let config = ProviderConfig {
            shutdown_timeout: Duration::MAX,
            ..Default::default()
        };
        let provider = LokiProvider::new(config, sender.clone()).unwrap();

        provider.write(Level::Info, "first", &Fields::new()).unwrap();
        provider.flush();
        provider.write(Level::Info, "second", &Fields::new()).unwrap();

        assert!(provider.close().is_ok());
        assert_eq!(sender.sent.lock().len(), 2);
    }

    #[test]
    fn only_http_stack_crates_and_their_modules_are_ignored() {
        for target in [
            DIAGNOSTIC_TARGET,
            "ureq",
            "ureq_proto::client",
            "reqwest::connect",
            "hyper",
            "hyper::proto::h1",
            "h2::codec",
            "rustls::client",
        ] {
            assert!(is_ignored_target(target), "{} should be ignored", target);
        }
        for target in ["h2o_api", "hyperion", "rustls_setup", "ureqs", "app::hyper"] {
            assert!(!is_ignored_target(target), "{} should be forwarded", target);
        }
    }

    #[test]
    fn records_of_crates_sharing_a_prefix_are_forwarded() {
        let (provider, sender) = provider(Level::Info);

        provider.log(
            &Record::builder()
                .level(log::Level::Warn)
                .target("hyperion::render")
                .args(format_args!("frame dropped"))
                .build(),
        );
        provider.close().unwrap();

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "frame dropped");
    }

    #[test]
    fn the_log_facade_is_filtered_by_level_and_target() {
        let (provider, sender) = provider(Level::Info);

        provider.log(
            &Record::builder()
                .level(log::Level::Debug)
                .target("app")
                .args(format_args!("too verbose"))
                .build(),
        );
        provider.log(
            &Record::builder()
                .level(log::Level::Error)
                .target("ureq::unit")
                .args(format_args!("from the http stack"))
                .build(),
        );
        provider.log(
            &Record::builder()
                .level(log::Level::Error)
                .target(DIAGNOSTIC_TARGET)
                .args(format_args!("our own diagnostics"))
                .build(),
        );
        provider.log(
            &Record::builder()
                .level(log::Level::Warn)
                .target("app")
                .args(format_args!("forwarded {}", 1))
                .build(),
        );
        Log::flush(&provider);

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, "warning");
        assert_eq!(sent[0].message, "forwarded 1");
    }

    #[cfg(feature = "structured_logging")]
    #[test]
    fn key_values_of_records_become_fields() {
        let (provider, sender) = provider(Level::Info);
        let kvs: Vec<(&str, log::kv::Value)> = vec![
            ("disk", log::kv::Value::from("/dev/sda1")),
            ("critical", log::kv::Value::from(true)),
            ("percent", log::kv::Value::from(99u8)),
        ];

        provider.log(
            &Record::builder()
                .level(log::Level::Warn)
                .target("app")
                .args(format_args!("disk full"))
                .key_values(&kvs)
                .build(),
        );
        provider.close().unwrap();

        let sent = sender.sent.lock();
        assert_eq!(sent[0].params["disk"].to_label(), "/dev/sda1");
        assert_eq!(sent[0].params["critical"], Value::Bool(true));
        assert_eq!(sent[0].params["percent"].to_label(), "99");
    }

    #[test]
    fn building_without_an_endpoint_uses_the_local_default() {
        let provider = LokiProvider::builder()
            .network(NetworkingBackend::None)
            .job("svc")
            .app("api")
            .build();
        assert!(provider.is_ok());
    }

    #[test]
    fn building_with_zero_workers_fails() {
        let result = LokiProvider::builder()
            .network(NetworkingBackend::None)
            .workers(0)
            .build();
        assert!(matches!(
            result,
            Err(LokiError::InvalidConfiguration { .. })
        ));
    }
}
