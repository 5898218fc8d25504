#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod labels;
pub mod noop;
pub mod provider;
#[cfg(feature = "reqwest")]
pub mod reqwest;
#[cfg(feature = "ureq")]
pub mod ureq;

pub use client::{LogSender, LokiBackend, LokiClient, NetworkingBackend};
pub use config::{AuthenticationMethod, BasicCredentials, LokiConfig, ProviderConfig};
pub use error::{LokiError, Result};
pub use labels::{merge_maps, Fields, Value};
pub use provider::{LokiProvider, LokiProviderBuilder};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The log target used for the diagnostics of this crate itself.
///
/// Records with this target are never forwarded to Loki by [`LokiProvider`].
pub const DIAGNOSTIC_TARGET: &str = "loki_provider";

/// The severity of a log entry, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// The name Loki (and Grafana) use for this level in the `level` label.
    pub fn as_loki_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warning",
            Level::Error => "error",
            Level::Fatal => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_loki_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" | "critical" => Ok(Level::Fatal),
            _ => Err(format!("invalid log level: '{}'", s)),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, String> {
        value.parse()
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// The contract a logger provider fulfills towards the logging frontend of the host application.
///
/// The frontend asks [`LoggerProvider::should_log`] before it renders a record, hands every
/// record which passed to [`LoggerProvider::write`] and calls [`LoggerProvider::close`] once on
/// shutdown.
pub trait LoggerProvider: Send + Sync {
    /// Hand a single record to the provider.
    fn write(&self, level: Level, message: &str, fields: &Fields) -> Result<()>;

    /// Check if records of the given level would be accepted.
    fn should_log(&self, level: Level) -> bool;

    /// Release everything the provider holds, finishing outstanding work first.
    fn close(&self) -> Result<()>;
}

/// A single Loki stream: a label set together with the lines which share it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Stream {
    /// The labels of the stream
    pub stream: HashMap<String, String>,
    /// `[timestamp, line]` pairs, the timestamp being Unix nanoseconds as decimal string
    pub values: Vec<[String; 2]>,
}

/// The body of a request to the Loki push endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Streams {
    pub streams: Vec<Stream>,
}
