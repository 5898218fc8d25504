//! A module which contains the implementation for the [`LokiBackend`] trait which uses the
//! blocking client of the `reqwest` crate for network communication.

use crate::client::{check_status, LokiBackend};
use crate::config::{AuthenticationMethod, LokiConfig};
use crate::error::{LokiError, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use url::Url;

/// A [`LokiBackend`] implementation which uses the [reqwest](https://crates.io/crates/reqwest) crate to
/// send logging messages to a Loki endpoint.
///
/// The blocking client runs its own runtime, so the provider's worker threads can use it whether
/// or not the host application runs on tokio.
pub struct ReqwestBackend {
    /// The push endpoint which is used to send log information to
    push_url: Url,
    /// The value of the `Authorization` header, if authentication is configured
    authorization: Option<String>,
    /// Internal client
    client: Client,
}

impl ReqwestBackend {
    pub(crate) fn new(push_url: Url, config: &LokiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LokiError::config("ReqwestBackend", e.to_string()))?;

        Ok(ReqwestBackend {
            push_url,
            authorization: config
                .basic_auth
                .as_ref()
                .map(|credentials| format!("Basic {}", credentials.encoded())),
            client,
        })
    }
}

impl LokiBackend for ReqwestBackend {
    fn send(&self, serialized_streams: Vec<u8>) -> Result<()> {
        let mut builder = self
            .client
            .post(self.push_url.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.as_str());
        }

        let mut response = builder
            .body(serialized_streams)
            .send()
            .map_err(LokiError::transport)?;
        let status = response.status().as_u16();

        // drain the body so the connection is released back to the pool
        let _ = response.copy_to(&mut std::io::sink());

        check_status(status)
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }

    fn authentication_method(&self) -> AuthenticationMethod {
        match self.authorization {
            Some(_) => AuthenticationMethod::Basic,
            None => AuthenticationMethod::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BasicCredentials;
    use crate::{AuthenticationMethod, LokiClient, LokiConfig, NetworkingBackend};
    use url::Url;

    #[test]
    fn creating_a_reqwest_instance_without_credentials_works_correctly() {
        let config = LokiConfig::new(Url::parse("https://loki.example.com").unwrap(), "j", "a");
        let client = LokiClient::new(config, NetworkingBackend::Reqwest).unwrap();
        assert_eq!(client.authentication_method(), AuthenticationMethod::None);
        assert_eq!(client.backend_name(), "reqwest");
    }

    #[test]
    fn creating_a_reqwest_instance_with_credentials_works_correctly() {
        let mut config =
            LokiConfig::new(Url::parse("https://loki.example.com").unwrap(), "j", "a");
        config.basic_auth = Some(BasicCredentials {
            username: "username".to_string(),
            password: "password".to_string(),
        });
        let client = LokiClient::new(config, NetworkingBackend::Reqwest).unwrap();
        assert_eq!(client.authentication_method(), AuthenticationMethod::Basic);
    }
}
