//! A module which contains the implementation for the [`LokiBackend`] trait which uses the `ureq`
//! crate for network communication.
use crate::client::{check_status, LokiBackend};
use crate::config::{AuthenticationMethod, LokiConfig};
use crate::error::{LokiError, Result};
use ureq::Agent;
use url::Url;

/// A [`LokiBackend`] implementation which uses the [ureq](https://crates.io/crates/ureq) crate to
/// send logging messages to a Loki endpoint.
pub struct UreqBackend {
    /// The push endpoint which is used to send log information to
    push_url: Url,
    /// The value of the `Authorization` header, if authentication is configured
    authorization: Option<String>,
    /// The agent keeps the connection pool which is shared by all workers
    agent: Agent,
}

impl UreqBackend {
    pub(crate) fn new(push_url: Url, config: &LokiConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();

        UreqBackend {
            push_url,
            authorization: config
                .basic_auth
                .as_ref()
                .map(|credentials| format!("Basic {}", credentials.encoded())),
            agent: agent_config.new_agent(),
        }
    }
}

impl LokiBackend for UreqBackend {
    fn send(&self, serialized_streams: Vec<u8>) -> Result<()> {
        let mut request = self
            .agent
            .post(self.push_url.as_str())
            .header("Content-Type", "application/json");
        if let Some(authorization) = &self.authorization {
            request = request.header("Authorization", authorization.as_str());
        }

        let mut response = request
            .send(&serialized_streams)
            .map_err(LokiError::transport)?;

        // read the rest of the body so the connection can go back into the pool
        let _ = std::io::copy(
            &mut response.body_mut().as_reader(),
            &mut std::io::sink(),
        );

        check_status(response.status().as_u16())
    }

    fn name(&self) -> &'static str {
        "ureq"
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
    fn creating_a_ureq_instance_without_credentials_works_correctly() {
        let config = LokiConfig::new(Url::parse("https://loki.example.com").unwrap(), "j", "a");
        let client = LokiClient::new(config, NetworkingBackend::Ureq).unwrap();
        assert_eq!(client.authentication_method(), AuthenticationMethod::None);
        assert_eq!(client.backend_name(), "ureq");
    }

    #[test]
    fn creating_a_ureq_instance_with_credentials_works_correctly() {
        let mut config =
            LokiConfig::new(Url::parse("https://loki.example.com").unwrap(), "j", "a");
        config.basic_auth = Some(BasicCredentials {
            username: "username".to_string(),
            password: "password".to_string(),
        });
        let client = LokiClient::new(config, NetworkingBackend::Ureq).unwrap();
        assert_eq!(client.authentication_method(), AuthenticationMethod::Basic);
        assert_eq!(client.backend_name(), "ureq");
    }
}
