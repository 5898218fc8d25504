use crate::client::LokiBackend;
use crate::config::AuthenticationMethod;
use crate::error::Result;

/// The `NoopBackend` accepts every payload and sends nothing. It can be used to switch log
/// shipping off without touching the code which logs.
pub(crate) struct NoopBackend;

impl LokiBackend for NoopBackend {
    fn send(&self, _: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }

    fn authentication_method(&self) -> AuthenticationMethod {
        AuthenticationMethod::None
    }
}
