//! AUTHINFO USER/PASS (RFC 4643 §2.3)

use super::NntpConnection;
use super::state::ConnectionState;
use crate::commands;
use crate::error::{NntpError, Result};
use crate::response::codes;
use tracing::debug;

impl NntpConnection {
    /// Authenticate with the provider's username and password
    ///
    /// # Errors
    ///
    /// - [`NntpError::AuthFailed`] - credentials rejected
    /// - [`NntpError::Protocol`] - the session is already authenticated
    /// - [`NntpError::ConnectionClosed`] / [`NntpError::Timeout`] - transport failure
    pub async fn authenticate(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Ready) && self.config.has_credentials() {
            return Err(NntpError::Protocol {
                code: codes::ACCESS_DENIED,
                message: "Already authenticated".to_string(),
            });
        }

        debug!("Authenticating as {}", self.config.username);
        self.state = ConnectionState::Authenticating;

        let cmd = commands::authinfo_user(&self.config.username);
        self.send_command(&cmd).await?;
        let mut response = self.read_response().await?;

        // 281 straight after USER means no password is needed
        if response.code == codes::AUTH_CONTINUE {
            let cmd = commands::authinfo_pass(&self.config.password);
            self.send_command(&cmd).await?;
            response = self.read_response().await?;
        }

        if response.code != codes::AUTH_ACCEPTED {
            self.state = ConnectionState::Connected;
            return Err(NntpError::AuthFailed(format!(
                "{} {}",
                response.code, response.message
            )));
        }

        self.state = ConnectionState::Ready;
        debug!("Authentication successful");
        Ok(())
    }
}
