//! Logging in to the server.

use crate::client::{Client, Token};
use crate::errors::AuthError;
use crate::model::TokenResponse;
use crate::transport::{Credentials, Method, Request, Transport};

const UNKNOWN_ERROR: &str = "Unknown error";

/// What the login prompt should be showing.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginPrompt {
    Hidden,
    Shown,
    /// A failed login, displayed in place of the "Login" button text.
    Error { message: String },
}

impl LoginPrompt {
    pub fn is_visible(&self) -> bool {
        *self != LoginPrompt::Hidden
    }

    pub fn label(&self) -> &str {
        match *self {
            LoginPrompt::Error { ref message } => message,
            _ => "Login",
        }
    }
}

/// Exchanges credentials for a bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAuthenticator {
    probed: bool,
    prompt: LoginPrompt,
}

impl SessionAuthenticator {
    pub fn new() -> SessionAuthenticator {
        SessionAuthenticator {
            probed: false,
            prompt: LoginPrompt::Hidden,
        }
    }

    pub fn prompt(&self) -> &LoginPrompt {
        &self.prompt
    }

    /// Check whether the server already considers us logged in (e.g. thanks
    /// to a cookie) by asking for a token with empty credentials.
    ///
    /// This only ever happens once. A failure quietly brings up the login
    /// prompt.
    pub fn silent_probe<T: Transport>(
        &mut self,
        client: &mut Client<T>,
    ) -> Result<Token, AuthError> {
        if self.probed {
            return Err(AuthError::ProbeAlreadyUsed);
        }
        self.probed = true;

        match request_token(client, "", "") {
            Ok(token) => {
                debug!("Already logged in");
                self.prompt = LoginPrompt::Hidden;
                Ok(token)
            }
            Err(e) => {
                debug!("Silent login failed, {}", e);
                self.prompt = LoginPrompt::Shown;
                Err(e)
            }
        }
    }

    /// Log in with a username and password, replacing any existing token.
    pub fn authenticate<T: Transport>(
        &mut self,
        client: &mut Client<T>,
        username: &str,
        password: &str,
    ) -> Result<Token, AuthError> {
        info!("Logging in as {:?}", username);

        match request_token(client, username, password) {
            Ok(token) => {
                self.prompt = LoginPrompt::Hidden;
                Ok(token)
            }
            Err(e) => {
                warn!("Login failed, {}", e);
                let message = match e {
                    AuthError::Rejected { ref message, .. } => message.clone(),
                    _ => String::from(UNKNOWN_ERROR),
                };
                self.prompt = LoginPrompt::Error { message };
                Err(e)
            }
        }
    }

    /// Put the prompt back to its plain "Login" state after an error has
    /// been on display for long enough.
    pub fn reset_prompt(&mut self) {
        if let LoginPrompt::Error { .. } = self.prompt {
            self.prompt = LoginPrompt::Shown;
        }
    }

    /// The server stopped accepting our token.
    pub fn require_login<T: Transport>(&mut self, client: &mut Client<T>) {
        client.clear_token();
        if !self.prompt.is_visible() {
            self.prompt = LoginPrompt::Shown;
        }
    }
}

impl Default for SessionAuthenticator {
    fn default() -> SessionAuthenticator {
        SessionAuthenticator::new()
    }
}

fn request_token<T: Transport>(
    client: &mut Client<T>,
    username: &str,
    password: &str,
) -> Result<Token, AuthError> {
    let request = Request::new(Method::Get, "token").with_credentials(Credentials::Basic {
        username: username.to_string(),
        password: password.to_string(),
    });
    let response = client.send(request)?;

    if response.status != 200 && response.status != 204 {
        return Err(AuthError::Rejected {
            status: response.status,
            message: response
                .error_message()
                .unwrap_or(UNKNOWN_ERROR)
                .to_string(),
        });
    }

    let body: TokenResponse = response.json().unwrap_or_default();

    let token = match body.token {
        Some(tok) => Token::new(tok),
        // a 204 means the session is already established some other way
        None if response.status == 204 => Token::new(""),
        None => return Err(AuthError::MissingToken),
    };

    client.set_token(token.clone());
    Ok(token)
}
