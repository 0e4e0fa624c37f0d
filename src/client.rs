use serde_json::Value;
use std::fmt::{self, Debug, Formatter};

use crate::errors::TransportError;
use crate::transport::{Credentials, Method, Request, Response, Transport};

/// The bearer token handed out by `GET /token`.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new<S: Into<String>>(token: S) -> Token {
        Token(token.into())
    }

    pub fn reveal_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("Token").field(&"XXXXXXXXXX").finish()
    }
}

/// A session with the server.
///
/// The client owns the current token. It is attached to each request at the
/// moment the request is sent, so a token replaced by a fresh login is picked
/// up by every request after it.
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
    token: Option<Token>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Client<T> {
        Client {
            transport,
            token: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub(crate) fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn get(&self, path: &str) -> Result<Response, TransportError> {
        self.send(Request::new(Method::Get, path))
    }

    pub fn post(&self, path: &str, body: Value) -> Result<Response, TransportError> {
        self.send(Request::new(Method::Post, path).with_body(body))
    }

    pub fn delete(&self, path: &str, body: Value) -> Result<Response, TransportError> {
        self.send(Request::new(Method::Delete, path).with_body(body))
    }

    /// Send a request, attaching the current token unless the request
    /// already carries its own credentials.
    pub fn send(&self, mut request: Request) -> Result<Response, TransportError> {
        if request.credentials.is_none() {
            request.credentials = self
                .token
                .as_ref()
                .filter(|tok| !tok.is_empty())
                .map(|tok| Credentials::Bearer(tok.reveal_str().to_string()));
        }

        let response = self.transport.send(&request)?;

        if !response.is_success() {
            warn!(
                "{} {} failed with {}",
                request.method, request.path, response.status
            );
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    #[test]
    fn requests_carry_the_latest_token() {
        let transport = MockTransport::new();
        transport
            .respond(Method::Get, "repos", 200, json!({}))
            .respond(Method::Delete, "repo/a/b", 200, Value::Null);
        let mut client = Client::new(&transport);

        client.get("repos").unwrap();
        client.set_token(Token::new("first"));
        client.get("repos").unwrap();
        client.set_token(Token::new("second"));
        client.delete("repo/a/b", Value::Null).unwrap();

        let sent: Vec<_> = transport
            .requests()
            .into_iter()
            .map(|r| r.credentials)
            .collect();
        assert_eq!(
            sent,
            vec![
                None,
                Some(Credentials::Bearer(String::from("first"))),
                Some(Credentials::Bearer(String::from("second"))),
            ]
        );
    }

    #[test]
    fn explicit_credentials_win() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, "token", 200, json!({"token": "x"}));
        let mut client = Client::new(&transport);
        client.set_token(Token::new("stale"));

        let basic = Credentials::Basic {
            username: String::from("admin"),
            password: String::from("hunter2"),
        };
        client
            .send(Request::new(Method::Get, "token").with_credentials(basic.clone()))
            .unwrap();

        assert_eq!(transport.requests()[0].credentials, Some(basic));
    }

    #[test]
    fn an_empty_token_sends_no_header() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, "repos", 200, json!({}));
        let mut client = Client::new(&transport);
        client.set_token(Token::new(""));

        client.get("repos").unwrap();

        assert!(client.is_authenticated());
        assert_eq!(transport.requests()[0].credentials, None);
    }
}
