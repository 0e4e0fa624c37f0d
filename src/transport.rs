//! Getting requests to the server and responses back.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

use crate::errors::TransportError;

#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        };

        f.write_str(name)
    }
}

#[derive(Clone, PartialEq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Credentials::Basic { ref username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"XXXXXXXXXX")
                .finish(),
            Credentials::Bearer(_) => f.debug_tuple("Bearer").field(&"XXXXXXXXXX").finish(),
        }
    }
}

/// A request, relative to the server's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub credentials: Option<Credentials>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new<S: Into<String>>(method: Method, path: S) -> Request {
        Request {
            method,
            path: path.into(),
            credentials: None,
            body: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Request {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_body(mut self, body: Value) -> Request {
        self.body = Some(body);
        self
    }
}

/// A response whose body has already been parsed. Bodies which aren't JSON
/// show up as [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Response {
        Response { status, body }
    }

    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn json<D: DeserializeOwned>(&self) -> Result<D, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }

    /// The server puts failure messages in an `error` field.
    pub fn error_message(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .filter(|msg| !msg.is_empty())
    }
}

/// Something which can carry a [`Request`] to the server.
///
/// Every call resolves exactly once, either with the server's response
/// (whatever its status) or with the reason it never arrived.
pub trait Transport {
    fn send(&self, request: &Request) -> Result<Response, TransportError>;
}

impl<'a, T: Transport + ?Sized> Transport for &'a T {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).send(request)
    }
}

/// A [`Transport`] which goes over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
    base_url: String,
}

impl HttpTransport {
    pub fn new<S: Into<String>>(base_url: S) -> HttpTransport {
        HttpTransport {
            client: HttpClient::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let url = self.url_for(&request.path);
        debug!("Sending {} request to {:?}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder.header(CONTENT_TYPE, "application/json; charset=UTF-8");

        builder = match request.credentials {
            Some(Credentials::Basic {
                ref username,
                ref password,
            }) => builder.basic_auth(username, Some(password)),
            Some(Credentials::Bearer(ref token)) => {
                builder.header(AUTHORIZATION, format!("Bearer {}", STANDARD.encode(token)))
            }
            None => builder,
        };

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let built = builder.build().map_err(|cause| TransportError::Send {
            url: url.clone(),
            cause,
        })?;

        if log_enabled!(::log::Level::Trace) {
            trace!("Request Headers:");
            for (name, value) in built.headers() {
                if *name == AUTHORIZATION {
                    trace!("\t{}: XXXXXXXXXX", name);
                } else {
                    trace!("\t{}: {:?}", name, value);
                }
            }
        }

        let response = self.client.execute(built).map_err(|cause| TransportError::Send {
            url: url.clone(),
            cause,
        })?;

        let status = response.status();
        debug!("Received response ({})", status);

        let text = response.text().map_err(|cause| TransportError::Send {
            url: url.clone(),
            cause,
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(_) if !status.is_success() => Value::Null,
                Err(cause) => return Err(TransportError::Body { url, cause }),
            }
        };

        if log_enabled!(::log::Level::Trace) {
            trace!("Body:");
            for line in format!("{:#}", body).lines() {
                trace!("{}", line);
            }
        }

        Ok(Response::new(status.as_u16(), body))
    }
}

/// An in-memory [`Transport`] with canned responses, for exercising the
/// client without a server.
///
/// Responses for a route are handed out in the order they were registered,
/// with the last one repeating forever.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: RefCell<HashMap<(Method, String), VecDeque<Response>>>,
    sent: RefCell<Vec<Request>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    pub fn respond<S: Into<String>>(
        &self,
        method: Method,
        path: S,
        status: u16,
        body: Value,
    ) -> &MockTransport {
        self.routes
            .borrow_mut()
            .entry((method, path.into()))
            .or_insert_with(VecDeque::new)
            .push_back(Response::new(status, body));
        self
    }

    /// Every request sent so far.
    pub fn requests(&self) -> Vec<Request> {
        self.sent.borrow().clone()
    }

    /// The requests sent to a particular path.
    pub fn requests_to(&self, path: &str) -> Vec<Request> {
        self.sent
            .borrow()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.sent.borrow_mut().push(request.clone());

        let mut routes = self.routes.borrow_mut();
        let queue = routes
            .get_mut(&(request.method, request.path.clone()))
            .filter(|q| !q.is_empty())
            .ok_or_else(|| TransportError::NoRoute {
                method: request.method,
                path: request.path.clone(),
            })?;

        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_else(|| Response::new(500, Value::Null)))
        } else {
            Ok(queue[0].clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_messages_come_from_the_body() {
        let resp = Response::new(401, json!({"error": "Unauthorized"}));
        assert_eq!(resp.error_message(), Some("Unauthorized"));

        let resp = Response::new(500, json!({"error": ""}));
        assert_eq!(resp.error_message(), None);

        let resp = Response::new(500, Value::Null);
        assert_eq!(resp.error_message(), None);
        assert!(!resp.is_success());
    }

    #[test]
    fn mock_responses_are_replayed_in_order() {
        let transport = MockTransport::new();
        transport
            .respond(Method::Get, "repos", 500, Value::Null)
            .respond(Method::Get, "repos", 200, json!({}));
        let req = Request::new(Method::Get, "repos");

        assert_eq!(transport.send(&req).unwrap().status, 500);
        assert_eq!(transport.send(&req).unwrap().status, 200);
        assert_eq!(transport.send(&req).unwrap().status, 200);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn unknown_routes_are_an_error() {
        let transport = MockTransport::new();
        let req = Request::new(Method::Delete, "repo/a/b");

        match transport.send(&req) {
            Err(TransportError::NoRoute { method, path }) => {
                assert_eq!(method, Method::Delete);
                assert_eq!(path, "repo/a/b");
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn credentials_are_redacted_when_printed() {
        let creds = Credentials::Basic {
            username: String::from("admin"),
            password: String::from("hunter2"),
        };
        let printed = format!("{:?}", creds);

        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
        assert!(!format!("{:?}", Credentials::Bearer(String::from("t0k3n"))).contains("t0k3n"));
    }

    #[test]
    fn urls_are_joined_with_a_single_slash() {
        let transport = HttpTransport::new("http://localhost:8059/");

        assert_eq!(transport.url_for("/repos"), "http://localhost:8059/repos");
        assert_eq!(transport.url_for("token"), "http://localhost:8059/token");
    }
}
