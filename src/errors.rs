//! The errors encountered in this crate.

use crate::model::RepoKey;
use crate::transport::Method;

/// Something went wrong while talking to the server.
#[derive(Debug, Fail)]
pub enum TransportError {
    #[fail(display = "Unable to send a request to {}", url)]
    Send {
        url: String,
        #[cause]
        cause: reqwest::Error,
    },
    #[fail(display = "Unable to parse the response from {}", url)]
    Body {
        url: String,
        #[cause]
        cause: serde_json::Error,
    },
    #[fail(display = "Nothing is listening for {} {}", method, path)]
    NoRoute { method: Method, path: String },
}

#[derive(Debug, Fail)]
pub enum AuthError {
    /// The server refused the credentials.
    #[fail(display = "{}", message)]
    Rejected { status: u16, message: String },
    #[fail(display = "The server accepted the login but didn't send a token")]
    MissingToken,
    #[fail(display = "The silent login probe has already been used")]
    ProbeAlreadyUsed,
    #[fail(display = "Unable to reach the server")]
    Transport(#[cause] TransportError),
}

impl From<TransportError> for AuthError {
    fn from(other: TransportError) -> AuthError {
        AuthError::Transport(other)
    }
}

#[derive(Debug, Fail)]
pub enum FetchError {
    /// The server responded with a non-successful status code.
    #[fail(display = "Request for {} failed with {}", path, status)]
    Http { path: String, status: u16 },
    /// A single build had a date we couldn't make sense of.
    #[fail(display = "Build {} has a malformed date: {}", commit, raw)]
    MalformedDate { commit: String, raw: String },
    #[fail(display = "Unable to understand the response for {}", path)]
    Decode {
        path: String,
        #[cause]
        cause: serde_json::Error,
    },
    #[fail(
        display = "Page {} of {} was requested out of order (expected page {})",
        requested, key, expected
    )]
    OutOfOrder {
        key: RepoKey,
        requested: u32,
        expected: u32,
    },
    /// The previous page hasn't been merged yet.
    #[fail(display = "Page {} of {} is still being fetched", page, key)]
    InFlight { key: RepoKey, page: u32 },
    #[fail(display = "A ticket for {} can't be merged into {}", ticket, repo)]
    WrongRepository { ticket: RepoKey, repo: RepoKey },
    #[fail(display = "{} only has {} pages of builds", key, page_count)]
    NoMorePages { key: RepoKey, page_count: u32 },
    #[fail(display = "Unknown repository: {}", _0)]
    UnknownRepository(RepoKey),
    #[fail(display = "Unable to reach the server")]
    Transport(#[cause] TransportError),
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        match *self {
            FetchError::Http { status, .. } => status == 401,
            _ => false,
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(other: TransportError) -> FetchError {
        FetchError::Transport(other)
    }
}

#[derive(Debug, Fail)]
pub enum ProvisionError {
    /// The server refused to issue a key.
    #[fail(display = "Issuing a key for {} failed with {}", key, status)]
    Http { key: RepoKey, status: u16 },
    #[fail(display = "Unable to understand the new key for {}", key)]
    Decode {
        key: RepoKey,
        #[cause]
        cause: serde_json::Error,
    },
    #[fail(display = "A key is already being requested for {}", _0)]
    Busy(RepoKey),
    #[fail(display = "{} isn't waiting for a confirmation", _0)]
    NotAwaitingConfirmation(RepoKey),
    #[fail(display = "There is no key on display for {}", _0)]
    NothingDisclosed(RepoKey),
    #[fail(display = "Unknown repository: {}", _0)]
    UnknownRepository(RepoKey),
    #[fail(display = "Unable to copy the key to the clipboard: {}", reason)]
    Clipboard { reason: String },
    #[fail(display = "Unable to reach the server")]
    Transport(#[cause] TransportError),
}

impl ProvisionError {
    pub fn is_unauthorized(&self) -> bool {
        match *self {
            ProvisionError::Http { status, .. } => status == 401,
            _ => false,
        }
    }
}

impl From<TransportError> for ProvisionError {
    fn from(other: TransportError) -> ProvisionError {
        ProvisionError::Transport(other)
    }
}

#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "No builds have been seen on the \"{}\" branch", branch)]
pub struct UnknownBranch {
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "\"{}\" isn't of the form \"namespace/name\"", input)]
pub struct ParseKeyError {
    pub input: String,
}
