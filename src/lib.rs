//! A client for the buildrone build-artifact server.
//!
//! The [`Dashboard`] keeps track of everything a user sees: which
//! repositories exist (and in what order), the builds on each branch, and any
//! build keys being handed out. Timed behaviour runs off a virtual clock
//! which only moves when [`Dashboard::advance()`] is called.

extern crate base64;
extern crate chrono;
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
extern crate reqwest;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate toml;

#[cfg(test)]
extern crate tempfile;

pub mod auth;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod feed;
pub mod model;
pub mod order;
pub mod partition;
pub mod provision;
pub mod scheduler;
pub mod transport;

pub use crate::auth::{LoginPrompt, SessionAuthenticator};
pub use crate::client::{Client, Token};
pub use crate::config::{Config, General, Timing};
pub use crate::dashboard::{Dashboard, Deadline, Event};
pub use crate::errors::{AuthError, FetchError, ProvisionError, TransportError, UnknownBranch};
pub use crate::feed::{BuildFeedSynchronizer, MergeOutcome, PageRequest};
pub use crate::model::{Build, File, RepoKey, Repository};
pub use crate::partition::{BranchPartition, BranchPartitioner};
pub use crate::provision::{
    Clipboard, Phase, SecretEvent, SecretProvisioningWorkflow, SecretSession, SecretTimer,
};
pub use crate::scheduler::{Scheduler, TimerId};
pub use crate::transport::{HttpTransport, Transport};
