//! The view model: repositories, their builds and the raw shapes the server
//! sends over the wire.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::errors::{FetchError, ParseKeyError};

/// The `(namespace, name)` pair which uniquely identifies a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub namespace: String,
    pub name: String,
}

impl RepoKey {
    pub fn new<N, M>(namespace: N, name: M) -> RepoKey
    where
        N: Into<String>,
        M: Into<String>,
    {
        RepoKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The API path for this repository (`repo/{namespace}/{name}`).
    pub fn path(&self) -> String {
        format!("repo/{}/{}", self.namespace, self.name)
    }
}

impl Display for RepoKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for RepoKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<RepoKey, ParseKeyError> {
        let mut split = s.split('/');

        match (split.next(), split.next(), split.next()) {
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(RepoKey::new(ns, name))
            }
            _ => Err(ParseKeyError {
                input: s.to_string(),
            }),
        }
    }
}

/// A file published alongside a build.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub name: String,
    /// Human readable size, as reported by the server (e.g. `"1.2M"`).
    pub size: String,
}

/// A single build, keyed by its commit hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Build {
    commit: String,
    pub id: i64,
    pub name: String,
    pub date: DateTime<Utc>,
    pub branch: String,
    pub files: Vec<File>,
    pub link: String,
}

impl Build {
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// The abbreviated commit hash shown in listings.
    pub fn short_commit(&self) -> &str {
        match self.commit.char_indices().nth(7) {
            Some((ix, _)) => &self.commit[..ix],
            None => &self.commit,
        }
    }
}

/// Builds in the order they were first seen, indexed by commit hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildIndex {
    builds: Vec<Build>,
    positions: HashMap<String, usize>,
}

impl BuildIndex {
    /// Insert a build, replacing (in place) any earlier record with the same
    /// commit hash.
    pub fn insert(&mut self, build: Build) -> Option<Build> {
        match self.positions.get(build.commit()) {
            Some(&ix) => Some(std::mem::replace(&mut self.builds[ix], build)),
            None => {
                self.positions
                    .insert(build.commit().to_string(), self.builds.len());
                self.builds.push(build);
                None
            }
        }
    }

    pub fn get(&self, commit: &str) -> Option<&Build> {
        self.positions.get(commit).map(|&ix| &self.builds[ix])
    }

    pub fn contains(&self, commit: &str) -> bool {
        self.positions.contains_key(commit)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Build> {
        self.builds.iter()
    }

    pub fn commits(&self) -> impl Iterator<Item = &str> {
        self.builds.iter().map(Build::commit)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    key: RepoKey,
    /// Has a secret been provisioned for this repository?
    pub secret: bool,
    pub branches: Vec<String>,
    pub build_page_count: u32,
    builds: BuildIndex,
}

impl Repository {
    pub fn new(key: RepoKey) -> Repository {
        Repository {
            key,
            secret: false,
            branches: Vec::new(),
            build_page_count: 0,
            builds: BuildIndex::default(),
        }
    }

    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn builds(&self) -> &BuildIndex {
        &self.builds
    }

    pub(crate) fn insert_build(&mut self, build: Build) -> Option<Build> {
        self.builds.insert(build)
    }

    /// The most recent build by date. Ties go to whichever was seen first.
    pub fn latest_build(&self) -> Option<&Build> {
        self.builds.iter().fold(None, |latest, build| match latest {
            Some(current) if current.date >= build.date => Some(current),
            _ => Some(build),
        })
    }
}

/// Parse a date the way the server may send it: RFC 3339, a naive ISO-8601
/// timestamp (assumed UTC), or seconds since the epoch as either a string or
/// a number.
pub fn parse_date(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<i64>() {
        return from_epoch(secs);
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawFile {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawBuild {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: Value,
    #[serde(rename = "Branch")]
    pub branch: String,
    #[serde(rename = "Files")]
    pub files: Option<Vec<RawFile>>,
    #[serde(rename = "Link")]
    pub link: String,
}

impl RawBuild {
    /// Convert into a [`Build`], parsing the date exactly once.
    pub fn into_build(self, commit: String) -> Result<Build, FetchError> {
        let date = match parse_date(&self.date) {
            Some(d) => d,
            None => {
                return Err(FetchError::MalformedDate {
                    commit,
                    raw: self.date.to_string(),
                })
            }
        };

        let files = self
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|f| File {
                name: f.name,
                size: f.size,
            })
            .collect();

        Ok(Build {
            commit,
            id: self.id,
            name: self.name,
            date,
            branch: self.branch,
            files,
            link: self.link,
        })
    }
}

/// An entry in the `GET /repos` listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawRepo {
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Builds")]
    pub builds: Option<HashMap<String, RawBuild>>,
    #[serde(rename = "Secret")]
    pub secret: bool,
}

/// The response from `GET /repo/{namespace}/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RepoMeta {
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Branches")]
    pub branches: Option<Vec<String>>,
    #[serde(rename = "BuildPageCount")]
    pub build_page_count: u32,
}

/// One page of the build feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildsPage {
    #[serde(rename = "Order")]
    pub order: Option<Vec<String>>,
    #[serde(rename = "Builds")]
    pub builds: Option<HashMap<String, RawBuild>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewKeyRequest {
    #[serde(rename = "NewSecret")]
    pub new_secret: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NewKeyResponse {
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TokenResponse {
    pub token: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
pub(crate) fn build(commit: &str, branch: &str, date: &str) -> Build {
    RawBuild {
        branch: branch.to_string(),
        date: Value::String(date.to_string()),
        ..Default::default()
    }
    .into_build(commit.to_string())
    .unwrap()
}
