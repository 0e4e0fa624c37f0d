//! Paging through a repository's builds.
//!
//! Pages are strictly sequential: the next page can only be requested once
//! the previous one has been merged, so "has more" is only ever offered for a
//! repository with nothing in flight.

use std::collections::HashMap;

use crate::client::Client;
use crate::errors::FetchError;
use crate::model::{BuildsPage, RawBuild, RepoKey, RepoMeta, Repository};
use crate::transport::Transport;

#[derive(Debug, Copy, Clone, Default, PartialEq)]
struct Cursor {
    current_page: u32,
    page_count: u32,
    in_flight: Option<u32>,
}

impl Cursor {
    fn next_page(&self) -> u32 {
        self.current_page + 1
    }

    fn has_more(&self) -> bool {
        self.in_flight.is_none() && self.next_page() <= self.page_count
    }
}

/// A ticket for one page of builds, handed out by
/// [`BuildFeedSynchronizer::begin_page()`] and redeemed by
/// [`BuildFeedSynchronizer::complete_page()`].
#[derive(Debug, PartialEq)]
pub struct PageRequest {
    key: RepoKey,
    page: u32,
}

impl PageRequest {
    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn path(&self) -> String {
        format!("{}/builds/{}", self.key.path(), self.page)
    }
}

/// The result of merging some builds into a repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub page: u32,
    /// Commits which made it into the index, in feed order.
    pub merged: Vec<String>,
    /// Commits which were thrown away because of bad data.
    pub dropped: Vec<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildFeedSynchronizer {
    cursors: HashMap<RepoKey, Cursor>,
}

impl BuildFeedSynchronizer {
    pub fn new() -> BuildFeedSynchronizer {
        BuildFeedSynchronizer::default()
    }

    /// Fetch a repository's branches and page count, resetting its cursor
    /// back to the start.
    pub fn fetch_metadata<T: Transport>(
        &mut self,
        client: &Client<T>,
        repo: &mut Repository,
    ) -> Result<RepoMeta, FetchError> {
        let path = repo.key().path();
        debug!("Fetching the metadata for {}", repo.key());

        let response = client.get(&path)?;
        if !response.is_success() {
            return Err(FetchError::Http {
                path,
                status: response.status,
            });
        }

        let meta: RepoMeta = response
            .json()
            .map_err(|cause| FetchError::Decode { path, cause })?;

        repo.branches = meta.branches.clone().unwrap_or_default();
        repo.build_page_count = meta.build_page_count;
        self.cursors.insert(
            repo.key().clone(),
            Cursor {
                current_page: 0,
                page_count: meta.build_page_count,
                in_flight: None,
            },
        );

        debug!(
            "{} has {} pages of builds across {} branches",
            repo.key(),
            meta.build_page_count,
            repo.branches.len()
        );

        Ok(meta)
    }

    /// The last page successfully merged (`0` if none).
    pub fn current_page(&self, key: &RepoKey) -> u32 {
        self.cursors.get(key).map(|c| c.current_page).unwrap_or(0)
    }

    /// Can another page be requested right now?
    pub fn has_more(&self, key: &RepoKey) -> bool {
        self.cursors.get(key).map(Cursor::has_more).unwrap_or(false)
    }

    pub fn is_in_flight(&self, key: &RepoKey) -> bool {
        self.cursors
            .get(key)
            .map(|c| c.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Claim the next page for a repository.
    pub fn begin_page(&mut self, key: &RepoKey) -> Result<PageRequest, FetchError> {
        let cursor = self
            .cursors
            .get_mut(key)
            .ok_or_else(|| FetchError::UnknownRepository(key.clone()))?;

        if let Some(page) = cursor.in_flight {
            return Err(FetchError::InFlight {
                key: key.clone(),
                page,
            });
        }

        let page = cursor.next_page();
        if page > cursor.page_count {
            return Err(FetchError::NoMorePages {
                key: key.clone(),
                page_count: cursor.page_count,
            });
        }

        trace!("Claimed page {} of {}", page, key);
        cursor.in_flight = Some(page);

        Ok(PageRequest {
            key: key.clone(),
            page,
        })
    }

    /// Hand back a page's result. A failure leaves the cursor where it was
    /// so the same page can be requested again.
    ///
    /// The ticket must belong to `repo`. Otherwise nothing is merged and the
    /// ticket's page is released so it can be claimed again.
    pub fn complete_page(
        &mut self,
        request: PageRequest,
        result: Result<BuildsPage, FetchError>,
        repo: &mut Repository,
    ) -> Result<MergeOutcome, FetchError> {
        let cursor = self
            .cursors
            .get_mut(&request.key)
            .ok_or_else(|| FetchError::UnknownRepository(request.key.clone()))?;
        cursor.in_flight = None;

        if request.key != *repo.key() {
            return Err(FetchError::WrongRepository {
                ticket: request.key,
                repo: repo.key().clone(),
            });
        }

        let page = result?;
        let (merged, dropped) = merge_page(repo, page);
        cursor.current_page = request.page;

        let outcome = MergeOutcome {
            page: request.page,
            merged,
            dropped,
            has_more: cursor.has_more(),
        };

        debug!(
            "Merged page {} of {} ({} builds, {} dropped)",
            outcome.page,
            request.key,
            outcome.merged.len(),
            outcome.dropped.len()
        );

        Ok(outcome)
    }

    /// Fetch and merge a specific page, which must be the next one.
    pub fn fetch_page<T: Transport>(
        &mut self,
        client: &Client<T>,
        repo: &mut Repository,
        page: u32,
    ) -> Result<MergeOutcome, FetchError> {
        let expected = self.current_page(repo.key()) + 1;
        if page != expected {
            return Err(FetchError::OutOfOrder {
                key: repo.key().clone(),
                requested: page,
                expected,
            });
        }

        let request = self.begin_page(repo.key())?;
        let result = request_page(client, &request);
        self.complete_page(request, result, repo)
    }

    pub fn load_next_page<T: Transport>(
        &mut self,
        client: &Client<T>,
        repo: &mut Repository,
    ) -> Result<MergeOutcome, FetchError> {
        let next = self.current_page(repo.key()) + 1;
        self.fetch_page(client, repo, next)
    }
}

pub fn request_page<T: Transport>(
    client: &Client<T>,
    request: &PageRequest,
) -> Result<BuildsPage, FetchError> {
    let path = request.path();
    let response = client.get(&path)?;

    if !response.is_success() {
        return Err(FetchError::Http {
            path,
            status: response.status,
        });
    }

    response
        .json()
        .map_err(|cause| FetchError::Decode { path, cause })
}

/// Merge one page of builds into a repository, in the page's `Order`.
///
/// Merging is keyed on commit hash, so applying the same page twice leaves
/// the repository as it was after the first time.
pub fn merge_page(repo: &mut Repository, page: BuildsPage) -> (Vec<String>, Vec<String>) {
    let order = page.order.unwrap_or_default();
    let mut builds = page.builds.unwrap_or_default();

    let mut entries = Vec::with_capacity(order.len());
    for commit in order {
        match builds.remove(&commit) {
            Some(raw) => entries.push((commit, raw)),
            None => warn!("{} is in the page order but has no build", commit),
        }
    }

    if !builds.is_empty() {
        warn!(
            "Ignoring {} builds which weren't in the page order",
            builds.len()
        );
    }

    merge_entries(repo, entries)
}

/// Merge the unordered build mapping that comes with the repository
/// listing. The newest builds go first.
pub fn merge_builds(
    repo: &mut Repository,
    builds: HashMap<String, RawBuild>,
) -> (Vec<String>, Vec<String>) {
    let mut entries: Vec<_> = builds.into_iter().collect();
    entries.sort_by(|(left_commit, left), (right_commit, right)| {
        let left_date = crate::model::parse_date(&left.date);
        let right_date = crate::model::parse_date(&right.date);
        right_date
            .cmp(&left_date)
            .then_with(|| left_commit.cmp(right_commit))
    });

    merge_entries(repo, entries)
}

fn merge_entries(
    repo: &mut Repository,
    entries: Vec<(String, RawBuild)>,
) -> (Vec<String>, Vec<String>) {
    let mut merged = Vec::new();
    let mut dropped = Vec::new();

    for (commit, raw) in entries {
        if commit.is_empty() {
            warn!("Skipping a build with no commit hash in {}", repo.key());
            continue;
        }

        match raw.into_build(commit.clone()) {
            Ok(build) => {
                repo.insert_build(build);
                merged.push(commit);
            }
            Err(e) => {
                warn!("Dropping a build from {}, {}", repo.key(), e);
                dropped.push(commit);
            }
        }
    }

    (merged, dropped)
}
