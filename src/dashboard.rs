//! The engine behind the dashboard, tying the individual components
//! together.
//!
//! A [`Dashboard`] owns all session state. Anything which changes is
//! announced as an [`Event`] so whatever is drawing the dashboard can keep up
//! without polling.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::auth::{LoginPrompt, SessionAuthenticator};
use crate::client::Client;
use crate::config::Timing;
use crate::errors::{AuthError, FetchError, ProvisionError, UnknownBranch};
use crate::feed::{self, BuildFeedSynchronizer, MergeOutcome};
use crate::model::{RawRepo, RepoKey, Repository};
use crate::order;
use crate::partition::{BranchPartition, BranchPartitioner};
use crate::provision::{
    Clipboard, Phase, ProvisionRequest, SecretEvent, SecretProvisioningWorkflow, SecretSession,
    SecretTimer, Step,
};
use crate::scheduler::{Scheduler, TimerId};
use crate::transport::Transport;

/// Everything the dashboard may need waking up for.
#[derive(Debug, Clone, PartialEq)]
pub enum Deadline {
    LoginError,
    Secret(SecretTimer),
}

impl From<SecretTimer> for Deadline {
    fn from(other: SecretTimer) -> Deadline {
        Deadline::Secret(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Authenticated,
    /// The login prompt needs to be shown, possibly with an error message.
    LoginRequired { message: Option<String> },
    LoginPromptReset,
    RepositoriesOrdered { order: Vec<RepoKey> },
    MetadataLoaded { key: RepoKey, page_count: u32 },
    PageMerged {
        key: RepoKey,
        page: u32,
        merged: usize,
        dropped: usize,
        has_more: bool,
    },
    BranchDiscovered { key: RepoKey, branch: String },
    BranchActivated { key: RepoKey, branch: String },
    Secret(SecretEvent),
}

#[derive(Debug)]
pub struct Dashboard<T> {
    client: Client<T>,
    auth: SessionAuthenticator,
    repos: BTreeMap<RepoKey, Repository>,
    order: Vec<RepoKey>,
    feed: BuildFeedSynchronizer,
    branches: HashMap<RepoKey, BranchPartitioner>,
    secrets: SecretProvisioningWorkflow,
    scheduler: Scheduler<Deadline>,
    login_timer: Option<TimerId>,
    timing: Timing,
    events: Vec<Event>,
}

impl<T: Transport> Dashboard<T> {
    pub fn new(transport: T, timing: Timing) -> Dashboard<T> {
        Dashboard {
            client: Client::new(transport),
            auth: SessionAuthenticator::new(),
            repos: BTreeMap::new(),
            order: Vec::new(),
            feed: BuildFeedSynchronizer::new(),
            branches: HashMap::new(),
            secrets: SecretProvisioningWorkflow::new(timing),
            scheduler: Scheduler::new(),
            login_timer: None,
            timing,
            events: Vec::new(),
        }
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    /// Kick things off by checking whether we're already logged in. Returns
    /// `true` if we are, in which case the repositories are loaded straight
    /// away.
    pub fn start(&mut self) -> bool {
        match self.auth.silent_probe(&mut self.client) {
            Ok(_) => {
                self.on_authenticated();
                true
            }
            Err(_) => {
                self.events.push(Event::LoginRequired { message: None });
                false
            }
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), AuthError> {
        if let Some(timer) = self.login_timer.take() {
            self.scheduler.cancel(timer);
        }

        match self.auth.authenticate(&mut self.client, username, password) {
            Ok(_) => {
                self.on_authenticated();
                Ok(())
            }
            Err(e) => {
                let message = self.auth.prompt().label().to_string();
                self.login_timer = Some(
                    self.scheduler
                        .schedule(self.timing.login_error(), Deadline::LoginError),
                );
                self.events.push(Event::LoginRequired {
                    message: Some(message),
                });
                Err(e)
            }
        }
    }

    pub fn login_prompt(&self) -> &LoginPrompt {
        self.auth.prompt()
    }

    fn on_authenticated(&mut self) {
        info!("Logged in");
        self.events.push(Event::Authenticated);

        // the repositories simply stay empty until the next attempt
        if let Err(e) = self.load_repositories() {
            warn!("Unable to load the repositories, {}", e);
        }
    }

    /// Fetch the list of repositories (and whatever builds come with it).
    pub fn load_repositories(&mut self) -> Result<(), FetchError> {
        info!("Fetching repositories");
        let response = self.client.get("repos")?;

        if !response.is_success() {
            let err = FetchError::Http {
                path: String::from("repos"),
                status: response.status,
            };
            self.check_unauthorized(err.is_unauthorized());
            return Err(err);
        }

        let listing: HashMap<String, RawRepo> =
            response.json().map_err(|cause| FetchError::Decode {
                path: String::from("repos"),
                cause,
            })?;

        for (name, raw) in listing {
            let key = if raw.namespace.is_empty() || raw.name.is_empty() {
                match name.parse() {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Skipping a repository, {}", e);
                        continue;
                    }
                }
            } else {
                RepoKey::new(raw.namespace, raw.name)
            };

            let repo = self
                .repos
                .entry(key.clone())
                .or_insert_with(|| Repository::new(key.clone()));
            repo.secret = raw.secret;

            let (merged, _) = feed::merge_builds(repo, raw.builds.unwrap_or_default());
            let partitioner = self.branches.entry(key.clone()).or_default();
            route(&key, repo, partitioner, &merged, &mut self.events);
        }

        info!("Found {} repositories", self.repos.len());
        self.reorder();

        Ok(())
    }

    /// Fetch a repository's branches and page count, getting it ready to
    /// page through its builds.
    pub fn open_repository(&mut self, key: &RepoKey) -> Result<(), FetchError> {
        let repo = self
            .repos
            .entry(key.clone())
            .or_insert_with(|| Repository::new(key.clone()));

        let result = self.feed.fetch_metadata(&self.client, repo);
        let meta = match result {
            Ok(meta) => meta,
            Err(e) => {
                self.check_unauthorized(e.is_unauthorized());
                return Err(e);
            }
        };

        let partitioner = self.branches.entry(key.clone()).or_default();
        let previous = partitioner.active_branch().map(String::from);
        partitioner.declare(&repo.branches);

        self.events.push(Event::MetadataLoaded {
            key: key.clone(),
            page_count: meta.build_page_count,
        });
        announce_active(key, previous, partitioner, &mut self.events);
        self.reorder();

        Ok(())
    }

    /// Fetch the next page of builds for a repository.
    pub fn load_next_page(&mut self, key: &RepoKey) -> Result<MergeOutcome, FetchError> {
        let repo = self
            .repos
            .get_mut(key)
            .ok_or_else(|| FetchError::UnknownRepository(key.clone()))?;

        let outcome = match self.feed.load_next_page(&self.client, repo) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.check_unauthorized(e.is_unauthorized());
                return Err(e);
            }
        };

        self.events.push(Event::PageMerged {
            key: key.clone(),
            page: outcome.page,
            merged: outcome.merged.len(),
            dropped: outcome.dropped.len(),
            has_more: outcome.has_more,
        });

        let partitioner = self.branches.entry(key.clone()).or_default();
        route(key, repo, partitioner, &outcome.merged, &mut self.events);
        self.reorder();

        Ok(outcome)
    }

    pub fn has_more(&self, key: &RepoKey) -> bool {
        self.feed.has_more(key)
    }

    pub fn activate_branch(&mut self, key: &RepoKey, branch: &str) -> Result<(), UnknownBranch> {
        let partitioner = self.branches.get_mut(key).ok_or_else(|| UnknownBranch {
            branch: branch.to_string(),
        })?;

        partitioner.activate(branch)?;
        self.events.push(Event::BranchActivated {
            key: key.clone(),
            branch: branch.to_string(),
        });

        Ok(())
    }

    /// Ask for a build key. Rotating the secret waits for
    /// [`Dashboard::confirm_key()`] before anything is sent.
    pub fn request_key(&mut self, key: &RepoKey, as_new_secret: bool) -> Result<Phase, ProvisionError> {
        let repo = self
            .repos
            .get(key)
            .ok_or_else(|| ProvisionError::UnknownRepository(key.clone()))?;

        let step = self.secrets.request(repo, as_new_secret, &mut self.scheduler);
        self.flush_secret_events();

        match step? {
            Step::AwaitingConfirmation => Ok(Phase::ConfirmPending),
            Step::Send(request) => self.send_key_request(request),
        }
    }

    pub fn confirm_key(&mut self, key: &RepoKey) -> Result<Phase, ProvisionError> {
        let request = self.secrets.confirm(key, &mut self.scheduler);
        self.flush_secret_events();

        self.send_key_request(request?)
    }

    pub fn cancel_key(&mut self, key: &RepoKey) -> Result<(), ProvisionError> {
        let result = self.secrets.cancel(key);
        self.flush_secret_events();
        result
    }

    pub fn copy_key<C>(&mut self, key: &RepoKey, clipboard: &mut C) -> Result<(), ProvisionError>
    where
        C: Clipboard + ?Sized,
    {
        let result = self.secrets.copy(key, clipboard, &mut self.scheduler);
        self.flush_secret_events();
        result
    }

    fn send_key_request(
        &mut self,
        request: ProvisionRequest,
    ) -> Result<Phase, ProvisionError> {
        let key = request.key().clone();
        let was_configured = self.repos.get(&key).map(|r| r.secret).unwrap_or(false);

        let result = match self.repos.get_mut(&key) {
            Some(repo) => self
                .secrets
                .send(&self.client, request, repo, &mut self.scheduler),
            None => Err(ProvisionError::UnknownRepository(key.clone())),
        };
        self.flush_secret_events();

        if let Err(ref e) = result {
            self.check_unauthorized(e.is_unauthorized());
        }

        let now_configured = self.repos.get(&key).map(|r| r.secret).unwrap_or(false);
        if now_configured != was_configured {
            self.reorder();
        }

        result.map(|_| self.secrets.phase(&key))
    }

    /// Let time pass, firing any timers which come due along the way.
    pub fn advance(&mut self, by: Duration) {
        let until = self.scheduler.now() + by;

        while let Some((id, deadline)) = self.scheduler.pop_due(until) {
            match deadline {
                Deadline::LoginError => {
                    if self.login_timer == Some(id) {
                        self.login_timer = None;
                        self.auth.reset_prompt();
                        self.events.push(Event::LoginPromptReset);
                    }
                }
                Deadline::Secret(timer) => {
                    self.secrets.on_timer(id, timer);
                    self.flush_secret_events();
                }
            }
        }

        self.scheduler.advance_to(until);
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// When the next timer is due, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.next_deadline()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Repository keys in display order.
    pub fn order(&self) -> &[RepoKey] {
        &self.order
    }

    pub fn repository(&self, key: &RepoKey) -> Option<&Repository> {
        self.repos.get(key)
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.order.iter().filter_map(move |key| self.repos.get(key))
    }

    pub fn partitions(&self, key: &RepoKey) -> &[BranchPartition] {
        self.branches
            .get(key)
            .map(|p| p.partitions())
            .unwrap_or(&[])
    }

    pub fn active_partition(&self, key: &RepoKey) -> Option<&BranchPartition> {
        self.branches.get(key).and_then(|p| p.active())
    }

    pub fn active_branch(&self, key: &RepoKey) -> Option<&str> {
        self.branches.get(key).and_then(|p| p.active_branch())
    }

    pub fn secret_session(&self, key: &RepoKey) -> Option<&SecretSession> {
        self.secrets.session(key)
    }

    pub fn secret_phase(&self, key: &RepoKey) -> Phase {
        self.secrets.phase(key)
    }

    pub fn disclosed_secret(&self, key: &RepoKey) -> Option<&str> {
        self.secrets.secret(key)
    }

    fn reorder(&mut self) {
        let order = order::order(self.repos.values());

        if order != self.order {
            self.order = order;
            self.events.push(Event::RepositoriesOrdered {
                order: self.order.clone(),
            });
        }
    }

    fn flush_secret_events(&mut self) {
        let events = self.secrets.drain_events();
        self.events.extend(events.into_iter().map(Event::Secret));
    }

    fn check_unauthorized(&mut self, unauthorized: bool) {
        if unauthorized && self.client.is_authenticated() {
            warn!("The server no longer accepts our token");
            self.auth.require_login(&mut self.client);
            self.events.push(Event::LoginRequired { message: None });
        }
    }
}

/// Sort freshly merged builds into their branches.
fn route(
    key: &RepoKey,
    repo: &Repository,
    partitioner: &mut BranchPartitioner,
    commits: &[String],
    events: &mut Vec<Event>,
) {
    let previous = partitioner.active_branch().map(String::from);

    for commit in commits {
        let build = match repo.builds().get(commit) {
            Some(b) => b,
            None => continue,
        };

        let is_new = partitioner.partition(&build.branch).is_none();
        partitioner.classify(build);

        if is_new {
            events.push(Event::BranchDiscovered {
                key: key.clone(),
                branch: build.branch.clone(),
            });
        }
    }

    announce_active(key, previous, partitioner, events);
}

fn announce_active(
    key: &RepoKey,
    previous: Option<String>,
    partitioner: &BranchPartitioner,
    events: &mut Vec<Event>,
) {
    if let Some(active) = partitioner.active_branch() {
        if previous.as_ref().map(|s| s.as_str()) != Some(active) {
            events.push(Event::BranchActivated {
                key: key.clone(),
                branch: active.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Credentials, Method, MockTransport};
    use serde_json::{json, Value};

    fn key(name: &str) -> RepoKey {
        RepoKey::new("drone", name)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn listing() -> Value {
        json!({
            "drone/old": {
                "Namespace": "drone", "Name": "old", "Secret": true,
                "Builds": {"aaaaaaaa": {"Date": "2024-01-02T00:00:00Z", "Branch": "main"}},
            },
            "drone/new": {
                "Namespace": "drone", "Name": "new", "Secret": true,
                "Builds": {"bbbbbbbb": {"Date": "2024-01-05T00:00:00Z", "Branch": "main"}},
            },
            "drone/fresh": {
                "Namespace": "drone", "Name": "fresh", "Secret": false, "Builds": null,
            },
        })
    }

    fn logged_in(transport: &MockTransport) -> Dashboard<&MockTransport> {
        transport
            .respond(Method::Get, "token", 200, json!({"token": "t0k3n"}))
            .respond(Method::Get, "repos", 200, listing());

        let mut dashboard = Dashboard::new(transport, Timing::default());
        assert!(dashboard.start());
        dashboard
    }

    #[test]
    fn start_up_loads_and_orders_the_repositories() {
        let transport = MockTransport::new();
        let mut dashboard = logged_in(&transport);

        assert_eq!(
            dashboard.order(),
            &[key("new"), key("old"), key("fresh")][..]
        );
        let events = dashboard.drain_events();
        assert_eq!(events[0], Event::Authenticated);
        assert!(events.contains(&Event::RepositoriesOrdered {
            order: vec![key("new"), key("old"), key("fresh")]
        }));
        assert_eq!(
            transport.requests_to("repos")[0].credentials,
            Some(Credentials::Bearer(String::from("t0k3n")))
        );
    }

    #[test]
    fn a_failed_probe_asks_for_a_login() {
        let transport = MockTransport::new();
        transport
            .respond(Method::Get, "token", 401, json!({"error": "Unauthorized"}))
            .respond(Method::Get, "token", 200, json!({"token": "t0k3n"}))
            .respond(Method::Get, "repos", 200, listing());
        let mut dashboard = Dashboard::new(&transport, Timing::default());

        assert!(!dashboard.start());
        assert!(dashboard.order().is_empty());
        assert_eq!(
            dashboard.drain_events(),
            vec![Event::LoginRequired { message: None }]
        );

        dashboard.login("admin", "hunter2").unwrap();
        assert_eq!(dashboard.order().len(), 3);
        assert!(!dashboard.login_prompt().is_visible());
    }

    #[test]
    fn login_errors_are_shown_for_a_while() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, "token", 401, json!({"error": "Wrong password"}));
        let mut dashboard = Dashboard::new(&transport, Timing::default());
        dashboard.start();

        dashboard.login("admin", "nope").unwrap_err();
        assert_eq!(dashboard.login_prompt().label(), "Wrong password");

        dashboard.advance(ms(3_999));
        assert_eq!(dashboard.login_prompt().label(), "Wrong password");
        dashboard.advance(ms(1));
        assert_eq!(dashboard.login_prompt().label(), "Login");
        assert!(dashboard.login_prompt().is_visible());
        assert_eq!(dashboard.drain_events().last(), Some(&Event::LoginPromptReset));
    }

    #[test]
    fn paging_through_a_repository() {
        let transport = MockTransport::new();
        transport
            .respond(
                Method::Get,
                "repo/drone/fresh",
                200,
                json!({"Branches": ["feature-x", "main", "dev"], "BuildPageCount": 2}),
            )
            .respond(
                Method::Get,
                "repo/drone/fresh/builds/1",
                200,
                json!({
                    "Order": ["c3", "c2"],
                    "Builds": {
                        "c3": {"Date": "2024-01-03T00:00:00Z", "Branch": "dev"},
                        "c2": {"Date": "2024-01-02T00:00:00Z", "Branch": "main"},
                    },
                }),
            )
            .respond(
                Method::Get,
                "repo/drone/fresh/builds/2",
                200,
                json!({
                    "Order": ["c1"],
                    "Builds": {"c1": {"Date": "2024-01-01T00:00:00Z", "Branch": "main"}},
                }),
            );
        let mut dashboard = logged_in(&transport);
        let fresh = key("fresh");

        dashboard.open_repository(&fresh).unwrap();
        assert_eq!(dashboard.active_branch(&fresh), None);
        assert!(dashboard.has_more(&fresh));

        dashboard.load_next_page(&fresh).unwrap();
        assert_eq!(dashboard.active_branch(&fresh), Some("main"));
        dashboard.load_next_page(&fresh).unwrap();
        assert!(!dashboard.has_more(&fresh));

        let main = dashboard.active_partition(&fresh).unwrap();
        assert_eq!(main.commits(), &["c2".to_string(), "c1".to_string()][..]);
        assert_eq!(dashboard.partitions(&fresh).len(), 2);

        dashboard.activate_branch(&fresh, "dev").unwrap();
        assert_eq!(dashboard.active_partition(&fresh).unwrap().commits().len(), 1);
        assert!(dashboard.activate_branch(&fresh, "feature-x").is_err());
    }

    #[test]
    fn provisioning_a_key_configures_the_repository() {
        let transport = MockTransport::new();
        transport.respond(Method::Post, "repo/drone/fresh/key", 200, json!({"Key": "k3y"}));
        let mut dashboard = logged_in(&transport);
        let fresh = key("fresh");
        dashboard.drain_events();

        let phase = dashboard.request_key(&fresh, false).unwrap();

        assert_eq!(phase, Phase::Disclosed);
        assert_eq!(dashboard.disclosed_secret(&fresh), Some("k3y"));
        assert!(dashboard.repository(&fresh).unwrap().secret);
        // configured with no builds sorts after configured with builds
        assert_eq!(
            dashboard.order(),
            &[key("new"), key("old"), key("fresh")][..]
        );

        dashboard.advance(ms(60_000));
        assert_eq!(dashboard.secret_phase(&fresh), Phase::Idle);
        assert_eq!(dashboard.disclosed_secret(&fresh), None);
        assert!(dashboard
            .drain_events()
            .contains(&Event::Secret(SecretEvent::Cleared { key: fresh.clone() })));
    }

    #[test]
    fn rotation_sends_nothing_until_confirmed() {
        let transport = MockTransport::new();
        transport.respond(Method::Post, "repo/drone/old/key", 200, json!({"Key": "k3y"}));
        let mut dashboard = logged_in(&transport);
        let old = key("old");

        assert_eq!(dashboard.request_key(&old, true).unwrap(), Phase::ConfirmPending);
        assert!(transport.requests_to("repo/drone/old/key").is_empty());

        dashboard.cancel_key(&old).unwrap();
        assert!(transport.requests_to("repo/drone/old/key").is_empty());
        assert!(dashboard.repository(&old).unwrap().secret);

        dashboard.request_key(&old, true).unwrap();
        assert_eq!(dashboard.confirm_key(&old).unwrap(), Phase::Disclosed);
        let sent = transport.requests_to("repo/drone/old/key");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, Some(json!({"NewSecret": true})));
    }

    #[test]
    fn a_401_brings_back_the_login_prompt() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, "repo/drone/old", 401, json!({"error": "Unauthorized"}));
        let mut dashboard = logged_in(&transport);
        dashboard.drain_events();

        let err = dashboard.open_repository(&key("old")).unwrap_err();

        assert!(err.is_unauthorized());
        assert!(!dashboard.client().is_authenticated());
        assert!(dashboard.login_prompt().is_visible());
        assert_eq!(
            dashboard.drain_events(),
            vec![Event::LoginRequired { message: None }]
        );
    }

    #[test]
    fn failed_key_requests_leave_the_repo_alone() {
        let transport = MockTransport::new();
        transport.respond(Method::Post, "repo/drone/fresh/key", 500, json!({"error": "boom"}));
        let mut dashboard = logged_in(&transport);
        let fresh = key("fresh");

        dashboard.request_key(&fresh, false).unwrap_err();

        assert_eq!(dashboard.secret_phase(&fresh), Phase::Failed);
        assert!(!dashboard.repository(&fresh).unwrap().secret);
        dashboard.advance(ms(3_000));
        assert_eq!(dashboard.secret_phase(&fresh), Phase::Idle);
        assert_eq!(
            dashboard.secret_session(&fresh).unwrap().trigger().label,
            "Setup"
        );
    }
}
