//! The order repositories are listed in.

use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};

use crate::model::{RepoKey, Repository};

/// Sort repositories for display.
///
/// Configured repositories come first. Configured repositories with builds
/// are ordered by their latest build, newest first, and go before configured
/// repositories without any builds. Everything left over is ordered by key,
/// so the result never depends on the order the repositories came in.
pub fn order<'a, I>(repositories: I) -> Vec<RepoKey>
where
    I: IntoIterator<Item = &'a Repository>,
{
    let mut repos: Vec<&Repository> = repositories.into_iter().collect();
    repos.sort_by(|a, b| compare(a, b));
    repos.into_iter().map(|r| r.key().clone()).collect()
}

pub fn compare(a: &Repository, b: &Repository) -> Ordering {
    sort_key(a).cmp(&sort_key(b))
}

fn sort_key(repo: &Repository) -> (bool, bool, Reverse<Option<DateTime<Utc>>>, &RepoKey) {
    let latest = if repo.secret {
        repo.latest_build().map(|b| b.date)
    } else {
        None
    };

    (!repo.secret, latest.is_none(), Reverse(latest), repo.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build;

    fn repo(name: &str, secret: bool, latest: Option<&str>) -> Repository {
        let mut repo = Repository::new(RepoKey::new("ns", name));
        repo.secret = secret;
        if let Some(date) = latest {
            repo.insert_build(build("0000000", "main", "2020-01-01T00:00:00Z"));
            repo.insert_build(build("1111111", "main", date));
        }
        repo
    }

    fn names(keys: Vec<RepoKey>) -> Vec<String> {
        keys.into_iter().map(|k| k.name).collect()
    }

    #[test]
    fn configured_and_recent_go_first() {
        let repos = vec![
            repo("C", false, None),
            repo("A", true, Some("2024-01-02T00:00:00Z")),
            repo("B", true, Some("2024-01-05T00:00:00Z")),
        ];

        assert_eq!(names(order(&repos)), vec!["B", "A", "C"]);
    }

    #[test]
    fn configured_repos_without_builds_sort_after_ones_with_builds() {
        let repos = vec![
            repo("empty", true, None),
            repo("old", true, Some("2021-01-01T00:00:00Z")),
            repo("unconfigured", false, Some("2025-01-01T00:00:00Z")),
            repo("new", true, Some("2024-01-01T00:00:00Z")),
        ];

        assert_eq!(
            names(order(&repos)),
            vec!["new", "old", "empty", "unconfigured"]
        );
    }

    #[test]
    fn ties_fall_back_to_the_key() {
        let repos = vec![
            repo("zeta", false, None),
            repo("alpha", false, Some("2024-01-01T00:00:00Z")),
            repo("empty-b", true, None),
            repo("empty-a", true, None),
        ];

        assert_eq!(
            names(order(&repos)),
            vec!["empty-a", "empty-b", "alpha", "zeta"]
        );
    }

    #[test]
    fn the_input_order_doesnt_matter() {
        let mut repos = vec![
            repo("a", true, None),
            repo("b", true, Some("2024-01-01T00:00:00Z")),
            repo("c", false, None),
            repo("d", true, Some("2023-01-01T00:00:00Z")),
        ];
        let expected = order(&repos);

        repos.reverse();
        assert_eq!(order(&repos), expected);
        repos.swap(0, 2);
        assert_eq!(order(&repos), expected);
    }
}
