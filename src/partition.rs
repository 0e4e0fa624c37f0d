//! Grouping a repository's builds by branch.

use std::collections::HashMap;

use crate::errors::UnknownBranch;
use crate::model::Build;

/// The builds seen on one branch, most recent first (as delivered by the
/// feed). Only commit hashes are kept; the builds live in the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchPartition {
    branch: String,
    commits: Vec<String>,
    visible: bool,
}

impl BranchPartition {
    fn new(branch: String) -> BranchPartition {
        BranchPartition {
            branch,
            commits: Vec::new(),
            visible: false,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn commits(&self) -> &[String] {
        &self.commits
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchPartitioner {
    declared: Vec<String>,
    partitions: Vec<BranchPartition>,
    lookup: HashMap<String, usize>,
    active: Option<String>,
    /// Set once somebody explicitly picks a branch, after which the default
    /// is never recalculated.
    pinned: bool,
}

impl BranchPartitioner {
    pub fn new() -> BranchPartitioner {
        BranchPartitioner::default()
    }

    /// Record the branches the repository says it has.
    pub fn declare(&mut self, branches: &[String]) {
        self.declared = branches.to_vec();
        self.refresh();
    }

    /// Find the partition for a build's branch (creating it the first time
    /// the branch is seen) and append the build to it.
    pub fn classify(&mut self, build: &Build) -> &BranchPartition {
        let ix = match self.lookup.get(&build.branch) {
            Some(&ix) => ix,
            None => {
                debug!("Found a new branch, {:?}", build.branch);
                let ix = self.partitions.len();
                self.partitions
                    .push(BranchPartition::new(build.branch.clone()));
                self.lookup.insert(build.branch.clone(), ix);
                self.refresh();
                ix
            }
        };

        let partition = &mut self.partitions[ix];
        if !partition.commits.iter().any(|c| c == build.commit()) {
            partition.commits.push(build.commit().to_string());
        }

        &self.partitions[ix]
    }

    /// Make a branch the visible one. Nothing is refetched or thrown away.
    pub fn activate(&mut self, branch: &str) -> Result<(), UnknownBranch> {
        if !self.lookup.contains_key(branch) {
            return Err(UnknownBranch {
                branch: branch.to_string(),
            });
        }

        self.active = Some(branch.to_string());
        self.pinned = true;
        self.sync_visibility();

        Ok(())
    }

    pub fn active_branch(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.as_str())
    }

    pub fn active(&self) -> Option<&BranchPartition> {
        self.active_branch().and_then(|b| self.partition(b))
    }

    pub fn partition(&self, branch: &str) -> Option<&BranchPartition> {
        self.lookup.get(branch).map(|&ix| &self.partitions[ix])
    }

    /// Partitions in the order their branches were first seen.
    pub fn partitions(&self) -> &[BranchPartition] {
        &self.partitions
    }

    /// Only branches which already have builds are considered, so there is
    /// always something visible once anything has been classified.
    fn refresh(&mut self) {
        if !self.pinned {
            let lookup = &self.lookup;
            let candidates = self
                .declared
                .iter()
                .filter(|branch| lookup.contains_key(*branch))
                .chain(self.partitions.iter().map(|p| &p.branch))
                .map(|s| s.as_str());
            self.active = default_branch(candidates).map(String::from);
        }

        self.sync_visibility();
    }

    fn sync_visibility(&mut self) {
        for partition in &mut self.partitions {
            partition.visible = self.active.as_ref() == Some(&partition.branch);
        }
    }
}

/// Pick the branch to show first: `main`, then `master`, otherwise the first
/// candidate.
pub fn default_branch<'a, I>(branches: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut first = None;
    let mut master = None;

    for branch in branches {
        match branch {
            "main" => return Some(branch),
            "master" if master.is_none() => master = Some(branch),
            _ => {}
        }

        if first.is_none() {
            first = Some(branch);
        }
    }

    master.or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build;

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn main_wins_even_when_it_isnt_first() {
        let mut parts = BranchPartitioner::new();
        parts.declare(&branches(&["feature-x", "main", "dev"]));
        assert_eq!(parts.active_branch(), None, "nothing to show yet");

        parts.classify(&build("a", "feature-x", "2024-01-03T00:00:00Z"));
        parts.classify(&build("b", "main", "2024-01-02T00:00:00Z"));
        parts.classify(&build("c", "dev", "2024-01-01T00:00:00Z"));

        assert_eq!(parts.active_branch(), Some("main"));
    }

    #[test]
    fn main_beats_master() {
        assert_eq!(default_branch(vec!["master", "main"]), Some("main"));
        assert_eq!(default_branch(vec!["dev", "master"]), Some("master"));
    }

    #[test]
    fn otherwise_the_first_declared_branch_wins() {
        let mut parts = BranchPartitioner::new();
        parts.declare(&branches(&["feature-x", "dev"]));

        parts.classify(&build("a", "dev", "2024-01-03T00:00:00Z"));
        assert_eq!(parts.active_branch(), Some("dev"));

        parts.classify(&build("b", "feature-x", "2024-01-02T00:00:00Z"));
        assert_eq!(parts.active_branch(), Some("feature-x"));
        assert_eq!(default_branch(Vec::new()), None);
    }

    #[test]
    fn partitions_appear_on_first_sight() {
        let mut parts = BranchPartitioner::new();
        parts.declare(&branches(&["dev", "main"]));

        parts.classify(&build("a", "dev", "2024-01-03T00:00:00Z"));
        assert_eq!(parts.partitions().len(), 1);
        assert_eq!(parts.active_branch(), Some("dev"));
        assert!(parts.partitions()[0].is_visible());

        parts.classify(&build("b", "main", "2024-01-02T00:00:00Z"));
        parts.classify(&build("c", "dev", "2024-01-01T00:00:00Z"));

        let dev = parts.partition("dev").unwrap();
        assert_eq!(dev.commits(), &["a".to_string(), "c".to_string()][..]);
        let active = parts.active().unwrap();
        assert_eq!(active.branch(), "main");
        assert!(active.is_visible());
        let visible = parts.partitions().iter().filter(|p| p.is_visible()).count();
        assert_eq!(visible, 1);
    }

    #[test]
    fn without_declared_branches_the_first_seen_is_active() {
        let mut parts = BranchPartitioner::new();

        parts.classify(&build("a", "feature-y", "2024-01-03T00:00:00Z"));
        parts.classify(&build("b", "dev", "2024-01-02T00:00:00Z"));

        assert_eq!(parts.active_branch(), Some("feature-y"));

        parts.classify(&build("c", "master", "2024-01-01T00:00:00Z"));
        assert_eq!(parts.active_branch(), Some("master"));
    }

    #[test]
    fn switching_only_toggles_visibility() {
        let mut parts = BranchPartitioner::new();
        parts.classify(&build("a", "main", "2024-01-03T00:00:00Z"));
        parts.classify(&build("b", "dev", "2024-01-02T00:00:00Z"));
        let before: Vec<_> = parts
            .partitions()
            .iter()
            .map(|p| p.commits().to_vec())
            .collect();

        parts.activate("dev").unwrap();

        let visible: Vec<_> = parts
            .partitions()
            .iter()
            .filter(|p| p.is_visible())
            .map(|p| p.branch())
            .collect();
        assert_eq!(visible, vec!["dev"]);
        let after: Vec<_> = parts
            .partitions()
            .iter()
            .map(|p| p.commits().to_vec())
            .collect();
        assert_eq!(before, after);

        // an explicit choice sticks
        parts.classify(&build("c", "main", "2024-01-01T00:00:00Z"));
        assert_eq!(parts.active_branch(), Some("dev"));
    }

    #[test]
    fn cant_activate_an_unseen_branch() {
        let mut parts = BranchPartitioner::new();

        assert_eq!(
            parts.activate("nope"),
            Err(UnknownBranch {
                branch: String::from("nope")
            })
        );
    }

    #[test]
    fn classifying_twice_doesnt_duplicate() {
        let mut parts = BranchPartitioner::new();
        let b = build("a", "main", "2024-01-03T00:00:00Z");

        parts.classify(&b);
        let again = parts.classify(&b);

        assert_eq!(again.commits().len(), 1);
    }
}
