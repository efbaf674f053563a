// SPDX-License-Identifier: Apache-2.0

//! Diffing of the previously tailed file set against a fresh scan.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Paths to start tailing.
    pub new: HashSet<PathBuf>,
    /// Paths that stay tailed.
    pub same: HashSet<PathBuf>,
    /// Paths to stop tailing.
    pub old: HashSet<PathBuf>,
}

impl Reconciliation {
    /// The set of paths that remain live after applying this diff.
    pub fn live(&self) -> HashSet<PathBuf> {
        self.new.union(&self.same).cloned().collect()
    }
}

/// Partition `previous` and `current` into three disjoint sets.
///
/// On the first run `previous` is taken as the authoritative starting set and
/// carried over whole as `same`. On later runs an empty scan retires every
/// previous path.
pub fn reconcile(
    previous: &HashSet<PathBuf>,
    current: &HashSet<PathBuf>,
    first_run: bool,
) -> Reconciliation {
    if first_run {
        return Reconciliation {
            same: previous.clone(),
            ..Default::default()
        };
    }
    if current.is_empty() {
        return Reconciliation {
            old: previous.clone(),
            ..Default::default()
        };
    }

    Reconciliation {
        new: current.difference(previous).cloned().collect(),
        same: current.intersection(previous).cloned().collect(),
        old: previous.difference(current).cloned().collect(),
    }
}

/// The shared set of paths currently being tailed.
#[derive(Debug, Clone, Default)]
pub struct LivePaths {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LivePaths {
    pub fn get(&self) -> HashSet<PathBuf> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, paths: HashSet<PathBuf>) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = paths;
    }

    pub fn contains(&self, path: &PathBuf) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn partitions_without_overlap() {
        let previous = set(&["/a", "/b", "/c"]);
        let current = set(&["/b", "/c", "/d"]);

        let diff = reconcile(&previous, &current, false);

        assert_eq!(set(&["/d"]), diff.new);
        assert_eq!(set(&["/b", "/c"]), diff.same);
        assert_eq!(set(&["/a"]), diff.old);
        assert!(diff.new.is_disjoint(&diff.same));
        assert!(diff.same.is_disjoint(&diff.old));
        assert!(diff.new.is_disjoint(&diff.old));

        let covered: HashSet<_> = diff
            .new
            .iter()
            .chain(&diff.same)
            .chain(&diff.old)
            .cloned()
            .collect();
        assert_eq!(previous.union(&current).cloned().collect::<HashSet<_>>(), covered);
        assert_eq!(current, diff.live());
    }

    #[test]
    fn first_run_carries_previous() {
        let previous = set(&["/a", "/b"]);

        let diff = reconcile(&previous, &set(&["/c"]), true);

        assert_eq!(previous, diff.same);
        assert!(diff.new.is_empty());
        assert!(diff.old.is_empty());
    }

    #[test]
    fn empty_scan_retires_everything() {
        let previous = set(&["/a", "/b"]);

        let diff = reconcile(&previous, &HashSet::new(), false);

        assert_eq!(previous, diff.old);
        assert!(diff.live().is_empty());
    }

    #[test]
    fn live_paths_are_shared() {
        let live = LivePaths::default();
        let other = live.clone();
        other.set(set(&["/a"]));
        assert!(live.contains(&PathBuf::from("/a")));
        assert_eq!(set(&["/a"]), live.get());
    }
}
