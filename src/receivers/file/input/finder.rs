// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

use crate::receivers::file::config::TrackedFile;
use crate::store::ExpiringStore;

/// A fresh file selected by the scanner and the application that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub app_name: String,
}

/// DirectoryScanner expands the tracked patterns and keeps, per pattern, the
/// freshest file modified inside the freshness window.
#[derive(Clone)]
pub struct DirectoryScanner {
    tracked: Vec<TrackedFile>,
    window: Duration,
    app_names: ExpiringStore<String>,
    name_ttl: Duration,
}

impl DirectoryScanner {
    pub fn new(
        tracked: Vec<TrackedFile>,
        window: Duration,
        app_names: ExpiringStore<String>,
        name_ttl: Duration,
    ) -> Self {
        Self {
            tracked,
            window,
            app_names,
            name_ttl,
        }
    }

    pub fn scan(&self) -> Vec<ScannedFile> {
        self.scan_at(SystemTime::now())
    }

    pub(crate) fn scan_at(&self, now: SystemTime) -> Vec<ScannedFile> {
        let threshold = now.checked_sub(self.window).unwrap_or(SystemTime::UNIX_EPOCH);

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for tracked in &self.tracked {
            let Some(path) = freshest(&candidates(&tracked.path), threshold) else {
                debug!(pattern = %tracked.path, app = %tracked.app_name, "No fresh file for pattern.");
                continue;
            };
            if !seen.insert(path.clone()) {
                warn!(path = ?path, app = %tracked.app_name, "File already claimed by another application.");
                continue;
            }

            let app_name = self.app_name_for(&path, tracked);
            found.push(ScannedFile { path, app_name });
        }

        found
    }

    fn app_name_for(&self, path: &Path, tracked: &TrackedFile) -> String {
        let key = path.to_string_lossy();
        match self.app_names.get(&key) {
            Some(name) => name,
            None => {
                self.app_names
                    .set_with_expiry(key.into_owned(), tracked.app_name.clone(), self.name_ttl);
                tracked.app_name.clone()
            }
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn candidates(pattern: &str) -> Vec<PathBuf> {
    if !is_glob(pattern) {
        return vec![PathBuf::from(pattern)];
    }

    let matches = match glob(pattern) {
        Ok(m) => m,
        Err(e) => {
            warn!(pattern, error = %e, "Invalid glob pattern, skipping.");
            return Vec::new();
        }
    };

    let mut paths = Vec::new();
    for entry in matches {
        match entry {
            Ok(path) if path.is_dir() => {}
            Ok(path) => paths.push(path),
            Err(e) => warn!(pattern, error = %e, "Unable to read glob match."),
        }
    }
    if paths.is_empty() {
        warn!(pattern, "No files matched pattern.");
    }
    paths
}

// Each qualifying file raises the bar to its own mtime, so the survivor is the
// most recently modified fresh candidate.
fn freshest(paths: &[PathBuf], threshold: SystemTime) -> Option<PathBuf> {
    let mut bar = threshold;
    let mut selected = None;
    for path in paths {
        let modified = match File::open(path).and_then(|f| f.metadata()).and_then(|m| m.modified())
        {
            Ok(t) => t,
            Err(e) => {
                error!(path = ?path, error = %e, "Unable to stat file.");
                continue;
            }
        };
        if modified > bar {
            bar = modified;
            selected = Some(path.clone());
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path, age: Duration) {
        fs::write(path, "line\n").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn tracked(app: &str, pattern: String) -> TrackedFile {
        TrackedFile {
            path: pattern,
            app_name: app.to_string(),
            keywords: vec!["ERROR".to_string()],
            resolved_keywords: vec![],
            rule_name: "rule".to_string(),
        }
    }

    fn scanner(tracked: Vec<TrackedFile>, window: Duration) -> DirectoryScanner {
        DirectoryScanner::new(
            tracked,
            window,
            ExpiringStore::new(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn freshness_window_is_exclusive_of_older_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        touch(&path, Duration::from_secs(120));
        let pattern = path.to_string_lossy().into_owned();

        let wide = scanner(vec![tracked("api", pattern.clone())], Duration::from_secs(300));
        assert_eq!(
            vec![ScannedFile {
                path: path.clone(),
                app_name: "api".to_string()
            }],
            wide.scan()
        );

        let narrow = scanner(vec![tracked("api", pattern)], Duration::from_secs(60));
        assert!(narrow.scan().is_empty());
    }

    #[test]
    fn keeps_freshest_file_per_pattern() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("app-1.log"), Duration::from_secs(30));
        touch(&dir.path().join("app-2.log"), Duration::from_secs(200));
        touch(&dir.path().join("app-3.log"), Duration::from_secs(90));
        touch(&dir.path().join("app-4.log"), Duration::from_secs(900));

        let pattern = format!("{}/app-*.log", dir.path().display());
        let found = scanner(vec![tracked("api", pattern)], Duration::from_secs(300)).scan();

        assert_eq!(1, found.len());
        assert_eq!(dir.path().join("app-1.log"), found[0].path);
    }

    #[test]
    fn one_file_per_application() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("api.log"), Duration::from_secs(10));
        touch(&dir.path().join("worker.log"), Duration::from_secs(10));

        let found = scanner(
            vec![
                tracked("api", format!("{}/api*.log", dir.path().display())),
                tracked("worker", format!("{}/worker*.log", dir.path().display())),
                tracked("missing", format!("{}/missing*.log", dir.path().display())),
            ],
            Duration::from_secs(300),
        )
        .scan();

        let apps: Vec<_> = found.iter().map(|f| f.app_name.as_str()).collect();
        assert_eq!(vec!["api", "worker"], apps);
    }

    #[test]
    fn missing_literal_and_bad_glob_are_skipped() {
        let dir = TempDir::new().unwrap();
        let found = scanner(
            vec![
                tracked("gone", dir.path().join("gone.log").to_string_lossy().into_owned()),
                tracked("bad", format!("{}/[.log", dir.path().display())),
            ],
            Duration::from_secs(300),
        )
        .scan();
        assert!(found.is_empty());
    }

    #[test]
    fn app_name_lookup_is_cached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        touch(&path, Duration::from_secs(5));

        let names = ExpiringStore::new();
        let scanner = DirectoryScanner::new(
            vec![tracked("api", path.to_string_lossy().into_owned())],
            Duration::from_secs(300),
            names.clone(),
            Duration::from_secs(3600),
        );

        scanner.scan();
        assert_eq!(Some("api".to_string()), names.get(&path.to_string_lossy()));
    }
}
