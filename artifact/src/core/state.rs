//! In-memory project tree: relative path to file content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ordered map of project files. Iteration order is the path order, so
/// digests and snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectState {
    files: BTreeMap<String, String>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Set `path` to `content`, returning the previous content.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) -> Option<String> {
        self.files.insert(path.into(), content.into())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_str()))
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// Hex SHA-256 over every path and content, length-prefixed so distinct
    /// trees never share an encoding.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in self.iter() {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for ProjectState {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(path, content)| (path.into(), content.into()))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for ProjectState {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_depends_on_paths_and_contents() {
        let a: ProjectState = [("a.txt", "hello")].into_iter().collect();
        let same: ProjectState = [("a.txt", "hello")].into_iter().collect();
        let moved: ProjectState = [("a.txth", "ello")].into_iter().collect();
        assert_eq!(a.digest(), same.digest());
        assert_ne!(a.digest(), moved.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn iteration_is_sorted_by_path() {
        let mut state = ProjectState::new();
        state.insert("b.txt", "2");
        state.insert("a.txt", "1");
        assert_eq!(state.insert("b.txt", "3"), Some("2".to_string()));
        let paths: Vec<&str> = state.iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
        assert_eq!(state.get("b.txt"), Some("3"));
    }
}
