//! In-memory repository with canned listings.
//!
//! Trees are stored per snapshot as a sorted set of content-relative paths
//! (directories with a trailing slash). Because every subtree is a
//! contiguous range in lexicographic order and a directory sorts before its
//! children, iterating the set yields the same depth-first, parents-first
//! order `svnlook tree` produces.

use super::{Repository, Snapshot, TreeLister, VcsError};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    changes: HashMap<Snapshot, String>,
    trees: HashMap<Snapshot, BTreeSet<String>>,
    files: HashMap<String, Vec<u8>>,
    authors: HashMap<String, String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw change listing returned for `at`.
    pub fn with_changes(mut self, at: Snapshot, listing: &str) -> Self {
        self.changes.insert(at, listing.to_string());
        self
    }

    /// Objects present at `at`. Directories must end in `/`.
    pub fn with_tree(mut self, at: Snapshot, paths: &[&str]) -> Self {
        self.trees
            .insert(at, paths.iter().map(|p| p.to_string()).collect());
        self
    }

    /// File content served by `cat_to_file`, regardless of snapshot.
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }

    pub fn with_author(mut self, txn: &str, author: &str) -> Self {
        self.authors.insert(txn.to_string(), author.to_string());
        self
    }
}

impl TreeLister for MemoryRepository {
    fn tree(&self, path: &str, at: &Snapshot) -> Result<Vec<String>, VcsError> {
        let not_found = || VcsError::NotFound {
            path: path.to_string(),
            snapshot: at.clone(),
        };
        let entries = self.trees.get(at).ok_or_else(not_found)?;
        let dir = format!("{path}/");
        if path.is_empty() {
            let mut all = vec!["/".to_string()];
            all.extend(entries.iter().filter(|e| e.as_str() != "/").cloned());
            return Ok(all);
        }
        if entries.contains(path) {
            return Ok(vec![path.to_string()]);
        }
        let listing: Vec<String> = entries
            .range(dir.clone()..)
            .take_while(|e| e.starts_with(&dir))
            .cloned()
            .collect();
        if listing.is_empty() {
            return Err(not_found());
        }
        Ok(listing)
    }
}

impl Repository for MemoryRepository {
    fn changed(&self, at: &Snapshot) -> Result<String, VcsError> {
        self.changes.get(at).cloned().ok_or_else(|| VcsError::Command {
            command: format!("changed {at}"),
            stderr: "no such revision or transaction".to_string(),
        })
    }

    fn author(&self, txn: &str) -> Result<String, VcsError> {
        self.authors
            .get(txn)
            .cloned()
            .ok_or_else(|| VcsError::UnexpectedOutput {
                command: format!("author {txn}"),
                output: String::new(),
            })
    }

    fn cat_to_file(&self, path: &str, at: &Snapshot, dest: &Path) -> Result<(), VcsError> {
        let content = self.files.get(path).ok_or_else(|| VcsError::NotFound {
            path: path.to_string(),
            snapshot: at.clone(),
        })?;
        std::fs::write(dest, content)?;
        Ok(())
    }
}
