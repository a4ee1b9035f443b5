//! Derived files to delete when their source disappears.
//!
//! A handler that writes `/page.xhtml.html` from `/page.xhtml` registers the
//! output against the source. When the source is deleted (or rewritten), the
//! outputs are removed before anything is regenerated, so no stale variant
//! survives a rename of its source.
//!
//! ## File Format
//!
//! `<cache_root><source>_private.autodel`, one entry per line:
//!
//! ```text
//! xhtmlFile /page.xhtml.html
//! langTag /page.xhtml.en.html
//! my+label /page.xhtml.gz
//! ```
//!
//! The label is form-URL-encoded (space → `+`) and lets a collaborator clear
//! only its own entries. A derived path has exactly one label; registering it
//! again replaces the label.

use crate::depend::{PRIVATE_MARKER, store_path, write_atomic};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix appended to a source path to get its auto-delete file.
pub const AUTODEL_SUFFIX: &str = "_private.autodel";

/// Which registered outputs [`AutoDeleteStore::perform`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFilter<'a> {
    /// Every registered output.
    All,
    /// Only outputs registered with this label.
    Label(&'a str),
    /// No registered outputs.
    Nothing,
}

/// One registered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoDelEntry {
    pub path: String,
    pub label: String,
}

fn encode_label(label: &str) -> String {
    urlencoding::encode(label).replace("%20", "+")
}

fn decode_label(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

pub struct AutoDeleteStore {
    root: PathBuf,
}

impl AutoDeleteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file(&self, source: &str) -> PathBuf {
        store_path(&self.root, &format!("{source}{AUTODEL_SUFFIX}"))
    }

    /// Registered outputs of `source`, in registration order.
    pub fn entries(&self, source: &str) -> Vec<AutoDelEntry> {
        let Ok(content) = fs::read_to_string(self.file(source)) else {
            return Vec::new();
        };
        let mut entries: Vec<AutoDelEntry> = Vec::new();
        let mut rest = content.as_str();
        while let Some(n) = rest.find('\n') {
            let line = &rest[..n];
            rest = &rest[n + 1..];
            let Some((label, path)) = line.split_once(' ') else {
                continue;
            };
            let entry = AutoDelEntry {
                path: path.to_string(),
                label: decode_label(label),
            };
            match entries.iter_mut().find(|e| e.path == entry.path) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        entries
    }

    /// Delete `derived` when `source` disappears.
    pub fn register(&self, source: &str, derived: &str, label: &str) {
        let mut entries = self.entries(source);
        let entry = AutoDelEntry {
            path: derived.to_string(),
            label: label.to_string(),
        };
        match entries.iter_mut().find(|e| e.path == derived) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        let content: String = entries
            .iter()
            .map(|e| format!("{} {}\n", encode_label(&e.label), e.path))
            .collect();
        if let Err(e) = write_atomic(&self.file(source), &content) {
            warn!(source, derived, error = %e, "cannot record auto-delete entry");
        }
    }

    /// Remove files belonging to `source`.
    ///
    /// - registered outputs selected by `filter`
    /// - every `<leaf>_private.*` sibling if `delete_private`
    /// - the source's own mirrored copy if `delete_source`
    ///
    /// Missing files are ignored. The auto-delete file is left as it is
    /// unless `delete_private` removes it along with the other siblings.
    pub fn perform(
        &self,
        source: &str,
        filter: LabelFilter<'_>,
        delete_private: bool,
        delete_source: bool,
    ) {
        let selected = self.entries(source).into_iter().filter(|e| match filter {
            LabelFilter::All => true,
            LabelFilter::Label(label) => e.label == label,
            LabelFilter::Nothing => false,
        });
        for entry in selected {
            debug!(source, derived = %entry.path, label = %entry.label, "auto-deleting");
            remove_quietly(&store_path(&self.root, &entry.path));
        }

        let location = store_path(&self.root, source);
        if delete_source {
            remove_quietly(&location);
        }
        if !delete_private {
            return;
        }
        let (Some(dir), Some(leaf)) = (location.parent(), location.file_name()) else {
            return;
        };
        let prefix = format!("{}{PRIVATE_MARKER}", leaf.to_string_lossy());
        let Ok(read) = fs::read_dir(dir) else {
            return;
        };
        for entry in read.filter_map(|e| e.ok()) {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_quietly(&entry.path());
            }
        }
    }

    /// Forget every registration of `source`. Call before regenerating from
    /// new content so entries do not accumulate.
    pub fn erase(&self, source: &str) {
        remove_quietly(&self.file(source));
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot delete"),
    }
}
