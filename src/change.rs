//! Change classification: raw change listing → typed change records.
//!
//! Commit drivers receive the output of a "list changed paths" command and
//! turn it into a sequence of [`ChangeRecord`]s. Two listing layouts exist:
//!
//! ```text
//! Repository (svnlook changed)     Working (svn up / svn co)
//! A   trunk/new.txt                A    new.txt
//! _U  trunk/dir/                   U    dir
//! D   trunk/old/
//! ```
//!
//! Column 0 is the content status, column 1 the property status. The
//! repository layout starts paths at column 4, requires a space in column 3,
//! and marks directories with a trailing slash. The working layout starts
//! paths at column 5 and says nothing about object kind.
//!
//! ## Content Subtree
//!
//! Only paths below the configured content subtree (e.g. `/trunk`) survive.
//! Their paths are rewritten relative to it: `/trunk/dir/a.txt` → `/dir/a.txt`.
//!
//! ## Move Reconstruction
//!
//! A directory rename shows up as just two lines, `D old/` and `A new/`,
//! however much content moved. Per-file handlers key off file extensions and
//! would never see the moved files. [`reconstruct_moves`] detects such pairs
//! and replaces them with a full listing of both subtrees:
//!
//! ```text
//! D /old/           →   D /old/x.txt    (deepest first)
//! A /new/               D /old
//!                       A /new          (parents first)
//!                       A /new/x.txt
//! ```
//!
//! An `A new/` line that is directly followed by lines inside `new/` is a
//! genuinely new tree and left alone.

use crate::vcs::{Snapshot, TreeLister};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Status letter from one column of a change listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Unchanged,
    Added,
    Deleted,
    Updated,
    Conflicted,
    Merged,
}

impl Status {
    /// Parse a status column. Space and `_` mean unchanged.
    pub fn from_column(c: char) -> Option<Self> {
        match c {
            ' ' | '_' => Some(Status::Unchanged),
            'A' => Some(Status::Added),
            'D' => Some(Status::Deleted),
            'U' => Some(Status::Updated),
            'C' => Some(Status::Conflicted),
            'G' => Some(Status::Merged),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Status::Unchanged => ' ',
            Status::Added => 'A',
            Status::Deleted => 'D',
            Status::Updated => 'U',
            Status::Conflicted => 'C',
            Status::Merged => 'G',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Kind {
    Unknown,
    File,
    Directory,
}

impl Kind {
    /// Event-name prefix: `file` or `dir`.
    pub fn event_prefix(self) -> Option<&'static str> {
        match self {
            Kind::File => Some("file"),
            Kind::Directory => Some("dir"),
            Kind::Unknown => None,
        }
    }
}

/// What a change means for handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Deleted,
    Updated,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Added => "Added",
            Action::Deleted => "Deleted",
            Action::Updated => "Updated",
        }
    }
}

/// Which layout a change listing uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// `svn up` style: path at column 5, kind unknown.
    Working,
    /// `svnlook changed` style: path at column 4, directories end in `/`.
    Repository,
}

/// One changed object of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Content-relative path, always starting with `/`, no trailing slash.
    pub path: String,
    pub content: Status,
    pub props: Status,
    pub kind: Kind,
    /// Committer; only known during pre-commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Set by a handler to stop lower-priority and generic handlers.
    #[serde(skip)]
    pub handled: bool,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, content: Status, kind: Kind) -> Self {
        Self {
            path: path.into(),
            content,
            props: Status::Unchanged,
            kind,
            author: None,
            handled: false,
        }
    }

    /// Record for one entry of a tree listing; a trailing `/` marks a directory.
    pub fn from_tree_entry(entry: &str, content: Status) -> Self {
        match entry.strip_suffix('/') {
            Some(dir) => Self::new(dir, content, Kind::Directory),
            None => Self::new(entry, content, Kind::File),
        }
    }

    /// The action handlers see, or `None` if there is nothing to report.
    ///
    /// Merges count as updates and so do property-only changes. Conflicts
    /// have no action; see [`ChangeRecord::is_conflicted`].
    pub fn action(&self) -> Option<Action> {
        match self.content {
            Status::Added => Some(Action::Added),
            Status::Deleted => Some(Action::Deleted),
            Status::Updated | Status::Merged => Some(Action::Updated),
            Status::Conflicted => None,
            Status::Unchanged if self.props != Status::Unchanged => Some(Action::Updated),
            Status::Unchanged => None,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        self.content == Status::Conflicted || self.props == Status::Conflicted
    }

    fn is_inside(&self, dir: &str) -> bool {
        self.path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.kind == Kind::Directory { "/" } else { "" };
        write!(
            f,
            "{}{} {}{}",
            self.content.letter(),
            self.props.letter(),
            self.path,
            suffix
        )
    }
}

/// Parse one line. `None` for blank and malformed lines.
fn parse_line(line: &str, listing: Listing) -> Option<ChangeRecord> {
    let mut chars = line.chars();
    let content = Status::from_column(chars.next()?)?;
    let props = Status::from_column(chars.next()?)?;

    let (raw, kind) = match listing {
        Listing::Working => (line.get(5..)?, Kind::Unknown),
        Listing::Repository => {
            if line.get(3..4)? != " " {
                return None;
            }
            let raw = line.get(4..)?;
            match raw.strip_suffix('/') {
                Some(dir) => (dir, Kind::Directory),
                None => (raw, Kind::File),
            }
        }
    };
    if raw.is_empty() {
        return None;
    }

    let mut record = ChangeRecord::new(format!("/{raw}"), content, kind);
    record.props = props;
    Some(record)
}

/// Parse a change listing, keeping only changes inside `content_dir`.
///
/// `content_dir` is the content subtree inside the repository, e.g.
/// `/trunk`, or empty for the repository root. Malformed lines are skipped.
pub fn parse_changes(stdout: &str, listing: Listing, content_dir: &str) -> Vec<ChangeRecord> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some(mut record) = parse_line(line, listing) else {
            warn!(line, "skipping malformed change line");
            continue;
        };
        match record.path.strip_prefix(content_dir) {
            Some(rest) if rest.starts_with('/') && rest.len() > 1 => {
                record.path = rest.to_string();
                out.push(record);
            }
            _ => debug!(path = %record.path, "ignoring change outside content tree"),
        }
    }
    out
}

/// Expand directory renames into full per-object delete/add records.
///
/// `old` is the snapshot before the commit, `new` the snapshot after it.
/// Pairs whose subtree cannot be listed are kept as they are.
pub fn reconstruct_moves<L: TreeLister + ?Sized>(
    records: Vec<ChangeRecord>,
    lister: &L,
    old: &Snapshot,
    new: &Snapshot,
) -> Vec<ChangeRecord> {
    let mut out = Vec::with_capacity(records.len());
    let mut i = 0;
    while i < records.len() {
        let cur = &records[i];
        let Some(next) = records.get(i + 1) else {
            out.push(cur.clone());
            break;
        };
        if !is_rename_pair(cur, next, records.get(i + 2)) {
            out.push(cur.clone());
            i += 1;
            continue;
        }

        let (del, add) = if cur.content == Status::Deleted {
            (cur, next)
        } else {
            (next, cur)
        };
        let listings = lister
            .tree(&del.path, old)
            .and_then(|d| lister.tree(&add.path, new).map(|a| (d, a)));
        let (deleted, added) = match listings {
            Ok(pair) => pair,
            Err(e) => {
                warn!(from = %del.path, to = %add.path, error = %e,
                    "cannot list renamed directory, keeping unexpanded");
                out.push(cur.clone());
                i += 1;
                continue;
            }
        };
        debug!(from = %del.path, to = %add.path, deleted = deleted.len(), added = added.len(),
            "expanding directory rename");
        out.extend(
            deleted
                .iter()
                .rev()
                .map(|p| ChangeRecord::from_tree_entry(p, Status::Deleted)),
        );
        out.extend(
            added
                .iter()
                .map(|p| ChangeRecord::from_tree_entry(p, Status::Added)),
        );
        i += 2;
    }
    out
}

/// A delete/add pair of the same non-file kind, not followed by content of
/// the added side.
fn is_rename_pair(cur: &ChangeRecord, next: &ChangeRecord, after: Option<&ChangeRecord>) -> bool {
    let is_move_status = |s: Status| s == Status::Added || s == Status::Deleted;
    if cur.kind == Kind::File
        || next.kind != cur.kind
        || !is_move_status(cur.content)
        || !is_move_status(next.content)
        || cur.content == next.content
    {
        return false;
    }
    !after.is_some_and(|a| a.is_inside(&next.path))
}

/// Parse a listing and run move reconstruction over it.
pub fn classify<L: TreeLister + ?Sized>(
    stdout: &str,
    listing: Listing,
    content_dir: &str,
    lister: &L,
    old: &Snapshot,
    new: &Snapshot,
) -> Vec<ChangeRecord> {
    let records = parse_changes(stdout, listing, content_dir);
    reconstruct_moves(records, lister, old, new)
}
