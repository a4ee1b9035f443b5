//! Version-control access.
//!
//! The engine never talks to Subversion directly. Everything it needs from
//! the repository goes through the [`Repository`] trait:
//!
//! | Operation | Used by |
//! |---|---|
//! | `changed` | commit drivers, to get the raw change listing |
//! | `author` | pre-commit driver, to attach the committer to records |
//! | `tree` | move reconstruction and update-all |
//! | `cat_to_file` | the mirror handler, to copy committed content |
//!
//! [`Svnlook`] is the production backend and shells out to `svnlook`.
//! [`MemoryRepository`] holds canned listings and file contents, for tests
//! and for exercising handlers without a repository on disk.

pub mod memory;
pub mod svnlook;
pub mod tree;

pub use memory::MemoryRepository;
pub use svnlook::Svnlook;

use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("Unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },
    #[error("No such path {path} in {snapshot}")]
    NotFound { path: String, snapshot: Snapshot },
}

/// A state of the repository to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Snapshot {
    /// The youngest committed revision.
    Head,
    Revision(u64),
    /// A pending, not yet committed transaction.
    Transaction(String),
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Head => write!(f, "HEAD"),
            Snapshot::Revision(rev) => write!(f, "r{rev}"),
            Snapshot::Transaction(txn) => write!(f, "txn {txn}"),
        }
    }
}

/// Recursive listing of a subtree at some snapshot.
///
/// Paths are relative to the content subtree and start with `/`.
/// Directories carry a trailing `/`. The listing is depth-first with
/// parents before children and starts with `path` itself. Listing
/// the whole content tree uses `path = ""`.
pub trait TreeLister {
    fn tree(&self, path: &str, at: &Snapshot) -> Result<Vec<String>, VcsError>;
}

/// Everything the commit drivers need from a repository.
pub trait Repository: TreeLister {
    /// Raw "list changed paths" output (wide listing) for a snapshot.
    fn changed(&self, at: &Snapshot) -> Result<String, VcsError>;

    /// The committer of a pending transaction.
    fn author(&self, txn: &str) -> Result<String, VcsError>;

    /// Write the content of file `path` at `at` to `dest`.
    fn cat_to_file(&self, path: &str, at: &Snapshot, dest: &Path) -> Result<(), VcsError>;
}
