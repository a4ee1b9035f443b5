//! Dependency tracking and the regeneration queue.
//!
//! Generated artifacts are static files. When a source object changes, every
//! artifact built from it has to be regenerated. While generating an artifact,
//! handlers declare what they read:
//!
//! ```text
//! declare_dependency("/index.xhtml.html", "/menu.navmenu")
//!     → appends "/index.xhtml.html" to <cache_root>/menu.navmenu_private.depend
//! ```
//!
//! The relation is stored as a reverse index, one edge file per source. When
//! the source changes, [`DependencyTracker::notify_changed`] queues every
//! recorded dependent and empties the edge file; regeneration re-declares
//! whatever is still live, so stale edges cause at most one extra,
//! harmless regeneration. Edges are never removed individually.
//!
//! ## Edge File Location
//!
//! The edge file of `source` is `<cache_root><source>_private.depend`, a
//! location derived from the path alone. A dependency on a file that does
//! not exist yet is recorded like any other and fires when the file is
//! created. A dependency on a directory listing uses the source `"/dir/"`,
//! stored as `<cache_root>/dir/_private.depend`.
//!
//! ## Queue Mirror
//!
//! Every newly queued path is appended to `<cache_root>/._private.dependqueue`
//! immediately. The file is removed once a drain completes, so its presence at
//! startup means a previous run died mid-drain; [`DependencyTracker::open`]
//! reloads it.
//!
//! ## Cycles
//!
//! Each path taken off the queue increments a per-drain counter. Once a
//! source has been regenerated more than `cycle_limit` times,
//! `notify_changed` for it is ignored (without touching its edge file), which
//! bounds every dependency loop.
//!
//! Draining itself dispatches hooks and lives on
//! [`Engine::drain_queue`](crate::engine::Engine::drain_queue).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Marker every bookkeeping file name contains. Commits of such names are refused.
pub const PRIVATE_MARKER: &str = "_private.";

/// Suffix appended to a source path to get its edge file.
pub const DEPEND_SUFFIX: &str = "_private.depend";

/// Name of the on-disk queue mirror inside the artifact store.
pub const QUEUE_FILENAME: &str = "._private.dependqueue";

/// Default suffix probed by [`DependencyTracker::dependency_exists`].
pub const ORIG_SUFFIX: &str = "_private.orig";

/// Map a store-absolute path (`/a/b`) to the filesystem below `root`.
pub fn store_path(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Read a newline-terminated line list, dropping duplicates and any
/// unterminated last line. Missing files read as empty.
pub(crate) fn read_lines(file: &Path) -> Vec<String> {
    let content = match fs::read_to_string(file) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    let mut rest = content.as_str();
    while let Some(n) = rest.find('\n') {
        let line = &rest[..n];
        if !line.is_empty() && seen.insert(line) {
            lines.push(line.to_string());
        }
        rest = &rest[n + 1..];
    }
    lines
}

/// Write `content` to `<file>.tmp` and rename it over `file`.
pub(crate) fn write_atomic(file: &Path, content: &str) -> io::Result<()> {
    let mut tmp = file.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, file)
}

/// Parent directory listing of an object: `/d/a.txt` → `/d/`, `/a.txt` → `/`.
pub fn parent_listing(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(n) => path[..=n].to_string(),
        None => "/".to_string(),
    }
}

pub struct DependencyTracker {
    root: PathBuf,
    cycle_limit: u32,
    queue: VecDeque<String>,
    queued: HashSet<String>,
    seen: HashMap<String, u32>,
    truncated: HashSet<String>,
    recovered: usize,
}

impl DependencyTracker {
    /// Open the tracker for the artifact store at `root`, reloading a queue
    /// left behind by an interrupted run.
    pub fn open(root: impl Into<PathBuf>, cycle_limit: u32) -> Self {
        let mut tracker = Self {
            root: root.into(),
            cycle_limit,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            seen: HashMap::new(),
            truncated: HashSet::new(),
            recovered: 0,
        };
        for path in read_lines(&tracker.queue_file()) {
            if tracker.queued.insert(path.clone()) {
                tracker.queue.push_back(path);
            }
        }
        tracker.recovered = tracker.queue.len();
        if tracker.recovered > 0 {
            warn!(
                entries = tracker.recovered,
                "recovered regeneration queue from interrupted run"
            );
        }
        tracker
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of queue entries reloaded from disk by [`open`](Self::open).
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    pub fn queue_file(&self) -> PathBuf {
        self.root.join(QUEUE_FILENAME)
    }

    pub fn edge_file(&self, source: &str) -> PathBuf {
        store_path(&self.root, &format!("{source}{DEPEND_SUFFIX}"))
    }

    /// Artifacts currently recorded as depending on `source`.
    pub fn dependents(&self, source: &str) -> Vec<String> {
        read_lines(&self.edge_file(source))
    }

    /// Record that `artifact` must be regenerated when `source` changes.
    ///
    /// Either argument may be `None`, in which case nothing is recorded.
    /// Returns the filesystem location of `source` so call sites can probe it.
    /// Write failures are logged; the dependency is then simply missing.
    pub fn declare_dependency(&self, artifact: Option<&str>, source: Option<&str>) -> PathBuf {
        let location = store_path(&self.root, source.unwrap_or_default());
        let (Some(artifact), Some(source)) = (artifact, source) else {
            return location;
        };
        let file = self.edge_file(source);
        if !file.parent().is_some_and(Path::is_dir) {
            warn!(artifact, source, "cannot record dependency: parent directory missing in store");
            return location;
        }
        let mut dependents = read_lines(&file);
        if dependents.iter().any(|d| d == artifact) {
            return location;
        }
        dependents.push(artifact.to_string());
        let content: String = dependents.iter().map(|d| format!("{d}\n")).collect();
        if let Err(e) = write_atomic(&file, &content) {
            warn!(artifact, source, error = %e, "cannot record dependency");
        }
        location
    }

    /// Declare the dependency, then report whether `source + suffix` exists.
    ///
    /// The dependency is recorded whether or not the probed file exists, so
    /// creating it later triggers regeneration.
    pub fn dependency_exists(&self, artifact: &str, source: &str, suffix: &str) -> bool {
        self.declare_dependency(Some(artifact), Some(source));
        // Dangling symlinks do not count.
        store_path(&self.root, &format!("{source}{suffix}")).exists()
    }

    /// List the mirrored directory `dir`, depending on both its existence and
    /// its listing. Entries are sorted and bookkeeping files are omitted;
    /// `None` if the directory is absent.
    pub fn dependency_dir(&self, artifact: &str, dir: &str) -> Option<Vec<String>> {
        let dir = dir.trim_end_matches('/');
        let location = self.declare_dependency(Some(artifact), Some(dir));
        if !location.exists() {
            return None;
        }
        self.declare_dependency(Some(artifact), Some(&format!("{dir}/")));
        let mut names: Vec<String> = fs::read_dir(&location)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.contains(PRIVATE_MARKER))
            .collect();
        names.sort();
        Some(names)
    }

    /// Queue `artifact` for regeneration. Already-queued paths are ignored.
    pub fn enqueue(&mut self, artifact: &str) {
        if !self.queued.insert(artifact.to_string()) {
            return;
        }
        debug!(artifact, "queued for regeneration");
        self.queue.push_back(artifact.to_string());
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.queue_file())
            .and_then(|mut f| writeln!(f, "{artifact}"));
        if let Err(e) = appended {
            warn!(artifact, error = %e, "cannot append to queue mirror");
        }
    }

    /// Signal that `source` was created, deleted or modified.
    ///
    /// Queues every recorded dependent. The edge file is emptied the first
    /// time a source is notified in a run; later notifications leave it alone
    /// since regeneration may have repopulated it. Returns the number of
    /// dependents found.
    pub fn notify_changed(&mut self, source: &str) -> usize {
        let seen = self.seen_count(source);
        if seen > self.cycle_limit {
            debug!(source, seen, "dependency loop, not regenerating dependents");
            return 0;
        }
        let file = self.edge_file(source);
        if !file.exists() {
            return 0;
        }
        let dependents = read_lines(&file);
        for dependent in &dependents {
            debug!(dependent = %dependent, source, "regenerating because of change");
            self.enqueue(dependent);
        }
        if self.truncated.insert(source.to_string())
            && let Err(e) = write_atomic(&file, "")
        {
            warn!(source, error = %e, "cannot truncate edge file");
        }
        dependents.len()
    }

    /// Take the next queued path, counting how often it has been taken this drain.
    pub fn pop_next(&mut self) -> Option<(String, u32)> {
        let path = self.queue.pop_front()?;
        self.queued.remove(&path);
        let count = self.seen.entry(path.clone()).or_insert(0);
        *count += 1;
        Some((path, *count))
    }

    /// Times `path` was taken off the queue during the current drain.
    pub fn seen_count(&self, path: &str) -> u32 {
        self.seen.get(path).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued paths in processing order.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    /// Reset per-drain state and drop the queue mirror. Call only when the
    /// queue is empty.
    pub fn finish_drain(&mut self) {
        self.seen.clear();
        self.truncated.clear();
        self.recovered = 0;
        match fs::remove_file(self.queue_file()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "cannot remove queue mirror"),
        }
    }
}
