//! Commit drivers: what the repository hooks call.
//!
//! ```text
//! pre-commit     author + changed -t TXN → classify → policy → pre* events
//! post-commit    recovered queue → changed -r REV → classify → events → drain
//! update-all     tree of HEAD → fake "added" for every object → drain
//! ```
//!
//! Pre-commit fails closed: the first policy violation or handler error
//! aborts the run and its message is shown to the committing user. Nothing
//! is drained, since pre-commit writes no artifacts of its own.
//!
//! Post-commit cannot reject anything anymore. Errors are logged and
//! collected per change record and per queued artifact, so one broken
//! artifact never blocks the rest of the store.

use crate::change::{ChangeRecord, Kind, Listing, Status, classify};
use crate::config::EngineConfig;
use crate::depend::PRIVATE_MARKER;
use crate::engine::{DrainReport, Engine};
use crate::hook::{HookError, extension};
use crate::vcs::{Repository, Snapshot, VcsError};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Event name prefix used on the validation path.
pub const PRE_PREFIX: &str = "pre";

/// Committing this path regenerates the whole artifact store.
pub const UPDATE_ALL_TRIGGER: &str = "/.updateall";

/// A rejected commit. The message is shown to the committer verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<HookError> for ValidationError {
    fn from(e: HookError) -> Self {
        match e {
            HookError::Rejected(message) => Self { message },
            other => Self::new(other.to_string()),
        }
    }
}

impl From<VcsError> for ValidationError {
    fn from(e: VcsError) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Repository error: {0}")]
    Vcs(#[from] VcsError),
}

/// What a post-commit or update-all run did.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Records dispatched, after move reconstruction.
    pub changes: Vec<ChangeRecord>,
    /// Records whose handlers failed, with the error message.
    pub failures: Vec<(String, String)>,
    /// Drain of a queue left behind by an interrupted run, if there was one.
    pub recovered: Option<DrainReport>,
    pub drain: DrainReport,
}

/// Reject changes no handler should ever see.
///
/// - anything at or below the reserved installation prefix
/// - any name containing the bookkeeping marker `_private.`
pub fn check_policy(config: &EngineConfig, record: &ChangeRecord) -> Result<(), ValidationError> {
    let reserved = config.reserved_prefix.as_str();
    if !reserved.is_empty()
        && record
            .path
            .strip_prefix(reserved)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    {
        return Err(ValidationError::new(format!(
            "Commits under {reserved} are not allowed - this directory is reserved for the \
             commitgen installation"
        )));
    }
    if record.path.contains(PRIVATE_MARKER) {
        return Err(ValidationError::new(
            "Commits of files named *_private.* are not allowed - these names are reserved.",
        ));
    }
    Ok(())
}

/// The hook must run for the repository the config describes.
///
/// Both paths are canonicalized when they exist, so symlinked or relative
/// spellings of the same repository match.
pub fn check_repository(config: &EngineConfig, repos: &Path) -> Result<(), ValidationError> {
    let canonical = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    if canonical(repos) == canonical(&config.repository) {
        return Ok(());
    }
    Err(ValidationError::new(format!(
        "commitgen is configured for repository {}, not {}",
        config.repository.display(),
        repos.display()
    )))
}

/// Validate a pending transaction.
///
/// Every record gets the transaction's author, passes the built-in policy
/// and is dispatched to the `pre*` events. The first failure rejects the
/// whole commit.
pub fn precommit(engine: &mut Engine, repo: &dyn Repository, txn: &str) -> Result<(), ValidationError> {
    let author = repo.author(txn)?;
    let at = Snapshot::Transaction(txn.to_string());
    let listing = repo.changed(&at)?;
    let changes = classify(
        &listing,
        Listing::Repository,
        &engine.config.repository_dir,
        repo,
        &Snapshot::Head,
        &at,
    );
    debug!(txn, author = %author, changes = changes.len(), "validating transaction");
    for mut record in changes {
        record.author = Some(author.clone());
        check_policy(&engine.config, &record)?;
        engine.dispatch_change(PRE_PREFIX, &mut record)?;
    }
    Ok(())
}

/// Bring the artifact store up to date with committed revision `rev`.
///
/// A queue recovered from an interrupted run is drained before the new
/// changes are looked at. If the artifact store itself is missing it is
/// recreated and fully regenerated instead.
pub fn postcommit(
    engine: &mut Engine,
    repo: &dyn Repository,
    rev: u64,
) -> Result<CommitReport, CommitError> {
    let root = engine.config.cache_root.clone();
    if !root.is_dir() {
        error!(cache_root = %root.display(), "artifact store is gone, regenerating everything");
        fs::create_dir_all(&root)?;
        return update_all(engine, repo);
    }

    let recovered = if engine.tracker.is_empty() {
        None
    } else {
        info!(
            entries = engine.tracker.recovered(),
            "draining queue of interrupted run"
        );
        Some(engine.drain_queue())
    };

    let at = Snapshot::Revision(rev);
    let listing = repo.changed(&at)?;
    let changes = classify(
        &listing,
        Listing::Repository,
        &engine.config.repository_dir,
        repo,
        &Snapshot::Revision(rev.saturating_sub(1)),
        &at,
    );
    debug!(rev, changes = changes.len(), "applying revision");

    let mut report = CommitReport {
        recovered,
        ..CommitReport::default()
    };
    for mut record in changes {
        if let Err(e) = engine.dispatch_change("", &mut record) {
            error!(path = %record.path, error = %e, "change handler failed");
            report.failures.push((record.path.clone(), e.to_string()));
        }
        report.changes.push(record);
    }
    report.drain = engine.drain_queue();
    Ok(report)
}

/// Regenerate the whole artifact store from the head revision.
///
/// The store is not emptied first; stale files from removed objects stay
/// where they are.
pub fn update_all(engine: &mut Engine, repo: &dyn Repository) -> Result<CommitReport, CommitError> {
    let mut report = dispatch_all_added(engine, repo)?;
    report.drain = engine.drain_queue();
    Ok(report)
}

/// Dispatch `dirAdded` / `fileAdded[_ext]` for every object at head, parents
/// before children.
fn dispatch_all_added(engine: &mut Engine, repo: &dyn Repository) -> Result<CommitReport, VcsError> {
    let entries = repo.tree("", &Snapshot::Head)?;
    info!(objects = entries.len().saturating_sub(1), "regenerating all objects");
    let mut report = CommitReport::default();
    for entry in entries.iter().filter(|e| e.as_str() != "/") {
        let mut record = ChangeRecord::from_tree_entry(entry, Status::Added);
        record.props = Status::Added;
        let result = match record.kind {
            Kind::Directory => engine.dispatch("dirAdded", &mut record),
            _ => {
                let ext = extension(&record.path).map(str::to_string);
                engine.dispatch_with_fallback("fileAdded", ext.as_deref(), &mut record)
            }
        };
        if let Err(e) = result {
            error!(path = %record.path, error = %e, "change handler failed");
            report.failures.push((record.path.clone(), e.to_string()));
        }
        report.changes.push(record);
    }
    Ok(report)
}

/// Make a commit of [`UPDATE_ALL_TRIGGER`] regenerate the whole store.
///
/// The regeneration happens inside pre-commit, including the drain. The
/// commit itself is always rejected so the trigger never lands in the
/// repository.
pub fn register_update_trigger(engine: &mut Engine, repo: Rc<dyn Repository>) {
    engine.subscribe("predirAdded", "updateAll", 0, update_trigger(Rc::clone(&repo)));
    engine.subscribe("prefileAdded_updateall", "updateAll", 0, update_trigger(repo));
}

fn update_trigger(
    repo: Rc<dyn Repository>,
) -> impl Fn(&mut Engine, &mut ChangeRecord) -> Result<(), HookError> {
    move |engine: &mut Engine, c: &mut ChangeRecord| {
        if c.path != UPDATE_ALL_TRIGGER {
            return Ok(());
        }
        info!(author = c.author.as_deref().unwrap_or("?"), "update-all requested");
        let report = dispatch_all_added(engine, repo.as_ref())?;
        let drain = engine.drain_queue();
        Err(HookError::Rejected(format!(
            "update-all: OK, regenerated {} objects and {} artifacts ({} failures)",
            report.changes.len(),
            drain.processed.len(),
            report.failures.len() + drain.failures.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror;
    use crate::vcs::MemoryRepository;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> Engine {
        Engine::open(EngineConfig::with_cache_root(tmp.path()))
    }

    fn record(path: &str) -> ChangeRecord {
        ChangeRecord::new(path, Status::Added, Kind::File)
    }

    #[test]
    fn policy_rejects_reserved_prefix() {
        let config = EngineConfig::default();
        assert!(check_policy(&config, &record("/commitgen")).is_err());
        assert!(check_policy(&config, &record("/commitgen/x.php")).is_err());
        assert!(check_policy(&config, &record("/commitgenx")).is_ok());
    }

    #[test]
    fn policy_rejects_private_names() {
        let config = EngineConfig::default();
        let err = check_policy(&config, &record("/a.txt_private.depend")).unwrap_err();
        assert!(err.message.contains("_private."));
    }

    #[test]
    fn empty_reserved_prefix_reserves_nothing() {
        let config = EngineConfig {
            reserved_prefix: String::new(),
            ..EngineConfig::default()
        };
        assert!(check_policy(&config, &record("/anything")).is_ok());
    }

    #[test]
    fn repository_check_matches_other_spellings_of_the_same_path() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig {
            repository: tmp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        assert!(check_repository(&config, tmp.path()).is_ok());
        assert!(check_repository(&config, &tmp.path().join(".")).is_ok());
    }

    #[test]
    fn repository_check_names_both_repositories() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig {
            repository: tmp.path().join("site"),
            ..EngineConfig::default()
        };
        let err = check_repository(&config, &tmp.path().join("other")).unwrap_err();
        assert!(err.message.contains("site"));
        assert!(err.message.contains("other"));
    }

    fn txn_repo(listing: &str) -> MemoryRepository {
        MemoryRepository::new()
            .with_author("7-1", "alice")
            .with_changes(Snapshot::Transaction("7-1".into()), listing)
    }

    #[test]
    fn precommit_dispatches_pre_events_with_author() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let seen: Rc<RefCell<Vec<String>>> = Rc::default();
        let s = Rc::clone(&seen);
        e.subscribe("prefileAdded", "check", 0, move |_, c: &mut ChangeRecord| {
            s.borrow_mut()
                .push(format!("{} by {}", c.path, c.author.as_deref().unwrap_or("")));
            Ok(())
        });
        let repo = txn_repo("A   trunk/a.txt\n");
        precommit(&mut e, &repo, "7-1").unwrap();
        assert_eq!(*seen.borrow(), vec!["/a.txt by alice"]);
    }

    #[test]
    fn precommit_surfaces_handler_message_verbatim() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        e.subscribe("prefileAdded_php", "php", 0, |_, _: &mut ChangeRecord| {
            Err(HookError::Rejected("Cannot commit PHP code in \"x.php\".".into()))
        });
        let repo = txn_repo("A   trunk/x.php\n");
        let err = precommit(&mut e, &repo, "7-1").unwrap_err();
        assert_eq!(err.message, "Cannot commit PHP code in \"x.php\".");
    }

    #[test]
    fn precommit_policy_runs_before_handlers() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let called = Rc::new(RefCell::new(false));
        let c2 = Rc::clone(&called);
        e.subscribe("preobjectChanged", "spy", 0, move |_, _: &mut ChangeRecord| {
            *c2.borrow_mut() = true;
            Ok(())
        });
        let repo = txn_repo("A   trunk/commitgen/evil.txt\n");
        assert!(precommit(&mut e, &repo, "7-1").is_err());
        assert!(!*called.borrow());
    }

    #[test]
    fn precommit_without_author_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let repo = MemoryRepository::new()
            .with_changes(Snapshot::Transaction("7-1".into()), "A   trunk/a.txt\n");
        assert!(precommit(&mut e, &repo, "7-1").is_err());
    }

    #[test]
    fn postcommit_isolates_failing_records() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let repo = MemoryRepository::new()
            .with_changes(Snapshot::Revision(3), "A   trunk/bad.txt\nA   trunk/good.txt\n")
            .with_file("/good.txt", "ok");
        mirror::register(&mut e, Rc::new(repo.clone()));

        let report = postcommit(&mut e, &repo, 3).unwrap();
        assert_eq!(report.changes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "/bad.txt");
        assert!(tmp.path().join("good.txt").exists());
    }

    #[test]
    fn postcommit_drains_recovered_queue_first() {
        let tmp = TempDir::new().unwrap();
        engine(&tmp).tracker.enqueue("/stale.html");

        let mut e = engine(&tmp);
        let repo = MemoryRepository::new().with_changes(Snapshot::Revision(4), "");
        let report = postcommit(&mut e, &repo, 4).unwrap();
        let recovered = report.recovered.unwrap();
        assert_eq!(recovered.processed, vec![("/stale.html".to_string(), 1)]);
        assert!(report.drain.processed.is_empty());
    }

    #[test]
    fn postcommit_recreates_missing_store() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("www");
        let mut e = Engine::open(EngineConfig::with_cache_root(&root));
        let repo = MemoryRepository::new()
            .with_tree(Snapshot::Head, &["/d/", "/d/x.txt"])
            .with_file("/d/x.txt", "x");
        mirror::register(&mut e, Rc::new(repo.clone()));

        let report = postcommit(&mut e, &repo, 9).unwrap();
        assert_eq!(report.changes.len(), 2);
        assert_eq!(fs::read_to_string(root.join("d/x.txt")).unwrap(), "x");
    }

    #[test]
    fn update_all_fakes_additions_parents_first() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let repo = MemoryRepository::new()
            .with_tree(Snapshot::Head, &["/a.txt", "/d/", "/d/b.redir"])
            .with_file("/a.txt", "a")
            .with_file("/d/b.redir", "b");
        mirror::register(&mut e, Rc::new(repo.clone()));
        let redirs: Rc<RefCell<Vec<String>>> = Rc::default();
        let r = Rc::clone(&redirs);
        e.subscribe("fileAdded_redir", "redir", 0, move |_, c: &mut ChangeRecord| {
            r.borrow_mut().push(c.path.clone());
            c.handled = true;
            Ok(())
        });

        let report = update_all(&mut e, &repo).unwrap();

        let paths: Vec<_> = report.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/a.txt", "/d", "/d/b.redir"]);
        assert!(tmp.path().join("a.txt").exists());
        assert!(tmp.path().join("d").is_dir());
        assert!(!tmp.path().join("d/b.redir").exists());
        assert_eq!(*redirs.borrow(), vec!["/d/b.redir"]);
    }

    #[test]
    fn update_trigger_regenerates_and_rejects() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let repo = Rc::new(
            txn_repo("A   trunk/.updateall\n")
                .with_tree(Snapshot::Head, &["/a.txt"])
                .with_file("/a.txt", "a"),
        );
        mirror::register(&mut e, repo.clone());
        register_update_trigger(&mut e, repo.clone());

        let err = precommit(&mut e, repo.as_ref(), "7-1").unwrap_err();
        assert!(err.message.starts_with("update-all: OK"));
        assert!(tmp.path().join("a.txt").exists());
    }

    #[test]
    fn update_trigger_ignores_other_paths() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(&tmp);
        let repo = Rc::new(txn_repo("A   trunk/docs.updateall\nA   trunk/d/\n"));
        register_update_trigger(&mut e, repo.clone());
        precommit(&mut e, repo.as_ref(), "7-1").unwrap();
    }
}
