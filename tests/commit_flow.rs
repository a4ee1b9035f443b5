//! End-to-end commit flow against an in-memory repository.
//!
//! Each hook invocation opens a fresh engine on the same artifact store, the
//! way separate hook processes would. A small generator collaborator turns
//! every `*.src` file into `*.src.html`, prefixed with the content of
//! `/menu.navmenu`, and declares both as dependencies.

use commitgen::change::ChangeRecord;
use commitgen::commit;
use commitgen::config::EngineConfig;
use commitgen::depend::{QUEUE_FILENAME, store_path};
use commitgen::engine::{Engine, RegenerationRequest};
use commitgen::hook::HookError;
use commitgen::mirror;
use commitgen::vcs::{MemoryRepository, Snapshot};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

const MENU: &str = "/menu.navmenu";

fn register_generator(engine: &mut Engine) {
    engine.subscribe(
        "fileAdded_src",
        "generator",
        0,
        |engine: &mut Engine, c: &mut ChangeRecord| {
            let artifact = format!("{}.html", c.path);
            engine.autodel.register(&c.path, &artifact, "generator");
            engine.tracker.enqueue(&artifact);
            Ok(())
        },
    );
    engine.subscribe(
        "artifactNeedsRegeneration_html",
        "generator",
        0,
        |engine: &mut Engine, r: &mut RegenerationRequest| {
            let Some(source) = r.path.strip_suffix(".html") else {
                return Ok(());
            };
            let root = engine.tracker.root().to_path_buf();
            engine
                .tracker
                .declare_dependency(Some(r.path.as_str()), Some(source));
            engine
                .tracker
                .declare_dependency(Some(r.path.as_str()), Some(MENU));
            let Ok(body) = fs::read_to_string(store_path(&root, source)) else {
                return Ok(());
            };
            let menu = fs::read_to_string(store_path(&root, MENU)).unwrap_or_default();
            fs::write(store_path(&root, &r.path), format!("{menu}|{body}"))?;
            r.handled = true;
            Ok(())
        },
    );
}

fn open(root: &Path, repo: &Rc<MemoryRepository>) -> Engine {
    let mut engine = Engine::open(EngineConfig::with_cache_root(root));
    mirror::register(&mut engine, repo.clone());
    commit::register_update_trigger(&mut engine, repo.clone());
    register_generator(&mut engine);
    engine
}

fn post(root: &Path, repo: MemoryRepository, rev: u64) -> commit::CommitReport {
    let repo = Rc::new(repo);
    let mut engine = open(root, &repo);
    commit::postcommit(&mut engine, repo.as_ref(), rev).unwrap()
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(store_path(root, path)).unwrap()
}

/// Revision 1: a menu, a directory and one page.
fn initial_revision(root: &Path) {
    let repo = MemoryRepository::new()
        .with_changes(
            Snapshot::Revision(1),
            "A   trunk/menu.navmenu\nA   trunk/d/\nA   trunk/d/page.src\n",
        )
        .with_file(MENU, "menu v1")
        .with_file("/d/page.src", "page v1");
    let report = post(root, repo, 1);
    assert!(report.failures.is_empty());
    assert!(report.drain.failures.is_empty());
}

#[test]
fn added_sources_are_mirrored_and_generated() {
    let tmp = TempDir::new().unwrap();
    initial_revision(tmp.path());

    assert_eq!(read(tmp.path(), MENU), "menu v1");
    assert_eq!(read(tmp.path(), "/d/page.src"), "page v1");
    assert_eq!(read(tmp.path(), "/d/page.src.html"), "menu v1|page v1");
    assert!(!tmp.path().join(QUEUE_FILENAME).exists());
}

#[test]
fn updating_a_shared_source_regenerates_dependents() {
    let tmp = TempDir::new().unwrap();
    initial_revision(tmp.path());

    let repo = MemoryRepository::new()
        .with_changes(Snapshot::Revision(2), "U   trunk/menu.navmenu\n")
        .with_file(MENU, "menu v2");
    let report = post(tmp.path(), repo, 2);

    assert_eq!(
        report.drain.processed,
        vec![("/d/page.src.html".to_string(), 1)]
    );
    assert_eq!(read(tmp.path(), "/d/page.src.html"), "menu v2|page v1");
}

#[test]
fn renamed_directory_moves_sources_and_artifacts() {
    let tmp = TempDir::new().unwrap();
    initial_revision(tmp.path());

    let repo = MemoryRepository::new()
        .with_changes(Snapshot::Revision(2), "D   trunk/d/\nA   trunk/e/\n")
        .with_tree(Snapshot::Revision(1), &["/d/", "/d/page.src", "/menu.navmenu"])
        .with_tree(Snapshot::Revision(2), &["/e/", "/e/page.src", "/menu.navmenu"])
        .with_file("/e/page.src", "page v1");
    let report = post(tmp.path(), repo, 2);

    let changes: Vec<String> = report.changes.iter().map(|c| c.to_string()).collect();
    assert_eq!(
        changes,
        vec!["D  /d/page.src", "D  /d/", "A  /e/", "A  /e/page.src"]
    );
    assert!(!tmp.path().join("d").exists());
    assert_eq!(read(tmp.path(), "/e/page.src.html"), "menu v1|page v1");
}

#[test]
fn deleted_source_takes_its_artifact_along() {
    let tmp = TempDir::new().unwrap();
    initial_revision(tmp.path());

    let repo = MemoryRepository::new()
        .with_changes(Snapshot::Revision(2), "D   trunk/d/page.src\n");
    post(tmp.path(), repo, 2);

    let left: Vec<String> = fs::read_dir(tmp.path().join("d"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.contains("_private."))
        .collect();
    assert!(left.is_empty(), "left behind: {left:?}");
}

#[test]
fn interrupted_drain_is_finished_by_next_commit() {
    let tmp = TempDir::new().unwrap();
    initial_revision(tmp.path());
    fs::write(tmp.path().join("d/page.src.html"), "half written").unwrap();
    fs::write(tmp.path().join(QUEUE_FILENAME), "/d/page.src.html\n").unwrap();

    let repo = MemoryRepository::new().with_changes(Snapshot::Revision(2), "");
    let report = post(tmp.path(), repo, 2);

    let recovered = report.recovered.expect("queue should have been recovered");
    assert_eq!(
        recovered.processed,
        vec![("/d/page.src.html".to_string(), 1)]
    );
    assert_eq!(read(tmp.path(), "/d/page.src.html"), "menu v1|page v1");
    assert!(!tmp.path().join(QUEUE_FILENAME).exists());
}

// =========================================================================
// Pre-commit
// =========================================================================

fn pre(root: &Path, listing: &str) -> Result<(), commit::ValidationError> {
    let repo = Rc::new(
        MemoryRepository::new()
            .with_author("3-a", "bob")
            .with_changes(Snapshot::Transaction("3-a".into()), listing),
    );
    let mut engine = open(root, &repo);
    engine.subscribe(
        "prefileAdded_php",
        "php",
        0,
        |_: &mut Engine, c: &mut ChangeRecord| {
            Err(HookError::Rejected(format!(
                "{} may not commit PHP code",
                c.author.as_deref().unwrap_or("?")
            )))
        },
    );
    commit::precommit(&mut engine, repo.as_ref(), "3-a")
}

#[test]
fn ordinary_commit_is_accepted_without_touching_the_store() {
    let tmp = TempDir::new().unwrap();
    pre(tmp.path(), "A   trunk/a.txt\nA   trunk/d/\n").unwrap();
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn collaborator_rejection_reaches_the_committer() {
    let tmp = TempDir::new().unwrap();
    let err = pre(tmp.path(), "A   trunk/a.txt\nA   trunk/x.php\n").unwrap_err();
    assert_eq!(err.to_string(), "bob may not commit PHP code");
}

#[test]
fn bookkeeping_names_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let err = pre(tmp.path(), "A   trunk/a.txt_private.depend\n").unwrap_err();
    assert!(err.message.contains("reserved"));
}

#[test]
fn changes_outside_the_content_tree_are_ignored() {
    let tmp = TempDir::new().unwrap();
    pre(tmp.path(), "A   branches/x.php\n").unwrap();
}
