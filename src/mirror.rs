//! Fallback handlers that mirror committed objects into the artifact store.
//!
//! Registered at priority −50 for the unprefixed change events, so any
//! extension handler at the default priority can take over a record by
//! marking it handled. Whatever nobody else claims ends up in the store
//! exactly as committed:
//!
//! | Event | Store | Sources notified |
//! |---|---|---|
//! | `dirAdded` | create directory | parent listing, directory |
//! | `dirDeleted` | remove subtree | parent listing, own listing, directory |
//! | `fileAdded` | copy content | parent listing, file |
//! | `fileUpdated` | copy content, drop derived outputs | file |
//! | `fileDeleted` | drop file, bookkeeping and outputs | parent listing, file |
//!
//! Content is copied to `<file>_private.tmp` first and renamed into place,
//! so the web server never serves a half-written file.

use crate::autodel::LabelFilter;
use crate::change::ChangeRecord;
use crate::depend::{PRIVATE_MARKER, parent_listing, store_path};
use crate::engine::Engine;
use crate::hook::HookError;
use crate::vcs::{Repository, Snapshot};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;
use walkdir::WalkDir;

pub const MIRROR_PRIORITY: i32 = -50;

/// Subscribe the mirror handlers. File content is read from the head
/// revision of `repo`.
pub fn register(engine: &mut Engine, repo: Rc<dyn Repository>) {
    engine.subscribe("dirAdded", "mirror.dirAdded", MIRROR_PRIORITY, dir_added);
    engine.subscribe("dirDeleted", "mirror.dirDeleted", MIRROR_PRIORITY, dir_deleted);

    let r = Rc::clone(&repo);
    engine.subscribe(
        "fileAdded",
        "mirror.fileAdded",
        MIRROR_PRIORITY,
        move |engine: &mut Engine, c: &mut ChangeRecord| {
            engine.tracker.notify_changed(&parent_listing(&c.path));
            engine.tracker.notify_changed(&c.path);
            copy_in(engine, r.as_ref(), &c.path)
        },
    );

    let r = Rc::clone(&repo);
    engine.subscribe(
        "fileUpdated",
        "mirror.fileUpdated",
        MIRROR_PRIORITY,
        move |engine: &mut Engine, c: &mut ChangeRecord| {
            engine.tracker.notify_changed(&c.path);
            copy_in(engine, r.as_ref(), &c.path)?;
            engine.autodel.perform(&c.path, LabelFilter::All, false, false);
            Ok(())
        },
    );

    engine.subscribe("fileDeleted", "mirror.fileDeleted", MIRROR_PRIORITY, file_deleted);
}

fn dir_added(engine: &mut Engine, c: &mut ChangeRecord) -> Result<(), HookError> {
    engine.tracker.notify_changed(&parent_listing(&c.path));
    engine.tracker.notify_changed(&c.path);
    let dir = store_path(engine.tracker.root(), &c.path);
    if !dir.exists() {
        debug!(path = %c.path, "creating directory");
        fs::create_dir(&dir)?;
    }
    Ok(())
}

fn dir_deleted(engine: &mut Engine, c: &mut ChangeRecord) -> Result<(), HookError> {
    engine.tracker.notify_changed(&parent_listing(&c.path));
    engine.tracker.notify_changed(&format!("{}/", c.path));
    engine.tracker.notify_changed(&c.path);
    remove_tree(engine.tracker.root(), &c.path)
}

fn file_deleted(engine: &mut Engine, c: &mut ChangeRecord) -> Result<(), HookError> {
    engine.tracker.notify_changed(&parent_listing(&c.path));
    // Must run before the edge file goes away with the private siblings.
    engine.tracker.notify_changed(&c.path);
    engine.autodel.perform(&c.path, LabelFilter::All, true, true);
    Ok(())
}

/// Copy the committed content of `path` into the store.
fn copy_in(engine: &Engine, repo: &dyn Repository, path: &str) -> Result<(), HookError> {
    let dest = store_path(engine.tracker.root(), path);
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(format!("{PRIVATE_MARKER}tmp"));
    let tmp = Path::new(&tmp);
    debug!(path, "copying committed content");
    repo.cat_to_file(path, &Snapshot::Head, tmp)?;
    fs::rename(tmp, &dest)?;
    Ok(())
}

/// Remove the store directory for `path` and everything below it.
///
/// Symlinks are removed, never followed. Paths that could escape the store
/// are refused.
pub fn remove_tree(root: &Path, path: &str) -> Result<(), HookError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|seg| seg == ".." || seg == ".") {
        return Err(HookError::Failed(format!(
            "refusing to delete {path:?} from the artifact store"
        )));
    }
    let dir = store_path(root, path);
    if fs::symlink_metadata(&dir).is_err() {
        return Ok(());
    }
    debug!(path, "removing directory");
    for entry in WalkDir::new(&dir).contents_first(true).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
