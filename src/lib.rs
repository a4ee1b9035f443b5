//! # commitgen
//!
//! Incremental regeneration of a generated artifact tree from Subversion
//! commit hooks. The repository holds sources; the artifact store (usually a
//! web server's document root) holds a mirror of them plus whatever handlers
//! generate from them. Every commit updates only what it has to.
//!
//! # Architecture: Events, Dependencies, Queue
//!
//! ```text
//! svnlook changed  →  classify  →  change events  →  handlers
//!                                                       │ declare_dependency
//!                                                       │ notify_changed
//!                                                       ▼
//!                     regeneration events  ←  queue  ←  edge files
//! ```
//!
//! 1. The **classifier** turns the repository's change listing into typed
//!    records, expanding directory renames into per-object deletes and adds.
//! 2. **Hooks** deliver each record to handlers subscribed to its event
//!    (`fileAdded_xhtml`, `dirDeleted`, ...), highest priority first.
//! 3. While generating an artifact, handlers **declare** the sources they
//!    read. When a source changes, the **tracker** queues every artifact
//!    built from it.
//! 4. **Draining** the queue dispatches a regeneration event per artifact,
//!    which may queue further artifacts, until nothing is left.
//!
//! All bookkeeping lives in the artifact store next to the objects it
//! describes, in files containing `_private.` that the web server should
//! never serve.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`change`] | Change listing parser and directory-rename reconstruction |
//! | [`hook`] | Priority-ordered subscriber tables and event naming |
//! | [`engine`] | The [`Engine`](engine::Engine) value owning hooks, tracker and store; dispatch and drain |
//! | [`depend`] | Dependency edge files, the regeneration queue and its crash-safe mirror |
//! | [`autodel`] | Derived files deleted along with their source |
//! | [`mirror`] | Fallback handlers copying committed objects into the store |
//! | [`commit`] | Pre-commit, post-commit and update-all drivers |
//! | [`vcs`] | Repository access: `svnlook` backend, in-memory backend, tree parser |
//! | [`config`] | `commitgen.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Engine, No Globals
//!
//! Hook tables, the tracker and the auto-delete store hang off an
//! [`Engine`](engine::Engine) that every handler receives as `&mut`. A
//! process runs exactly one engine; tests open as many as they need, each on
//! its own temporary store.
//!
//! ## Self-Healing Dependencies
//!
//! Edges are never removed one by one. Notifying a source queues its
//! dependents and empties its edge file; regenerating the dependents
//! declares whatever is still true. A stale edge costs one needless
//! regeneration, never a missed one.
//!
//! ## Bounded Cycles
//!
//! Dependency loops are legal. Within one drain an artifact that has been
//! regenerated more than `cycle_limit` times no longer triggers its
//! dependents, so every drain terminates.
//!
//! ## Crash Safety
//!
//! Every queued path is appended to a mirror file immediately; the file is
//! removed when a drain completes. If a post-commit run dies, the next one
//! finds the mirror and drains it before anything else. Edge and auto-delete
//! files are replaced by write-then-rename.

pub mod autodel;
pub mod change;
pub mod commit;
pub mod config;
pub mod depend;
pub mod engine;
pub mod hook;
pub mod mirror;
pub mod output;
pub mod vcs;
