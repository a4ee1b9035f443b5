//! The engine value shared by every collaborator.
//!
//! An [`Engine`] owns everything that reacts to a commit: the configuration,
//! one hook table per argument type, the dependency tracker and the
//! auto-delete store. Handlers receive `&mut Engine` so they can declare
//! dependencies, queue regeneration or subscribe further handlers while a
//! dispatch is running. Nothing is process-global; tests open as many
//! isolated engines as they like.
//!
//! ## Change Events
//!
//! [`Engine::dispatch_change`] turns one [`ChangeRecord`] into up to three
//! dispatches:
//!
//! ```text
//! objectChanged               every record, handled flag reset afterwards
//! fileAdded_redir             files with an extension
//! fileAdded                   unless the previous one marked it handled
//! ```
//!
//! The validation driver prefixes all three with `pre`.
//!
//! ## Regeneration Events
//!
//! [`Engine::drain_queue`] dispatches `artifactNeedsRegeneration_<ext>` and
//! then `artifactNeedsRegeneration` with a [`RegenerationRequest`] for every
//! queued path until the queue is empty.

use crate::autodel::AutoDeleteStore;
use crate::change::{ChangeRecord, Kind};
use crate::config::EngineConfig;
use crate::depend::DependencyTracker;
use crate::hook::{HookArgument, HookError, HookTable, extension, with_extension};
use std::collections::HashSet;
use tracing::{debug, error, warn};

/// Event dispatched for every object handed to the change hooks.
pub const OBJECT_CHANGED_EVENT: &str = "objectChanged";

/// Generic event dispatched for every queued artifact.
pub const REGENERATE_EVENT: &str = "artifactNeedsRegeneration";

/// Argument of regeneration events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationRequest {
    /// Store-absolute path of the artifact to rebuild.
    pub path: String,
    /// Set by a handler that rebuilt the artifact.
    pub handled: bool,
}

impl RegenerationRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            handled: false,
        }
    }
}

/// What a drain did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Paths in processing order with the per-drain regeneration count.
    pub processed: Vec<(String, u32)>,
    /// Paths whose handlers failed, with the error message.
    pub failures: Vec<(String, String)>,
}

pub struct Engine {
    pub config: EngineConfig,
    pub change_hooks: HookTable<ChangeRecord>,
    pub regen_hooks: HookTable<RegenerationRequest>,
    pub tracker: DependencyTracker,
    pub autodel: AutoDeleteStore,
}

impl Engine {
    /// Open an engine on the configured artifact store. A queue left behind
    /// by an interrupted run is loaded but not drained.
    pub fn open(config: EngineConfig) -> Self {
        let tracker = DependencyTracker::open(&config.cache_root, config.cycle_limit);
        let autodel = AutoDeleteStore::new(&config.cache_root);
        Self {
            config,
            change_hooks: HookTable::new(),
            regen_hooks: HookTable::new(),
            tracker,
            autodel,
        }
    }

    /// Subscribe a handler to `event` in the table for argument type `A`.
    pub fn subscribe<A, F>(&mut self, event: &str, handler_id: &str, priority: i32, handler: F)
    where
        A: HookArgument,
        F: Fn(&mut Engine, &mut A) -> Result<(), HookError> + 'static,
    {
        A::table_mut(self).subscribe(event, handler_id, priority, handler);
    }

    /// Call the subscribers of `event`, highest priority first.
    ///
    /// Each handler id runs at most once per dispatch, even if it subscribes
    /// again while running. A handler subscribed during the dispatch runs in
    /// it only if its priority is not above the one currently running. Stops after the first handler that leaves `arg`
    /// finished, or at the first error.
    pub fn dispatch<A: HookArgument>(&mut self, event: &str, arg: &mut A) -> Result<(), HookError> {
        let mut called = HashSet::new();
        let mut ceiling = i32::MAX;
        while let Some((id, priority, handler)) =
            A::table(self).next_uncalled(event, &called, ceiling)
        {
            called.insert(id.clone());
            ceiling = priority;
            debug!(event, handler = %id, "calling hook");
            handler(self, arg)?;
            if arg.is_finished() {
                debug!(event, handler = %id, "hook finished dispatch");
                break;
            }
        }
        Ok(())
    }

    /// Dispatch `<event>_<ext>`, then `event` unless the first one finished
    /// the argument. Without an extension only `event` is dispatched.
    pub fn dispatch_with_fallback<A: HookArgument>(
        &mut self,
        event: &str,
        ext: Option<&str>,
        arg: &mut A,
    ) -> Result<(), HookError> {
        if let Some(ext) = ext {
            self.dispatch(&with_extension(event, ext), arg)?;
            if arg.is_finished() {
                return Ok(());
            }
        }
        self.dispatch(event, arg)
    }

    /// Dispatch the events for one change. `prefix` is `"pre"` on the
    /// validation path and empty after the commit.
    ///
    /// Conflicted records and records of unknown kind are logged and skipped.
    pub fn dispatch_change(&mut self, prefix: &str, record: &mut ChangeRecord) -> Result<(), HookError> {
        if record.is_conflicted() {
            error!(path = %record.path, cache_root = %self.config.cache_root.display(),
                "conflict reported for committed change, artifact store may be inconsistent");
            return Ok(());
        }
        let Some(kind) = record.kind.event_prefix() else {
            warn!(path = %record.path, "change of unknown object kind, skipping");
            return Ok(());
        };
        let Some(action) = record.action() else {
            debug!(path = %record.path, "nothing changed");
            return Ok(());
        };

        self.dispatch(&format!("{prefix}{OBJECT_CHANGED_EVENT}"), record)?;
        record.handled = false;

        let event = format!("{prefix}{kind}{}", action.as_str());
        let ext = match record.kind {
            Kind::File => extension(&record.path).map(str::to_string),
            _ => None,
        };
        debug!(event = %event, ext = ext.as_deref().unwrap_or(""), path = %record.path,
            "dispatching change");
        self.dispatch_with_fallback(&event, ext.as_deref(), record)
    }

    /// Regenerate queued artifacts until the queue is empty.
    ///
    /// Handler errors are logged and recorded per artifact; the drain
    /// carries on with the rest of the queue. Per-drain counters and the
    /// queue mirror are reset once the queue is empty.
    pub fn drain_queue(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some((path, count)) = self.tracker.pop_next() {
            debug!(path = %path, count, "regenerating");
            let mut request = RegenerationRequest::new(path.as_str());
            if let Err(e) =
                self.dispatch_with_fallback(REGENERATE_EVENT, extension(&path), &mut request)
            {
                error!(path = %path, error = %e, "regeneration failed");
                report.failures.push((path.clone(), e.to_string()));
            }
            report.processed.push((path, count));
        }
        self.tracker.finish_drain();
        report
    }
}

impl HookArgument for ChangeRecord {
    fn is_finished(&self) -> bool {
        self.handled
    }

    fn table(engine: &Engine) -> &HookTable<Self> {
        &engine.change_hooks
    }

    fn table_mut(engine: &mut Engine) -> &mut HookTable<Self> {
        &mut engine.change_hooks
    }
}

impl HookArgument for RegenerationRequest {
    fn is_finished(&self) -> bool {
        self.handled
    }

    fn table(engine: &Engine) -> &HookTable<Self> {
        &engine.regen_hooks
    }

    fn table_mut(engine: &mut Engine) -> &mut HookTable<Self> {
        &mut engine.regen_hooks
    }
}
