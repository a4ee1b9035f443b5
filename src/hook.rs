//! Priority-ordered publish/subscribe hooks.
//!
//! Every collaborator that reacts to commits does so by subscribing a
//! handler to a named event. The publisher (a commit driver, or the
//! regeneration queue) calls [`Engine::dispatch`](crate::engine::Engine::dispatch)
//! with the event name and a mutable argument; subscribers run highest
//! priority first.
//!
//! ## Event Names
//!
//! Names are plain strings built from a few conventions:
//!
//! ```text
//! fileAdded            kind × action
//! fileAdded_redir      ... restricted to one file extension
//! prefileAdded_redir   ... dispatched during pre-commit validation
//! artifactNeedsRegeneration_html
//! ```
//!
//! Extension-specific events are tried first. If a subscriber marks the
//! argument finished, the generic event is skipped, which lets a `.redir`
//! handler at priority 0 keep the generic mirror handler at priority −50
//! from ever seeing the record.
//!
//! ## Early Termination
//!
//! After each handler returns, dispatch stops if the argument reports
//! [`HookArgument::is_finished`]. Handlers with equal priority run in
//! subscription order, but callers must not rely on that.

use crate::engine::Engine;
use crate::vcs::VcsError;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    /// Policy violation; the message is shown to the committing user.
    #[error("{0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Repository error: {0}")]
    Vcs(#[from] VcsError),
    #[error("Hook failed: {0}")]
    Failed(String),
}

/// Signature of every subscriber.
pub type Handler<A> = dyn Fn(&mut Engine, &mut A) -> Result<(), HookError>;

/// Implemented by every type that can be passed through a dispatch.
///
/// The table accessors route a dispatch to the [`HookTable`] holding
/// subscribers for this argument type.
pub trait HookArgument: Sized + 'static {
    /// True once a subscriber has fully dealt with the argument.
    fn is_finished(&self) -> bool;

    fn table(engine: &Engine) -> &HookTable<Self>;

    fn table_mut(engine: &mut Engine) -> &mut HookTable<Self>;
}

struct Subscription<A> {
    handler_id: String,
    priority: i32,
    seq: u64,
    handler: Rc<Handler<A>>,
}

/// Event name → subscribers, kept sorted by descending priority.
pub struct HookTable<A> {
    events: HashMap<String, Vec<Subscription<A>>>,
    next_seq: u64,
}

impl<A> Default for HookTable<A> {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<A> HookTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` under `handler_id` to `event`.
    ///
    /// A handler id appears at most once per event: subscribing an id that
    /// is already present replaces its handler and priority.
    pub fn subscribe<F>(&mut self, event: &str, handler_id: &str, priority: i32, handler: F)
    where
        F: Fn(&mut Engine, &mut A) -> Result<(), HookError> + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        let list = self.events.entry(event.to_string()).or_default();
        list.retain(|s| s.handler_id != handler_id);
        list.push(Subscription {
            handler_id: handler_id.to_string(),
            priority,
            seq,
            handler: Rc::new(handler),
        });
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Whether anybody subscribed to `event`.
    pub fn has_subscribers(&self, event: &str) -> bool {
        self.events.get(event).is_some_and(|l| !l.is_empty())
    }

    /// Handler ids for `event` in call order.
    pub fn handler_ids(&self, event: &str) -> Vec<&str> {
        self.events
            .get(event)
            .map(|l| l.iter().map(|s| s.handler_id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Highest-priority subscriber of `event` not yet in `called`, with a
    /// priority of at most `ceiling`.
    ///
    /// Re-evaluated after every handler so that subscriptions made during a
    /// dispatch are picked up, while handlers already invoked are skipped.
    /// Passing the priority of the last handler called as `ceiling` keeps a
    /// late, higher-priority subscriber out of the running dispatch.
    pub(crate) fn next_uncalled(
        &self,
        event: &str,
        called: &HashSet<String>,
        ceiling: i32,
    ) -> Option<(String, i32, Rc<Handler<A>>)> {
        self.events
            .get(event)?
            .iter()
            .find(|s| s.priority <= ceiling && !called.contains(&s.handler_id))
            .map(|s| (s.handler_id.clone(), s.priority, Rc::clone(&s.handler)))
    }
}

/// The extension used for extension-specific events, if the leaf name has one.
///
/// `/dir/page.redir` → `Some("redir")`, `/dir.d/README` → `None`.
pub fn extension(path: &str) -> Option<&str> {
    let leaf_start = path.rfind('/').map(|n| n + 1).unwrap_or(0);
    let leaf = &path[leaf_start..];
    let dot = leaf.rfind('.')?;
    let ext = &leaf[dot + 1..];
    (!ext.is_empty()).then_some(ext)
}

/// `fileAdded` + `redir` → `fileAdded_redir`.
pub fn with_extension(event: &str, ext: &str) -> String {
    format!("{event}_{ext}")
}
