//! Update propagation from the bound objects to the views.
//!
//! A refresh walks the whole tree from its root, re-reads every cached value
//! and collects the contexts whose value changed. Listeners are only called
//! once the walk is complete, so none of them sees a half refreshed tree.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::ClockSnapshot;
use crate::context::{BindingContext, Role, Specifier, UpdateEvent};
use crate::delay::DelayedTask;
use crate::value::Value;

/// Task type prefix of deferred refreshes; one type per tree.
pub const REFRESH_TASK: &str = "refresh";

struct Change {
    context: Arc<BindingContext>,
    value: Value,
    clock: ClockSnapshot,
}

impl BindingContext {
    /// Refreshes the tree this context belongs to. `cause` is the context
    /// whose edit triggered the refresh: its cache is brought up to date but
    /// its listeners are not called. Returns the number of changed contexts.
    pub fn refresh_from_root(self: &Arc<Self>, cause: Option<&Arc<BindingContext>>) -> usize {
        let root = self.root();
        if root.is_shut_down() {
            return 0;
        }
        let changes = {
            let _scan = root.tree().refresh_lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut changes = Vec::new();
            scan(&root, cause, &mut changes);
            changes
        };
        debug!(tree = root.tree_id(), changed = changes.len(), cause = cause.map(|c| c.name()), "refresh");
        let cause = cause.cloned();
        for change in &changes {
            change.context.notify(&UpdateEvent {
                cause: cause.clone(),
                value: change.value.clone(),
                clock: change.clock,
            });
        }
        changes.len()
    }

    /// Queues a refresh on the delay queue. Bursts of edits on one tree
    /// collapse into a single refresh with this context as its cause.
    pub fn schedule_refresh(self: &Arc<Self>) {
        let tree = self.tree();
        if self.is_shut_down() {
            return;
        }
        let seq = tree.refresh_seq.increment();
        let cause = Arc::downgrade(self);
        let task_type = format!("{}-{}", REFRESH_TASK, tree.id);
        trace!(context = %self.name(), seq = %seq, "refresh scheduled");
        tree.services.delay_queue().schedule(DelayedTask::new(&task_type, seq, move || {
            if let Some(cause) = cause.upgrade() {
                cause.refresh_from_root(Some(&cause));
            }
        }));
    }
}

fn scan(ctx: &Arc<BindingContext>, cause: Option<&Arc<BindingContext>>, changes: &mut Vec<Change>) {
    let Some(repr) = ctx.representation() else { return };
    if ctx.role() != Role::Root && !repr.is_action() && !ctx.in_collection() {
        check(ctx, cause, changes);
    }
    if repr.continue_to_children() {
        for child in ctx.children() {
            scan(&child, cause, changes);
        }
    }
}

/// Re-reads one context from its parent's (already refreshed) cache.
fn check(ctx: &Arc<BindingContext>, cause: Option<&Arc<BindingContext>>, changes: &mut Vec<Change>) {
    let Some(parent) = ctx.parent() else { return };
    let parent_value = parent.cached().value_or_null();
    // failures were reported by fetch; the node keeps its old value
    let Ok(value) = ctx.fetch(&parent_value, &Specifier::none()) else { return };
    if !ctx.has_changed(&value) {
        return;
    }
    let is_cause = cause.map(|c| Arc::ptr_eq(c, ctx)).unwrap_or(false);
    ctx.store_source(value.clone());
    if is_cause {
        return;
    }
    let clock = ctx.task_clock().increment();
    changes.push(Change {
        context: Arc::clone(ctx),
        value,
        clock,
    });
}
