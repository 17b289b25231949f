//! Preferences: per-context nodes over a [`ValueStore`], value histories and
//! named snapshots of a whole bound tree.
//!
//! Store layout under the bound type's node (`/<package>/<Name>`):
//!
//! ```text
//! $default/              current values
//!     $value             JSON of the context's value
//!     $history/<slot>/   index, value (JSON), time (ISO-8601)
//!     <property>/        same structure for each member
//! $launchPrefs           "", "empty" or a snapshot UUID
//! $saved/<n>/            $name, $uuid, then the $default structure
//! ```

use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::ClockSnapshot;
use crate::context::{BindingContext, Specifier};
use crate::error::{AutobindError, Result};
use crate::store::{check_length, join, ValueStore};

pub const DEFAULT_NODE: &str = "$default";
pub const VALUE_KEY: &str = "$value";
pub const HISTORY_NODE: &str = "$history";
pub const LAUNCH_PREFS_KEY: &str = "$launchPrefs";
pub const SAVED_NODE: &str = "$saved";
pub const NAME_KEY: &str = "$name";
pub const UUID_KEY: &str = "$uuid";

/// Cuts `text` to at most `max` characters for log output.
pub fn truncated(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}

// ------------- Preferences -------------
/// Handle on one store node. Creating a handle does not create the node;
/// the first write does.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn ValueStore>,
    path: String,
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Preferences({})", self.path)
    }
}

impl Preferences {
    pub fn new(store: Arc<dyn ValueStore>, path: &str) -> Self {
        Self {
            store,
            path: path.to_string(),
        }
    }
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
    pub fn store(&self) -> &Arc<dyn ValueStore> {
        &self.store
    }
    pub fn child(&self, key: &str) -> Preferences {
        Preferences::new(Arc::clone(&self.store), &join(&self.path, key))
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.store.get(&self.path, key)
    }
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.store.put(&self.path, key, value)
    }
    /// Unparseable entries read as absent.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_string(key)?.and_then(|s| s.trim().parse().ok()))
    }
    pub fn put_int(&self, key: &str, value: i64) -> Result<()> {
        self.put_string(key, &value.to_string())
    }
    pub fn has_entry_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key)?.is_some())
    }
    pub fn has_node_key(&self, key: &str) -> Result<bool> {
        self.store.node_exists(&join(&self.path, key))
    }
    pub fn exists(&self) -> Result<bool> {
        self.store.node_exists(&self.path)
    }
    pub fn keys(&self) -> Result<Vec<String>> {
        self.store.keys(&self.path)
    }
    pub fn child_names(&self) -> Result<Vec<String>> {
        self.store.children(&self.path)
    }
    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&self.path, key)
    }
    pub fn remove_this_node(&self) -> Result<()> {
        self.store.remove_node(&self.path)
    }
    pub fn flush(&self) -> Result<()> {
        self.store.flush()?;
        debug!(node = %self.path, "preferences flushed");
        Ok(())
    }

    /// Copies every entry and descendant of this node into `target`.
    pub fn copy_to(&self, target: &Preferences) -> Result<()> {
        target.store.create_node(&target.path)?;
        for key in self.keys()? {
            if let Some(value) = self.get_string(&key)? {
                target.put_string(&key, &value)?;
            }
        }
        for name in self.child_names()? {
            self.child(&name).copy_to(&target.child(&name))?;
        }
        Ok(())
    }
}

// ------------- History -------------
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryValueEntry {
    /// Storage slot, the node name under `$history`.
    pub slot: usize,
    /// Recency; larger is newer.
    pub index: u64,
    /// JSON text of the value.
    pub value: String,
    pub time: DateTime<Utc>,
}

/// Bounded history of one context. Equal values are kept once; when full,
/// the oldest entry's slot is reused.
pub struct HistoryValues {
    node: Preferences,
    capacity: usize,
    renumber_factor: usize,
    entries: Vec<HistoryValueEntry>,
}

/// Smallest slot number not in `occupied`.
pub fn next_free_slot(occupied: &[usize]) -> usize {
    (0..).find(|slot| !occupied.contains(slot)).unwrap_or(occupied.len())
}

impl HistoryValues {
    /// Loads the history under `owner`. Unreadable slots are skipped.
    pub fn load(owner: &Preferences, capacity: usize, renumber_factor: usize) -> Result<Self> {
        let node = owner.child(HISTORY_NODE);
        let mut entries = Vec::new();
        if node.exists()? {
            for name in node.child_names()? {
                let Ok(slot) = name.parse::<usize>() else { continue };
                let slot_node = node.child(&name);
                let (Some(index), Some(value)) = (slot_node.get_int("index")?, slot_node.get_string("value")?) else {
                    warn!(node = %slot_node.path(), "incomplete history slot ignored");
                    continue;
                };
                let time = slot_node
                    .get_string("time")?
                    .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                entries.push(HistoryValueEntry {
                    slot,
                    index: index.max(0) as u64,
                    value,
                    time,
                });
            }
        }
        entries.sort_by_key(|e| e.index);
        Ok(Self {
            node,
            capacity: capacity.max(1),
            renumber_factor,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn newest_first(&self) -> Vec<HistoryValueEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| b.index.cmp(&a.index));
        entries
    }

    /// Adds a JSON value as the most recent entry.
    pub fn add(&mut self, json: &str) -> Result<()> {
        check_length(json, self.node.store().max_value_length())?;
        let index = self.entries.iter().map(|e| e.index + 1).max().unwrap_or(0);
        let time = Utc::now();
        let position = if let Some(pos) = self.entries.iter().position(|e| e.value == json) {
            pos
        } else if self.entries.len() < self.capacity {
            let occupied: Vec<usize> = self.entries.iter().map(|e| e.slot).collect();
            self.entries.push(HistoryValueEntry {
                slot: next_free_slot(&occupied),
                index,
                value: json.to_string(),
                time,
            });
            self.entries.len() - 1
        } else {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.index)
                .map(|(pos, _)| pos)
                .unwrap_or(0);
            debug!(node = %self.node.path(), slot = self.entries[oldest].slot, "history slot reused");
            self.entries[oldest].value = json.to_string();
            oldest
        };
        self.entries[position].index = index;
        self.entries[position].time = time;
        let entry = self.entries[position].clone();
        self.write(&entry)?;
        if index as usize > self.renumber_factor.saturating_mul(self.capacity) {
            self.renumber()?;
        }
        Ok(())
    }

    /// Renumbers recency indices from zero, keeping their order.
    fn renumber(&mut self) -> Result<()> {
        self.entries.sort_by_key(|e| e.index);
        for (n, entry) in self.entries.iter_mut().enumerate() {
            entry.index = n as u64;
        }
        for entry in &self.entries {
            self.node.child(&entry.slot.to_string()).put_int("index", entry.index as i64)?;
        }
        debug!(node = %self.node.path(), "history indices renumbered");
        Ok(())
    }

    fn write(&self, entry: &HistoryValueEntry) -> Result<()> {
        let slot = self.node.child(&entry.slot.to_string());
        slot.put_int("index", entry.index as i64)?;
        slot.put_string("value", &entry.value)?;
        slot.put_string("time", &entry.time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

// ------------- ReentrantLock -------------
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Lock the owning thread may take again. One per bound tree guards
/// multi-step preference updates.
pub struct ReentrantLock {
    state: Mutex<LockState>,
    released: Condvar,
}

pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState { owner: None, depth: 0 }),
            released: Condvar::new(),
        }
    }

    pub fn lock(&self) -> ReentrantGuard<'_> {
        let me = std::thread::current().id();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self.released.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        ReentrantGuard { lock: self }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let me = std::thread::current().id();
        self.state.lock().map(|s| s.owner == Some(me)).unwrap_or(false)
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap_or_else(|e| e.into_inner());
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.lock.released.notify_one();
        }
    }
}

// ------------- PreferencesManager -------------
/// What a tree loads when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPrefs {
    /// The values under `$default`.
    Default,
    /// Nothing; the object keeps its own values.
    Empty,
    /// A saved snapshot, by UUID.
    Saved(String),
}

impl LaunchPrefs {
    pub fn as_stored(&self) -> &str {
        match self {
            LaunchPrefs::Default => "",
            LaunchPrefs::Empty => "empty",
            LaunchPrefs::Saved(uuid) => uuid,
        }
    }
    pub fn from_stored(text: &str) -> Self {
        match text {
            "" => LaunchPrefs::Default,
            "empty" => LaunchPrefs::Empty,
            uuid => LaunchPrefs::Saved(uuid.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSnapshot {
    pub number: usize,
    pub name: String,
    pub uuid: String,
}

/// Whole-tree preference operations on top of a bound root.
pub struct PreferencesManager {
    root: Arc<BindingContext>,
}

impl PreferencesManager {
    pub fn new(root: Arc<BindingContext>) -> Self {
        Self { root }
    }

    fn base(&self) -> Preferences {
        self.root.store_root()
    }

    /// Contexts whose values are kept: history capable, outside collections.
    fn value_contexts(&self) -> Vec<Arc<BindingContext>> {
        fn walk(ctx: &Arc<BindingContext>, found: &mut Vec<Arc<BindingContext>>) {
            if ctx.in_collection() {
                return;
            }
            if ctx.representation().map(|r| r.supports_history()).unwrap_or(false) && ctx.preferences().is_some() {
                found.push(Arc::clone(ctx));
            }
            for child in ctx.children() {
                walk(&child, found);
            }
        }
        let mut found = Vec::new();
        walk(&self.root, &mut found);
        found
    }

    /// Writes the current value of every value context to its `$value` entry.
    pub fn store_values(&self) -> Result<usize> {
        let _guard = self.root.prefs_lock().lock();
        let mut stored = 0;
        for ctx in self.value_contexts() {
            let (Some(prefs), Some(repr)) = (ctx.preferences(), ctx.representation()) else { continue };
            let value = match ctx.current_value(&Specifier::none()) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let json = serde_json::to_string(&repr.leaf_to_json(&value))?;
            match prefs.put_string(VALUE_KEY, &json) {
                Ok(()) => stored += 1,
                Err(AutobindError::ValueTooLarge { length, limit }) => {
                    warn!(context = %ctx.name(), length, limit, value = %truncated(&json, 100), "value too large to store");
                }
                Err(e) => return Err(e),
            }
        }
        self.base().flush()?;
        info!(node = %self.base().path(), stored, "preferences stored");
        Ok(stored)
    }

    /// Restores `$value` entries into the bound object through the
    /// contexts' setters. Returns the number of edits applied.
    pub fn apply_values(&self) -> Result<usize> {
        let _guard = self.root.prefs_lock().lock();
        let mut applied = 0;
        for ctx in self.value_contexts() {
            let (Some(prefs), Some(repr)) = (ctx.preferences(), ctx.representation()) else { continue };
            let Some(text) = prefs.get_string(VALUE_KEY)? else { continue };
            let json: Json = serde_json::from_str(&text).unwrap_or(Json::Null);
            let value = repr.leaf_from_json(&json);
            if value.is_null() {
                continue;
            }
            let editor_clock: ClockSnapshot = ctx.clock().next();
            match ctx.execute_edit(value, &Specifier::none(), editor_clock) {
                Ok(outcome) => {
                    if outcome.wait().unwrap_or(false) {
                        applied += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(context = %ctx.name(), error = %e, "stored value not applied"),
            }
        }
        Ok(applied)
    }

    fn saved_node(&self) -> Preferences {
        self.base().child(SAVED_NODE)
    }

    pub fn saved_snapshots(&self) -> Result<Vec<SavedSnapshot>> {
        let saved = self.saved_node();
        if !saved.exists()? {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for name in saved.child_names()? {
            let Ok(number) = name.parse::<usize>() else { continue };
            let node = saved.child(&name);
            let Some(uuid) = node.get_string(UUID_KEY)? else { continue };
            snapshots.push(SavedSnapshot {
                number,
                name: node.get_string(NAME_KEY)?.unwrap_or_default(),
                uuid,
            });
        }
        snapshots.sort_by_key(|s| s.number);
        Ok(snapshots)
    }

    /// Copies `$default` into the next `$saved/<n>` and returns its UUID.
    pub fn save_snapshot(&self, name: &str) -> Result<String> {
        let _guard = self.root.prefs_lock().lock();
        self.store_values()?;
        let number = self.saved_snapshots()?.iter().map(|s| s.number + 1).max().unwrap_or(0);
        let target = self.saved_node().child(&number.to_string());
        let default = self.base().child(DEFAULT_NODE);
        if default.exists()? {
            default.copy_to(&target)?;
        }
        let uuid = Uuid::new_v4().to_string();
        target.put_string(NAME_KEY, name)?;
        target.put_string(UUID_KEY, &uuid)?;
        self.base().flush()?;
        info!(snapshot = name, uuid = %uuid, number, "snapshot saved");
        Ok(uuid)
    }

    fn find_snapshot(&self, uuid: &str) -> Result<Option<Preferences>> {
        Ok(self
            .saved_snapshots()?
            .into_iter()
            .find(|s| s.uuid == uuid)
            .map(|s| self.saved_node().child(&s.number.to_string())))
    }

    /// Replaces `$default` with the snapshot and applies it.
    pub fn load_snapshot(&self, uuid: &str) -> Result<usize> {
        let _guard = self.root.prefs_lock().lock();
        let source = self
            .find_snapshot(uuid)?
            .ok_or_else(|| AutobindError::Store(format!("no saved snapshot {}", uuid)))?;
        let default = self.base().child(DEFAULT_NODE);
        if default.exists()? {
            default.remove_this_node()?;
        }
        source.copy_to(&default)?;
        default.remove(NAME_KEY)?;
        default.remove(UUID_KEY)?;
        self.apply_values()
    }

    pub fn remove_snapshot(&self, uuid: &str) -> Result<bool> {
        let _guard = self.root.prefs_lock().lock();
        match self.find_snapshot(uuid)? {
            Some(node) => {
                node.remove_this_node()?;
                if self.launch_prefs()? == LaunchPrefs::Saved(uuid.to_string()) {
                    self.set_launch_prefs(&LaunchPrefs::Default)?;
                }
                self.base().flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn launch_prefs(&self) -> Result<LaunchPrefs> {
        Ok(LaunchPrefs::from_stored(
            &self.base().get_string(LAUNCH_PREFS_KEY)?.unwrap_or_default(),
        ))
    }

    pub fn set_launch_prefs(&self, prefs: &LaunchPrefs) -> Result<()> {
        self.base().put_string(LAUNCH_PREFS_KEY, prefs.as_stored())
    }

    /// Applies whatever `$launchPrefs` selects.
    pub fn apply_launch_prefs(&self) -> Result<usize> {
        match self.launch_prefs()? {
            LaunchPrefs::Default => self.apply_values(),
            LaunchPrefs::Empty => Ok(0),
            LaunchPrefs::Saved(uuid) => self.load_snapshot(&uuid),
        }
    }

    /// Drops `$default`: stored values and histories.
    pub fn reset_to_default(&self) -> Result<()> {
        let _guard = self.root.prefs_lock().lock();
        let default = self.base().child(DEFAULT_NODE);
        if default.exists()? {
            default.remove_this_node()?;
        }
        self.base().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slot_fills_gaps() {
        assert_eq!(next_free_slot(&[]), 0);
        assert_eq!(next_free_slot(&[0, 1, 2]), 3);
        assert_eq!(next_free_slot(&[1, 0, 3]), 2);
    }

    #[test]
    fn launch_prefs_round_trip_their_stored_form() {
        assert_eq!(LaunchPrefs::from_stored(""), LaunchPrefs::Default);
        assert_eq!(LaunchPrefs::from_stored("empty"), LaunchPrefs::Empty);
        let saved = LaunchPrefs::Saved("7d4e1c52-7a0e-4c53-9b7c-0d2b1f9e3a11".into());
        assert_eq!(LaunchPrefs::from_stored(saved.as_stored()), saved);
    }

    #[test]
    fn truncation_marks_cut_text() {
        assert_eq!(truncated("abc", 5), "abc");
        assert_eq!(truncated("abcdef", 3), "abc...");
    }

    #[test]
    fn reentrant_lock_nests_on_one_thread() {
        let lock = ReentrantLock::new();
        let outer = lock.lock();
        let inner = lock.lock();
        assert!(lock.is_held_by_current_thread());
        drop(inner);
        assert!(lock.is_held_by_current_thread());
        drop(outer);
        assert!(!lock.is_held_by_current_thread());
    }
}
