//! Hierarchical key/value storage behind [`crate::prefs::Preferences`].
//!
//! Nodes are addressed by absolute `/`-separated paths. Within one node a
//! key names either a scalar entry or a child node, never both.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{AutobindError, Result};

pub trait ValueStore: Send + Sync {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>>;
    /// Creates `node` (and its ancestors) when missing.
    fn put(&self, node: &str, key: &str, value: &str) -> Result<()>;
    fn remove(&self, node: &str, key: &str) -> Result<()>;
    fn keys(&self, node: &str) -> Result<Vec<String>>;
    fn children(&self, node: &str) -> Result<Vec<String>>;
    fn node_exists(&self, node: &str) -> Result<bool>;
    fn create_node(&self, node: &str) -> Result<()>;
    /// Removes `node` with all entries and descendants.
    fn remove_node(&self, node: &str) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn max_value_length(&self) -> usize;
}

pub fn join(node: &str, key: &str) -> String {
    if node == "/" { format!("/{}", key) } else { format!("{}/{}", node, key) }
}

/// Splits `/a/b/c` into `("/a/b", "c")`. The root has no parent.
pub fn split(path: &str) -> Option<(&str, &str)> {
    let (parent, name) = path.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

/// Every node from the root's first child down to `path` itself.
pub fn lineage(path: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        found.push(current.clone());
    }
    found
}

pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') {
        return Err(AutobindError::Store(format!("invalid key '{}'", key)));
    }
    Ok(())
}

pub fn check_length(value: &str, limit: usize) -> Result<()> {
    let length = value.chars().count();
    if length > limit {
        return Err(AutobindError::ValueTooLarge { length, limit });
    }
    Ok(())
}

// ------------- MemoryStore -------------
/// Store kept in ordered maps; nothing survives the process.
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    max_value_length: usize,
}

impl MemoryStore {
    pub fn new(max_value_length: usize) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), BTreeMap::new());
        Self {
            nodes: Mutex::new(nodes),
            max_value_length,
        }
    }

    fn ensure(nodes: &mut BTreeMap<String, BTreeMap<String, String>>, node: &str) -> Result<()> {
        for path in lineage(node) {
            if nodes.contains_key(&path) {
                continue;
            }
            if let Some((parent, name)) = split(&path) {
                if nodes.get(parent).map(|e| e.contains_key(name)).unwrap_or(false) {
                    return Err(AutobindError::Namespace(name.to_string()));
                }
            }
            nodes.insert(path, BTreeMap::new());
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(8192)
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>> {
        let nodes = self.nodes.lock()?;
        Ok(nodes.get(node).and_then(|entries| entries.get(key).cloned()))
    }
    fn put(&self, node: &str, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        check_length(value, self.max_value_length)?;
        let mut nodes = self.nodes.lock()?;
        Self::ensure(&mut nodes, node)?;
        if nodes.contains_key(&join(node, key)) {
            return Err(AutobindError::Namespace(key.to_string()));
        }
        if let Some(entries) = nodes.get_mut(node) {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
    fn remove(&self, node: &str, key: &str) -> Result<()> {
        let mut nodes = self.nodes.lock()?;
        if let Some(entries) = nodes.get_mut(node) {
            entries.remove(key);
        }
        Ok(())
    }
    fn keys(&self, node: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.lock()?;
        Ok(nodes.get(node).map(|e| e.keys().cloned().collect()).unwrap_or_default())
    }
    fn children(&self, node: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.lock()?;
        Ok(nodes
            .keys()
            .filter_map(|path| match split(path) {
                Some((parent, name)) if parent == node => Some(name.to_string()),
                _ => None,
            })
            .collect())
    }
    fn node_exists(&self, node: &str) -> Result<bool> {
        Ok(self.nodes.lock()?.contains_key(node))
    }
    fn create_node(&self, node: &str) -> Result<()> {
        let mut nodes = self.nodes.lock()?;
        Self::ensure(&mut nodes, node)
    }
    fn remove_node(&self, node: &str) -> Result<()> {
        if node == "/" {
            return Err(AutobindError::Store("the root node cannot be removed".into()));
        }
        let prefix = format!("{}/", node);
        let mut nodes = self.nodes.lock()?;
        nodes.retain(|path, _| path != node && !path.starts_with(&prefix));
        Ok(())
    }
    fn flush(&self) -> Result<()> {
        Ok(())
    }
    fn max_value_length(&self) -> usize {
        self.max_value_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_split_and_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(split("/a/b"), Some(("/a", "b")));
        assert_eq!(split("/a"), Some(("/", "a")));
        assert_eq!(split("/"), None);
        assert_eq!(lineage("/a/b"), vec!["/a".to_string(), "/a/b".to_string()]);
    }

    #[test]
    fn entry_and_node_keys_are_disjoint() {
        let store = MemoryStore::default();
        store.put("/app", "x", "1").unwrap();
        assert!(matches!(store.create_node("/app/x"), Err(AutobindError::Namespace(_))));
        store.create_node("/app/y").unwrap();
        assert!(matches!(store.put("/app", "y", "2"), Err(AutobindError::Namespace(_))));
    }

    #[test]
    fn remove_node_is_recursive() {
        let store = MemoryStore::default();
        store.put("/a/b/c", "k", "v").unwrap();
        store.put("/a/bb", "k", "v").unwrap();
        store.remove_node("/a/b").unwrap();
        assert!(!store.node_exists("/a/b/c").unwrap());
        assert!(store.node_exists("/a/bb").unwrap());
        assert_eq!(store.children("/a").unwrap(), vec!["bb".to_string()]);
    }
}
