//! Namespaced execution state shared by the steps of one run.
//!
//! Three namespaces exist: `store` (mutable, written by steps), `params`
//! (arguments of the run or subflow call) and `env` (project configuration).
//! Only `store` is writable after construction.

use crate::error::{AutomationError, Result};
use crate::workflow::schema::ExecutionPlan;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type VariableMap = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Store,
    Params,
    Env,
}

impl Namespace {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "store" => Some(Namespace::Store),
            "params" => Some(Namespace::Params),
            "env" => Some(Namespace::Env),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Store => "store",
            Namespace::Params => "params",
            Namespace::Env => "env",
        }
    }
}

/// Step index allocator. Child states created for subflows share it with
/// their parent so every emitted index stays globally unique.
#[derive(Debug, Clone, Default)]
pub struct IndexAllocator {
    next: Arc<AtomicUsize>,
}

impl IndexAllocator {
    pub fn allocate(&self, count: usize) -> usize {
        self.next.fetch_add(count, Ordering::SeqCst)
    }

    pub fn raise_to(&self, floor: usize) {
        self.next.fetch_max(floor, Ordering::SeqCst);
    }

    pub fn peek(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Inner {
    store: VariableMap,
    params: VariableMap,
    env: VariableMap,
    entry_checked: bool,
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    inner: RwLock<Inner>,
    indices: IndexAllocator,
}

impl ExecutionState {
    /// Build a state from owned maps. Taking ownership means the caller keeps
    /// no handle through which the namespaces could be mutated.
    pub fn new(store: VariableMap, params: VariableMap, env: VariableMap) -> Self {
        Self {
            inner: RwLock::new(Inner {
                store,
                params,
                env,
                entry_checked: false,
            }),
            indices: IndexAllocator::default(),
        }
    }

    /// State for a nested invocation that shares this state's index space.
    pub fn child(&self, store: VariableMap, params: VariableMap, env: VariableMap) -> Self {
        Self {
            inner: RwLock::new(Inner {
                store,
                params,
                env,
                entry_checked: false,
            }),
            indices: self.indices.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().store.get(key).cloned()
    }

    /// Resolve a dotted path against `store`.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let inner = self.inner.read();
        resolve_in_map(&inner.store, path)
    }

    /// Resolve a path against a named namespace. Unknown namespaces resolve to nothing.
    /// An empty path yields the whole namespace as an object.
    pub fn resolve_namespaced(&self, namespace: &str, path: &str) -> Option<Value> {
        let ns = Namespace::parse(namespace)?;
        let inner = self.inner.read();
        let map = match ns {
            Namespace::Store => &inner.store,
            Namespace::Params => &inner.params,
            Namespace::Env => &inner.env,
        };
        if path.trim().is_empty() {
            return Some(Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ));
        }
        resolve_in_map(map, path)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().store.insert(key.into(), value);
    }

    /// Write into a namespace. Only `store` accepts writes.
    pub fn set_namespaced(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        match Namespace::parse(namespace) {
            Some(Namespace::Store) => {
                self.set(key, value);
                Ok(())
            }
            Some(ns) => Err(AutomationError::Validation(format!(
                "namespace @{} is read-only",
                ns.as_str()
            ))),
            None => Err(AutomationError::Validation(format!(
                "unknown namespace @{}",
                namespace
            ))),
        }
    }

    pub fn merge(&self, values: VariableMap) {
        if values.is_empty() {
            return;
        }
        self.inner.write().store.extend(values);
    }

    pub fn copy_store(&self) -> VariableMap {
        self.inner.read().store.clone()
    }

    pub fn copy_params(&self) -> VariableMap {
        self.inner.read().params.clone()
    }

    pub fn copy_env(&self) -> VariableMap {
        self.inner.read().env.clone()
    }

    /// Reserve `count` contiguous step indices and return the first one.
    pub fn allocate_index_range(&self, count: usize) -> usize {
        self.indices.allocate(count)
    }

    pub fn next_index(&self) -> usize {
        self.indices.peek()
    }

    /// Move the allocator past every index used by `plan`, including loop bodies.
    pub fn set_next_index_from_plan(&self, plan: &ExecutionPlan) {
        if let Some(max) = plan.max_index() {
            self.indices.raise_to(max + 1);
        }
    }

    pub fn mark_entry_checked(&self) {
        self.inner.write().entry_checked = true;
    }

    pub fn has_checked_entry(&self) -> bool {
        self.inner.read().entry_checked
    }
}

/// Resolve `path` in `map`. The longest dotted prefix that names a key wins,
/// so keys that themselves contain dots stay reachable.
pub fn resolve_in_map(map: &VariableMap, path: &str) -> Option<Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if let Some(value) = map.get(path) {
        return Some(value.clone());
    }

    let segments: Vec<&str> = path.split(['.', '/']).collect();
    for split in (1..=segments.len()).rev() {
        let key = segments[..split].join(".");
        if let Some(root) = map.get(&key) {
            if let Some(found) = walk_segments(root, &segments[split..]) {
                return Some(found.clone());
            }
        }
    }
    None
}

/// Walk `path` (dot or slash separated) below `root`. Numeric segments index arrays.
pub fn walk_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .collect();
    walk_segments(root, &segments)
}

fn walk_segments<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> VariableMap {
        value
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_resolve_nested_paths_and_arrays() {
        let state = ExecutionState::new(
            map(json!({ "user": { "name": "ada", "tags": ["a", "b"] }, "empty": [] })),
            VariableMap::new(),
            VariableMap::new(),
        );
        assert_eq!(state.resolve("user.name"), Some(json!("ada")));
        assert_eq!(state.resolve("user.tags.1"), Some(json!("b")));
        assert_eq!(state.resolve("user.tags.2"), None);
        assert_eq!(state.resolve("empty.0"), None);
        assert_eq!(state.resolve("missing"), None);
    }

    #[test]
    fn test_keys_with_dots_stay_reachable() {
        let state = ExecutionState::new(
            map(json!({ "a.b": 1, "x.y": { "z": true } })),
            VariableMap::new(),
            VariableMap::new(),
        );
        assert_eq!(state.resolve("a.b"), Some(json!(1)));
        assert_eq!(state.resolve("x.y.z"), Some(json!(true)));
    }

    #[test]
    fn test_namespaces_and_read_only_guards() {
        let state = ExecutionState::new(
            VariableMap::new(),
            map(json!({ "limit": 5 })),
            map(json!({ "BASE_URL": "https://example.com" })),
        );
        assert_eq!(state.resolve_namespaced("params", "limit"), Some(json!(5)));
        assert_eq!(
            state.resolve_namespaced("env", "BASE_URL"),
            Some(json!("https://example.com"))
        );
        assert_eq!(state.resolve_namespaced("unknown", "path"), None);

        assert!(state.set_namespaced("params", "limit", json!(9)).is_err());
        assert!(state.set_namespaced("env", "BASE_URL", json!("x")).is_err());
        state.set_namespaced("store", "k", json!("v")).unwrap();
        assert_eq!(state.get("k"), Some(json!("v")));
        assert_eq!(state.resolve_namespaced("params", "limit"), Some(json!(5)));
    }

    #[test]
    fn test_copies_do_not_alias_internal_state() {
        let state = ExecutionState::new(map(json!({ "a": 1 })), VariableMap::new(), VariableMap::new());
        let mut copy = state.copy_store();
        copy.insert("a".to_string(), json!(2));
        copy.insert("b".to_string(), json!(3));
        assert_eq!(state.get("a"), Some(json!(1)));
        assert_eq!(state.get("b"), None);
    }

    #[test]
    fn test_index_allocation_is_shared_with_children() {
        let parent = ExecutionState::default();
        assert_eq!(parent.allocate_index_range(4), 0);
        let child = parent.child(VariableMap::new(), VariableMap::new(), VariableMap::new());
        assert_eq!(child.allocate_index_range(3), 4);
        assert_eq!(parent.allocate_index_range(1), 7);
        assert_eq!(parent.next_index(), 8);
    }

    #[test]
    fn test_entry_check_flag() {
        let state = ExecutionState::default();
        assert!(!state.has_checked_entry());
        state.mark_entry_checked();
        assert!(state.has_checked_entry());
    }

    #[test]
    fn test_concurrent_writers() {
        let state = Arc::new(ExecutionState::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        state.set(format!("k{}-{}", i, j), json!(j));
                        let _ = state.resolve("k0-0");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.copy_store().len(), 800);
    }
}
