use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// Plain snapshot of session state.
pub type StateMap = BTreeMap<String, serde_json::Value>;

/// A partial update to session state produced by one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDelta(StateMap);

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Fold another delta into this one (later writes win).
    pub fn extend(&mut self, other: &StateDelta) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn into_map(self) -> StateMap {
        self.0
    }
}

impl From<StateMap> for StateDelta {
    fn from(map: StateMap) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, serde_json::Value)> for StateDelta {
    fn from_iter<T: IntoIterator<Item = (String, serde_json::Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Shared, mutable key/value state for one session.
///
/// Cloning the handle shares the underlying map. [`SessionState::fork`]
/// produces an independent copy for a parallel branch.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<RwLock<StateMap>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: StateMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    // A poisoned lock only means a writer panicked mid-insert; the map itself
    // is still a valid BTreeMap.
    fn read(&self) -> RwLockReadGuard<'_, StateMap> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateMap> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Get a value and deserialize it, failing with `MissingState` if absent
    /// or of the wrong shape.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get(key)
            .ok_or_else(|| TandemError::MissingState(key.to_string()))?;
        serde_json::from_value(value).map_err(|_| TandemError::MissingState(key.to_string()))
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.write().insert(key.into(), value);
    }

    /// Apply a delta in place.
    pub fn apply(&self, delta: &StateDelta) {
        if delta.is_empty() {
            return;
        }
        let mut map = self.write();
        for (k, v) in delta.iter() {
            map.insert(k.clone(), v.clone());
        }
    }

    /// Consistent copy of the current contents.
    pub fn snapshot(&self) -> StateMap {
        self.read().clone()
    }

    /// Independent copy: writes to the fork are invisible to this handle.
    pub fn fork(&self) -> SessionState {
        Self::from_map(self.snapshot())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// True if both handles share the same underlying map.
    pub fn same_as(&self, other: &SessionState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Read a key from a snapshot and deserialize it.
pub fn require_in<T: DeserializeOwned>(state: &StateMap, key: &str) -> Result<T> {
    let value = state
        .get(key)
        .ok_or_else(|| TandemError::MissingState(key.to_string()))?;
    serde_json::from_value(value.clone()).map_err(|_| TandemError::MissingState(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let state = SessionState::new();
        state.set("order_id", json!("ORDER_1001"));
        assert_eq!(state.get("order_id"), Some(json!("ORDER_1001")));
        assert!(state.contains("order_id"));
        assert!(!state.contains("missing"));
    }

    #[test]
    fn test_clone_shares_fork_isolates() {
        let state = SessionState::new();
        state.set("a", json!(1));

        let shared = state.clone();
        shared.set("b", json!(2));
        assert_eq!(state.get("b"), Some(json!(2)));
        assert!(state.same_as(&shared));

        let fork = state.fork();
        fork.set("c", json!(3));
        assert_eq!(fork.get("a"), Some(json!(1)));
        assert!(state.get("c").is_none());
        assert!(!state.same_as(&fork));
    }

    #[test]
    fn test_apply_delta() {
        let state = SessionState::new();
        state.set("keep", json!(true));
        let delta = StateDelta::new().with("x", json!(1)).with("keep", json!(false));
        state.apply(&delta);
        assert_eq!(state.get("x"), Some(json!(1)));
        assert_eq!(state.get("keep"), Some(json!(false)));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_require_typed() {
        let state = SessionState::new();
        state.set("subtotal", json!(99.5));
        let v: f64 = state.require("subtotal").unwrap();
        assert_eq!(v, 99.5);

        let err = state.require::<f64>("absent").unwrap_err();
        assert!(matches!(err, TandemError::MissingState(k) if k == "absent"));

        state.set("text", json!("nope"));
        assert!(state.require::<f64>("text").is_err());
    }

    #[test]
    fn test_delta_serializes_as_map() {
        let delta = StateDelta::new().with("k", json!("v"));
        assert_eq!(serde_json::to_value(&delta).unwrap(), json!({"k": "v"}));
    }

    #[test]
    fn test_delta_extend_later_wins() {
        let mut a = StateDelta::new().with("k", json!(1));
        a.extend(&StateDelta::new().with("k", json!(2)).with("j", json!(3)));
        assert_eq!(a.get("k"), Some(&json!(2)));
        assert_eq!(a.len(), 2);
    }
}
