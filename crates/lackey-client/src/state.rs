//! Derived liveness state computed from the notification stream.
//!
//! Notifications from concurrent daemon threads may arrive out of order,
//! so a newer entry can already be in the books when a stale removal
//! turns up. The sequence-id comparisons below make replayed or stale
//! events no-ops: data ids are monotonically non-decreasing while a name
//! is present, and a process removal only fires for the instance id it
//! names.

use std::collections::HashMap;

use serde_json::Value;

/// Map key for a name or identifier token: the string itself for JSON
/// strings, the canonical JSON encoding otherwise.
pub(crate) fn name_key(token: &Value) -> String {
    match token.as_str() {
        Some(text) => text.to_owned(),
        None => token.to_string(),
    }
}

/// The three liveness maps. Mutated only by the routing loop; callers
/// see independent snapshots.
#[derive(Debug, Default, Clone)]
pub(crate) struct DerivedState {
    data: HashMap<String, i64>,
    processes: HashMap<String, Value>,
    children: HashMap<String, Value>,
}

impl DerivedState {
    /// Records a stored notification. Only a strictly greater sequence
    /// id takes effect; absent names compare as id 0.
    pub(crate) fn record_stored(&mut self, name: &Value, id: &Value) -> bool {
        let Some(id) = id.as_i64() else { return false };
        let key = name_key(name);
        let current = self.data.get(&key).copied().unwrap_or(0);
        if current < id {
            self.data.insert(key, id);
            true
        } else {
            false
        }
    }

    /// Records a deleted notification. Removes the name only when the
    /// recorded id is not newer than the carried id.
    pub(crate) fn record_deleted(&mut self, name: &Value, id: &Value) -> bool {
        let Some(id) = id.as_i64() else { return false };
        let key = name_key(name);
        match self.data.get(&key) {
            Some(current) if *current <= id => {
                self.data.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Records a data error notification. Removes the name only on an
    /// exact id match; the event itself is always reportable.
    pub(crate) fn record_data_error(&mut self, name: &Value, id: &Value) -> bool {
        if let Some(id) = id.as_i64() {
            let key = name_key(name);
            if self.data.get(&key) == Some(&id) {
                self.data.remove(&key);
            }
        }
        true
    }

    /// Records a process start.
    pub(crate) fn record_started(&mut self, name: &Value, id: &Value) -> bool {
        self.processes.insert(name_key(name), id.clone());
        true
    }

    /// Records a process end. The removal only fires when the ended id
    /// matches the recorded instance, guarding against identifier reuse
    /// across back-to-back runs; the spawned-child entry goes with it.
    pub(crate) fn record_ended(&mut self, name: &Value, id: &Value) -> bool {
        let key = name_key(name);
        if self.processes.get(&key) == Some(id) {
            self.processes.remove(&key);
            self.children.remove(&key);
        }
        true
    }

    /// Records a spawned child under its parent command's identifier.
    pub(crate) fn record_child(&mut self, parent: &Value, child: &Value) {
        self.children.insert(name_key(parent), child.clone());
    }

    pub(crate) fn data_snapshot(&self) -> HashMap<String, i64> {
        self.data.clone()
    }

    pub(crate) fn process_snapshot(&self) -> HashMap<String, Value> {
        self.processes.clone()
    }

    pub(crate) fn children_snapshot(&self) -> HashMap<String, Value> {
        self.children.clone()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::DerivedState;

    #[rstest]
    fn stored_keeps_highest_sequence_id() {
        let mut state = DerivedState::default();
        assert!(state.record_stored(&json!("items"), &json!(7)));
        assert!(!state.record_stored(&json!("items"), &json!(5)));
        assert!(!state.record_stored(&json!("items"), &json!(7)));
        assert_eq!(state.data_snapshot().get("items"), Some(&7));
    }

    #[rstest]
    fn deleted_ignores_stale_ids() {
        let mut state = DerivedState::default();
        assert!(state.record_stored(&json!("items"), &json!(7)));
        assert!(!state.record_deleted(&json!("items"), &json!(6)));
        assert_eq!(state.data_snapshot().get("items"), Some(&7));
    }

    #[rstest]
    #[case(7)]
    #[case(9)]
    fn deleted_removes_on_equal_or_newer_id(#[case] deletion_id: i64) {
        let mut state = DerivedState::default();
        assert!(state.record_stored(&json!("items"), &json!(7)));
        assert!(state.record_deleted(&json!("items"), &json!(deletion_id)));
        assert!(state.data_snapshot().is_empty());
    }

    #[rstest]
    fn deleted_on_unknown_name_is_ignored() {
        let mut state = DerivedState::default();
        assert!(!state.record_deleted(&json!("items"), &json!(7)));
    }

    #[rstest]
    fn data_error_removes_only_exact_id() {
        let mut state = DerivedState::default();
        assert!(state.record_stored(&json!("items"), &json!(7)));

        assert!(state.record_data_error(&json!("items"), &json!(6)));
        assert_eq!(state.data_snapshot().get("items"), Some(&7));

        assert!(state.record_data_error(&json!("items"), &json!(7)));
        assert!(state.data_snapshot().is_empty());
    }

    #[rstest]
    fn ended_only_clears_matching_instance() {
        let mut state = DerivedState::default();
        assert!(state.record_started(&json!("job"), &json!(1)));
        // Back-to-back re-run: the new instance arrived before the old
        // instance's ended notification.
        assert!(state.record_started(&json!("job"), &json!(2)));
        assert!(state.record_ended(&json!("job"), &json!(1)));
        assert_eq!(state.process_snapshot().get("job"), Some(&json!(2)));

        assert!(state.record_ended(&json!("job"), &json!(2)));
        assert!(state.process_snapshot().is_empty());
    }

    #[rstest]
    fn ended_clears_spawned_child_entry() {
        let mut state = DerivedState::default();
        assert!(state.record_started(&json!("job"), &json!(1)));
        state.record_child(&json!("job"), &json!(4711));
        assert!(state.record_ended(&json!("job"), &json!(1)));
        assert!(state.children_snapshot().is_empty());
    }
}
