//! Shared attribute cache and outstanding request tokens.
//!
//! One [`SharedStateStore`] exists per process. The attribute map and the
//! token set sit behind a single mutex so that applying a change and
//! registering the token of the publish announcing it happen in one
//! critical section.

use parking_lot::{Mutex, MutexGuard};
use shadow_protocol::{translate_sentinel, AttributeValue, ClientToken, StateMap};
use std::collections::HashSet;

#[derive(Debug, Default)]
struct StoreInner {
    attributes: StateMap,
    pending: HashSet<ClientToken>,
}

/// Mutex-guarded attribute map plus the set of in-flight request tokens.
#[derive(Debug, Default)]
pub struct SharedStateStore {
    inner: Mutex<StoreInner>,
}

impl SharedStateStore {
    /// Creates a store with every given attribute absent.
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attributes = attributes.into_iter().map(|k| (k.into(), None)).collect();
        Self {
            inner: Mutex::new(StoreInner {
                attributes,
                pending: HashSet::new(),
            }),
        }
    }

    /// Locks the store for a multi-step transaction.
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            inner: self.inner.lock(),
        }
    }

    /// Returns a copy of the current attribute values.
    pub fn snapshot(&self) -> StateMap {
        self.lock().snapshot()
    }

    /// Returns the current value of one attribute.
    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        self.lock().get(key)
    }

    /// Writes the attributes of `candidate` that differ; returns their keys.
    pub fn apply_if_changed(&self, candidate: &StateMap) -> Vec<String> {
        self.lock().apply_if_changed(candidate)
    }

    /// Removes `token` if present; `false` means the token is stale.
    pub fn try_consume_token(&self, token: &ClientToken) -> bool {
        self.lock().try_consume_token(token)
    }

    /// Registers an in-flight request token.
    pub fn register_token(&self, token: ClientToken) {
        self.lock().register_token(token);
    }

    /// Returns the number of in-flight request tokens.
    pub fn pending_count(&self) -> usize {
        self.lock().pending_count()
    }
}

/// Exclusive access to the store.
pub struct StoreGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
}

impl StoreGuard<'_> {
    /// Returns a copy of the current attribute values.
    pub fn snapshot(&self) -> StateMap {
        self.inner.attributes.clone()
    }

    /// Returns the current value of one attribute.
    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        self.inner.attributes.get(key).cloned().flatten()
    }

    /// Returns true if no attribute has been populated.
    pub fn is_pristine(&self) -> bool {
        self.inner.attributes.values().all(Option::is_none)
    }

    /// Writes the attributes of `candidate` that differ; returns their keys.
    ///
    /// Values are compared after sentinel translation, so writing `"none"`
    /// to an absent attribute is not a change. Keys not yet tracked are
    /// added.
    pub fn apply_if_changed(&mut self, candidate: &StateMap) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in candidate {
            let value = translate_sentinel(value.clone());
            match self.inner.attributes.get_mut(key) {
                Some(current) if *current == value => {}
                Some(current) => {
                    *current = value;
                    changed.push(key.clone());
                }
                None => {
                    self.inner.attributes.insert(key.clone(), value);
                    changed.push(key.clone());
                }
            }
        }
        changed
    }

    /// Removes `token` if present; `false` means the token is stale.
    pub fn try_consume_token(&mut self, token: &ClientToken) -> bool {
        self.inner.pending.remove(token)
    }

    /// Registers an in-flight request token.
    pub fn register_token(&mut self, token: ClientToken) {
        self.inner.pending.insert(token);
    }

    /// Returns true if `token` is in flight.
    pub fn is_pending(&self, token: &ClientToken) -> bool {
        self.inner.pending.contains(token)
    }

    /// Returns the number of in-flight request tokens.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shadow_protocol::{state_from, DEFAULT_ATTRIBUTES};

    fn store() -> SharedStateStore {
        SharedStateStore::new(DEFAULT_ATTRIBUTES)
    }

    #[test]
    fn starts_with_all_keys_absent() {
        let store = store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.values().all(Option::is_none));
        assert!(store.lock().is_pristine());
    }

    #[test]
    fn apply_reports_only_changed_keys() {
        let store = store();
        let changed = store.apply_if_changed(&state_from([
            ("upload_enable", Some(1i64.into())),
            ("adapters_connected", None),
        ]));
        assert_eq!(changed, vec!["upload_enable".to_string()]);
        assert_eq!(store.get("upload_enable"), Some(AttributeValue::Integer(1)));

        let changed = store.apply_if_changed(&state_from([("upload_enable", Some(1i64.into()))]));
        assert!(changed.is_empty());
    }

    #[test]
    fn none_sentinel_clears_and_is_compared_after_translation() {
        let store = store();
        let changed = store.apply_if_changed(&state_from([("upload_enable", Some("none".into()))]));
        assert!(changed.is_empty());

        store.apply_if_changed(&state_from([("upload_enable", Some(0i64.into()))]));
        let changed = store.apply_if_changed(&state_from([("upload_enable", Some("none".into()))]));
        assert_eq!(changed, vec!["upload_enable".to_string()]);
        assert_eq!(store.get("upload_enable"), None);
    }

    #[test]
    fn unknown_keys_pass_through() {
        let store = store();
        let changed = store.apply_if_changed(&state_from([("firmware", Some("1.2.0".into()))]));
        assert_eq!(changed, vec!["firmware".to_string()]);
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn tokens_are_consumed_once() {
        let store = store();
        let token = ClientToken::new("t1");
        store.register_token(token.clone());
        assert_eq!(store.pending_count(), 1);

        assert!(store.try_consume_token(&token));
        assert!(!store.try_consume_token(&token));
        assert!(!store.try_consume_token(&ClientToken::new("foreign")));
    }

    fn value_strategy() -> impl Strategy<Value = Option<AttributeValue>> {
        prop_oneof![
            Just(None),
            Just(Some(AttributeValue::Text("none".into()))),
            any::<bool>().prop_map(|b| Some(AttributeValue::Bool(b))),
            (0i64..4).prop_map(|i| Some(AttributeValue::Integer(i))),
            "[a-z]{1,6}".prop_map(|s| Some(AttributeValue::Text(s))),
        ]
    }

    fn state_strategy() -> impl Strategy<Value = StateMap> {
        proptest::collection::btree_map("[a-d]", value_strategy(), 0..5)
    }

    proptest! {
        #[test]
        fn delta_overwrites_named_keys_only(prior in state_strategy(), delta in state_strategy()) {
            let store = SharedStateStore::new(Vec::<String>::new());
            store.apply_if_changed(&prior);
            let before = store.snapshot();

            store.apply_if_changed(&delta);
            let after = store.snapshot();

            let mut expected = before.clone();
            for (key, value) in &delta {
                expected.insert(key.clone(), translate_sentinel(value.clone()));
            }
            prop_assert_eq!(after, expected);
        }

        #[test]
        fn second_apply_is_a_no_op(delta in state_strategy()) {
            let store = SharedStateStore::new(DEFAULT_ATTRIBUTES);
            store.apply_if_changed(&delta);
            prop_assert!(store.apply_if_changed(&delta).is_empty());
        }
    }
}
