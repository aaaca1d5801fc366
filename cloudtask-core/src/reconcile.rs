//! Reconcile - Compute minimal add/remove sets between two revisions of a collection
//!
//! Update handlers use these to issue attach/detach (or add/remove) calls for
//! only the sub-resources that actually changed, instead of recreating the
//! whole collection. Outputs are ordered by key, so the same inputs always
//! produce the same partition regardless of input order.

use std::collections::BTreeMap;

/// A sub-resource whose key survived but whose content changed
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// Result of a reconcile that also tracks in-place changes
#[derive(Debug, Clone, PartialEq)]
pub struct Changes<T> {
    pub to_remove: Vec<T>,
    pub to_add: Vec<T>,
    pub to_change: Vec<Change<T>>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
            to_change: Vec::new(),
        }
    }
}

impl<T> Changes<T> {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty() && self.to_change.is_empty()
    }

    /// Turn every in-place change into remove-old + add-new, for
    /// sub-resources that have no replace operation
    pub fn flatten_replacements(mut self) -> (Vec<T>, Vec<T>) {
        for change in self.to_change {
            self.to_remove.push(change.old);
            self.to_add.push(change.new);
        }
        (self.to_remove, self.to_add)
    }
}

/// Index items by key; the first item wins when a key repeats
fn index_by<'a, T, K, F>(items: &'a [T], key: &F) -> BTreeMap<K, &'a T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut index = BTreeMap::new();
    for item in items {
        index.entry(key(item)).or_insert(item);
    }
    index
}

/// Keyed symmetric difference: `(to_remove, to_add)`.
///
/// An item whose key is present on both sides appears in neither output,
/// even if its content differs; use `reconcile_with_changes` to see those.
pub fn reconcile<T, K, F>(old: &[T], new: &[T], key: F) -> (Vec<T>, Vec<T>)
where
    T: Clone,
    K: Ord,
    F: Fn(&T) -> K,
{
    let old_index = index_by(old, &key);
    let new_index = index_by(new, &key);

    let to_remove = old_index
        .iter()
        .filter(|(k, _)| !new_index.contains_key(*k))
        .map(|(_, item)| (*item).clone())
        .collect();
    let to_add = new_index
        .iter()
        .filter(|(k, _)| !old_index.contains_key(*k))
        .map(|(_, item)| (*item).clone())
        .collect();

    (to_remove, to_add)
}

/// Symmetric difference by value equality
pub fn reconcile_values<T>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>)
where
    T: Clone + Ord,
{
    reconcile(old, new, |item| item.clone())
}

/// Keyed reconcile that also reports items whose key matched but whose
/// content differs
pub fn reconcile_with_changes<T, K, F>(old: &[T], new: &[T], key: F) -> Changes<T>
where
    T: Clone + PartialEq,
    K: Ord,
    F: Fn(&T) -> K,
{
    let old_index = index_by(old, &key);
    let new_index = index_by(new, &key);
    let mut changes = Changes::default();

    for (k, old_item) in &old_index {
        match new_index.get(k) {
            None => changes.to_remove.push((*old_item).clone()),
            Some(new_item) if new_item != old_item => changes.to_change.push(Change {
                old: (*old_item).clone(),
                new: (*new_item).clone(),
            }),
            Some(_) => {}
        }
    }
    for (k, new_item) in &new_index {
        if !old_index.contains_key(k) {
            changes.to_add.push((*new_item).clone());
        }
    }

    changes
}

/// Result of reconciling a string-keyed map such as instance metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapChanges<V> {
    /// Keys present before but no longer wanted
    pub to_delete: Vec<String>,
    /// Keys that are new or whose value changed
    pub to_set: Vec<(String, V)>,
}

impl<V> MapChanges<V> {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_set.is_empty()
    }
}

/// Reconcile two maps: delete vanished keys, set new or changed ones
pub fn reconcile_maps<'a, V, I, J>(old: I, new: J) -> MapChanges<V>
where
    V: Clone + PartialEq + 'a,
    I: IntoIterator<Item = (&'a String, &'a V)>,
    J: IntoIterator<Item = (&'a String, &'a V)>,
{
    let old: BTreeMap<&String, &V> = old.into_iter().collect();
    let new: BTreeMap<&String, &V> = new.into_iter().collect();

    let to_delete = old
        .keys()
        .filter(|k| !new.contains_key(**k))
        .map(|k| (*k).clone())
        .collect();
    let to_set = new
        .iter()
        .filter(|(k, v)| old.get(**k).copied() != Some(**v))
        .map(|(k, v)| ((*k).clone(), (*v).clone()))
        .collect();

    MapChanges { to_delete, to_set }
}
