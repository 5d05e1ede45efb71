//! # Collections
//!
//! [`Collection`] is an ordered list with the grouping, chunking and
//! plucking helpers that result sets usually need. Every transforming
//! method returns a new collection and leaves the receiver untouched.
//!
//! ```ignore
//! let users = repository.all().await?;
//! let names = users.pluck("name");
//! let by_role = users.group_by(|u| u.get("role").map(ToString::to_string));
//! ```

use crate::database::DbValue;
use crate::model::{Model, Schema};
use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::hash::Hash;
use std::ops::Index;

/// Ordered, owned list of items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Collection<T> {
    /// Wrap `items`, keeping their order
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Number of items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items as a slice
    #[must_use]
    pub fn all(&self) -> &[T] {
        &self.items
    }

    /// Item at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Iterate over the items in order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Append one item
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Unwrap into the underlying vector
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// First item
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// First item matching `predicate`
    pub fn first_where(&self, predicate: impl FnMut(&&T) -> bool) -> Option<&T> {
        self.items.iter().find(predicate)
    }

    /// Whether any item matches `predicate`
    pub fn contains(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.items.iter().any(predicate)
    }

    /// Apply `f` to every item
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Collection<U> {
        self.items.into_iter().map(f).collect()
    }

    /// Keep the items matching `predicate`
    #[must_use]
    pub fn filter(self, predicate: impl FnMut(&T) -> bool) -> Self {
        self.items.into_iter().filter(predicate).collect()
    }

    /// Fold the items into one value
    pub fn reduce<A>(self, initial: A, f: impl FnMut(A, T) -> A) -> A {
        self.items.into_iter().fold(initial, f)
    }

    /// Append the items of `other`
    #[must_use]
    pub fn merge(mut self, other: impl IntoIterator<Item = T>) -> Self {
        self.items.extend(other);
        self
    }

    /// Stable sort with `compare`
    #[must_use]
    pub fn sort_by(mut self, compare: impl FnMut(&T, &T) -> Ordering) -> Self {
        self.items.sort_by(compare);
        self
    }

    /// Keep the first item for each distinct `key`
    ///
    /// Keys only need equality, so floats and other unhashable values work.
    #[must_use]
    pub fn unique_by<K: PartialEq>(self, mut key: impl FnMut(&T) -> K) -> Self {
        let mut seen: Vec<K> = Vec::new();
        self.items
            .into_iter()
            .filter(|item| {
                let k = key(item);
                if seen.contains(&k) {
                    false
                } else {
                    seen.push(k);
                    true
                }
            })
            .collect()
    }

    /// Bucket items by `key`, buckets in first-seen order
    #[must_use]
    pub fn group_by<K: Hash + Eq>(self, mut key: impl FnMut(&T) -> K) -> IndexMap<K, Self> {
        let mut groups: IndexMap<K, Self> = IndexMap::new();
        for item in self.items {
            groups.entry(key(&item)).or_default().push(item);
        }
        groups
    }

    /// Split into runs of `size` items; the last run may be shorter
    ///
    /// A size of 0 is treated as 1.
    #[must_use]
    pub fn chunk(self, size: usize) -> Vec<Self> {
        let size = size.max(1);
        let mut chunks = Vec::with_capacity(self.items.len().div_ceil(size));
        let mut items = self.items.into_iter().peekable();
        while items.peek().is_some() {
            chunks.push(items.by_ref().take(size).collect());
        }
        chunks
    }

    /// Concatenate nested items into one level
    #[must_use]
    pub fn flatten<U>(self) -> Collection<U>
    where
        T: IntoIterator<Item = U>,
    {
        self.items.into_iter().flatten().collect()
    }
}

impl<T: Ord> Collection<T> {
    /// Stable ascending sort
    #[must_use]
    pub fn sort(mut self) -> Self {
        self.items.sort();
        self
    }
}

impl<S: Schema> Collection<Model<S>> {
    /// One attribute of every model, `Null` where it is missing
    #[must_use]
    pub fn pluck(&self, attribute: &str) -> Collection<DbValue> {
        self.items
            .iter()
            .map(|model| model.get(attribute).cloned().unwrap_or(DbValue::Null))
            .collect()
    }

    /// Serializable form of every model, hidden attributes removed
    #[must_use]
    pub fn to_array(&self) -> Vec<Map<String, Value>> {
        self.items.iter().map(Model::to_array).collect()
    }
}

impl<T> From<Vec<T>> for Collection<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> Extend<T> for Collection<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T> Index<usize> for Collection<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T: Serialize> Serialize for Collection<T> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        self.items.serialize(serializer)
    }
}
