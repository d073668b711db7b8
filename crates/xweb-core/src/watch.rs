//! Observable value holders.
//!
//! [`Watched`] holds a single value and [`WatchedMap`] a keyed set of values.
//! Both keep an ordered list of listeners that are called, in registration
//! order, whenever a `set` actually changes something.

use std::collections::BTreeMap;

/// Handle identifying one listener on a watched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Old and new value of a watched value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<'a, T> {
    pub old_value: &'a T,
    pub new_value: &'a T,
}

/// Change of one key in a watched map, with the map as it is after the change.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryChange<'a, T> {
    pub key: &'a str,
    pub old_value: Option<&'a T>,
    pub new_value: &'a T,
    pub value: &'a BTreeMap<String, T>,
}

struct Listeners<L: ?Sized> {
    next_id: u64,
    entries: Vec<(ListenerId, Box<L>)>,
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<L: ?Sized> Listeners<L> {
    fn add(&mut self, listener: Box<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    fn iter(&self) -> impl Iterator<Item = &L> {
        self.entries.iter().map(|(_, listener)| listener.as_ref())
    }
}

type ValueListener<T> = dyn Fn(&ValueChange<'_, T>) + Send + Sync;
type EntryListener<T> = dyn Fn(&EntryChange<'_, T>) + Send + Sync;

/// A single observable value.
pub struct Watched<T> {
    value: T,
    listeners: Listeners<ValueListener<T>>,
}

impl<T: PartialEq> Watched<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            listeners: Listeners::default(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replace the value. Listeners run only if the value differs.
    ///
    /// Returns true if the value changed.
    pub fn set(&mut self, new_value: T) -> bool {
        if self.value == new_value {
            return false;
        }
        let old_value = std::mem::replace(&mut self.value, new_value);
        let change = ValueChange {
            old_value: &old_value,
            new_value: &self.value,
        };
        for listener in self.listeners.iter() {
            listener(&change);
        }
        true
    }

    /// Register a listener called with every change.
    pub fn listen<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&ValueChange<'_, T>) + Send + Sync + 'static,
    {
        self.listeners.add(Box::new(listener))
    }

    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Watched<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watched")
            .field("value", &self.value)
            .field("listeners", &self.listeners.entries.len())
            .finish()
    }
}

impl<T: PartialEq + Default> Default for Watched<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A keyed collection of observable values.
pub struct WatchedMap<T> {
    store: BTreeMap<String, T>,
    listeners: Listeners<EntryListener<T>>,
}

impl<T: PartialEq + Clone> WatchedMap<T> {
    pub fn new() -> Self {
        Self {
            store: BTreeMap::new(),
            listeners: Listeners::default(),
        }
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
    {
        let mut map = Self::new();
        map.store = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        map
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.store.get(key)
    }

    /// Set one key. Listeners run only if the stored value differs.
    ///
    /// Returns true if the map changed.
    pub fn set(&mut self, key: &str, new_value: T) -> bool {
        if self.store.get(key) == Some(&new_value) {
            return false;
        }
        let old_value = self.store.insert(key.to_string(), new_value);
        if let Some(stored) = self.store.get(key) {
            let change = EntryChange {
                key,
                old_value: old_value.as_ref(),
                new_value: stored,
                value: &self.store,
            };
            for listener in self.listeners.iter() {
                listener(&change);
            }
        }
        true
    }

    /// Copy of the whole map.
    pub fn snapshot(&self) -> BTreeMap<String, T> {
        self.store.clone()
    }

    pub fn listen<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&EntryChange<'_, T>) + Send + Sync + 'static,
    {
        self.listeners.add(Box::new(listener))
    }

    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl<T: PartialEq + Clone> Default for WatchedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
