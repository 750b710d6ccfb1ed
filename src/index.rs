//! Key→slot maps.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::slot::Slot;

/// Maps conflation keys to their slots and mints the fifo tokens that stand
/// in for keys on the wire.
///
/// Accessors run a closure against the slot rather than returning a
/// reference, so implementations may hold a lock guard across the atomic
/// operation.
pub trait SlotMap<K, V> {
    /// Fifo token standing in for a key.
    type Token: Clone + Send;

    /// Run `f` against the slot for `key`, creating the slot first where the
    /// variant supports that. `value` is threaded through so it can be handed
    /// back untouched (as the error) when the key is unknown.
    fn with_slot<R>(
        &self,
        key: &K,
        value: Box<V>,
        f: impl FnOnce(&Slot<V>, Box<V>) -> R,
    ) -> Result<(Self::Token, R), Box<V>>;

    /// Run `f` against the slot for a previously minted token.
    fn with_token<R>(&self, token: &Self::Token, f: impl FnOnce(&Slot<V>) -> R) -> R;

    /// The key a token stands for.
    fn key<'a>(&'a self, token: &'a Self::Token) -> &'a K;
}

/// Fixed index over a declared key set.
///
/// Slots live in a dense array created eagerly at construction; tokens are
/// array positions, so the fifo carries small integers and the whole lookup
/// path is allocation-free. Keys outside the declared set are rejected.
pub struct Declared<K, V> {
    ids: HashMap<K, usize>,
    keys: Vec<K>,
    slots: Box<[Slot<V>]>,
}

impl<K: Eq + Hash + Clone, V> Declared<K, V> {
    /// Build the index over `keys`.
    ///
    /// # Panics
    ///
    /// Panics if `keys` is empty or contains duplicates.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        let keys: Vec<K> = keys.into_iter().collect();
        assert!(!keys.is_empty(), "a declared queue needs at least one key");
        let mut ids = HashMap::with_capacity(keys.len());
        for (id, key) in keys.iter().enumerate() {
            let duplicate = ids.insert(key.clone(), id).is_some();
            assert!(!duplicate, "duplicate declared key");
        }
        let slots = (0..keys.len())
            .map(|_| Slot::empty())
            .collect::<Vec<_>>()
            .into();
        Self { ids, keys, slots }
    }

    /// Number of declared keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; construction requires at least one key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V> SlotMap<K, V> for Declared<K, V> {
    type Token = usize;

    fn with_slot<R>(
        &self,
        key: &K,
        value: Box<V>,
        f: impl FnOnce(&Slot<V>, Box<V>) -> R,
    ) -> Result<(usize, R), Box<V>> {
        match self.ids.get(key) {
            Some(&id) => Ok((id, f(&self.slots[id], value))),
            None => Err(value),
        }
    }

    fn with_token<R>(&self, token: &usize, f: impl FnOnce(&Slot<V>) -> R) -> R {
        f(&self.slots[*token])
    }

    fn key<'a>(&'a self, token: &'a usize) -> &'a K {
        &self.keys[*token]
    }
}

/// Lazily populated index over an open key set.
///
/// Slots are created on first enqueue under a short write lock; every later
/// access takes the read lock only. Tokens are key clones, so the fifo
/// carries keys directly.
#[cfg(feature = "std")]
pub struct Open<K, V> {
    map: std::sync::RwLock<HashMap<K, Slot<V>>>,
}

#[cfg(feature = "std")]
impl<K: Eq + Hash + Clone, V> Open<K, V> {
    /// New empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: std::sync::RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, Slot<V>>> {
        // A poisoned lock means some thread panicked in a listener or merger
        // mid-access; the map itself is still structurally sound.
        match self.map.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(feature = "std")]
impl<K: Eq + Hash + Clone, V> Default for Open<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl<K: Eq + Hash + Clone + Send, V> SlotMap<K, V> for Open<K, V> {
    type Token = K;

    fn with_slot<R>(
        &self,
        key: &K,
        value: Box<V>,
        f: impl FnOnce(&Slot<V>, Box<V>) -> R,
    ) -> Result<(K, R), Box<V>> {
        {
            let guard = self.read();
            if let Some(slot) = guard.get(key) {
                return Ok((key.clone(), f(slot, value)));
            }
        }
        let mut guard = match self.map.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = guard.entry(key.clone()).or_insert_with(Slot::empty);
        Ok((key.clone(), f(slot, value)))
    }

    fn with_token<R>(&self, token: &K, f: impl FnOnce(&Slot<V>) -> R) -> R {
        let guard = self.read();
        match guard.get(token) {
            Some(slot) => f(slot),
            // Tokens are only ever minted after the slot exists, and slots
            // are never removed.
            None => unreachable!("fifo token without a slot"),
        }
    }

    fn key<'a>(&'a self, token: &'a K) -> &'a K {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Displaced;

    #[test]
    fn declared_rejects_unknown_keys() {
        let index: Declared<&str, u64> = Declared::new(["a", "b"]);
        assert_eq!(index.len(), 2);
        let err = index.with_slot(&"z", Box::new(1), |_, _| unreachable!());
        assert_eq!(err.err().map(|v| *v), Some(1));
    }

    #[test]
    fn declared_tokens_round_trip() {
        let index: Declared<&str, u64> = Declared::new(["a", "b"]);
        let (token, _) = index
            .with_slot(&"b", Box::new(5), |slot, v| slot.install(v))
            .unwrap();
        assert_eq!(*index.key(&token), "b");
        let taken = index.with_token(&token, |slot| slot.take());
        assert_eq!(taken.map(|v| *v), Some(5));
    }

    #[test]
    #[should_panic(expected = "duplicate declared key")]
    fn declared_panics_on_duplicates() {
        let _ = Declared::<&str, u64>::new(["a", "a"]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn open_creates_slots_lazily() {
        let index: Open<std::string::String, u64> = Open::new();
        let (token, (_, prev)) = index
            .with_slot(&"eurusd".into(), Box::new(7), |slot, v| slot.install(v))
            .unwrap();
        assert!(matches!(prev, Displaced::Empty));

        // Second access reuses the slot.
        let (_, (_, prev)) = index
            .with_slot(&"eurusd".into(), Box::new(8), |slot, v| slot.install(v))
            .unwrap();
        assert!(matches!(prev, Displaced::Live(_)));
        let taken = index.with_token(&token, |slot| slot.take());
        assert_eq!(taken.map(|v| *v), Some(8));
    }
}
