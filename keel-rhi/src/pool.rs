//! Generational slot storage behind [`Handle`].

use std::marker::PhantomData;
use crate::handle::Handle;

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

/// Slot array owning values of type `V`, addressed by `Handle<T>`.
///
/// Removing a value bumps its slot's generation, so every handle issued for the old value
/// stops resolving even after the slot is reused.
pub struct Pool<T, V> {
    slots: Vec<Slot<V>>,
    free_list: Vec<u32>,
    live: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, V> Default for Pool<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Pool<T, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    pub fn add(&mut self, value: V) -> Handle<T> {
        self.live += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        assert!(index != u32::MAX, "pool exhausted its 32-bit index space");
        self.slots.push(Slot { generation: 1, value: Some(value) });
        Handle::new(index, 1)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&V> {
        if handle.is_empty() {
            return None;
        }
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut V> {
        if handle.is_empty() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Take the value out and invalidate `handle`. Stale or empty handles yield `None`.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<V> {
        if handle.is_empty() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;

        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free_list.push(handle.index());
        self.live -= 1;
        Some(value)
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Handle of the live value at `index`, if any.
    pub fn handle_at(&self, index: u32) -> Option<Handle<T>> {
        let slot = self.slots.get(index as usize)?;
        slot.value.as_ref().map(|_| Handle::new(index, slot.generation))
    }

    /// Reverse lookup: the handle of the first live value matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&V) -> bool) -> Option<Handle<T>> {
        self.iter().find(|(_, value)| predicate(value)).map(|(handle, _)| handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &V)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Remove every live value, invalidating all outstanding handles.
    pub fn drain(&mut self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.live);
        for index in 0..self.slots.len() as u32 {
            if let Some(handle) = self.handle_at(index) {
                values.extend(self.remove(handle));
            }
        }
        values
    }

    #[inline]
    pub fn len(&self) -> usize { self.live }

    #[inline]
    pub fn is_empty(&self) -> bool { self.live == 0 }

    /// Number of slots ever allocated, live or free.
    #[inline]
    pub fn capacity(&self) -> usize { self.slots.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::BufferTag;

    type TestPool = Pool<BufferTag, &'static str>;

    #[test]
    fn add_and_get() {
        let mut pool = TestPool::new();
        let a = pool.add("a");
        let b = pool.add("b");
        assert_ne!(a, b);
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn stale_handle_is_rejected_after_reuse() {
        let mut pool = TestPool::new();
        let old = pool.add("old");
        assert_eq!(pool.remove(old), Some("old"));
        assert_eq!(pool.get(old), None);

        let new = pool.add("new");
        assert_eq!(new.index(), old.index());
        assert!(new.generation() > old.generation());
        assert_eq!(pool.get(old), None);
        assert_eq!(pool.remove(old), None);
        assert_eq!(pool.get(new), Some(&"new"));
    }

    #[test]
    fn empty_handle_never_resolves() {
        let mut pool = TestPool::new();
        pool.add("x");
        assert_eq!(pool.get(Handle::EMPTY), None);
        assert_eq!(pool.remove(Handle::EMPTY), None);
    }

    #[test]
    fn live_handles_stay_unique_under_churn() {
        let mut pool = Pool::<BufferTag, u32>::new();
        let mut live: Vec<Handle<BufferTag>> = Vec::new();
        let mut seen_max_generation = vec![0u32; 512];

        // Deterministic add/remove interleaving.
        for step in 0u32..512 {
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.remove((step as usize * 7) % live.len());
                assert_eq!(pool.remove(victim), Some(victim.index()));
            } else {
                let handle = pool.add(0);
                if let Some(value) = pool.get_mut(handle) {
                    *value = handle.index();
                }
                let max = &mut seen_max_generation[handle.index() as usize];
                assert!(handle.generation() > *max);
                *max = handle.generation();
                live.push(handle);
            }

            for (i, a) in live.iter().enumerate() {
                for b in &live[i + 1..] {
                    assert_ne!(a, b);
                }
            }
        }
        assert_eq!(pool.len(), live.len());
    }

    #[test]
    fn find_and_drain() {
        let mut pool = TestPool::new();
        let a = pool.add("a");
        let b = pool.add("b");
        assert_eq!(pool.find(|v| *v == "b"), Some(b));
        assert_eq!(pool.handle_at(a.index()), Some(a));

        let mut drained = pool.drain();
        drained.sort();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(pool.is_empty());
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.capacity(), 2);
    }
}
