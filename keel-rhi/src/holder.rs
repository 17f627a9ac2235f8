use std::fmt;
use std::ops::Deref;
use std::sync::Weak;
use crate::handle::Handle;

/// Something that can logically destroy the resource behind a `Handle<T>`.
///
/// Implemented by the device once per resource kind.
pub trait HandleOwner<T>: Send + Sync {
    fn destroy_handle(&self, handle: Handle<T>);
}

/// Exclusive owner of one handle.
///
/// Dropping or [`reset`](Holder::reset)ting the holder asks the owning device to destroy the
/// resource, exactly once. The device reference is weak: a holder outliving its device is
/// inert because the device already tore everything down.
pub struct Holder<T> {
    owner: Option<Weak<dyn HandleOwner<T>>>,
    handle: Handle<T>,
}

impl<T> Holder<T> {
    pub fn new(owner: Weak<dyn HandleOwner<T>>, handle: Handle<T>) -> Self {
        Self { owner: Some(owner), handle }
    }

    pub(crate) fn from_weak<O: HandleOwner<T> + 'static>(owner: &Weak<O>, handle: Handle<T>) -> Self
    where
        T: 'static,
    {
        let weak: Weak<dyn HandleOwner<T>> = owner.clone();
        Self::new(weak, handle)
    }

    /// A holder that owns nothing.
    pub fn empty() -> Self {
        Self { owner: None, handle: Handle::EMPTY }
    }

    #[inline]
    pub fn handle(&self) -> Handle<T> { self.handle }

    #[inline]
    pub fn is_valid(&self) -> bool { self.handle.is_valid() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.handle.is_empty() }

    /// Destroy the held resource now and leave the holder empty.
    pub fn reset(&mut self) {
        let handle = std::mem::take(&mut self.handle);
        if let Some(owner) = self.owner.take().and_then(|owner| owner.upgrade()) {
            if handle.is_valid() {
                owner.destroy_handle(handle);
            }
        }
    }

    /// Give up ownership without destroying anything.
    pub fn release(mut self) -> Handle<T> {
        self.owner = None;
        std::mem::take(&mut self.handle)
    }
}

impl<T> Default for Holder<T> {
    fn default() -> Self { Self::empty() }
}

impl<T> Deref for Holder<T> {
    type Target = Handle<T>;

    fn deref(&self) -> &Handle<T> { &self.handle }
}

impl<T> From<&Holder<T>> for Handle<T> {
    fn from(holder: &Holder<T>) -> Self { holder.handle }
}

impl<T> fmt::Debug for Holder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Holder").field(&self.handle).finish()
    }
}

impl<T> Drop for Holder<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::handle::BufferTag;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        destroyed: Mutex<Vec<Handle<BufferTag>>>,
    }

    impl HandleOwner<BufferTag> for Recorder {
        fn destroy_handle(&self, handle: Handle<BufferTag>) {
            self.destroyed.lock().push(handle);
        }
    }

    #[test]
    fn drop_destroys_exactly_once() {
        let owner = Arc::new(Recorder::default());
        let handle = Handle::new(4, 2);
        {
            let holder = Holder::from_weak(&Arc::downgrade(&owner), handle);
            let moved = holder;
            assert_eq!(moved.handle(), handle);
        }
        assert_eq!(*owner.destroyed.lock(), vec![handle]);
    }

    #[test]
    fn reset_then_drop_does_not_double_destroy() {
        let owner = Arc::new(Recorder::default());
        let mut holder = Holder::from_weak(&Arc::downgrade(&owner), Handle::new(1, 1));
        holder.reset();
        assert!(holder.is_empty());
        drop(holder);
        assert_eq!(owner.destroyed.lock().len(), 1);
    }

    #[test]
    fn release_hands_back_the_handle() {
        let owner = Arc::new(Recorder::default());
        let holder = Holder::from_weak(&Arc::downgrade(&owner), Handle::new(9, 3));
        let raw = holder.release();
        assert_eq!(raw, Handle::new(9, 3));
        assert!(owner.destroyed.lock().is_empty());
    }

    #[test]
    fn outliving_the_owner_is_inert() {
        let owner = Arc::new(Recorder::default());
        let holder = Holder::from_weak(&Arc::downgrade(&owner), Handle::<BufferTag>::new(0, 1));
        drop(owner);
        drop(holder);
    }
}
