use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{block::BlockRef, Shared};

/// non-owning observer of an object managed by [`Shared`].
///
/// the stored pointer may dangle and is never dereferenced here. the object is
/// only reached again through [`Weak::lock`] or [`Shared::from_weak`].
pub struct Weak<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    /// invariant: if `Some`, this handle owns one weak count of the block.
    block: Option<BlockRef>,
    marker: PhantomData<T>,
}

impl<T: ?Sized> Weak<T> {
    pub const fn new() -> Self {
        Self {
            ptr: None,
            block: None,
            marker: PhantomData,
        }
    }

    /// takes over a weak count the caller already acquired.
    pub(crate) unsafe fn from_parts(ptr: Option<NonNull<T>>, block: Option<BlockRef>) -> Self {
        Self {
            ptr,
            block,
            marker: PhantomData,
        }
    }

    pub(crate) fn parts(&self) -> (Option<NonNull<T>>, Option<BlockRef>) {
        (self.ptr, self.block)
    }

    pub fn use_count(&self) -> usize {
        self.block.map_or(0, |block| block.strong_count())
    }

    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, |block| block.weak_count())
    }

    pub fn expired(&self) -> bool {
        match (self.block, self.ptr) {
            (Some(block), Some(_)) => block.strong_count() == 0,
            _ => true,
        }
    }

    /// promotes to a `Shared`, or returns the empty handle if the object is gone.
    pub fn lock(&self) -> Shared<T> {
        Shared::from_weak(self).unwrap_or_default()
    }

    pub fn reset(&mut self) {
        drop(std::mem::replace(self, Self::new()));
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// whether both handles observe the same control block.
    pub fn same_owner<U: ?Sized>(&self, other: &Weak<U>) -> bool {
        self.block == other.block
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block.release_weak() };
        }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.acquire_weak();
        }

        unsafe { Self::from_parts(self.ptr, self.block) }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("block", &self.block.map(BlockRef::addr))
            .field("use_count", &self.use_count())
            .field("weak_count", &self.weak_count())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sharedptr_internals::{TraceCell, TRACE_STORE};

    #[test]
    fn never_touches_strong_count() {
        let shared = Shared::new(10u32);
        let weak = Shared::downgrade(&shared);
        let copy = weak.clone();

        assert_eq!(shared.use_count(), 1);
        assert_eq!(shared.weak_count(), 2);
        assert_eq!(weak.use_count(), 1);
        assert!(!weak.expired());
        assert!(weak.same_owner(&copy));

        drop(copy);
        assert_eq!(weak.weak_count(), 1);
    }

    #[test]
    fn lock_promotes_live_object() {
        let shared = Shared::new(String::from("alive"));
        let weak = Weak::from(&shared);

        let locked = weak.lock();
        assert_eq!(locked, shared);
        assert_eq!(shared.use_count(), 2);
        assert_eq!(&*locked, "alive");
    }

    #[test]
    fn lock_of_expired_is_empty() {
        let tracing = TRACE_STORE.start_tracing();

        let shared = Shared::from_box(Box::new(TraceCell::new(4u64)));
        let weak = Shared::downgrade(&shared);
        drop(shared);

        assert_eq!(tracing.drops(), 1);
        assert!(weak.expired());
        assert_eq!(weak.use_count(), 0);
        assert_eq!(weak.weak_count(), 1);

        let locked = weak.lock();
        assert!(!locked.is_attached());
        assert_eq!(locked.use_count(), 0);
    }

    #[test]
    fn empty_weak() {
        let weak = Weak::<u32>::new();
        assert!(weak.expired());
        assert_eq!(weak.use_count(), 0);
        assert_eq!(weak.weak_count(), 0);
        assert!(!weak.lock().is_attached());
        assert!(weak.same_owner(&Weak::<String>::default()));
    }

    #[test]
    fn pointer_less_weak_is_expired() {
        let root = Shared::new(1u32);
        let nothing = unsafe { Shared::aliasing(&root, std::ptr::null::<u8>()) };
        let weak = Shared::downgrade(&nothing);

        assert_eq!(weak.use_count(), 2);
        assert!(weak.expired());
    }

    #[test]
    fn last_weak_frees_the_block() {
        let tracing = TRACE_STORE.start_tracing();

        let mut weaks = Vec::with_capacity(2);
        let info = mockalloc::record_allocs(|| {
            let shared = Shared::new(TraceCell::new(6u64));
            weaks.push(Shared::downgrade(&shared));
            weaks.push(weaks[0].clone());
        });
        assert_eq!(info.num_allocs(), 1);
        assert_eq!(info.num_frees(), 0);
        assert_eq!(tracing.drops(), 1);

        let mut second = weaks.pop().unwrap();
        let mut first = weaks.pop().unwrap();

        let info = mockalloc::record_allocs(|| first.reset());
        assert_eq!(info.num_frees(), 0);
        assert!(first.expired());
        assert_eq!(second.weak_count(), 1);

        let info = mockalloc::record_allocs(|| second.reset());
        assert_eq!(info.num_frees(), 1);
        assert_eq!(tracing.drops(), 1);
    }

    #[test]
    fn swap_exchanges_state() {
        let a = Shared::new(1u32);
        let b = Shared::new(2u32);
        let mut wa = Shared::downgrade(&a);
        let mut wb = Shared::downgrade(&b);

        wa.swap(&mut wb);
        assert_eq!(*wa.lock(), 2);
        assert_eq!(*wb.lock(), 1);
    }
}
