use std::{
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
    ptr::NonNull,
};

/// counting state shared by every control block variant.
///
/// each variant is `#[repr(C)]` and starts with this header, so a pointer to the
/// header is also a pointer to the whole block.
pub(crate) struct BlockHeader {
    /// number of `Shared` handles.
    ///
    /// invariant: reaches 0 exactly once, and the object is destroyed when it does.
    strong: Cell<usize>,
    /// number of `Weak` handles. the block is freed when both counts are 0.
    weak: Cell<usize>,
    /// set before the object's destructor runs and never cleared again.
    destroyed: Cell<bool>,
    vtable: &'static BlockVTable,
}

struct BlockVTable {
    destroy_object: unsafe fn(NonNull<BlockHeader>, bool),
    deallocate: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    fn new(vtable: &'static BlockVTable) -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            destroyed: Cell::new(false),
            vtable,
        }
    }
}

/// control block for an object that lives in its own `Box`.
#[repr(C)]
pub(crate) struct SeparateBlock<T: ?Sized> {
    header: BlockHeader,
    object: Cell<Option<NonNull<T>>>,
}

impl<T: ?Sized> SeparateBlock<T> {
    const VTABLE: BlockVTable = BlockVTable {
        destroy_object: Self::destroy_object,
        deallocate: Self::deallocate,
    };

    /// takes ownership of `object`. the returned block holds one strong count.
    pub(crate) fn allocate(object: Box<T>) -> (BlockRef, NonNull<T>) {
        let object = unsafe { NonNull::new_unchecked(Box::into_raw(object)) };
        let block = Box::new(SeparateBlock {
            header: BlockHeader::new(&Self::VTABLE),
            object: Cell::new(Some(object)),
        });
        let block = unsafe { NonNull::new_unchecked(Box::into_raw(block)) }.cast::<BlockHeader>();

        trace!(
            "allocated separate control block {:p} for object {:p}",
            block,
            object.cast::<()>()
        );

        (BlockRef(block), object)
    }

    /// `defer_pointer_clear` leaves the stored pointer in place after the object is freed.
    unsafe fn destroy_object(header: NonNull<BlockHeader>, defer_pointer_clear: bool) {
        let this = unsafe { header.cast::<Self>().as_ref() };
        if this.header.destroyed.replace(true) {
            return;
        }

        let object = if defer_pointer_clear {
            this.object.get()
        } else {
            this.object.take()
        };

        trace!("destroying object of control block {:p}", header);
        if let Some(object) = object {
            drop(unsafe { Box::from_raw(object.as_ptr()) });
        }
    }

    unsafe fn deallocate(header: NonNull<BlockHeader>) {
        // the block is freed right after, so the pointer is never read again.
        unsafe { Self::destroy_object(header, true) };

        trace!("deallocating separate control block {:p}", header);
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

/// control block with the object stored inline, so one allocation serves both.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T> {
    header: BlockHeader,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> EmbeddedBlock<T> {
    const VTABLE: BlockVTable = BlockVTable {
        destroy_object: Self::destroy_object,
        deallocate: Self::deallocate,
    };

    /// allocates the block first and then writes the value produced by `init` into its storage.
    pub(crate) fn allocate_with<F: FnOnce() -> T>(init: F) -> (BlockRef, NonNull<T>) {
        let block = Box::into_raw(Box::new(EmbeddedBlock {
            header: BlockHeader::new(&Self::VTABLE),
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }));

        // frees the uninitialized block if `init` unwinds.
        struct Guard<T>(*mut EmbeddedBlock<T>);
        impl<T> Drop for Guard<T> {
            fn drop(&mut self) {
                drop(unsafe { Box::from_raw(self.0) });
            }
        }

        let guard = Guard(block);
        let value = init();
        std::mem::forget(guard);

        let object = unsafe {
            let storage = (*block).storage.get();
            (*storage).write(value);
            NonNull::new_unchecked(storage.cast::<T>())
        };
        let block = unsafe { NonNull::new_unchecked(block) }.cast::<BlockHeader>();

        trace!("allocated embedded control block {:p}", block);

        (BlockRef(block), object)
    }

    // the object is inline, so there is no pointer to clear.
    unsafe fn destroy_object(header: NonNull<BlockHeader>, _defer_pointer_clear: bool) {
        let this = unsafe { header.cast::<Self>().as_ref() };
        if this.header.destroyed.replace(true) {
            return;
        }

        trace!("destroying object of control block {:p}", header);
        unsafe { std::ptr::drop_in_place(this.storage.get().cast::<T>()) };
    }

    unsafe fn deallocate(header: NonNull<BlockHeader>) {
        unsafe { Self::destroy_object(header, true) };

        trace!("deallocating embedded control block {:p}", header);
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

/// type erased reference to a control block of either variant.
///
/// a `BlockRef` does not own a count by itself. `Shared` and `Weak` hold one
/// alongside the count they are responsible for releasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockRef(NonNull<BlockHeader>);

impl BlockRef {
    fn header(&self) -> &BlockHeader {
        // the block stays alive as long as its owner holds a strong or weak count.
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn addr(self) -> *const () {
        self.0.as_ptr() as *const ()
    }

    /// strong count as observers see it. once the object is destroyed this is 0,
    /// including while `release_strong` holds its transient count.
    pub(crate) fn strong_count(self) -> usize {
        let header = self.header();
        if header.destroyed.get() {
            0
        } else {
            header.strong.get()
        }
    }

    pub(crate) fn weak_count(self) -> usize {
        self.header().weak.get()
    }

    pub(crate) fn is_destroyed(self) -> bool {
        self.header().destroyed.get()
    }

    pub(crate) fn acquire_strong(self) {
        let header = self.header();
        header.strong.set(increment(header.strong.get()));
    }

    pub(crate) fn acquire_weak(self) {
        let header = self.header();
        header.weak.set(increment(header.weak.get()));
    }

    /// acquires a strong count unless the object is already gone.
    pub(crate) fn try_acquire_strong(self) -> bool {
        let header = self.header();
        if header.destroyed.get() || header.strong.get() == 0 {
            return false;
        }

        header.strong.set(increment(header.strong.get()));
        true
    }

    /// # Safety
    /// the caller must own one strong count of this block and must not use it afterwards.
    pub(crate) unsafe fn release_strong(self) {
        let header = self.header();
        let vtable = header.vtable;

        let strong = header.strong.get() - 1;
        header.strong.set(strong);
        if strong > 0 {
            return;
        }

        if header.weak.get() == 0 {
            unsafe { (vtable.deallocate)(self.0) };
            return;
        }

        // weak handles keep the block alive. the destructor may release some of them
        // (an embedded self reference in particular), so a transient strong count
        // stops them from freeing the block while the destructor is still running.
        // observers see 0 meanwhile because `destroyed` is already set.
        header.strong.set(1);
        unsafe { (vtable.destroy_object)(self.0, false) };
        header.strong.set(header.strong.get() - 1);

        if header.strong.get() == 0 && header.weak.get() == 0 {
            unsafe { (vtable.deallocate)(self.0) };
        }
    }

    /// # Safety
    /// the caller must own one weak count of this block and must not use it afterwards.
    pub(crate) unsafe fn release_weak(self) {
        let header = self.header();
        let vtable = header.vtable;

        let weak = header.weak.get() - 1;
        header.weak.set(weak);

        if weak == 0 && header.strong.get() == 0 {
            unsafe { (vtable.deallocate)(self.0) };
        }
    }
}

fn increment(count: usize) -> usize {
    match count.checked_add(1) {
        Some(v) => v,
        None => std::process::abort(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sharedptr_internals::{TraceCell, TRACE_STORE};

    #[test]
    fn separate_block_uses_two_allocations() {
        let tracing = TRACE_STORE.start_tracing();

        let info = mockalloc::record_allocs(|| {
            let (block, _) = SeparateBlock::allocate(Box::new(TraceCell::new(1u64)));
            assert_eq!(block.strong_count(), 1);
            assert_eq!(block.weak_count(), 0);
            unsafe { block.release_strong() };
        });

        assert_eq!(info.num_allocs(), 2);
        assert_eq!(info.num_frees(), 2);
        assert_eq!(tracing.drops(), 1);
    }

    #[test]
    fn embedded_block_uses_one_allocation() {
        let tracing = TRACE_STORE.start_tracing();

        let info = mockalloc::record_allocs(|| {
            let (block, object) = EmbeddedBlock::allocate_with(|| TraceCell::new(7u64));
            assert_eq!(unsafe { **object.as_ref() }, 7);
            unsafe { block.release_strong() };
        });

        assert_eq!(info.num_allocs(), 1);
        assert_eq!(info.num_frees(), 1);
        assert_eq!(tracing.drops(), 1);
    }

    #[test]
    fn weak_count_keeps_block_after_object_is_destroyed() {
        let tracing = TRACE_STORE.start_tracing();

        let mut kept = None;
        let info = mockalloc::record_allocs(|| {
            let (block, _) = EmbeddedBlock::allocate_with(|| TraceCell::new(3u64));
            block.acquire_weak();
            unsafe { block.release_strong() };
            kept = Some(block);
        });

        assert_eq!(info.num_allocs(), 1);
        assert_eq!(info.num_frees(), 0);
        assert_eq!(tracing.drops(), 1);

        let block = kept.take().unwrap();
        assert!(block.is_destroyed());
        assert_eq!(block.strong_count(), 0);
        assert!(!block.try_acquire_strong());

        let info = mockalloc::record_allocs(|| unsafe { block.release_weak() });
        assert_eq!(info.num_frees(), 1);
        assert_eq!(tracing.drops(), 1);
    }

    #[test]
    fn destroy_object_runs_once() {
        let tracing = TRACE_STORE.start_tracing();

        let (block, _) = SeparateBlock::allocate(Box::new(TraceCell::new(5u64)));
        unsafe {
            (block.header().vtable.destroy_object)(block.0, false);
            (block.header().vtable.destroy_object)(block.0, false);
        }
        assert_eq!(tracing.drops(), 1);

        // dropping the last count goes through the destroyed path without a second drop.
        block.acquire_weak();
        unsafe {
            block.release_strong();
            block.release_weak();
        }
        assert_eq!(tracing.drops(), 1);
    }

    #[test]
    fn deferred_pointer_clear_keeps_the_stored_pointer() {
        let tracing = TRACE_STORE.start_tracing();

        let (block, object) = SeparateBlock::allocate(Box::new(TraceCell::new(9u64)));
        let separate = unsafe { block.0.cast::<SeparateBlock<TraceCell<u64>>>().as_ref() };

        unsafe { SeparateBlock::<TraceCell<u64>>::destroy_object(block.0, true) };
        assert_eq!(separate.object.get(), Some(object));
        assert_eq!(tracing.drops(), 1);

        block.acquire_weak();
        unsafe {
            block.release_strong();
            block.release_weak();
        }
    }

    #[test]
    fn panicking_init_frees_the_block() {
        let tracing = TRACE_STORE.start_tracing();

        let result = std::panic::catch_unwind(|| {
            EmbeddedBlock::<TraceCell<u64>>::allocate_with(|| panic!("init failed"))
        });

        assert!(result.is_err());
        assert_eq!(tracing.constructs(), 0);
        assert_eq!(tracing.drops(), 0);
    }
}
