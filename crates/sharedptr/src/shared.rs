use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    block::{BlockRef, SeparateBlock},
    make_shared::make_shared,
    DanglingWeakError, Weak,
};

/// reference counted owning handle.
///
/// a `Shared` stores the control block it shares ownership through and,
/// separately, the pointer it dereferences to. the two usually agree, but an
/// aliasing handle keeps a whole object alive while exposing only a part of it.
///
/// equality is block identity: handles compare equal when they share a control
/// block, whatever they point at.
pub struct Shared<T: ?Sized> {
    /// `None` for the empty handle or an aliasing handle built from a null pointer.
    ptr: Option<NonNull<T>>,
    /// invariant: if `Some`, this handle owns one strong count of the block.
    block: Option<BlockRef>,
    marker: PhantomData<T>,
}

impl<T: ?Sized> Shared<T> {
    /// the empty handle. owns nothing and is not attached to any block.
    pub const fn null() -> Self {
        Self {
            ptr: None,
            block: None,
            marker: PhantomData,
        }
    }

    /// takes over a strong count the caller already acquired.
    pub(crate) unsafe fn from_parts(ptr: Option<NonNull<T>>, block: Option<BlockRef>) -> Self {
        Self {
            ptr,
            block,
            marker: PhantomData,
        }
    }

    /// takes ownership of a separately allocated object.
    ///
    /// the control block is a second allocation. prefer [`Shared::new`] unless
    /// the object is already boxed, e.g. as a `Box<dyn Trait>`.
    pub fn from_box(object: Box<T>) -> Self {
        let (block, ptr) = SeparateBlock::allocate(object);
        unsafe { Self::from_parts(Some(ptr), Some(block)) }
    }

    /// takes ownership of the object behind `ptr`. a null pointer gives the empty handle.
    ///
    /// # Safety
    /// `ptr` must be null or come from `Box::into_raw`, and nothing else may free it afterwards.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self::from_box(unsafe { Box::from_raw(ptr.as_ptr()) }),
            None => Self::null(),
        }
    }

    /// promotes a weak handle, failing if its object is no longer alive.
    ///
    /// a block that is only kept for weak observers is never revived.
    pub fn from_weak(weak: &Weak<T>) -> Result<Self, DanglingWeakError> {
        let (ptr, block) = weak.parts();
        let Some(block) = block else {
            return Err(DanglingWeakError::Unbound);
        };

        if !block.try_acquire_strong() {
            return Err(DanglingWeakError::Expired);
        }

        Ok(unsafe { Self::from_parts(ptr, Some(block)) })
    }

    /// shares ownership of `this`'s object while dereferencing to a part of it.
    ///
    /// ```
    /// use sharedptr::Shared;
    ///
    /// struct Pair {
    ///     left: u32,
    ///     right: u32,
    /// }
    ///
    /// let pair = Shared::new(Pair { left: 1, right: 2 });
    /// let right = Shared::alias(&pair, |p| &p.right);
    /// drop(pair);
    /// assert_eq!(*right, 2);
    /// ```
    ///
    /// it is also the way to change the static type, e.g. `|v| v as &dyn Trait`.
    /// an empty or pointer-less `this` gives a pointer-less result that still
    /// shares the block.
    pub fn alias<U: ?Sized, F: FnOnce(&T) -> &U>(this: &Self, f: F) -> Shared<U> {
        let ptr = this.get().map(|v| NonNull::from(f(v)));
        if let Some(block) = this.block {
            block.acquire_strong();
        }

        unsafe { Shared::from_parts(ptr, this.block) }
    }

    /// shares ownership of `this`'s object while dereferencing to `ptr`.
    ///
    /// # Safety
    /// `ptr` must be null or stay valid for as long as `this`'s object is alive.
    pub unsafe fn aliasing<U: ?Sized>(this: &Self, ptr: *const U) -> Shared<U> {
        if let Some(block) = this.block {
            block.acquire_strong();
        }

        unsafe { Shared::from_parts(NonNull::new(ptr as *mut U), this.block) }
    }

    pub fn downgrade(this: &Self) -> Weak<T> {
        if let Some(block) = this.block {
            block.acquire_weak();
        }

        unsafe { Weak::from_parts(this.ptr, this.block) }
    }

    /// the object, or `None` if the handle is empty or the object is gone.
    pub fn get(&self) -> Option<&T> {
        self.as_ptr().map(|ptr| unsafe { ptr.as_ref() })
    }

    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        match self.block {
            Some(block) if block.is_destroyed() => None,
            _ => self.ptr,
        }
    }

    /// number of `Shared` handles sharing the block, 0 if empty.
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, |block| block.strong_count())
    }

    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, |block| block.weak_count())
    }

    /// whether a control block is attached. this is not the same as holding a
    /// dereferenceable object, see [`Shared::get`].
    pub fn is_attached(&self) -> bool {
        self.block.is_some()
    }

    /// releases this handle's share and leaves it empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// releases this handle's share and takes ownership of `object` instead.
    pub fn reset_to(&mut self, object: Box<T>) {
        self.reset();
        *self = Self::from_box(object);
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// moves the share out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::null())
    }
}

impl<T> Shared<T> {
    /// allocates the control block and `value` together.
    pub fn new(value: T) -> Self {
        make_shared(value)
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block.release_strong() };
        }
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.acquire_strong();
        }

        unsafe { Self::from_parts(self.ptr, self.block) }
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("dereferenced a `Shared` that holds no live object"),
        }
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(object: Box<T>) -> Self {
        Self::from_box(object)
    }
}

impl<T: ?Sized> TryFrom<&Weak<T>> for Shared<T> {
    type Error = DanglingWeakError;

    fn try_from(weak: &Weak<T>) -> Result<Self, Self::Error> {
        Self::from_weak(weak)
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        self.block == other.block
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block.map(BlockRef::addr).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("block", &self.block.map(BlockRef::addr))
            .field("use_count", &self.use_count())
            .field("value", &self.get())
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = match self.as_ptr() {
            Some(ptr) => ptr.as_ptr().cast::<()>() as *const (),
            None => std::ptr::null(),
        };
        fmt::Pointer::fmt(&ptr, f)
    }
}
