use std::{cell::RefCell, fmt};

use crate::{make_shared::make_shared_enabled, DanglingWeakError, Shared, Weak};

/// weak back-reference an object keeps to its own control block.
///
/// embed one in a type and implement [`SharedFromThis`] to return it. it is
/// bound by [`Shared::new_enabled`], [`Shared::from_box_enabled`],
/// [`make_shared_enabled`] and [`Shared::bind_self_ref`]. being weak, it never
/// keeps its own object alive.
pub struct SelfRef<T: ?Sized> {
    this: RefCell<Weak<T>>,
}

impl<T: ?Sized> SelfRef<T> {
    pub const fn new() -> Self {
        Self {
            this: RefCell::new(Weak::new()),
        }
    }

    /// whether the owning object has been wrapped by a `Shared`.
    pub fn is_bound(&self) -> bool {
        self.this.borrow().parts().1.is_some()
    }

    pub fn shared(&self) -> Result<Shared<T>, DanglingWeakError> {
        Shared::from_weak(&self.this.borrow())
    }

    pub fn weak(&self) -> Weak<T> {
        self.this.borrow().clone()
    }

    fn bind(&self, this: Weak<T>) {
        let old = self.this.replace(this);
        // released outside the borrow, since it may free an old block.
        drop(old);
    }
}

impl<T: ?Sized> Default for SelfRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// a copied object is a different object, so its back-reference starts unbound.
impl<T: ?Sized> Clone for SelfRef<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SelfRef").field(&*self.this.borrow()).finish()
    }
}

/// lets an object produce `Shared` and `Weak` handles to itself.
///
/// ```
/// use sharedptr::{SelfRef, Shared, SharedFromThis};
///
/// #[derive(Default)]
/// struct Session {
///     this: SelfRef<Session>,
/// }
///
/// impl SharedFromThis for Session {
///     fn self_ref(&self) -> &SelfRef<Self> {
///         &self.this
///     }
/// }
///
/// let session = Shared::new_enabled(Session::default());
/// let again = session.shared_from_this().unwrap();
/// assert_eq!(again.use_count(), 2);
/// ```
///
/// only the `*_enabled` constructors and [`Shared::bind_self_ref`] bind the
/// back-reference. an object wrapped by [`Shared::new`], [`Shared::from_box`]
/// or [`make_shared`](crate::make_shared) stays unbound, and its
/// `shared_from_this()` returns [`DanglingWeakError::Unbound`] until
/// `bind_self_ref` is called on a handle to it:
///
/// ```
/// # use sharedptr::{DanglingWeakError, SelfRef, Shared, SharedFromThis};
/// # #[derive(Default)]
/// # struct Session {
/// #     this: SelfRef<Session>,
/// # }
/// # impl SharedFromThis for Session {
/// #     fn self_ref(&self) -> &SelfRef<Self> {
/// #         &self.this
/// #     }
/// # }
/// let session = Shared::new(Session::default());
/// assert_eq!(session.shared_from_this().err(), Some(DanglingWeakError::Unbound));
///
/// Shared::bind_self_ref(&session);
/// assert!(session.shared_from_this().is_ok());
/// ```
pub trait SharedFromThis {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// a new handle sharing the block that already manages `self`.
    ///
    /// fails with [`DanglingWeakError::Unbound`] before the first wrap and with
    /// [`DanglingWeakError::Expired`] once destruction has started, including
    /// from inside `self`'s own destructor.
    fn shared_from_this(&self) -> Result<Shared<Self>, DanglingWeakError> {
        self.self_ref().shared()
    }

    fn weak_from_this(&self) -> Weak<Self> {
        self.self_ref().weak()
    }
}

impl<T: SharedFromThis> Shared<T> {
    pub fn new_enabled(value: T) -> Self {
        make_shared_enabled(value)
    }
}

impl<T: ?Sized + SharedFromThis> Shared<T> {
    pub fn from_box_enabled(object: Box<T>) -> Self {
        let shared = Self::from_box(object);
        Self::bind_self_ref(&shared);
        shared
    }

    /// points the object's back-reference at `this`'s block.
    ///
    /// needed whenever an object is wrapped by a path that does not know about
    /// the capability, e.g. an alias from an enclosing object to a field.
    pub fn bind_self_ref(this: &Self) {
        if let Some(object) = this.get() {
            object.self_ref().bind(Shared::downgrade(this));
        }
    }
}
