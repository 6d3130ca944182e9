/// failure to promote a weak reference into a `Shared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingWeakError {
    /// the weak reference was never attached to a control block, e.g. a
    /// `SelfRef` whose object has not been wrapped by a `Shared` yet.
    Unbound,
    /// the managed object has already been destroyed.
    Expired,
}

impl std::fmt::Display for DanglingWeakError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DanglingWeakError::Unbound => {
                write!(f, "dangling weak reference: not attached to any object")
            }
            DanglingWeakError::Expired => {
                write!(f, "dangling weak reference: the object was already destroyed")
            }
        }
    }
}

impl std::error::Error for DanglingWeakError {}
