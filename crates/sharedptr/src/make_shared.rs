use crate::{block::EmbeddedBlock, Shared, SharedFromThis};

/// allocates the control block and `value` in a single allocation.
pub fn make_shared<T>(value: T) -> Shared<T> {
    make_shared_with(move || value)
}

/// like [`make_shared`], but allocates the block before producing the value.
///
/// if `init` panics the block is freed and nothing is dropped in its place.
pub fn make_shared_with<T, F: FnOnce() -> T>(init: F) -> Shared<T> {
    let (block, ptr) = EmbeddedBlock::allocate_with(init);
    unsafe { Shared::from_parts(Some(ptr), Some(block)) }
}

/// [`make_shared`] for types that hand out handles to themselves.
pub fn make_shared_enabled<T: SharedFromThis>(value: T) -> Shared<T> {
    let shared = make_shared(value);
    Shared::bind_self_ref(&shared);
    shared
}
