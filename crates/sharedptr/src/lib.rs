//! Single-threaded shared ownership with weak observers.
//!
//! [`Shared`] owns its object through a reference counted control block, [`Weak`]
//! observes the same block without keeping the object alive, and types that
//! implement [`SharedFromThis`] can hand out new handles to themselves.

#[macro_use]
mod trace;

mod block;
mod error;
mod make_shared;
mod self_ref;
mod shared;
mod weak;

pub use error::DanglingWeakError;
pub use make_shared::{make_shared, make_shared_enabled, make_shared_with};
pub use self_ref::{SelfRef, SharedFromThis};
pub use shared::Shared;
pub use weak::Weak;

#[cfg(test)]
#[global_allocator]
static ALLOCATOR: mockalloc::Mockalloc<std::alloc::System> =
    mockalloc::Mockalloc(std::alloc::System);
