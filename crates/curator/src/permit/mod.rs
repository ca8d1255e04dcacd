//! Permit pool bounding the number of in-flight classifications.
//!
//! The pool is pre-populated with a fixed number of permits. A [`Permit`] is
//! returned to the pool when it is dropped, so a task holding one releases it
//! on every exit path without an explicit release call.

mod pool;

pub use pool::{Permit, PermitError, PermitId, PermitPool};
