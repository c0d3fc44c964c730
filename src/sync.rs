//! Synchronization primitive re-exports, one place to retarget them.

pub(crate) use alloc::sync::Arc;
