//! CPU back-end for the cinder compute runtime
//!
//! This crate executes compiled kernels on host threads:
//! - A pool of worker threads drains kernel launches from the device queue
//! - A per-launch scheduler hands each work-group index out exactly once
//! - A work-group executor runs all work-items of one group on a single
//!   thread, using cooperative context switching to honor work-group
//!   barrier semantics
//! - The builtin dispatch surface provides the identity and coordination
//!   intrinsics compiled kernels link against

pub mod arena;
pub mod builtins;
pub mod device;
pub mod image;
pub(crate) mod scheduler;
pub mod work_group;

pub use arena::ContextArena;
pub use device::{CpuDevice, CpuDeviceConfig};
pub use work_group::WorkGroup;

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
