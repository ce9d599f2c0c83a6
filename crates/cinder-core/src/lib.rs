//! Core object model for the cinder compute runtime
//!
//! This crate provides the pieces shared between the dispatch layer and the
//! compute back-ends:
//! - Launch geometry (ND-ranges, work-group arithmetic)
//! - The program / kernel object model and argument binding
//! - Memory objects (buffers, sub-buffers, images)
//! - Events and completion callbacks
//! - The device abstraction implemented by back-ends

pub mod device;
pub mod error;
pub mod event;
pub mod kernel;
pub mod memobject;
pub mod ndrange;
pub mod program;

pub use device::{DeviceInterface, KernelLaunch};
pub use error::{Error, Result};
pub use event::{CompletionCallback, EventStatus};
pub use kernel::{Kernel, KernelEntry, NativeKernel};
pub use ndrange::{NdRange, WorkDims, MAX_WORK_DIMS};
pub use program::{BuiltKernel, Program};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
