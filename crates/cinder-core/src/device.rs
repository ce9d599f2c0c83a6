//! Device abstraction implemented by compute back-ends.

use std::sync::Arc;

use crate::error::Result;
use crate::event::CompletionCallback;
use crate::kernel::{guess_work_group_size, NativeKernel};
use crate::ndrange::{NdRange, MAX_WORK_DIMS};

/// A launch descriptor: one kernel plus the geometry to run it over.
pub struct KernelLaunch {
    pub kernel: Arc<dyn NativeKernel>,
    pub range: NdRange,
}

impl KernelLaunch {
    pub fn new(kernel: Arc<dyn NativeKernel>, range: NdRange) -> Self {
        Self { kernel, range }
    }

    /// Fills every unspecified (zero) local size from the kernel's
    /// work-group-size hint and normalizes the unused dimensions.
    pub fn resolve_local_size(&mut self) {
        let hint = self.kernel.work_group_size();
        for d in 0..MAX_WORK_DIMS {
            if d < self.range.work_dim as usize {
                if self.range.local[d] == 0 {
                    self.range.local[d] = guess_work_group_size(hint, self.range.global[d]);
                }
            } else {
                self.range.global[d] = 1;
                self.range.local[d] = 1;
                self.range.offset[d] = 0;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.range.validate()
    }
}

/// A compute device able to run kernel launches.
pub trait DeviceInterface: Send + Sync {
    fn name(&self) -> &str;

    fn max_work_item_dims(&self) -> u32 {
        MAX_WORK_DIMS as u32
    }

    /// Base-address alignment (in bits) required of sub-buffer origins.
    fn mem_base_addr_align(&self) -> u32 {
        0
    }

    /// Hands a launch to the device. `on_complete` fires exactly once when
    /// all of its work-groups have finished.
    fn submit(&self, launch: KernelLaunch, on_complete: CompletionCallback) -> Result<()>;
}
