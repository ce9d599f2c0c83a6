//! Per-launch scheduling: hands each work-group index out exactly once and
//! detects launch completion.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use cinder_core::error::Error;
use cinder_core::event::CompletionCallback;
use cinder_core::kernel::{KernelEntry, NativeKernel};
use cinder_core::ndrange::{group_index, NdRange, WorkDims};

use crate::arena::stack_size_for;

#[derive(Default)]
struct Progress {
    current_wg: usize,
    finished_wg: usize,
    error: Option<Error>,
}

/// One work-group index handed to a worker.
pub(crate) struct Reservation {
    pub index: WorkDims,
    /// True when this was the final index of the launch; the launch can be
    /// dropped from the device queue.
    pub last: bool,
}

/// Shared state of one kernel launch. Immutable except for the progress
/// counters; shared by every worker participating in the launch.
pub(crate) struct LaunchState {
    kernel: Arc<dyn NativeKernel>,
    range: NdRange,
    num_groups: WorkDims,
    num_wg: usize,
    stack_size: usize,
    local_mem_size: usize,
    progress: Mutex<Progress>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl LaunchState {
    pub fn new(kernel: Arc<dyn NativeKernel>, range: NdRange, min_stack_size: usize) -> Self {
        Self {
            num_groups: range.num_groups(),
            num_wg: range.group_count(),
            stack_size: stack_size_for(kernel.private_mem_size(), min_stack_size),
            local_mem_size: kernel.local_mem_size(),
            range,
            kernel,
            progress: Mutex::new(Progress::default()),
            on_complete: Mutex::new(None),
        }
    }

    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        *self.on_complete.lock() = Some(callback);
    }

    pub fn range(&self) -> &NdRange {
        &self.range
    }

    pub fn num_groups(&self) -> &WorkDims {
        &self.num_groups
    }

    pub fn entry(&self) -> KernelEntry {
        self.kernel.entry()
    }

    pub fn kernel_name(&self) -> &str {
        self.kernel.name()
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn local_mem_size(&self) -> usize {
        self.local_mem_size
    }

    /// Reserves the next work-group index, in row-major order. Returns
    /// `None` once every index has been handed out.
    pub fn reserve(&self) -> Option<Reservation> {
        let mut progress = self.progress.lock();
        if progress.current_wg == self.num_wg {
            return None;
        }

        let index = group_index(progress.current_wg, &self.num_groups, self.range.work_dim);
        progress.current_wg += 1;

        Some(Reservation {
            index,
            last: progress.current_wg == self.num_wg,
        })
    }

    pub fn work_group_finished(&self) {
        self.complete_one(None);
    }

    /// A work-group that could not run counts as finished so the launch
    /// still completes; the first error is what the callback reports.
    pub fn work_group_failed(&self, error: Error) {
        self.complete_one(Some(error));
    }

    fn complete_one(&self, error: Option<Error>) {
        let outcome = {
            let mut progress = self.progress.lock();
            progress.finished_wg += 1;
            if let Some(error) = error {
                progress.error.get_or_insert(error);
            }

            debug_assert!(progress.finished_wg <= progress.current_wg);
            debug_assert!(progress.current_wg <= self.num_wg);

            if progress.finished_wg == self.num_wg {
                Some(progress.error.take())
            } else {
                None
            }
        };

        if let Some(error) = outcome {
            debug!(kernel = %self.kernel.name(), groups = self.num_wg, "launch complete");
            if let Some(callback) = self.on_complete.lock().take() {
                callback(match error {
                    Some(error) => Err(error),
                    None => Ok(()),
                });
            }
        }
    }
}
