//! CPU device: a pool of worker threads draining a queue of kernel
//! launches.
//!
//! Workers coordinate only through the queue mutex and the per-launch
//! progress counters. Each worker owns a private [`ContextArena`] for its
//! whole lifetime, so context storage is reused across the work-groups and
//! launches it executes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, trace};

use cinder_core::device::{DeviceInterface, KernelLaunch};
use cinder_core::error::Result;
use cinder_core::event::CompletionCallback;

use crate::arena::{ContextArena, MIN_STACK_SIZE};
use crate::scheduler::{LaunchState, Reservation};
use crate::work_group::WorkGroup;

/// CPU device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CpuDeviceConfig {
    /// Number of worker threads (0 = one per available core).
    #[serde(default)]
    pub num_threads: usize,

    /// Lower bound on per-work-item stacks, in bytes.
    #[serde(default = "default_min_stack_size")]
    pub min_stack_size: usize,
}

fn default_min_stack_size() -> usize {
    MIN_STACK_SIZE
}

impl Default for CpuDeviceConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            min_stack_size: default_min_stack_size(),
        }
    }
}

struct QueueState {
    launches: VecDeque<Arc<LaunchState>>,
    stop: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    ready: Condvar,
    mappings: Arc<AtomicUsize>,
}

/// The CPU compute device.
pub struct CpuDevice {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    min_stack_size: usize,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::with_config(CpuDeviceConfig::default())
    }

    pub fn with_config(config: CpuDeviceConfig) -> Self {
        let num_threads = if config.num_threads == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            config.num_threads
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                launches: VecDeque::new(),
                stop: false,
            }),
            ready: Condvar::new(),
            mappings: Arc::new(AtomicUsize::new(0)),
        });

        let workers = (0..num_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("cinder-cpu-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn cpu worker thread")
            })
            .collect();

        debug!(num_threads, "cpu device started");

        Self {
            shared,
            workers,
            min_stack_size: config.min_stack_size,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Executable mappings performed across all worker arenas. Stays flat
    /// while workers re-run launches of shapes they have seen before.
    pub fn executable_mappings(&self) -> usize {
        self.shared.mappings.load(Ordering::Relaxed)
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceInterface for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn submit(&self, mut launch: KernelLaunch, on_complete: CompletionCallback) -> Result<()> {
        launch.resolve_local_size();
        launch.validate()?;

        let state = Arc::new(LaunchState::new(
            launch.kernel,
            launch.range,
            self.min_stack_size,
        ));
        state.set_completion_callback(on_complete);

        debug!(
            kernel = %state.kernel_name(),
            groups = state.range().group_count(),
            "launch submitted"
        );

        let mut queue = self.shared.queue.lock();
        queue.launches.push_back(state);
        drop(queue);
        self.shared.ready.notify_all();

        Ok(())
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stop = true;
        }
        self.shared.ready.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Blocks until a work-group is available, reserves it, and pops the launch
/// off the queue when the reservation was its last.
fn next_assignment(shared: &Shared) -> Option<(Arc<LaunchState>, Reservation)> {
    let mut queue = shared.queue.lock();
    loop {
        if queue.stop {
            return None;
        }

        if let Some(front) = queue.launches.front() {
            let launch = Arc::clone(front);
            match launch.reserve() {
                Some(reservation) => {
                    if reservation.last {
                        queue.launches.pop_front();
                    }
                    return Some((launch, reservation));
                }
                // Fully handed out but not yet popped; another worker won
                // the last reservation between our wake-up and the lock.
                None => {
                    queue.launches.pop_front();
                }
            }
        } else {
            shared.ready.wait(&mut queue);
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut arena = ContextArena::with_mapping_counter(Arc::clone(&shared.mappings));

    while let Some((launch, reservation)) = next_assignment(&shared) {
        trace!(
            kernel = %launch.kernel_name(),
            index = ?reservation.index,
            "running work-group"
        );

        let work_group = WorkGroup::new(Arc::clone(&launch), reservation.index);
        match work_group.run(&mut arena) {
            Ok(()) => launch.work_group_finished(),
            Err(error) => launch.work_group_failed(error),
        }
    }
}
