//! Work-group executor: runs every work-item of one work-group on the
//! current worker thread.
//!
//! Work-items are executed sequentially until one of them calls
//! `barrier()`. At that point the executor switches to cooperative mode:
//! each work-item gets its own context slot in the worker's
//! [`ContextArena`] and control rotates round-robin through the slots at
//! every barrier, so no work-item proceeds past a barrier before all of
//! them have reached one.
//!
//! The built-in shims reach the running executor through a thread-local
//! pointer installed for the duration of [`WorkGroup::run`]; everything
//! below that ABI boundary takes the work-group as an explicit argument.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::mem;
use std::ptr;
use std::sync::Arc;

use tracing::error;

use cinder_core::error::{Error, Result};
use cinder_core::ndrange::{inc_vec, WorkDims, MAX_WORK_DIMS};

use crate::arena::{ContextArena, WorkItemContext};
use crate::builtins;
use crate::scheduler::LaunchState;

/// State of one work-group execution. Lives on the worker's stack for the
/// duration of the group; the builtin shims operate on it through a shared
/// reference, so the mutable scalars use interior mutability.
pub struct WorkGroup {
    launch: Arc<LaunchState>,
    index: WorkDims,
    global_id_start: WorkDims,
    max_local_id: WorkDims,
    num_work_items: usize,
    stack_size: usize,

    current_work_item: Cell<usize>,
    current_context: Cell<*mut WorkItemContext>,
    had_barrier: Cell<bool>,
    pool_engaged: Cell<bool>,
    arena: Cell<*mut ContextArena>,
    failure: RefCell<Option<Error>>,

    /// Context of work-item 0 before any barrier. It runs on the worker's
    /// own stack; only its `local_id` is meaningful until the pool takes
    /// over.
    main_context: UnsafeCell<WorkItemContext>,

    /// Per-group `__local` block, 16-byte aligned.
    local_mem: UnsafeCell<Vec<u128>>,
}

impl WorkGroup {
    pub(crate) fn new(launch: Arc<LaunchState>, index: WorkDims) -> Self {
        let range = launch.range();
        let local_mem_words = launch.local_mem_size().div_ceil(16);

        Self {
            index,
            global_id_start: range.global_id_start(&index),
            max_local_id: range.max_local_id(),
            num_work_items: range.work_items_per_group(),
            stack_size: launch.stack_size(),
            current_work_item: Cell::new(0),
            current_context: Cell::new(ptr::null_mut()),
            had_barrier: Cell::new(false),
            pool_engaged: Cell::new(false),
            arena: Cell::new(ptr::null_mut()),
            failure: RefCell::new(None),
            main_context: UnsafeCell::new(WorkItemContext::zeroed()),
            local_mem: UnsafeCell::new(vec![0; local_mem_words]),
            launch,
        }
    }

    /// Runs the whole work-group to completion on the calling thread,
    /// using `arena` for work-item contexts if a barrier engages.
    pub fn run(&self, arena: &mut ContextArena) -> Result<()> {
        self.arena.set(arena as *mut ContextArena);
        builtins::set_current_work_group(self);

        let result = self.run_inner();

        builtins::clear_current_work_group();
        self.arena.set(ptr::null_mut());
        result
    }

    fn run_inner(&self) -> Result<()> {
        let main = self.main_context.get();
        unsafe {
            (*main).initialized = 1;
            (*main).local_id = [0; MAX_WORK_DIMS];
        }
        self.current_context.set(main);
        self.current_work_item.set(0);
        self.had_barrier.set(false);
        self.pool_engaged.set(false);

        let entry = self.launch.entry();
        let work_dim = self.launch.range().work_dim;

        loop {
            unsafe { entry() };

            if self.had_barrier.get() {
                // Either the rendezvous already drove the other work-items,
                // or a divergent kernel made the group unsalvageable.
                break;
            }

            let wrapped = unsafe { inc_vec(work_dim, &mut (*main).local_id, &self.max_local_id) };
            if wrapped {
                return self.take_failure();
            }
            self.current_work_item.set(self.current_work_item.get() + 1);
        }

        if self.pool_engaged.get() {
            self.finish_parked_items();
        }

        self.take_failure()
    }

    /// Work-item 0 has returned from the kernel; every other work-item is
    /// parked inside its final `barrier` call. Resume each one so it can
    /// run to completion. A finished work-item's continuation leads back to
    /// slot 0, i.e. into the `swapcontext` below.
    fn finish_parked_items(&self) {
        let arena = unsafe { &*self.arena.get() };
        let slot0 = arena.slot(0);

        for item in 1..self.num_work_items {
            self.current_work_item.set(item);
            let next = arena.slot(item);
            self.current_context.set(next);
            unsafe {
                libc::swapcontext(
                    ptr::addr_of_mut!((*slot0).cpu_state),
                    ptr::addr_of!((*next).cpu_state),
                );
            }
        }
    }

    /// The `barrier(flags)` built-in. Called from compiled kernel code via
    /// the dispatch surface, on whichever stack the current work-item runs.
    pub(crate) fn barrier(&self, _flags: u32) {
        self.had_barrier.set(true);

        if !self.pool_engaged.get() {
            if self.current_work_item.get() != 0 {
                // Divergent control flow: some earlier work-item ran to
                // completion without reaching this barrier. Illegal in the
                // programming model; abandon the group loudly.
                error!(
                    kernel = %self.launch.kernel_name(),
                    work_item = self.current_work_item.get(),
                    "not every work-item calls barrier(); abandoning work-group"
                );
                return;
            }

            let arena = unsafe { &mut *self.arena.get() };
            if let Err(err) = arena.acquire(self.num_work_items, self.stack_size) {
                *self.failure.borrow_mut() = Some(err);
                return;
            }
            self.pool_engaged.set(true);

            // Promote the running work-item (always item 0 here) into
            // slot 0 of the pool.
            let slot0 = arena.slot(0);
            unsafe {
                (*slot0).initialized = 1;
                (*slot0).local_id = [0; MAX_WORK_DIMS];
                libc::getcontext(ptr::addr_of_mut!((*slot0).cpu_state));
            }
            self.current_context.set(slot0);
        }

        let arena = unsafe { &*self.arena.get() };
        let work_dim = self.launch.range().work_dim;

        let mut next_item = self.current_work_item.get() + 1;
        if next_item == self.num_work_items {
            next_item = 0;
        }
        self.current_work_item.set(next_item);

        let next = arena.slot(next_item);
        let slot0 = arena.slot(0);

        unsafe {
            if (*next).initialized == 0 {
                (*next).initialized = 1;

                // The successor's local id is the current one, incremented.
                (*next).local_id = (*self.current_context.get()).local_id;
                inc_vec(work_dim, &mut (*next).local_id, &self.max_local_id);

                if libc::getcontext(ptr::addr_of_mut!((*next).cpu_state)) != 0 {
                    return;
                }

                let (stack, stack_size) = arena.stack(next_item);
                (*next).cpu_state.uc_link = ptr::addr_of_mut!((*slot0).cpu_state);
                (*next).cpu_state.uc_stack.ss_sp = stack as *mut libc::c_void;
                (*next).cpu_state.uc_stack.ss_size = stack_size;

                let entry: extern "C" fn() = mem::transmute(self.launch.entry());
                libc::makecontext(ptr::addr_of_mut!((*next).cpu_state), entry, 0);
            }

            let current = self.current_context.get();
            self.current_context.set(next);
            libc::swapcontext(
                ptr::addr_of_mut!((*current).cpu_state),
                ptr::addr_of!((*next).cpu_state),
            );
        }

        // Control comes back here once every other work-item of the group
        // has reached a barrier (or finished) and the rotation returned to
        // this work-item.
    }

    fn take_failure(&self) -> Result<()> {
        match self.failure.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn kernel_name(&self) -> &str {
        self.launch.kernel_name()
    }

    pub(crate) fn work_dim(&self) -> u32 {
        self.launch.range().work_dim
    }

    pub(crate) fn global_size(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 1;
        }
        self.launch.range().global[dim as usize]
    }

    pub(crate) fn local_size(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 1;
        }
        self.launch.range().local[dim as usize]
    }

    pub(crate) fn global_offset(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 0;
        }
        self.launch.range().offset[dim as usize]
    }

    pub(crate) fn num_groups(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 1;
        }
        self.launch.num_groups()[dim as usize]
    }

    pub(crate) fn group_id(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 0;
        }
        self.index[dim as usize]
    }

    pub(crate) fn local_id(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 0;
        }
        unsafe { (*self.current_context.get()).local_id[dim as usize] }
    }

    pub(crate) fn global_id(&self, dim: u32) -> usize {
        if dim >= self.work_dim() {
            return 0;
        }
        let dim = dim as usize;
        self.global_id_start[dim] + unsafe { (*self.current_context.get()).local_id[dim] }
    }

    pub(crate) fn local_mem_base(&self) -> *mut u8 {
        if self.launch.local_mem_size() == 0 {
            return ptr::null_mut();
        }
        unsafe { (*self.local_mem.get()).as_mut_ptr() as *mut u8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ContextArena;
    use crate::builtins;
    use crate::scheduler::LaunchState;
    use cinder_core::kernel::{KernelEntry, NativeKernel};
    use cinder_core::ndrange::NdRange;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestKernel {
        name: &'static str,
        entry: KernelEntry,
        local_mem_size: usize,
    }

    impl NativeKernel for TestKernel {
        fn name(&self) -> &str {
            self.name
        }
        fn entry(&self) -> KernelEntry {
            self.entry
        }
        fn work_group_size(&self) -> usize {
            64
        }
        fn private_mem_size(&self) -> usize {
            0
        }
        fn local_mem_size(&self) -> usize {
            self.local_mem_size
        }
    }

    fn launch_state(
        name: &'static str,
        entry: KernelEntry,
        range: NdRange,
        local_mem_size: usize,
    ) -> Arc<LaunchState> {
        Arc::new(LaunchState::new(
            Arc::new(TestKernel {
                name,
                entry,
                local_mem_size,
            }),
            range,
            0,
        ))
    }

    static SUM_OF_IDS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn sum_ids_kernel() {
        let gid = builtins::get_global_id(0);
        SUM_OF_IDS.fetch_add(gid, Ordering::Relaxed);
    }

    #[test]
    fn test_fast_path_runs_every_work_item() {
        SUM_OF_IDS.store(0, Ordering::Relaxed);
        let state = launch_state("sum_ids", sum_ids_kernel, NdRange::dim1(4, 4), 0);
        let wg = WorkGroup::new(Arc::clone(&state), [0, 0, 0]);

        let mut arena = ContextArena::new();
        wg.run(&mut arena).unwrap();

        assert_eq!(SUM_OF_IDS.load(Ordering::Relaxed), 0 + 1 + 2 + 3);
        // No barrier: the pool must never have been mapped.
        assert_eq!(arena.mappings(), 0);
    }

    const EXCHANGE_ITEMS: usize = 4;
    static EXCHANGE_OUT: [AtomicUsize; EXCHANGE_ITEMS] =
        [const { AtomicUsize::new(usize::MAX) }; EXCHANGE_ITEMS];

    unsafe extern "C" fn exchange_kernel() {
        let lid = builtins::get_local_id(0);
        let n = builtins::get_local_size(0);
        let scratch = builtins::local_mem_base() as *mut usize;

        *scratch.add(lid) = lid;
        builtins::barrier(1);
        let neighbor = *scratch.add((lid + 1) % n);

        EXCHANGE_OUT[lid].store(neighbor, Ordering::Relaxed);
    }

    #[test]
    fn test_barrier_exchanges_values_between_work_items() {
        for slot in &EXCHANGE_OUT {
            slot.store(usize::MAX, Ordering::Relaxed);
        }

        let state = launch_state(
            "exchange",
            exchange_kernel,
            NdRange::dim1(EXCHANGE_ITEMS, EXCHANGE_ITEMS),
            EXCHANGE_ITEMS * std::mem::size_of::<usize>(),
        );
        let wg = WorkGroup::new(state, [0, 0, 0]);

        let mut arena = ContextArena::new();
        wg.run(&mut arena).unwrap();

        let out: Vec<_> = EXCHANGE_OUT
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        assert_eq!(out, vec![1, 2, 3, 0]);
        assert_eq!(arena.mappings(), 1);
    }

    static DIVERGENT_RAN: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn divergent_kernel() {
        DIVERGENT_RAN.fetch_add(1, Ordering::Relaxed);
        if builtins::get_local_id(0) == 1 {
            builtins::barrier(1);
        }
    }

    #[test]
    fn test_divergent_barrier_abandons_group() {
        DIVERGENT_RAN.store(0, Ordering::Relaxed);
        let state = launch_state("divergent", divergent_kernel, NdRange::dim1(4, 4), 0);
        let wg = WorkGroup::new(state, [0, 0, 0]);

        let mut arena = ContextArena::new();
        // Abandoned, not failed: the launch still completes.
        wg.run(&mut arena).unwrap();

        // Work-item 0 ran, work-item 1 hit the divergent barrier, the rest
        // of the group was abandoned without switching stacks.
        assert_eq!(DIVERGENT_RAN.load(Ordering::Relaxed), 2);
        assert_eq!(arena.mappings(), 0);
    }

    static IDENTITY_PROBE: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn identity_probe_kernel() {
        // Out-of-range dimensions return identity values.
        let ok = builtins::get_global_size(2) == 1
            && builtins::get_local_size(7) == 1
            && builtins::get_num_groups(2) == 1
            && builtins::get_group_id(2) == 0
            && builtins::get_local_id(2) == 0
            && builtins::get_global_id(2) == 0
            && builtins::get_global_offset(2) == 0
            && builtins::get_work_dim() == 2;
        if ok {
            IDENTITY_PROBE.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_out_of_range_dimensions_return_identities() {
        IDENTITY_PROBE.store(0, Ordering::Relaxed);
        let state = launch_state(
            "identity_probe",
            identity_probe_kernel,
            NdRange::dim2([2, 1], [2, 1]),
            0,
        );
        let wg = WorkGroup::new(state, [0, 0, 0]);

        let mut arena = ContextArena::new();
        wg.run(&mut arena).unwrap();

        assert_eq!(IDENTITY_PROBE.load(Ordering::Relaxed), 2);
    }
}
