//! Work-item context pool: executable stacks and saved CPU state.
//!
//! A [`ContextArena`] is a single anonymous mapping holding one slot per
//! work-item. Each slot is a [`WorkItemContext`] header followed by the
//! work-item's stack. The mapping is executable because the cooperative
//! switch primitive may plant trampolines on the stacks.
//!
//! All raw-memory unsafety of the pool lives in this module. The
//! invariants relied upon elsewhere:
//! - slots never overlap: slot `i` starts at `base + i * slot_size`;
//! - `slot_size` is a multiple of the header alignment (stack sizes are
//!   page-rounded), so every header is well aligned;
//! - a slot's stack is at least the kernel's private memory plus
//!   [`STACK_SLACK`], never below [`MIN_STACK_SIZE`];
//! - on a fresh mapping every byte is zero, and on reuse the slot headers
//!   are re-zeroed, so `initialized == 0` always marks an untouched slot;
//! - an arena is owned by exactly one worker thread and never aliased.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cinder_core::error::{Error, Result};
use cinder_core::ndrange::WorkDims;

pub const PAGE_SIZE: usize = 4096;

/// Lower bound on a work-item stack, whatever the kernel reports.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Headroom added on top of the kernel's private memory for the runtime's
/// own frames on the work-item stack.
pub const STACK_SLACK: usize = 16 * 1024;

/// Per-slot header: lazily-initialized marker, the work-item's identity and
/// its saved CPU state.
#[repr(C)]
pub struct WorkItemContext {
    pub initialized: u32,
    pub local_id: WorkDims,
    pub cpu_state: libc::ucontext_t,
}

impl WorkItemContext {
    /// An all-zero header. The `cpu_state` only becomes meaningful after
    /// `getcontext`/`swapcontext` has filled it.
    pub fn zeroed() -> Self {
        unsafe { mem::zeroed() }
    }
}

pub fn align_to_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Stack bytes for one work-item of a kernel with the given private memory
/// footprint.
pub fn stack_size_for(private_mem_size: usize, min_stack: usize) -> usize {
    let floor = min_stack.max(MIN_STACK_SIZE);
    align_to_page((private_mem_size + STACK_SLACK).max(floor))
}

/// A growing pool of work-item context slots, private to one worker thread.
pub struct ContextArena {
    base: *mut u8,
    len: usize,
    slot_size: usize,
    num_slots: usize,
    mappings: usize,
    mapping_counter: Option<Arc<AtomicUsize>>,
}

impl ContextArena {
    pub fn new() -> Self {
        Self {
            base: ptr::null_mut(),
            len: 0,
            slot_size: 0,
            num_slots: 0,
            mappings: 0,
            mapping_counter: None,
        }
    }

    /// As `new`, but every fresh mapping also bumps the shared counter.
    /// The device uses this to observe allocation behavior across its
    /// worker pool.
    pub fn with_mapping_counter(counter: Arc<AtomicUsize>) -> Self {
        let mut arena = Self::new();
        arena.mapping_counter = Some(counter);
        arena
    }

    /// Makes the pool ready for `num_work_items` slots with the given stack
    /// size. Keeps the existing mapping when it is large enough, in which
    /// case the slot headers are re-zeroed; otherwise replaces it with a
    /// fresh zero-filled mapping.
    pub fn acquire(&mut self, num_work_items: usize, stack_size: usize) -> Result<()> {
        debug_assert!(num_work_items > 0);
        debug_assert_eq!(stack_size % PAGE_SIZE, 0);

        let slot_size = mem::size_of::<WorkItemContext>() + stack_size;
        let needed = num_work_items
            .checked_mul(slot_size)
            .ok_or_else(|| Error::ContextAllocation {
                needed: usize::MAX,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            })?;

        if self.base.is_null() || self.len < needed {
            self.release();

            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    needed,
                    libc::PROT_EXEC | libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(Error::ContextAllocation {
                    needed,
                    source: io::Error::last_os_error(),
                });
            }

            self.base = ptr as *mut u8;
            self.len = needed;
            self.mappings += 1;
            if let Some(counter) = &self.mapping_counter {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            // Reused mapping: stale headers from the previous work-group
            // must not read as initialized.
            for i in 0..num_work_items {
                unsafe {
                    ptr::write_bytes(
                        self.base.add(i * slot_size),
                        0,
                        mem::size_of::<WorkItemContext>(),
                    );
                }
            }
        }

        self.slot_size = slot_size;
        self.num_slots = num_work_items;
        Ok(())
    }

    /// Header of slot `i`. Valid only after a successful `acquire`.
    pub fn slot(&self, i: usize) -> *mut WorkItemContext {
        debug_assert!(i < self.num_slots);
        unsafe { self.base.add(i * self.slot_size) as *mut WorkItemContext }
    }

    /// Stack of slot `i`: the bytes following its header.
    pub fn stack(&self, i: usize) -> (*mut u8, usize) {
        let stack = unsafe { (self.slot(i) as *mut u8).add(mem::size_of::<WorkItemContext>()) };
        (stack, self.slot_size - mem::size_of::<WorkItemContext>())
    }

    /// Number of executable mappings performed over the arena's lifetime.
    pub fn mappings(&self) -> usize {
        self.mappings
    }

    /// Releases the mapping. The next `acquire` starts from scratch.
    pub fn reset(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
            self.base = ptr::null_mut();
            self.len = 0;
            self.slot_size = 0;
            self.num_slots = 0;
        }
    }
}

impl Default for ContextArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContextArena {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_size_floor_and_rounding() {
        assert_eq!(stack_size_for(0, 0), MIN_STACK_SIZE);
        assert_eq!(stack_size_for(0, 128 * 1024), 128 * 1024);

        let sized = stack_size_for(200 * 1024, 0);
        assert_eq!(sized % PAGE_SIZE, 0);
        assert!(sized >= 200 * 1024 + STACK_SLACK);
    }

    #[test]
    fn test_slots_are_zeroed_and_disjoint() {
        let mut arena = ContextArena::new();
        let stack_size = stack_size_for(0, 0);
        arena.acquire(4, stack_size).unwrap();

        for i in 0..4 {
            let slot = arena.slot(i);
            unsafe {
                assert_eq!((*slot).initialized, 0);
                (*slot).initialized = 1;
                (*slot).local_id = [i, 0, 0];
            }
        }

        // Writing one header must not disturb the others.
        for i in 0..4 {
            unsafe {
                assert_eq!((*arena.slot(i)).local_id, [i, 0, 0]);
            }
        }

        let (stack, size) = arena.stack(0);
        assert_eq!(size, stack_size);
        assert!(stack as usize >= arena.slot(0) as usize + mem::size_of::<WorkItemContext>());
        assert!((stack as usize) < arena.slot(1) as usize);
    }

    #[test]
    fn test_reuse_keeps_mapping_and_clears_headers() {
        let mut arena = ContextArena::new();
        let stack_size = stack_size_for(0, 0);

        arena.acquire(4, stack_size).unwrap();
        unsafe {
            (*arena.slot(3)).initialized = 1;
        }
        assert_eq!(arena.mappings(), 1);

        // Same shape: no new mapping, headers fresh again.
        arena.acquire(4, stack_size).unwrap();
        assert_eq!(arena.mappings(), 1);
        unsafe {
            assert_eq!((*arena.slot(3)).initialized, 0);
        }

        // Smaller request also reuses the mapping.
        arena.acquire(2, stack_size).unwrap();
        assert_eq!(arena.mappings(), 1);

        // Larger request grows it.
        arena.acquire(8, stack_size).unwrap();
        assert_eq!(arena.mappings(), 2);
    }

    #[test]
    fn test_mapping_counter_shared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stack_size = stack_size_for(0, 0);

        let mut arena = ContextArena::with_mapping_counter(Arc::clone(&counter));
        arena.acquire(2, stack_size).unwrap();
        arena.acquire(2, stack_size).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
