// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel heap backing `alloc`
//! OWNERS: @kernel-mm-team
//! PUBLIC API: init(start, size), stats()
//! DEPENDS_ON: linked_list_allocator::Heap, spin::Mutex
//! INVARIANTS: init runs once, before the first allocation; host builds use the std allocator

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use spin::Mutex;

/// First-fit heap behind a spin lock.
pub struct KernelHeap {
    heap: Mutex<Heap>,
}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self { heap: Mutex::new(Heap::empty()) }
    }

    /// Hands `[start, start + size)` to the allocator.
    ///
    /// # Safety
    /// The range must be unused, writable memory that lives forever, and this
    /// must be called at most once.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.heap.lock().init(start, size) }
    }

    /// (used, free) bytes.
    pub fn stats(&self) -> (usize, usize) {
        let heap = self.heap.lock();
        (heap.used(), heap.free())
    }
}

// SAFETY: every access to the inner heap goes through the mutex, taken with
// interrupts masked so a trap handler never spins on it.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let irq = crate::arch::riscv::irq_save();
        let block = self.heap.lock().allocate_first_fit(layout).map_or(ptr::null_mut(), |p| p.as_ptr());
        crate::arch::riscv::irq_restore(irq);
        block
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            let irq = crate::arch::riscv::irq_save();
            // SAFETY: `ptr` was returned by `alloc` with the same layout.
            unsafe { self.heap.lock().deallocate(ptr, layout) };
            crate::arch::riscv::irq_restore(irq);
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[global_allocator]
static HEAP: KernelHeap = KernelHeap::empty();

/// Initialises the global kernel heap.
///
/// # Safety
/// See [`KernelHeap::init`].
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn init(start: *mut u8, size: usize) {
    // SAFETY: forwarded from the caller.
    unsafe { HEAP.init(start, size) }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn stats() -> (usize, usize) {
    HEAP.stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_heap_allocates_and_frees() {
        let mut arena = vec![0u8; 4096].into_boxed_slice();
        let heap = KernelHeap::empty();
        unsafe { heap.init(arena.as_mut_ptr(), arena.len()) };
        let layout = Layout::from_size_align(128, 16).unwrap();
        let block = unsafe { heap.alloc(layout) };
        assert!(!block.is_null());
        assert_eq!(block as usize % 16, 0);
        assert!(heap.stats().0 >= 128);
        unsafe { heap.dealloc(block, layout) };
        assert_eq!(heap.stats().0, 0);
    }
}
