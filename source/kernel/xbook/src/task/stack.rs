// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-task kernel stacks with an overflow guard word at the lowest address.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use super::CreateError;
use crate::config::{KSTACK_SIZE, STACK_MAGIC};

const STACK_ALIGN: usize = 16;

/// Owned kernel stack region. The stack grows down towards the guard word.
pub struct KernelStack {
    base: NonNull<u8>,
}

// SAFETY: the region is exclusively owned by one task; the raw pointer is only
// an address for the context switch and the guard check.
unsafe impl Send for KernelStack {}

impl KernelStack {
    fn layout() -> Layout {
        // KSTACK_SIZE is a non-zero multiple of the alignment.
        match Layout::from_size_align(KSTACK_SIZE, STACK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => unreachable!("kernel stack layout"),
        }
    }

    /// Allocates a zeroed stack and plants the guard word.
    pub fn allocate() -> Result<Self, CreateError> {
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(Self::layout()) };
        let base = NonNull::new(raw).ok_or(CreateError::OutOfMemory)?;
        // SAFETY: `base` points at KSTACK_SIZE writable bytes aligned to 16.
        unsafe { base.as_ptr().cast::<u32>().write_volatile(STACK_MAGIC) };
        Ok(Self { base })
    }

    /// Lowest address of the region (where the guard lives).
    pub fn bottom(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Initial stack pointer: one past the highest byte, 16-byte aligned.
    pub fn top(&self) -> usize {
        self.bottom() + KSTACK_SIZE
    }

    pub fn guard_intact(&self) -> bool {
        // SAFETY: the guard word is inside the owned region.
        unsafe { self.base.as_ptr().cast::<u32>().read_volatile() == STACK_MAGIC }
    }

    /// Simulates an overflow that ran over the guard word.
    #[cfg(test)]
    pub(crate) fn smash_guard(&mut self) {
        // SAFETY: the guard word is inside the owned region.
        unsafe { self.base.as_ptr().cast::<u32>().write_volatile(0xdead_beef) };
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with the same layout.
        unsafe { dealloc(self.base.as_ptr(), Self::layout()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stack_has_guard_and_aligned_top() {
        let stack = KernelStack::allocate().expect("stack");
        assert!(stack.guard_intact());
        assert_eq!(stack.top() % STACK_ALIGN, 0);
        assert_eq!(stack.top() - stack.bottom(), KSTACK_SIZE);
    }

    #[test]
    fn smashed_guard_is_detected() {
        let mut stack = KernelStack::allocate().expect("stack");
        stack.smash_guard();
        assert!(!stack.guard_intact());
    }
}
