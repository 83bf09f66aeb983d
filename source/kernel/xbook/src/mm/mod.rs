// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space seam between the task core and the memory manager
//! OWNERS: @kernel-mm-team
//! PUBLIC API: AsHandle, AddressSpaces, AddressSpaceError, UserAccessError, SimSpaces
//! DEPENDS_ON: alloc
//! INVARIANTS: A handle stays valid until released; user copies never touch kernel memory
//!
//! Page tables, mapping and frame allocation live outside this crate. The
//! kernel core only needs to duplicate a space on fork, drop it on the last
//! exit, and move signal frames across the user boundary.

mod sim;

use alloc::sync::Arc;
use core::num::NonZeroU32;

pub use sim::SimSpaces;

/// Handle referencing a tracked address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsHandle(NonZeroU32);

impl AsHandle {
    /// Constructs a handle from its raw value; zero is never a handle.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn to_raw(self) -> u32 {
        self.0.get()
    }
}

/// Errors reported while managing address spaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpaceError {
    /// Provided handle was not recognised.
    InvalidHandle,
    /// No memory left for the copy.
    OutOfMemory,
}

/// A user pointer could not be read or written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAccessError {
    Fault,
}

/// Operations the task core needs from the memory manager.
pub trait AddressSpaces {
    /// Copies `handle` for a forked child.
    fn duplicate(&self, handle: AsHandle) -> Result<AsHandle, AddressSpaceError>;

    /// Drops the space once its last task is gone.
    fn release(&self, handle: AsHandle);

    fn copy_to_user(&self, handle: AsHandle, addr: usize, bytes: &[u8]) -> Result<(), UserAccessError>;

    fn copy_from_user(&self, handle: AsHandle, addr: usize, out: &mut [u8]) -> Result<(), UserAccessError>;

    /// Resolves a user page fault; false means the access is invalid.
    fn handle_page_fault(&self, _handle: AsHandle, _addr: usize, _cause: usize) -> bool {
        false
    }
}

impl<T: AddressSpaces + ?Sized> AddressSpaces for Arc<T> {
    fn duplicate(&self, handle: AsHandle) -> Result<AsHandle, AddressSpaceError> {
        (**self).duplicate(handle)
    }

    fn release(&self, handle: AsHandle) {
        (**self).release(handle)
    }

    fn copy_to_user(&self, handle: AsHandle, addr: usize, bytes: &[u8]) -> Result<(), UserAccessError> {
        (**self).copy_to_user(handle, addr, bytes)
    }

    fn copy_from_user(&self, handle: AsHandle, addr: usize, out: &mut [u8]) -> Result<(), UserAccessError> {
        (**self).copy_from_user(handle, addr, out)
    }

    fn handle_page_fault(&self, handle: AsHandle, addr: usize, cause: usize) -> bool {
        (**self).handle_page_fault(handle, addr, cause)
    }
}

/// Writes a slice of machine words to user memory in native byte order.
pub fn write_words(
    spaces: &dyn AddressSpaces,
    handle: AsHandle,
    addr: usize,
    words: &[usize],
) -> Result<(), UserAccessError> {
    let mut bytes = alloc::vec::Vec::with_capacity(words.len() * core::mem::size_of::<usize>());
    for word in words {
        bytes.extend_from_slice(&word.to_ne_bytes());
    }
    spaces.copy_to_user(handle, addr, &bytes)
}

/// Reads `out.len()` machine words from user memory.
pub fn read_words(
    spaces: &dyn AddressSpaces,
    handle: AsHandle,
    addr: usize,
    out: &mut [usize],
) -> Result<(), UserAccessError> {
    const WORD: usize = core::mem::size_of::<usize>();
    let mut bytes = alloc::vec![0u8; out.len() * WORD];
    spaces.copy_from_user(handle, addr, &mut bytes)?;
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(WORD)) {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(chunk);
        *word = usize::from_ne_bytes(raw);
    }
    Ok(())
}
