// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory address spaces for host builds and bring-up.
//!
//! Each space is a set of mapped regions backed by plain byte vectors. Copies
//! that leave every mapped region fault the way an unmapped user page would.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::{AddressSpaceError, AddressSpaces, AsHandle, UserAccessError};

#[derive(Clone, Default)]
struct Space {
    /// Region start -> backing bytes.
    regions: BTreeMap<usize, Vec<u8>>,
}

impl Space {
    fn region_mut(&mut self, addr: usize, len: usize) -> Option<&mut [u8]> {
        let (&start, bytes) = self.regions.range_mut(..=addr).next_back()?;
        let offset = addr - start;
        let end = offset.checked_add(len)?;
        bytes.get_mut(offset..end)
    }
}

#[derive(Default)]
struct Inner {
    next: u32,
    spaces: BTreeMap<AsHandle, Space>,
}

impl Inner {
    fn insert(&mut self, space: Space) -> Result<AsHandle, AddressSpaceError> {
        let raw = self.next.checked_add(1).ok_or(AddressSpaceError::OutOfMemory)?;
        let handle = AsHandle::from_raw(raw).ok_or(AddressSpaceError::OutOfMemory)?;
        self.next = raw;
        self.spaces.insert(handle, space);
        Ok(handle)
    }
}

/// Simulated memory manager.
#[derive(Default)]
pub struct SimSpaces {
    inner: Mutex<Inner>,
}

impl SimSpaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty space.
    pub fn create(&self) -> Result<AsHandle, AddressSpaceError> {
        self.inner.lock().insert(Space::default())
    }

    /// Maps `len` zeroed bytes at `start`.
    pub fn map(&self, handle: AsHandle, start: usize, len: usize) -> Result<(), AddressSpaceError> {
        let mut inner = self.inner.lock();
        let space = inner.spaces.get_mut(&handle).ok_or(AddressSpaceError::InvalidHandle)?;
        space.regions.insert(start, vec![0; len]);
        Ok(())
    }

    pub fn is_live(&self, handle: AsHandle) -> bool {
        self.inner.lock().spaces.contains_key(&handle)
    }

    pub fn live(&self) -> usize {
        self.inner.lock().spaces.len()
    }

    pub fn read_word(&self, handle: AsHandle, addr: usize) -> Option<usize> {
        let mut raw = [0u8; core::mem::size_of::<usize>()];
        self.copy_from_user(handle, addr, &mut raw).ok()?;
        Some(usize::from_ne_bytes(raw))
    }

    pub fn write_word(&self, handle: AsHandle, addr: usize, value: usize) -> Result<(), UserAccessError> {
        self.copy_to_user(handle, addr, &value.to_ne_bytes())
    }
}

impl AddressSpaces for SimSpaces {
    fn duplicate(&self, handle: AsHandle) -> Result<AsHandle, AddressSpaceError> {
        let mut inner = self.inner.lock();
        let copy = inner.spaces.get(&handle).cloned().ok_or(AddressSpaceError::InvalidHandle)?;
        inner.insert(copy)
    }

    fn release(&self, handle: AsHandle) {
        self.inner.lock().spaces.remove(&handle);
    }

    fn copy_to_user(&self, handle: AsHandle, addr: usize, bytes: &[u8]) -> Result<(), UserAccessError> {
        let mut inner = self.inner.lock();
        let space = inner.spaces.get_mut(&handle).ok_or(UserAccessError::Fault)?;
        let dst = space.region_mut(addr, bytes.len()).ok_or(UserAccessError::Fault)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn copy_from_user(&self, handle: AsHandle, addr: usize, out: &mut [u8]) -> Result<(), UserAccessError> {
        let mut inner = self.inner.lock();
        let space = inner.spaces.get_mut(&handle).ok_or(UserAccessError::Fault)?;
        let src = space.region_mut(addr, out.len()).ok_or(UserAccessError::Fault)?;
        out.copy_from_slice(src);
        Ok(())
    }
}
