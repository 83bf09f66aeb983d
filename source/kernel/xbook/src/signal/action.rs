// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Signal dispositions and their user-space wire layout.
//!
//! `struct sigaction` as exchanged with user space is four little-endian
//! machine words: handler, flags, restorer, mask.

use bitflags::bitflags;

use super::SigSet;

pub const SIG_DFL: usize = 0;
pub const SIG_IGN: usize = 1;

bitflags! {
    /// `sa_flags` bits understood by the kernel.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SaFlags: u32 {
        const NOCLDSTOP = 0x0000_0001;
        const SIGINFO = 0x0000_0004;
        const RESTORER = 0x0400_0000;
        const ONSTACK = 0x0800_0000;
        const RESTART = 0x1000_0000;
        const NODEFER = 0x4000_0000;
        const RESETHAND = 0x8000_0000;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Disposition {
    #[default]
    Default,
    Ignore,
    /// User-space handler entry point.
    Handler(usize),
}

/// Per-signal action installed through `rt_sigaction`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SigAction {
    pub disposition: Disposition,
    /// Extra signals blocked while the handler runs.
    pub mask: SigSet,
    pub flags: SaFlags,
    /// Trampoline the handler returns into; it must issue `rt_sigreturn`.
    pub restorer: usize,
}

impl SigAction {
    pub const WIRE_SIZE: usize = 4 * core::mem::size_of::<usize>();

    pub const fn ignore() -> Self {
        Self {
            disposition: Disposition::Ignore,
            mask: SigSet::EMPTY,
            flags: SaFlags::empty(),
            restorer: 0,
        }
    }

    pub const fn handler(entry: usize, restorer: usize) -> Self {
        Self {
            disposition: Disposition::Handler(entry),
            mask: SigSet::EMPTY,
            flags: SaFlags::RESTORER,
            restorer,
        }
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let handler = match self.disposition {
            Disposition::Default => SIG_DFL,
            Disposition::Ignore => SIG_IGN,
            Disposition::Handler(entry) => entry,
        };
        let words = [handler, self.flags.bits() as usize, self.restorer, self.mask.bits() as usize];
        let mut out = [0u8; Self::WIRE_SIZE];
        for (chunk, word) in out.chunks_exact_mut(core::mem::size_of::<usize>()).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8; Self::WIRE_SIZE]) -> Self {
        let mut words = [0usize; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(core::mem::size_of::<usize>())) {
            let mut raw = [0u8; core::mem::size_of::<usize>()];
            raw.copy_from_slice(chunk);
            *word = usize::from_le_bytes(raw);
        }
        let disposition = match words[0] {
            SIG_DFL => Disposition::Default,
            SIG_IGN => Disposition::Ignore,
            entry => Disposition::Handler(entry),
        };
        Self {
            disposition,
            flags: SaFlags::from_bits_truncate(words[1] as u32),
            restorer: words[2],
            mask: SigSet::from_bits(words[3] as u64).without_uncatchable(),
        }
    }
}
