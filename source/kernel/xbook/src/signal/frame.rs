// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-visible records: the signal frame pushed before running a handler and
//! `struct itimerval` used by `setitimer`/`getitimer`.

use super::{SigSet, Signal};
use crate::trap::TrapFrame;

const WORD: usize = core::mem::size_of::<usize>();
const FRAME_MAGIC: usize = 0x5349_4746;
const TRAP_WORDS: usize = 36;
const HEADER_WORDS: usize = 3;

/// Saved context pushed onto the user stack while a handler runs.
///
/// Layout (little-endian words): magic, signo, saved blocked mask, then the
/// interrupted trap frame (`x0..x31`, `sepc`, `sstatus`, `scause`, `stval`).
#[derive(Clone, Copy, Debug)]
pub struct SignalFrame {
    pub signo: usize,
    pub saved_mask: SigSet,
    pub frame: TrapFrame,
}

impl SignalFrame {
    pub const SIZE: usize = (HEADER_WORDS + TRAP_WORDS) * WORD;

    pub fn new(sig: Signal, saved_mask: SigSet, frame: TrapFrame) -> Self {
        Self { signo: sig.number(), saved_mask, frame }
    }

    /// Address to store the frame at, below `sp` and 16-byte aligned.
    pub fn placement(sp: usize) -> Option<usize> {
        sp.checked_sub(Self::SIZE).map(|addr| addr & !0xf)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut words = [0usize; HEADER_WORDS + TRAP_WORDS];
        words[0] = FRAME_MAGIC;
        words[1] = self.signo;
        words[2] = self.saved_mask.bits() as usize;
        let regs = &mut words[HEADER_WORDS..];
        regs[..32].copy_from_slice(&self.frame.x);
        regs[32] = self.frame.sepc;
        regs[33] = self.frame.sstatus;
        regs[34] = self.frame.scause;
        regs[35] = self.frame.stval;

        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(WORD).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parses a frame read back from user memory; `None` if it was not written by the kernel.
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let mut words = [0usize; HEADER_WORDS + TRAP_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(WORD)) {
            let mut raw = [0u8; WORD];
            raw.copy_from_slice(chunk);
            *word = usize::from_le_bytes(raw);
        }
        if words[0] != FRAME_MAGIC {
            return None;
        }
        let regs = &words[HEADER_WORDS..];
        let mut frame = TrapFrame::default();
        frame.x.copy_from_slice(&regs[..32]);
        frame.sepc = regs[32];
        frame.sstatus = regs[33];
        frame.scause = regs[34];
        frame.stval = regs[35];
        Some(Self {
            signo: words[1],
            saved_mask: SigSet::from_bits(words[2] as u64).without_uncatchable(),
            frame,
        })
    }
}

/// `struct timeval`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

impl TimeVal {
    /// Total microseconds; negative fields are treated as zero.
    pub fn as_micros(&self) -> u64 {
        let sec = self.sec.max(0) as u64;
        let usec = self.usec.max(0) as u64;
        sec.saturating_mul(1_000_000).saturating_add(usec)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self { sec: (micros / 1_000_000) as i64, usec: (micros % 1_000_000) as i64 }
    }
}

/// `struct itimerval`: `it_interval` followed by `it_value`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ITimerVal {
    pub interval: TimeVal,
    pub value: TimeVal,
}

impl ITimerVal {
    pub const SIZE: usize = 32;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let fields = [self.interval.sec, self.interval.usec, self.value.sec, self.value.usec];
        let mut out = [0u8; Self::SIZE];
        for (chunk, field) in out.chunks_exact_mut(8).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        let mut fields = [0i64; 4];
        for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *field = i64::from_le_bytes(raw);
        }
        Self {
            interval: TimeVal { sec: fields[0], usec: fields[1] },
            value: TimeVal { sec: fields[2], usec: fields[3] },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_keeps_registers_and_mask() {
        let mut trap = TrapFrame::default();
        trap.x[2] = 0x7fff_0000;
        trap.x[10] = 42;
        trap.sepc = 0x1_0004;
        let mut mask = SigSet::EMPTY;
        mask.insert(Signal::SIGUSR1);
        let decoded = SignalFrame::decode(&SignalFrame::new(Signal::SIGALRM, mask, trap).encode())
            .expect("kernel-written frame");
        assert_eq!(decoded.signo, 14);
        assert_eq!(decoded.saved_mask, mask);
        assert_eq!(decoded.frame.x[10], 42);
        assert_eq!(decoded.frame.sepc, 0x1_0004);
    }

    #[test]
    fn garbage_frames_are_refused() {
        assert!(SignalFrame::decode(&[0u8; SignalFrame::SIZE]).is_none());
    }

    #[test]
    fn placement_is_aligned_and_below_sp() {
        let addr = SignalFrame::placement(0x8000_0008).expect("room");
        assert_eq!(addr % 16, 0);
        assert!(addr + SignalFrame::SIZE <= 0x8000_0008);
        assert!(SignalFrame::placement(8).is_none());
    }

    #[test]
    fn timeval_conversions() {
        let tv = TimeVal { sec: 1, usec: 500_000 };
        assert_eq!(tv.as_micros(), 1_500_000);
        assert_eq!(TimeVal::from_micros(2_000_001), TimeVal { sec: 2, usec: 1 });
        let itv = ITimerVal { interval: tv, value: TimeVal { sec: 3, usec: 0 } };
        assert_eq!(ITimerVal::decode(&itv.encode()), itv);
    }
}
