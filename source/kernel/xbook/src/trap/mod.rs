// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap frame, trap classification and trap diagnostics
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, TrapClass, VectorTable, SoftIrq, record(), last_trap(), describe_cause(), fmt_trap(), TrapDump
//! DEPENDS_ON: kernel::Kernel (dispatch), arch/riscv/trap.S (target entry)
//! INVARIANTS: classification happens once per trap and is final; kernel-mode exceptions are fatal
//!
//! `dispatch` holds the Rust side of trap handling (`Kernel::handle_trap`).
//! `entry` wires the assembly vector to a registered kernel on bare metal.

mod dispatch;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod entry;
mod softirq;
mod vector;

pub use dispatch::CANCELED_EXIT_CODE;
pub use softirq::{DeferredWork, SoftIrq, SoftIrqQueue};
pub use vector::{TrapHandler, VectorError, VectorTable, EXCEPTION_SLOTS, IRQ_OFFSET, IRQ_SLOTS, VECTOR_SLOTS};
pub(crate) use vector::fault_signal;

use core::fmt::{self, Write};
use spin::Mutex;

/// Top bit of `scause`: set for interrupts, clear for exceptions.
pub const INTERRUPT_FLAG: usize = 1 << (usize::BITS - 1);
/// `sstatus.SPP`: previous privilege was supervisor.
pub const SSTATUS_SPP: usize = 1 << 8;
/// `sstatus.SPIE`: interrupts re-enabled on `sret`.
pub const SSTATUS_SPIE: usize = 1 << 5;

pub const IRQ_SOFTWARE: usize = 1;
pub const IRQ_TIMER: usize = 5;
pub const IRQ_EXTERNAL: usize = 9;

pub const EXC_INST_MISALIGNED: usize = 0;
pub const EXC_INST_ACCESS: usize = 1;
pub const EXC_ILLEGAL_INST: usize = 2;
pub const EXC_BREAKPOINT: usize = 3;
pub const EXC_LOAD_MISALIGNED: usize = 4;
pub const EXC_LOAD_ACCESS: usize = 5;
pub const EXC_STORE_MISALIGNED: usize = 6;
pub const EXC_STORE_ACCESS: usize = 7;
pub const EXC_USER_ECALL: usize = 8;
pub const EXC_SUPERVISOR_ECALL: usize = 9;
pub const EXC_INST_PAGE_FAULT: usize = 12;
pub const EXC_LOAD_PAGE_FAULT: usize = 13;
pub const EXC_STORE_PAGE_FAULT: usize = 15;

/// Saved register state for an S-mode trap.
/// Must match `arch/riscv/trap.S` save/restore layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// x0..x31 (x0 is always 0; we never write it).
    pub x: [usize; 32],
    pub sepc: usize,
    pub sstatus: usize,
    pub scause: usize,
    pub stval: usize,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 36 * core::mem::size_of::<usize>());

impl TrapFrame {
    pub const RA: usize = 1;
    pub const SP: usize = 2;
    pub const TP: usize = 4;
    pub const A0: usize = 10;
    pub const A7: usize = 17;

    /// Frame for a task that starts executing user code at `entry` with stack `sp`.
    pub fn new_user(entry: usize, sp: usize) -> Self {
        let mut frame = Self { sepc: entry, sstatus: SSTATUS_SPIE, ..Self::default() };
        frame.x[Self::SP] = sp;
        frame
    }

    /// True when the trap was taken from U-mode.
    #[inline]
    pub fn from_user(&self) -> bool {
        self.sstatus & SSTATUS_SPP == 0
    }

    #[inline]
    pub fn arg(&self, n: usize) -> usize {
        self.x[Self::A0 + n]
    }

    #[inline]
    pub fn set_return(&mut self, value: usize) {
        self.x[Self::A0] = value;
    }

    #[inline]
    pub fn syscall_number(&self) -> usize {
        self.x[Self::A7]
    }

    #[inline]
    pub fn sp(&self) -> usize {
        self.x[Self::SP]
    }
}

/// The single class a trap is sorted into on entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrapClass {
    ExternalInterrupt,
    TimerInterrupt,
    /// Synchronous exception with its `scause` code.
    Exception { code: usize, from_kernel: bool },
    /// Interrupt kinds the kernel never enables (software, reserved).
    Unsupported(usize),
}

impl TrapClass {
    pub fn classify(frame: &TrapFrame) -> Self {
        let code = frame.scause & !INTERRUPT_FLAG;
        if !is_interrupt(frame.scause) {
            return TrapClass::Exception { code, from_kernel: !frame.from_user() };
        }
        match code {
            IRQ_TIMER => TrapClass::TimerInterrupt,
            IRQ_EXTERNAL => TrapClass::ExternalInterrupt,
            // The K210 forwards supervisor external interrupts from M-mode as
            // software interrupts tagged with the external cause in stval.
            IRQ_SOFTWARE if cfg!(feature = "k210") && frame.stval == IRQ_EXTERNAL => {
                TrapClass::ExternalInterrupt
            }
            other => TrapClass::Unsupported(other),
        }
    }
}

// ——— diagnostics ———

static LAST_TRAP: Mutex<Option<TrapFrame>> = Mutex::new(None);

#[cfg(feature = "trap_ring")]
const TRAP_RING_LEN: usize = 64;
#[cfg(feature = "trap_ring")]
static TRAP_RING: Mutex<(usize, [Option<TrapFrame>; TRAP_RING_LEN])> =
    Mutex::new((0, [None; TRAP_RING_LEN]));

/// Remembers `frame` for panic diagnostics.
pub fn record(frame: &TrapFrame) {
    *LAST_TRAP.lock() = Some(*frame);
    #[cfg(feature = "trap_ring")]
    {
        let mut ring = TRAP_RING.lock();
        let idx = ring.0;
        ring.1[idx % TRAP_RING_LEN] = Some(*frame);
        ring.0 = (idx + 1) % TRAP_RING_LEN;
    }
}

pub fn last_trap() -> Option<TrapFrame> {
    *LAST_TRAP.lock()
}

/// Recorded frames, oldest first.
#[cfg(feature = "trap_ring")]
pub fn recent_traps() -> alloc::vec::Vec<TrapFrame> {
    let ring = TRAP_RING.lock();
    let (next, slots) = (ring.0, &ring.1);
    (0..TRAP_RING_LEN).filter_map(|i| slots[(next + i) % TRAP_RING_LEN]).collect()
}

#[inline]
pub fn is_interrupt(scause: usize) -> bool {
    scause & INTERRUPT_FLAG != 0
}

pub fn describe_cause(scause: usize) -> &'static str {
    let code = scause & !INTERRUPT_FLAG;
    if is_interrupt(scause) {
        match code {
            IRQ_SOFTWARE => "SupervisorSoftInt",
            IRQ_TIMER => "SupervisorTimerInt",
            IRQ_EXTERNAL => "SupervisorExternalInt",
            _ => "Interrupt",
        }
    } else {
        match code {
            EXC_INST_MISALIGNED => "InstructionAddressMisaligned",
            EXC_INST_ACCESS => "InstructionAccessFault",
            EXC_ILLEGAL_INST => "IllegalInstruction",
            EXC_BREAKPOINT => "Breakpoint",
            EXC_LOAD_MISALIGNED => "LoadAddressMisaligned",
            EXC_LOAD_ACCESS => "LoadAccessFault",
            EXC_STORE_MISALIGNED => "StoreAMOAddressMisaligned",
            EXC_STORE_ACCESS => "StoreAMOAccessFault",
            EXC_USER_ECALL => "EnvironmentCallFromUMode",
            EXC_SUPERVISOR_ECALL => "EnvironmentCallFromSMode",
            EXC_INST_PAGE_FAULT => "InstructionPageFault",
            EXC_LOAD_PAGE_FAULT => "LoadPageFault",
            EXC_STORE_PAGE_FAULT => "StoreAMOPageFault",
            _ => "Exception",
        }
    }
}

pub fn fmt_trap<W: Write>(frame: &TrapFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " sepc=0x{:016x} sstatus=0x{:016x}", frame.sepc, frame.sstatus)?;
    writeln!(f, " scause=0x{:016x} ({})", frame.scause, describe_cause(frame.scause))?;
    writeln!(f, " stval=0x{:016x}", frame.stval)?;
    writeln!(f, " ra=0x{:016x} sp=0x{:016x}", frame.x[TrapFrame::RA], frame.x[TrapFrame::SP])?;
    writeln!(f, " a0..a7 = {:016x?}", &frame.x[10..=17])
}

/// `Display` adapter around [`fmt_trap`] for panic messages.
pub struct TrapDump<'a>(pub &'a TrapFrame);

impl fmt::Display for TrapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_trap(self.0, f)
    }
}
