// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (host ring capture)
//! PUBLIC API: log_* macros, emit(level,target,args), recent()
//! DEPENDS_ON: uart::KernelUart (target), bounded ring (host)
//! INVARIANTS: Debug/Trace only in debug builds or with `debug_uart`; single-line emission
//!
//! On bare metal every line goes to the UART. Host builds have no UART, so lines
//! land in a bounded ring that tests can inspect through [`recent`].

use core::fmt::Arguments;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(any(debug_assertions, feature = "debug_uart")),
            _ => true,
        }
    }
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    sink::write_line(level.tag(), target, args);
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod sink {
    use core::fmt::{Arguments, Write};

    pub(super) fn write_line(tag: &str, target: &str, args: Arguments<'_>) {
        let mut uart = crate::uart::KernelUart::lock();
        let writer = &mut *uart;
        let _ = writer.write_fmt(format_args!("[{} {}] ", tag, target));
        let _ = writer.write_fmt(args);
        let _ = writer.write_char('\n');
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
mod sink {
    use alloc::collections::VecDeque;
    use alloc::format;
    use alloc::string::String;
    use core::fmt::Arguments;
    use spin::Mutex;

    const RING_LINES: usize = 1024;

    pub(super) static RING: Mutex<VecDeque<String>> = Mutex::new(VecDeque::new());

    pub(super) fn write_line(tag: &str, target: &str, args: Arguments<'_>) {
        let line = format!("[{} {}] {}", tag, target, args);
        let mut ring = RING.lock();
        if ring.len() == RING_LINES {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

/// Returns a copy of the most recent log lines (host builds only).
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn recent() -> alloc::vec::Vec<alloc::string::String> {
    sink::RING.lock().iter().cloned().collect()
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
