// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel diagnostics: levelled logging.

#[macro_use]
pub mod log;
