// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

fn main() {
    println!("cargo:rerun-if-env-changed=XBOOK_LINKER_SCRIPT");
    println!("cargo:rerun-if-changed=src/arch/riscv/trap.S");
    if let Ok(script) = std::env::var("XBOOK_LINKER_SCRIPT") {
        println!("cargo:rustc-link-arg=-T{script}");
    }
}
