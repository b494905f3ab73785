//! Process and thread scheduling core for a teaching-grade kernel.
//!
//! `no_std` outside tests, matching how a crate meant to link into a kernel
//! image stays hosted-testable: see `other_examples`' `r3-os` kernel crate
//! for the same `cfg_attr` idiom. The virtual-memory subsystem, physical
//! allocator, file/VFS/log layer, and register-save primitive this crate
//! would otherwise link against as `extern "C"` functions are modelled as
//! the `hal::Platform` trait instead, so the whole scheduling core runs
//! under `cargo test` against `hal::mock::MockPlatform`.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::too_many_arguments)]

extern crate alloc;

pub mod hal;
pub mod param;
pub mod proc;
pub mod sync;
pub mod syscall;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {info}");
    loop {
        core::hint::spin_loop();
    }
}
