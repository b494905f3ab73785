//! Saved kernel-mode registers for the context-switch protocol (spec §4.3).

/// Saved registers for a kernel context switch, plus the resume address.
///
/// Kept near-verbatim from the teacher's `proc::context::Context` (itself
/// modelled on riscv64's callee-saved register set): `ra` is the resume
/// instruction pointer and `sp` the stack pointer, the rest are
/// callee-saved. This crate never interprets these fields directly — they
/// only flow through `hal::Platform::swtch`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
}

impl Context {
    pub const fn new() -> Context {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}
