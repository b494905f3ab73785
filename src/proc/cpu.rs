//! Per-CPU scheduler state (spec §4.2/§4.3).

use super::context::Context;
use super::task::Pid;

/// Per-CPU state: which task (if any) is running here, the scheduler's own
/// saved context to `swtch` back into, and the interrupt-disable nesting
/// depth `sched` checks.
///
/// Kept close to the teacher's `proc::cpu::Cpu`, but owned and passed
/// explicitly by callers instead of reached through a `mycpu()` global — see
/// SPEC_FULL.md's REDESIGN FLAGS for why.
pub struct Cpu {
    /// The task running on this CPU, or `None`.
    pub current: Option<Pid>,
    /// `swtch` here to enter this CPU's scheduler loop.
    pub scheduler_context: Context,
    /// Depth of global-lock acquisitions nested on this CPU. `sched`
    /// requires this to be exactly 1.
    pub interrupt_disable_layers: u32,
    /// Whether interrupts were enabled before the outermost global-lock
    /// acquisition on this CPU; restored when it is released.
    pub previous_interrupts_enabled: bool,
    /// Whether interrupts are enabled on this CPU right now. Distinct from
    /// `previous_interrupts_enabled`, which only remembers the pre-lock
    /// state to restore later — this tracks the present state, mirroring
    /// the teacher's real `readeflags() & FL_IF` that `sched` checks
    /// against (this crate has no interrupt controller to read, so `hal`
    /// callers drive it through `push_intr_off`/`pop_intr_off` instead).
    pub interrupts_enabled: bool,
}

impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            current: None,
            scheduler_context: Context::new(),
            interrupt_disable_layers: 0,
            previous_interrupts_enabled: false,
            interrupts_enabled: true,
        }
    }

    /// Called when the global lock is acquired. Mirrors the teacher's
    /// `push_off`.
    pub fn push_intr_off(&mut self, interrupts_were_enabled: bool) {
        if self.interrupt_disable_layers == 0 {
            self.previous_interrupts_enabled = interrupts_were_enabled;
        }
        self.interrupt_disable_layers += 1;
        self.interrupts_enabled = false;
    }

    /// Called when the global lock is released. Mirrors the teacher's
    /// `pop_off`. Returns whether interrupts should now be re-enabled.
    pub fn pop_intr_off(&mut self) -> bool {
        assert!(
            self.interrupt_disable_layers > 0,
            "pop_intr_off: interrupt-disable nesting underflow"
        );
        self.interrupt_disable_layers -= 1;
        let reenable = self.interrupt_disable_layers == 0 && self.previous_interrupts_enabled;
        if self.interrupt_disable_layers == 0 {
            self.interrupts_enabled = self.previous_interrupts_enabled;
        }
        reenable
    }
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}
