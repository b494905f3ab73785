//! The scheduler loop and the context-switch protocol (spec §4.2/§4.3).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::Platform;
use crate::sync::spinlock::SpinlockGuard;

use super::cpu::Cpu;
use super::table::{TaskTable, TaskTableState};
use super::task::TaskState;

/// Switches from the currently running task's context back into this CPU's
/// scheduler context (spec §4.3 "sched").
///
/// Preconditions, checked exactly as the teacher's `sched` checks them:
/// the global lock must be held by the caller (passed in as `table`), held
/// exactly once (`cpu.interrupt_disable_layers == 1`), and the current
/// task's state must already have been changed away from `RUNNING` by the
/// caller (to `RUNNABLE` for a yield, `SLEEPING` for a sleep, or `ZOMBIE`
/// for an exit) before calling in.
pub fn sched(table: &mut SpinlockGuard<'_, TaskTableState>, cpu: &mut Cpu, platform: &impl Platform) {
    let pid = cpu.current.expect("sched: no current task");
    let index = table
        .find_index(pid)
        .expect("sched: current task missing from the table");
    assert_eq!(
        cpu.interrupt_disable_layers, 1,
        "sched: global lock must be held exactly once"
    );
    assert_ne!(
        table.get(index).state,
        TaskState::Running,
        "sched: current task is still RUNNING"
    );
    assert!(!cpu.interrupts_enabled, "sched: interrupts must be disabled");

    // Save/restore around `swtch`: while this task is suspended, other
    // tasks dispatched on this CPU run their own push_intr_off/pop_intr_off
    // cycles and mutate this same field, so it must not be trusted to still
    // hold this task's value once `swtch` returns (matches the teacher's
    // `sched`, which saves `cpu->intena` into a local across the switch).
    let previous_interrupts_enabled = cpu.previous_interrupts_enabled;
    let task = table.get_mut(index);
    platform.swtch(&mut task.context, &cpu.scheduler_context);
    cpu.previous_interrupts_enabled = previous_interrupts_enabled;
}

/// Voluntarily gives up the CPU (spec §4.2 "yield"): marks the current task
/// `RUNNABLE` and hands control back to the scheduler, which will pick some
/// runnable task (possibly the same one again) to run next.
pub fn yield_now(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform) {
    let mut guard = table.lock();
    cpu.push_intr_off(true);

    let pid = cpu.current.expect("yield_now: no current task");
    let index = guard.find_index(pid).expect("yield_now: current task missing");
    guard.get_mut(index).state = TaskState::Runnable;
    sched(&mut guard, cpu, platform);

    cpu.pop_intr_off();
}

static FIRST_RETURN: AtomicBool = AtomicBool::new(true);

/// Sentinel `alloc_task` stamps into a freshly allocated task's
/// `context.ra` (spec §4.1/§9: "the slot's `context` is initialised so
/// that the first dispatch will resume at `forkret`"). `scheduler_step`
/// checks for it to recognise a task's very first dispatch and route the
/// lock hand-off through `forkret` instead of releasing it directly —
/// never a real resume address outside that use.
pub const FORKRET_ENTRY: u64 = 1;

/// Runs in the context of a task's very first dispatch, immediately after
/// `scheduler_step` switches into it for the first time (spec §4.3
/// "forkret"). Releases the global lock that `scheduler_step` is still
/// holding on the new task's behalf, then, the very first time only, runs
/// `on_first_return` — the hook for whatever one-time external-collaborator
/// setup (log/FS init in the teacher) needs to happen after the scheduling
/// core exists but before any task's code runs. `on_first_return` is never
/// invoked more than once per process lifetime, across however many times
/// `forkret` itself is reached.
pub fn forkret(cpu: &mut Cpu, on_first_return: &impl Fn()) {
    cpu.pop_intr_off();
    if FIRST_RETURN.swap(false, Ordering::AcqRel) {
        on_first_return();
    }
}

/// Runs one pass of the scheduler (spec §4.2): scans the task table in
/// index order from the very beginning for the first `RUNNABLE` slot,
/// dispatches it, and returns once it has switched back out. The scan
/// always restarts at index 0 on every call — "the loop restarts its index
/// each round" (spec §4.2) — rather than resuming where the previous call
/// left off, so fairness comes only from lower-index tasks eventually
/// blocking or exiting, exactly as the teacher's C-era `scheduler()` for
/// loop does. Returns whether any task was found to run.
///
/// The global lock is acquired here and handed off to the dispatched task
/// still held (spec §4.3 "sched": "it is the [task]'s job to release [the
/// lock]"). A task dispatched for the very first time has never run its own
/// release path, so its `context.ra` still reads `FORKRET_ENTRY`; for that
/// one dispatch only, `forkret` — not `scheduler_step` — performs the
/// release, exactly as the teacher's fresh processes resume at `forkret`
/// rather than inside `sched`. Every later dispatch of the same task
/// resumes inside whichever of `yield_now`/`sleep`/`wait`/`exit` called
/// `sched`, which already releases the lock itself once `sched` returns.
pub fn scheduler_step(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, on_first_return: &impl Fn()) -> bool {
    let len = table.lock().tasks.len();

    for index in 0..len {
        let mut guard = table.lock();
        cpu.push_intr_off(true);

        if guard.get(index).state != TaskState::Runnable {
            cpu.pop_intr_off();
            continue;
        }

        guard.get_mut(index).state = TaskState::Running;
        cpu.current = guard.get(index).pid;
        let first_dispatch = guard.get(index).context.ra == FORKRET_ENTRY;

        platform.switch_user_vm(guard.get(index).address_space);
        let task = guard.get_mut(index);
        platform.swtch(&mut cpu.scheduler_context, &task.context);
        platform.switch_kernel_vm();

        cpu.current = None;
        if first_dispatch {
            guard.get_mut(index).context.ra = 0;
        }
        drop(guard);

        if first_dispatch {
            forkret(cpu, on_first_return);
        } else {
            cpu.pop_intr_off();
        }
        return true;
    }

    false
}

/// The scheduler's top-level loop (spec §4.2): restarts `scheduler_step`
/// from the beginning of the table forever. Never returns; only meaningful
/// when driven by the kernel's idle/boot path, so it is kept separate from
/// `scheduler_step` (which is what the tests in this crate actually
/// exercise).
pub fn scheduler_loop(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, on_first_return: impl Fn()) -> ! {
    loop {
        scheduler_step(table, cpu, platform, &on_first_return);
    }
}
