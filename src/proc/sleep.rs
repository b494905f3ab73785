//! Sleep/wakeup and kill (spec §4.4).

use crate::hal::Platform;
use crate::sync::spinlock::SpinlockGuard;

use super::cpu::Cpu;
use super::scheduler::sched;
use super::table::{TaskTable, TaskTableState};
use super::task::{Channel, Pid, TaskState};

/// Puts the current task to sleep on `chan`, releasing the global lock while
/// asleep and reacquiring it before returning (spec §4.4 "sleep").
///
/// The caller must already hold the global lock; `sleep` takes it by value
/// and hands it straight to `sched`, matching the teacher's requirement that
/// no other lock be held across the call into `sched` (the "atomicity rule"
/// that prevents a wakeup from being delivered between the decision to sleep
/// and the state actually becoming `SLEEPING`).
pub fn sleep(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, chan: Channel) {
    let mut guard = table.lock();
    cpu.push_intr_off(true);

    let pid = cpu.current.expect("sleep: no current task");
    let index = guard.find_index(pid).expect("sleep: current task missing");

    guard.get_mut(index).sleep_channel = Some(chan);
    guard.get_mut(index).state = TaskState::Sleeping;

    sched(&mut guard, cpu, platform);

    guard.get_mut(index).sleep_channel = None;
    cpu.pop_intr_off();
}

/// Generalization of `sleep` for a caller blocked while holding some lock
/// other than the global table lock (spec §4.4, second bullet: "If `lock`
/// is some other spinlock, acquire the global lock first, then release
/// `lock`."). No lifecycle operation in this crate needs this branch —
/// `wait`/`join` already hold the global lock when they sleep — but an
/// external collaborator with its own condition (e.g. the disk/buffer
/// cache) would block through this path instead, so the acquire-before-
/// release ordering that makes the sleep atomic with a racing `wakeup` is
/// implemented and tested here regardless.
///
/// Acquires the global lock *before* dropping `other`, so a `wakeup(chan)`
/// racing on another task — which also needs the global lock — cannot slip
/// in between the caller's last check of its sleep predicate (made while
/// still holding `other`) and this task actually becoming `SLEEPING`.
/// Reacquires `other` before returning, restoring the locking state the
/// caller held on entry.
pub fn sleep_on<'o, U>(
    table: &TaskTable,
    cpu: &mut Cpu,
    platform: &impl Platform,
    chan: Channel,
    other: SpinlockGuard<'o, U>,
) -> SpinlockGuard<'o, U> {
    let other_lock = other.source();
    let mut guard = table.lock();
    cpu.push_intr_off(true);
    drop(other);

    let pid = cpu.current.expect("sleep_on: no current task");
    let index = guard.find_index(pid).expect("sleep_on: current task missing");

    guard.get_mut(index).sleep_channel = Some(chan);
    guard.get_mut(index).state = TaskState::Sleeping;

    sched(&mut guard, cpu, platform);

    guard.get_mut(index).sleep_channel = None;
    cpu.pop_intr_off();
    drop(guard);
    other_lock.lock()
}

/// Wakes every task sleeping on `chan` (spec §4.4 "wakeup"). Never wakes the
/// caller itself, matching the teacher's `wakeup`, which skips `myproc()`.
pub fn wakeup(table: &TaskTable, cpu: &Cpu, chan: Channel) {
    let mut guard = table.lock();
    wakeup_locked(&mut guard, cpu, chan);
}

/// `wakeup`, but for callers that already hold the global lock (spec §4.4:
/// "a caller already holding the lock may wake sleepers directly").
pub fn wakeup_locked(table: &mut TaskTableState, cpu: &Cpu, chan: Channel) {
    for index in 0..table.tasks.len() {
        let task = table.get(index);
        if task.pid == cpu.current {
            continue;
        }
        if task.state == TaskState::Sleeping && task.sleep_channel == Some(chan) {
            table.get_mut(index).state = TaskState::Runnable;
        }
    }
}

/// Marks the task with the given pid killed, and if it is currently asleep,
/// wakes it so it can observe the kill and unwind (spec §4.4 "kill").
/// Returns whether a matching task was found.
pub fn kill(table: &TaskTable, pid: Pid) -> bool {
    let mut guard = table.lock();
    let Some(index) = guard.find_index(pid) else {
        return false;
    };
    guard.get_mut(index).killed = true;
    if guard.get(index).state == TaskState::Sleeping {
        guard.get_mut(index).state = TaskState::Runnable;
    }
    true
}

/// Marks `pid`'s slot killed without first looking it up through the table
/// (used internally once the caller already holds an index).
pub fn setkilled(table: &mut TaskTableState, index: usize) {
    table.get_mut(index).killed = true;
}

pub fn killed(table: &TaskTableState, index: usize) -> bool {
    table.get(index).killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPlatform;
    use crate::proc::task::TaskState;

    #[test]
    fn wakeup_only_wakes_matching_sleepers() {
        let table = TaskTable::new();
        let cpu = Cpu::new();
        let chan = Channel(42);

        let (idx_sleeping, idx_other) = {
            let mut guard = table.lock();
            let (a, _) = guard.allocate_slot().unwrap();
            let (b, _) = guard.allocate_slot().unwrap();
            guard.get_mut(a).state = TaskState::Sleeping;
            guard.get_mut(a).sleep_channel = Some(chan);
            guard.get_mut(b).state = TaskState::Sleeping;
            guard.get_mut(b).sleep_channel = Some(Channel(7));
            (a, b)
        };

        wakeup(&table, &cpu, chan);

        let guard = table.lock();
        assert_eq!(guard.get(idx_sleeping).state, TaskState::Runnable);
        assert_eq!(guard.get(idx_other).state, TaskState::Sleeping);
    }

    #[test]
    fn wakeup_never_wakes_the_caller() {
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let chan = Channel(1);

        let pid = {
            let mut guard = table.lock();
            let (idx, pid) = guard.allocate_slot().unwrap();
            guard.get_mut(idx).state = TaskState::Sleeping;
            guard.get_mut(idx).sleep_channel = Some(chan);
            pid
        };
        cpu.current = Some(pid);

        wakeup(&table, &cpu, chan);

        let guard = table.lock();
        let index = guard.find_index(pid).unwrap();
        assert_eq!(guard.get(index).state, TaskState::Sleeping);
    }

    #[test]
    fn kill_wakes_a_sleeping_target() {
        let table = TaskTable::new();
        let pid = {
            let mut guard = table.lock();
            let (idx, pid) = guard.allocate_slot().unwrap();
            guard.get_mut(idx).state = TaskState::Sleeping;
            pid
        };

        assert!(kill(&table, pid));

        let guard = table.lock();
        let index = guard.find_index(pid).unwrap();
        assert!(guard.get(index).killed);
        assert_eq!(guard.get(index).state, TaskState::Runnable);
    }

    #[test]
    fn kill_reports_unknown_pid() {
        let table = TaskTable::new();
        assert!(!kill(&table, Pid::new(999)));
    }

    #[test]
    fn sleep_then_wakeup_returns_to_runnable_path() {
        // sched() requires a RUNNING->non-RUNNING transition and a current
        // task; exercised indirectly through the scheduler tests since
        // driving sleep() to completion needs a second task to swtch into.
        let _ = MockPlatform::new();
    }

    #[test]
    fn sleep_on_hands_the_other_lock_back_on_return() {
        use crate::sync::spinlock::Spinlock;

        let table = TaskTable::new();
        let platform = MockPlatform::new();
        let mut cpu = Cpu::new();
        let other = Spinlock::new(0u32);

        let pid = {
            let mut guard = table.lock();
            let (idx, pid) = guard.allocate_slot().unwrap();
            guard.get_mut(idx).state = TaskState::Running;
            pid
        };
        cpu.current = Some(pid);

        let chan = Channel(77);
        let other_guard = other.lock();
        let other_guard = sleep_on(&table, &mut cpu, &platform, chan, other_guard);
        drop(other_guard);
        assert!(!other.is_locked(), "sleep_on must reacquire, not leak, the other lock");

        let guard = table.lock();
        let index = guard.find_index(pid).unwrap();
        assert_eq!(
            guard.get(index).sleep_channel, None,
            "the channel is cleared once sleep_on returns, same as sleep"
        );
    }

    #[test]
    fn sleep_on_then_wakeup_wakes_the_sleeper_no_lost_wakeup() {
        use crate::sync::spinlock::Spinlock;

        let table = TaskTable::new();
        let platform = MockPlatform::new();
        let mut cpu = Cpu::new();
        let other = Spinlock::new(());

        let pid = {
            let mut guard = table.lock();
            let (idx, pid) = guard.allocate_slot().unwrap();
            guard.get_mut(idx).state = TaskState::Running;
            pid
        };
        cpu.current = Some(pid);

        let chan = Channel(99);
        // In this harness `sched` never truly suspends (MockPlatform::swtch
        // is a no-op), so by the time `sleep_on` returns the predicate has
        // already run its course; what's being checked is that the slot
        // passed through SLEEPING and the other lock's handoff is sound,
        // matching the ordering guarantee spec §5 depends on.
        let other_guard = sleep_on(&table, &mut cpu, &platform, chan, other.lock());
        drop(other_guard);

        // The waker runs on a different (idle) CPU — `cpu`, above, belongs
        // to the sleeper and must not be reused here, or `wakeup`'s
        // skip-the-caller check would mistake the sleeper for the waker.
        let waker_cpu = Cpu::new();
        wakeup(&table, &waker_cpu, chan);
        let guard = table.lock();
        let index = guard.find_index(pid).unwrap();
        assert_eq!(guard.get(index).state, TaskState::Runnable);
    }
}
