//! The syscall-facing surface over the scheduling core (spec §6).
//!
//! The teacher decodes raw trapframe registers into arguments itself
//! (`argint`/`argaddr`/`argfd` in its `syscall.rs`); that decoding reaches
//! into the trap/VM glue this crate doesn't model (see `hal`), so every
//! function here takes already-decoded Rust values instead of an argument
//! index. Pairing each one against the teacher's `sys_*` shows the mapping
//! is 1:1 even with the decoding stripped out.

use crate::hal::Platform;
use crate::proc::cpu::Cpu;
use crate::proc::process::{self, TaskError};
use crate::proc::sleep;
use crate::proc::table::TaskTable;
use crate::proc::task::{Channel, Pid};
use crate::proc::thread;

/// `sys_fork`.
pub fn sys_fork(table: &TaskTable, cpu: &Cpu, platform: &impl Platform) -> Result<Pid, TaskError> {
    let parent = cpu.current.expect("sys_fork: no current task");
    process::fork(table, platform, parent)
}

/// `sys_exit`.
pub fn sys_exit(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, status: i32) -> ! {
    process::exit(table, cpu, platform, status)
}

/// `sys_wait`. `out_addr`, if given, is where the caller wants the child's
/// exit status copied.
pub fn sys_wait(
    table: &TaskTable,
    cpu: &mut Cpu,
    platform: &impl Platform,
    out_addr: Option<u64>,
) -> Result<(Pid, i32), TaskError> {
    process::wait(table, cpu, platform, out_addr)
}

/// `sys_kill`.
pub fn sys_kill(table: &TaskTable, target_pid: i32) -> bool {
    if target_pid <= 0 {
        return false;
    }
    sleep::kill(table, Pid::new(target_pid))
}

/// `sys_getpid`.
pub fn sys_getpid(cpu: &Cpu) -> i32 {
    cpu.current.map(Pid::get).unwrap_or(0)
}

/// `sys_sbrk`. Returns the address the break used to be at, i.e. the start
/// of the newly (de)allocated region, matching the teacher's "`sbrk`
/// returns the old size".
pub fn sys_sbrk(table: &TaskTable, cpu: &Cpu, platform: &impl Platform, increment: i32) -> Result<u64, TaskError> {
    let pid = cpu.current.expect("sys_sbrk: no current task");
    let old_size = {
        let guard = table.lock();
        let index = guard.find_index(pid).expect("sys_sbrk: current task missing");
        guard.get(index).size
    };
    process::grow(table, cpu, platform, increment as i64)?;
    Ok(old_size)
}

/// `sys_sleep(n)`. Blocks until at least `n` timer ticks have elapsed since
/// the call (spec §6: `sleep(ticks) → 0 or −1`), waking once per tick on the
/// well-known ticks channel to recheck the target and to poll `killed`
/// (spec §5 "Cancellation": "polling points inside blocking waits ... timed
/// sleep"), matching the teacher's `sys_sleep` loop.
pub fn sys_sleep(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, n: u32) -> Result<(), TaskError> {
    let target = platform.ticks().wrapping_add(n as u64);
    loop {
        if platform.ticks() >= target {
            return Ok(());
        }
        let pid = cpu.current.expect("sys_sleep: no current task");
        {
            let guard = table.lock();
            let index = guard.find_index(pid).expect("sys_sleep: current task missing");
            if guard.get(index).killed {
                return Err(TaskError::Killed);
            }
        }
        sleep::sleep(table, cpu, platform, Channel::ticks());
    }
}

/// `sys_uptime`. Reports the number of timer ticks since boot (spec §6:
/// `uptime() → tick_count`).
pub fn sys_uptime(platform: &impl Platform) -> u64 {
    platform.ticks()
}

/// `sys_clone` (the xv6_proj3 thread extension's `clone`).
pub fn sys_clone(
    table: &TaskTable,
    cpu: &Cpu,
    platform: &impl Platform,
    entry_point: u64,
    arg: u64,
    user_stack_top: u64,
) -> Result<Pid, TaskError> {
    let creator = cpu.current.expect("sys_clone: no current task");
    thread::clone(table, platform, creator, entry_point, arg, user_stack_top)
}

/// `sys_join`. Returns `(return_value, stack_base)`; the caller copies both
/// out to the user-supplied `&ret`/`&stack` addresses.
pub fn sys_join(
    table: &TaskTable,
    cpu: &mut Cpu,
    platform: &impl Platform,
    target_pid: i32,
) -> Result<(u64, u64), TaskError> {
    thread::join(table, cpu, platform, Pid::new(target_pid))
}

/// `sys_thread_exit`.
pub fn sys_thread_exit(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, return_value: u64) -> ! {
    thread::thread_exit(table, cpu, platform, return_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockPlatform;
    use crate::proc::task::{ReleaseGroup, TaskState};

    fn spawn_current(table: &TaskTable, cpu: &mut Cpu) -> Pid {
        let mut guard = table.lock();
        let (index, pid) = guard.allocate_slot().unwrap();
        guard.get_mut(index).state = TaskState::Running;
        guard.get_mut(index).release_group = Some(ReleaseGroup::new());
        drop(guard);
        cpu.current = Some(pid);
        pid
    }

    #[test]
    fn sys_getpid_reports_the_current_task() {
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let pid = spawn_current(&table, &mut cpu);
        assert_eq!(sys_getpid(&cpu), pid.get());
    }

    #[test]
    fn sys_kill_rejects_nonpositive_pids() {
        let table = TaskTable::new();
        assert!(!sys_kill(&table, 0));
        assert!(!sys_kill(&table, -1));
    }

    #[test]
    fn sys_sbrk_returns_the_old_size() {
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let platform = MockPlatform::new();
        spawn_current(&table, &mut cpu);

        let old = sys_sbrk(&table, &cpu, &platform, 4096).unwrap();
        assert_eq!(old, 0);
        let old_again = sys_sbrk(&table, &cpu, &platform, 4096).unwrap();
        assert_eq!(old_again, 4096);
    }

    #[test]
    fn sys_fork_assigns_the_current_task_as_parent() {
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let platform = MockPlatform::new();
        let parent = spawn_current(&table, &mut cpu);

        let child = sys_fork(&table, &cpu, &platform).unwrap();
        let guard = table.lock();
        let index = guard.find_index(child).unwrap();
        assert_eq!(guard.get(index).parent, Some(parent));
    }

    #[test]
    fn sys_uptime_reports_the_platform_tick_count() {
        let platform = MockPlatform::new();
        assert_eq!(sys_uptime(&platform), 0);
        platform.ticks.store(42, core::sync::atomic::Ordering::Relaxed);
        assert_eq!(sys_uptime(&platform), 42);
    }

    #[test]
    fn sys_sleep_of_zero_ticks_returns_immediately() {
        // n == 0 means the target is the current tick count itself, so the
        // very first check is already satisfied and sys_sleep must return
        // without ever calling into sleep::sleep (whose MockPlatform swtch
        // is a no-op and would otherwise spin, since ticks never advance on
        // their own in this harness).
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let platform = MockPlatform::new();
        spawn_current(&table, &mut cpu);

        assert_eq!(sys_sleep(&table, &mut cpu, &platform, 0), Ok(()));
    }

    #[test]
    fn sys_sleep_reports_killed_instead_of_looping_forever() {
        // MockPlatform::ticks never advances on its own, so a caller that
        // never reaches its target must observe `killed` rather than spin;
        // this exercises the same polling point spec §5 requires of a timed
        // sleep.
        let table = TaskTable::new();
        let mut cpu = Cpu::new();
        let platform = MockPlatform::new();
        let pid = spawn_current(&table, &mut cpu);
        {
            let mut guard = table.lock();
            let index = guard.find_index(pid).unwrap();
            guard.get_mut(index).killed = true;
        }

        assert_eq!(sys_sleep(&table, &mut cpu, &platform, 5), Err(TaskError::Killed));
    }
}
