//! The fixed task table and its single global lock (spec §1, §4.1).

use crate::param::NPROC;
use crate::sync::spinlock::{Spinlock, SpinlockGuard};

use super::task::{Pid, Task, TaskState};

/// The pid reserved for the first process, the reparent target for every
/// orphan (spec §4.5 "Exit").
pub const INIT_PID: i32 = 1;

/// All task slots plus the single lock that protects every field of every
/// slot (spec §1: "Exactly one global lock ... guards the entire task
/// table"). No slot field is ever read or written without holding it.
pub struct TaskTable {
    inner: Spinlock<TaskTableState>,
}

/// The data the global lock protects.
pub struct TaskTableState {
    pub tasks: [Task; NPROC],
    next_pid: i32,
}

impl TaskTableState {
    fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        Pid::new(pid)
    }

    /// Scans for an `UNUSED` slot, marks it `EMBRYO`, and stamps it with a
    /// freshly minted pid (spec §4.1 "Allocate"). Returns `None` if every
    /// slot is occupied.
    pub fn allocate_slot(&mut self) -> Option<(usize, Pid)> {
        let index = self.tasks.iter().position(Task::is_unused)?;
        let pid = self.alloc_pid();
        self.tasks[index].state = TaskState::Embryo;
        self.tasks[index].pid = Some(pid);
        Some((index, pid))
    }

    pub fn find_index(&self, pid: Pid) -> Option<usize> {
        self.tasks.iter().position(|t| t.pid == Some(pid))
    }

    pub fn get(&self, index: usize) -> &Task {
        &self.tasks[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Task {
        &mut self.tasks[index]
    }

    /// Reassigns every non-thread child of `old_parent` to `new_parent`, for
    /// the orphan-reparenting step of `exit` (spec §4.5: "reparent every
    /// **non-thread** child"). Thread children are skipped: a thread's
    /// `parent` field names the process whose release group it belongs to,
    /// not a waitable relationship, and must survive its owning process
    /// becoming a zombie.
    ///
    /// Returns whether any child was actually reparented, so the caller
    /// knows whether `new_parent` needs waking.
    pub fn reparent(&mut self, old_parent: Pid, new_parent: Pid) -> bool {
        let mut reparented_any = false;
        for task in self.tasks.iter_mut() {
            if task.parent == Some(old_parent) && !task.is_thread() {
                task.parent = Some(new_parent);
                reparented_any = true;
            }
        }
        reparented_any
    }
}

impl TaskTable {
    /// Builds an empty table. Not `const`: `Task` owns a boxed kernel stack
    /// slot and an `ArrayString`, neither of which admit a `[Task::new();
    /// NPROC]` repeat-expression, so slots are built one at a time via
    /// `core::array::from_fn`. The kernel entry point (or a test) owns the
    /// single instance this produces; this crate does not declare it as a
    /// `static`, since that requires the external allocator to be live
    /// before Rust statics run (see `hal`).
    pub fn new() -> TaskTable {
        TaskTable {
            inner: Spinlock::new(TaskTableState {
                tasks: core::array::from_fn(|_| Task::new()),
                next_pid: INIT_PID,
            }),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, TaskTableState> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, TaskTableState>> {
        self.inner.try_lock()
    }
}

impl Default for TaskTable {
    fn default() -> TaskTable {
        TaskTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_slot_assigns_monotonic_pids() {
        let table = TaskTable::new();
        let mut guard = table.lock();
        let (_, first) = guard.allocate_slot().unwrap();
        let (_, second) = guard.allocate_slot().unwrap();
        assert_eq!(first.get(), INIT_PID);
        assert_eq!(second.get(), INIT_PID + 1);
    }

    #[test]
    fn allocate_slot_fails_when_table_is_full() {
        let table = TaskTable::new();
        let mut guard = table.lock();
        for _ in 0..NPROC {
            assert!(guard.allocate_slot().is_some());
        }
        assert!(guard.allocate_slot().is_none());
    }

    #[test]
    fn reparent_only_touches_matching_children() {
        let table = TaskTable::new();
        let mut guard = table.lock();
        let (idx_a, pid_a) = guard.allocate_slot().unwrap();
        let (idx_b, pid_b) = guard.allocate_slot().unwrap();
        let (_, init_pid) = guard.allocate_slot().unwrap();
        guard.get_mut(idx_a).parent = Some(pid_b);
        guard.get_mut(idx_b).parent = Some(init_pid);
        assert!(!guard.reparent(pid_a, init_pid));
        assert_eq!(guard.get(idx_a).parent, Some(pid_b));
        assert_eq!(guard.get(idx_b).parent, Some(init_pid));
    }

    #[test]
    fn reparent_skips_thread_children() {
        let table = TaskTable::new();
        let mut guard = table.lock();
        let (idx_process, pid_process) = guard.allocate_slot().unwrap();
        let (idx_thread, _) = guard.allocate_slot().unwrap();
        let (_, init_pid) = guard.allocate_slot().unwrap();
        guard.get_mut(idx_thread).parent = Some(pid_process);
        guard.get_mut(idx_thread).user_stack_top = Some(0x8000);

        assert!(!guard.reparent(pid_process, init_pid));
        assert_eq!(
            guard.get(idx_thread).parent,
            Some(pid_process),
            "a thread's parent must keep naming its owning process"
        );
    }
}
