//! Process lifecycle: fork, exit, wait, grow (spec §4.5).

use crate::hal::Platform;
use crate::param::NOFILE;

use super::cpu::Cpu;
use super::scheduler::{sched, FORKRET_ENTRY};
use super::sleep::wakeup_locked;
use super::table::{TaskTable, TaskTableState, INIT_PID};
use super::task::{Channel, Pid, ReleaseGroup, TaskState};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskError {
    MaxTasks,
    Allocation,
    NoChildren,
    Killed,
    PageFault,
    /// `clone`'s copy-out of the sentinel/arg words to the caller-supplied
    /// user stack failed (spec §6 syscall surface: "clone(...) → ... −2
    /// (stack copy-out failed)"), kept distinct from `PageFault` so the
    /// syscall layer can report the documented `-2` instead of `-1`.
    StackCopyOut,
}

/// Closes every file descriptor and releases the cwd a group of tasks
/// shared, run exactly once per group by whichever member's exit drives the
/// release-group counter to zero (spec §9 "Resolved — last-thread cleanup").
pub(crate) fn close_group_resources(table: &mut TaskTableState, platform: &impl Platform, index: usize) {
    let open_files = table.get(index).open_files;
    for file in open_files.into_iter().flatten() {
        platform.file_close(file);
    }
    table.get_mut(index).open_files = [None; NOFILE];

    // Dropping the cwd inode touches the log layer, so it must run inside a
    // transaction (spec §4.5 "exit": "drop cwd (under the log-layer
    // transaction boundary)"), matching the teacher's `begin_op()`/`iput()`/
    // `end_op()` bracketing around `p->cwd` in `exit`.
    if let Some(cwd) = table.get(index).cwd {
        platform.begin_op();
        platform.inode_put(cwd);
        platform.end_op();
    }
    table.get_mut(index).cwd = None;
}

/// Finds an `UNUSED` slot and brings it to `EMBRYO` with a fresh address
/// space, kernel stack, and release group (spec §4.1 "Allocate").
pub fn alloc_task(table: &TaskTable, platform: &impl Platform) -> Result<Pid, TaskError> {
    let mut guard = table.lock();
    let (index, pid) = guard.allocate_slot().ok_or(TaskError::MaxTasks)?;

    let address_space = match platform.kernel_setup_vm() {
        Some(a) => a,
        None => {
            guard.get_mut(index).reset_to_unused();
            return Err(TaskError::Allocation);
        }
    };
    let kernel_stack = match platform.allocate_kernel_stack() {
        Some(k) => k,
        None => {
            platform.free_user_vm(address_space);
            guard.get_mut(index).reset_to_unused();
            return Err(TaskError::Allocation);
        }
    };

    // Resuming at `forkret` with the stack pointer at the very top is what
    // makes the task's first dispatch safe to `swtch` into (spec §4.1/§9);
    // `scheduler_step` recognises `FORKRET_ENTRY` and hands the lock release
    // off to `forkret` for exactly that one dispatch.
    let stack_top = kernel_stack.top_addr();
    let task = guard.get_mut(index);
    task.address_space = address_space;
    task.context.ra = FORKRET_ENTRY;
    task.context.sp = stack_top;
    task.kernel_stack = Some(kernel_stack);
    task.release_group = Some(ReleaseGroup::new());
    Ok(pid)
}

/// Bootstraps the very first process (spec §4.1, the teacher's `userinit`):
/// allocates the one task slot that has no parent, installs `init_image` as
/// its entire user address space, and marks it `RUNNABLE`. Must be called
/// exactly once, before the scheduler loop starts, and the pid it returns
/// must be `table::INIT_PID` — every later `exit` refuses to run as that
/// pid, and every orphan is reparented to it.
pub fn userinit(table: &TaskTable, platform: &impl Platform, init_image: &[u8]) -> Pid {
    let pid = alloc_task(table, platform).expect("userinit: failed to allocate the init task");
    assert_eq!(pid.get(), INIT_PID, "userinit: init must be the first task allocated");

    let mut guard = table.lock();
    let index = guard.find_index(pid).expect("userinit: init task missing from the table");
    let address_space = guard.get(index).address_space;
    platform.init_user_vm(address_space, init_image);

    let task = guard.get_mut(index);
    task.size = init_image.len() as u64;
    task.trapframe.epc = 0;
    task.trapframe.sp = crate::param::PAGE_SIZE;
    task.parent = None;
    task.name = arrayvec::ArrayString::from("init").unwrap_or_default();
    task.state = TaskState::Runnable;

    pid
}

/// Creates a new process that is a copy of `parent` (spec §4.5 "fork"):
/// deep-copies the address space, duplicates open files and the cwd, and
/// copies the trapframe with `a0` cleared so the child's syscall return
/// value reads `0`. The new process starts life `RUNNABLE`.
pub fn fork(table: &TaskTable, platform: &impl Platform, parent: Pid) -> Result<Pid, TaskError> {
    let child_pid = alloc_task(table, platform)?;

    let mut guard = table.lock();
    let parent_index = guard
        .find_index(parent)
        .expect("fork: parent missing from the table");
    let child_index = guard
        .find_index(child_pid)
        .expect("fork: freshly allocated child missing from the table");

    let parent_size = guard.get(parent_index).size;
    let parent_as = guard.get(parent_index).address_space;
    let parent_trapframe = guard.get(parent_index).trapframe.clone();
    let parent_open_files = guard.get(parent_index).open_files;
    let parent_cwd = guard.get(parent_index).cwd;
    let parent_name = guard.get(parent_index).name;

    let placeholder_as = guard.get(child_index).address_space;
    let Some(copied_as) = platform.copy_user_vm(parent_as, parent_size) else {
        platform.free_user_vm(placeholder_as);
        let child = guard.get_mut(child_index);
        child.kernel_stack = None;
        child.reset_to_unused();
        return Err(TaskError::Allocation);
    };
    platform.free_user_vm(placeholder_as);

    let mut open_files = [None; NOFILE];
    for (i, file) in parent_open_files.iter().enumerate() {
        if let Some(handle) = file {
            open_files[i] = Some(platform.file_dup(*handle));
        }
    }
    let cwd = parent_cwd.map(|c| platform.inode_dup(c));

    let child = guard.get_mut(child_index);
    child.address_space = copied_as;
    child.size = parent_size;
    child.trapframe = parent_trapframe;
    child.trapframe.a0 = 0;
    child.open_files = open_files;
    child.cwd = cwd;
    child.name = parent_name;
    child.parent = Some(parent);
    child.state = TaskState::Runnable;

    Ok(child_pid)
}

/// Terminates the calling process (spec §4.5 "exit"). Reparents its
/// children to the init process, wakes a parent that may be waiting, and
/// becomes a zombie carrying `status` for `wait` to collect.
///
/// Only valid for a process slot (`user_stack_top.is_none()`); a thread
/// must call `thread::thread_exit` instead. Panics if called by the init
/// process itself, exactly as the teacher's `exit` does.
pub fn exit(table: &TaskTable, cpu: &mut Cpu, platform: &impl Platform, status: i32) -> ! {
    let mut guard = table.lock();
    cpu.push_intr_off(true);

    let pid = cpu.current.expect("exit: no current task");
    let index = guard.find_index(pid).expect("exit: current task missing");
    assert!(!guard.get(index).is_thread(), "exit: called by a thread");
    assert_ne!(pid.get(), INIT_PID, "exit: init exiting");

    let is_last = guard
        .get(index)
        .release_group
        .as_ref()
        .expect("exit: process slot missing its release group")
        .leave();
    if is_last {
        close_group_resources(&mut guard, platform, index);
    }

    // Reparenting runs unconditionally (every non-init process has a
    // parent); init is woken whenever a child actually moved to it, since
    // that child may already be a zombie init's own `wait` hasn't seen yet
    // (spec §4.5: "waking init if any such child is already ZOMBIE").
    if guard.reparent(pid, Pid::new(INIT_PID)) {
        wakeup_locked(&mut guard, cpu, Channel::of_task(Pid::new(INIT_PID)));
    }
    // The parent is only woken here if this exit was the one that actually
    // released the group's resources; if live threads remain, the last one
    // to exit wakes the parent instead (spec §4.5/§4.6, mirroring the
    // teacher lineage's `exit`, which only calls `wakeup1(proc->parent)`
    // inside its `!is_thread_running` branch).
    if is_last {
        if let Some(parent) = guard.get(index).parent {
            wakeup_locked(&mut guard, cpu, Channel::of_task(parent));
        }
    }

    guard.get_mut(index).exit_status = status;
    guard.get_mut(index).state = TaskState::Zombie;

    sched(&mut guard, cpu, platform);
    unreachable!("exit: scheduler switched back into a zombie task");
}

/// Waits for a child process to exit (spec §4.5 "wait"). Reaps the first
/// zombie child found, frees its address space, and resets its slot to
/// `UNUSED`. `out_addr`, if given, is where the child's exit status is
/// copied into the caller's own address space.
pub fn wait(
    table: &TaskTable,
    cpu: &mut Cpu,
    platform: &impl Platform,
    out_addr: Option<u64>,
) -> Result<(Pid, i32), TaskError> {
    loop {
        let mut guard = table.lock();
        cpu.push_intr_off(true);

        let pid = cpu.current.expect("wait: no current task");
        let self_index = guard.find_index(pid).expect("wait: current task missing");
        let self_as = guard.get(self_index).address_space;

        let mut zombie_child = None;
        let mut has_children = false;
        for index in 0..guard.tasks.len() {
            let task = guard.get(index);
            if task.parent == Some(pid) && !task.is_thread() {
                has_children = true;
                if task.state == TaskState::Zombie {
                    zombie_child = Some(index);
                    break;
                }
            }
        }

        if let Some(child_index) = zombie_child {
            let child_pid = guard
                .get(child_index)
                .pid
                .expect("wait: zombie child has no pid");
            let status = guard.get(child_index).exit_status;

            if let Some(va) = out_addr {
                if platform.copy_out(self_as, va, &status.to_ne_bytes()).is_err() {
                    cpu.pop_intr_off();
                    return Err(TaskError::PageFault);
                }
            }
            platform.free_user_vm(guard.get(child_index).address_space);
            guard.get_mut(child_index).kernel_stack = None;
            guard.get_mut(child_index).reset_to_unused();
            cpu.pop_intr_off();
            return Ok((child_pid, status));
        }

        if !has_children {
            cpu.pop_intr_off();
            return Err(TaskError::NoChildren);
        }
        if guard.get(self_index).killed {
            cpu.pop_intr_off();
            return Err(TaskError::Killed);
        }

        guard.get_mut(self_index).sleep_channel = Some(Channel::of_task(pid));
        guard.get_mut(self_index).state = TaskState::Sleeping;
        sched(&mut guard, cpu, platform);
        guard.get_mut(self_index).sleep_channel = None;
        cpu.pop_intr_off();
    }
}

/// Grows or shrinks the calling task's address space by `delta` bytes
/// (spec §4.5 "grow"; negative `delta` shrinks). Returns the new size.
pub fn grow(table: &TaskTable, cpu: &Cpu, platform: &impl Platform, delta: i64) -> Result<u64, TaskError> {
    let mut guard = table.lock();
    let pid = cpu.current.expect("grow: no current task");
    let index = guard.find_index(pid).expect("grow: current task missing");

    let old_size = guard.get(index).size;
    let address_space = guard.get(index).address_space;

    let new_size = match delta.cmp(&0) {
        core::cmp::Ordering::Greater => {
            let target = old_size + delta as u64;
            platform
                .grow_user_vm(address_space, old_size, target)
                .ok_or(TaskError::Allocation)?
        }
        core::cmp::Ordering::Less => {
            let target = old_size.saturating_sub((-delta) as u64);
            platform.shrink_user_vm(address_space, old_size, target)
        }
        core::cmp::Ordering::Equal => old_size,
    };

    guard.get_mut(index).size = new_size;
    Ok(new_size)
}
