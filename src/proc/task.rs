//! The task slot: spec §3's data model.

use crate::hal::{AddressSpace, CwdHandle, FileHandle, KernelStack};
use crate::param::{NOFILE, TASK_NAME_LEN};
use core::sync::atomic::{AtomicU32, Ordering};

use super::context::Context;
use super::trapframe::Trapframe;

/// A task's process id. Strictly positive; `0` is never issued (spec §3:
/// "`pid` values issued are strictly monotonically increasing from 1").
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(core::num::NonZeroI32);

impl Pid {
    pub(crate) fn new(value: i32) -> Pid {
        Pid(core::num::NonZeroI32::new(value).expect("pid must be nonzero"))
    }

    pub fn get(self) -> i32 {
        self.0.get()
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// An opaque wait key for `sleep`/`wakeup` (spec §4.4, §9 "Sleep channel").
///
/// A real address in the teacher; here a newtype over an arbitrary stable
/// token, since this crate's tasks have no real address space of their own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Channel(pub u64);

impl Channel {
    /// Derives a channel from a task's own slot, used by `wait` to sleep "on
    /// the caller's own slot address" and by `join` to sleep "on the address
    /// of the target slot's `pid` field".
    pub fn of_task(pid: Pid) -> Channel {
        Channel(0x5441_534b_0000_0000 | (pid.get() as u32 as u64))
    }

    /// Derives a channel from the target thread's pid, for `join` to sleep on
    /// "the address of the target slot's `pid` field" (spec §4.6).
    pub fn of_thread_pid(pid: Pid) -> Channel {
        Channel::of_task(pid)
    }

    /// The well-known channel every sleeping-for-`n`-ticks caller waits on,
    /// standing in for the teacher's `&ticks` (a single static the trap
    /// layer wakes every tick interrupt).
    pub fn ticks() -> Channel {
        Channel(0x5449_434b_0000_0000)
    }
}

/// Lifecycle state of a task slot (spec §3 "Lifecycle").
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl TaskState {
    pub fn name(self) -> &'static str {
        match self {
            TaskState::Unused => "unused",
            TaskState::Embryo => "embryo",
            TaskState::Sleeping => "sleeping",
            TaskState::Runnable => "runnable",
            TaskState::Running => "running",
            TaskState::Zombie => "zombie",
        }
    }
}

/// The release group a process and its live threads belong to (spec §9,
/// "Resolved — last-thread cleanup"). Lives on the *process* slot (the one
/// with `user_stack_top == None`); threads look their parent's up.
///
/// Seeded at 1 for the process itself; `clone` increments it before the new
/// thread is made runnable. `exit` and `thread_exit` both decrement it
/// exactly once each, and whichever caller observes it reach zero performs
/// the group's single files/cwd teardown. A plain `AtomicU32` makes
/// "exactly one winner" a property of `fetch_sub`, not of fragile scanning.
#[derive(Debug, Default)]
pub struct ReleaseGroup {
    live_members: AtomicU32,
}

impl ReleaseGroup {
    pub fn new() -> ReleaseGroup {
        ReleaseGroup {
            live_members: AtomicU32::new(1),
        }
    }

    /// Called by `clone` when adding a thread to the group.
    pub fn add_member(&self) {
        self.live_members.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by `exit` (for the process itself) or `thread_exit` (for a
    /// thread) when that member is leaving the group. Returns `true` exactly
    /// once, for whichever caller drives the count to zero.
    #[must_use]
    pub fn leave(&self) -> bool {
        self.live_members.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn live_count(&self) -> u32 {
        self.live_members.load(Ordering::Acquire)
    }
}

/// One slot of the fixed task table (spec §3).
pub struct Task {
    pub state: TaskState,
    pub pid: Option<Pid>,
    pub parent: Option<Pid>,

    pub address_space: AddressSpace,
    pub size: u64,
    pub kernel_stack: Option<KernelStack>,
    pub trapframe: Trapframe,
    pub context: Context,

    pub sleep_channel: Option<Channel>,
    pub killed: bool,
    /// Exit status handed to `exit`, read back by a parent's `wait` (spec
    /// §4.5). Unused on thread slots, which use `thread_return` instead.
    pub exit_status: i32,

    pub open_files: [Option<FileHandle>; NOFILE],
    pub cwd: Option<CwdHandle>,
    pub name: arrayvec::ArrayString<TASK_NAME_LEN>,

    /// Thread-only: top of the caller-supplied user stack. `None` for
    /// processes (spec §3: "A task with null `user_stack_top` is a
    /// **process**").
    pub user_stack_top: Option<u64>,
    /// Thread-only: the value captured at `thread_exit`.
    pub thread_return: u64,

    /// Present only on process slots (`user_stack_top.is_none()`); `None` on
    /// thread slots, which consult their parent's instead.
    pub release_group: Option<ReleaseGroup>,
}

impl Task {
    pub fn new() -> Task {
        Task {
            state: TaskState::Unused,
            pid: None,
            parent: None,
            address_space: 0,
            size: 0,
            kernel_stack: None,
            trapframe: Trapframe::new(),
            context: Context::new(),
            sleep_channel: None,
            killed: false,
            exit_status: 0,
            open_files: [None; NOFILE],
            cwd: None,
            name: arrayvec::ArrayString::new(),
            user_stack_top: None,
            thread_return: 0,
            release_group: None,
        }
    }

    /// A slot is `UNUSED` iff `pid == 0` and `kernel_stack` is null (spec §3).
    pub fn is_unused(&self) -> bool {
        matches!(self.state, TaskState::Unused)
    }

    /// A task with non-null `user_stack_top` is a thread (spec §3).
    pub fn is_thread(&self) -> bool {
        self.user_stack_top.is_some()
    }

    /// Resets a reaped slot back to the `UNUSED` state, per the
    /// "zero its identity fields" step shared by `wait` and `join`.
    pub fn reset_to_unused(&mut self) {
        self.state = TaskState::Unused;
        self.pid = None;
        self.parent = None;
        self.address_space = 0;
        self.size = 0;
        self.kernel_stack = None;
        self.trapframe = Trapframe::new();
        self.context = Context::new();
        self.sleep_channel = None;
        self.killed = false;
        self.exit_status = 0;
        self.open_files = [None; NOFILE];
        self.cwd = None;
        self.name.clear();
        self.user_stack_top = None;
        self.thread_return = 0;
        self.release_group = None;
    }
}

impl Default for Task {
    fn default() -> Task {
        Task::new()
    }
}
