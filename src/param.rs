//! Compile-time kernel parameters.
//!
//! File-system and device parameters (`NFILE`, `NINODE`, `LOGSIZE`, ...) belong to the
//! VFS/log layer, an external collaborator of this crate (see `hal`); only the parameters
//! the scheduling core itself needs are kept here.

/// Maximum number of tasks (processes and threads together) live at once.
pub const NPROC: usize = 64;
/// Maximum number of CPUs.
pub const NCPU: usize = 8;
/// Maximum number of open files per task.
pub const NOFILE: usize = 16;
/// Size, in bytes, of a task's kernel stack.
pub const KSTACK_SIZE: usize = 4096;
/// Page size, in bytes, used to size and align kernel stacks and user stacks.
pub const PAGE_SIZE: u64 = 4096;
/// Length, in bytes, of a task's short human-readable name.
pub const TASK_NAME_LEN: usize = 16;
