//! The external-collaborator boundary (spec §6).
//!
//! The virtual-memory subsystem, the physical-page allocator, the
//! file-descriptor/VFS/log layer, and the register-save `swtch` primitive are
//! all out of scope for this crate (spec §1) — the scheduling core only needs
//! to invoke a small, named set of operations on them. The teacher crate
//! reaches these as linked `extern "C"` functions (`proc_pagetable`,
//! `uvmalloc`, `filedup`, `swtch`, ...); here they are a single `Platform`
//! trait so the core can be driven under a hosted test binary with a mock
//! implementation instead of a cross-compiled kernel image (see
//! SPEC_FULL.md's REDESIGN FLAGS).

use crate::proc::context::Context;

/// Opaque handle to a page directory / address space.
///
/// Processes own one exclusively; threads share their parent's (see spec §3).
/// A value of `0` is never issued by a real `Platform` and is used as a
/// sentinel for "no address space yet" during embryo construction.
pub type AddressSpace = u64;

/// Opaque handle to an open file, as vended by the external file layer.
pub type FileHandle = u64;

/// Opaque handle to an inode used as a current-working-directory reference.
pub type CwdHandle = u64;

/// One physical page, as returned by the external allocator.
pub type Page = u64;

/// A task's kernel stack, exclusively owned by its slot.
///
/// Modelled as an opaque sized buffer rather than a raw pointer: the
/// scheduling core never interprets its bytes (that's the trap/register-save
/// glue's job), it only needs to own the allocation and know whether it
/// exists.
pub struct KernelStack {
    bytes: alloc::boxed::Box<[u8; crate::param::KSTACK_SIZE]>,
}

impl KernelStack {
    pub fn new(bytes: alloc::boxed::Box<[u8; crate::param::KSTACK_SIZE]>) -> KernelStack {
        KernelStack { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; crate::param::KSTACK_SIZE] {
        &self.bytes
    }

    /// Address one past the last byte of the stack — where a fresh task's
    /// `context.sp` must point so its first dispatch starts with an empty
    /// stack, mirroring the teacher's `p->context->sp = p->kstack + KSTACKSIZE`.
    pub fn top_addr(&self) -> u64 {
        self.bytes.as_ptr() as u64 + crate::param::KSTACK_SIZE as u64
    }
}

/// The operations this crate needs from its external collaborators.
///
/// Every method here corresponds 1:1 to a row of spec §6's table. Argument
/// names mirror the teacher's `extern "C"` declarations (`pgdir`, `oldsz`,
/// `newsz`) so the grounding is legible side by side.
pub trait Platform {
    /// Single-page physical allocation. Returns `None` when memory is
    /// exhausted.
    fn allocate_page(&self) -> Option<Page>;
    /// Returns a page to the physical allocator.
    fn free_page(&self, page: Page);

    /// Allocates a kernel stack for a newly allocated task slot.
    fn allocate_kernel_stack(&self) -> Option<KernelStack>;

    /// A new page directory containing only the kernel mappings.
    fn kernel_setup_vm(&self) -> Option<AddressSpace>;
    /// Installs the initial user image into a freshly created address space.
    fn init_user_vm(&self, pgdir: AddressSpace, image: &[u8]);
    /// Grows a user mapping from `oldsz` to `newsz`. Returns the new size.
    fn grow_user_vm(&self, pgdir: AddressSpace, oldsz: u64, newsz: u64) -> Option<u64>;
    /// Shrinks a user mapping from `oldsz` to `newsz`. Returns the new size.
    fn shrink_user_vm(&self, pgdir: AddressSpace, oldsz: u64, newsz: u64) -> u64;
    /// Deep-copies an address space of the given size, for `fork`.
    fn copy_user_vm(&self, pgdir: AddressSpace, size: u64) -> Option<AddressSpace>;
    /// Tears down an address space and frees its backing pages.
    fn free_user_vm(&self, pgdir: AddressSpace);
    /// Installs a task's address space on the current CPU.
    fn switch_user_vm(&self, pgdir: AddressSpace);
    /// Installs the kernel-only mapping, used between dispatching tasks.
    fn switch_kernel_vm(&self);
    /// Writes into a user address space. Fails if `va` is unmapped.
    fn copy_out(&self, pgdir: AddressSpace, va: u64, src: &[u8]) -> Result<(), ()>;

    /// Increments a file's reference count, returning the same handle.
    fn file_dup(&self, file: FileHandle) -> FileHandle;
    /// Decrements a file's reference count, closing it at zero.
    fn file_close(&self, file: FileHandle);
    /// Increments an inode's reference count, returning the same handle.
    fn inode_dup(&self, cwd: CwdHandle) -> CwdHandle;
    /// Decrements an inode's reference count, releasing it at zero.
    fn inode_put(&self, cwd: CwdHandle);
    /// Begins a log transaction (must be paired with `end_op`).
    fn begin_op(&self);
    /// Ends a log transaction started with `begin_op`.
    fn end_op(&self);

    /// Saves `old`'s callee-saved registers and loads `new`'s.
    fn swtch(&self, old: &mut Context, new: &Context);

    /// Number of timer-tick interrupts since boot, for `uptime`/`sleep(n)`
    /// (spec §6 syscall surface). The actual counter is owned by the
    /// trap/interrupt glue this crate treats as an external collaborator
    /// (§1) — mirroring the teacher's `crate::trap::ticks`, guarded there by
    /// its own `tickslock` rather than the scheduling core's global lock.
    fn ticks(&self) -> u64;
}
