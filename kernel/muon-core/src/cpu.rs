//! CPU collaborator interface.
//!
//! The kernel core is architecture-neutral: interrupt masking, halting and
//! context construction are provided by a per-target implementation of
//! [`Cpu`]. The scheduler validates entry points and stack tops before
//! asking the CPU to build a context, and calls
//! [`switch_context`](Cpu::switch_context) at every voluntary suspension
//! point.

use crate::KernelError;

/// A saved register image for one process.
///
/// The layout is owned by the architecture; the core treats the fields as
/// opaque storage filled in by [`Cpu::init_context`] and updated across
/// context switches.
#[derive(Debug, Clone, Default)]
pub struct CpuContext {
    /// Program counter.
    pub pc: usize,
    /// Processor status word (condition codes, privilege, interrupt mask).
    pub status: u32,
    /// Active (kernel) stack pointer.
    pub stack_ptr: usize,
    /// User stack pointer, 0 for kernel-only processes.
    pub user_stack_ptr: usize,
    /// General-purpose registers.
    pub gpr: [usize; 16],
}

/// Inputs to [`Cpu::init_context`].
#[derive(Debug, Clone, Copy)]
pub struct ContextInit {
    /// Entry point the process starts at.
    pub entry: usize,
    /// Argument delivered to the entry point.
    pub arg: usize,
    /// Top of the kernel stack.
    pub kernel_stack_top: usize,
    /// Top of the user stack, if the process has one.
    pub user_stack_top: Option<usize>,
    /// Whether the process runs in supervisor mode.
    pub supervisor: bool,
}

/// Operations every target CPU must provide.
pub trait Cpu: Send + Sync {
    /// Unmasks all interrupts.
    fn enable_interrupts(&self);

    /// Masks all interrupts.
    fn disable_interrupts(&self);

    /// Stops the CPU. Does not return.
    fn halt(&self) -> !;

    /// Required alignment for entry points and stack tops.
    fn stack_alignment(&self) -> usize {
        4
    }

    /// Builds the initial register image for a new process.
    ///
    /// The image must be arranged so that returning from an exception into
    /// it jumps to `init.entry` with `init.arg` on the stack, in user or
    /// supervisor mode per `init.supervisor`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] if the entry point or a
    /// stack top violates [`stack_alignment`](Self::stack_alignment).
    fn init_context(&self, init: &ContextInit) -> Result<CpuContext, KernelError>;

    /// Suspends the current process until the scheduler next selects it.
    fn switch_context(&self);
}
