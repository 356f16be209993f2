//! Process records.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;

use bitflags::bitflags;

use muon_core::cpu::CpuContext;

/// Kernel stack size for every process, in bytes.
pub const KERNEL_STACK_LEN: usize = 8 * 1024;

/// Default permission bits for files created by a new process.
pub const DEFAULT_FILE_PERM: u16 = 0o644;

/// Process identifier. Allocated monotonically, never reused within a boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

/// Scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// On the run queue, eligible for the CPU.
    Runnable,
    /// On the sleep queue until an explicit wake.
    Sleeping,
    /// Terminated; awaiting reaping.
    Exited,
}

bitflags! {
    /// Process creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u16 {
        /// Supervisor-mode process sharing the kernel address space.
        const KERNEL = 1 << 0;
    }
}

/// A loaded executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExeImage {
    /// Base address of the loaded image.
    pub base: usize,
    /// Image length in bytes.
    pub len: usize,
    /// Entry point address.
    pub entry: usize,
}

/// A stack buffer.
///
/// Backed by word-sized storage so the base is word-aligned; the top is
/// computed from the *requested* byte length, letting the CPU's context
/// initialiser reject a length that would misalign the stack pointer.
#[derive(Debug)]
pub struct Stack {
    words: Box<[usize]>,
    len: usize,
}

impl Stack {
    /// Allocates a zeroed stack of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0usize; len.div_ceil(core::mem::size_of::<usize>())].into_boxed_slice(),
            len,
        }
    }

    /// The initial stack pointer (stacks grow downwards).
    pub fn top(&self) -> usize {
        self.words.as_ptr() as usize + self.len
    }

    /// The requested stack size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the stack has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Inputs to process creation.
#[derive(Clone, Copy)]
pub struct ProcessSpec<'a> {
    /// Owning user.
    pub uid: u16,
    /// Owning group.
    pub gid: u16,
    /// Process name, e.g. `[net_rx eth0]`.
    pub name: &'a str,
    /// Preloaded executable image, if any.
    pub image: Option<ExeImage>,
    /// Entry point override; defaults to the image's entry point.
    pub entry: Option<usize>,
    /// Argument delivered to the entry point.
    pub arg: usize,
    /// User stack size in bytes; 0 is only valid for kernel processes.
    pub user_stack_len: usize,
    /// Creation flags.
    pub flags: ProcFlags,
    /// Working directory; `None` inherits from the parent (or `/`).
    pub cwd: Option<&'a str>,
    /// Parent process.
    pub parent: Option<Pid>,
}

/// One process record.
pub struct Process {
    /// Unique id.
    pub id: Pid,
    /// Scheduling state.
    pub state: ProcState,
    /// Owning user.
    pub uid: u16,
    /// Owning group.
    pub gid: u16,
    /// Process name.
    pub name: String,
    /// Parent process, if it still existed at creation time.
    pub parent: Option<Pid>,
    /// Exit code, set by `exit`.
    pub exit_code: Option<i32>,
    /// Kernel stack.
    pub kstack: Stack,
    /// User stack, absent for kernel-only processes.
    pub ustack: Option<Stack>,
    /// Current working directory, canonical absolute path.
    pub cwd: String,
    /// Default permission bits for created files.
    pub default_perm: u16,
    /// Loaded image backing this process, if any.
    pub image: Option<ExeImage>,
    /// Entry argument.
    pub arg: usize,
    /// Saved register image.
    pub context: CpuContext,
    /// Creation flags.
    pub flags: ProcFlags,
}

impl Process {
    /// Whether this is a supervisor-mode process.
    pub fn is_kernel(&self) -> bool {
        self.flags.contains(ProcFlags::KERNEL)
    }
}
