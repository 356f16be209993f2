//! Round-robin scheduler.
//!
//! Single CPU, cooperative plus preemptive: the periodic tick rotates the
//! run queue (unless preemption is disabled), and processes yield
//! voluntarily through the sleep calls or by exiting. Queue bookkeeping
//! lives in [`Scheduler`], which is plain state; the architecture's
//! [`Cpu`] implementation performs the actual register switching.

use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use muon_core::cpu::{ContextInit, Cpu};
use muon_core::sync::{SpinLock, preempt_enabled, preempt_guard};
use muon_core::{KernelError, path, time};

use crate::process::{
    DEFAULT_FILE_PERM, Pid, ProcFlags, ProcState, Process, ProcessSpec, Stack,
};

/// Scheduler state: the process table and the three queues.
pub struct Scheduler {
    cpu: &'static dyn Cpu,
    procs: BTreeMap<Pid, Process>,
    run_queue: VecDeque<Pid>,
    sleep_queue: Vec<Pid>,
    exited_queue: Vec<Pid>,
    current: Option<Pid>,
    next_pid: u32,
    context_switches: u64,
}

impl Scheduler {
    /// Creates a scheduler with an empty process table.
    pub fn new(cpu: &'static dyn Cpu) -> Self {
        Self {
            cpu,
            procs: BTreeMap::new(),
            run_queue: VecDeque::new(),
            sleep_queue: Vec::new(),
            exited_queue: Vec::new(),
            current: None,
            next_pid: 0,
            context_switches: 0,
        }
    }

    /// The CPU this scheduler drives.
    pub fn cpu(&self) -> &'static dyn Cpu {
        self.cpu
    }

    /// Creates a process and appends it to the run-queue tail.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-absolute explicit working directory, a
    /// zero-length user stack on a non-kernel process, a missing entry
    /// point, or (via the CPU) a misaligned entry point or stack top.
    pub fn create(&mut self, spec: &ProcessSpec<'_>) -> Result<Pid, KernelError> {
        if let Some(wd) = spec.cwd {
            if !path::is_absolute(wd) {
                return Err(KernelError::InvalidArgument);
            }
        }

        let ustack = if spec.user_stack_len > 0 {
            Some(Stack::new(spec.user_stack_len))
        } else {
            // Only kernel processes may run without a user stack.
            if !spec.flags.contains(ProcFlags::KERNEL) {
                return Err(KernelError::InvalidArgument);
            }
            None
        };
        let kstack = Stack::new(crate::process::KERNEL_STACK_LEN);

        let entry = spec
            .entry
            .or(spec.image.map(|img| img.entry))
            .ok_or(KernelError::InvalidArgument)?;

        let cwd = match spec.cwd {
            Some(wd) => path::canonicalize(wd),
            None => match spec.parent.and_then(|p| self.procs.get(&p)) {
                Some(parent) => parent.cwd.clone(),
                None => String::from(path::ROOT),
            },
        };

        let context = self.cpu.init_context(&ContextInit {
            entry,
            arg: spec.arg,
            kernel_stack_top: kstack.top(),
            user_stack_top: ustack.as_ref().map(Stack::top),
            supervisor: spec.flags.contains(ProcFlags::KERNEL),
        })?;

        let id = Pid(self.next_pid);
        self.next_pid += 1;

        self.procs.insert(
            id,
            Process {
                id,
                state: ProcState::Runnable,
                uid: spec.uid,
                gid: spec.gid,
                name: String::from(spec.name),
                parent: spec.parent,
                exit_code: None,
                kstack,
                ustack,
                cwd,
                default_perm: DEFAULT_FILE_PERM,
                image: spec.image,
                arg: spec.arg,
                context,
                flags: spec.flags,
            },
        );
        self.run_queue.push_back(id);

        if self.current.is_none() {
            self.current = Some(id);
        }

        Ok(id)
    }

    /// The currently executing process.
    pub fn current(&self) -> Option<&Process> {
        self.current.and_then(|id| self.procs.get(&id))
    }

    /// The current process id.
    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    /// Borrows a process record.
    pub fn process(&self, id: Pid) -> Option<&Process> {
        self.procs.get(&id)
    }

    /// Mutably borrows a process record.
    pub fn process_mut(&mut self, id: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&id)
    }

    /// Number of context switches performed since boot.
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Marks the current process sleeping. The caller must follow up with
    /// a context switch; the process runs again only after [`wake`].
    ///
    /// [`wake`]: Self::wake
    pub fn mark_current_sleeping(&mut self) {
        if let Some(id) = self.current {
            if let Some(proc) = self.procs.get_mut(&id) {
                proc.state = ProcState::Sleeping;
            }
            self.reschedule();
        }
    }

    /// Wakes a sleeping process: moves it from the sleep queue to the
    /// run-queue tail.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if `id` is not asleep.
    pub fn wake(&mut self, id: Pid) -> Result<(), KernelError> {
        let pos = self
            .sleep_queue
            .iter()
            .position(|&p| p == id)
            .ok_or(KernelError::NotFound)?;
        self.sleep_queue.remove(pos);
        if let Some(proc) = self.procs.get_mut(&id) {
            proc.state = ProcState::Runnable;
        }
        self.run_queue.push_back(id);
        Ok(())
    }

    /// Records the current process's exit. The record moves to the exited
    /// queue at the next rotation and is freed by [`reap`](Self::reap);
    /// the process never runs again.
    pub fn mark_current_exited(&mut self, exit_code: i32) {
        if let Some(id) = self.current {
            if let Some(proc) = self.procs.get_mut(&id) {
                proc.state = ProcState::Exited;
                proc.exit_code = Some(exit_code);
            }
            self.reschedule();
        }
    }

    /// Rotates the run queue and selects the next process.
    ///
    /// The head is re-queued at the tail if still runnable, or parked on
    /// the sleep/exited queue otherwise. Returns whether the selection
    /// changed (a context switch is due).
    pub fn reschedule(&mut self) -> bool {
        // Park or rotate the head until a runnable process leads.
        while let Some(&head) = self.run_queue.front() {
            match self.procs.get(&head).map(|p| p.state) {
                Some(ProcState::Runnable) => {
                    if Some(head) == self.current {
                        // Rotate the current head to the tail and stop at
                        // whatever leads now.
                        self.run_queue.rotate_left(1);
                    }
                    break;
                }
                Some(ProcState::Sleeping) => {
                    self.run_queue.pop_front();
                    self.sleep_queue.push(head);
                }
                Some(ProcState::Exited) => {
                    self.run_queue.pop_front();
                    self.exited_queue.push(head);
                }
                None => {
                    self.run_queue.pop_front();
                }
            }
        }

        let next = self.run_queue.front().copied();
        let changed = next != self.current;
        if changed {
            self.context_switches += 1;
        }
        self.current = next;
        changed
    }

    /// Frees the records of exited processes: their stacks, image and the
    /// record itself.
    pub fn reap(&mut self) {
        for id in self.exited_queue.drain(..) {
            self.procs.remove(&id);
        }
    }

    /// Number of live (non-reaped) processes.
    pub fn process_count(&self) -> usize {
        self.procs.len()
    }
}

// ── Global scheduler ────────────────────────────────────────────────────

static SCHED: SpinLock<Option<Scheduler>> = SpinLock::new(None);

fn yield_hook() {
    switch_now();
}

/// Initialises the global scheduler, creates the system process (the
/// execution context that called this), and installs the scheduler's
/// yield hook.
///
/// # Panics
///
/// Panics if the scheduler already exists.
pub fn init(cpu: &'static dyn Cpu, system_name: &str) -> Result<Pid, KernelError> {
    let mut sched = SCHED.lock();
    assert!(sched.is_none(), "scheduler already initialised");

    let mut s = Scheduler::new(cpu);
    let pid = s.create(&ProcessSpec {
        uid: 0,
        gid: 0,
        name: system_name,
        image: None,
        // The system process is already running; its context is captured
        // at the first switch away from it. The entry recorded here is
        // never jumped to.
        entry: Some(system_entry as usize),
        arg: 0,
        user_stack_len: 0,
        flags: ProcFlags::KERNEL,
        cwd: Some(path::ROOT),
        parent: None,
    })?;
    *sched = Some(s);
    drop(sched);

    muon_core::sync::set_yield_fn(yield_hook);
    Ok(pid)
}

/// Placeholder entry recorded for the system process.
fn system_entry(_arg: usize) {}

/// Runs `f` with the global scheduler.
///
/// # Panics
///
/// Panics if the scheduler has not been initialised.
pub fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let _guard = preempt_guard();
    let mut sched = SCHED.lock();
    f(sched.as_mut().expect("scheduler not initialised"))
}

/// Whether the global scheduler exists yet.
pub fn is_initialised() -> bool {
    SCHED.lock().is_some()
}

/// Creates a process in the global scheduler.
pub fn create(spec: &ProcessSpec<'_>) -> Result<Pid, KernelError> {
    with_sched(|s| s.create(spec))
}

/// The current process id; `Pid(0)` before the scheduler exists.
pub fn current_pid() -> Pid {
    if !is_initialised() {
        return Pid(0);
    }
    with_sched(|s| s.current_pid()).unwrap_or(Pid(0))
}

/// The current process's uid; 0 (supervisor) before the scheduler exists.
pub fn current_uid() -> u16 {
    if !is_initialised() {
        return 0;
    }
    with_sched(|s| s.current().map_or(0, |p| p.uid))
}

/// The current process's working directory.
pub fn current_cwd() -> String {
    if !is_initialised() {
        return String::from(path::ROOT);
    }
    with_sched(|s| {
        s.current()
            .map_or_else(|| String::from(path::ROOT), |p| p.cwd.clone())
    })
}

/// Replaces the working directory of a process (the current one if `pid`
/// is `None`); the path is canonicalised.
pub fn set_cwd(pid: Option<Pid>, dir: &str) -> Result<(), KernelError> {
    if !path::is_absolute(dir) {
        return Err(KernelError::InvalidArgument);
    }
    with_sched(|s| {
        let id = pid.or(s.current_pid()).ok_or(KernelError::NotFound)?;
        let proc = s.process_mut(id).ok_or(KernelError::NotFound)?;
        proc.cwd = path::canonicalize(dir);
        Ok(())
    })
}

fn switch_now() {
    if !is_initialised() {
        core::hint::spin_loop();
        return;
    }
    let cpu = with_sched(|s| {
        s.reschedule();
        s.cpu()
    });
    cpu.switch_context();
}

/// Puts the current process to sleep until [`wake`] is called for it.
pub fn sleep() {
    let cpu = with_sched(|s| {
        s.mark_current_sleeping();
        s.cpu()
    });
    cpu.switch_context();
}

/// Wakes a sleeping process. Safe to call from interrupt handlers.
pub fn wake(id: Pid) -> Result<(), KernelError> {
    with_sched(|s| s.wake(id))
}

/// Yields repeatedly until `secs` seconds of wall-clock time have passed.
///
/// The process stays on the run queue and burns its quantum on each lap;
/// it does not join the sleep queue.
pub fn sleep_for(secs: u64) {
    sleep_until(time::now() + secs);
}

/// Yields repeatedly until the wall clock reaches `when`.
pub fn sleep_until(when: u64) {
    while time::now() < when {
        switch_now();
    }
}

/// Terminates the current process with `exit_code`.
///
/// Returns only after a final context switch; on real hardware the
/// process never executes again and its resources are freed by the next
/// reaping pass.
pub fn exit(exit_code: i32) {
    let cpu = with_sched(|s| {
        s.mark_current_exited(exit_code);
        s.cpu()
    });
    cpu.switch_context();
}

/// Tick-driven preemption: rotate the run queue and reap exited
/// processes, honouring the preemption guard.
pub fn preempt_tick() {
    if !preempt_enabled() || !is_initialised() {
        return;
    }
    with_sched(|s| {
        s.reap();
        s.reschedule()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExeImage;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use muon_core::cpu::CpuContext;

    /// A CPU that records context activity instead of switching.
    struct MockCpu {
        switches: AtomicUsize,
    }

    impl Cpu for MockCpu {
        fn enable_interrupts(&self) {}
        fn disable_interrupts(&self) {}
        fn halt(&self) -> ! {
            unreachable!("mock cpu halt");
        }
        fn init_context(&self, init: &ContextInit) -> Result<CpuContext, KernelError> {
            let align = self.stack_alignment();
            if init.entry % 2 != 0 || init.kernel_stack_top % align != 0 {
                return Err(KernelError::InvalidArgument);
            }
            if let Some(top) = init.user_stack_top {
                if top % align != 0 {
                    return Err(KernelError::InvalidArgument);
                }
            }
            let mut ctx = CpuContext::default();
            ctx.pc = init.entry;
            ctx.stack_ptr = init.kernel_stack_top;
            ctx.user_stack_ptr = init.user_stack_top.unwrap_or(0);
            ctx.status = if init.supervisor { 0x2000 } else { 0 };
            ctx.gpr[0] = init.arg;
            Ok(ctx)
        }
        fn switch_context(&self) {
            self.switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    static CPU: MockCpu = MockCpu {
        switches: AtomicUsize::new(0),
    };

    fn spec<'a>(name: &'a str) -> ProcessSpec<'a> {
        ProcessSpec {
            uid: 0,
            gid: 0,
            name,
            image: None,
            entry: Some(0x4000),
            arg: 0,
            user_stack_len: 0,
            flags: ProcFlags::KERNEL,
            cwd: None,
            parent: None,
        }
    }

    fn sched_with(names: &[&str]) -> (Scheduler, Vec<Pid>) {
        let mut s = Scheduler::new(&CPU);
        let pids = names.iter().map(|n| s.create(&spec(n)).unwrap()).collect();
        (s, pids)
    }

    #[test]
    fn pids_increase_monotonically() {
        let (_s, pids) = sched_with(&["a", "b", "c"]);
        assert!(pids[0] < pids[1] && pids[1] < pids[2]);
    }

    #[test]
    fn first_process_becomes_current() {
        let (s, pids) = sched_with(&["a", "b"]);
        assert_eq!(s.current_pid(), Some(pids[0]));
    }

    #[test]
    fn round_robin_rotates_through_runnables() {
        let (mut s, pids) = sched_with(&["a", "b", "c"]);
        assert_eq!(s.current_pid(), Some(pids[0]));

        assert!(s.reschedule());
        assert_eq!(s.current_pid(), Some(pids[1]));
        assert!(s.reschedule());
        assert_eq!(s.current_pid(), Some(pids[2]));
        assert!(s.reschedule());
        assert_eq!(s.current_pid(), Some(pids[0]));
        assert_eq!(s.context_switches(), 3);
    }

    #[test]
    fn single_process_never_switches() {
        let (mut s, pids) = sched_with(&["only"]);
        assert!(!s.reschedule());
        assert_eq!(s.current_pid(), Some(pids[0]));
        assert_eq!(s.context_switches(), 0);
    }

    #[test]
    fn sleep_removes_from_rotation_until_wake() {
        let (mut s, pids) = sched_with(&["a", "b"]);

        s.mark_current_sleeping();
        assert_eq!(s.current_pid(), Some(pids[1]));
        assert_eq!(s.process(pids[0]).unwrap().state, ProcState::Sleeping);

        // Only b remains runnable.
        s.reschedule();
        assert_eq!(s.current_pid(), Some(pids[1]));

        s.wake(pids[0]).unwrap();
        assert_eq!(s.process(pids[0]).unwrap().state, ProcState::Runnable);
        s.reschedule();
        assert_eq!(s.current_pid(), Some(pids[0]));
    }

    #[test]
    fn wake_of_non_sleeper_is_not_found() {
        let (mut s, pids) = sched_with(&["a"]);
        assert_eq!(s.wake(pids[0]), Err(KernelError::NotFound));
        assert_eq!(s.wake(Pid(999)), Err(KernelError::NotFound));
    }

    #[test]
    fn exit_parks_and_reap_frees() {
        let (mut s, pids) = sched_with(&["a", "b"]);

        s.mark_current_exited(42);
        assert_eq!(s.current_pid(), Some(pids[1]));
        assert_eq!(s.process(pids[0]).unwrap().exit_code, Some(42));
        assert_eq!(s.process(pids[0]).unwrap().state, ProcState::Exited);

        assert_eq!(s.process_count(), 2);
        s.reap();
        assert_eq!(s.process_count(), 1);
        assert!(s.process(pids[0]).is_none());
    }

    #[test]
    fn user_process_requires_user_stack() {
        let mut s = Scheduler::new(&CPU);
        let mut user = spec("u");
        user.flags = ProcFlags::empty();
        user.user_stack_len = 0;
        assert_eq!(s.create(&user), Err(KernelError::InvalidArgument));

        user.user_stack_len = 4096;
        assert!(s.create(&user).is_ok());
    }

    #[test]
    fn explicit_cwd_must_be_absolute() {
        let mut s = Scheduler::new(&CPU);
        let mut p = spec("p");
        p.cwd = Some("relative/path");
        assert_eq!(s.create(&p), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn cwd_is_canonicalised_and_inherited() {
        let mut s = Scheduler::new(&CPU);
        let mut parent = spec("parent");
        parent.cwd = Some("/a//b/./c/../d/");
        let ppid = s.create(&parent).unwrap();
        assert_eq!(s.process(ppid).unwrap().cwd, "/a/b/d");

        let mut child = spec("child");
        child.parent = Some(ppid);
        let cpid = s.create(&child).unwrap();
        assert_eq!(s.process(cpid).unwrap().cwd, "/a/b/d");

        // No parent: root.
        let orphan = s.create(&spec("orphan")).unwrap();
        assert_eq!(s.process(orphan).unwrap().cwd, "/");
    }

    #[test]
    fn misaligned_entry_is_rejected() {
        let mut s = Scheduler::new(&CPU);
        let mut p = spec("odd");
        p.entry = Some(0x4001);
        assert_eq!(s.create(&p), Err(KernelError::InvalidArgument));
        // Nothing half-created is left behind.
        assert_eq!(s.process_count(), 0);
    }

    #[test]
    fn misaligned_user_stack_is_rejected() {
        let mut s = Scheduler::new(&CPU);
        let mut p = spec("odd-stack");
        p.flags = ProcFlags::empty();
        p.user_stack_len = 4097;
        assert_eq!(s.create(&p), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn entry_defaults_to_image_entry() {
        let mut s = Scheduler::new(&CPU);
        let mut p = spec("img");
        p.entry = None;
        p.image = Some(ExeImage {
            base: 0x8000,
            len: 0x1000,
            entry: 0x8010,
        });
        let pid = s.create(&p).unwrap();
        assert_eq!(s.process(pid).unwrap().context.pc, 0x8010);

        let mut q = spec("no-entry");
        q.entry = None;
        assert_eq!(s.create(&q), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn context_carries_mode_and_arg() {
        let mut s = Scheduler::new(&CPU);
        let mut k = spec("k");
        k.arg = 0xdead;
        let kp = s.create(&k).unwrap();
        let kctx = &s.process(kp).unwrap().context;
        assert_eq!(kctx.status, 0x2000);
        assert_eq!(kctx.gpr[0], 0xdead);

        let mut u = spec("u");
        u.flags = ProcFlags::empty();
        u.user_stack_len = 4096;
        let up = s.create(&u).unwrap();
        let uctx = &s.process(up).unwrap().context;
        assert_eq!(uctx.status, 0);
        assert_ne!(uctx.user_stack_ptr, 0);
    }
}
