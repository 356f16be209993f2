//! Interrupt dispatch.
//!
//! One slot per interrupt level, each holding either the default handler
//! or a chain of registered handlers invoked in insertion order. The
//! default handler reports the trap and halts; the bus-error and
//! address-error paths additionally dump the architecture's fault frame.
//!
//! All table mutation and dispatch runs with preemption disabled.

use alloc::vec::Vec;

use muon_core::cpu::Cpu;
use muon_core::format::{Arg, format};
use muon_core::sync::{SpinLock, preempt_guard};
use muon_core::{KernelError, kprint, kprintln};
use muon_mm::extent;

/// Highest valid interrupt level. Level 0 is reserved ("no interrupt").
pub const IRQL_MAX: u32 = 255;

/// A registered interrupt handler: function plus its context word.
pub type IrqHandlerFn = fn(irql: u32, data: usize);

#[derive(Clone, Copy, PartialEq, Eq)]
struct Handler {
    func: IrqHandlerFn,
    data: usize,
}

struct Slot {
    /// Registered handlers, invoked head-first. Empty means the default
    /// handler owns the level.
    chain: Vec<Handler>,
}

/// The interrupt dispatch table.
pub struct IrqTable {
    slots: Vec<Slot>,
    default: fn(u32),
}

impl IrqTable {
    /// Creates a table with `default` installed on every level.
    pub fn new(default: fn(u32)) -> Self {
        let mut slots = Vec::with_capacity(IRQL_MAX as usize + 1);
        slots.resize_with(IRQL_MAX as usize + 1, || Slot { chain: Vec::new() });
        Self { slots, default }
    }

    fn slot_mut(&mut self, irql: u32) -> Result<&mut Slot, KernelError> {
        if irql == 0 || irql > IRQL_MAX {
            return Err(KernelError::InvalidArgument);
        }
        Ok(&mut self.slots[irql as usize])
    }

    /// Registers a handler on `irql`.
    ///
    /// Replaces the default handler if it currently owns the level,
    /// otherwise appends to the chain (handlers run in insertion order).
    pub fn add_handler(
        &mut self,
        irql: u32,
        data: usize,
        func: IrqHandlerFn,
    ) -> Result<(), KernelError> {
        self.slot_mut(irql)?.chain.push(Handler { func, data });
        Ok(())
    }

    /// Deregisters a handler: the first chain entry with a matching
    /// function (and matching data, when `data` is given) is spliced out.
    /// Removing the last handler reinstates the default.
    ///
    /// # Errors
    ///
    /// `NotFound` if no entry matches.
    pub fn remove_handler(
        &mut self,
        irql: u32,
        func: IrqHandlerFn,
        data: Option<usize>,
    ) -> Result<(), KernelError> {
        let slot = self.slot_mut(irql)?;
        let pos = slot
            .chain
            .iter()
            .position(|h| h.func == func && data.is_none_or(|d| d == h.data))
            .ok_or(KernelError::NotFound)?;
        slot.chain.remove(pos);
        Ok(())
    }

    /// Discards any chain on `irql` and reinstates the default handler.
    pub fn set_default_handler(&mut self, irql: u32) -> Result<(), KernelError> {
        self.slot_mut(irql)?.chain.clear();
        Ok(())
    }

    /// Whether the default handler owns `irql`.
    pub fn is_default(&self, irql: u32) -> bool {
        self.slots
            .get(irql as usize)
            .is_none_or(|s| s.chain.is_empty())
    }

    /// Routes one interrupt: invokes every chained handler in order, or
    /// the default handler if none are registered.
    pub fn dispatch(&self, irql: u32) {
        let Some(slot) = self.slots.get(irql as usize) else {
            return;
        };
        if slot.chain.is_empty() {
            (self.default)(irql);
            return;
        }
        for handler in &slot.chain {
            (handler.func)(irql, handler.data);
        }
    }
}

// ── Trap reporting ──────────────────────────────────────────────────────

/// The register file captured at a trap.
#[derive(Debug, Clone, Default)]
pub struct TrapFrame {
    /// Program counter at the fault.
    pub pc: usize,
    /// Status register.
    pub status: u32,
    /// General-purpose registers.
    pub gpr: [usize; 16],
    /// Supervisor stack pointer.
    pub stack_ptr: usize,
    /// User stack pointer.
    pub user_stack_ptr: usize,
}

/// Architecture-specific extra state for bus and address errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInfo {
    /// Special-status word.
    pub special_status: u16,
    /// The faulting address.
    pub fault_addr: usize,
    /// Data-buffer contents at the fault.
    pub data_buffer: u32,
    /// Instruction-buffer contents at the fault.
    pub instr_buffer: u32,
}

/// Classification of a fatal CPU exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// External bus error.
    BusError,
    /// Misaligned access.
    AddressError,
    /// Undefined opcode.
    IllegalInstruction,
    /// Integer division by zero.
    DivideByZero,
    /// Any other vector, by number.
    Vector(u32),
}

impl FaultClass {
    /// The class name printed in trap reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BusError => "bus error",
            Self::AddressError => "address error",
            Self::IllegalInstruction => "illegal instruction",
            Self::DivideByZero => "divide by zero",
            Self::Vector(_) => "unhandled exception",
        }
    }
}

// ── Global table ────────────────────────────────────────────────────────

static TABLE: SpinLock<Option<IrqTable>> = SpinLock::new(None);
static TRAP_CPU: SpinLock<Option<&'static dyn Cpu>> = SpinLock::new(None);

/// Builds the global dispatch table with the default handler on every
/// level. Architecture-specific vector setup is the CPU port's business
/// and happens before this kernel code runs.
///
/// # Panics
///
/// Panics if the table already exists.
pub fn init(cpu: &'static dyn Cpu) {
    *TRAP_CPU.lock() = Some(cpu);
    let mut table = TABLE.lock();
    assert!(table.is_none(), "IRQ table already initialised");
    *table = Some(IrqTable::new(default_handler));
}

fn with_table<R>(f: impl FnOnce(&mut IrqTable) -> R) -> Result<R, KernelError> {
    let _guard = preempt_guard();
    let mut table = TABLE.lock();
    Ok(f(table.as_mut().ok_or(KernelError::NotFound)?))
}

/// Registers a handler on `irql` in the global table.
pub fn add_handler(irql: u32, data: usize, func: IrqHandlerFn) -> Result<(), KernelError> {
    with_table(|t| t.add_handler(irql, data, func))?
}

/// Deregisters a handler from the global table.
pub fn remove_handler(irql: u32, func: IrqHandlerFn, data: Option<usize>) -> Result<(), KernelError> {
    with_table(|t| t.remove_handler(irql, func, data))?
}

/// Reinstates the default handler on `irql` in the global table.
pub fn set_default_handler(irql: u32) -> Result<(), KernelError> {
    with_table(|t| t.set_default_handler(irql))?
}

/// Routes one interrupt through the global table.
pub fn dispatch(irql: u32) {
    let _guard = preempt_guard();
    let table = TABLE.lock();
    if let Some(table) = table.as_ref() {
        table.dispatch(irql);
    }
}

/// The default handler: report and halt.
fn default_handler(irql: u32) {
    fatal_trap(FaultClass::Vector(irql), &TrapFrame::default(), None);
}

/// Reports a fatal CPU exception and halts.
///
/// Prints the class name and register file; the stacks are dumped only
/// when their pointers are aligned and lie within a RAM extent. Bus and
/// address errors carry the architecture's fault frame as well.
pub fn fatal_trap(class: FaultClass, frame: &TrapFrame, fault: Option<&FaultInfo>) -> ! {
    let cpu = (*TRAP_CPU.lock()).expect("trap before IRQ init");
    cpu.disable_interrupts();

    if let FaultClass::Vector(vector) = class {
        kprintln!("\n{} {}", class.name(), vector);
    } else {
        kprintln!("\n{}", class.name());
    }

    kprint!(
        "{}",
        format(
            "PC=%08x SR=%08x SSP=%08x USP=%08x\n",
            &[
                Arg::Uint(frame.pc as u64),
                Arg::Uint(u64::from(frame.status)),
                Arg::Uint(frame.stack_ptr as u64),
                Arg::Uint(frame.user_stack_ptr as u64),
            ],
        )
    );
    for (i, pair) in frame.gpr.chunks(2).enumerate() {
        kprint!(
            "{}",
            format(
                "R%-2u=%08x R%-2u=%08x\n",
                &[
                    Arg::Uint(2 * i as u64),
                    Arg::Uint(pair[0] as u64),
                    Arg::Uint(2 * i as u64 + 1),
                    Arg::Uint(pair[1] as u64),
                ],
            )
        );
    }

    if let Some(fault) = fault {
        kprint!(
            "{}",
            format(
                "SSW=%04x ADDR=%08x DB=%08x IB=%08x\n",
                &[
                    Arg::Uint(u64::from(fault.special_status)),
                    Arg::Uint(fault.fault_addr as u64),
                    Arg::Uint(u64::from(fault.data_buffer)),
                    Arg::Uint(u64::from(fault.instr_buffer)),
                ],
            )
        );
    }

    dump_stack("supervisor stack", frame.stack_ptr);
    dump_stack("user stack", frame.user_stack_ptr);

    cpu.halt();
}

/// Hex-dumps a few words of stack, if the pointer looks safe to read.
fn dump_stack(label: &str, sp: usize) {
    const DUMP_WORDS: usize = 8;

    if sp == 0 || sp % core::mem::size_of::<u32>() != 0 || !extent::addr_in_ram(sp) {
        return;
    }

    kprintln!("{}:", label);
    for i in 0..DUMP_WORDS {
        let addr = sp + i * core::mem::size_of::<u32>();
        if !extent::addr_in_ram(addr) {
            break;
        }
        // SAFETY: the address is aligned and inside a RAM extent.
        let word = unsafe { core::ptr::read_volatile(addr as *const u32) };
        kprint!(
            "{}",
            format(
                "  %08x: %08x\n",
                &[Arg::Uint(addr as u64), Arg::Uint(u64::from(word))],
            )
        );
    }
}
