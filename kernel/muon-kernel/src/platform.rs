//! Platform collaborator interface.
//!
//! A board port implements [`Platform`]: memory detection, device
//! enumeration, console bring-up and the small set of board facilities
//! (LEDs, serial number, reset). The boot flow drives these in a fixed
//! order and otherwise never touches hardware directly.

use bitflags::bitflags;

use muon_core::KernelError;
use muon_dev::device::DeviceId;
use muon_mm::extent::ExtentTable;

bitflags! {
    /// Board status LEDs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Leds: u8 {
        /// The red ("booting / fault") LED.
        const RED = 1 << 0;
        /// The green ("running") LED.
        const GREEN = 1 << 1;
    }
}

/// Boot stages that can fail before the console works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// `Platform::init` failed.
    PlatformInit,
    /// Memory detection failed.
    MemoryDetect,
    /// Device-tree initialisation failed.
    DeviceInit,
    /// Early console initialisation failed.
    EarlyConsoleInit,
    /// Platform device enumeration failed.
    DeviceEnumerate,
    /// Real console initialisation failed.
    ConsoleInit,
    /// Scheduler initialisation failed.
    SchedulerInit,
}

/// The operations a board port provides.
pub trait Platform: Send + Sync {
    /// The board's name, for the boot banner.
    fn name(&self) -> &'static str;

    /// Earliest board initialisation: chip selects, bus timing.
    fn init(&self) -> Result<(), KernelError>;

    /// Populates the extent table with every memory region.
    fn mem_detect(&self, extents: &mut ExtentTable) -> Result<(), KernelError>;

    /// First address of kernel RAM that boot may carve allocators from
    /// (everything below is kernel image and data).
    fn first_free_kernel_addr(&self) -> usize;

    /// Creates the device-tree nodes for the board's hardware.
    fn dev_enumerate(&self) -> Result<(), KernelError>;

    /// Brings up the real console; returns its device.
    fn console_init(&self) -> Result<DeviceId, KernelError>;

    /// The board serial number.
    fn serial_number(&self) -> Result<[u8; 6], KernelError> {
        Err(KernelError::NotSupported)
    }

    /// The CPU clock in Hz, when the board can measure it.
    fn cpu_clock_hz(&self) -> Result<u32, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Lights status LEDs.
    fn led_on(&self, leds: Leds) {
        let _ = leds;
    }

    /// Extinguishes status LEDs.
    fn led_off(&self, leds: Leds) {
        let _ = leds;
    }

    /// Hard-resets the board.
    fn reset(&self) -> !;

    /// Reports an early boot failure by board-specific means (LED blink
    /// codes) and halts.
    fn boot_fail(&self, stage: BootStage) -> !;
}
