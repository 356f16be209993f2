//! Ordered boot flow.
//!
//! Early stages (before the console works) fail hard through the
//! platform's boot-fail reporter; later stages log and continue where the
//! subsystem is optional. The order is load-bearing: allocators before
//! anything that allocates, the device tree before enumeration, the
//! scheduler before anything that spawns processes, the block cache and
//! partitions before the VFS mounts the root filesystem.

use alloc::boxed::Box;

use muon_core::cpu::Cpu;
use muon_core::sync::{SpinLock, preempt_disable, preempt_enable};
use muon_core::{KernelError, kerror, kinfo, kprint, time};
use muon_dev::device::{self, DeviceId};
use muon_dev::{block, partition};
use muon_driver_api::{Control, ControlData, DeviceClass, DeviceSubclass};
use muon_fs::ramfs::RAMFS;
use muon_fs::{driver as fs_driver, mount};
use muon_mm::extent::{self, ExtentFlags, ExtentTable};
use muon_mm::slab;
use muon_sched::scheduler;
use muon_sched::tick;

use crate::console;
use crate::irq;
use crate::kalloc;
use crate::platform::{BootStage, Leds, Platform};

/// Boot-time tunables.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Requested tick rate in Hz.
    pub tick_rate_hz: u32,
    /// Block-cache capacity in slots.
    pub block_cache_slots: usize,
    /// Bytes of kernel RAM reserved for the slab region.
    pub slab_region_len: usize,
    /// Bytes kept free at the top of kernel RAM for the boot stack.
    pub kernel_stack_reserve: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: tick::TICK_RATE_HZ,
            block_cache_slots: 2039,
            slab_region_len: 16 * slab::SLAB_SIZE,
            kernel_stack_reserve: 8 * 1024,
        }
    }
}

const BANNER: &str = "\n  |\\/|  muon\n  |  |  asterism labs\n\n";

#[inline]
fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Brings the kernel up, early to late.
///
/// On return every subsystem is live and the monitor (or the board's
/// init process) can take over.
pub fn kernel_init(
    platform: &'static dyn Platform,
    cpu: &'static dyn Cpu,
    config: &BootConfig,
) -> Result<(), KernelError> {
    // Interrupts are masked and the early console is not up yet. The
    // architecture entry stub has already copied .data and zeroed .bss.
    preempt_disable();

    if platform.init().is_err() {
        platform.boot_fail(BootStage::PlatformInit);
    }

    let mut extents = ExtentTable::new();
    if platform.mem_detect(&mut extents).is_err() {
        platform.boot_fail(BootStage::MemoryDetect);
    }

    // Kernel slabs sit just past the kernel image; the kernel heap takes
    // the rest of kernel RAM below the boot stack; the user heap takes
    // the largest user RAM extent.
    let slab_base = align_up(platform.first_free_kernel_addr(), slab::SLAB_SIZE);
    // SAFETY: the region is kernel RAM past everything the image uses.
    unsafe { slab::init(slab_base, config.slab_region_len) };

    let kheap_base = slab_base + config.slab_region_len;
    let kheap_end = extents
        .highest_addr(ExtentFlags::KERNEL | ExtentFlags::RAM)
        .saturating_sub(config.kernel_stack_reserve);
    if kheap_end <= kheap_base {
        platform.boot_fail(BootStage::MemoryDetect);
    }
    // SAFETY: the region follows the slab region inside kernel RAM.
    unsafe { kalloc::init_kernel_heap(kheap_base, kheap_end - kheap_base) };

    if let Some(user) = extents.largest(ExtentFlags::USER | ExtentFlags::RAM).copied() {
        // SAFETY: the extent is user RAM, untouched so far.
        unsafe { kalloc::init_user_heap(user.base, user.len) };
    }

    let user_ram = extents.total_size(ExtentFlags::USER | ExtentFlags::RAM);
    let kernel_ram = extents.total_size(ExtentFlags::KERNEL | ExtentFlags::RAM);
    extent::install(extents);

    // Every exception reports and halts until drivers claim their levels.
    irq::init(cpu);

    device::init();

    // Devices are not enumerated and interrupts are still masked, so the
    // boot log goes to an in-memory console for now.
    console::early_init();

    kprint!("{}", BANNER);
    kinfo!("platform: {}", platform.name());
    kinfo!("{} MB RAM detected", (user_ram + kernel_ram) >> 20);

    if platform.dev_enumerate().is_err() {
        platform.boot_fail(BootStage::DeviceEnumerate);
    }

    let console_dev = match platform.console_init() {
        Ok(dev) => dev,
        Err(_) => platform.boot_fail(BootStage::ConsoleInit),
    };

    let sched_result = scheduler::init(cpu, "[sys]");

    preempt_enable();

    // The real console works now; hand it the buffered boot log.
    if let Err(e) = console::attach_device(console_dev) {
        kerror!("console: failed to attach device console: {}", e);
    }

    platform.led_off(Leds::all());
    platform.led_on(Leds::RED);

    if let Err(e) = &sched_result {
        kerror!("sched: init failed: {}", e);
    }

    block::init(config.block_cache_slots);
    partition::scan_all();

    if let Err(e) = vfs_init() {
        kerror!("vfs: init failed: {}", e);
    }

    if let Ok(hz) = platform.cpu_clock_hz() {
        kinfo!("CPU fclk ~{}.{} MHz", hz / 1_000_000, (hz % 1_000_000) / 100_000);
    }

    clock_init();

    match tick::init(config.tick_rate_hz) {
        Ok(()) => {
            // The scheduler preempts from the tick path.
            let _ = tick::add_callback(1, Box::new(scheduler::preempt_tick));
        }
        Err(e) => kerror!("tick: init failed: {}", e),
    }

    kinfo!(
        "{} bytes of kernel heap memory available",
        kalloc::kernel_heap_free()
    );
    kinfo!("{} bytes of user memory available", kalloc::user_heap_free());

    if let Ok(sn) = platform.serial_number() {
        console::printf(
            "Hardware serial number %02X%02X%02X%02X%02X%02X\n",
            &[
                muon_core::format::Arg::Uint(u64::from(sn[0])),
                muon_core::format::Arg::Uint(u64::from(sn[1])),
                muon_core::format::Arg::Uint(u64::from(sn[2])),
                muon_core::format::Arg::Uint(u64::from(sn[3])),
                muon_core::format::Arg::Uint(u64::from(sn[4])),
                muon_core::format::Arg::Uint(u64::from(sn[5])),
            ],
        );
    }

    if let Err(e) = muon_net::init() {
        kerror!("net: init failed: {}", e);
    }

    platform.led_off(Leds::RED);
    platform.led_on(Leds::GREEN);

    sched_result.map(|_| ())
}

/// Registers the built-in filesystem drivers and mounts the root
/// filesystem named by the board-parameter block.
fn vfs_init() -> Result<(), KernelError> {
    if let Err(e) = fs_driver::register(&RAMFS) {
        kerror!("vfs: ramfs registration failed: {}", e);
    }

    let nvram = find_first(DeviceClass::Nvram).ok_or(KernelError::NoSuchDevice)?;
    let params = match device::ops(nvram)
        .ok_or(KernelError::NoSuchDevice)?
        .control(Control::GetBoardParams)?
    {
        ControlData::Board(params) => params,
        _ => return Err(KernelError::InvalidArgument),
    };

    let Some(root_dev) = device::find(&params.rootfs_device) else {
        kerror!("vfs: rootfs partition '{}' not found", params.rootfs_device);
        return Err(KernelError::NoSuchDevice);
    };
    if device::class(root_dev) != Some(DeviceClass::Block)
        || device::subclass(root_dev) != Some(DeviceSubclass::Partition)
    {
        kerror!("vfs: rootfs '{}' is not a partition device", params.rootfs_device);
        return Err(KernelError::NoSuchDevice);
    }

    let Some(driver) = fs_driver::by_name(&params.rootfs_type) else {
        kerror!("vfs: unknown filesystem type '{}' specified", params.rootfs_type);
        return Err(KernelError::InvalidArgument);
    };

    kinfo!("vfs: rootfs: {} ({})", params.rootfs_device, params.rootfs_type);
    mount::add(None, driver, root_dev)
}

static RTC_DEV: SpinLock<Option<DeviceId>> = SpinLock::new(None);

fn rtc_now() -> u64 {
    let dev = *RTC_DEV.lock();
    let Some(ops) = dev.and_then(device::ops) else {
        return 0;
    };
    match ops.control(Control::GetTime) {
        Ok(ControlData::Time(secs)) => secs,
        _ => 0,
    }
}

/// Points the wall clock at the first RTC device, if the board has one.
fn clock_init() {
    let Some(rtc) = find_first(DeviceClass::Rtc) else {
        kinfo!("clock: no RTC device; wall clock unavailable");
        return;
    };
    *RTC_DEV.lock() = Some(rtc);
    time::set_wall_clock(rtc_now);
}

/// The first device of `class`, in tree order.
fn find_first(class: DeviceClass) -> Option<DeviceId> {
    let mut node = None;
    while let Some(id) = device::next(node) {
        if device::class(id) == Some(class) {
            return Some(id);
        }
        node = Some(id);
    }
    None
}
