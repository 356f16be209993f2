//! Device control requests and responses.

use alloc::string::String;
use bitflags::bitflags;

/// A per-tick callback installed into a timer device.
pub type TickFn = fn();

/// Hardware address families a network device may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwType {
    /// IEEE 802.3 Ethernet; six-byte MAC addresses.
    Ethernet,
}

bitflags! {
    /// Link state reported by a network device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkFlags: u8 {
        /// The interface is administratively up.
        const UP = 1 << 0;
        /// The physical link is established.
        const RUNNING = 1 << 1;
        /// The link runs full duplex.
        const FULL_DUPLEX = 1 << 2;
    }
}

/// The board-parameter block stored in NVRAM.
///
/// Persistent boot configuration: which device holds the root filesystem
/// and which filesystem driver mounts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardParams {
    /// Name of the root filesystem device (a block partition).
    pub rootfs_device: String,
    /// Name of the filesystem driver for the root mount.
    pub rootfs_type: String,
}

/// A control request issued against a device.
///
/// Every device sees the full enumeration and answers
/// [`KernelError::NotSupported`](muon_core::KernelError::NotSupported) for
/// functions it does not provide.
#[derive(Debug, Clone)]
pub enum Control {
    // ── Timers ──────────────────────────────────────────────────────────
    /// Programs the tick frequency in Hz; answers the achieved frequency.
    TimerSetFreq(u32),
    /// Starts or stops the timer.
    TimerSetEnabled(bool),
    /// Installs the function invoked on every tick.
    TimerSetTickFn(TickFn),

    // ── Block devices ───────────────────────────────────────────────────
    /// Asks for the device's block size in bytes.
    GetBlockSize,
    /// Asks for the device's capacity in blocks.
    GetBlockCount,
    /// Asks for a human-readable model name.
    GetModel,
    /// Asks whether the device (or partition) is flagged bootable.
    GetBootable,
    /// Asks for the raw partition type byte.
    GetPartitionType,
    /// Asks for a human-readable partition type name.
    GetPartitionTypeName,
    /// Asks whether the partition's status byte marks it active.
    GetPartitionActive,

    // ── Network devices ─────────────────────────────────────────────────
    /// Asks for the hardware address family.
    GetHwType,
    /// Asks for the hardware address.
    GetHwAddr,
    /// Asks for the current link flags.
    GetLinkFlags,

    // ── RTC / NVRAM ─────────────────────────────────────────────────────
    /// Asks an RTC for the wall-clock time in seconds since the epoch.
    GetTime,
    /// Asks an NVRAM device for the board-parameter block.
    GetBoardParams,
}

/// The typed response to a [`Control`] request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlData {
    /// The request carried no response payload.
    None,
    /// A numeric response (frequency, size, count, type byte, …).
    U32(u32),
    /// A boolean response (bootable, active, …).
    Flag(bool),
    /// A textual response (model or type names).
    Text(String),
    /// A hardware address family.
    HwType(HwType),
    /// A six-byte hardware address.
    HwAddr([u8; 6]),
    /// Link flags.
    Link(LinkFlags),
    /// A wall-clock timestamp, seconds since the epoch.
    Time(u64),
    /// The board-parameter block.
    Board(BoardParams),
}

impl ControlData {
    /// Extracts a `U32` payload.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}
