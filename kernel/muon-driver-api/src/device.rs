//! The device operation contract and device classification.

use muon_core::KernelError;

use crate::control::{Control, ControlData};

/// High-level device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Placeholder nodes (the tree root).
    None,
    /// Block-addressed storage.
    Block,
    /// Byte-stream devices.
    Character,
    /// Network hardware.
    Net,
    /// Serial ports.
    Serial,
    /// Real-time clocks.
    Rtc,
    /// Plain memory devices.
    Mem,
    /// Non-volatile parameter memory.
    Nvram,
    /// Programmable timers.
    Timer,
    /// Multi-function chips whose children carry the real functions.
    Multi,
}

impl DeviceClass {
    /// One-character code used in device listings.
    pub const fn type_char(self) -> char {
        match self {
            Self::None => '-',
            Self::Block => 'b',
            Self::Character => 'c',
            Self::Net => 'n',
            Self::Serial => 's',
            Self::Rtc => 'r',
            Self::Mem => 'm',
            Self::Nvram => 'M',
            Self::Timer => 't',
            Self::Multi => 'x',
        }
    }
}

/// Refinement of [`DeviceClass`] used by subsystem scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSubclass {
    /// No refinement.
    None,
    /// A whole mass-storage unit (scanned for partitions).
    MassStorage,
    /// One partition of a mass-storage unit.
    Partition,
    /// One channel of a multi-channel chip.
    Channel,
}

/// Lifecycle state of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Created but not yet initialised.
    Unknown,
    /// Initialised and usable.
    Ready,
    /// Shut down or failed.
    Offline,
}

/// The uniform device operation set.
///
/// Block devices count `offset` and `len` in blocks; character devices
/// count bytes. `len` is updated to the number of units actually
/// transferred. Every operation has a default returning
/// [`KernelError::NotSupported`], so drivers implement only what their
/// hardware has.
pub trait DeviceOps: Send + Sync {
    /// Reads `*len` units at `offset` into `buf`.
    fn read(&self, offset: u32, len: &mut u32, buf: &mut [u8]) -> Result<(), KernelError> {
        let _ = (offset, len, buf);
        Err(KernelError::NotSupported)
    }

    /// Writes `*len` units at `offset` from `buf`.
    fn write(&self, offset: u32, len: &mut u32, buf: &[u8]) -> Result<(), KernelError> {
        let _ = (offset, len, buf);
        Err(KernelError::NotSupported)
    }

    /// Issues a control request.
    fn control(&self, op: Control) -> Result<ControlData, KernelError> {
        let _ = op;
        Err(KernelError::NotSupported)
    }

    /// Reads one byte, blocking until one is available.
    fn getc(&self) -> Result<u8, KernelError> {
        Err(KernelError::NotSupported)
    }

    /// Writes one byte.
    fn putc(&self, byte: u8) -> Result<(), KernelError> {
        let _ = byte;
        Err(KernelError::NotSupported)
    }

    /// Prepares the device for removal or power-off.
    fn shut_down(&self) -> Result<(), KernelError> {
        Err(KernelError::NotSupported)
    }
}

/// A device with no operations: every call answers `NotSupported`.
///
/// Used for placeholder nodes such as the device-tree root.
pub struct NullDevice;

impl DeviceOps for NullDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_answer_not_supported() {
        let dev = NullDevice;
        let mut len = 1;
        assert_eq!(
            dev.read(0, &mut len, &mut [0u8; 4]),
            Err(KernelError::NotSupported)
        );
        assert_eq!(
            dev.write(0, &mut len, &[0u8; 4]),
            Err(KernelError::NotSupported)
        );
        assert_eq!(dev.control(Control::GetModel), Err(KernelError::NotSupported));
        assert_eq!(dev.getc(), Err(KernelError::NotSupported));
        assert_eq!(dev.putc(b'x'), Err(KernelError::NotSupported));
        assert_eq!(dev.shut_down(), Err(KernelError::NotSupported));
    }

    #[test]
    fn type_chars_are_distinct() {
        let classes = [
            DeviceClass::None,
            DeviceClass::Block,
            DeviceClass::Character,
            DeviceClass::Net,
            DeviceClass::Serial,
            DeviceClass::Rtc,
            DeviceClass::Mem,
            DeviceClass::Nvram,
            DeviceClass::Timer,
            DeviceClass::Multi,
        ];
        let mut seen = std::collections::BTreeSet::new();
        for c in classes {
            assert!(seen.insert(c.type_char()), "duplicate char for {c:?}");
        }
    }
}
