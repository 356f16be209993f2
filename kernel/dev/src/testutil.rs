//! Shared fixtures for this crate's tests.
//!
//! Tests share the global device tree (one per test process), so every
//! fixture device gets its own name prefix to stay out of other tests'
//! way.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use std::sync::Once;

use muon_core::KernelError;
use muon_core::sync::SpinLock;
use muon_driver_api::{DeviceClass, DeviceOps, DeviceSubclass};

use crate::block::BLOCK_SIZE;
use crate::device::{self, DeviceId, DeviceSpec};

/// Initialises the global device tree exactly once per test process.
pub fn ensure_tree() {
    static ONCE: Once = Once::new();
    ONCE.call_once(device::init);
}

/// Creates a device in the global tree.
pub fn make_device(
    prefix: &str,
    class: DeviceClass,
    subclass: DeviceSubclass,
    init: impl FnOnce(&str) -> Result<Arc<dyn DeviceOps>, KernelError>,
) -> DeviceId {
    ensure_tree();
    device::create(
        &DeviceSpec {
            class,
            subclass,
            name_prefix: prefix,
            irql: 0,
            base_addr: 0,
            human_name: "test device",
            parent: None,
        },
        init,
    )
    .expect("test device creation failed")
}

/// An in-memory block device.
pub struct RamDisk {
    blocks: SpinLock<Vec<u8>>,
}

impl RamDisk {
    /// Creates a zero-filled disk of `blocks` blocks.
    pub fn new(blocks: usize) -> Self {
        Self {
            blocks: SpinLock::new(vec![0u8; blocks * BLOCK_SIZE]),
        }
    }

    /// Copies out one block for assertions.
    pub fn block(&self, index: u32) -> [u8; BLOCK_SIZE] {
        let data = self.blocks.lock();
        let off = index as usize * BLOCK_SIZE;
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&data[off..off + BLOCK_SIZE]);
        out
    }

    /// Overwrites one block.
    pub fn set_block(&self, index: u32, contents: &[u8]) {
        let mut data = self.blocks.lock();
        let off = index as usize * BLOCK_SIZE;
        data[off..off + contents.len()].copy_from_slice(contents);
    }

    fn capacity_blocks(&self) -> u32 {
        (self.blocks.lock().len() / BLOCK_SIZE) as u32
    }
}

impl DeviceOps for RamDisk {
    fn read(&self, offset: u32, len: &mut u32, buf: &mut [u8]) -> Result<(), KernelError> {
        let data = self.blocks.lock();
        let capacity = (data.len() / BLOCK_SIZE) as u32;
        if offset + *len > capacity {
            return Err(KernelError::InvalidArgument);
        }
        let start = offset as usize * BLOCK_SIZE;
        let bytes = *len as usize * BLOCK_SIZE;
        buf[..bytes].copy_from_slice(&data[start..start + bytes]);
        Ok(())
    }

    fn write(&self, offset: u32, len: &mut u32, buf: &[u8]) -> Result<(), KernelError> {
        if offset + *len > self.capacity_blocks() {
            return Err(KernelError::InvalidArgument);
        }
        let mut data = self.blocks.lock();
        let start = offset as usize * BLOCK_SIZE;
        let bytes = *len as usize * BLOCK_SIZE;
        data[start..start + bytes].copy_from_slice(&buf[..bytes]);
        Ok(())
    }

    fn control(
        &self,
        op: muon_driver_api::Control,
    ) -> Result<muon_driver_api::ControlData, KernelError> {
        use muon_driver_api::{Control, ControlData};
        match op {
            Control::GetBlockSize => Ok(ControlData::U32(BLOCK_SIZE as u32)),
            Control::GetBlockCount => Ok(ControlData::U32(self.capacity_blocks())),
            Control::GetModel => Ok(ControlData::Text("ramdisk".into())),
            _ => Err(KernelError::NotSupported),
        }
    }
}
