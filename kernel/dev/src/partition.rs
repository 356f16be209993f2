//! MBR partition discovery.
//!
//! Mass-storage devices are scanned for an MBR in sector 0; every
//! non-empty partition entry becomes a child block device whose read and
//! write operations shift offsets into the parent device and enforce the
//! partition length.

use alloc::sync::Arc;

use muon_core::KernelError;
use muon_core::{kdebug, kwarn};
use muon_driver_api::{Control, ControlData, DeviceClass, DeviceOps, DeviceSubclass};

use crate::device::{self, DeviceId, DeviceSpec};

/// MBR signature stored little-endian in the last two bytes of sector 0.
const MBR_SIGNATURE: u16 = 0xaa55;
/// Offset of the four-entry partition table within sector 0.
const PART_TABLE_OFFSET: usize = 446;
/// Size of one partition table entry.
const PART_ENTRY_LEN: usize = 16;
/// Number of primary partition entries.
const NUM_PARTITIONS: usize = 4;
/// Status byte value (and above) marking a partition active/bootable.
const STATUS_BOOTABLE: u8 = 0x80;

/// Human-readable name for an MBR partition type byte.
pub fn type_name(partition_type: u8) -> &'static str {
    match partition_type {
        0x01 | 0x04 | 0x05 | 0x06 => "MS-DOS",
        0x42 | 0x82 => "Linux swap",
        0x43 | 0x83 => "Linux",
        _ => "unsupported",
    }
}

/// A partition presented as a block device.
struct PartitionDevice {
    parent: Arc<dyn DeviceOps>,
    /// First parent block of the partition.
    first_block: u32,
    /// Partition length in blocks.
    len: u32,
    /// Block size inherited from the parent device.
    block_size: u32,
    /// Raw MBR partition type byte.
    partition_type: u8,
    /// Raw MBR status byte.
    status: u8,
}

impl DeviceOps for PartitionDevice {
    fn read(&self, offset: u32, len: &mut u32, buf: &mut [u8]) -> Result<(), KernelError> {
        if offset + *len > self.len {
            return Err(KernelError::InvalidArgument);
        }
        self.parent.read(self.first_block + offset, len, buf)
    }

    fn write(&self, offset: u32, len: &mut u32, buf: &[u8]) -> Result<(), KernelError> {
        if offset + *len > self.len {
            return Err(KernelError::InvalidArgument);
        }
        self.parent.write(self.first_block + offset, len, buf)
    }

    fn control(&self, op: Control) -> Result<ControlData, KernelError> {
        match op {
            Control::GetBlockSize => Ok(ControlData::U32(self.block_size)),
            Control::GetBlockCount => Ok(ControlData::U32(self.len)),
            Control::GetModel => Ok(ControlData::Text("partition".into())),
            Control::GetBootable => Ok(ControlData::Flag(self.status == STATUS_BOOTABLE)),
            Control::GetPartitionType => Ok(ControlData::U32(u32::from(self.partition_type))),
            Control::GetPartitionTypeName => {
                Ok(ControlData::Text(type_name(self.partition_type).into()))
            }
            Control::GetPartitionActive => Ok(ControlData::Flag(self.status >= STATUS_BOOTABLE)),
            _ => Err(KernelError::NotSupported),
        }
    }

    fn shut_down(&self) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Scans every mass-storage device in the tree and publishes the
/// partitions found. Per-device failures are logged and skipped.
pub fn scan_all() {
    let mut disks = alloc::vec::Vec::new();
    let mut node = None;
    while let Some(id) = device::next(node) {
        if device::class(id) == Some(DeviceClass::Block)
            && device::subclass(id) == Some(DeviceSubclass::MassStorage)
        {
            disks.push(id);
        }
        node = Some(id);
    }

    for id in disks {
        if let Err(e) = scan_device(id) {
            kwarn!(
                "partition: scan of {} failed: {}",
                device::name(id).unwrap_or_default(),
                e
            );
        }
    }
}

/// Scans one mass-storage device for an MBR and creates one child device
/// per non-empty partition entry.
///
/// Returns the number of partitions created; 0 when sector 0 carries no
/// MBR signature.
pub fn scan_device(id: DeviceId) -> Result<u32, KernelError> {
    if device::class(id) != Some(DeviceClass::Block)
        || device::subclass(id) != Some(DeviceSubclass::MassStorage)
    {
        return Err(KernelError::InvalidArgument);
    }
    let ops = device::ops(id).ok_or(KernelError::NoSuchDevice)?;
    let parent_name = device::name(id).ok_or(KernelError::NoSuchDevice)?;

    let mut sector = [0u8; 512];
    let mut len = 1;
    ops.read(0, &mut len, &mut sector)?;
    if len != 1 {
        return Err(KernelError::ReadError);
    }

    if u16::from_le_bytes([sector[510], sector[511]]) != MBR_SIGNATURE {
        kdebug!("partition: {} has no MBR", parent_name);
        return Ok(0);
    }

    let block_size = ops
        .control(Control::GetBlockSize)?
        .as_u32()
        .ok_or(KernelError::InvalidArgument)?;

    let mut created = 0;
    for entry in 0..NUM_PARTITIONS {
        let off = PART_TABLE_OFFSET + entry * PART_ENTRY_LEN;
        let e = &sector[off..off + PART_ENTRY_LEN];

        let status = e[0];
        let partition_type = e[4];
        let first_block = u32::from_le_bytes([e[8], e[9], e[10], e[11]]);
        let num_blocks = u32::from_le_bytes([e[12], e[13], e[14], e[15]]);

        if num_blocks == 0 {
            continue;
        }

        let parent_ops = Arc::clone(&ops);
        device::create(
            &DeviceSpec {
                class: DeviceClass::Block,
                subclass: DeviceSubclass::Partition,
                name_prefix: &parent_name,
                irql: 0,
                base_addr: 0,
                human_name: "partition",
                parent: Some(id),
            },
            move |_| {
                Ok(Arc::new(PartitionDevice {
                    parent: parent_ops,
                    first_block,
                    len: num_blocks,
                    block_size,
                    partition_type,
                    status,
                }) as Arc<dyn DeviceOps>)
            },
        )?;
        created += 1;
    }

    Ok(created)
}
