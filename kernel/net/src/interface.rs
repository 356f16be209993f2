//! Network interfaces.
//!
//! An interface binds a network-class device to the protocol stack: it
//! carries the device's hardware address, the configured protocol
//! address, and traffic statistics. Each interface runs a dedicated
//! kernel receive process that blocks in the device's read path and hands
//! every frame to the protocol dispatcher.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_core::sync::SpinLock;
use muon_core::{KernelError, kerror, kinfo};
use muon_dev::device::{self, DeviceId};
use muon_driver_api::{Control, ControlData, DeviceClass, HwType};
use muon_sched::{ProcFlags, ProcessSpec, scheduler};

use crate::address::{MacAddr, NetAddress};
use crate::packet::Packet;
use crate::proto::{self, Protocol};

/// Receive buffer size per interface: a full Ethernet frame.
pub const RX_BUFFER_LEN: usize = 1518;

/// Stable handle to a registered interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceId(pub u32);

/// Best-effort traffic counters.
#[derive(Default)]
struct IfaceStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    rx_checksum_err: AtomicU64,
    rx_dropped: AtomicU64,
}

/// A point-in-time copy of an interface's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfaceStatsSnapshot {
    /// Frames delivered up the stack.
    pub rx_packets: u64,
    /// Bytes received, including dropped frames.
    pub rx_bytes: u64,
    /// Frames transmitted.
    pub tx_packets: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Frames dropped for checksum failures.
    pub rx_checksum_err: u64,
    /// Frames dropped for any reason.
    pub rx_dropped: u64,
}

struct Interface {
    dev: DeviceId,
    proto: Protocol,
    hw_addr: NetAddress,
    proto_addr: SpinLock<NetAddress>,
    stats: IfaceStats,
}

static IFACES: SpinLock<Vec<Arc<Interface>>> = SpinLock::new(Vec::new());

fn get(iface: IfaceId) -> Option<Arc<Interface>> {
    IFACES.lock().get(iface.0 as usize).map(Arc::clone)
}

/// Scans the device tree and registers every network device.
///
/// Failures are logged per device; the scan continues.
pub fn init() -> Result<(), KernelError> {
    let mut nics = Vec::new();
    let mut node = None;
    while let Some(id) = device::next(node) {
        if device::class(id) == Some(DeviceClass::Net) {
            nics.push(id);
        }
        node = Some(id);
    }

    for dev in nics {
        if let Err(e) = add_device(dev) {
            kerror!(
                "net: failed to add {}: {}",
                device::name(dev).unwrap_or_default(),
                e
            );
        }
    }
    Ok(())
}

/// Registers one network device as an interface and starts its receive
/// process.
pub fn add_device(dev: DeviceId) -> Result<IfaceId, KernelError> {
    let ops = device::ops(dev).ok_or(KernelError::NoSuchDevice)?;
    let name = device::name(dev).ok_or(KernelError::NoSuchDevice)?;

    let proto = match ops.control(Control::GetHwType)? {
        ControlData::HwType(HwType::Ethernet) => Protocol::Ethernet,
        _ => return Err(KernelError::ProtocolUnsupported),
    };
    let hw_addr = match ops.control(Control::GetHwAddr)? {
        ControlData::HwAddr(mac) => NetAddress::Ethernet(MacAddr(mac)),
        _ => return Err(KernelError::InvalidArgument),
    };

    let id = {
        let mut ifaces = IFACES.lock();
        let id = IfaceId(ifaces.len() as u32);
        ifaces.push(Arc::new(Interface {
            dev,
            proto,
            hw_addr,
            proto_addr: SpinLock::new(NetAddress::Unknown),
            stats: IfaceStats::default(),
        }));
        id
    };

    kinfo!("net: added {}: {}", name, hw_addr);

    // The receive process blocks in the device's read path for the life
    // of the interface. Boot order guarantees the scheduler exists by the
    // time network devices register; interfaces added earlier (tests,
    // hotplug probes) simply have no receive process.
    if scheduler::is_initialised() {
        let proc_name = format!("[net_rx {name}]");
        scheduler::create(&ProcessSpec {
            uid: 0,
            gid: 0,
            name: &proc_name,
            image: None,
            entry: Some(rx_entry as usize),
            arg: id.0 as usize,
            user_stack_len: 0,
            flags: ProcFlags::KERNEL,
            cwd: None,
            parent: None,
        })?;
    }

    Ok(id)
}

/// Entry point of the per-interface receive process.
fn rx_entry(arg: usize) {
    rx_loop(IfaceId(arg as u32));
}

/// The receive loop: reads frames and hands them up the stack, forever.
pub fn rx_loop(iface: IfaceId) {
    let mut packet = Packet::new(RX_BUFFER_LEN);
    loop {
        // Per-frame failures update statistics and never stop the loop.
        let _ = rx_once(iface, &mut packet);
    }
}

/// Receives one frame: resets `packet`, reads into it (blocking in the
/// device), tags it with the interface and its native protocol, and
/// dispatches it with both addresses still unknown.
pub fn rx_once(iface: IfaceId, packet: &mut Packet) -> Result<(), KernelError> {
    let interface = get(iface).ok_or(KernelError::NoSuchDevice)?;
    let ops = device::ops(interface.dev).ok_or(KernelError::NoSuchDevice)?;

    packet.reset();
    let mut len = packet.capacity() as u32;
    ops.read(0, &mut len, packet.buffer_mut())?;
    packet.set_len(len as usize)?;

    packet.set_iface(iface);
    packet.set_proto(interface.proto);
    interface
        .stats
        .rx_bytes
        .fetch_add(u64::from(len), Ordering::Relaxed);

    let mut src = NetAddress::Unknown;
    let mut dest = NetAddress::Unknown;
    let result = proto::rx(&mut src, &mut dest, packet);

    match result {
        Ok(()) => {
            interface.stats.rx_packets.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            if e == KernelError::ChecksumMismatch {
                interface
                    .stats
                    .rx_checksum_err
                    .fetch_add(1, Ordering::Relaxed);
            }
            interface.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Transmits a packet's window as one frame on its interface.
pub fn tx_frame(packet: &mut Packet) -> Result<(), KernelError> {
    let iface = packet.iface().ok_or(KernelError::HostUnreachable)?;
    let interface = get(iface).ok_or(KernelError::NoSuchDevice)?;
    let ops = device::ops(interface.dev).ok_or(KernelError::NoSuchDevice)?;

    let frame_len = packet.len() as u32;
    let mut len = frame_len;
    ops.write(0, &mut len, packet.payload())?;
    if len != frame_len {
        return Err(KernelError::WriteError);
    }

    interface.stats.tx_packets.fetch_add(1, Ordering::Relaxed);
    interface
        .stats
        .tx_bytes
        .fetch_add(u64::from(frame_len), Ordering::Relaxed);
    Ok(())
}

/// The interface's hardware address.
pub fn hw_addr(iface: IfaceId) -> Option<NetAddress> {
    get(iface).map(|i| i.hw_addr)
}

/// The interface's native protocol.
pub fn proto(iface: IfaceId) -> Option<Protocol> {
    get(iface).map(|i| i.proto)
}

/// The interface's configured protocol address.
pub fn proto_addr(iface: IfaceId) -> Option<NetAddress> {
    get(iface).map(|i| *i.proto_addr.lock())
}

/// Configures the interface's protocol address.
pub fn set_proto_addr(iface: IfaceId, addr: NetAddress) -> Result<(), KernelError> {
    let interface = get(iface).ok_or(KernelError::NoSuchDevice)?;
    *interface.proto_addr.lock() = addr;
    Ok(())
}

/// The device behind an interface.
pub fn device_of(iface: IfaceId) -> Option<DeviceId> {
    get(iface).map(|i| i.dev)
}

/// Finds an interface by its device's name.
pub fn by_device_name(name: &str) -> Option<IfaceId> {
    let target = device::find(name)?;
    let ifaces = IFACES.lock();
    ifaces
        .iter()
        .position(|i| i.dev == target)
        .map(|p| IfaceId(p as u32))
}

/// The interface's device name.
pub fn name_of(iface: IfaceId) -> Option<String> {
    get(iface).and_then(|i| device::name(i.dev))
}

/// A snapshot of the interface's counters.
pub fn stats(iface: IfaceId) -> Option<IfaceStatsSnapshot> {
    get(iface).map(|i| IfaceStatsSnapshot {
        rx_packets: i.stats.rx_packets.load(Ordering::Relaxed),
        rx_bytes: i.stats.rx_bytes.load(Ordering::Relaxed),
        tx_packets: i.stats.tx_packets.load(Ordering::Relaxed),
        tx_bytes: i.stats.tx_bytes.load(Ordering::Relaxed),
        rx_checksum_err: i.stats.rx_checksum_err.load(Ordering::Relaxed),
        rx_dropped: i.stats.rx_dropped.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestNic, make_nic};
    use muon_driver_api::DeviceOps;

    #[test]
    fn interface_carries_device_identity() {
        let (iface, _nic) = make_nic("ifid", [2, 0, 0, 0, 0, 1]);
        assert_eq!(proto(iface), Some(Protocol::Ethernet));
        assert_eq!(
            hw_addr(iface).unwrap().as_ethernet().unwrap().0,
            [2, 0, 0, 0, 0, 1]
        );

        let dev_name = name_of(iface).unwrap();
        assert_eq!(by_device_name(&dev_name), Some(iface));
    }

    #[test]
    fn proto_addr_is_settable() {
        let (iface, _nic) = make_nic("ifpa", [2, 0, 0, 0, 0, 2]);
        assert_eq!(proto_addr(iface), Some(NetAddress::Unknown));

        let addr = NetAddress::ipv4(crate::address::Ipv4Addr::new(192, 0, 2, 9));
        set_proto_addr(iface, addr).unwrap();
        assert_eq!(proto_addr(iface), Some(addr));
    }

    #[test]
    fn tx_frame_reaches_device_and_counts() {
        let (iface, nic) = make_nic("iftx", [2, 0, 0, 0, 0, 3]);

        let mut packet = Packet::new(64);
        packet.set_len(21).unwrap();
        packet.payload_mut().copy_from_slice(&[0x5a; 21]);
        packet.set_iface(iface);

        tx_frame(&mut packet).unwrap();

        let frames = nic.tx_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], alloc::vec![0x5a; 21]);

        let s = stats(iface).unwrap();
        assert_eq!(s.tx_packets, 1);
        assert_eq!(s.tx_bytes, 21);
    }

    #[test]
    fn rx_of_unroutable_frame_counts_a_drop() {
        let (iface, nic) = make_nic("ifdr", [2, 0, 0, 0, 0, 4]);

        // An Ethernet frame with an ethertype nothing handles.
        let mut frame = alloc::vec![0u8; 60];
        frame[12] = 0x88;
        frame[13] = 0xb5;
        nic.push_rx(frame);

        let mut packet = Packet::new(RX_BUFFER_LEN);
        let err = rx_once(iface, &mut packet).unwrap_err();
        assert_eq!(err, KernelError::ProtocolUnsupported);

        let s = stats(iface).unwrap();
        assert_eq!(s.rx_packets, 0);
        assert_eq!(s.rx_dropped, 1);
        assert_eq!(s.rx_bytes, 60);
    }

    #[test]
    fn rx_without_pending_frames_propagates_the_device_error() {
        let (iface, _nic) = make_nic("ifnf", [2, 0, 0, 0, 0, 5]);
        let mut packet = Packet::new(RX_BUFFER_LEN);
        assert_eq!(
            rx_once(iface, &mut packet).unwrap_err(),
            KernelError::Timeout
        );
    }

    #[test]
    fn nic_fixture_reports_ethernet() {
        let nic = TestNic::new([2, 0, 0, 0, 0, 6]);
        assert_eq!(
            nic.control(Control::GetHwType).unwrap(),
            ControlData::HwType(HwType::Ethernet)
        );
    }
}
