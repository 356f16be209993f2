//! Protocol driver registry and dispatch.
//!
//! Each protocol driver registers a fixed operation set. Received packets
//! dispatch on their protocol tag (set by the layer below); outgoing
//! packets dispatch on the destination address family.

use alloc::collections::BTreeMap;

use muon_core::KernelError;
use muon_core::sync::SpinLock;

use crate::address::NetAddress;
use crate::interface::IfaceId;
use crate::packet::Packet;

/// Protocol tags known to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    /// No protocol determined.
    Unknown,
    /// Raw frames, straight off the device.
    Raw,
    /// IEEE 802.3 Ethernet.
    Ethernet,
    /// Address Resolution Protocol.
    Arp,
    /// Internet Protocol, version 4.
    Ipv4,
    /// User Datagram Protocol.
    Udp,
    /// Transmission Control Protocol.
    Tcp,
    /// Internet Control Message Protocol.
    Icmp,
}

/// The operations a protocol driver registers.
///
/// Unimplemented operations fall back to defaults returning
/// [`KernelError::ProtocolUnsupported`].
pub trait ProtocolDriver: Send + Sync {
    /// The tag this driver serves.
    fn protocol(&self) -> Protocol;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Handles a received packet whose window starts at this protocol's
    /// header. `src`/`dest` may arrive as [`NetAddress::Unknown`] and are
    /// filled in by the lowest-level decode.
    fn rx(
        &self,
        src: &mut NetAddress,
        dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        let _ = (src, dest, packet);
        Err(KernelError::ProtocolUnsupported)
    }

    /// Transmits a packet towards `dest`, prepending this protocol's
    /// header. A `src` of `None` lets the driver substitute a default.
    fn tx(
        &self,
        src: Option<&NetAddress>,
        dest: &NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        let _ = (src, dest, packet);
        Err(KernelError::ProtocolUnsupported)
    }

    /// Compares two addresses of this protocol's family.
    fn addr_compare(&self, a: &NetAddress, b: &NetAddress) -> bool {
        let _ = (a, b);
        false
    }

    /// Allocates a packet pre-sized for this protocol's headers plus a
    /// `payload`-byte payload.
    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let _ = payload;
        Err(KernelError::ProtocolUnsupported)
    }

    /// Selects the interface a packet for `dest` should leave through.
    fn route_iface(&self, dest: &NetAddress) -> Result<IfaceId, KernelError> {
        let _ = dest;
        Err(KernelError::HostUnreachable)
    }
}

static DRIVERS: SpinLock<BTreeMap<Protocol, &'static dyn ProtocolDriver>> =
    SpinLock::new(BTreeMap::new());

/// Registers a protocol driver under its tag.
///
/// # Errors
///
/// Returns [`KernelError::Exists`] if the tag is already taken.
pub fn register_driver(driver: &'static dyn ProtocolDriver) -> Result<(), KernelError> {
    let mut drivers = DRIVERS.lock();
    if drivers.contains_key(&driver.protocol()) {
        return Err(KernelError::Exists);
    }
    drivers.insert(driver.protocol(), driver);
    Ok(())
}

/// Looks up the driver registered for `proto`.
pub fn driver_for(proto: Protocol) -> Option<&'static dyn ProtocolDriver> {
    DRIVERS.lock().get(&proto).copied()
}

/// Dispatches a received packet to the driver for its protocol tag.
pub fn rx(
    src: &mut NetAddress,
    dest: &mut NetAddress,
    packet: &mut Packet,
) -> Result<(), KernelError> {
    let driver =
        driver_for(packet.proto()).ok_or(KernelError::ProtocolUnsupported)?;
    driver.rx(src, dest, packet)
}

/// Dispatches an outgoing packet to the driver for the destination's
/// address family.
pub fn tx(
    src: Option<&NetAddress>,
    dest: &NetAddress,
    packet: &mut Packet,
) -> Result<(), KernelError> {
    let proto = match dest {
        NetAddress::Ethernet(_) => Protocol::Ethernet,
        NetAddress::Ipv4(_) => Protocol::Ipv4,
        NetAddress::Unknown => return Err(KernelError::AddressFamilyUnsupported),
    };
    let driver = driver_for(proto).ok_or(KernelError::ProtocolUnsupported)?;
    driver.tx(src, dest, packet)
}

/// Allocates a packet via the driver registered for `proto`.
pub fn packet_alloc(proto: Protocol, payload: usize) -> Result<Packet, KernelError> {
    let driver = driver_for(proto).ok_or(KernelError::ProtocolUnsupported)?;
    driver.packet_alloc(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProto;

    impl ProtocolDriver for NullProto {
        fn protocol(&self) -> Protocol {
            Protocol::Unknown
        }
        fn name(&self) -> &'static str {
            "null"
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        static NULL: NullProto = NullProto;
        // First registration may race with other tests only for distinct
        // tags; Unknown is owned by this test.
        register_driver(&NULL).unwrap();
        assert_eq!(register_driver(&NULL).unwrap_err(), KernelError::Exists);
        assert!(driver_for(Protocol::Unknown).is_some());
    }

    #[test]
    fn unknown_dest_family_is_rejected() {
        let mut p = Packet::new(16);
        assert_eq!(
            tx(None, &NetAddress::Unknown, &mut p).unwrap_err(),
            KernelError::AddressFamilyUnsupported
        );
    }
}
