//! Ethernet protocol driver.
//!
//! Layer 2: usually the first driver a received frame meets. The receive
//! path fills in still-unknown source and destination addresses from the
//! frame header before passing the payload up.

use muon_core::KernelError;

use crate::address::{MacAddr, NetAddress};
use crate::interface;
use crate::packet::Packet;
use crate::proto::{self, Protocol, ProtocolDriver};

/// Length of an Ethernet header: two MACs plus the ethertype.
pub const ETH_HDR_LEN: usize = 14;

/// Ethertype for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// Ethertype for ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Maps an ethertype to the protocol tag of the encapsulated payload.
pub fn proto_from_ethertype(ethertype: u16) -> Protocol {
    match ethertype {
        ETHERTYPE_IPV4 => Protocol::Ipv4,
        ETHERTYPE_ARP => Protocol::Arp,
        _ => Protocol::Unknown,
    }
}

/// Maps a protocol tag to its ethertype.
pub fn ethertype_from_proto(proto: Protocol) -> Option<u16> {
    match proto {
        Protocol::Ipv4 => Some(ETHERTYPE_IPV4),
        Protocol::Arp => Some(ETHERTYPE_ARP),
        _ => None,
    }
}

/// The Ethernet driver.
pub struct EthernetDriver;

/// The driver instance registered under [`Protocol::Ethernet`].
pub static ETHERNET: EthernetDriver = EthernetDriver;

impl ProtocolDriver for EthernetDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Ethernet
    }

    fn name(&self) -> &'static str {
        "Ethernet"
    }

    fn rx(
        &self,
        src: &mut NetAddress,
        dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        if packet.len() < ETH_HDR_LEN {
            return Err(KernelError::CorruptData);
        }

        let hdr = packet.payload();
        let dest_mac = MacAddr([hdr[0], hdr[1], hdr[2], hdr[3], hdr[4], hdr[5]]);
        let src_mac = MacAddr([hdr[6], hdr[7], hdr[8], hdr[9], hdr[10], hdr[11]]);
        let ethertype = u16::from_be_bytes([hdr[12], hdr[13]]);

        packet.consume(ETH_HDR_LEN)?;

        if src.is_unknown() {
            *src = NetAddress::Ethernet(src_mac);
        }
        if dest.is_unknown() {
            *dest = NetAddress::Ethernet(dest_mac);
        }

        packet.set_proto(proto_from_ethertype(ethertype));
        proto::rx(src, dest, packet)
    }

    fn tx(
        &self,
        src: Option<&NetAddress>,
        dest: &NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        // A null source means "the interface's own hardware address".
        let src = match src {
            Some(addr) => *addr,
            None => {
                let iface = packet.iface().ok_or(KernelError::HostUnreachable)?;
                interface::hw_addr(iface).ok_or(KernelError::HostUnreachable)?
            }
        };

        let src_mac = src
            .as_ethernet()
            .ok_or(KernelError::AddressFamilyUnsupported)?;
        let dest_mac = dest
            .as_ethernet()
            .ok_or(KernelError::AddressFamilyUnsupported)?;

        let ethertype =
            ethertype_from_proto(packet.proto()).ok_or(KernelError::ProtocolUnsupported)?;

        packet.encapsulate(Protocol::Ethernet, ETH_HDR_LEN)?;
        let hdr = packet.payload_mut();
        hdr[0..6].copy_from_slice(&dest_mac.0);
        hdr[6..12].copy_from_slice(&src_mac.0);
        hdr[12..14].copy_from_slice(&ethertype.to_be_bytes());

        interface::tx_frame(packet)
    }

    fn addr_compare(&self, a: &NetAddress, b: &NetAddress) -> bool {
        match (a.as_ethernet(), b.as_ethernet()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet = Packet::with_headroom(ETH_HDR_LEN, payload);
        packet.set_proto(Protocol::Ethernet);
        Ok(packet)
    }
}
