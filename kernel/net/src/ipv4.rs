//! IPv4 protocol driver.
//!
//! Header encode/decode, upward dispatch by the IP protocol byte, and the
//! downward path: route selection, source substitution, checksum, and
//! next-hop hardware address resolution.

use core::sync::atomic::{AtomicU32, Ordering};

use muon_core::KernelError;

use crate::address::{Ipv4Addr, NetAddress};
use crate::arp;
use crate::cksum::checksum;
use crate::ethernet::ETH_HDR_LEN;
use crate::interface;
use crate::packet::Packet;
use crate::proto::{self, Protocol, ProtocolDriver};

/// Length of an IPv4 header without options.
pub const IPV4_HDR_LEN: usize = 20;

/// Default time-to-live for transmitted packets.
pub const DEFAULT_TTL: u8 = 64;

/// Don't Fragment flag in the flags/fragment-offset field.
const FLAG_DF: u16 = 1 << 14;

/// IP protocol byte for a protocol tag.
pub fn protocol_byte(proto: Protocol) -> Option<u8> {
    match proto {
        Protocol::Icmp => Some(1),
        Protocol::Tcp => Some(6),
        Protocol::Udp => Some(17),
        _ => None,
    }
}

/// Protocol tag for an IP protocol byte.
pub fn protocol_for_byte(byte: u8) -> Protocol {
    match byte {
        1 => Protocol::Icmp,
        6 => Protocol::Tcp,
        17 => Protocol::Udp,
        _ => Protocol::Unknown,
    }
}

/// Packet-id generator: a xorshift PRNG. Predictable ids are a known
/// weakness of the original design, kept for now.
fn next_packet_id() -> u16 {
    static STATE: AtomicU32 = AtomicU32::new(0x1d87_3bc1);
    let mut x = STATE.load(Ordering::Relaxed);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    STATE.store(x, Ordering::Relaxed);
    x as u16
}

/// The IPv4 driver.
pub struct Ipv4Driver;

/// The driver instance registered under [`Protocol::Ipv4`].
pub static IPV4: Ipv4Driver = Ipv4Driver;

impl ProtocolDriver for Ipv4Driver {
    fn protocol(&self) -> Protocol {
        Protocol::Ipv4
    }

    fn name(&self) -> &'static str {
        "IPv4"
    }

    fn rx(
        &self,
        src: &mut NetAddress,
        _dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        if packet.len() < IPV4_HDR_LEN {
            return Err(KernelError::CorruptData);
        }

        // The frame check sequence has normally already covered the
        // header, so software verification is compile-time gated.
        #[cfg(feature = "ipv4-rx-checksum")]
        {
            let hdr = packet.payload();
            let ihl = usize::from(hdr[0] & 0xf) * 4;
            if ihl < IPV4_HDR_LEN || ihl > packet.len() {
                return Err(KernelError::CorruptData);
            }
            if checksum(&hdr[..ihl]) != 0 {
                return Err(KernelError::ChecksumMismatch);
            }
        }

        let hdr = packet.payload();
        let proto_byte = hdr[9];
        let src_ip = Ipv4Addr(u32::from_be_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]));
        let dest_ip = Ipv4Addr(u32::from_be_bytes([hdr[16], hdr[17], hdr[18], hdr[19]]));

        packet.consume(IPV4_HDR_LEN)?;

        // Learn the sender's hardware address while the frame is in hand.
        if src_ip != Ipv4Addr::ANY {
            if let (Some(iface), Some(mac)) = (packet.iface(), src.as_ethernet()) {
                arp::cache_add(iface, src_ip, mac);
            }
        }

        let mut ip_src = NetAddress::ipv4(src_ip);
        let mut ip_dest = NetAddress::ipv4(dest_ip);
        packet.set_proto(protocol_for_byte(proto_byte));

        proto::rx(&mut ip_src, &mut ip_dest, packet)
    }

    fn tx(
        &self,
        src: Option<&NetAddress>,
        dest: &NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        let dest_ep = dest.as_ipv4().ok_or(KernelError::AddressFamilyUnsupported)?;

        let iface = match packet.iface() {
            Some(iface) => iface,
            None => {
                let iface = self.route_iface(dest)?;
                packet.set_iface(iface);
                iface
            }
        };

        let proto_byte =
            protocol_byte(packet.proto()).ok_or(KernelError::ProtocolUnsupported)?;

        let src_ip = src
            .and_then(|a| a.as_ipv4())
            .map(|ep| ep.addr)
            .or_else(|| {
                interface::proto_addr(iface)
                    .and_then(|a| a.as_ipv4())
                    .map(|ep| ep.addr)
            })
            .unwrap_or(Ipv4Addr::ANY);

        packet.insert(IPV4_HDR_LEN)?;
        let total_len = packet.len() as u16;

        let hdr = packet.payload_mut();
        hdr[0] = 0x45; // version 4, IHL 5 words
        hdr[1] = 0; // differentiated services
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[4..6].copy_from_slice(&next_packet_id().to_be_bytes());
        hdr[6..8].copy_from_slice(&FLAG_DF.to_be_bytes());
        hdr[8] = DEFAULT_TTL;
        hdr[9] = proto_byte;
        hdr[10..12].fill(0);
        hdr[12..16].copy_from_slice(&src_ip.octets());
        hdr[16..20].copy_from_slice(&dest_ep.addr.octets());

        let sum = checksum(&hdr[..IPV4_HDR_LEN]);
        hdr[10..12].copy_from_slice(&sum.to_be_bytes());

        packet.set_proto(Protocol::Ipv4);

        let routed_src = interface::hw_addr(iface).ok_or(KernelError::HostUnreachable)?;
        let next_hop = arp::resolve(iface, dest_ep.addr)?;

        proto::tx(
            Some(&routed_src),
            &NetAddress::Ethernet(next_hop),
            packet,
        )
    }

    fn addr_compare(&self, a: &NetAddress, b: &NetAddress) -> bool {
        match (a.as_ipv4(), b.as_ipv4()) {
            (Some(a), Some(b)) => a.addr == b.addr,
            _ => false,
        }
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet = Packet::with_headroom(ETH_HDR_LEN + IPV4_HDR_LEN, payload);
        packet.set_proto(Protocol::Ipv4);
        Ok(packet)
    }

    fn route_iface(&self, dest: &NetAddress) -> Result<crate::interface::IfaceId, KernelError> {
        let ep = dest.as_ipv4().ok_or(KernelError::AddressFamilyUnsupported)?;
        crate::route::lookup(ep.addr)
            .map(|r| r.iface)
            .ok_or(KernelError::HostUnreachable)
    }
}
