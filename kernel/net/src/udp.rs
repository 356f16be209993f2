//! UDP protocol driver.
//!
//! Datagram delivery with per-port handlers: binding a port claims it in
//! the allocation bitmap and registers a receive handler; datagrams for
//! unbound ports are dropped.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use muon_core::KernelError;
use muon_core::sync::SpinLock;

use crate::address::{Ipv4Endpoint, NetAddress};
use crate::ethernet::ETH_HDR_LEN;
use crate::ipv4::IPV4_HDR_LEN;
use crate::packet::Packet;
use crate::ports::{self, PortRequest};
use crate::proto::{self, Protocol, ProtocolDriver};

/// Length of a UDP header.
pub const UDP_HDR_LEN: usize = 8;

/// A bound-port receive handler: source, destination, payload.
pub type UdpHandler = Box<dyn Fn(&NetAddress, &NetAddress, &[u8]) + Send + Sync>;

static HANDLERS: SpinLock<BTreeMap<u16, UdpHandler>> = SpinLock::new(BTreeMap::new());

/// Claims `port` and registers `handler` for datagrams addressed to it.
///
/// # Errors
///
/// Port-allocation errors propagate (`AddressInUse`, `PermissionDenied`).
pub fn bind(port: u16, handler: UdpHandler) -> Result<(), KernelError> {
    ports::alloc(PortRequest::Specific(port))?;
    HANDLERS.lock().insert(port, handler);
    Ok(())
}

/// Claims an ephemeral port and registers `handler` for it.
///
/// Returns the allocated port.
pub fn bind_ephemeral(handler: UdpHandler) -> Result<u16, KernelError> {
    let port = ports::alloc(PortRequest::Ephemeral)?;
    HANDLERS.lock().insert(port, handler);
    Ok(port)
}

/// Releases a bound port and its handler.
pub fn unbind(port: u16) -> Result<(), KernelError> {
    HANDLERS
        .lock()
        .remove(&port)
        .ok_or(KernelError::NotFound)?;
    ports::free(port)
}

/// Sends `data` as one datagram from `src` to `dest`.
pub fn send(src: Ipv4Endpoint, dest: Ipv4Endpoint, data: &[u8]) -> Result<(), KernelError> {
    let mut packet = UDP.packet_alloc(data.len())?;
    packet.payload_mut().copy_from_slice(data);
    UDP.tx(
        Some(&NetAddress::Ipv4(src)),
        &NetAddress::Ipv4(dest),
        &mut packet,
    )
}

/// The UDP driver.
pub struct UdpDriver;

/// The driver instance registered under [`Protocol::Udp`].
pub static UDP: UdpDriver = UdpDriver;

impl ProtocolDriver for UdpDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn name(&self) -> &'static str {
        "UDP"
    }

    fn rx(
        &self,
        src: &mut NetAddress,
        dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        if packet.len() < UDP_HDR_LEN {
            return Err(KernelError::CorruptData);
        }

        let hdr = packet.payload();
        let src_port = u16::from_be_bytes([hdr[0], hdr[1]]);
        let dest_port = u16::from_be_bytes([hdr[2], hdr[3]]);
        let udp_len = usize::from(u16::from_be_bytes([hdr[4], hdr[5]]));

        if udp_len < UDP_HDR_LEN || udp_len > packet.len() {
            return Err(KernelError::CorruptData);
        }

        packet.consume(UDP_HDR_LEN)?;
        // Trim Ethernet padding off short frames.
        packet.set_len(udp_len - UDP_HDR_LEN)?;

        if let NetAddress::Ipv4(ep) = src {
            ep.port = src_port;
        }
        if let NetAddress::Ipv4(ep) = dest {
            ep.port = dest_port;
        }

        let handlers = HANDLERS.lock();
        let handler = handlers.get(&dest_port).ok_or(KernelError::NotFound)?;
        handler(src, dest, packet.payload());
        Ok(())
    }

    fn tx(
        &self,
        src: Option<&NetAddress>,
        dest: &NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        let src_ep = src
            .and_then(|a| a.as_ipv4())
            .ok_or(KernelError::AddressFamilyUnsupported)?;
        let dest_ep = dest.as_ipv4().ok_or(KernelError::AddressFamilyUnsupported)?;

        packet.insert(UDP_HDR_LEN)?;
        let udp_len = packet.len() as u16;

        let hdr = packet.payload_mut();
        hdr[0..2].copy_from_slice(&src_ep.port.to_be_bytes());
        hdr[2..4].copy_from_slice(&dest_ep.port.to_be_bytes());
        hdr[4..6].copy_from_slice(&udp_len.to_be_bytes());
        // Checksum 0: legal over IPv4, meaning "not computed".
        hdr[6..8].fill(0);

        packet.set_proto(Protocol::Udp);
        proto::tx(src, dest, packet)
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet =
            Packet::with_headroom(ETH_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN, payload);
        packet.set_proto(Protocol::Udp);
        Ok(packet)
    }
}
