//! TCP protocol driver.
//!
//! The segment codec and the registry entry. Connection state machines
//! are not implemented: received segments are decoded and dropped, which
//! keeps the dispatcher, counters and port bitmap honest until a real
//! implementation lands.

use bitflags::bitflags;

use muon_core::KernelError;
use muon_core::ktrace;

use crate::address::NetAddress;
use crate::ethernet::ETH_HDR_LEN;
use crate::ipv4::IPV4_HDR_LEN;
use crate::packet::Packet;
use crate::ports;
use crate::proto::{Protocol, ProtocolDriver};

/// Length of a TCP header without options.
pub const TCP_HDR_LEN: usize = 20;

bitflags! {
    /// TCP segment flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        /// No more data from the sender.
        const FIN = 1 << 0;
        /// Synchronise sequence numbers.
        const SYN = 1 << 1;
        /// Reset the connection.
        const RST = 1 << 2;
        /// Push buffered data to the receiver.
        const PSH = 1 << 3;
        /// The acknowledgment field is significant.
        const ACK = 1 << 4;
        /// The urgent pointer is significant.
        const URG = 1 << 5;
    }
}

/// A decoded TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dest_port: u16,
    /// Sequence number.
    pub seq: u32,
    /// Acknowledgment number.
    pub ack: u32,
    /// Header length in bytes (20 plus options).
    pub header_len: usize,
    /// Segment flags.
    pub flags: TcpFlags,
    /// Receive window.
    pub window: u16,
    /// Checksum as transmitted.
    pub cksum: u16,
    /// Urgent pointer.
    pub urgent: u16,
}

impl TcpHeader {
    /// Decodes a header from the front of `data`.
    ///
    /// # Errors
    ///
    /// `CorruptData` if `data` is shorter than the header (including the
    /// options its data-offset field declares) or the offset is invalid.
    pub fn parse(data: &[u8]) -> Result<Self, KernelError> {
        if data.len() < TCP_HDR_LEN {
            return Err(KernelError::CorruptData);
        }
        let header_len = usize::from(data[12] >> 4) * 4;
        if header_len < TCP_HDR_LEN || header_len > data.len() {
            return Err(KernelError::CorruptData);
        }

        Ok(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dest_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            header_len,
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            cksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
        })
    }

    /// Encodes the header (without options) into the front of `out`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `out` is shorter than [`TCP_HDR_LEN`].
    pub fn serialize(&self, out: &mut [u8]) -> Result<(), KernelError> {
        if out.len() < TCP_HDR_LEN {
            return Err(KernelError::InvalidArgument);
        }
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack.to_be_bytes());
        out[12] = ((TCP_HDR_LEN / 4) as u8) << 4;
        out[13] = self.flags.bits();
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        out[16..18].copy_from_slice(&self.cksum.to_be_bytes());
        out[18..20].copy_from_slice(&self.urgent.to_be_bytes());
        Ok(())
    }
}

/// The TCP driver.
pub struct TcpDriver;

/// The driver instance registered under [`Protocol::Tcp`].
pub static TCP: TcpDriver = TcpDriver;

impl ProtocolDriver for TcpDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    fn name(&self) -> &'static str {
        "TCP"
    }

    fn rx(
        &self,
        src: &mut NetAddress,
        dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        let hdr = TcpHeader::parse(packet.payload())?;
        packet.consume(hdr.header_len)?;

        if let NetAddress::Ipv4(ep) = src {
            ep.port = hdr.src_port;
        }
        if let NetAddress::Ipv4(ep) = dest {
            ep.port = hdr.dest_port;
        }

        // No connection handling yet: segments for unbound ports drop.
        if !ports::is_allocated(hdr.dest_port) {
            return Err(KernelError::NotFound);
        }
        ktrace!("tcp: segment for port {} dropped (no state machine)", hdr.dest_port);
        Ok(())
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet =
            Packet::with_headroom(ETH_HDR_LEN + IPV4_HDR_LEN + TCP_HDR_LEN, payload);
        packet.set_proto(Protocol::Tcp);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syn_header() -> TcpHeader {
        TcpHeader {
            src_port: 49200,
            dest_port: 80,
            seq: 0x1234_5678,
            ack: 0,
            header_len: TCP_HDR_LEN,
            flags: TcpFlags::SYN,
            window: 8192,
            cksum: 0,
            urgent: 0,
        }
    }

    #[test]
    fn codec_round_trip() {
        let hdr = syn_header();
        let mut buf = [0u8; TCP_HDR_LEN];
        hdr.serialize(&mut buf).unwrap();

        let parsed = TcpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn parse_handles_options_length() {
        let mut buf = [0u8; 28];
        syn_header().serialize(&mut buf).unwrap();
        // Declare 8 bytes of options.
        buf[12] = 7 << 4;

        let parsed = TcpHeader::parse(&buf).unwrap();
        assert_eq!(parsed.header_len, 28);

        // The declared options run past the data: corrupt.
        assert_eq!(
            TcpHeader::parse(&buf[..24]).unwrap_err(),
            KernelError::CorruptData
        );
    }

    #[test]
    fn parse_rejects_short_offsets() {
        let mut buf = [0u8; TCP_HDR_LEN];
        syn_header().serialize(&mut buf).unwrap();
        buf[12] = 4 << 4; // 16 bytes: below the minimum header
        assert_eq!(TcpHeader::parse(&buf).unwrap_err(), KernelError::CorruptData);
    }

    #[test]
    fn flag_bits_match_the_wire_format() {
        let hdr = TcpHeader {
            flags: TcpFlags::SYN | TcpFlags::ACK,
            ..syn_header()
        };
        let mut buf = [0u8; TCP_HDR_LEN];
        hdr.serialize(&mut buf).unwrap();
        assert_eq!(buf[13], 0x12);
    }

    #[test]
    fn rx_consumes_header_and_drops_unbound() {
        crate::testutil::ensure_stack();
        let mut packet = Packet::new(64);
        packet.set_len(TCP_HDR_LEN + 4).unwrap();
        let mut hdr = syn_header();
        hdr.dest_port = 9990; // nothing listens here
        hdr.serialize(packet.payload_mut()).unwrap();

        let mut src = NetAddress::ipv4_endpoint(crate::address::Ipv4Addr::new(10, 0, 0, 2), 0);
        let mut dest = NetAddress::ipv4_endpoint(crate::address::Ipv4Addr::new(10, 0, 0, 1), 0);
        assert_eq!(
            TCP.rx(&mut src, &mut dest, &mut packet).unwrap_err(),
            KernelError::NotFound
        );
        assert_eq!(src.as_ipv4().unwrap().port, 49200);
        assert_eq!(dest.as_ipv4().unwrap().port, 9990);
        assert_eq!(packet.len(), 4, "header consumed");
    }
}
