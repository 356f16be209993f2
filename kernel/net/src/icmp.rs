//! ICMP protocol driver.
//!
//! Answers echo requests with echo replies (identifier, sequence number
//! and payload preserved). Every other message type is counted as
//! handled and discarded.

use muon_core::KernelError;
use muon_core::ktrace;

use crate::address::NetAddress;
use crate::cksum::checksum;
use crate::ethernet::ETH_HDR_LEN;
use crate::ipv4::IPV4_HDR_LEN;
use crate::packet::Packet;
use crate::proto::{self, Protocol, ProtocolDriver};

/// Length of the fixed ICMP header.
pub const ICMP_HDR_LEN: usize = 8;

/// Echo reply message type.
pub const TYPE_ECHO_REPLY: u8 = 0;
/// Echo request message type.
pub const TYPE_ECHO_REQUEST: u8 = 8;

/// The ICMP driver.
pub struct IcmpDriver;

/// The driver instance registered under [`Protocol::Icmp`].
pub static ICMP: IcmpDriver = IcmpDriver;

impl ProtocolDriver for IcmpDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    fn name(&self) -> &'static str {
        "ICMP"
    }

    fn rx(
        &self,
        src: &mut NetAddress,
        dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        if packet.len() < ICMP_HDR_LEN {
            return Err(KernelError::CorruptData);
        }
        if checksum(packet.payload()) != 0 {
            return Err(KernelError::ChecksumMismatch);
        }

        let msg_type = packet.payload()[0];
        match msg_type {
            TYPE_ECHO_REQUEST => self.send_echo_reply(src, dest, packet),
            other => {
                ktrace!("icmp: type {} discarded", other);
                Ok(())
            }
        }
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet =
            Packet::with_headroom(ETH_HDR_LEN + IPV4_HDR_LEN + ICMP_HDR_LEN, payload);
        packet.set_proto(Protocol::Icmp);
        Ok(packet)
    }
}

impl IcmpDriver {
    /// Builds and transmits the reply to an echo request.
    fn send_echo_reply(
        &self,
        src: &NetAddress,
        dest: &NetAddress,
        request: &mut Packet,
    ) -> Result<(), KernelError> {
        let data = &request.payload()[ICMP_HDR_LEN..];

        let mut reply = self.packet_alloc(data.len())?;
        reply.insert(ICMP_HDR_LEN)?;
        if let Some(iface) = request.iface() {
            reply.set_iface(iface);
        }

        let request_hdr_id_seq = {
            let hdr = request.payload();
            [hdr[4], hdr[5], hdr[6], hdr[7]]
        };

        let body = reply.payload_mut();
        body[0] = TYPE_ECHO_REPLY;
        body[1] = 0;
        body[2..4].fill(0);
        body[4..8].copy_from_slice(&request_hdr_id_seq);
        body[ICMP_HDR_LEN..].copy_from_slice(data);

        let sum = checksum(body);
        body[2..4].copy_from_slice(&sum.to_be_bytes());

        reply.set_proto(Protocol::Icmp);

        // The reply goes back to the requester; our address was the
        // request's destination.
        let reply_src = *dest;
        let reply_dest = *src;
        let src_arg = match reply_src {
            NetAddress::Unknown => None,
            addr => Some(addr),
        };
        proto::tx(src_arg.as_ref(), &reply_dest, &mut reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Ipv4Addr, MacAddr};
    use crate::arp;
    use crate::interface;
    use crate::testutil::make_nic;

    fn echo_request(id: u16, seq: u16, data: &[u8]) -> Packet {
        let mut packet = Packet::new(64);
        packet.set_len(ICMP_HDR_LEN + data.len()).unwrap();
        let body = packet.payload_mut();
        body[0] = TYPE_ECHO_REQUEST;
        body[1] = 0;
        body[4..6].copy_from_slice(&id.to_be_bytes());
        body[6..8].copy_from_slice(&seq.to_be_bytes());
        body[ICMP_HDR_LEN..].copy_from_slice(data);
        let sum = checksum(packet.payload());
        packet.payload_mut()[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    #[test]
    fn echo_request_gets_a_reply() {
        let (iface, nic) = make_nic("icmp", [2, 0, 0, 0, 5, 1]);
        let our_ip = Ipv4Addr::new(10, 60, 0, 1);
        let peer_ip = Ipv4Addr::new(10, 60, 0, 2);
        let peer_mac = MacAddr([2, 0, 0, 0, 5, 2]);
        interface::set_proto_addr(iface, NetAddress::ipv4(our_ip)).unwrap();
        arp::cache_add(iface, peer_ip, peer_mac);

        let mut request = echo_request(0x77, 3, b"payload");
        request.set_iface(iface);
        request.set_proto(Protocol::Icmp);

        let mut src = NetAddress::ipv4(peer_ip);
        let mut dest = NetAddress::ipv4(our_ip);
        ICMP.rx(&mut src, &mut dest, &mut request).unwrap();

        let frames = nic.tx_frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[0..6], &peer_mac.0);

        let ip = &frame[14..34];
        assert_eq!(ip[9], 1, "ICMP protocol byte");
        assert_eq!(&ip[12..16], &our_ip.octets());
        assert_eq!(&ip[16..20], &peer_ip.octets());

        let icmp = &frame[34..];
        assert_eq!(icmp[0], TYPE_ECHO_REPLY);
        assert_eq!(&icmp[4..6], &0x77u16.to_be_bytes(), "identifier preserved");
        assert_eq!(&icmp[6..8], &3u16.to_be_bytes(), "sequence preserved");
        assert_eq!(&icmp[8..], b"payload");
        assert_eq!(checksum(icmp), 0, "reply checksum verifies");
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        crate::testutil::ensure_stack();
        let mut request = echo_request(1, 1, b"x");
        request.payload_mut()[2] ^= 0xff;

        let mut src = NetAddress::ipv4(Ipv4Addr::new(10, 0, 0, 2));
        let mut dest = NetAddress::ipv4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            ICMP.rx(&mut src, &mut dest, &mut request).unwrap_err(),
            KernelError::ChecksumMismatch
        );
    }

    #[test]
    fn non_echo_types_are_discarded() {
        let (_iface, nic) = make_nic("icmpd", [2, 0, 0, 0, 5, 3]);

        let mut packet = Packet::new(32);
        packet.set_len(ICMP_HDR_LEN).unwrap();
        packet.payload_mut()[0] = 11; // time exceeded
        let sum = checksum(packet.payload());
        packet.payload_mut()[2..4].copy_from_slice(&sum.to_be_bytes());

        let mut src = NetAddress::ipv4(Ipv4Addr::new(10, 0, 0, 2));
        let mut dest = NetAddress::ipv4(Ipv4Addr::new(10, 0, 0, 1));
        ICMP.rx(&mut src, &mut dest, &mut packet).unwrap();
        assert!(nic.tx_frames().is_empty());
    }

    #[test]
    fn short_messages_are_corrupt() {
        crate::testutil::ensure_stack();
        let mut packet = Packet::new(8);
        packet.set_len(4).unwrap();
        let mut src = NetAddress::Unknown;
        let mut dest = NetAddress::Unknown;
        assert_eq!(
            ICMP.rx(&mut src, &mut dest, &mut packet).unwrap_err(),
            KernelError::CorruptData
        );
    }
}
