//! Address Resolution Protocol (Ethernet + IPv4).
//!
//! The cache maps `(interface, IPv4 address)` pairs to hardware addresses
//! with a per-entry expiry time. Incoming requests addressed to one of
//! our interfaces produce replies; incoming replies (and the sender of
//! any request) populate the cache.
//!
//! The resolver answers from the cache or the broadcast special case
//! only; a miss fails with `HostUnreachable`. Requests for missing
//! entries are not sent yet — [`send_request`] exists for callers that
//! want to prime the cache themselves.

use alloc::vec::Vec;

use muon_core::sync::SpinLock;
use muon_core::{KernelError, time};

use crate::address::{Ipv4Addr, MacAddr, NetAddress};
use crate::ethernet::ETHERTYPE_IPV4;
use crate::interface::{self, IfaceId};
use crate::packet::Packet;
use crate::proto::{self, Protocol, ProtocolDriver};

/// Number of cache entries.
pub const ARP_CACHE_SIZE: usize = 16;

/// Seconds a cache entry stays valid.
pub const ARP_ENTRY_LIFETIME: u64 = 60;

/// ARP message length for Ethernet + IPv4.
const ARP_LEN: usize = 28;

const HW_TYPE_ETHERNET: u16 = 1;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// One cache entry.
#[derive(Debug, Clone, Copy)]
pub struct ArpEntry {
    /// Interface the mapping was learned on.
    pub iface: IfaceId,
    /// Protocol address.
    pub ip: Ipv4Addr,
    /// Hardware address.
    pub mac: MacAddr,
    /// Absolute expiry time, seconds since the epoch.
    pub expires: u64,
}

/// A fixed-capacity ARP cache.
pub struct ArpCache {
    entries: Vec<Option<ArpEntry>>,
    /// Replacement cursor used when every entry is live.
    victim: usize,
}

impl ArpCache {
    /// Creates a cache with `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self { entries, victim: 0 }
    }

    /// Inserts (or refreshes) a mapping, expiring
    /// [`ARP_ENTRY_LIFETIME`] seconds after `now`.
    ///
    /// Prefers the entry already holding this `(iface, ip)` pair, then an
    /// unused or expired slot, then the rotating victim.
    pub fn insert(&mut self, iface: IfaceId, ip: Ipv4Addr, mac: MacAddr, now: u64) {
        let slot = self
            .entries
            .iter()
            .position(|e| e.is_some_and(|e| e.iface == iface && e.ip == ip))
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|e| e.is_none_or(|e| e.expires <= now))
            })
            .unwrap_or_else(|| {
                let v = self.victim;
                self.victim = (self.victim + 1) % self.entries.len();
                v
            });

        self.entries[slot] = Some(ArpEntry {
            iface,
            ip,
            mac,
            expires: now + ARP_ENTRY_LIFETIME,
        });
    }

    /// Looks up an unexpired mapping.
    pub fn lookup(&self, iface: IfaceId, ip: Ipv4Addr, now: u64) -> Option<MacAddr> {
        self.entries.iter().flatten().find_map(|e| {
            (e.iface == iface && e.ip == ip && e.expires > now).then_some(e.mac)
        })
    }
}

static CACHE: SpinLock<Option<ArpCache>> = SpinLock::new(None);

fn with_cache<R>(f: impl FnOnce(&mut ArpCache) -> R) -> R {
    let mut cache = CACHE.lock();
    f(cache.get_or_insert_with(|| ArpCache::new(ARP_CACHE_SIZE)))
}

/// Adds a mapping to the global cache.
pub fn cache_add(iface: IfaceId, ip: Ipv4Addr, mac: MacAddr) {
    with_cache(|c| c.insert(iface, ip, mac, time::now()));
}

/// Looks up a mapping in the global cache.
pub fn cache_lookup(iface: IfaceId, ip: Ipv4Addr) -> Option<MacAddr> {
    with_cache(|c| c.lookup(iface, ip, time::now()))
}

/// Resolves the hardware address for `ip` on `iface`.
///
/// Served from the cache; the IPv4 broadcast address maps to the Ethernet
/// broadcast address. A missing entry fails with
/// [`KernelError::HostUnreachable`] — resolution on demand would need an
/// ARP request/wait cycle here, which is not implemented yet.
pub fn resolve(iface: IfaceId, ip: Ipv4Addr) -> Result<MacAddr, KernelError> {
    if ip == Ipv4Addr::BROADCAST {
        return Ok(MacAddr::BROADCAST);
    }
    if let Some(mac) = cache_lookup(iface, ip) {
        return Ok(mac);
    }

    Err(KernelError::HostUnreachable)
}

/// Transmits an ARP request for `ip` on `iface`.
pub fn send_request(iface: IfaceId, ip: Ipv4Addr) -> Result<(), KernelError> {
    let our_mac = interface::hw_addr(iface)
        .and_then(|a| a.as_ethernet())
        .ok_or(KernelError::AddressFamilyUnsupported)?;
    let our_ip = interface::proto_addr(iface)
        .and_then(|a| a.as_ipv4())
        .map(|ep| ep.addr)
        .unwrap_or(Ipv4Addr::ANY);

    transmit(iface, OP_REQUEST, our_mac, our_ip, MacAddr::BROADCAST, ip, MacAddr::BROADCAST)
}

/// Builds and transmits one ARP message.
#[allow(clippy::too_many_arguments)]
fn transmit(
    iface: IfaceId,
    opcode: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
    dest: MacAddr,
) -> Result<(), KernelError> {
    let mut packet = ARP.packet_alloc(0)?;
    packet.set_iface(iface);
    packet.set_len(ARP_LEN)?;

    let body = packet.payload_mut();
    body[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
    body[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    body[4] = 6;
    body[5] = 4;
    body[6..8].copy_from_slice(&opcode.to_be_bytes());
    body[8..14].copy_from_slice(&sender_mac.0);
    body[14..18].copy_from_slice(&sender_ip.octets());
    body[18..24].copy_from_slice(&target_mac.0);
    body[24..28].copy_from_slice(&target_ip.octets());

    packet.set_proto(Protocol::Arp);
    proto::tx(
        Some(&NetAddress::Ethernet(sender_mac)),
        &NetAddress::Ethernet(dest),
        &mut packet,
    )
}

/// The ARP driver.
pub struct ArpDriver;

/// The driver instance registered under [`Protocol::Arp`].
pub static ARP: ArpDriver = ArpDriver;

impl ProtocolDriver for ArpDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Arp
    }

    fn name(&self) -> &'static str {
        "ARP"
    }

    fn rx(
        &self,
        _src: &mut NetAddress,
        _dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        if packet.len() < ARP_LEN {
            return Err(KernelError::CorruptData);
        }
        let iface = packet.iface().ok_or(KernelError::InvalidArgument)?;

        let body = packet.payload();
        let hw_type = u16::from_be_bytes([body[0], body[1]]);
        let proto_type = u16::from_be_bytes([body[2], body[3]]);
        if hw_type != HW_TYPE_ETHERNET || proto_type != ETHERTYPE_IPV4 {
            // Not an Ethernet+IPv4 message; ignore without error.
            return Ok(());
        }

        // Only interfaces with a configured IPv4 address take part.
        let Some(our_ip) = interface::proto_addr(iface)
            .and_then(|a| a.as_ipv4())
            .map(|ep| ep.addr)
            .filter(|&ip| ip != Ipv4Addr::ANY)
        else {
            return Ok(());
        };

        let opcode = u16::from_be_bytes([body[6], body[7]]);
        let sender_mac = MacAddr([body[8], body[9], body[10], body[11], body[12], body[13]]);
        let sender_ip = Ipv4Addr(u32::from_be_bytes([body[14], body[15], body[16], body[17]]));
        let target_ip = Ipv4Addr(u32::from_be_bytes([body[24], body[25], body[26], body[27]]));

        match opcode {
            OP_REQUEST if target_ip == our_ip => {
                cache_add(iface, sender_ip, sender_mac);

                let our_mac = interface::hw_addr(iface)
                    .and_then(|a| a.as_ethernet())
                    .ok_or(KernelError::AddressFamilyUnsupported)?;
                transmit(
                    iface, OP_REPLY, our_mac, our_ip, sender_mac, sender_ip, sender_mac,
                )
            }
            OP_REPLY => {
                cache_add(iface, sender_ip, sender_mac);
                Ok(())
            }
            // Other opcodes (or requests for someone else): ignore.
            _ => Ok(()),
        }
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet = Packet::with_headroom(crate::ethernet::ETH_HDR_LEN, ARP_LEN + payload);
        packet.set_proto(Protocol::Arp);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_nic;

    fn iface(n: u32) -> IfaceId {
        IfaceId(n)
    }

    const IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    #[test]
    fn entries_expire() {
        let mut cache = ArpCache::new(4);
        let now = 1000;
        cache.insert(iface(0), IP, MAC, now);

        assert_eq!(cache.lookup(iface(0), IP, now + 30), Some(MAC));
        assert_eq!(cache.lookup(iface(0), IP, now + 120), None);
    }

    #[test]
    fn lookup_is_per_interface() {
        let mut cache = ArpCache::new(4);
        cache.insert(iface(0), IP, MAC, 0);
        assert!(cache.lookup(iface(1), IP, 10).is_none());
        assert!(cache.lookup(iface(0), IP, 10).is_some());
    }

    #[test]
    fn reinsert_refreshes_in_place() {
        let mut cache = ArpCache::new(2);
        cache.insert(iface(0), IP, MAC, 0);
        let other = MacAddr([1; 6]);
        cache.insert(iface(0), IP, other, 30);

        assert_eq!(cache.lookup(iface(0), IP, 40), Some(other));
        // The refresh reused the slot, so the second slot is still free
        // for a different host.
        let ip2 = Ipv4Addr::new(192, 0, 2, 2);
        cache.insert(iface(0), ip2, MAC, 30);
        assert!(cache.lookup(iface(0), IP, 40).is_some());
        assert!(cache.lookup(iface(0), ip2, 40).is_some());
    }

    #[test]
    fn full_cache_rotates_victims() {
        let mut cache = ArpCache::new(2);
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 1), MAC, 0);
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 2), MAC, 0);
        // All live: the third insert must evict someone but keep working.
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 3), MAC, 0);

        let live = [1u32, 2, 3]
            .iter()
            .filter(|&&d| cache.lookup(iface(0), Ipv4Addr::new(10, 0, 0, d as u8), 1).is_some())
            .count();
        assert_eq!(live, 2);
        assert!(cache.lookup(iface(0), Ipv4Addr::new(10, 0, 0, 3), 1).is_some());
    }

    #[test]
    fn expired_slots_are_reused_first() {
        let mut cache = ArpCache::new(2);
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 1), MAC, 0);
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 2), MAC, 1000);

        // The first entry has expired by now; the new mapping must take
        // its slot, not the live one.
        cache.insert(iface(0), Ipv4Addr::new(10, 0, 0, 3), MAC, 2000);
        assert!(cache.lookup(iface(0), Ipv4Addr::new(10, 0, 0, 2), 1030).is_some());
        assert!(cache.lookup(iface(0), Ipv4Addr::new(10, 0, 0, 3), 2010).is_some());
    }

    #[test]
    fn broadcast_resolves_without_cache() {
        let (ifid, _nic) = make_nic("arpbc", [2, 0, 0, 0, 2, 1]);
        assert_eq!(resolve(ifid, Ipv4Addr::BROADCAST), Ok(MacAddr::BROADCAST));
    }

    #[test]
    fn miss_fails_without_transmitting() {
        let (ifid, nic) = make_nic("arpms", [2, 0, 0, 0, 2, 2]);
        interface::set_proto_addr(ifid, NetAddress::ipv4(Ipv4Addr::new(10, 9, 0, 1))).unwrap();

        let err = resolve(ifid, Ipv4Addr::new(10, 9, 0, 2)).unwrap_err();
        assert_eq!(err, KernelError::HostUnreachable);
        assert!(nic.tx_frames().is_empty(), "resolution never sends requests");
    }

    #[test]
    fn send_request_broadcasts_a_request() {
        let (ifid, nic) = make_nic("arpsr", [2, 0, 0, 0, 2, 8]);
        interface::set_proto_addr(ifid, NetAddress::ipv4(Ipv4Addr::new(10, 9, 0, 1))).unwrap();

        send_request(ifid, Ipv4Addr::new(10, 9, 0, 2)).unwrap();

        let frames = nic.tx_frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[0..6], &[0xff; 6], "broadcast frame");
        assert_eq!(&frame[12..14], &ETHERTYPE_ARP_BYTES);
        // Opcode request, our addresses as sender, target IP at the tail.
        assert_eq!(&frame[14 + 6..14 + 8], &OP_REQUEST.to_be_bytes());
        assert_eq!(&frame[14 + 8..14 + 14], &[2, 0, 0, 0, 2, 8]);
        assert_eq!(&frame[14 + 14..14 + 18], &[10, 9, 0, 1]);
        assert_eq!(&frame[14 + 24..14 + 28], &[10, 9, 0, 2]);
    }

    const ETHERTYPE_ARP_BYTES: [u8; 2] = crate::ethernet::ETHERTYPE_ARP.to_be_bytes();

    #[test]
    fn request_for_us_generates_a_reply() {
        let (ifid, nic) = make_nic("arprq", [2, 0, 0, 0, 2, 3]);
        let our_ip = Ipv4Addr::new(10, 8, 0, 1);
        interface::set_proto_addr(ifid, NetAddress::ipv4(our_ip)).unwrap();

        // Hand-built request from 10.8.0.2 asking for 10.8.0.1.
        let sender_mac = MacAddr([2, 0, 0, 0, 2, 4]);
        let mut packet = ARP.packet_alloc(0).unwrap();
        packet.set_iface(ifid);
        packet.set_len(ARP_LEN).unwrap();
        let body = packet.payload_mut();
        body[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        body[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        body[4] = 6;
        body[5] = 4;
        body[6..8].copy_from_slice(&OP_REQUEST.to_be_bytes());
        body[8..14].copy_from_slice(&sender_mac.0);
        body[14..18].copy_from_slice(&Ipv4Addr::new(10, 8, 0, 2).octets());
        body[18..24].copy_from_slice(&[0; 6]);
        body[24..28].copy_from_slice(&our_ip.octets());

        let mut src = NetAddress::Ethernet(sender_mac);
        let mut dest = NetAddress::Ethernet(MacAddr::BROADCAST);
        ARP.rx(&mut src, &mut dest, &mut packet).unwrap();

        // The sender was cached...
        assert_eq!(
            cache_lookup(ifid, Ipv4Addr::new(10, 8, 0, 2)),
            Some(sender_mac)
        );

        // ...and a unicast reply went out with our addresses.
        let frames = nic.tx_frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[0..6], &sender_mac.0);
        assert_eq!(&frame[14 + 6..14 + 8], &OP_REPLY.to_be_bytes());
        assert_eq!(&frame[14 + 8..14 + 14], &[2, 0, 0, 0, 2, 3]);
        assert_eq!(&frame[14 + 14..14 + 18], &our_ip.octets());
    }

    #[test]
    fn reply_populates_cache_without_transmitting() {
        let (ifid, nic) = make_nic("arprp", [2, 0, 0, 0, 2, 5]);
        interface::set_proto_addr(ifid, NetAddress::ipv4(Ipv4Addr::new(10, 7, 0, 1))).unwrap();

        let sender_mac = MacAddr([2, 0, 0, 0, 2, 6]);
        let sender_ip = Ipv4Addr::new(10, 7, 0, 2);
        let mut packet = ARP.packet_alloc(0).unwrap();
        packet.set_iface(ifid);
        packet.set_len(ARP_LEN).unwrap();
        let body = packet.payload_mut();
        body[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        body[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        body[4] = 6;
        body[5] = 4;
        body[6..8].copy_from_slice(&OP_REPLY.to_be_bytes());
        body[8..14].copy_from_slice(&sender_mac.0);
        body[14..18].copy_from_slice(&sender_ip.octets());

        let mut src = NetAddress::Unknown;
        let mut dest = NetAddress::Unknown;
        ARP.rx(&mut src, &mut dest, &mut packet).unwrap();

        assert_eq!(cache_lookup(ifid, sender_ip), Some(sender_mac));
        assert!(nic.tx_frames().is_empty());
    }

    #[test]
    fn unconfigured_interface_ignores_arp() {
        let (ifid, nic) = make_nic("arpuc", [2, 0, 0, 0, 2, 7]);

        let mut packet = ARP.packet_alloc(0).unwrap();
        packet.set_iface(ifid);
        packet.set_len(ARP_LEN).unwrap();
        packet.payload_mut()[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        packet.payload_mut()[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let mut src = NetAddress::Unknown;
        let mut dest = NetAddress::Unknown;
        ARP.rx(&mut src, &mut dest, &mut packet).unwrap();
        assert!(nic.tx_frames().is_empty());
    }
}
