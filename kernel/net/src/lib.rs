//! Layered network stack.
//!
//! [`packet::Packet`] carries frames up and down the stack with a sliding
//! start pointer (no copies for encapsulation). [`interface`] binds
//! network devices to the stack and runs one RX process per interface.
//! Protocol drivers register in [`proto`]'s table; the dispatcher routes
//! received packets by their protocol tag and outgoing packets by the
//! destination address family.
//!
//! Drivers provided here: [`raw`], [`ethernet`], [`arp`], [`ipv4`] (with
//! [`route`] and [`ports`]), [`udp`], [`tcp`] and [`icmp`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address;
pub mod arp;
pub mod cksum;
pub mod ethernet;
pub mod icmp;
pub mod interface;
pub mod ipv4;
pub mod packet;
pub mod ports;
pub mod proto;
pub mod raw;
pub mod route;
pub mod tcp;
pub mod udp;

#[cfg(test)]
pub(crate) mod testutil;

use muon_core::KernelError;
use muon_core::kinfo;

/// Registers every protocol driver. Idempotent: drivers already present
/// are left alone.
pub fn register_protocols() {
    let drivers: [&'static dyn proto::ProtocolDriver; 7] = [
        &raw::RAW,
        &ethernet::ETHERNET,
        &arp::ARP,
        &ipv4::IPV4,
        &udp::UDP,
        &tcp::TCP,
        &icmp::ICMP,
    ];
    for driver in drivers {
        match proto::register_driver(driver) {
            Ok(()) => kinfo!("net: registered {} protocol driver", driver.name()),
            Err(KernelError::Exists) => {}
            Err(e) => kinfo!("net: failed to register {}: {}", driver.name(), e),
        }
    }
}

/// Initialises the network stack: protocol drivers first, then one
/// interface (and RX process) per network device.
pub fn init() -> Result<(), KernelError> {
    register_protocols();
    interface::init()
}
