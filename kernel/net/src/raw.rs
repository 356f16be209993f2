//! Raw protocol driver.
//!
//! The tag frames carry before any decoding, and the allocator for
//! packets with no header requirements. Received raw frames that reach
//! the dispatcher unclaimed are discarded.

use muon_core::KernelError;
use muon_core::ktrace;

use crate::address::NetAddress;
use crate::packet::Packet;
use crate::proto::{Protocol, ProtocolDriver};

/// The raw driver.
pub struct RawDriver;

/// The driver instance registered under [`Protocol::Raw`].
pub static RAW: RawDriver = RawDriver;

impl ProtocolDriver for RawDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Raw
    }

    fn name(&self) -> &'static str {
        "raw"
    }

    fn rx(
        &self,
        _src: &mut NetAddress,
        _dest: &mut NetAddress,
        packet: &mut Packet,
    ) -> Result<(), KernelError> {
        ktrace!("raw: {} byte frame discarded", packet.len());
        Ok(())
    }

    fn packet_alloc(&self, payload: usize) -> Result<Packet, KernelError> {
        let mut packet = Packet::new(payload);
        packet.set_len(payload)?;
        packet.set_proto(Protocol::Raw);
        Ok(packet)
    }
}
