//! Network packet buffers.
//!
//! A packet owns a fixed-size byte buffer with a sliding start pointer.
//! Prepending a header *inserts* bytes (the start pointer moves back);
//! peeling one *consumes* them (the start pointer moves forward). Neither
//! copies any data, so a frame received once traverses the whole stack in
//! place.

use alloc::boxed::Box;
use alloc::vec;

use muon_core::KernelError;

use crate::interface::IfaceId;
use crate::proto::Protocol;

/// A packet: buffer, window, interface and protocol tag.
#[derive(Debug, Clone)]
pub struct Packet {
    iface: Option<IfaceId>,
    proto: Protocol,
    buf: Box<[u8]>,
    /// Offset of the payload window within `buf`.
    start: usize,
    /// Length of the payload window.
    len: usize,
}

impl Packet {
    /// Allocates a packet whose buffer holds `capacity` bytes, in the
    /// reset state (empty window at the buffer base).
    pub fn new(capacity: usize) -> Self {
        Self {
            iface: None,
            proto: Protocol::Unknown,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    /// Allocates a packet for transmission: `headroom` bytes reserved for
    /// the headers that will be inserted on the way down, and a window of
    /// `payload` bytes ready to fill.
    pub fn with_headroom(headroom: usize, payload: usize) -> Self {
        Self {
            iface: None,
            proto: Protocol::Unknown,
            buf: vec![0u8; headroom + payload].into_boxed_slice(),
            start: headroom,
            len: payload,
        }
    }

    /// Repositions the window to an empty one at the buffer base,
    /// enabling reuse by the receive loop.
    pub fn reset(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    /// The buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The payload window.
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    /// The payload window, mutable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.start + self.len]
    }

    /// The whole buffer, mutable. Receive loops read frames into this and
    /// then call [`set_len`](Self::set_len).
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The window length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sets the window length (the start point is unchanged).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the window would run past the buffer end.
    pub fn set_len(&mut self, len: usize) -> Result<(), KernelError> {
        if self.start + len > self.buf.len() {
            return Err(KernelError::InvalidArgument);
        }
        self.len = len;
        Ok(())
    }

    /// Grows the window backwards by `n` bytes, making room for a header.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the buffer would underflow.
    pub fn insert(&mut self, n: usize) -> Result<(), KernelError> {
        if n > self.start {
            return Err(KernelError::InvalidArgument);
        }
        self.start -= n;
        self.len += n;
        Ok(())
    }

    /// Shrinks the window from the front by `n` bytes, discarding a
    /// header that has been decoded.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the window holds fewer than `n` bytes.
    pub fn consume(&mut self, n: usize) -> Result<(), KernelError> {
        if n > self.len {
            return Err(KernelError::InvalidArgument);
        }
        self.start += n;
        self.len -= n;
        Ok(())
    }

    /// Tags the packet with `proto` and inserts `n` header bytes.
    pub fn encapsulate(&mut self, proto: Protocol, n: usize) -> Result<(), KernelError> {
        self.insert(n)?;
        self.proto = proto;
        Ok(())
    }

    /// The packet's protocol tag.
    pub fn proto(&self) -> Protocol {
        self.proto
    }

    /// Sets the protocol tag.
    pub fn set_proto(&mut self, proto: Protocol) {
        self.proto = proto;
    }

    /// The interface the packet belongs to.
    pub fn iface(&self) -> Option<IfaceId> {
        self.iface
    }

    /// Associates the packet with an interface.
    pub fn set_iface(&mut self, iface: IfaceId) {
        self.iface = Some(iface);
    }

    /// Produces an independent copy of the buffer and metadata.
    pub fn clone_packet(&self) -> Self {
        self.clone()
    }
}
