//! IPv4 port allocation.
//!
//! A doubly indirect bitmap over the whole port space: an outer table of
//! lazily allocated chunks, each chunk one bit per port. Privileged ports
//! (below 1024) are reserved for uid 0; ephemeral allocation scans
//! upwards from 49152, skipping fully allocated bytes eight ports at a
//! time.

use alloc::boxed::Box;
use alloc::vec::Vec;

use muon_core::KernelError;
use muon_core::sync::{SpinLock, preempt_guard};

/// First ephemeral port.
pub const EPHEMERAL_START: u16 = 49152;
/// One past the last privileged port.
pub const PRIVILEGED_END: u16 = 1024;

/// Ports covered by one chunk of the bitmap.
const PORTS_PER_CHUNK: usize = 2048;
/// Bytes per chunk.
const CHUNK_BYTES: usize = PORTS_PER_CHUNK / 8;
/// Number of chunks covering the 16-bit port space.
const CHUNK_COUNT: usize = 65536 / PORTS_PER_CHUNK;

/// How a port number is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRequest {
    /// The caller names the port.
    Specific(u16),
    /// Any free port from the ephemeral range.
    Ephemeral,
}

/// The port allocation bitmap.
pub struct PortSet {
    chunks: Vec<Option<Box<[u8; CHUNK_BYTES]>>>,
}

impl PortSet {
    /// Creates a set with every port free.
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    fn bit(&self, port: u16) -> bool {
        let chunk = port as usize / PORTS_PER_CHUNK;
        let within = port as usize % PORTS_PER_CHUNK;
        match self.chunks.get(chunk) {
            Some(Some(bytes)) => bytes[within / 8] & (1 << (within % 8)) != 0,
            _ => false,
        }
    }

    fn set_bit(&mut self, port: u16) {
        let chunk = port as usize / PORTS_PER_CHUNK;
        let within = port as usize % PORTS_PER_CHUNK;
        if self.chunks.len() < CHUNK_COUNT {
            self.chunks.resize_with(CHUNK_COUNT, || None);
        }
        let bytes = self.chunks[chunk].get_or_insert_with(|| Box::new([0u8; CHUNK_BYTES]));
        bytes[within / 8] |= 1 << (within % 8);
    }

    fn clear_bit(&mut self, port: u16) {
        let chunk = port as usize / PORTS_PER_CHUNK;
        let within = port as usize % PORTS_PER_CHUNK;
        if let Some(Some(bytes)) = self.chunks.get_mut(chunk) {
            bytes[within / 8] &= !(1 << (within % 8));
        }
    }

    /// Whether `port` is currently allocated.
    pub fn is_allocated(&self, port: u16) -> bool {
        self.bit(port)
    }

    /// Allocates a port.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for a privileged specific port when `uid` is
    /// not 0; `AddressInUse` if the named port is taken; `TooManyFiles`
    /// when the ephemeral range is exhausted.
    pub fn alloc(&mut self, request: PortRequest, uid: u16) -> Result<u16, KernelError> {
        match request {
            PortRequest::Specific(port) => {
                if port < PRIVILEGED_END && uid != 0 {
                    return Err(KernelError::PermissionDenied);
                }
                if self.bit(port) {
                    return Err(KernelError::AddressInUse);
                }
                self.set_bit(port);
                Ok(port)
            }
            PortRequest::Ephemeral => {
                let mut port = EPHEMERAL_START as u32;
                while port < 65536 {
                    // Skip fully allocated bytes eight ports at a time.
                    if port % 8 == 0 && self.byte_full(port as u16) {
                        port += 8;
                        continue;
                    }
                    if !self.bit(port as u16) {
                        self.set_bit(port as u16);
                        return Ok(port as u16);
                    }
                    port += 1;
                }
                Err(KernelError::TooManyFiles)
            }
        }
    }

    fn byte_full(&self, port: u16) -> bool {
        let chunk = port as usize / PORTS_PER_CHUNK;
        let within = port as usize % PORTS_PER_CHUNK;
        match self.chunks.get(chunk) {
            Some(Some(bytes)) => bytes[within / 8] == 0xff,
            _ => false,
        }
    }

    /// Frees a previously allocated port.
    ///
    /// # Errors
    ///
    /// `NotFound` if the port was not allocated.
    pub fn free(&mut self, port: u16) -> Result<(), KernelError> {
        if !self.bit(port) {
            return Err(KernelError::NotFound);
        }
        self.clear_bit(port);
        Ok(())
    }
}

impl Default for PortSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── Global port set ─────────────────────────────────────────────────────

static PORTS: SpinLock<PortSet> = SpinLock::new(PortSet::new());

/// Allocates a port from the global set on behalf of the current process.
pub fn alloc(request: PortRequest) -> Result<u16, KernelError> {
    let uid = muon_sched::scheduler::current_uid();
    let _guard = preempt_guard();
    PORTS.lock().alloc(request, uid)
}

/// Frees a port in the global set.
pub fn free(port: u16) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    PORTS.lock().free(port)
}

/// Whether a port is allocated in the global set.
pub fn is_allocated(port: u16) -> bool {
    PORTS.lock().is_allocated(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_allocation_and_free_are_inverse() {
        let mut ports = PortSet::new();
        assert_eq!(ports.alloc(PortRequest::Specific(8080), 100), Ok(8080));
        assert!(ports.is_allocated(8080));
        assert_eq!(
            ports.alloc(PortRequest::Specific(8080), 100).unwrap_err(),
            KernelError::AddressInUse
        );

        ports.free(8080).unwrap();
        assert!(!ports.is_allocated(8080));
        assert_eq!(ports.free(8080).unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn privileged_ports_need_uid_zero() {
        let mut ports = PortSet::new();
        assert_eq!(
            ports.alloc(PortRequest::Specific(80), 1000).unwrap_err(),
            KernelError::PermissionDenied
        );
        assert_eq!(ports.alloc(PortRequest::Specific(80), 0), Ok(80));
        assert_eq!(ports.alloc(PortRequest::Specific(1024), 1000), Ok(1024));
    }

    #[test]
    fn ephemeral_allocation_scans_from_the_start() {
        let mut ports = PortSet::new();
        assert_eq!(ports.alloc(PortRequest::Ephemeral, 7), Ok(EPHEMERAL_START));
        assert_eq!(
            ports.alloc(PortRequest::Ephemeral, 7),
            Ok(EPHEMERAL_START + 1)
        );

        ports.free(EPHEMERAL_START).unwrap();
        assert_eq!(ports.alloc(PortRequest::Ephemeral, 7), Ok(EPHEMERAL_START));
    }

    #[test]
    fn ephemeral_skips_full_bytes() {
        let mut ports = PortSet::new();
        // Fill the first two whole bytes of the ephemeral range.
        for p in EPHEMERAL_START..EPHEMERAL_START + 16 {
            ports.alloc(PortRequest::Specific(p), 0).unwrap();
        }
        assert_eq!(
            ports.alloc(PortRequest::Ephemeral, 0),
            Ok(EPHEMERAL_START + 16)
        );
    }

    #[test]
    fn ephemeral_range_exhaustion() {
        let mut ports = PortSet::new();
        for p in EPHEMERAL_START..=u16::MAX {
            ports.alloc(PortRequest::Specific(p), 0).unwrap();
        }
        assert_eq!(
            ports.alloc(PortRequest::Ephemeral, 0).unwrap_err(),
            KernelError::TooManyFiles
        );
    }

    #[test]
    fn allocation_state_matches_bitmap_exactly() {
        let mut ports = PortSet::new();
        let allocated = [0u16, 1023, 1024, 40000, 49152, 65535];
        for &p in &allocated {
            ports.alloc(PortRequest::Specific(p), 0).unwrap();
        }
        for probe in [0u16, 1, 1023, 1024, 1025, 39999, 40000, 49152, 65534, 65535] {
            assert_eq!(
                ports.is_allocated(probe),
                allocated.contains(&probe),
                "port {probe}"
            );
        }
    }
}
