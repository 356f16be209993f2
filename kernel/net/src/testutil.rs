//! Shared fixtures for this crate's tests.
//!
//! Tests share one device tree and one protocol registry per test
//! process; every fixture NIC gets its own name prefix and MAC address.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::collections::VecDeque;
use std::sync::Once;

use muon_core::KernelError;
use muon_core::sync::SpinLock;
use muon_dev::device::{self, DeviceSpec};
use muon_driver_api::{
    Control, ControlData, DeviceClass, DeviceOps, DeviceSubclass, HwType, LinkFlags,
};

use crate::interface::{self, IfaceId};

/// Initialises the device tree and the protocol registry once per test
/// process.
pub fn ensure_stack() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        device::init();
        crate::register_protocols();
    });
}

/// An in-memory network device: frames queued with
/// [`push_rx`](Self::push_rx) come back from `read`, transmitted frames
/// are logged for assertions.
pub struct TestNic {
    mac: [u8; 6],
    rx_queue: SpinLock<VecDeque<Vec<u8>>>,
    tx_log: SpinLock<Vec<Vec<u8>>>,
}

impl TestNic {
    /// Creates a NIC with the given MAC address.
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            rx_queue: SpinLock::new(VecDeque::new()),
            tx_log: SpinLock::new(Vec::new()),
        }
    }

    /// Queues a frame for the next `read`.
    pub fn push_rx(&self, frame: Vec<u8>) {
        self.rx_queue.lock().push_back(frame);
    }

    /// Copies out every transmitted frame.
    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        self.tx_log.lock().clone()
    }
}

impl DeviceOps for TestNic {
    fn read(&self, _offset: u32, len: &mut u32, buf: &mut [u8]) -> Result<(), KernelError> {
        // A real driver would block; the fixture reports a bounded wait
        // that elapsed instead.
        let frame = self.rx_queue.lock().pop_front().ok_or(KernelError::Timeout)?;
        let n = frame.len().min(buf.len()).min(*len as usize);
        buf[..n].copy_from_slice(&frame[..n]);
        *len = n as u32;
        Ok(())
    }

    fn write(&self, _offset: u32, len: &mut u32, buf: &[u8]) -> Result<(), KernelError> {
        self.tx_log.lock().push(buf[..*len as usize].to_vec());
        Ok(())
    }

    fn control(&self, op: Control) -> Result<ControlData, KernelError> {
        match op {
            Control::GetHwType => Ok(ControlData::HwType(HwType::Ethernet)),
            Control::GetHwAddr => Ok(ControlData::HwAddr(self.mac)),
            Control::GetLinkFlags => Ok(ControlData::Link(LinkFlags::UP | LinkFlags::RUNNING)),
            _ => Err(KernelError::NotSupported),
        }
    }
}

/// Creates a NIC device in the tree and registers it as an interface.
pub fn make_nic(prefix: &str, mac: [u8; 6]) -> (IfaceId, Arc<TestNic>) {
    ensure_stack();
    let nic = Arc::new(TestNic::new(mac));
    let dev = device::create(
        &DeviceSpec {
            class: DeviceClass::Net,
            subclass: DeviceSubclass::None,
            name_prefix: prefix,
            irql: 0,
            base_addr: 0,
            human_name: "test NIC",
            parent: None,
        },
        {
            let nic = Arc::clone(&nic);
            move |_| Ok(nic as Arc<dyn DeviceOps>)
        },
    )
    .expect("test NIC creation failed");

    let iface = interface::add_device(dev).expect("interface registration failed");
    (iface, nic)
}
