//! Shared fixtures for this crate's tests.

use alloc::sync::Arc;
use std::sync::Once;

use muon_dev::device::{self, DeviceId, DeviceSpec};
use muon_driver_api::{DeviceClass, DeviceOps, DeviceSubclass, NullDevice};

/// Initialises the global device tree exactly once per test process.
pub fn ensure_tree() {
    static ONCE: Once = Once::new();
    ONCE.call_once(device::init);
}

/// Creates a placeholder block partition device for mount tests.
pub fn block_device(prefix: &str) -> DeviceId {
    ensure_tree();
    device::create(
        &DeviceSpec {
            class: DeviceClass::Block,
            subclass: DeviceSubclass::Partition,
            name_prefix: prefix,
            irql: 0,
            base_addr: 0,
            human_name: "test partition",
            parent: None,
        },
        |_| Ok(Arc::new(NullDevice) as Arc<dyn DeviceOps>),
    )
    .expect("test device creation failed")
}
