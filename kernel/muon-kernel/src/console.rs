//! Boot-time and device consoles.
//!
//! Device enumeration needs the device tree, the device tree wants to log
//! — so the boot flow starts with an in-memory console: log output
//! accumulates in a ring buffer until the real console device exists,
//! then drains into it. From that point every `kprint!`/`klog!` goes to
//! the device's `putc` path.

use core::fmt::{self, Write};

use planck_noalloc::ringbuf::RingBuf;

use muon_core::format::{Arg, format};
use muon_core::log::{self, LogLevel};
use muon_core::sync::SpinLock;
use muon_core::{KernelError, kprint};
use muon_dev::device::{self, DeviceId};

/// Bytes buffered by the early boot console. Output past this is dropped
/// (oldest first would need a reader; newest-dropped keeps the boot
/// banner).
const EARLY_BUFFER_LEN: usize = 8192;

static EARLY_BUFFER: SpinLock<RingBuf<u8, EARLY_BUFFER_LEN>> = SpinLock::new(RingBuf::new());
static CONSOLE_DEV: SpinLock<Option<DeviceId>> = SpinLock::new(None);

// ── Early in-memory console ─────────────────────────────────────────────

struct EarlyWriter;

impl Write for EarlyWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut buffer = EARLY_BUFFER.lock();
        for byte in s.bytes() {
            let _ = buffer.try_push(byte);
        }
        Ok(())
    }
}

fn early_print(args: fmt::Arguments<'_>) {
    let _ = EarlyWriter.write_fmt(args);
}

fn early_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let _ = write!(EarlyWriter, "[{}] {}\n", level.name(), args);
}

/// Points the log sinks at the in-memory buffer.
pub fn early_init() {
    log::set_print_fn(early_print);
    log::set_log_fn(early_log);
}

// ── Device console ──────────────────────────────────────────────────────

struct DeviceWriter {
    dev: DeviceId,
}

impl Write for DeviceWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let Some(ops) = device::ops(self.dev) else {
            return Err(fmt::Error);
        };
        for byte in s.bytes() {
            // Serial consoles want a carriage return before the newline.
            if byte == b'\n' {
                let _ = ops.putc(b'\r');
            }
            let _ = ops.putc(byte);
        }
        Ok(())
    }
}

fn device_print(args: fmt::Arguments<'_>) {
    let dev = *CONSOLE_DEV.lock();
    if let Some(dev) = dev {
        let _ = DeviceWriter { dev }.write_fmt(args);
    }
}

fn device_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let dev = *CONSOLE_DEV.lock();
    if let Some(dev) = dev {
        let _ = write!(DeviceWriter { dev }, "[{}] {}\n", level.name(), args);
    }
}

/// Switches the console to a real device: installs the device-backed log
/// sinks and drains everything the early console captured.
pub fn attach_device(dev: DeviceId) -> Result<(), KernelError> {
    if device::ops(dev).is_none() {
        return Err(KernelError::NoSuchDevice);
    }
    *CONSOLE_DEV.lock() = Some(dev);

    log::set_print_fn(device_print);
    log::set_log_fn(device_log);

    flush_early_buffer(dev);
    Ok(())
}

/// Drains the early boot buffer into the console device.
fn flush_early_buffer(dev: DeviceId) {
    let Some(ops) = device::ops(dev) else {
        return;
    };
    let mut buffer = EARLY_BUFFER.lock();
    while let Some(byte) = buffer.pop() {
        if byte == b'\n' {
            let _ = ops.putc(b'\r');
        }
        let _ = ops.putc(byte);
    }
}

/// The console device, once attached.
pub fn console_device() -> Option<DeviceId> {
    *CONSOLE_DEV.lock()
}

/// Formats a printf-style specification and prints it to the console.
///
/// The monitor-facing surface: runtime format strings the `format_args!`
/// machinery cannot handle.
pub fn printf(spec: &str, args: &[Arg<'_>]) {
    kprint!("{}", format(spec, args));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_buffer_stores_and_drains_bytes() {
        // Push and drain under one lock acquisition so a concurrent boot
        // test cannot interleave its own flush.
        let mut buffer = EARLY_BUFFER.lock();
        for b in "boot message\n".bytes() {
            let _ = buffer.try_push(b);
        }
        let mut drained = Vec::new();
        while let Some(b) = buffer.pop() {
            drained.push(b);
        }
        let text = String::from_utf8(drained).unwrap();
        assert!(text.contains("boot message"));
    }

    #[test]
    fn printf_formats_runtime_specs() {
        // Only the formatting layer is asserted here; the sink is
        // whatever the process currently has installed.
        let line = format("%s rev %u at %#x", &[
            Arg::Str("board"),
            Arg::Uint(3),
            Arg::Uint(0xfe0000),
        ]);
        assert_eq!(line, "board rev 3 at 0xfe0000");
    }
}
