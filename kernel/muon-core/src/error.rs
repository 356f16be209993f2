//! Kernel-wide error type.
//!
//! Every fallible kernel interface returns `Result<T, KernelError>`. The
//! variants map one-to-one onto the error conditions the kernel can report
//! to a user; [`KernelError::as_str`] yields the human-readable name that
//! console messages print.

use core::fmt;

/// The kernel error taxonomy.
///
/// Cleanup on failure is local: a function that fails releases whatever it
/// allocated before returning, and no caller is required to unwind another
/// caller's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An argument was missing, malformed, or out of range.
    InvalidArgument,
    /// The operation is not implemented by this object.
    NotSupported,
    /// The named object does not exist.
    NotFound,
    /// The caller lacks the privilege for this operation.
    PermissionDenied,
    /// An allocation failed.
    OutOfMemory,
    /// No device with the requested name or role exists.
    NoSuchDevice,
    /// The device or resource is already in use.
    DeviceBusy,
    /// A device reported a general I/O failure.
    IoError,
    /// A read transferred fewer bytes than requested.
    ReadError,
    /// A write transferred fewer bytes than requested.
    WriteError,
    /// No medium is present in the device.
    NoMedium,
    /// The medium's format is not understood.
    MediaTypeUnsupported,
    /// The medium was changed while in use.
    MediaChanged,
    /// The object is read-only.
    ReadOnly,
    /// On-medium or in-memory structures failed validation.
    CorruptData,
    /// A checksum did not verify.
    ChecksumMismatch,
    /// A bounded wait elapsed without completion.
    Timeout,
    /// A name table or sub-device namespace is exhausted.
    TooManyFiles,
    /// A name exceeds the permitted length.
    NameTooLong,
    /// A directory operation was applied to a non-directory.
    NotADirectory,
    /// A file operation was applied to a directory.
    IsADirectory,
    /// The object already exists.
    Exists,
    /// The network address or port is already bound.
    AddressInUse,
    /// No route leads to the requested host.
    HostUnreachable,
    /// The address family is not supported here.
    AddressFamilyUnsupported,
    /// The protocol is not supported here.
    ProtocolUnsupported,
    /// An executable image failed validation.
    BadExecutable,
}

impl KernelError {
    /// Returns the human-readable error name used in console messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotSupported => "not supported",
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::OutOfMemory => "out of memory",
            Self::NoSuchDevice => "no such device",
            Self::DeviceBusy => "device busy",
            Self::IoError => "I/O error",
            Self::ReadError => "read error",
            Self::WriteError => "write error",
            Self::NoMedium => "no medium",
            Self::MediaTypeUnsupported => "media type unsupported",
            Self::MediaChanged => "media changed",
            Self::ReadOnly => "read-only",
            Self::CorruptData => "corrupt data",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::Timeout => "timed out",
            Self::TooManyFiles => "too many files",
            Self::NameTooLong => "name too long",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::Exists => "already exists",
            Self::AddressInUse => "address in use",
            Self::HostUnreachable => "host unreachable",
            Self::AddressFamilyUnsupported => "address family unsupported",
            Self::ProtocolUnsupported => "protocol unsupported",
            Self::BadExecutable => "bad executable",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
