//! Status codes.
//!
//! Every fallible operation returns an [`Error`]. Use [`Error::code`] when you
//! need the flat, numeric status that a command layer reports to a host.

/// Status groups, as encoded in the numeric status.
const GROUP_GENERIC: i32 = 0;
const GROUP_MEMORY_INTERFACE: i32 = 102;
const GROUP_PROPERTY_STORE: i32 = 103;

const fn make_status(group: i32, code: i32) -> i32 {
    group * 100 + code
}

/// Numeric status for success.
pub const STATUS_SUCCESS: i32 = make_status(GROUP_GENERIC, 0);

/// Errors produced by the memory interface, the property store, and
/// the generic helpers around them.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Generic failure.
    #[error("operation failed")]
    Fail,
    /// An argument is invalid.
    #[error("invalid argument")]
    InvalidArgument,
    /// A value is out of range.
    #[error("out of range")]
    OutOfRange,

    /// No region covers the requested range.
    #[error("memory range invalid")]
    RangeInvalid,
    /// The backing device failed a read.
    #[error("memory read failed")]
    ReadFailed,
    /// The backing device failed a write.
    #[error("memory write failed")]
    WriteFailed,
    /// The request overlaps an execute-only region.
    #[error("overlaps an execute-only region")]
    AppOverlapWithExecuteOnlyRegion,
    /// The device has not been configured.
    #[error("memory not configured")]
    NotConfigured,
    /// The request is not aligned for the device.
    #[error("memory alignment error")]
    AlignmentError,
    /// Read-back after a write did not match.
    #[error("memory verify failed")]
    VerifyFailed,
    /// The request targets a protected (reserved) range.
    #[error("memory write protected")]
    WriteProtected,
    /// The address is not valid for the device.
    #[error("memory address error")]
    AddressError,
    /// The range is not blank.
    #[error("memory blank check failed")]
    BlankCheckFailed,
    /// The device refuses to read a blank page.
    #[error("blank page read disallowed")]
    BlankPageReadDisallowed,
    /// The device refuses to read a protected page.
    #[error("protected page read disallowed")]
    ProtectedPageReadDisallowed,
    /// The device does not support this operation.
    #[error("unsupported memory command")]
    UnsupportedCommand,

    /// The property tag is not known.
    #[error("unknown property")]
    UnknownProperty,
    /// The property cannot be written.
    #[error("read-only property")]
    ReadOnlyProperty,
    /// The property value is out of range.
    #[error("invalid property value")]
    InvalidPropertyValue,
}

impl Error {
    /// Returns the flat numeric status for this error.
    ///
    /// ```
    /// use imxrt_bootloader::Error;
    ///
    /// assert_eq!(Error::RangeInvalid.code(), 10200);
    /// assert_eq!(Error::UnknownProperty.code(), 10300);
    /// assert_eq!(Error::Fail.code(), 1);
    /// ```
    pub const fn code(self) -> i32 {
        use Error::*;
        match self {
            Fail => make_status(GROUP_GENERIC, 1),
            OutOfRange => make_status(GROUP_GENERIC, 3),
            InvalidArgument => make_status(GROUP_GENERIC, 4),

            RangeInvalid => make_status(GROUP_MEMORY_INTERFACE, 0),
            ReadFailed => make_status(GROUP_MEMORY_INTERFACE, 1),
            WriteFailed => make_status(GROUP_MEMORY_INTERFACE, 2),
            // 3 is the cumulative write status. See `WriteStatus`.
            AppOverlapWithExecuteOnlyRegion => make_status(GROUP_MEMORY_INTERFACE, 4),
            NotConfigured => make_status(GROUP_MEMORY_INTERFACE, 5),
            AlignmentError => make_status(GROUP_MEMORY_INTERFACE, 6),
            VerifyFailed => make_status(GROUP_MEMORY_INTERFACE, 7),
            WriteProtected => make_status(GROUP_MEMORY_INTERFACE, 8),
            AddressError => make_status(GROUP_MEMORY_INTERFACE, 9),
            BlankCheckFailed => make_status(GROUP_MEMORY_INTERFACE, 10),
            BlankPageReadDisallowed => make_status(GROUP_MEMORY_INTERFACE, 11),
            ProtectedPageReadDisallowed => make_status(GROUP_MEMORY_INTERFACE, 12),
            UnsupportedCommand => make_status(GROUP_MEMORY_INTERFACE, 13),

            UnknownProperty => make_status(GROUP_PROPERTY_STORE, 0),
            ReadOnlyProperty => make_status(GROUP_PROPERTY_STORE, 1),
            InvalidPropertyValue => make_status(GROUP_PROPERTY_STORE, 2),
        }
    }
}

/// The outcome of an accepted write.
///
/// `Cumulative` is not a failure. The data was accepted, but it is not
/// durable until the region is flushed or finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteStatus {
    /// The data is written.
    Complete,
    /// The data is staged in the device, waiting for a finalize.
    Cumulative,
}

impl WriteStatus {
    /// Returns the flat numeric status.
    pub const fn code(self) -> i32 {
        match self {
            WriteStatus::Complete => STATUS_SUCCESS,
            WriteStatus::Cumulative => make_status(GROUP_MEMORY_INTERFACE, 3),
        }
    }

    /// Combine the status of two writes that make up one request.
    ///
    /// If either part is still staged, the whole request is staged.
    pub(crate) fn and(self, other: WriteStatus) -> WriteStatus {
        match (self, other) {
            (WriteStatus::Complete, WriteStatus::Complete) => WriteStatus::Complete,
            _ => WriteStatus::Cumulative,
        }
    }
}
