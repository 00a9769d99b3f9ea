//! The core's positive error enum, and its two boundary conversions: from
//! `storage::Error` (the flash-driver boundary, `?`-composed the way
//! `boot::Error<E>` wraps a flash error) and into a raw `i32` for `capi`.

use core::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(i32)]
pub enum Errno {
    Ok = 0,
    /// A null/placeholder pointer was used where a real one was required.
    ENullp,
    /// An operation that requires at least one record found none.
    EEmpty,
    /// Malformed argument: bad flags, bad size, bad charset.
    EInvalArg,
    /// Path exceeds `PATH_MAX` or is missing its null terminator.
    ENulTer,
    /// Operation requires an open file descriptor and none was supplied.
    ENullF,
    /// An address or length violated flash's alignment rules.
    EAlign,
    /// An address fell outside the mount's flash window.
    EOutNvm,
    /// The record chain's `next` pointers are inconsistent.
    ELink,
    /// A page index exceeded the mount's page count.
    EMaxOff,
    /// The mount structure's magic number did not match.
    ENvmC,
    /// A required in-memory structure was not initialized.
    ENullM,
    /// Reserved for future region-table corruption; unused by the filesystem core.
    EMagic,
    /// A page number had no corresponding record.
    EPagNum,
    /// Tail allocation has hit the "full" sentinel; no free pages remain.
    EFull,
    /// Target of a create-style operation already exists.
    EExist,
    /// Caller lacks permission for the requested operation (mode mismatch, `.xipfs_infos` write).
    EPerm,
    /// Capacity errors other than `EFull` (size-log exhausted, `reserved` would overflow).
    ENoSpace,
    /// A flash read or program verify mismatched; driver or media failure.
    EIo,
    /// Operation requires a file but the target is a directory.
    EIsDir,
    /// Operation requires a directory but the target is a file, or a path component is a file.
    ENotDir,
    /// `rmdir`/`rename` target directory still has children.
    ENotEmpty,
    /// Target path does not exist.
    ENoEnt,
    /// Path exceeds `PATH_MAX`.
    ENameTooLong,
    /// Caller has no permission for this operation (POSIX-surfaced form of `EPerm`).
    EAccess,
    /// Descriptor number does not refer to an open descriptor.
    EBadF,
    /// Capacity exhausted (POSIX-surfaced form of `EFull`/`ENoSpace`).
    EDQuot,
    /// Mount structure failed validation (POSIX-surfaced form of `ENvmC`/`EMagic`).
    EFault,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<storage::Error> for Errno {
    fn from(e: storage::Error) -> Errno {
        match e {
            storage::Error::NotAligned => Errno::EAlign,
            storage::Error::OutOfBounds => Errno::EOutNvm,
            storage::Error::NotWritten => Errno::EIo,
            storage::Error::NotErased => Errno::EIo,
        }
    }
}

/// Maps to the POSIX errno numbering a `capi` caller expects, not the
/// discriminant values above (which are this crate's own taxonomy).
impl From<Errno> for i32 {
    fn from(e: Errno) -> i32 {
        match e {
            Errno::Ok => 0,
            Errno::EPerm | Errno::EAccess => -13,
            Errno::ENoEnt => -2,
            Errno::EIo => -5,
            Errno::EExist => -17,
            Errno::ENotDir => -20,
            Errno::EIsDir => -21,
            Errno::EInvalArg => -22,
            Errno::ENameTooLong => -36,
            Errno::ENotEmpty => -39,
            Errno::EDQuot => -122,
            Errno::EFault => -14,
            Errno::EBadF => -9,
            // Internal-only variants should be translated to one of the
            // above before crossing the façade boundary; if one leaks,
            // surface it as a generic I/O failure rather than panicking.
            _ => -5,
        }
    }
}
