//! The raw-ABI boundary a host-OS VFS shim calls across. Everything in
//! `fs`/`exec` speaks typed Rust (`OpenFlags`, `SeekFrom`, `Result<T, Errno>`);
//! the out-of-scope shim (§1) speaks POSIX bit flags and `0`/negative-errno
//! integers. This module is the translation layer between the two, the same
//! role `boards/lpc55s69/src/flash.rs` played for the raw register side of
//! the teacher's flash boundary before that board layer was trimmed.
//!
//! Nothing here is `#[no_mangle]`: `Xipfs` is generic over its `Flash`
//! implementor and page size, and a concrete `extern "C"` export needs a
//! monomorphized type the board integrator picks. What's fixed regardless
//! of that choice are the flag bit layouts and the raw-int calling
//! convention, so that's what lives here.

use crate::errno::Errno;
use crate::fs::{OpenFlags, SeekFrom};

/// Open for reading only.
pub const O_RDONLY: u32 = 0x0000;
/// Open for writing only.
pub const O_WRONLY: u32 = 0x0001;
/// Open for reading and writing.
pub const O_RDWR: u32 = 0x0002;
/// Create the file if it does not exist.
pub const O_CREAT: u32 = 0x0040;
/// Fail if `O_CREAT` and the file already exists.
pub const O_EXCL: u32 = 0x0080;
/// Writes land at the current end of file.
pub const O_APPEND: u32 = 0x0400;

const KNOWN_FLAGS: u32 = O_RDONLY | O_WRONLY | O_RDWR | O_CREAT | O_EXCL | O_APPEND;

/// Decode a raw `open(2)`-style flag word into `OpenFlags`, rejecting bits
/// this filesystem doesn't implement (§4.7: "Reject unknown flags").
pub fn decode_open_flags(raw: u32) -> Result<OpenFlags, Errno> {
    if raw & !KNOWN_FLAGS != 0 {
        return Err(Errno::EInvalArg);
    }
    let access = raw & O_RDWR;
    let (read, write) = match access {
        O_RDONLY => (true, false),
        x if x == O_WRONLY => (false, true),
        x if x == O_RDWR => (true, true),
        _ => return Err(Errno::EInvalArg),
    };
    Ok(OpenFlags {
        read,
        write,
        create: raw & O_CREAT != 0,
        excl: raw & O_EXCL != 0,
        append: raw & O_APPEND != 0,
    })
}

/// `lseek(2)`'s `whence` values.
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/// Decode a raw `(whence, offset)` pair into `SeekFrom`.
pub fn decode_seek(whence: i32, offset: i32) -> Result<SeekFrom, Errno> {
    match whence {
        SEEK_SET => {
            if offset < 0 {
                return Err(Errno::EInvalArg);
            }
            Ok(SeekFrom::Start(offset as u32))
        }
        SEEK_CUR => Ok(SeekFrom::Current(offset)),
        SEEK_END => Ok(SeekFrom::End(offset)),
        _ => Err(Errno::EInvalArg),
    }
}

/// Collapse a `Result<T, Errno>` into the "0/non-negative on success,
/// negative errno on failure" convention named in §6, for callers that
/// return a success value a shim cares about (`open`'s descriptor number,
/// `read`/`write`'s byte count, `lseek`'s new position).
pub fn result_to_raw<T>(result: Result<T, Errno>) -> i64
where
    T: Into<i64>,
{
    match result {
        Ok(value) => value.into(),
        Err(e) => i32::from(e) as i64,
    }
}

/// Collapse a `Result<(), Errno>` the same way, for callers with no
/// success payload (`close`, `unlink`, `mkdir`, `rmdir`, `rename`, `format`).
pub fn status_to_raw(result: Result<(), Errno>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.into(),
    }
}

/// One entry of the syscall trampoline table an executed binary calls
/// through (§4.8). The executor never inspects entries, only hands the
/// table's base address to the binary's CRT0; the signature here is the
/// contract a board integrator's trampoline and the executed binary must
/// both agree on.
pub type RawSyscallFn = extern "C" fn(a0: u32, a1: u32, a2: u32, a3: u32) -> i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rdwr_create_excl() {
        let flags = decode_open_flags(O_RDWR | O_CREAT | O_EXCL).unwrap();
        assert!(flags.read && flags.write && flags.create && flags.excl);
        assert!(!flags.append);
    }

    #[test]
    fn rejects_unknown_bits() {
        assert_eq!(decode_open_flags(0x8000_0000), Err(Errno::EInvalArg));
    }

    #[test]
    fn rejects_negative_seek_set_offset() {
        assert_eq!(decode_seek(SEEK_SET, -1), Err(Errno::EInvalArg));
    }

    #[test]
    fn decodes_seek_variants() {
        assert!(matches!(decode_seek(SEEK_SET, 5), Ok(SeekFrom::Start(5))));
        assert!(matches!(decode_seek(SEEK_CUR, -3), Ok(SeekFrom::Current(-3))));
        assert!(matches!(decode_seek(SEEK_END, 0), Ok(SeekFrom::End(0))));
    }

    #[test]
    fn status_to_raw_converts_ok_and_err() {
        assert_eq!(status_to_raw(Ok(())), 0);
        assert_eq!(status_to_raw(Err(Errno::ENoEnt)), i32::from(Errno::ENoEnt));
    }

    #[test]
    fn result_to_raw_passes_through_success_value() {
        assert_eq!(result_to_raw::<i64>(Ok(5)), 5);
        assert_eq!(result_to_raw::<i64>(Err(Errno::EBadF)), i32::from(Errno::EBadF) as i64);
    }
}
