//! The on-flash file record header: a `#[repr(C)]` structure cast to and
//! from raw bytes with `asraw`, the same way `boot::image::ImageHeader`
//! and `TlvInfo` are cast in the teacher crate.

use asraw::{AsMutRaw, AsRaw};

/// Maximum length, including the null terminator, of a record's path.
pub const PATH_MAX: usize = 64;
/// Number of word-sized historical size slots per record.
pub const FSLOT_MAX: usize = 86;

const ERASED_WORD: u32 = 0xffff_ffff;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FileRecordHeader {
    /// Address of the next record, or this record's own address for the
    /// "full" sentinel (no free page remains past this record).
    pub next: u32,
    /// Total span of this record, header plus payload, a multiple of the page size.
    pub reserved: u32,
    /// 1 if this record's payload is a position-independent executable.
    pub exec: u8,
    _pad: [u8; 3],
    /// Null-terminated path, `/`-prefixed.
    pub path: [u8; PATH_MAX],
    /// Append-only history of this record's size; the last non-erased
    /// slot is the current size.
    pub size_log: [u32; FSLOT_MAX],
}

impl AsRaw for FileRecordHeader {}
unsafe impl AsMutRaw for FileRecordHeader {}

impl FileRecordHeader {
    pub const SIZE: usize = core::mem::size_of::<FileRecordHeader>();

    /// A header in the fully-erased state: every field reads as `0xFF`.
    pub fn erased() -> FileRecordHeader {
        let mut header = FileRecordHeader {
            next: ERASED_WORD,
            reserved: ERASED_WORD,
            exec: 0xff,
            _pad: [0xff; 3],
            path: [0xff; PATH_MAX],
            size_log: [ERASED_WORD; FSLOT_MAX],
        };
        header.as_mut_raw().fill(0xff);
        header
    }

    pub fn is_erased(&self) -> bool {
        self.as_raw().iter().all(|b| *b == 0xff)
    }

    pub fn is_full_sentinel(&self, own_addr: u32) -> bool {
        self.next == own_addr
    }

    /// Decode `path` up to its null terminator. Fails if there isn't one
    /// within `PATH_MAX`, or the bytes aren't valid UTF-8.
    pub fn path_str(&self) -> Option<&str> {
        let len = self.path.iter().position(|b| *b == 0)?;
        core::str::from_utf8(&self.path[..len]).ok()
    }

    /// Overwrite `path` with `new_path` plus a null terminator. Caller
    /// validates length and charset beforehand.
    pub fn set_path(&mut self, new_path: &str) {
        self.path = [0u8; PATH_MAX];
        self.path[..new_path.len()].copy_from_slice(new_path.as_bytes());
    }

    /// The last non-erased size-log slot, or 0 if slot 0 is erased.
    pub fn size(&self) -> u32 {
        let mut size = 0;
        for slot in &self.size_log {
            if *slot == ERASED_WORD {
                break;
            }
            size = *slot;
        }
        size
    }

    /// Index of the first erased slot, or `None` if the log is exhausted.
    pub fn next_size_slot(&self) -> Option<usize> {
        self.size_log.iter().position(|slot| *slot == ERASED_WORD)
    }

    pub fn payload_len(&self) -> u32 {
        self.reserved - FileRecordHeader::SIZE as u32
    }

    /// Byte offset of `size_log` within the header, computed rather than
    /// hardcoded so a field reorder can't silently desync it.
    pub fn size_log_offset(&self) -> usize {
        let base = self as *const _ as usize;
        let field = self.size_log.as_ptr() as usize;
        field - base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_header_reads_all_ff() {
        let header = FileRecordHeader::erased();
        assert!(header.is_erased());
        assert_eq!(header.path_str(), None);
        assert_eq!(header.size(), 0);
        assert_eq!(header.next_size_slot(), Some(0));
    }

    #[test]
    fn path_round_trip() {
        let mut header = FileRecordHeader::erased();
        header.set_path("/d/f");
        assert_eq!(header.path_str(), Some("/d/f"));
    }

    #[test]
    fn size_log_reads_last_written_slot() {
        let mut header = FileRecordHeader::erased();
        header.size_log[0] = 5;
        header.size_log[1] = 12;
        assert_eq!(header.size(), 12);
        assert_eq!(header.next_size_slot(), Some(2));
    }
}
