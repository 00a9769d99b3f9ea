//! xipfs: an execute-in-place filesystem for word-addressable NOR flash.
//!
//! Files live in a singly-linked chain of page-aligned records written
//! directly into a flash window. There is no journal and no wear-leveling;
//! the design trades those away for a layout simple enough that a binary
//! can be executed straight out of its record's payload. See `Xipfs` for
//! the façade most callers want.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod buffer;
mod capi;
mod descriptor;
mod errno;
mod exec;
mod file;
mod flash;
mod fs;
mod path;
mod record;
mod store;
mod sync;

pub use capi::{
    decode_open_flags, decode_seek, result_to_raw, status_to_raw, RawSyscallFn, O_APPEND,
    O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_WRONLY, SEEK_CUR, SEEK_END, SEEK_SET,
};
pub use descriptor::{Descriptor, DescriptorKind};
pub use errno::Errno;
pub use exec::{ExecContext, SyscallTable};
pub use fs::{DirEntry, OpenFlags, SeekFrom, Stat, StatVfs, Xipfs};
pub use path::Tag;
pub use record::{FSLOT_MAX, PATH_MAX};

/// Board-fixed constants a mount is built from.
///
/// Built the same way `boot::status::SlotInfo` derives layout facts from a
/// `Flash` implementor: a plain value type computed once at `mount` time and
/// carried everywhere the core needs to know "where is flash and how is it
/// shaped", rather than scattering `const`s across modules.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Geometry {
    /// First address of the mount window.
    pub base: usize,
    /// Bytes per erase page. Every record's `reserved` is a multiple of this.
    pub page_size: usize,
    /// Alignment and granularity of a single flash program operation.
    pub write_block_size: usize,
    /// Number of pages in the mount window.
    pub page_count: usize,
}

impl Geometry {
    pub fn window_len(&self) -> usize {
        self.page_size * self.page_count
    }

    pub fn window_end(&self) -> usize {
        self.base + self.window_len()
    }
}

/// Maximum number of open descriptors (file or directory) per mount.
pub const MAX_OPEN_DESC: usize = 16;
/// Maximum number of argv entries passed to an executed binary.
pub const EXEC_ARGC_MAX: usize = 64;
/// RAM-only sanity tag for `MountPoint`. Never written to flash.
pub const MOUNT_MAGIC: u32 = 0xf9d3_b6cb;
/// Name matched, in any directory, as the read-only virtual file.
pub const VIRTUAL_INFO_FILE: &str = ".xipfs_infos";
