//! The façade: the POSIX-flavored surface every other module exists to
//! support. Holds the flash device, the mount geometry, the page buffer,
//! the open-descriptor table, and the exec lock, and wires `path`/`store`/
//! `file`/`exec` together into `open`/`read`/`write`/`lseek`/`close`,
//! `opendir`/`readdir`/`closedir`, `stat`/`fstat`/`statvfs`, `unlink`/
//! `mkdir`/`rmdir`/`rename`, `new_file`, and `exec`.

use asraw::AsRaw;
use storage::Flash;

use crate::buffer::PageBuffer;
use crate::descriptor::{Descriptor, DescriptorTable, OpenDir, OpenFile, VIRTUAL_RECORD};
use crate::errno::Errno;
use crate::exec::{self, ExecContext, Launcher};
use crate::file;
use crate::path::{self, Tag};
use crate::record::{FileRecordHeader, PATH_MAX};
use crate::store::{self, RecordAddr};
use crate::sync::Mutex;
use crate::{Geometry, VIRTUAL_INFO_FILE};

/// Open-mode flags, the same shape `open(2)`'s `O_*` constants take, spelled
/// as a plain builder instead of a bitmask since there's no wire format to
/// match.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub excl: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags { read: true, ..Default::default() }
    }

    pub fn write_only() -> Self {
        OpenFlags { write: true, ..Default::default() }
    }

    pub fn read_write() -> Self {
        OpenFlags { read: true, write: true, ..Default::default() }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn excl(mut self) -> Self {
        self.excl = true;
        self
    }

    pub fn append(mut self) -> Self {
        self.append = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u32,
    pub block_size: u32,
    pub blocks: u32,
    pub is_dir: bool,
    pub is_exec: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StatVfs {
    pub block_size: u32,
    pub blocks_total: u32,
    pub blocks_free: u32,
}

pub struct DirEntry {
    pub name: heapless::String<PATH_MAX>,
}

/// The in-RAM mount record that backs `.xipfs_infos`. Never written to
/// flash; `read` on the virtual descriptor serializes a fresh copy on
/// every call.
#[repr(C)]
#[derive(Clone, Copy)]
struct MountPoint {
    magic: u32,
    base: u32,
    page_size: u32,
    page_count: u32,
}

impl AsRaw for MountPoint {}

fn capacity_error(e: Errno) -> Errno {
    match e {
        Errno::EFull | Errno::ENoSpace => Errno::EDQuot,
        other => other,
    }
}

/// The execute-in-place filesystem over a flash window `[geometry.base,
/// geometry.window_end())`. `PAGE` must equal `geometry.page_size`;
/// `mount` rejects a mismatch rather than silently truncating the buffer.
pub struct Xipfs<F: Flash, const PAGE: usize> {
    flash: F,
    geometry: Geometry,
    buffer: Mutex<PageBuffer<PAGE>>,
    descriptors: Mutex<DescriptorTable>,
    exec_lock: exec::ExecLock,
}

impl<F: Flash, const PAGE: usize> Xipfs<F, PAGE> {
    /// Mount `flash` under `geometry`, validating that every byte past the
    /// tail record (or the whole window, if empty) reads as erased.
    pub fn mount(flash: F, geometry: Geometry) -> Result<Self, Errno> {
        if geometry.page_size != PAGE {
            return Err(Errno::EFault);
        }
        let mut fs = Xipfs {
            flash,
            geometry,
            buffer: Mutex::new(PageBuffer::new()),
            descriptors: Mutex::new(DescriptorTable::new()),
            exec_lock: exec::ExecLock::new(),
        };
        fs.check_tail_is_erased()?;
        Ok(fs)
    }

    fn check_tail_is_erased(&mut self) -> Result<(), Errno> {
        let tail_end = self.tail_end()?;
        let window_end = self.geometry.window_end();
        if !crate::flash::region_is_erased(&mut self.flash, tail_end, window_end)? {
            return Err(Errno::EFault);
        }
        Ok(())
    }

    fn tail_end(&mut self) -> Result<usize, Errno> {
        let base = self.geometry.base;
        self.with_buffer(|flash, buf, geometry| -> Result<usize, Errno> {
            let mut tail = None;
            for item in store::Records::new(flash, buf, geometry) {
                tail = Some(item?);
            }
            Ok(match tail {
                Some((addr, header)) => addr.0 + header.reserved as usize,
                None => base,
            })
        })
    }

    /// Erase every page in the mount window and drop all open descriptors.
    pub fn format(&mut self) -> Result<(), Errno> {
        for page in 0..self.geometry.page_count {
            crate::flash::erase_page(&mut self.flash, &self.geometry, page)?;
        }
        self.buffer.lock(PageBuffer::invalidate);
        self.descriptors.lock(DescriptorTable::untrack_all);
        Ok(())
    }

    /// Drop all open descriptors and hand the flash device back.
    pub fn umount(mut self) -> F {
        self.descriptors.lock(DescriptorTable::untrack_all);
        self.flash
    }

    fn with_buffer<R>(&mut self, f: impl FnOnce(&mut F, &mut PageBuffer<PAGE>, &Geometry) -> R) -> R {
        let flash = &mut self.flash;
        let geometry = &self.geometry;
        self.buffer.lock(move |buf| f(flash, buf, geometry))
    }

    fn read_header(&mut self, addr: RecordAddr) -> Result<FileRecordHeader, Errno> {
        self.with_buffer(|flash, buf, geometry| store::read_header(flash, buf, geometry, addr))
    }

    fn classify(&mut self, raw: &str) -> Result<path::Classification, Errno> {
        let norm = path::normalize(raw)?;
        self.with_buffer(|flash, buf, geometry| {
            let records = store::Records::new(flash, buf, geometry);
            path::classify(records, norm.as_str())
        })
    }

    fn count_children(&mut self, prefix: &str) -> Result<usize, Errno> {
        self.with_buffer(|flash, buf, geometry| -> Result<usize, Errno> {
            let mut count = 0usize;
            for item in store::Records::new(flash, buf, geometry) {
                let (_, header) = item?;
                if header.path_str().is_some_and(|p| p.starts_with(prefix)) {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    fn create_placeholder(&mut self, dir_path: &str) -> Result<(), Errno> {
        let plan = self
            .with_buffer(|flash, buf, geometry| store::plan_new_record(flash, buf, geometry, 0))
            .map_err(capacity_error)?;
        self.with_buffer(|flash, buf, geometry| store::create_record(flash, buf, geometry, &plan, dir_path, false))
    }

    /// Remove the empty-directory placeholder at exactly `dirname`, if one
    /// exists. Called before materializing a child of `dirname` so the
    /// directory is represented by its children from then on, not by a
    /// now-redundant placeholder record.
    fn evict_placeholder_if_present(&mut self, dirname: &str) -> Result<(), Errno> {
        if dirname == "/" {
            return Ok(());
        }
        let found = self.with_buffer(|flash, buf, geometry| -> Result<Option<(RecordAddr, FileRecordHeader)>, Errno> {
            for item in store::Records::new(flash, buf, geometry) {
                let (addr, header) = item?;
                if header.path_str() == Some(dirname) {
                    return Ok(Some((addr, header)));
                }
            }
            Ok(None)
        })?;
        if let Some((addr, header)) = found {
            self.compact_out(addr, &header)?;
        }
        Ok(())
    }

    /// If `parent_dir` (trailing slash) now has no records under it,
    /// re-materialize it as an empty-directory placeholder so it still
    /// classifies as a directory once its last child is gone.
    fn maybe_materialize_parent(&mut self, parent_dir: &str) -> Result<(), Errno> {
        if parent_dir == "/" {
            return Ok(());
        }
        if self.count_children(parent_dir)? == 0 {
            self.create_placeholder(parent_dir)?;
        }
        Ok(())
    }

    fn compact_out(&mut self, addr: RecordAddr, header: &FileRecordHeader) -> Result<(), Errno> {
        let compaction = self.with_buffer(|flash, buf, geometry| store::remove_and_compact(flash, buf, geometry, addr, header))?;
        self.descriptors.lock(|d| d.patch(&compaction));
        Ok(())
    }

    /// Re-resolve `path`'s record address after a compaction may have
    /// shifted it out from under a previously captured `RecordAddr`.
    fn reresolve(&mut self, path: &str) -> Result<RecordAddr, Errno> {
        self.classify(path)?.witness.ok_or(Errno::EIo)
    }

    fn info_bytes(&self) -> [u8; core::mem::size_of::<MountPoint>()] {
        let mp = MountPoint {
            magic: crate::MOUNT_MAGIC,
            base: self.geometry.base as u32,
            page_size: self.geometry.page_size as u32,
            page_count: self.geometry.page_count as u32,
        };
        let mut out = [0u8; core::mem::size_of::<MountPoint>()];
        out.copy_from_slice(mp.as_raw());
        out
    }

    fn is_virtual_info_path(raw_path: &str) -> bool {
        raw_path.rsplit('/').next() == Some(VIRTUAL_INFO_FILE)
    }

    pub fn open(&mut self, raw_path: &str, flags: OpenFlags) -> Result<u32, Errno> {
        if Self::is_virtual_info_path(raw_path) {
            if flags.write || flags.create {
                return Err(Errno::EAccess);
            }
            let fd = self.descriptors.lock(|d| {
                d.track(Descriptor::File(OpenFile {
                    record: VIRTUAL_RECORD,
                    pos: 0,
                    readable: true,
                    writable: false,
                }))
            })?;
            return Ok(fd as u32);
        }

        if !flags.read && !flags.write {
            return Err(Errno::EInvalArg);
        }

        let classification = self.classify(raw_path)?;
        let (addr, header) = match classification.tag {
            Tag::ExistsAsFile => {
                if flags.create && flags.excl {
                    return Err(Errno::EExist);
                }
                let addr = classification.witness.ok_or(Errno::EIo)?;
                let header = self.read_header(addr)?;
                (addr, header)
            }
            Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => return Err(Errno::EIsDir),
            Tag::InvalidNotDirs => return Err(Errno::ENotDir),
            Tag::InvalidNotFound | Tag::Undefined => return Err(Errno::ENoEnt),
            Tag::Creatable => {
                if !flags.create {
                    return Err(Errno::ENoEnt);
                }
                self.evict_placeholder_if_present(classification.dirname.as_str())?;
                let plan = self
                    .with_buffer(|flash, buf, geometry| store::plan_new_record(flash, buf, geometry, 0))
                    .map_err(capacity_error)?;
                self.with_buffer(|flash, buf, geometry| {
                    store::create_record(flash, buf, geometry, &plan, classification.input.as_str(), false)
                })?;
                let header = self.read_header(plan.addr)?;
                (plan.addr, header)
            }
        };

        let pos = if flags.append { file::get_size(&header) } else { 0 };
        let fd = self.descriptors.lock(|d| {
            d.track(Descriptor::File(OpenFile {
                record: addr,
                pos,
                readable: flags.read,
                writable: flags.write,
            }))
        })?;
        Ok(fd as u32)
    }

    pub fn read(&mut self, fd: u32, dest: &mut [u8]) -> Result<usize, Errno> {
        let fd = fd as usize;
        let (record, pos, readable) = self.descriptors.lock(|d| -> Result<_, Errno> {
            match d.get(fd)? {
                Descriptor::File(f) => Ok((f.record, f.pos, f.readable)),
                Descriptor::Dir(_) => Err(Errno::EBadF),
            }
        })?;
        if !readable {
            return Err(Errno::EAccess);
        }

        if record == VIRTUAL_RECORD {
            let bytes = self.info_bytes();
            let pos = pos as usize;
            if pos >= bytes.len() {
                return Ok(0);
            }
            let n = core::cmp::min(dest.len(), bytes.len() - pos);
            dest[..n].copy_from_slice(&bytes[pos..pos + n]);
            self.descriptors.lock(|d| {
                if let Descriptor::File(f) = d.get_mut(fd).expect("fd was just looked up") {
                    f.pos += n as u32;
                }
            });
            return Ok(n);
        }

        let header = self.read_header(record)?;
        let n = self.with_buffer(|flash, buf, geometry| file::read_bytes(flash, buf, geometry, record, &header, pos, dest))?;
        self.descriptors.lock(|d| {
            if let Descriptor::File(f) = d.get_mut(fd).expect("fd was just looked up") {
                f.pos += n as u32;
            }
        });
        Ok(n)
    }

    pub fn write(&mut self, fd: u32, src: &[u8]) -> Result<usize, Errno> {
        let fd = fd as usize;
        let (record, pos, writable) = self.descriptors.lock(|d| -> Result<_, Errno> {
            match d.get(fd)? {
                Descriptor::File(f) => Ok((f.record, f.pos, f.writable)),
                Descriptor::Dir(_) => Err(Errno::EBadF),
            }
        })?;
        if !writable {
            return Err(Errno::EAccess);
        }
        if record == VIRTUAL_RECORD {
            return Err(Errno::EAccess);
        }

        let header = self.read_header(record)?;
        let n = self.with_buffer(|flash, buf, geometry| file::write_bytes(flash, buf, geometry, record, &header, pos, src))?;
        self.with_buffer(|flash, buf, geometry| buf.flush(flash, geometry))?;
        self.descriptors.lock(|d| {
            if let Descriptor::File(f) = d.get_mut(fd).expect("fd was just looked up") {
                f.pos += n as u32;
            }
        });
        Ok(n)
    }

    pub fn lseek(&mut self, fd: u32, from: SeekFrom) -> Result<u32, Errno> {
        let fd = fd as usize;
        let (record, old_pos) = self.descriptors.lock(|d| -> Result<_, Errno> {
            match d.get(fd)? {
                Descriptor::File(f) => Ok((f.record, f.pos)),
                Descriptor::Dir(_) => Err(Errno::EBadF),
            }
        })?;

        let (max_pos, committed_size) = if record == VIRTUAL_RECORD {
            let len = self.info_bytes().len() as u32;
            (len, len)
        } else {
            let header = self.read_header(record)?;
            (file::max_pos(&header), file::get_size(&header))
        };

        let new_pos: i64 = match from {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => old_pos as i64 + d as i64,
            SeekFrom::End(d) => max_pos as i64 + d as i64,
        };
        if new_pos < 0 || new_pos as u32 > max_pos {
            return Err(Errno::EInvalArg);
        }
        let new_pos = new_pos as u32;

        if record != VIRTUAL_RECORD && old_pos > committed_size && new_pos < old_pos {
            let mut header = self.read_header(record)?;
            self.with_buffer(|flash, buf, geometry| file::set_size(flash, buf, geometry, record, &mut header, old_pos))?;
            self.with_buffer(|flash, buf, geometry| buf.flush(flash, geometry))?;
        }

        self.descriptors.lock(|d| {
            if let Descriptor::File(f) = d.get_mut(fd).expect("fd was just looked up") {
                f.pos = new_pos;
            }
        });
        Ok(new_pos)
    }

    pub fn close(&mut self, fd: u32) -> Result<(), Errno> {
        let fd = fd as usize;
        let descriptor = self.descriptors.lock(|d| d.untrack(fd))?;
        if let Descriptor::File(f) = descriptor {
            if f.record != VIRTUAL_RECORD {
                let mut header = self.read_header(f.record)?;
                let committed = file::get_size(&header);
                if f.pos > committed {
                    self.with_buffer(|flash, buf, geometry| file::set_size(flash, buf, geometry, f.record, &mut header, f.pos))?;
                    self.with_buffer(|flash, buf, geometry| buf.flush(flash, geometry))?;
                }
            }
        }
        Ok(())
    }

    pub fn opendir(&mut self, raw_path: &str) -> Result<u32, Errno> {
        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => {}
            Tag::ExistsAsFile => return Err(Errno::ENotDir),
            Tag::InvalidNotDirs => return Err(Errno::ENotDir),
            _ => return Err(Errno::ENoEnt),
        }

        let prefix = path::with_trailing_slash(classification.input.as_str())?;
        let cursor = self.with_buffer(|flash, buf, geometry| store::first(flash, buf, geometry))?;
        let fd = self.descriptors.lock(|d| {
            d.track(Descriptor::Dir(OpenDir {
                cursor: cursor.map(|(addr, _)| addr),
                prefix,
            }))
        })?;
        Ok(fd as u32)
    }

    pub fn readdir(&mut self, fd: u32) -> Result<Option<DirEntry>, Errno> {
        let fd = fd as usize;
        let (mut cursor, prefix) = self.descriptors.lock(|d| -> Result<_, Errno> {
            match d.get(fd)? {
                Descriptor::Dir(dir) => Ok((dir.cursor, dir.prefix.clone())),
                Descriptor::File(_) => Err(Errno::EBadF),
            }
        })?;

        loop {
            let Some(addr) = cursor else {
                self.descriptors.lock(|d| {
                    if let Descriptor::Dir(dir) = d.get_mut(fd).expect("fd was just looked up") {
                        dir.cursor = None;
                    }
                });
                return Ok(None);
            };

            let header = self.read_header(addr)?;
            let next = self.with_buffer(|flash, buf, geometry| store::next_record(flash, buf, geometry, addr, &header))?;
            let path = header.path_str().ok_or(Errno::ENulTer)?;

            // the placeholder's own path; it names the directory, not a child
            if path == prefix.as_str() || path == prefix.as_str().trim_end_matches('/') {
                cursor = next.map(|(a, _)| a);
                continue;
            }

            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if !rest.is_empty() {
                    let slash_count = rest.matches('/').count();
                    let is_immediate_child = slash_count == 0 || (slash_count == 1 && rest.ends_with('/'));
                    if is_immediate_child {
                        let basename = rest.trim_end_matches('/');
                        let mut name: heapless::String<PATH_MAX> = heapless::String::new();
                        name.push_str(basename).map_err(|_| Errno::ENameTooLong)?;
                        self.descriptors.lock(|d| {
                            if let Descriptor::Dir(dir) = d.get_mut(fd).expect("fd was just looked up") {
                                dir.cursor = next.map(|(a, _)| a);
                            }
                        });
                        return Ok(Some(DirEntry { name }));
                    }
                }
            }

            cursor = next.map(|(a, _)| a);
        }
    }

    pub fn closedir(&mut self, fd: u32) -> Result<(), Errno> {
        let fd = fd as usize;
        match self.descriptors.lock(|d| d.untrack(fd))? {
            Descriptor::Dir(_) => Ok(()),
            Descriptor::File(_) => Err(Errno::EBadF),
        }
    }

    pub fn stat(&mut self, raw_path: &str) -> Result<Stat, Errno> {
        if Self::is_virtual_info_path(raw_path) {
            let len = self.info_bytes().len() as u32;
            return Ok(Stat {
                size: len,
                block_size: self.geometry.page_size as u32,
                blocks: 0,
                is_dir: false,
                is_exec: false,
            });
        }

        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::ExistsAsFile => {
                let addr = classification.witness.ok_or(Errno::EIo)?;
                let header = self.read_header(addr)?;
                Ok(Stat {
                    size: file::get_size(&header),
                    block_size: self.geometry.page_size as u32,
                    blocks: header.reserved / self.geometry.page_size as u32,
                    is_dir: false,
                    is_exec: file::is_exec(&header),
                })
            }
            Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => Ok(Stat {
                size: 0,
                block_size: self.geometry.page_size as u32,
                blocks: 0,
                is_dir: true,
                is_exec: false,
            }),
            Tag::InvalidNotDirs => Err(Errno::ENotDir),
            _ => Err(Errno::ENoEnt),
        }
    }

    pub fn fstat(&mut self, fd: u32) -> Result<Stat, Errno> {
        let fd = fd as usize;
        let descriptor = self.descriptors.lock(|d| d.get(fd).map(|desc| desc.clone()))?;
        match descriptor {
            Descriptor::File(f) if f.record == VIRTUAL_RECORD => {
                let len = self.info_bytes().len() as u32;
                Ok(Stat {
                    size: len,
                    block_size: self.geometry.page_size as u32,
                    blocks: 0,
                    is_dir: false,
                    is_exec: false,
                })
            }
            Descriptor::File(f) => {
                let header = self.read_header(f.record)?;
                let committed = file::get_size(&header);
                Ok(Stat {
                    size: core::cmp::max(committed, f.pos),
                    block_size: self.geometry.page_size as u32,
                    blocks: header.reserved / self.geometry.page_size as u32,
                    is_dir: false,
                    is_exec: file::is_exec(&header),
                })
            }
            Descriptor::Dir(_) => Err(Errno::EBadF),
        }
    }

    pub fn statvfs(&mut self) -> Result<StatVfs, Errno> {
        let tail_end = self.tail_end()?;
        let used_pages = (tail_end - self.geometry.base) / self.geometry.page_size;
        Ok(StatVfs {
            block_size: self.geometry.page_size as u32,
            blocks_total: self.geometry.page_count as u32,
            blocks_free: (self.geometry.page_count - used_pages) as u32,
        })
    }

    pub fn unlink(&mut self, raw_path: &str) -> Result<(), Errno> {
        if Self::is_virtual_info_path(raw_path) {
            return Err(Errno::EAccess);
        }
        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::ExistsAsFile => {
                let addr = classification.witness.ok_or(Errno::EIo)?;
                let header = self.read_header(addr)?;
                self.compact_out(addr, &header)?;
                if classification.parent <= 1 {
                    self.maybe_materialize_parent(classification.dirname.as_str())?;
                }
                Ok(())
            }
            Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => Err(Errno::EIsDir),
            Tag::InvalidNotDirs => Err(Errno::ENotDir),
            _ => Err(Errno::ENoEnt),
        }
    }

    pub fn mkdir(&mut self, raw_path: &str) -> Result<(), Errno> {
        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::Creatable => {
                self.evict_placeholder_if_present(classification.dirname.as_str())?;
                let dir_path = path::with_trailing_slash(classification.input.as_str())?;
                self.create_placeholder(dir_path.as_str())
            }
            Tag::ExistsAsFile | Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => Err(Errno::EExist),
            Tag::InvalidNotDirs => Err(Errno::ENotDir),
            _ => Err(Errno::ENoEnt),
        }
    }

    pub fn rmdir(&mut self, raw_path: &str) -> Result<(), Errno> {
        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::ExistsAsEmptyDir => {
                let addr = classification.witness.ok_or(Errno::EIo)?;
                let header = self.read_header(addr)?;
                self.compact_out(addr, &header)?;
                let grandparent = path::parent_dir(classification.input.as_str());
                self.maybe_materialize_parent(grandparent.as_str())?;
                Ok(())
            }
            Tag::ExistsAsNonemptyDir => Err(Errno::ENotEmpty),
            Tag::ExistsAsFile => Err(Errno::ENotDir),
            Tag::InvalidNotDirs => Err(Errno::ENotDir),
            _ => Err(Errno::ENoEnt),
        }
    }

    /// Preallocate a file of `size` bytes without opening a descriptor for
    /// it, the way a board bring-up image is laid onto flash before first
    /// boot.
    pub fn new_file(&mut self, raw_path: &str, size: usize, exec_flag: bool) -> Result<(), Errno> {
        let classification = self.classify(raw_path)?;
        match classification.tag {
            Tag::Creatable => {
                self.evict_placeholder_if_present(classification.dirname.as_str())?;
                let plan = self
                    .with_buffer(|flash, buf, geometry| store::plan_new_record(flash, buf, geometry, size))
                    .map_err(capacity_error)?;
                self.with_buffer(|flash, buf, geometry| {
                    store::create_record(flash, buf, geometry, &plan, classification.input.as_str(), exec_flag)
                })
            }
            Tag::ExistsAsFile | Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => Err(Errno::EExist),
            Tag::InvalidNotDirs => Err(Errno::ENotDir),
            _ => Err(Errno::ENoEnt),
        }
    }

    pub fn rename(&mut self, from_raw: &str, to_raw: &str) -> Result<(), Errno> {
        let from_norm = path::normalize(from_raw)?;
        let to_norm = path::normalize(to_raw)?;
        let from_slash = path::with_trailing_slash(from_norm.as_str())?;
        let to_slash = path::with_trailing_slash(to_norm.as_str())?;

        if to_slash.as_str().starts_with(from_slash.as_str()) {
            return Err(Errno::EInvalArg);
        }

        let from_class = self.classify(from_norm.as_str())?;
        let to_class = self.classify(to_norm.as_str())?;

        match (from_class.tag, to_class.tag) {
            (Tag::ExistsAsFile, Tag::Creatable) | (Tag::ExistsAsFile, Tag::ExistsAsFile) => {
                if to_class.tag == Tag::ExistsAsFile {
                    let victim = to_class.witness.ok_or(Errno::EIo)?;
                    let victim_header = self.read_header(victim)?;
                    self.compact_out(victim, &victim_header)?;
                }
                let from_addr = self.reresolve(from_norm.as_str())?;
                let mut header = self.read_header(from_addr)?;
                self.with_buffer(|flash, buf, geometry| file::rename(flash, buf, geometry, from_addr, &mut header, to_norm.as_str()))?;
                self.maybe_materialize_parent(from_class.dirname.as_str())?;
                Ok(())
            }
            (Tag::ExistsAsEmptyDir, Tag::Creatable) | (Tag::ExistsAsEmptyDir, Tag::ExistsAsEmptyDir) => {
                if to_class.tag == Tag::ExistsAsEmptyDir {
                    let victim = to_class.witness.ok_or(Errno::EIo)?;
                    let victim_header = self.read_header(victim)?;
                    self.compact_out(victim, &victim_header)?;
                }
                let from_addr = self.reresolve(from_norm.as_str())?;
                let mut header = self.read_header(from_addr)?;
                self.with_buffer(|flash, buf, geometry| file::rename(flash, buf, geometry, from_addr, &mut header, to_slash.as_str()))?;
                self.maybe_materialize_parent(from_class.dirname.as_str())?;
                Ok(())
            }
            (Tag::ExistsAsNonemptyDir, Tag::Creatable) | (Tag::ExistsAsNonemptyDir, Tag::ExistsAsEmptyDir) => {
                if to_class.tag == Tag::ExistsAsEmptyDir {
                    let victim = to_class.witness.ok_or(Errno::EIo)?;
                    let victim_header = self.read_header(victim)?;
                    self.compact_out(victim, &victim_header)?;
                }
                self.with_buffer(|flash, buf, geometry| store::rename_prefix(flash, buf, geometry, from_slash.as_str(), to_slash.as_str()))?;
                self.maybe_materialize_parent(from_class.dirname.as_str())?;
                Ok(())
            }
            (Tag::ExistsAsFile, Tag::ExistsAsEmptyDir) | (Tag::ExistsAsFile, Tag::ExistsAsNonemptyDir) => Err(Errno::EIsDir),
            (Tag::ExistsAsEmptyDir, Tag::ExistsAsFile) | (Tag::ExistsAsNonemptyDir, Tag::ExistsAsFile) => Err(Errno::ENotDir),
            (Tag::ExistsAsNonemptyDir, Tag::ExistsAsNonemptyDir) => Err(Errno::ENotEmpty),
            (Tag::InvalidNotDirs, _) | (_, Tag::InvalidNotDirs) => Err(Errno::ENotDir),
            (Tag::InvalidNotFound, _) | (Tag::Undefined, _) => Err(Errno::ENoEnt),
            _ => Err(Errno::EInvalArg),
        }
    }

    /// Execute a file's payload as a position-independent binary. Rejects
    /// nested execution via `exec_lock`; the lock is released whether the
    /// launch succeeds, fails to resolve, or the binary itself traps.
    pub fn exec(&mut self, raw_path: &str, argv: &[&str], launcher: &mut dyn Launcher) -> Result<i32, Errno> {
        self.exec_lock.acquire()?;
        let result = self.exec_inner(raw_path, argv, launcher);
        self.exec_lock.release();
        result
    }

    fn exec_inner(&mut self, raw_path: &str, argv: &[&str], launcher: &mut dyn Launcher) -> Result<i32, Errno> {
        let classification = self.classify(raw_path)?;
        let addr = match classification.tag {
            Tag::ExistsAsFile => classification.witness.ok_or(Errno::EIo)?,
            Tag::ExistsAsEmptyDir | Tag::ExistsAsNonemptyDir => return Err(Errno::EIsDir),
            Tag::InvalidNotDirs => return Err(Errno::ENotDir),
            _ => return Err(Errno::ENoEnt),
        };
        let header = self.read_header(addr)?;
        if !file::is_exec(&header) {
            return Err(Errno::EAccess);
        }

        let binary_base = (addr.0 + FileRecordHeader::SIZE) as u32;
        let payload_len = header.payload_len();
        let tail_end = self.tail_end()? as u32;
        let window_end = self.geometry.window_end() as u32;

        let ctx = exec::build_context(binary_base, payload_len, 0, 0, tail_end, window_end, argv)?;
        Ok(launcher.launch(&ctx, binary_base as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simflash::styles::XIPFS_DEFAULT;

    fn geometry() -> Geometry {
        Geometry {
            base: 0,
            page_size: 4096,
            write_block_size: 4,
            page_count: 8,
        }
    }

    fn mounted() -> Xipfs<simflash::SimFlash, 4096> {
        let flash = XIPFS_DEFAULT.build().unwrap();
        Xipfs::mount(flash, geometry()).unwrap()
    }

    #[test]
    fn rejects_geometry_page_size_mismatch() {
        let flash = XIPFS_DEFAULT.build().unwrap();
        let bad = Geometry { page_size: 1024, ..geometry() };
        let result = Xipfs::<simflash::SimFlash, 4096>::mount(flash, bad);
        assert_eq!(result.err(), Some(Errno::EFault));
    }

    #[test]
    fn create_write_read_back() {
        let mut fs = mounted();
        let fd = fs.open("/f", OpenFlags::read_write().create()).unwrap();
        assert_eq!(fs.write(fd, b"hello").unwrap(), 5);
        fs.close(fd).unwrap();

        let fd = fs.open("/f", OpenFlags::read_only()).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        fs.close(fd).unwrap();
    }

    #[test]
    fn mkdir_then_create_child_lists_in_readdir() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.new_file("/d/f", 16, false).unwrap();

        let dh = fs.opendir("/d").unwrap();
        let entry = fs.readdir(dh).unwrap().unwrap();
        assert_eq!(entry.name.as_str(), "f");
        assert!(fs.readdir(dh).unwrap().is_none());
        fs.closedir(dh).unwrap();
    }

    #[test]
    fn unlink_last_child_restores_empty_dir() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.new_file("/d/f", 16, false).unwrap();
        fs.unlink("/d/f").unwrap();

        let stat = fs.stat("/d").unwrap();
        assert!(stat.is_dir);
        assert_eq!(fs.rmdir("/d"), Ok(()));
    }

    #[test]
    fn rmdir_nonempty_fails() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        fs.new_file("/d/f", 16, false).unwrap();
        assert_eq!(fs.rmdir("/d"), Err(Errno::ENotEmpty));
    }

    /// S3: fill the mount until `new_file` hits the full sentinel,
    /// `unlink` the head record, and confirm compaction relinks the
    /// shifted tail so a following `new_file` succeeds rather than
    /// staying permanently full.
    #[test]
    fn fill_then_unlink_head_then_new_file_succeeds() {
        let mut fs = mounted();
        for i in 0..8 {
            let mut name: heapless::String<PATH_MAX> = heapless::String::new();
            name.push_str(&format!("/f{i}")).unwrap();
            fs.new_file(name.as_str(), 0, false).unwrap();
        }
        assert_eq!(fs.new_file("/overflow", 0, false), Err(Errno::EDQuot));

        fs.unlink("/f0").unwrap();
        fs.new_file("/overflow", 0, false).unwrap();
        assert_eq!(fs.stat("/overflow").unwrap().size, 0);
    }

    #[test]
    fn rename_into_self_subdirectory_is_rejected() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        assert_eq!(fs.rename("/a", "/a/b"), Err(Errno::EInvalArg));
    }

    #[test]
    fn mkdir_twice_fails_with_eexist() {
        let mut fs = mounted();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.mkdir("/d"), Err(Errno::EExist));
    }

    #[test]
    fn virtual_info_file_opens_read_only() {
        let mut fs = mounted();
        assert_eq!(fs.open(".xipfs_infos", OpenFlags::write_only()), Err(Errno::EAccess));
        let fd = fs.open(".xipfs_infos", OpenFlags::read_only()).unwrap();
        let mut buf = [0u8; 4];
        let n = fs.read(fd, &mut buf).unwrap();
        assert!(n > 0);
        fs.close(fd).unwrap();
    }

    #[test]
    fn lseek_past_end_then_back_commits_lazy_size() {
        let mut fs = mounted();
        let fd = fs.open("/f", OpenFlags::read_write().create()).unwrap();
        fs.write(fd, b"ab").unwrap();
        fs.lseek(fd, SeekFrom::Start(10)).unwrap();
        fs.lseek(fd, SeekFrom::Start(0)).unwrap();
        fs.close(fd).unwrap();

        let stat = fs.stat("/f").unwrap();
        assert_eq!(stat.size, 10);
    }
}
