//! The open-descriptor table: a process-wide (here, per-`Xipfs`) fixed
//! capacity array tracking open file and directory descriptors, and the
//! pointer rewriting that follows a compaction. Grounds the fixed-table
//! idea in the same style `heapless`-backed tables are used elsewhere in
//! this codebase for bounded, allocation-free bookkeeping.

use crate::errno::Errno;
use crate::record::PATH_MAX;
use crate::store::{Compaction, RecordAddr};
use crate::MAX_OPEN_DESC;

/// Sentinel record address recognized as the virtual `.xipfs_infos` file.
/// Skipped by every compaction/range check.
pub const VIRTUAL_RECORD: RecordAddr = RecordAddr(usize::MAX);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DescriptorKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub record: RecordAddr,
    pub pos: u32,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct OpenDir {
    /// Record the next `readdir` resumes from, or `None` at end of stream.
    pub cursor: Option<RecordAddr>,
    pub prefix: heapless::String<PATH_MAX>,
}

#[derive(Debug, Clone)]
pub enum Descriptor {
    File(OpenFile),
    Dir(OpenDir),
}

impl Descriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::File(_) => DescriptorKind::File,
            Descriptor::Dir(_) => DescriptorKind::Dir,
        }
    }
}

pub struct DescriptorTable {
    slots: [Option<Descriptor>; MAX_OPEN_DESC],
}

impl DescriptorTable {
    pub fn new() -> Self {
        DescriptorTable {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn track(&mut self, descriptor: Descriptor) -> Result<usize, Errno> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(descriptor);
                return Ok(i);
            }
        }
        Err(Errno::ENoSpace)
    }

    pub fn untrack(&mut self, fd: usize) -> Result<Descriptor, Errno> {
        let slot = self.slots.get_mut(fd).ok_or(Errno::EBadF)?;
        slot.take().ok_or(Errno::EBadF)
    }

    pub fn is_tracked(&self, fd: usize) -> bool {
        self.slots.get(fd).is_some_and(Option::is_some)
    }

    pub fn get(&self, fd: usize) -> Result<&Descriptor, Errno> {
        self.slots.get(fd).and_then(Option::as_ref).ok_or(Errno::EBadF)
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut Descriptor, Errno> {
        self.slots.get_mut(fd).and_then(Option::as_mut).ok_or(Errno::EBadF)
    }

    /// Clear every open descriptor. Used by `umount`/`format`, which own
    /// the whole mount and therefore the whole table.
    pub fn untrack_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Rewrite descriptor record pointers after a compaction: descriptors
    /// at the removed record are dropped, descriptors past it are shifted.
    pub fn patch(&mut self, compaction: &Compaction) {
        for slot in self.slots.iter_mut() {
            match slot {
                Some(Descriptor::File(f)) if f.record != VIRTUAL_RECORD => {
                    if f.record == compaction.victim {
                        *slot = None;
                    } else if f.record.0 > compaction.victim.0 {
                        f.record = RecordAddr(f.record.0 - compaction.shift as usize);
                    }
                }
                Some(Descriptor::Dir(d)) => {
                    if let Some(cursor) = d.cursor {
                        if cursor == compaction.victim {
                            d.cursor = None;
                        } else if cursor.0 > compaction.victim.0 {
                            d.cursor = Some(RecordAddr(cursor.0 - compaction.shift as usize));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_and_untrack_round_trip() {
        let mut table = DescriptorTable::new();
        let fd = table
            .track(Descriptor::File(OpenFile {
                record: RecordAddr(0),
                pos: 0,
                readable: true,
                writable: false,
            }))
            .unwrap();
        assert!(table.is_tracked(fd));
        table.untrack(fd).unwrap();
        assert!(!table.is_tracked(fd));
    }

    #[test]
    fn patch_shifts_descriptors_past_victim() {
        let mut table = DescriptorTable::new();
        let fd = table
            .track(Descriptor::File(OpenFile {
                record: RecordAddr(8192),
                pos: 0,
                readable: true,
                writable: false,
            }))
            .unwrap();
        table.patch(&Compaction {
            victim: RecordAddr(0),
            shift: 4096,
        });
        match table.get(fd).unwrap() {
            Descriptor::File(f) => assert_eq!(f.record, RecordAddr(4096)),
            _ => panic!("expected file descriptor"),
        }
    }

    #[test]
    fn patch_frees_descriptor_at_victim() {
        let mut table = DescriptorTable::new();
        let fd = table
            .track(Descriptor::File(OpenFile {
                record: RecordAddr(0),
                pos: 0,
                readable: true,
                writable: false,
            }))
            .unwrap();
        table.patch(&Compaction {
            victim: RecordAddr(0),
            shift: 4096,
        });
        assert!(!table.is_tracked(fd));
    }
}
