//! The single one-page RAM read-modify-write staging buffer. All record
//! mutations pass through this buffer so that writes to the same page
//! coalesce into one erase+program instead of one per byte, mirroring
//! `embedded-storage`'s `RmwNorFlashStorage` merge-buffer pattern.

use crate::errno::Errno;
use crate::flash;
use crate::Geometry;
use storage::Flash;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Clean,
    Loaded,
}

/// `PAGE` is the mount's page size. Board integrators pick the const that
/// matches their `Geometry::page_size`; `Xipfs::mount` rejects a mismatch.
pub struct PageBuffer<const PAGE: usize> {
    state: State,
    page: Option<usize>,
    data: [u8; PAGE],
    /// Snapshot of `data` as it reads on flash right now, to decide on
    /// `flush` whether a program is actually needed.
    on_flash: [u8; PAGE],
}

impl<const PAGE: usize> PageBuffer<PAGE> {
    pub const fn new() -> Self {
        PageBuffer {
            state: State::Clean,
            page: None,
            data: [0xff; PAGE],
            on_flash: [0xff; PAGE],
        }
    }

    fn ensure_loaded<F: Flash>(&mut self, flash: &mut F, geometry: &Geometry, page: usize) -> Result<(), Errno> {
        if self.page == Some(page) {
            return Ok(());
        }
        self.flush(flash, geometry)?;
        let start = flash::page_start(geometry, page);
        flash.read(start, &mut self.data).map_err(Errno::from)?;
        self.on_flash.copy_from_slice(&self.data);
        self.page = Some(page);
        self.state = State::Clean;
        Ok(())
    }

    /// Copy `n` bytes starting at flash address `src` into `dest`.
    pub fn read<F: Flash>(&mut self, flash: &mut F, geometry: &Geometry, src: usize, dest: &mut [u8]) -> Result<(), Errno> {
        if dest.is_empty() {
            return Ok(());
        }
        let page = flash::page_of(geometry, src);
        self.ensure_loaded(flash, geometry, page)?;
        let page_start = flash::page_start(geometry, page);
        let offset = src - page_start;
        if offset + dest.len() > PAGE {
            return Err(Errno::EOutNvm);
        }
        dest.copy_from_slice(&self.data[offset..offset + dest.len()]);
        Ok(())
    }

    /// Stage `src` at flash address `dst`. Does not program flash; call
    /// `flush` at the next externally-visible commit point.
    pub fn write<F: Flash>(&mut self, flash: &mut F, geometry: &Geometry, dst: usize, src: &[u8]) -> Result<(), Errno> {
        if src.is_empty() {
            return Ok(());
        }
        let page = flash::page_of(geometry, dst);
        self.ensure_loaded(flash, geometry, page)?;
        let page_start = flash::page_start(geometry, page);
        let offset = dst - page_start;
        if offset + src.len() > PAGE {
            return Err(Errno::EOutNvm);
        }
        self.data[offset..offset + src.len()].copy_from_slice(src);
        self.state = State::Loaded;
        Ok(())
    }

    /// If the buffer differs from what's on flash, erase the page and
    /// program the buffer back whole. No-op otherwise.
    pub fn flush<F: Flash>(&mut self, flash: &mut F, geometry: &Geometry) -> Result<(), Errno> {
        let Some(page) = self.page else {
            return Ok(());
        };
        if self.state == State::Clean || self.data == self.on_flash {
            self.state = State::Clean;
            return Ok(());
        }
        flash::erase_page(flash, geometry, page)?;
        let start = flash::page_start(geometry, page);
        let wb = flash.write_size();
        for chunk_start in (0..PAGE).step_by(wb) {
            let chunk = &self.data[chunk_start..chunk_start + wb];
            flash::program_word_aligned(flash, start + chunk_start, chunk)?;
        }
        self.on_flash.copy_from_slice(&self.data);
        self.state = State::Clean;
        Ok(())
    }

    /// Drop the loaded page without flushing. Used by compaction, which
    /// erases and rewrites pages directly and must not race a stale buffer.
    pub fn invalidate(&mut self) {
        self.page = None;
        self.state = State::Clean;
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

    #[test]
    fn coalesces_writes_into_one_flush() {
        let mut flash = XIPFS_DEFAULT.build().unwrap();
        let g = geometry();
        let mut buf: PageBuffer<4096> = PageBuffer::new();
        buf.write(&mut flash, &g, 0, &[1, 2, 3, 4]).unwrap();
        buf.write(&mut flash, &g, 4, &[5, 6, 7, 8]).unwrap();
        let writes_before = flash.write_count();
        buf.flush(&mut flash, &g).unwrap();
        assert!(flash.write_count() > writes_before);
        let mut readback = [0u8; 8];
        flash.read(0, &mut readback).unwrap();
        assert_eq!(readback, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn read_through_uncommitted_write() {
        let mut flash = XIPFS_DEFAULT.build().unwrap();
        let g = geometry();
        let mut buf: PageBuffer<4096> = PageBuffer::new();
        buf.write(&mut flash, &g, 0, &[9, 9]).unwrap();
        let mut dest = [0u8; 2];
        buf.read(&mut flash, &g, 0, &mut dest).unwrap();
        assert_eq!(dest, [9, 9]);
    }
}
