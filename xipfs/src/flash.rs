//! Flash primitives: address/page arithmetic and the two operations every
//! higher layer is built from — page erase-with-verify and word-aligned
//! program-with-verify. Built directly on `storage::Flash`/`storage::ReadFlash`,
//! reusing `storage::check_erase`/`check_write` for alignment and bounds
//! rather than re-deriving them.

use crate::errno::Errno;
use crate::Geometry;
use storage::Flash;

/// Largest write-block size this crate supports for unaligned writes. Real
/// devices in `simflash::styles` top out at 512 (page-style devices where
/// write size equals erase size); this bounds the stack buffer in
/// `write_unaligned` without reaching for an allocator.
const MAX_WRITE_BLOCK: usize = 512;

pub fn in_flash(geometry: &Geometry, addr: usize) -> bool {
    addr >= geometry.base && addr < geometry.window_end()
}

pub fn page_of(geometry: &Geometry, addr: usize) -> usize {
    (addr - geometry.base) / geometry.page_size
}

pub fn page_start(geometry: &Geometry, page: usize) -> usize {
    geometry.base + page * geometry.page_size
}

/// Erase `page`, skipping the erase call if the page already reads as
/// the erased pattern. Verifies by re-scanning after a real erase.
pub fn erase_page<F: Flash>(flash: &mut F, geometry: &Geometry, page: usize) -> Result<(), Errno> {
    let start = page_start(geometry, page);
    let end = start + geometry.page_size;
    if region_is_erased(flash, start, end)? {
        return Ok(());
    }
    flash.erase(start, end).map_err(Errno::from)?;
    if !region_is_erased(flash, start, end)? {
        return Err(Errno::EIo);
    }
    Ok(())
}

/// True if every byte in `[start, end)` reads as the erased pattern.
pub fn region_is_erased<F: Flash>(flash: &mut F, start: usize, end: usize) -> Result<bool, Errno> {
    let mut chunk = [0u8; 64];
    let mut offset = start;
    while offset < end {
        let n = core::cmp::min(chunk.len(), end - offset);
        flash.read(offset, &mut chunk[..n]).map_err(Errno::from)?;
        if chunk[..n].iter().any(|b| *b != 0xff) {
            return Ok(false);
        }
        offset += n;
    }
    Ok(true)
}

/// Program `buf` at `addr`, which must be write-block aligned along with
/// `buf.len()`. Verifies by reading the bytes back.
pub fn program_word_aligned<F: Flash>(flash: &mut F, addr: usize, buf: &[u8]) -> Result<(), Errno> {
    storage::check_write(flash, addr, buf.len()).map_err(Errno::from)?;
    flash.write(addr, buf).map_err(Errno::from)?;
    let mut check = [0u8; MAX_WRITE_BLOCK];
    let check = &mut check[..buf.len()];
    flash.read(addr, check).map_err(Errno::from)?;
    if check != buf {
        return Err(Errno::EIo);
    }
    Ok(())
}

/// Write `src` at `dst`, which need not be write-block aligned. Each
/// straddled write block is read, merged with the new bytes, and
/// programmed back whole, matching real NOR's bit-clear-only semantics.
pub fn write_unaligned<F: Flash>(flash: &mut F, dst: usize, src: &[u8]) -> Result<(), Errno> {
    let wb = flash.write_size();
    if wb == 0 || wb > MAX_WRITE_BLOCK {
        return Err(Errno::EAlign);
    }
    let mut pos = dst;
    let mut remaining = src;
    while !remaining.is_empty() {
        let block_start = pos - (pos % wb);
        let offset_in_block = pos - block_start;
        let take = core::cmp::min(wb - offset_in_block, remaining.len());

        let mut block = [0u8; MAX_WRITE_BLOCK];
        let block = &mut block[..wb];
        flash.read(block_start, block).map_err(Errno::from)?;
        block[offset_in_block..offset_in_block + take].copy_from_slice(&remaining[..take]);
        program_word_aligned(flash, block_start, block)?;

        pos += take;
        remaining = &remaining[take..];
    }
    Ok(())
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
    fn page_arithmetic() {
        let g = geometry();
        assert_eq!(page_of(&g, 0), 0);
        assert_eq!(page_of(&g, 4096), 1);
        assert_eq!(page_start(&g, 2), 8192);
        assert!(in_flash(&g, 0));
        assert!(!in_flash(&g, 8 * 4096));
    }

    #[test]
    fn erase_page_is_idempotent() {
        let mut flash = XIPFS_DEFAULT.build().unwrap();
        let g = geometry();
        erase_page(&mut flash, &g, 0).unwrap();
        let erases_before = flash.erase_count();
        erase_page(&mut flash, &g, 0).unwrap();
        assert_eq!(flash.erase_count(), erases_before);
    }

    #[test]
    fn write_unaligned_merges_into_block() {
        let mut flash = XIPFS_DEFAULT.build().unwrap();
        write_unaligned(&mut flash, 1, &[0xaa, 0xbb]).unwrap();
        let mut readback = [0u8; 4];
        flash.read(0, &mut readback).unwrap();
        assert_eq!(readback, [0xff, 0xaa, 0xbb, 0xff]);
    }
}
