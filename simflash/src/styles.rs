//! Flash geometries
//!
//! Various microcontrollers have various types of flash memories available to
//! them, and an XIPFS mount must fit within a single device's page/write-block
//! granularity. This table names a handful of representative configurations,
//! generalized from per-board layouts into single-area geometries (XIPFS has
//! no upgrade-slot concept, so there is only one area per device, not a pair).

use crate::SimFlash;
use crate::Result;

/// The configuration of a single flash area.
pub struct AreaLayout {
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )
    }
}

/// STM32F4-style. A small number of relatively large sectors.
pub static STM32F_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 128 * 1024,
    sectors: 2,
};

/// K64-style. Small, uniform sectors.
pub static K64_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 8,
};

/// External flash configuration: same erase granularity as K64, larger
/// write alignment.
pub static EXT_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 4,
    erase_size: 4 * 1024,
    sectors: 8,
};

/// Page-style devices, where write size equals erase size. Based on the
/// LPC55S69.
pub static LPC_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 32,
};

/// Large-write, large-erase device, based on the STM32H745.
pub static STM32H_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 32,
    erase_size: 128 * 1024,
    sectors: 4,
};

/// The geometry assumed by xipfs's own scenario tests: a 4-byte write block
/// (the spec's `WRITE_BLOCK_SIZE`) and 4096-byte pages, 8 of them.
pub static XIPFS_DEFAULT: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 4,
    erase_size: 4096,
    sectors: 8,
};

/// Every named geometry, for exhaustive "run this scenario against every
/// device shape" tests.
pub static ALL_GEOMETRIES: [&AreaLayout; 5] =
    [&STM32F_MAIN, &K64_MAIN, &EXT_MAIN, &LPC_MAIN, &STM32H_MAIN];

/// An iterator that builds a fresh `SimFlash` for each named geometry.
pub fn all_flashes() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_GEOMETRIES.iter().map(|layout| layout.build())
}
