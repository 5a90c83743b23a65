//! NES Cartridge Mapper Implementations.
//!
//! This crate provides mapper implementations for NES cartridge emulation.
//! Mappers handle memory banking for PRG-ROM, CHR-ROM/RAM, and provide
//! various hardware features like IRQ generation.
//!
//! # Supported Mappers
//!
//! | Mapper | Name | Description |
//! |--------|------|-------------|
//! | 0 | NROM | No banking, simplest mapper |
//! | 4 | MMC3 | Fine-grained banking + scanline IRQ |
//!
//! Dispatch across mappers is a compile-time tagged union ([`Cartridge`]), not
//! a trait object: there is no vtable indirection on the `cpu_read`/`ppu_read`
//! hot path, just a match over a closed enum.
//!
//! # Example
//!
//! ```no_run
//! use rustynes_mappers::{Rom, Cartridge};
//!
//! let rom_data = std::fs::read("game.nes").expect("Failed to read ROM");
//! let rom = Rom::load(&rom_data).expect("Failed to parse ROM");
//! let mut cartridge = Cartridge::new(&rom).expect("Unsupported mapper");
//!
//! let opcode = cartridge.read_prg(0x8000);
//! let tile = cartridge.read_chr(0x0000);
//! ```
//!
//! # no_std Support
//!
//! This crate supports `no_std` environments with the `alloc` feature.
//! Disable the default `std` feature for embedded use.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod mapper;
pub mod rom;

mod mmc3;
mod nrom;

pub use mapper::{Mapper, Mirroring};
pub use mmc3::Mmc3;
pub use nrom::Nrom;
pub use rom::{Rom, RomError, RomHeader};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A loaded cartridge, dispatching mapper behavior via a closed tagged union.
///
/// Only the mappers actually implemented are representable: constructing a
/// `Cartridge` from a ROM with an unsupported mapper number fails at load
/// time rather than producing a trait object that might panic later.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Cartridge {
    /// Mapper 0: NROM.
    Nrom(Nrom),
    /// Mapper 4: MMC3.
    Mmc3(Mmc3),
}

impl Cartridge {
    /// Build a cartridge from a parsed ROM, selecting the mapper implementation
    /// by the header's mapper number.
    ///
    /// # Errors
    ///
    /// Returns `RomError::UnsupportedFormat` if the mapper number isn't NROM (0)
    /// or MMC3 (4).
    pub fn new(rom: &Rom) -> Result<Self, RomError> {
        match rom.header.mapper_number {
            0 => Ok(Self::Nrom(Nrom::new(rom))),
            4 => Ok(Self::Mmc3(Mmc3::new(rom))),
            n => Err(RomError::UnsupportedFormat(format!(
                "mapper {n} not supported (only NROM and MMC3 are implemented)"
            ))),
        }
    }

    /// Read a byte from PRG memory (CPU address space, $6000-$FFFF).
    #[must_use]
    pub fn read_prg(&self, addr: u16) -> u8 {
        match self {
            Self::Nrom(m) => m.read_prg(addr),
            Self::Mmc3(m) => m.read_prg(addr),
        }
    }

    /// Write a byte to PRG memory (CPU address space).
    pub fn write_prg(&mut self, addr: u16, val: u8) {
        match self {
            Self::Nrom(m) => m.write_prg(addr, val),
            Self::Mmc3(m) => m.write_prg(addr, val),
        }
    }

    /// Read a byte from CHR memory (PPU address space, $0000-$1FFF).
    #[must_use]
    pub fn read_chr(&self, addr: u16) -> u8 {
        match self {
            Self::Nrom(m) => m.read_chr(addr),
            Self::Mmc3(m) => m.read_chr(addr),
        }
    }

    /// Write a byte to CHR memory (only has an effect if the cartridge has CHR-RAM).
    pub fn write_chr(&mut self, addr: u16, val: u8) {
        match self {
            Self::Nrom(m) => m.write_chr(addr, val),
            Self::Mmc3(m) => m.write_chr(addr, val),
        }
    }

    /// Current nametable mirroring mode.
    #[must_use]
    pub fn mirroring(&self) -> Mirroring {
        match self {
            Self::Nrom(m) => m.mirroring(),
            Self::Mmc3(m) => m.mirroring(),
        }
    }

    /// Whether the mapper has an IRQ latched.
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        match self {
            Self::Nrom(m) => m.irq_pending(),
            Self::Mmc3(m) => m.irq_pending(),
        }
    }

    /// Acknowledge/clear the mapper's IRQ line.
    pub fn irq_acknowledge(&mut self) {
        match self {
            Self::Nrom(m) => m.irq_acknowledge(),
            Self::Mmc3(m) => m.irq_acknowledge(),
        }
    }

    /// Notify the mapper of a PPU A12 rising edge (MMC3 scanline counter).
    pub fn ppu_a12_rising(&mut self) {
        match self {
            Self::Nrom(m) => m.ppu_a12_rising(),
            Self::Mmc3(m) => m.ppu_a12_rising(),
        }
    }

    /// Get the iNES mapper number.
    #[must_use]
    pub fn mapper_number(&self) -> u16 {
        match self {
            Self::Nrom(m) => m.mapper_number(),
            Self::Mmc3(m) => m.mapper_number(),
        }
    }

    /// Get the mapper's display name.
    #[must_use]
    pub fn mapper_name(&self) -> &'static str {
        match self {
            Self::Nrom(m) => m.mapper_name(),
            Self::Mmc3(m) => m.mapper_name(),
        }
    }

    /// Whether the cartridge has battery-backed PRG-RAM.
    #[must_use]
    pub fn has_battery(&self) -> bool {
        match self {
            Self::Nrom(m) => m.has_battery(),
            Self::Mmc3(m) => m.has_battery(),
        }
    }

    /// Battery-backed RAM contents, for persisting save data.
    #[must_use]
    pub fn battery_ram(&self) -> Option<&[u8]> {
        match self {
            Self::Nrom(m) => m.battery_ram(),
            Self::Mmc3(m) => m.battery_ram(),
        }
    }

    /// Restore battery-backed RAM contents from a save file.
    pub fn set_battery_ram(&mut self, data: &[u8]) {
        match self {
            Self::Nrom(m) => m.set_battery_ram(data),
            Self::Mmc3(m) => m.set_battery_ram(data),
        }
    }

    /// Reset the mapper to its power-on state (does not reload PRG/CHR ROM).
    pub fn reset(&mut self) {
        match self {
            Self::Nrom(m) => m.reset(),
            Self::Mmc3(m) => m.reset(),
        }
    }
}

/// Get a list of supported mapper numbers.
#[must_use]
pub fn supported_mappers() -> &'static [u16] {
    &[0, 4]
}

/// Check if a mapper number is supported.
#[must_use]
pub fn is_mapper_supported(mapper: u16) -> bool {
    supported_mappers().contains(&mapper)
}
