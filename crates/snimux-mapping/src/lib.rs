#![forbid(unsafe_code)]

//! SNES address translation.
//!
//! Clients address SNES memory in one of three spaces:
//!
//! - [`AddressSpace::Raw`]: whatever the device natively speaks, untranslated
//! - [`AddressSpace::FxPakPro`]: the FX Pak Pro's linear 24-bit "pak" space
//!   (unified ROM/SRAM/console-shadow layout, see the `PAK_*` constants)
//! - [`AddressSpace::SnesABus`]: the 65C816 A-bus as the running game sees it
//!
//! Translating between the pak space and the A-bus depends on how the cart
//! decodes the bus, i.e. on the [`MemoryMapping`]. The per-mapping modules
//! ([`lorom`], [`hirom`], [`exhirom`], [`sa1`]) implement both directions as
//! total functions: `pak_to_bus` produces the canonical bus form for every
//! mapped pak address, and `bus_to_pak` additionally folds well-known mirrors
//! (fast-ROM banks `$80+`, the SA-1 `$6000-$7FFF` BW-RAM image) onto the same
//! pak address one-way.

pub mod exhirom;
pub mod hirom;
pub mod lorom;
pub mod sa1;

use thiserror::Error;

/// Base of cart ROM in pak space.
pub const PAK_CARTROM: u32 = 0x00_0000;
/// Base of cart battery RAM (SRAM / SA-1 BW-RAM) in pak space.
pub const PAK_CARTRAM: u32 = 0xE0_0000;
/// Base of the MSU-1 data window in pak space.
pub const PAK_MSU: u32 = 0xF0_0000;
/// Base of the console WRAM shadow in pak space.
pub const PAK_WRAM: u32 = 0xF5_0000;
/// Base of the console VRAM shadow in pak space.
pub const PAK_VRAM: u32 = 0xF7_0000;
/// Base of the console APU RAM shadow in pak space.
pub const PAK_APURAM: u32 = 0xF8_0000;
/// Base of the console CGRAM shadow in pak space.
pub const PAK_CGRAM: u32 = 0xF9_0000;
/// Base of the console OAM shadow in pak space.
pub const PAK_OAM: u32 = 0xF9_0200;
/// Base of the miscellaneous console-state area (PPU registers etc).
pub const PAK_MISC: u32 = 0xF9_0420;
/// Start of the pak CMD space; addresses at or above here select the
/// firmware command window instead of the SNES window.
pub const PAK_CMD: u32 = 0x100_0000;

pub const CARTROM_SIZE: u32 = 0xE0_0000;
pub const CARTRAM_SIZE: u32 = 0x10_0000;
pub const WRAM_SIZE: u32 = 0x02_0000;
pub const VRAM_SIZE: u32 = 0x01_0000;
pub const APURAM_SIZE: u32 = 0x01_0000;
pub const CGRAM_SIZE: u32 = 0x0200;
pub const OAM_SIZE: u32 = 0x0220;
pub const CMD_SIZE: u32 = 0x100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("cannot translate an address with an unknown memory mapping; run mapping detection first")]
    UnknownMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressSpace {
    #[default]
    FxPakPro,
    SnesABus,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryMapping {
    #[default]
    Unknown,
    LoRom,
    HiRom,
    ExHiRom,
    Sa1,
}

impl core::fmt::Display for MemoryMapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MemoryMapping::Unknown => write!(f, "Unknown"),
            MemoryMapping::LoRom => write!(f, "LoROM"),
            MemoryMapping::HiRom => write!(f, "HiROM"),
            MemoryMapping::ExHiRom => write!(f, "ExHiROM"),
            MemoryMapping::Sa1 => write!(f, "SA-1"),
        }
    }
}

/// An address qualified with the space it lives in and, when the space is
/// bus-relative, the cart mapping needed to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AddressTuple {
    pub address: u32,
    pub space: AddressSpace,
    pub mapping: MemoryMapping,
}

impl AddressTuple {
    pub fn pak(address: u32) -> Self {
        AddressTuple {
            address,
            space: AddressSpace::FxPakPro,
            mapping: MemoryMapping::Unknown,
        }
    }

    pub fn bus(address: u32, mapping: MemoryMapping) -> Self {
        AddressTuple {
            address,
            space: AddressSpace::SnesABus,
            mapping,
        }
    }
}

impl MemoryMapping {
    pub fn bus_to_pak(self, bus: u32) -> Result<u32, MappingError> {
        match self {
            MemoryMapping::LoRom => Ok(lorom::bus_to_pak(bus)),
            MemoryMapping::HiRom => Ok(hirom::bus_to_pak(bus)),
            MemoryMapping::ExHiRom => Ok(exhirom::bus_to_pak(bus)),
            MemoryMapping::Sa1 => Ok(sa1::bus_to_pak(bus)),
            MemoryMapping::Unknown => Err(MappingError::UnknownMapping),
        }
    }

    pub fn pak_to_bus(self, pak: u32) -> Result<u32, MappingError> {
        match self {
            MemoryMapping::LoRom => Ok(lorom::pak_to_bus(pak)),
            MemoryMapping::HiRom => Ok(hirom::pak_to_bus(pak)),
            MemoryMapping::ExHiRom => Ok(exhirom::pak_to_bus(pak)),
            MemoryMapping::Sa1 => Ok(sa1::pak_to_bus(pak)),
            MemoryMapping::Unknown => Err(MappingError::UnknownMapping),
        }
    }
}

/// Translate `source` into `device_space`.
///
/// Raw passes through untouched in either direction; same-space is identity;
/// the pak/bus pair routes through the per-mapping functions and requires a
/// known [`MemoryMapping`].
pub fn translate(source: AddressTuple, device_space: AddressSpace) -> Result<u32, MappingError> {
    match (source.space, device_space) {
        (AddressSpace::Raw, _) | (_, AddressSpace::Raw) => Ok(source.address),
        (AddressSpace::FxPakPro, AddressSpace::FxPakPro) => Ok(source.address),
        (AddressSpace::SnesABus, AddressSpace::SnesABus) => Ok(source.address),
        (AddressSpace::FxPakPro, AddressSpace::SnesABus) => source.mapping.pak_to_bus(source.address),
        (AddressSpace::SnesABus, AddressSpace::FxPakPro) => source.mapping.bus_to_pak(source.address),
    }
}

/// Named regions of the pak address space, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryType {
    CartRom,
    CartRam,
    Msu,
    Wram,
    Vram,
    ApuRam,
    CgRam,
    Oam,
    Misc,
    Cmd,
}

impl core::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            MemoryType::CartRom => "CARTROM",
            MemoryType::CartRam => "CARTRAM",
            MemoryType::Msu => "MSU",
            MemoryType::Wram => "WRAM",
            MemoryType::Vram => "VRAM",
            MemoryType::ApuRam => "APURAM",
            MemoryType::CgRam => "CGRAM",
            MemoryType::Oam => "OAM",
            MemoryType::Misc => "MISC",
            MemoryType::Cmd => "CMD",
        };
        write!(f, "{name}")
    }
}

/// Classify a pak address into its region, returning the region and the
/// region-relative offset.
pub fn classify_pak(pak: u32) -> (MemoryType, u32) {
    match pak {
        0x00_0000..=0xDF_FFFF => (MemoryType::CartRom, pak),
        0xE0_0000..=0xEF_FFFF => (MemoryType::CartRam, pak - PAK_CARTRAM),
        0xF0_0000..=0xF4_FFFF => (MemoryType::Msu, pak - PAK_MSU),
        0xF5_0000..=0xF6_FFFF => (MemoryType::Wram, pak - PAK_WRAM),
        0xF7_0000..=0xF7_FFFF => (MemoryType::Vram, pak - PAK_VRAM),
        0xF8_0000..=0xF8_FFFF => (MemoryType::ApuRam, pak - PAK_APURAM),
        0xF9_0000..=0xF9_01FF => (MemoryType::CgRam, pak - PAK_CGRAM),
        0xF9_0200..=0xF9_041F => (MemoryType::Oam, pak - PAK_OAM),
        0xF9_0420..=0xFF_FFFF => (MemoryType::Misc, pak - PAK_MISC),
        _ => (MemoryType::Cmd, pak - PAK_CMD),
    }
}

/// Resolve a request address to `(region, pak_address, region_offset)`.
///
/// This is the grouping key used by drivers that speak in memory regions
/// rather than flat addresses.
pub fn memory_type_for(tuple: AddressTuple) -> Result<(MemoryType, u32, u32), MappingError> {
    let pak = translate(tuple, AddressSpace::FxPakPro)?;
    let (kind, offset) = classify_pak(pak);
    Ok((kind, pak, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_space_is_identity() {
        let t = AddressTuple {
            address: 0x12_3456,
            space: AddressSpace::Raw,
            mapping: MemoryMapping::Unknown,
        };
        assert_eq!(translate(t, AddressSpace::FxPakPro), Ok(0x12_3456));
        assert_eq!(translate(t, AddressSpace::SnesABus), Ok(0x12_3456));
    }

    #[test]
    fn unknown_mapping_refuses_bus_translation() {
        let t = AddressTuple::bus(0x7E_0000, MemoryMapping::Unknown);
        assert_eq!(
            translate(t, AddressSpace::FxPakPro),
            Err(MappingError::UnknownMapping)
        );
        // ...but the same tuple aimed at the bus is identity.
        assert_eq!(translate(t, AddressSpace::SnesABus), Ok(0x7E_0000));
    }

    #[test]
    fn lorom_wram_example() {
        // {0x7E0123, SnesABus, LoROM} -> pak 0xF50123 and back.
        let t = AddressTuple::bus(0x7E_0123, MemoryMapping::LoRom);
        assert_eq!(translate(t, AddressSpace::FxPakPro), Ok(0xF5_0123));
        let back = AddressTuple {
            address: 0xF5_0123,
            space: AddressSpace::FxPakPro,
            mapping: MemoryMapping::LoRom,
        };
        assert_eq!(translate(back, AddressSpace::SnesABus), Ok(0x7E_0123));
    }

    #[test]
    fn classify_pak_regions() {
        assert_eq!(classify_pak(0x00_0000), (MemoryType::CartRom, 0));
        assert_eq!(classify_pak(0xE0_0010), (MemoryType::CartRam, 0x10));
        assert_eq!(classify_pak(0xF5_0000), (MemoryType::Wram, 0));
        assert_eq!(classify_pak(0xF6_FFFF), (MemoryType::Wram, 0x1_FFFF));
        assert_eq!(classify_pak(0xF7_0010), (MemoryType::Vram, 0x10));
        assert_eq!(classify_pak(0xF9_0000), (MemoryType::CgRam, 0));
        assert_eq!(classify_pak(0xF9_0200), (MemoryType::Oam, 0));
        assert_eq!(classify_pak(0x100_0000), (MemoryType::Cmd, 0));
        assert_eq!(classify_pak(0x12C_0000), (MemoryType::Cmd, 0x2C_0000));
    }
}
