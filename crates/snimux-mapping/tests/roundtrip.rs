//! Round-trip coverage: for every mapping, walking the pak regions it maps,
//! `bus_to_pak(pak_to_bus(pak)) == pak`, which also pins down
//! `pak_to_bus(bus_to_pak(bus)) == bus` on the canonical bus forms.

use snimux_mapping::{exhirom, hirom, lorom, sa1, MemoryMapping, PAK_CARTRAM, PAK_WRAM};

const STEP: u32 = 0x101;

fn check_region(
    name: &str,
    bus_to_pak: fn(u32) -> u32,
    pak_to_bus: fn(u32) -> u32,
    start: u32,
    end: u32,
) {
    let mut pak = start;
    while pak < end {
        let bus = pak_to_bus(pak);
        assert_eq!(
            bus_to_pak(bus),
            pak,
            "{name}: pak {pak:#08x} -> bus {bus:#08x} did not round-trip"
        );
        pak = pak.wrapping_add(STEP);
    }
    // Region endpoints are the usual off-by-one spots.
    for pak in [start, end - 1] {
        let bus = pak_to_bus(pak);
        assert_eq!(bus_to_pak(bus), pak, "{name}: endpoint {pak:#08x}");
    }
}

#[test]
fn lorom_round_trips() {
    check_region("lorom rom", lorom::bus_to_pak, lorom::pak_to_bus, 0, 0x40_0000);
    // Banks $70-$7D hold 448 KiB of SRAM.
    check_region(
        "lorom sram",
        lorom::bus_to_pak,
        lorom::pak_to_bus,
        PAK_CARTRAM,
        PAK_CARTRAM + 14 * 0x8000,
    );
    check_region("lorom wram", lorom::bus_to_pak, lorom::pak_to_bus, PAK_WRAM, PAK_WRAM + 0x2_0000);
}

#[test]
fn hirom_round_trips() {
    check_region("hirom rom", hirom::bus_to_pak, hirom::pak_to_bus, 0, 0x40_0000);
    // Banks $20-$3F hold 8 KiB chunks: 256 KiB total.
    check_region(
        "hirom sram",
        hirom::bus_to_pak,
        hirom::pak_to_bus,
        PAK_CARTRAM,
        PAK_CARTRAM + 32 * 0x2000,
    );
    check_region("hirom wram", hirom::bus_to_pak, hirom::pak_to_bus, PAK_WRAM, PAK_WRAM + 0x2_0000);
}

#[test]
fn exhirom_round_trips() {
    check_region("exhirom lo", exhirom::bus_to_pak, exhirom::pak_to_bus, 0, 0x40_0000);
    check_region(
        "exhirom hi",
        exhirom::bus_to_pak,
        exhirom::pak_to_bus,
        0x40_0000,
        0x7E_0000,
    );
    check_region(
        "exhirom sram",
        exhirom::bus_to_pak,
        exhirom::pak_to_bus,
        PAK_CARTRAM,
        PAK_CARTRAM + 32 * 0x2000,
    );
    check_region(
        "exhirom wram",
        exhirom::bus_to_pak,
        exhirom::pak_to_bus,
        PAK_WRAM,
        PAK_WRAM + 0x2_0000,
    );
}

#[test]
fn sa1_round_trips() {
    check_region("sa1 rom", sa1::bus_to_pak, sa1::pak_to_bus, 0, 0x40_0000);
    check_region(
        "sa1 bwram",
        sa1::bus_to_pak,
        sa1::pak_to_bus,
        PAK_CARTRAM,
        PAK_CARTRAM + 0x10_0000,
    );
    check_region("sa1 wram", sa1::bus_to_pak, sa1::pak_to_bus, PAK_WRAM, PAK_WRAM + 0x2_0000);
}

#[test]
fn unknown_mapping_is_an_error_both_ways() {
    assert!(MemoryMapping::Unknown.bus_to_pak(0x7E_0000).is_err());
    assert!(MemoryMapping::Unknown.pak_to_bus(0xF5_0000).is_err());
}
