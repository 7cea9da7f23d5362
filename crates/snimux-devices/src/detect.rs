use snimux_mapping::{AddressTuple, MemoryMapping};

use crate::container::AutoCloseableDevice;
use crate::deadline::Deadline;
use crate::error::{DeviceError, Result};
use crate::types::MemoryReadRequest;

/// Bytes to read per internal-header candidate, starting at the `$FFB0`
/// maker-code line.
pub const HEADER_LEN: usize = 0x30;

/// Pak addresses of the internal-header candidates, paired with the mapping
/// each location implies: LoROM (and SA-1) headers surface at pak `$7FB0`,
/// HiROM at `$FFB0`, ExHiROM at `$40FFB0`.
pub const HEADER_CANDIDATES: [(u32, MemoryMapping); 3] = [
    (0x00_7FB0, MemoryMapping::LoRom),
    (0x00_FFB0, MemoryMapping::HiRom),
    (0x40_FFB0, MemoryMapping::ExHiRom),
];

// Offsets within the 0x30-byte header slice.
const TITLE: usize = 0x10; // 21 bytes of JIS X 0201 text
const MAP_MODE: usize = 0x25;
const CHIPSET: usize = 0x26;
const COMPLEMENT: usize = 0x2C;
const CHECKSUM: usize = 0x2E;

fn score(header: &[u8], candidate: MemoryMapping) -> u32 {
    if header.len() < HEADER_LEN {
        return 0;
    }
    let mut score = 0;

    let complement = u16::from_le_bytes([header[COMPLEMENT], header[COMPLEMENT + 1]]);
    let checksum = u16::from_le_bytes([header[CHECKSUM], header[CHECKSUM + 1]]);
    if complement ^ checksum == 0xFFFF {
        score += 8;
    }

    let mode = header[MAP_MODE] & 0x0F;
    let mode_fits = match candidate {
        MemoryMapping::LoRom => mode == 0x0 || mode == 0x3,
        MemoryMapping::HiRom => mode == 0x1,
        MemoryMapping::ExHiRom => mode == 0x5,
        _ => false,
    };
    if mode_fits {
        score += 4;
    }

    let title = &header[TITLE..TITLE + 21];
    if title.iter().all(|&b| (0x20..0x7F).contains(&b)) {
        score += 2;
    }

    score
}

/// Pick the memory mapping from the three header candidates, read at
/// [`HEADER_CANDIDATES`] in order.
///
/// Each candidate location is scored on checksum/complement validity, the
/// map-mode byte and title printability; the best score wins, earlier
/// candidates winning ties. A LoROM winner whose map mode carries the SA-1
/// nibble reports [`MemoryMapping::Sa1`].
pub fn choose_mapping(headers: [&[u8]; 3]) -> MemoryMapping {
    let mut best = MemoryMapping::LoRom;
    let mut best_score = 0;
    let mut best_header: &[u8] = &[];
    for (i, (_, candidate)) in HEADER_CANDIDATES.iter().enumerate() {
        let s = score(headers[i], *candidate);
        if s > best_score {
            best = *candidate;
            best_score = s;
            best_header = headers[i];
        }
    }

    if best == MemoryMapping::LoRom
        && best_header.len() >= HEADER_LEN
        && best_header[MAP_MODE] & 0x0F == 0x3
        && best_header[CHIPSET] >= 0x30
    {
        return MemoryMapping::Sa1;
    }
    best
}

impl AutoCloseableDevice {
    /// Detect the cart's memory mapping by reading the internal-header
    /// candidates off the device.
    ///
    /// Callers hitting [`DeviceError::UnknownMapping`] run this once and
    /// retry with the detected mapping filled in.
    pub fn detect_memory_mapping(&self, deadline: Deadline) -> Result<MemoryMapping> {
        let reads: Vec<MemoryReadRequest> = HEADER_CANDIDATES
            .iter()
            .map(|&(addr, _)| MemoryReadRequest {
                address: AddressTuple::pak(addr),
                size: HEADER_LEN,
            })
            .collect();
        let responses = self.multi_read_memory(deadline, &reads)?;
        if responses.len() != HEADER_CANDIDATES.len() {
            return Err(DeviceError::fatal(format!(
                "mapping detection expected {} header reads, got {}",
                HEADER_CANDIDATES.len(),
                responses.len()
            )));
        }
        Ok(choose_mapping([
            responses[0].data.as_slice(),
            responses[1].data.as_slice(),
            responses[2].data.as_slice(),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(mode: u8, chipset: u8) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[TITLE..TITLE + 21].copy_from_slice(b"SUPER TEST ROM       ");
        h[MAP_MODE] = mode;
        h[CHIPSET] = chipset;
        h[COMPLEMENT] = 0x34;
        h[COMPLEMENT + 1] = 0x12;
        h[CHECKSUM] = !0x34;
        h[CHECKSUM + 1] = !0x12;
        h
    }

    #[test]
    fn lorom_header_wins_at_7fb0() {
        let lorom = header(0x20, 0x00);
        let junk = vec![0xFFu8; HEADER_LEN];
        assert_eq!(
            choose_mapping([&lorom, &junk, &junk]),
            MemoryMapping::LoRom
        );
    }

    #[test]
    fn hirom_header_wins_at_ffb0() {
        let hirom = header(0x21, 0x00);
        let junk = vec![0u8; HEADER_LEN];
        assert_eq!(
            choose_mapping([&junk, &hirom, &junk]),
            MemoryMapping::HiRom
        );
    }

    #[test]
    fn exhirom_header_wins_at_40ffb0() {
        let ex = header(0x25, 0x00);
        let junk = vec![0u8; HEADER_LEN];
        assert_eq!(
            choose_mapping([&junk, &junk, &ex]),
            MemoryMapping::ExHiRom
        );
    }

    #[test]
    fn sa1_chip_id_upgrades_a_lorom_win() {
        let sa1 = header(0x23, 0x34);
        let junk = vec![0u8; HEADER_LEN];
        assert_eq!(choose_mapping([&sa1, &junk, &junk]), MemoryMapping::Sa1);
    }

    #[test]
    fn all_garbage_defaults_to_lorom() {
        let junk = vec![0u8; HEADER_LEN];
        assert_eq!(
            choose_mapping([&junk, &junk, &junk]),
            MemoryMapping::LoRom
        );
    }
}
