use snimux_devices::{
    AddressTuple, Deadline, DeviceError, DomainOffsetData, DomainReadRequest, DomainReadResponse,
    DomainWriteRequest, DomainWriteResponse, MemoryDomain, MemoryReadRequest, MemoryWriteRequest,
    Result,
};
use snimux_mapping as map;

use crate::device::FxPakDevice;

struct DomainDesc {
    name: &'static str,
    start: u32,
    size: u64,
    writeable: bool,
    core_specific: bool,
}

/// The pak's domain table is static. `writeable` reflects the direct USB
/// path only; console-shadow regions the write stub can reach stay `false`.
const DOMAINS: &[DomainDesc] = &[
    DomainDesc {
        name: "CARTROM",
        start: map::PAK_CARTROM,
        size: map::CARTROM_SIZE as u64,
        writeable: true,
        core_specific: false,
    },
    DomainDesc {
        name: "CARTRAM",
        start: map::PAK_CARTRAM,
        size: map::CARTRAM_SIZE as u64,
        writeable: true,
        core_specific: false,
    },
    DomainDesc {
        name: "WRAM",
        start: map::PAK_WRAM,
        size: map::WRAM_SIZE as u64,
        writeable: false,
        core_specific: false,
    },
    DomainDesc {
        name: "APURAM",
        start: map::PAK_APURAM,
        size: map::APURAM_SIZE as u64,
        writeable: false,
        core_specific: false,
    },
    DomainDesc {
        name: "VRAM",
        start: map::PAK_VRAM,
        size: map::VRAM_SIZE as u64,
        writeable: false,
        core_specific: false,
    },
    DomainDesc {
        name: "CGRAM",
        start: map::PAK_CGRAM,
        size: map::CGRAM_SIZE as u64,
        writeable: false,
        core_specific: false,
    },
    DomainDesc {
        name: "OAM",
        start: map::PAK_OAM,
        size: map::OAM_SIZE as u64,
        writeable: false,
        core_specific: false,
    },
    DomainDesc {
        name: "FXPAKPRO_SNES",
        start: 0,
        size: map::PAK_CMD as u64,
        writeable: true,
        core_specific: true,
    },
    DomainDesc {
        name: "FXPAKPRO_CMD",
        start: map::PAK_CMD,
        size: map::CMD_SIZE as u64,
        writeable: true,
        core_specific: true,
    },
];

pub(crate) fn memory_domains() -> Vec<MemoryDomain> {
    DOMAINS
        .iter()
        .map(|d| MemoryDomain {
            name: d.name.to_owned(),
            start: d.start,
            size: d.size,
            is_exposed: true,
            is_core_specific: d.core_specific,
            is_readable: true,
            is_writeable: d.writeable,
        })
        .collect()
}

fn find_domain(name: &str) -> Result<&'static DomainDesc> {
    let upper = name.to_ascii_uppercase();
    DOMAINS
        .iter()
        .find(|d| d.name == upper)
        .ok_or_else(|| DeviceError::invalid_argument(format!("invalid domain name {name:?}")))
}

fn check_range(domain: &DomainDesc, offset: u64, size: u64) -> Result<()> {
    if offset >= domain.size {
        return Err(DeviceError::invalid_argument(format!(
            "request start {offset:#x} exceeds domain {} size {:#x}",
            domain.name, domain.size
        )));
    }
    if offset + size > domain.size {
        return Err(DeviceError::invalid_argument(format!(
            "request end {:#x} exceeds domain {} size {:#x}",
            offset + size,
            domain.name,
            domain.size
        )));
    }
    Ok(())
}

impl FxPakDevice {
    pub(crate) fn domain_read(
        &mut self,
        deadline: Deadline,
        requests: &[DomainReadRequest],
    ) -> Result<Vec<DomainReadResponse>> {
        // Validate everything and build the flat read list before any I/O.
        let mut flat = Vec::new();
        for req in requests {
            let domain = find_domain(&req.domain)?;
            for &(offset, size) in &req.reads {
                check_range(domain, offset, size)?;
                flat.push(MemoryReadRequest {
                    address: AddressTuple::pak(domain.start + offset as u32),
                    size: size as usize,
                });
            }
        }

        let mut data = self.read_memory(deadline, &flat)?.into_iter();
        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let reads = req
                .reads
                .iter()
                .map(|&(offset, _)| DomainOffsetData {
                    offset,
                    data: data
                        .next()
                        .map(|r| r.data)
                        .unwrap_or_default(),
                })
                .collect();
            responses.push(DomainReadResponse {
                domain: req.domain.clone(),
                reads,
            });
        }
        Ok(responses)
    }

    pub(crate) fn domain_write(
        &mut self,
        deadline: Deadline,
        requests: &[DomainWriteRequest],
    ) -> Result<Vec<DomainWriteResponse>> {
        let mut flat = Vec::new();
        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let domain = find_domain(&req.domain)?;
            let mut acks = Vec::with_capacity(req.writes.len());
            for write in &req.writes {
                let size = write.data.len() as u64;
                check_range(domain, write.offset, size)?;
                flat.push(MemoryWriteRequest {
                    address: AddressTuple::pak(domain.start + write.offset as u32),
                    data: write.data.clone(),
                });
                acks.push((write.offset, size));
            }
            responses.push(DomainWriteResponse {
                domain: req.domain.clone(),
                writes: acks,
            });
        }

        self.write_memory(deadline, &flat)?;
        Ok(responses)
    }
}
