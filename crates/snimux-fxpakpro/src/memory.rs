use snimux_asm::{generate_copy_stub, StubWrite, STUB_BASE};
use snimux_devices::{
    AddressSpace, AddressTuple, Deadline, DeviceError, MemoryReadRequest, MemoryReadResponse,
    MemoryWriteRequest, MemoryWriteResponse, Result,
};
use snimux_fxpak_protocol::{self as protocol, Space, VGET_MAX_CHUNK, VGET_MAX_DESCRIPTORS};
use snimux_mapping::{classify_pak, translate, MemoryType, PAK_CMD};

use crate::device::{check_command_error, FxPakDevice};

/// WRAM offsets the pak's DMA engine may write directly (bank `$7F`); the
/// hook stub owns everything below.
const WRAM_DIRECT_START: u32 = 0x1_0000;

fn space_and_wire_address(pak: u32) -> (Space, u32) {
    if pak >= PAK_CMD {
        (Space::Cmd, pak & 0xFF_FFFF)
    } else {
        (Space::Snes, pak)
    }
}

/// One wire-sized slice of a request, remembering where its bytes land.
struct Chunk {
    space: Space,
    wire_address: u32,
    size: u8,
    response: usize,
    offset: usize,
}

impl FxPakDevice {
    pub(crate) fn read_memory(
        &mut self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>> {
        let mut responses = Vec::with_capacity(reads.len());
        let mut chunks: Vec<Chunk> = Vec::new();

        for (i, read) in reads.iter().enumerate() {
            let pak = translate(read.address, AddressSpace::FxPakPro)?;
            responses.push(MemoryReadResponse {
                request_address: read.address,
                device_address: AddressTuple {
                    address: pak,
                    space: AddressSpace::FxPakPro,
                    mapping: read.address.mapping,
                },
                data: vec![0u8; read.size],
            });

            let mut done = 0usize;
            while done < read.size {
                let len = (read.size - done).min(VGET_MAX_CHUNK);
                let (space, wire) = space_and_wire_address(pak + done as u32);
                chunks.push(Chunk {
                    space,
                    wire_address: wire,
                    size: len as u8,
                    response: i,
                    offset: done,
                });
                done += len;
            }
        }

        // One VGET per run of up to eight same-space chunks, in order.
        let mut batch_start = 0;
        while batch_start < chunks.len() {
            let space = chunks[batch_start].space;
            let mut batch_end = batch_start + 1;
            while batch_end < chunks.len()
                && batch_end - batch_start < VGET_MAX_DESCRIPTORS
                && chunks[batch_end].space == space
            {
                batch_end += 1;
            }

            let batch = &chunks[batch_start..batch_end];
            let descriptors: Vec<(u32, u8)> =
                batch.iter().map(|c| (c.wire_address, c.size)).collect();
            let data = self.vget(space, &descriptors, deadline)?;

            let mut cursor = 0;
            for chunk in batch {
                let len = chunk.size as usize;
                responses[chunk.response].data[chunk.offset..chunk.offset + len]
                    .copy_from_slice(&data[cursor..cursor + len]);
                cursor += len;
            }
            batch_start = batch_end;
        }

        Ok(responses)
    }

    fn vget(&mut self, space: Space, descriptors: &[(u32, u8)], deadline: Deadline) -> Result<Vec<u8>> {
        let total: usize = descriptors.iter().map(|&(_, s)| s as usize).sum();
        let pkt = protocol::build_vget(space, descriptors)
            .map_err(|e| DeviceError::invalid_argument(e.to_string()))?;
        self.link.send_packet(&pkt, deadline)?;

        let (_, header) = self.link.recv_response_header(deadline, false)?;
        if header.error_code != 0 {
            return Err(self.fatal_header(format!(
                "vget: protocol error code {}",
                header.error_code
            )));
        }
        if header.size as usize != total {
            return Err(self.fatal_header(format!(
                "vget: response size echo {} but requested {total}",
                header.size
            )));
        }
        self.link.recv_data(total, deadline)
    }

    pub(crate) fn write_memory(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>> {
        let mut responses = Vec::with_capacity(writes.len());
        let mut resolved: Vec<(u32, MemoryType, u32)> = Vec::with_capacity(writes.len());

        let mut needs_stub = false;
        for write in writes {
            let pak = translate(write.address, AddressSpace::FxPakPro)?;
            let (region, offset) = classify_pak(pak);
            if region == MemoryType::ApuRam {
                return Err(DeviceError::invalid_argument(
                    "APURAM is not writeable on this device",
                ));
            }
            needs_stub |= write_needs_stub(region, offset);
            resolved.push((pak, region, offset));

            responses.push(MemoryWriteResponse {
                request_address: write.address,
                device_address: AddressTuple {
                    address: pak,
                    space: AddressSpace::FxPakPro,
                    mapping: write.address.mapping,
                },
                size: write.data.len(),
            });
        }

        if needs_stub {
            self.write_via_stub(deadline, writes, &resolved)?;
        } else {
            self.write_via_vput(deadline, writes, &resolved)?;
        }

        Ok(responses)
    }

    /// Console-shadow regions: upload the generated stub to CMD space, then
    /// arm the NMI hook with a one-byte write of its first (NOP) byte.
    fn write_via_stub(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
        resolved: &[(u32, MemoryType, u32)],
    ) -> Result<()> {
        let stub_writes: Vec<StubWrite<'_>> = writes
            .iter()
            .zip(resolved)
            .map(|(w, &(pak, _, _))| StubWrite {
                pak_address: pak,
                data: &w.data,
            })
            .collect();
        let block =
            generate_copy_stub(&stub_writes).map_err(|e| DeviceError::invalid_argument(e.to_string()))?;

        self.put(Space::Cmd, STUB_BASE + 1, &block[1..], deadline)?;
        self.put(Space::Cmd, STUB_BASE, &block[..1], deadline)
    }

    fn write_via_vput(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
        resolved: &[(u32, MemoryType, u32)],
    ) -> Result<()> {
        // Slice every write into wire chunks first so batches stay in order.
        struct WriteChunk<'a> {
            space: Space,
            wire_address: u32,
            data: &'a [u8],
        }
        let mut chunks: Vec<WriteChunk<'_>> = Vec::new();
        for (write, &(pak, _, _)) in writes.iter().zip(resolved) {
            let mut done = 0usize;
            while done < write.data.len() {
                let len = (write.data.len() - done).min(VGET_MAX_CHUNK);
                let (space, wire) = space_and_wire_address(pak + done as u32);
                chunks.push(WriteChunk {
                    space,
                    wire_address: wire,
                    data: &write.data[done..done + len],
                });
                done += len;
            }
        }

        let mut batch_start = 0;
        while batch_start < chunks.len() {
            let space = chunks[batch_start].space;
            let mut batch_end = batch_start + 1;
            while batch_end < chunks.len()
                && batch_end - batch_start < VGET_MAX_DESCRIPTORS
                && chunks[batch_end].space == space
            {
                batch_end += 1;
            }

            let batch = &chunks[batch_start..batch_end];
            let descriptors: Vec<(u32, u8)> = batch
                .iter()
                .map(|c| (c.wire_address, c.data.len() as u8))
                .collect();
            let pkt = protocol::build_vput(space, &descriptors)
                .map_err(|e| DeviceError::invalid_argument(e.to_string()))?;

            let total: usize = batch.iter().map(|c| c.data.len()).sum();
            let mut payload = Vec::with_capacity(protocol::padded_len(total));
            for chunk in batch {
                payload.extend_from_slice(chunk.data);
            }
            payload.resize(protocol::padded_len(total), 0);

            self.link.send_packet(&pkt, deadline)?;
            self.link.send_raw(&payload, deadline)?;

            let (_, header) = self.link.recv_response_header(deadline, false)?;
            if header.error_code != 0 {
                return Err(self.fatal_header(format!(
                    "vput: protocol error code {}",
                    header.error_code
                )));
            }

            batch_start = batch_end;
        }
        Ok(())
    }

    /// Legacy single-range write: header, padded payload, response.
    pub(crate) fn put(
        &mut self,
        space: Space,
        addr: u32,
        data: &[u8],
        deadline: Deadline,
    ) -> Result<()> {
        let pkt = protocol::build_put(space, addr, data.len() as u32);
        self.link.send_packet(&pkt, deadline)?;

        let mut payload = data.to_vec();
        payload.resize(protocol::padded_len(data.len()), 0);
        self.link.send_raw(&payload, deadline)?;

        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("put", header.error_code)
    }

    /// Legacy single-range read.
    pub(crate) fn get(
        &mut self,
        space: Space,
        addr: u32,
        size: usize,
        deadline: Deadline,
    ) -> Result<Vec<u8>> {
        let pkt = protocol::build_get(space, addr, size as u32);
        self.link.send_packet(&pkt, deadline)?;

        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("get", header.error_code)?;
        if header.size as usize != size {
            return Err(self.fatal_header(format!(
                "get: response size echo {} but requested {size}",
                header.size
            )));
        }
        self.link.recv_data(size, deadline)
    }

    fn fatal_header(&mut self, message: String) -> DeviceError {
        // Desynchronized memory exchanges poison the stream.
        let _ = self.link.close();
        DeviceError::fatal(message)
    }
}

fn write_needs_stub(region: MemoryType, offset: u32) -> bool {
    match region {
        MemoryType::Vram | MemoryType::CgRam | MemoryType::Oam => true,
        MemoryType::Wram => offset < WRAM_DIRECT_START,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_routing_rules() {
        assert!(write_needs_stub(MemoryType::Vram, 0));
        assert!(write_needs_stub(MemoryType::CgRam, 0x100));
        assert!(write_needs_stub(MemoryType::Oam, 0));
        assert!(write_needs_stub(MemoryType::Wram, 0xFFFF));
        assert!(!write_needs_stub(MemoryType::Wram, 0x1_0000));
        assert!(!write_needs_stub(MemoryType::CartRam, 0));
        assert!(!write_needs_stub(MemoryType::CartRom, 0));
        assert!(!write_needs_stub(MemoryType::Cmd, 0));
    }

    #[test]
    fn cmd_space_addresses_mask_to_24_bits() {
        assert_eq!(space_and_wire_address(0x2C00), (Space::Snes, 0x2C00));
        assert_eq!(space_and_wire_address(0x100_2C00), (Space::Cmd, 0x2C00));
    }
}
