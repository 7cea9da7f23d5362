#![forbid(unsafe_code)]

//! FX Pak Pro USB serial command packet codec.
//!
//! Every host→device exchange is a whole number of 512-byte packets. A
//! request packet looks like:
//!
//! ```text
//! 0       4        5       6       7     252        256              512
//! +-------+--------+-------+-------+-----+----------+----------------+
//! | USBA  | opcode | space | flags | ... | size(be) | operand        |
//! +-------+--------+-------+-------+-----+----------+----------------+
//! ```
//!
//! The `size` field's meaning varies by opcode (byte count for GET/PUT,
//! operand length for path commands). VGET/VPUT instead carry up to eight
//! packed `(size:u8, addr:u24_be)` descriptors starting at byte 32. The
//! device answers every command with one RESPONSE header packet (same magic,
//! opcode [`Opcode::Response`], protocol error code in byte 5, size echo in
//! bytes 252..256), followed by data packets where the command calls for
//! them.
//!
//! This crate is pure: it builds and parses fixed packets and never touches
//! a serial port.

use thiserror::Error;

pub const PACKET_LEN: usize = 512;
pub const MAGIC: [u8; 4] = *b"USBA";

/// Descriptor table base inside VGET/VPUT request packets.
pub const VGET_DESCRIPTOR_BASE: usize = 32;
/// Descriptors per VGET/VPUT packet.
pub const VGET_MAX_DESCRIPTORS: usize = 8;
/// Largest region a single VGET/VPUT descriptor can carry.
pub const VGET_MAX_CHUNK: usize = 255;

/// Offset of the big-endian size field.
pub const SIZE_OFFSET: usize = 252;
/// Offset of the operand (address, path).
pub const OPERAND_OFFSET: usize = 256;
/// Offset of the rename target operand in MV requests.
pub const MV_TARGET_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0,
    Put = 1,
    Vget = 2,
    Vput = 3,
    Ls = 4,
    Mkdir = 5,
    Rm = 6,
    Mv = 7,
    Reset = 8,
    Boot = 9,
    PowerCycle = 10,
    Info = 11,
    MenuReset = 12,
    Stream = 13,
    Time = 14,
    Response = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Space {
    File = 0,
    Snes = 1,
    Msu = 2,
    Cmd = 3,
    Config = 4,
}

pub mod flags {
    pub const NONE: u8 = 0x00;
    /// BOOT: load the ROM without bouncing through a full console reset.
    pub const SKIP_RESET: u8 = 0x01;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("no descriptors in batched request")]
    EmptyBatch,
    #[error("too many descriptors in one packet: {count} > {max}", max = VGET_MAX_DESCRIPTORS)]
    TooManyDescriptors { count: usize },
    #[error("operand too long: {len} > {max}")]
    OperandTooLong { len: usize, max: usize },
    #[error("response packet does not start with the USBA magic")]
    BadMagic,
    #[error("response carries opcode {got:#04x}, expected RESPONSE")]
    BadOpcode { got: u8 },
    #[error("response size echo {got}, expected {expected}")]
    SizeEchoMismatch { expected: u32, got: u32 },
    #[error("malformed directory listing packet")]
    MalformedListing,
}

fn header(opcode: Opcode, space: Space, flag_bits: u8) -> [u8; PACKET_LEN] {
    let mut pkt = [0u8; PACKET_LEN];
    pkt[..4].copy_from_slice(&MAGIC);
    pkt[4] = opcode as u8;
    pkt[5] = space as u8;
    pkt[6] = flag_bits;
    pkt
}

fn put_size(pkt: &mut [u8; PACKET_LEN], size: u32) {
    pkt[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_addr24(pkt: &mut [u8; PACKET_LEN], addr: u32) {
    pkt[OPERAND_OFFSET] = (addr >> 16) as u8;
    pkt[OPERAND_OFFSET + 1] = (addr >> 8) as u8;
    pkt[OPERAND_OFFSET + 2] = addr as u8;
}

fn put_cstring(
    pkt: &mut [u8; PACKET_LEN],
    offset: usize,
    max: usize,
    value: &str,
) -> Result<usize, PacketError> {
    let bytes = value.as_bytes();
    // Reserve one byte for the terminator.
    if bytes.len() >= max {
        return Err(PacketError::OperandTooLong {
            len: bytes.len(),
            max: max - 1,
        });
    }
    pkt[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Single-range legacy read: `size` bytes from `addr`.
pub fn build_get(space: Space, addr: u32, size: u32) -> [u8; PACKET_LEN] {
    let mut pkt = header(Opcode::Get, space, flags::NONE);
    put_size(&mut pkt, size);
    put_addr24(&mut pkt, addr);
    pkt
}

/// Single-range legacy write header; the payload follows in 512-byte packets.
pub fn build_put(space: Space, addr: u32, size: u32) -> [u8; PACKET_LEN] {
    let mut pkt = header(Opcode::Put, space, flags::NONE);
    put_size(&mut pkt, size);
    put_addr24(&mut pkt, addr);
    pkt
}

fn build_vectored(
    opcode: Opcode,
    space: Space,
    descriptors: &[(u32, u8)],
) -> Result<[u8; PACKET_LEN], PacketError> {
    if descriptors.is_empty() {
        return Err(PacketError::EmptyBatch);
    }
    if descriptors.len() > VGET_MAX_DESCRIPTORS {
        return Err(PacketError::TooManyDescriptors {
            count: descriptors.len(),
        });
    }
    let mut pkt = header(opcode, space, flags::NONE);
    let mut total: u32 = 0;
    for (i, &(addr, size)) in descriptors.iter().enumerate() {
        let at = VGET_DESCRIPTOR_BASE + i * 4;
        pkt[at] = size;
        pkt[at + 1] = (addr >> 16) as u8;
        pkt[at + 2] = (addr >> 8) as u8;
        pkt[at + 3] = addr as u8;
        total += size as u32;
    }
    put_size(&mut pkt, total);
    Ok(pkt)
}

/// Batched read of up to eight `(addr, size)` regions, `size <= 255` each.
pub fn build_vget(space: Space, descriptors: &[(u32, u8)]) -> Result<[u8; PACKET_LEN], PacketError> {
    build_vectored(Opcode::Vget, space, descriptors)
}

/// Batched write header; the concatenated payload follows, padded to a
/// 512-byte boundary.
pub fn build_vput(space: Space, descriptors: &[(u32, u8)]) -> Result<[u8; PACKET_LEN], PacketError> {
    build_vectored(Opcode::Vput, space, descriptors)
}

fn build_path_op(
    opcode: Opcode,
    space: Space,
    flag_bits: u8,
    path: &str,
) -> Result<[u8; PACKET_LEN], PacketError> {
    let mut pkt = header(opcode, space, flag_bits);
    let len = put_cstring(&mut pkt, OPERAND_OFFSET, PACKET_LEN - OPERAND_OFFSET, path)?;
    put_size(&mut pkt, len as u32);
    Ok(pkt)
}

pub fn build_ls(path: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    build_path_op(Opcode::Ls, Space::File, flags::NONE, path)
}

pub fn build_mkdir(path: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    build_path_op(Opcode::Mkdir, Space::File, flags::NONE, path)
}

pub fn build_rm(path: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    build_path_op(Opcode::Rm, Space::File, flags::NONE, path)
}

/// Rename: original path in the operand area, new name in the header area.
pub fn build_mv(path: &str, new_name: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    let mut pkt = header(Opcode::Mv, Space::File, flags::NONE);
    let len = put_cstring(&mut pkt, OPERAND_OFFSET, PACKET_LEN - OPERAND_OFFSET, path)?;
    put_cstring(&mut pkt, MV_TARGET_OFFSET, SIZE_OFFSET - MV_TARGET_OFFSET, new_name)?;
    put_size(&mut pkt, len as u32);
    Ok(pkt)
}

/// File-space read header; data packets follow the RESPONSE header.
pub fn build_get_file(path: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    build_path_op(Opcode::Get, Space::File, flags::NONE, path)
}

/// File-space write header: path operand plus explicit payload size.
pub fn build_put_file(path: &str, size: u32) -> Result<[u8; PACKET_LEN], PacketError> {
    let mut pkt = header(Opcode::Put, Space::File, flags::NONE);
    put_cstring(&mut pkt, OPERAND_OFFSET, PACKET_LEN - OPERAND_OFFSET, path)?;
    put_size(&mut pkt, size);
    Ok(pkt)
}

pub fn build_boot(path: &str) -> Result<[u8; PACKET_LEN], PacketError> {
    build_path_op(Opcode::Boot, Space::File, flags::SKIP_RESET, path)
}

pub fn build_menu() -> [u8; PACKET_LEN] {
    header(Opcode::MenuReset, Space::File, flags::NONE)
}

pub fn build_reset() -> [u8; PACKET_LEN] {
    header(Opcode::Reset, Space::File, flags::NONE)
}

pub fn build_info() -> [u8; PACKET_LEN] {
    header(Opcode::Info, Space::Snes, flags::NONE)
}

/// Validated RESPONSE header.
///
/// A parse failure is a framing violation (the transport is no longer
/// trustworthy); a nonzero [`ResponseHeader::error_code`] in a well-framed
/// header is a protocol-level result the caller interprets per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub error_code: u8,
    pub size: u32,
}

pub fn parse_response_header(pkt: &[u8; PACKET_LEN]) -> Result<ResponseHeader, PacketError> {
    if pkt[..4] != MAGIC {
        return Err(PacketError::BadMagic);
    }
    if pkt[4] != Opcode::Response as u8 {
        return Err(PacketError::BadOpcode { got: pkt[4] });
    }
    let size = u32::from_be_bytes([pkt[252], pkt[253], pkt[254], pkt[255]]);
    Ok(ResponseHeader {
        error_code: pkt[5],
        size,
    })
}

/// Number of whole data packets needed to carry `len` payload bytes.
pub fn data_packet_count(len: usize) -> usize {
    len.div_ceil(PACKET_LEN)
}

/// Payload length once right-padded to a packet boundary.
pub fn padded_len(len: usize) -> usize {
    data_packet_count(len) * PACKET_LEN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsEntryKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsRecord {
    pub kind: LsEntryKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsStep {
    /// `0xFF` seen: the listing is complete.
    Done,
    /// `0x02` seen or the packet filled exactly: records continue in the
    /// next packet.
    Continue,
}

/// Decode one LS data packet, appending records to `out`.
pub fn decode_ls_packet(
    pkt: &[u8; PACKET_LEN],
    out: &mut Vec<LsRecord>,
) -> Result<LsStep, PacketError> {
    let mut i = 0;
    while i < PACKET_LEN {
        match pkt[i] {
            0xFF => return Ok(LsStep::Done),
            0x02 => return Ok(LsStep::Continue),
            kind_byte => {
                let kind = match kind_byte {
                    1 => LsEntryKind::File,
                    _ => LsEntryKind::Directory,
                };
                i += 1;
                let start = i;
                while i < PACKET_LEN && pkt[i] != 0 {
                    i += 1;
                }
                if i >= PACKET_LEN {
                    return Err(PacketError::MalformedListing);
                }
                let name = String::from_utf8_lossy(&pkt[start..i]).into_owned();
                i += 1;
                out.push(LsRecord { kind, name });
            }
        }
    }
    Ok(LsStep::Continue)
}

/// Fields of an INFO response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoFields {
    pub firmware_version: u32,
    pub version_string: String,
    pub rom_running: String,
    pub feature_flags: u8,
}

fn cstring_at(pkt: &[u8], offset: usize) -> String {
    let tail = &pkt[offset..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

pub fn decode_info(pkt: &[u8; PACKET_LEN]) -> InfoFields {
    InfoFields {
        firmware_version: u32::from_be_bytes([pkt[256], pkt[257], pkt[258], pkt[259]]),
        version_string: cstring_at(pkt, 260),
        rom_running: cstring_at(pkt, 16),
        feature_flags: pkt[6],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_request_is_one_packet_with_magic() {
        let packets = [
            build_get(Space::Snes, 0xF5_0000, 2),
            build_put(Space::Cmd, 0x2C00, 64),
            build_vget(Space::Snes, &[(0xF5_0000, 2)]).unwrap(),
            build_vput(Space::Snes, &[(0xE0_0000, 16)]).unwrap(),
            build_ls("/").unwrap(),
            build_mkdir("/roms").unwrap(),
            build_rm("/roms/old.sfc").unwrap(),
            build_mv("/roms/a.sfc", "b.sfc").unwrap(),
            build_boot("/roms/b.sfc").unwrap(),
            build_menu(),
            build_reset(),
            build_info(),
        ];
        for pkt in packets {
            assert_eq!(pkt.len(), PACKET_LEN);
            assert_eq!(&pkt[..4], b"USBA");
        }
    }

    #[test]
    fn get_layout() {
        let pkt = build_get(Space::Snes, 0xF5_0010, 0x123);
        assert_eq!(pkt[4], Opcode::Get as u8);
        assert_eq!(pkt[5], Space::Snes as u8);
        assert_eq!(&pkt[252..256], &[0, 0, 0x01, 0x23]);
        assert_eq!(&pkt[256..259], &[0xF5, 0x00, 0x10]);
    }

    #[test]
    fn vget_descriptor_packing() {
        let pkt = build_vget(Space::Snes, &[(0xF5_0000, 2), (0xE0_0010, 0xFF)]).unwrap();
        assert_eq!(pkt[4], Opcode::Vget as u8);
        assert_eq!(&pkt[32..36], &[0x02, 0xF5, 0x00, 0x00]);
        assert_eq!(&pkt[36..40], &[0xFF, 0xE0, 0x00, 0x10]);
        // Unused slots stay zero.
        assert_eq!(&pkt[40..44], &[0, 0, 0, 0]);
        // Size field totals the descriptors.
        assert_eq!(&pkt[252..256], &[0, 0, 0x01, 0x01]);
    }

    #[test]
    fn vget_rejects_oversized_batches() {
        let nine = [(0u32, 1u8); 9];
        assert_eq!(
            build_vget(Space::Snes, &nine),
            Err(PacketError::TooManyDescriptors { count: 9 })
        );
        assert_eq!(build_vget(Space::Snes, &[]), Err(PacketError::EmptyBatch));
    }

    #[test]
    fn response_header_classification() {
        let mut pkt = [0u8; PACKET_LEN];
        pkt[..4].copy_from_slice(b"USBA");
        pkt[4] = Opcode::Response as u8;
        pkt[5] = 0;
        pkt[252..256].copy_from_slice(&1u32.to_be_bytes());
        let hdr = parse_response_header(&pkt).unwrap();
        assert_eq!(hdr.error_code, 0);
        assert_eq!(hdr.size, 1);

        pkt[5] = 9;
        assert_eq!(parse_response_header(&pkt).unwrap().error_code, 9);

        pkt[4] = Opcode::Vget as u8;
        assert_eq!(
            parse_response_header(&pkt),
            Err(PacketError::BadOpcode {
                got: Opcode::Vget as u8
            })
        );

        pkt[0] = b'X';
        assert_eq!(parse_response_header(&pkt), Err(PacketError::BadMagic));
    }

    #[test]
    fn ls_record_stream() {
        let mut pkt = [0u8; PACKET_LEN];
        let mut i = 0;
        for (kind, name) in [(0u8, "games"), (1u8, "menu.bin")] {
            pkt[i] = kind;
            i += 1;
            pkt[i..i + name.len()].copy_from_slice(name.as_bytes());
            i += name.len() + 1;
        }
        pkt[i] = 0xFF;

        let mut out = Vec::new();
        assert_eq!(decode_ls_packet(&pkt, &mut out).unwrap(), LsStep::Done);
        assert_eq!(
            out,
            vec![
                LsRecord {
                    kind: LsEntryKind::Directory,
                    name: "games".into()
                },
                LsRecord {
                    kind: LsEntryKind::File,
                    name: "menu.bin".into()
                },
            ]
        );
    }

    #[test]
    fn ls_continue_marker_spills_to_next_packet() {
        let mut pkt = [0u8; PACKET_LEN];
        pkt[0] = 1;
        pkt[1..4].copy_from_slice(b"a.b");
        pkt[5] = 0x02;
        let mut out = Vec::new();
        assert_eq!(decode_ls_packet(&pkt, &mut out).unwrap(), LsStep::Continue);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn ls_unterminated_name_is_malformed() {
        let mut pkt = [1u8; PACKET_LEN];
        pkt[0] = 1;
        let mut out = Vec::new();
        assert_eq!(
            decode_ls_packet(&pkt, &mut out),
            Err(PacketError::MalformedListing)
        );
    }

    #[test]
    fn info_fields() {
        let mut pkt = [0u8; PACKET_LEN];
        pkt[..4].copy_from_slice(b"USBA");
        pkt[4] = Opcode::Response as u8;
        pkt[16..26].copy_from_slice(b"/o/smw.sfc");
        pkt[256..260].copy_from_slice(&0x0110u32.to_be_bytes());
        pkt[260..267].copy_from_slice(b"v1.10.0");
        let info = decode_info(&pkt);
        assert_eq!(info.firmware_version, 0x0110);
        assert_eq!(info.version_string, "v1.10.0");
        assert_eq!(info.rom_running, "/o/smw.sfc");
    }

    #[test]
    fn padding_math() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 512);
        assert_eq!(padded_len(512), 512);
        assert_eq!(padded_len(513), 1024);
        assert_eq!(data_packet_count(1026), 3);
    }
}
