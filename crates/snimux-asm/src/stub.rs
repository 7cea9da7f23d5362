use snimux_mapping::{classify_pak, MemoryType};
use thiserror::Error;

use crate::emitter::{EmitError, Emitter};

/// Bank-0 address the NMI hook executes from (CMD space on the pak side).
pub const STUB_BASE: u32 = 0x2C00;
/// The hook window holds one pak sector: code plus payload must fit.
pub const STUB_MAX_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StubError {
    #[error("empty write batch")]
    Empty,
    #[error("write stub needs {len} bytes, more than the {max}-byte hook window", max = STUB_MAX_LEN)]
    TooLarge { len: usize },
    #[error("{0} cannot be written by the hook stub")]
    UnsupportedRegion(MemoryType),
    #[error("{0}")]
    Emit(#[from] EmitError),
}

/// One region write to fold into the stub. The address is a pak address in
/// one of the console-shadow regions.
#[derive(Debug, Clone, Copy)]
pub struct StubWrite<'a> {
    pub pak_address: u32,
    pub data: &'a [u8],
}

/// Assemble the complete hook block (code followed by payload bytes) for
/// `writes`, in request order.
///
/// The result is meant to be uploaded at [`STUB_BASE`] in CMD space; byte 0
/// is a NOP that doubles as the hook's arm flag, and the epilogue clears it
/// before returning.
pub fn generate_copy_stub(writes: &[StubWrite<'_>]) -> Result<Vec<u8>, StubError> {
    if writes.is_empty() {
        return Err(StubError::Empty);
    }

    // Pass 1 with zeroed payload offsets to learn the code size; operand
    // widths are fixed, so pass 2 emits identical-length code.
    let probe = assemble(writes, 0)?;
    let code_len = probe.len();
    let code = assemble(writes, code_len as u16)?;
    debug_assert_eq!(code.len(), code_len);

    let payload_len: usize = writes.iter().map(|w| w.data.len()).sum();
    let total = code_len + payload_len;
    if total > STUB_MAX_LEN {
        return Err(StubError::TooLarge { len: total });
    }

    let mut block = code;
    for w in writes {
        block.extend_from_slice(w.data);
    }
    Ok(block)
}

fn assemble(writes: &[StubWrite<'_>], payload_base: u16) -> Result<Vec<u8>, StubError> {
    let mut a = Emitter::new(STUB_BASE);

    // The hook fires on a non-zero byte at $2C00 and jumps here; keep real
    // code off the flag address.
    a.nop();
    a.nop();

    // Preserve P/A/X/Y/D/B, then settle into 8-bit A, 16-bit X/Y, DB=0.
    a.php();
    a.rep(0x30);
    a.pha();
    a.phx();
    a.phy();
    a.phd();
    a.phb();
    a.sep(0x20);
    a.lda_imm8(0x00);
    a.pha();
    a.plb();

    let mut src = (STUB_BASE as u16).wrapping_add(payload_base);
    for w in writes {
        let (region, offset) = classify_pak(w.pak_address);
        let len = w.data.len() as u16;
        if len == 0 {
            continue;
        }
        match region {
            MemoryType::Wram => emit_wram(&mut a, offset, src, len),
            MemoryType::Vram => emit_vram(&mut a, offset, src, len),
            MemoryType::CgRam => emit_port_loop(&mut a, 0x2121, (offset >> 1) as u8, 0x2122, src, len)?,
            MemoryType::Oam => emit_oam(&mut a, offset, src, len)?,
            other => return Err(StubError::UnsupportedRegion(other)),
        }
        src = src.wrapping_add(len);
    }

    // Disarm the hook while DB is still 0, then restore and return.
    a.stz_abs(STUB_BASE as u16);
    a.rep(0x30);
    a.plb();
    a.pld();
    a.ply();
    a.plx();
    a.pla();
    a.plp();
    a.rts();

    Ok(a.into_code())
}

/// WRAM: `MVN` block move into bank $7E/$7F. MVN wants a 16-bit A holding
/// `count - 1` and leaves DB pointing at the destination bank.
fn emit_wram(a: &mut Emitter, offset: u32, src: u16, len: u16) {
    let dst_bank = 0x7E + (offset >> 16) as u8;
    let dst = (offset & 0xFFFF) as u16;
    a.phb();
    a.rep(0x20);
    a.lda_imm16(len - 1);
    a.ldx_imm16(src);
    a.ldy_imm16(dst);
    a.mvn(dst_bank, 0x00);
    a.sep(0x20);
    a.plb();
}

/// VRAM: general-purpose DMA on channel 0 into the $2118/19 data port.
fn emit_vram(a: &mut Emitter, offset: u32, src: u16, len: u16) {
    a.lda_imm8(0x80);
    a.sta_abs(0x2115); // VMAIN: increment after high byte
    a.rep(0x20);
    a.lda_imm16((offset >> 1) as u16);
    a.sta_abs(0x2116); // VMADD
    a.sep(0x20);
    a.lda_imm8(0x01);
    a.sta_abs(0x4300); // two-register write-once
    a.lda_imm8(0x18);
    a.sta_abs(0x4301); // B-bus target $2118
    a.rep(0x20);
    a.lda_imm16(src);
    a.sta_abs(0x4302); // A-bus source
    a.sep(0x20);
    a.lda_imm8(0x00);
    a.sta_abs(0x4304); // source bank
    a.rep(0x20);
    a.lda_imm16(len);
    a.sta_abs(0x4305); // byte count
    a.sep(0x20);
    a.lda_imm8(0x01);
    a.sta_abs(0x420B); // fire channel 0
}

/// OAM: set the word address, then stream bytes through $2104.
fn emit_oam(a: &mut Emitter, offset: u32, src: u16, len: u16) -> Result<(), StubError> {
    a.rep(0x20);
    a.lda_imm16((offset >> 1) as u16);
    a.sta_abs(0x2102); // OAMADD
    a.sep(0x20);
    emit_copy_loop(a, 0x2104, src, len)
}

/// CGRAM-style port: one-byte address register, then stream through the
/// data register.
fn emit_port_loop(
    a: &mut Emitter,
    addr_reg: u16,
    start: u8,
    data_reg: u16,
    src: u16,
    len: u16,
) -> Result<(), StubError> {
    a.lda_imm8(start);
    a.sta_abs(addr_reg);
    emit_copy_loop(a, data_reg, src, len)
}

fn emit_copy_loop(a: &mut Emitter, data_reg: u16, src: u16, len: u16) -> Result<(), StubError> {
    a.ldx_imm16(src);
    a.ldy_imm16(len);
    let top = a.pc();
    a.lda_abs_x(0x0000);
    a.sta_abs(data_reg);
    a.inx();
    a.dey();
    a.bne_to(top)?;
    Ok(())
}
