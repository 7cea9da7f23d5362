#![forbid(unsafe_code)]

//! 65C816 code emission for the FX Pak Pro NMI-hook write stub.
//!
//! Console-side memories (VRAM, CGRAM, OAM, most of WRAM) are not writeable
//! over USB while a game is running; the pak instead executes a small stub
//! through its NMI hook. [`generate_copy_stub`] assembles that stub: a
//! register-preserving preamble, one copy body per write (DMA for VRAM,
//! `MVN` for WRAM, data-port stores for CGRAM/OAM), the payload bytes
//! appended after the code, and an epilogue that disarms the hook and
//! returns.

mod emitter;
mod stub;

pub use emitter::{EmitError, Emitter};
pub use stub::{generate_copy_stub, StubError, StubWrite, STUB_BASE, STUB_MAX_LEN};
