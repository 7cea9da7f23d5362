#![forbid(unsafe_code)]

//! NWA (emulator network access protocol) wire codec.
//!
//! Requests are ASCII command lines, optionally carrying one binary
//! argument:
//!
//! ```text
//! CMD arg\n
//! bCMD arg\n \0 <u32-be length> <bytes>
//! ```
//!
//! Replies are either binary (`\0`, u32-be length, bytes) or ASCII: an
//! immediate `\n` followed by `key:value` lines, terminated by an empty
//! line. A repeated key within the current item starts the next item, which
//! is how the protocol encodes arrays of records.
//!
//! This crate only encodes and decodes; sockets, deadlines and locking live
//! in the driver.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, BufRead, Read};

use thiserror::Error;

pub type AsciiItem = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Binary(Vec<u8>),
    Ascii(Vec<AsciiItem>),
}

impl Reply {
    /// The `error` value of the first ASCII item, if present. Command-level
    /// errors ride in-band this way and leave the connection healthy.
    pub fn command_error(&self) -> Option<&str> {
        match self {
            Reply::Binary(_) => None,
            Reply::Ascii(items) => items.first().and_then(|m| m.get("error")).map(String::as_str),
        }
    }

    /// First item's value for `key`, for single-record replies.
    pub fn first_value(&self, key: &str) -> Option<&str> {
        match self {
            Reply::Binary(_) => None,
            Reply::Ascii(items) => items.first().and_then(|m| m.get(key)).map(String::as_str),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("reply must start with '\\0' (binary) or '\\n' (ascii), got {got:#04x}")]
    BadReplyStart { got: u8 },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Encode a plain command line.
pub fn encode_command(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    out
}

/// Encode a command line with a trailing binary argument block.
pub fn encode_binary_command(line: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + line.len() + 1 + 5 + payload.len());
    out.push(b'b');
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&encode_binary_block(payload));
    out
}

/// A standalone binary block (`\0`, u32-be length, bytes).
pub fn encode_binary_block(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(0);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// `CORE_READ name;$off;$sz;...` for one memory and its region list.
pub fn core_read_command(memory: &str, regions: &[(u64, u64)]) -> String {
    region_command("CORE_READ", memory, regions)
}

/// `bCORE_WRITE` line (without the `b` prefix, which
/// [`encode_binary_command`] adds) for one memory and its region list.
pub fn core_write_command(memory: &str, regions: &[(u64, u64)]) -> String {
    region_command("CORE_WRITE", memory, regions)
}

fn region_command(cmd: &str, memory: &str, regions: &[(u64, u64)]) -> String {
    let mut line = format!("{cmd} {memory}");
    for &(offset, size) in regions {
        let _ = write!(line, ";${offset:x};${size:x}");
    }
    line
}

/// Read one reply frame.
///
/// ASCII parsing stops at the empty line; a clean EOF mid-listing also ends
/// the reply with whatever was collected, matching the lenient servers in
/// the wild.
pub fn read_reply<R: BufRead>(r: &mut R) -> Result<Reply, FrameError> {
    let mut first = [0u8; 1];
    r.read_exact(&mut first)?;

    match first[0] {
        0 => {
            let mut len_bytes = [0u8; 4];
            r.read_exact(&mut len_bytes)?;
            let len = u32::from_be_bytes(len_bytes) as usize;
            let mut payload = vec![0u8; len];
            r.read_exact(&mut payload)?;
            Ok(Reply::Binary(payload))
        }
        b'\n' => {
            let mut items: Vec<AsciiItem> = Vec::new();
            let mut item = AsciiItem::new();
            let mut line = String::new();
            loop {
                line.clear();
                let n = r.read_line(&mut line)?;
                if n == 0 {
                    break;
                }
                let text = line.trim_end_matches(['\n', '\r']);
                if text.is_empty() {
                    break;
                }
                let (key, value) = match text.split_once(':') {
                    Some((k, v)) => (k.to_owned(), v.to_owned()),
                    None => (text.to_owned(), String::new()),
                };
                if item.contains_key(&key) {
                    items.push(std::mem::take(&mut item));
                }
                item.insert(key, value);
            }
            if !item.is_empty() {
                items.push(item);
            }
            Ok(Reply::Ascii(items))
        }
        got => Err(FrameError::BadReplyStart { got }),
    }
}
