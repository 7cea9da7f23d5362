#![forbid(unsafe_code)]

//! Diagnostic CLI: drive any registered driver through the uniform device
//! operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use snimux_devices::{
    device_for_uri, drivers, AddressSpace, AddressTuple, AutoCloseableDevice, Deadline,
    DomainOffsetData, DomainReadRequest, DomainWriteRequest, Field, MemoryMapping,
    MemoryReadRequest, MemoryWriteRequest,
};
use snimux_platforms::Config;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "snimux", about = "Talk to SNES consoles and emulators")]
struct Args {
    /// Platforms/cores configuration file (JSON); defaults to the built-in.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-command deadline in milliseconds.
    #[arg(long, global = true, default_value_t = 15_000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List devices reachable right now, across all drivers.
    Detect,
    /// Read memory.
    Read {
        uri: Url,
        /// Address (hex), e.g. F50000 or 0x7E0010.
        address: String,
        #[arg(default_value_t = 16)]
        size: usize,
        /// Address space of ADDRESS: pak, bus or raw.
        #[arg(long, default_value = "pak")]
        space: String,
        /// Memory mapping for bus addresses: lorom, hirom, exhirom, sa1.
        /// Detected from the ROM header when omitted.
        #[arg(long)]
        mapping: Option<String>,
    },
    /// Write memory.
    Write {
        uri: Url,
        address: String,
        /// Bytes to write, hex, e.g. 01020304.
        data: String,
        #[arg(long, default_value = "pak")]
        space: String,
        #[arg(long)]
        mapping: Option<String>,
    },
    /// Detect the running cart's memory mapping from its ROM header.
    DetectMapping { uri: Url },
    /// List a directory on the device filesystem.
    Ls {
        uri: Url,
        #[arg(default_value = "/")]
        path: String,
    },
    Mkdir {
        uri: Url,
        path: String,
    },
    Rm {
        uri: Url,
        path: String,
    },
    Mv {
        uri: Url,
        path: String,
        new_name: String,
    },
    /// Upload a local file to the device.
    Put {
        uri: Url,
        local: PathBuf,
        remote: String,
    },
    /// Download a file from the device.
    Get {
        uri: Url,
        remote: String,
        local: PathBuf,
    },
    /// Boot a ROM by path.
    Boot { uri: Url, path: String },
    /// Exit to the device menu.
    Menu { uri: Url },
    /// Reset the running system.
    Reset { uri: Url },
    Pause { uri: Url },
    Resume { uri: Url },
    /// Fetch session metadata fields.
    Fields { uri: Url },
    /// List memory domains (forces rediscovery on emulators).
    Domains { uri: Url },
    DomainRead {
        uri: Url,
        domain: String,
        /// Offset (hex) within the domain.
        offset: String,
        #[arg(default_value_t = 16)]
        size: u64,
    },
    DomainWrite {
        uri: Url,
        domain: String,
        offset: String,
        data: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            Config::from_json(&text).context("parse config")?
        }
        None => Config::builtin().context("parse built-in config")?,
    };
    let config = Arc::new(config);

    snimux_fxpakpro::register_driver();
    snimux_nwa::register_driver(Arc::clone(&config));

    let deadline = Deadline::after(Duration::from_millis(args.timeout_ms));
    run(args.command, deadline)
}

fn run(command: Command, deadline: Deadline) -> Result<()> {
    match command {
        Command::Detect => {
            for driver in drivers() {
                let found = driver
                    .detect()
                    .map_err(|e| anyhow!("{}: {e}", driver.kind()))?;
                for descriptor in found {
                    println!("{}\t{}", descriptor.uri, descriptor.display_name);
                }
            }
            Ok(())
        }
        Command::Read {
            uri,
            address,
            size,
            space,
            mapping,
        } => {
            let device = device_for_uri(&uri)?;
            let address = resolve_address(&device, deadline, &address, &space, mapping.as_deref())?;
            let responses = device.multi_read_memory(
                deadline,
                &[MemoryReadRequest { address, size }],
            )?;
            hex_dump(address.address, &responses[0].data);
            Ok(())
        }
        Command::Write {
            uri,
            address,
            data,
            space,
            mapping,
        } => {
            let device = device_for_uri(&uri)?;
            let address = resolve_address(&device, deadline, &address, &space, mapping.as_deref())?;
            let data = parse_hex_bytes(&data)?;
            let count = data.len();
            device.multi_write_memory(deadline, &[MemoryWriteRequest { address, data }])?;
            println!("wrote {count} bytes");
            Ok(())
        }
        Command::DetectMapping { uri } => {
            let device = device_for_uri(&uri)?;
            println!("{}", device.detect_memory_mapping(deadline)?);
            Ok(())
        }
        Command::Ls { uri, path } => {
            let device = device_for_uri(&uri)?;
            for entry in device.list_files(deadline, &path)? {
                let marker = match entry.kind {
                    snimux_devices::DirEntryType::Directory => "d",
                    snimux_devices::DirEntryType::File => "f",
                };
                println!("{marker}\t{}", entry.name);
            }
            Ok(())
        }
        Command::Mkdir { uri, path } => device_for_uri(&uri)?
            .make_directory(deadline, &path)
            .map_err(Into::into),
        Command::Rm { uri, path } => device_for_uri(&uri)?
            .remove_file(deadline, &path)
            .map_err(Into::into),
        Command::Mv {
            uri,
            path,
            new_name,
        } => device_for_uri(&uri)?
            .rename_file(deadline, &path, &new_name)
            .map_err(Into::into),
        Command::Put { uri, local, remote } => {
            let data = std::fs::read(&local)
                .with_context(|| format!("read {}", local.display()))?;
            device_for_uri(&uri)?.put_file(deadline, &remote, &data)?;
            println!("uploaded {} bytes", data.len());
            Ok(())
        }
        Command::Get { uri, remote, local } => {
            let data = device_for_uri(&uri)?.get_file(deadline, &remote)?;
            std::fs::write(&local, &data)
                .with_context(|| format!("write {}", local.display()))?;
            println!("downloaded {} bytes", data.len());
            Ok(())
        }
        Command::Boot { uri, path } => device_for_uri(&uri)?
            .boot_file(deadline, &path)
            .map_err(Into::into),
        Command::Menu { uri } => device_for_uri(&uri)?
            .reset_to_menu(deadline)
            .map_err(Into::into),
        Command::Reset { uri } => device_for_uri(&uri)?
            .reset_system(deadline)
            .map_err(Into::into),
        Command::Pause { uri } => {
            device_for_uri(&uri)?.pause_unpause(deadline, true)?;
            Ok(())
        }
        Command::Resume { uri } => {
            device_for_uri(&uri)?.pause_unpause(deadline, false)?;
            Ok(())
        }
        Command::Fields { uri } => {
            let fields = [
                Field::DeviceName,
                Field::DeviceVersion,
                Field::DeviceStatus,
                Field::CoreName,
                Field::CoreVersion,
                Field::CorePlatform,
                Field::RomFileName,
            ];
            let values = device_for_uri(&uri)?.fetch_fields(deadline, &fields)?;
            for (field, value) in fields.iter().zip(values) {
                println!("{field:?}: {value}");
            }
            Ok(())
        }
        Command::Domains { uri } => {
            let domains = device_for_uri(&uri)?.memory_domains(deadline)?;
            for d in domains {
                println!(
                    "{}\tsize={:#x}\t{}{}{}{}",
                    d.name,
                    d.size,
                    if d.is_readable { "r" } else { "-" },
                    if d.is_writeable { "w" } else { "-" },
                    if d.is_exposed { "" } else { "\t(unexposed)" },
                    if d.is_core_specific { "\t(core)" } else { "" },
                );
            }
            Ok(())
        }
        Command::DomainRead {
            uri,
            domain,
            offset,
            size,
        } => {
            let offset = parse_hex(&offset)? as u64;
            let responses = device_for_uri(&uri)?.multi_domain_read(
                deadline,
                &[DomainReadRequest {
                    domain,
                    reads: vec![(offset, size)],
                }],
            )?;
            hex_dump(offset as u32, &responses[0].reads[0].data);
            Ok(())
        }
        Command::DomainWrite {
            uri,
            domain,
            offset,
            data,
        } => {
            let offset = parse_hex(&offset)? as u64;
            let data = parse_hex_bytes(&data)?;
            let count = data.len();
            device_for_uri(&uri)?.multi_domain_write(
                deadline,
                &[DomainWriteRequest {
                    domain,
                    writes: vec![DomainOffsetData { offset, data }],
                }],
            )?;
            println!("wrote {count} bytes");
            Ok(())
        }
    }
}

fn resolve_address(
    device: &AutoCloseableDevice,
    deadline: Deadline,
    text: &str,
    space: &str,
    mapping: Option<&str>,
) -> Result<AddressTuple> {
    let address = parse_hex(text)?;
    let space = match space {
        "pak" | "fxpakpro" => AddressSpace::FxPakPro,
        "bus" | "snes" => AddressSpace::SnesABus,
        "raw" => AddressSpace::Raw,
        other => bail!("unknown address space {other:?} (expected pak, bus or raw)"),
    };

    let mapping = match (space, mapping) {
        (AddressSpace::SnesABus, Some(name)) => parse_mapping(name)?,
        (AddressSpace::SnesABus, None) => {
            // Bus addressing needs a mapping; read it off the cart header.
            let detected = device.detect_memory_mapping(deadline)?;
            tracing::info!(%detected, "detected memory mapping");
            detected
        }
        _ => MemoryMapping::Unknown,
    };

    Ok(AddressTuple {
        address,
        space,
        mapping,
    })
}

fn parse_mapping(name: &str) -> Result<MemoryMapping> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "lorom" => MemoryMapping::LoRom,
        "hirom" => MemoryMapping::HiRom,
        "exhirom" => MemoryMapping::ExHiRom,
        "sa1" | "sa-1" => MemoryMapping::Sa1,
        other => bail!("unknown mapping {other:?}"),
    })
}

fn parse_hex(text: &str) -> Result<u32> {
    let trimmed = text.trim_start_matches("0x").trim_start_matches('$');
    u32::from_str_radix(trimmed, 16).with_context(|| format!("parse hex address {text:?}"))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.len() % 2 != 0 {
        bail!("hex data must have an even number of digits");
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&clean[i..i + 2], 16)
                .with_context(|| format!("parse hex data {text:?}"))
        })
        .collect()
}

fn hex_dump(base: u32, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let offset = base as usize + row * 16;
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let text: String = chunk
            .iter()
            .map(|&b| {
                if (0x20..0x7F).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        println!("{offset:06x}  {:<47}  {text}", bytes.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsers() {
        assert_eq!(parse_hex("F50000").unwrap(), 0xF5_0000);
        assert_eq!(parse_hex("0x7E0010").unwrap(), 0x7E_0010);
        assert_eq!(parse_hex("$2C00").unwrap(), 0x2C00);
        assert!(parse_hex("xyz").is_err());

        assert_eq!(parse_hex_bytes("01 02 ff").unwrap(), vec![1, 2, 0xFF]);
        assert!(parse_hex_bytes("abc").is_err());
    }

    #[test]
    fn mapping_names() {
        assert_eq!(parse_mapping("LoROM").unwrap(), MemoryMapping::LoRom);
        assert_eq!(parse_mapping("sa-1").unwrap(), MemoryMapping::Sa1);
        assert!(parse_mapping("turbografx").is_err());
    }
}
