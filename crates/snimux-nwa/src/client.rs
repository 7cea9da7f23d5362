use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use snimux_devices::{
    env, Deadline, Device, DeviceCapability, DeviceError, Field, MemoryReadRequest,
    MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse, NwaReplyItem, Result,
};
use snimux_mapping::{memory_type_for, AddressSpace, AddressTuple, MemoryType};
use snimux_nwa_protocol as wire;
use snimux_platforms::Config;
use tracing::debug;

use crate::loopback;

/// Default per-request budget when the caller carries no deadline.
pub const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) const CAPABILITIES: &[DeviceCapability] = &[
    DeviceCapability::ReadMemory,
    DeviceCapability::WriteMemory,
    DeviceCapability::ResetSystem,
    DeviceCapability::PauseUnpauseEmulation,
    DeviceCapability::FetchFields,
    DeviceCapability::ReadMemoryDomain,
    DeviceCapability::WriteMemoryDomain,
    DeviceCapability::NwaCommand,
];

/// One NWA-speaking emulator connection.
///
/// All command/reply sequencing happens under the container's per-device
/// mutex (`&mut self`), matching the protocol's strict request/response
/// pairing.
pub struct NwaClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    closed: bool,
    endpoint_id: u64,
    pub(crate) config: Arc<Config>,
    pub(crate) mapping: Option<crate::domains::CoreMapping>,
}

impl NwaClient {
    /// Connect and run the self-loop check before any handshake traffic.
    pub fn connect(addr: SocketAddr, config: Arc<Config>, timeout: Duration) -> Result<NwaClient> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| DeviceError::fatal(format!("emunwa: connect {addr}: {e}")))?;
        Self::from_stream(stream, config)
    }

    /// Wrap an established stream (used by tests and by detection probes).
    pub fn from_stream(stream: TcpStream, config: Arc<Config>) -> Result<NwaClient> {
        stream
            .set_nodelay(true)
            .map_err(|e| DeviceError::fatal(format!("emunwa: set nodelay: {e}")))?;

        let local = stream
            .local_addr()
            .map_err(|e| DeviceError::fatal(format!("emunwa: local addr: {e}")))?;
        let remote = stream
            .peer_addr()
            .map_err(|e| DeviceError::fatal(format!("emunwa: peer addr: {e}")))?;

        if loopback::is_self_loop(local) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return Err(DeviceError::fatal(format!(
                "emunwa: refusing self-loop connection (local {local} mirrors another session)"
            )));
        }
        let endpoint_id = loopback::register(local, remote);

        let reader = BufReader::with_capacity(
            4096,
            stream
                .try_clone()
                .map_err(|e| DeviceError::fatal(format!("emunwa: clone stream: {e}")))?,
        );
        Ok(NwaClient {
            stream,
            reader,
            closed: false,
            endpoint_id,
            config,
            mapping: None,
        })
    }

    fn fatal(&mut self, err: DeviceError) -> DeviceError {
        self.closed = true;
        loopback::deregister(self.endpoint_id);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        err
    }

    fn guard(&self, deadline: Deadline) -> Result<Deadline> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        Ok(deadline.or_after(READ_WRITE_TIMEOUT))
    }

    fn arm_timeouts(&mut self, deadline: Deadline) -> Result<()> {
        let remaining = deadline.bound(READ_WRITE_TIMEOUT);
        if remaining.is_zero() {
            return Err(DeviceError::DeadlineExceeded);
        }
        self.stream
            .set_read_timeout(Some(remaining))
            .and_then(|_| self.stream.set_write_timeout(Some(remaining)))
            .map_err(|e| DeviceError::fatal(format!("emunwa: set timeouts: {e}")))
    }

    pub(crate) fn write_frame(&mut self, bytes: &[u8], deadline: Deadline) -> Result<()> {
        if let Err(e) = self.arm_timeouts(deadline) {
            return Err(self.fatal(e));
        }
        if env::wire_debug() {
            debug!("nwa> {:?}", String::from_utf8_lossy(&bytes[..bytes.len().min(96)]));
        }
        match self.stream.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal(DeviceError::from_io("emunwa write", e))),
        }
    }

    pub(crate) fn read_reply(&mut self, deadline: Deadline) -> Result<wire::Reply> {
        if let Err(e) = self.arm_timeouts(deadline) {
            return Err(self.fatal(e));
        }
        match wire::read_reply(&mut self.reader) {
            Ok(reply) => Ok(reply),
            Err(wire::FrameError::Io(e)) => Err(self.fatal(DeviceError::from_io("emunwa read", e))),
            Err(e) => Err(self.fatal(DeviceError::fatal(format!("emunwa: {e}")))),
        }
    }

    /// One command/reply round trip; a first-item `error` key surfaces as a
    /// non-fatal command error.
    pub(crate) fn send_command(&mut self, line: &str, deadline: Deadline) -> Result<wire::Reply> {
        self.write_frame(&wire::encode_command(line), deadline)?;
        let reply = self.read_reply(deadline)?;
        if let Some(text) = reply.command_error() {
            return Err(DeviceError::non_fatal(format!("emunwa: error={text}")));
        }
        Ok(reply)
    }

    pub(crate) fn send_binary_command(
        &mut self,
        line: &str,
        payload: &[u8],
        deadline: Deadline,
    ) -> Result<wire::Reply> {
        self.write_frame(&wire::encode_binary_command(line, payload), deadline)?;
        let reply = self.read_reply(deadline)?;
        if let Some(text) = reply.command_error() {
            return Err(DeviceError::non_fatal(format!("emunwa: error={text}")));
        }
        Ok(reply)
    }

    fn expect_binary(reply: wire::Reply) -> Result<Vec<u8>> {
        match reply {
            wire::Reply::Binary(data) => Ok(data),
            wire::Reply::Ascii(items) => Err(DeviceError::non_fatal(format!(
                "emunwa: expected binary reply but got ascii: {items:?}"
            ))),
        }
    }
}

impl Drop for NwaClient {
    fn drop(&mut self) {
        loopback::deregister(self.endpoint_id);
    }
}

struct Region {
    offset: u64,
    size: usize,
    response: usize,
}

/// Copy one binary reply across its regions in order; a short reply
/// truncates the tail and leaves the remaining bytes zero.
fn distribute(bin: &[u8], regions: &[Region], out: &mut [MemoryReadResponse]) {
    let mut cursor = 0usize;
    for region in regions {
        if cursor < bin.len() {
            let available = (bin.len() - cursor).min(region.size);
            out[region.response].data[..available]
                .copy_from_slice(&bin[cursor..cursor + available]);
        }
        cursor += region.size;
    }
}

impl Device for NwaClient {
    fn capabilities(&self) -> &'static [DeviceCapability] {
        CAPABILITIES
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            loopback::deregister(self.endpoint_id);
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn multi_read_memory(
        &mut self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>> {
        let deadline = self.guard(deadline)?;

        let mut responses = Vec::with_capacity(reads.len());
        // Group by memory type, preserving first-seen order.
        let mut groups: Vec<(MemoryType, Vec<Region>)> = Vec::new();
        for (i, read) in reads.iter().enumerate() {
            let (kind, pak, offset) = memory_type_for(read.address)?;
            responses.push(MemoryReadResponse {
                request_address: read.address,
                device_address: AddressTuple {
                    address: pak,
                    space: AddressSpace::FxPakPro,
                    mapping: read.address.mapping,
                },
                data: vec![0u8; read.size],
            });

            let region = Region {
                offset: offset as u64,
                size: read.size,
                response: i,
            };
            match groups.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, regions)) => regions.push(region),
                None => groups.push((kind, vec![region])),
            }
        }

        // Write every command, then collect the replies in the same order.
        for (kind, regions) in &groups {
            let pairs: Vec<(u64, u64)> =
                regions.iter().map(|r| (r.offset, r.size as u64)).collect();
            let line = wire::core_read_command(&kind.to_string(), &pairs);
            self.write_frame(&wire::encode_command(&line), deadline)?;
        }
        for (_, regions) in &groups {
            let bin = Self::expect_binary(self.read_reply(deadline)?)?;
            distribute(&bin, regions, &mut responses);
        }

        Ok(responses)
    }

    fn multi_write_memory(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>> {
        let deadline = self.guard(deadline)?;

        let mut responses = Vec::with_capacity(writes.len());
        let mut groups: Vec<(MemoryType, Vec<usize>)> = Vec::new();
        for (i, write) in writes.iter().enumerate() {
            let (kind, pak, _) = memory_type_for(write.address)?;
            responses.push(MemoryWriteResponse {
                request_address: write.address,
                device_address: AddressTuple {
                    address: pak,
                    space: AddressSpace::FxPakPro,
                    mapping: write.address.mapping,
                },
                size: write.data.len(),
            });
            match groups.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, members)) => members.push(i),
                None => groups.push((kind, vec![i])),
            }
        }

        for (kind, members) in &groups {
            let mut pairs = Vec::with_capacity(members.len());
            let mut payload = Vec::new();
            for &i in members {
                let (_, _, offset) = memory_type_for(writes[i].address)?;
                pairs.push((offset as u64, writes[i].data.len() as u64));
                payload.extend_from_slice(&writes[i].data);
            }
            let line = wire::core_write_command(&kind.to_string(), &pairs);
            self.write_frame(&wire::encode_binary_command(&line, &payload), deadline)?;
        }

        let mut error_texts = Vec::new();
        for _ in &groups {
            let reply = self.read_reply(deadline)?;
            if let Some(text) = reply.command_error() {
                error_texts.push(text.to_owned());
            }
        }
        if !error_texts.is_empty() {
            return Err(DeviceError::non_fatal(format!(
                "emunwa: error={}",
                error_texts.join("\n")
            )));
        }

        Ok(responses)
    }

    fn memory_domains(&mut self, deadline: Deadline) -> Result<Vec<snimux_devices::MemoryDomain>> {
        let deadline = self.guard(deadline)?;
        self.domains_rediscover(deadline)
    }

    fn multi_domain_read(
        &mut self,
        deadline: Deadline,
        requests: &[snimux_devices::DomainReadRequest],
    ) -> Result<Vec<snimux_devices::DomainReadResponse>> {
        let deadline = self.guard(deadline)?;
        self.domain_read(deadline, requests)
    }

    fn multi_domain_write(
        &mut self,
        deadline: Deadline,
        requests: &[snimux_devices::DomainWriteRequest],
    ) -> Result<Vec<snimux_devices::DomainWriteResponse>> {
        let deadline = self.guard(deadline)?;
        self.domain_write(deadline, requests)
    }

    fn fetch_fields(&mut self, deadline: Deadline, fields: &[Field]) -> Result<Vec<String>> {
        let deadline = self.guard(deadline)?;

        let mut want_game = false;
        let mut want_core = false;
        let mut want_emulator = false;
        let mut want_status = false;
        for field in fields {
            match field {
                Field::RomFileName => want_game = true,
                Field::CoreName | Field::CoreVersion | Field::CorePlatform => want_core = true,
                Field::DeviceName | Field::DeviceVersion => want_emulator = true,
                Field::DeviceStatus => want_status = true,
            }
        }

        let game = want_game
            .then(|| self.send_command("GAME_INFO", deadline))
            .transpose()?;
        let core = want_core
            .then(|| self.send_command("CORE_CURRENT_INFO", deadline))
            .transpose()?;
        let emulator = want_emulator
            .then(|| self.send_command("EMULATOR_INFO", deadline))
            .transpose()?;
        let status = want_status
            .then(|| self.send_command("EMULATION_STATUS", deadline))
            .transpose()?;

        let first = |reply: &Option<wire::Reply>, key: &str| -> String {
            reply
                .as_ref()
                .and_then(|r| r.first_value(key))
                .unwrap_or_default()
                .to_owned()
        };

        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => first(&emulator, "name"),
                Field::DeviceVersion => first(&emulator, "version"),
                Field::DeviceStatus => first(&status, "state"),
                Field::CoreName => first(&core, "name"),
                Field::CoreVersion => first(&core, "version"),
                Field::CorePlatform => first(&core, "platform"),
                Field::RomFileName => first(&game, "file"),
            })
            .collect())
    }

    fn reset_system(&mut self, deadline: Deadline) -> Result<()> {
        let deadline = self.guard(deadline)?;
        self.send_command("EMULATION_RESET", deadline)?;
        Ok(())
    }

    fn pause_unpause(&mut self, deadline: Deadline, paused: bool) -> Result<bool> {
        let deadline = self.guard(deadline)?;
        let command = if paused {
            "EMULATION_PAUSE"
        } else {
            "EMULATION_RESUME"
        };
        self.send_command(command, deadline)?;
        Ok(paused)
    }

    fn nwa_command(
        &mut self,
        deadline: Deadline,
        command: &str,
        args: &str,
        binary_arg: Option<&[u8]>,
    ) -> Result<(Vec<NwaReplyItem>, Vec<u8>)> {
        let deadline = self.guard(deadline)?;
        let line = if args.is_empty() {
            command.to_owned()
        } else {
            format!("{command} {args}")
        };
        let reply = match binary_arg {
            Some(payload) => self.send_binary_command(&line, payload, deadline)?,
            None => self.send_command(&line, deadline)?,
        };
        Ok(match reply {
            wire::Reply::Binary(data) => (Vec::new(), data),
            wire::Reply::Ascii(items) => (items, Vec::new()),
        })
    }
}
