use std::io::{Read, Write};
use std::time::Duration;

use snimux_devices::{env, Deadline, DeviceError, Result};
use snimux_fxpak_protocol::{parse_response_header, ResponseHeader, PACKET_LEN};
use tracing::debug;

/// Per-512-byte-packet receive budget, bounded by the request deadline.
pub const SAFE_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte transport under the 512-byte framing. Implemented by the real
/// serial port and by scripted fakes in tests.
pub trait PakTransport: Send {
    fn send(&mut self, data: &[u8], deadline: Deadline) -> Result<()>;

    /// Fill `buf` completely, with a per-call timeout.
    fn recv_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl PakTransport for Box<dyn serialport::SerialPort> {
    fn send(&mut self, data: &[u8], deadline: Deadline) -> Result<()> {
        let timeout = deadline.bound(SAFE_TIMEOUT);
        if timeout.is_zero() {
            return Err(DeviceError::DeadlineExceeded);
        }
        self.set_timeout(timeout)
            .map_err(|e| DeviceError::fatal(format!("serial: set timeout: {e}")))?;
        self.write_all(data)
            .and_then(|_| self.flush())
            .map_err(|e| DeviceError::from_io("serial write", e))
    }

    fn recv_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(DeviceError::DeadlineExceeded);
        }
        self.set_timeout(timeout)
            .map_err(|e| DeviceError::fatal(format!("serial: set timeout: {e}")))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => return Err(DeviceError::fatal("serial read: port closed")),
                Ok(n) => filled += n,
                Err(e) => return Err(DeviceError::from_io("serial read", e)),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle releases the port; nothing further to flush.
        Ok(())
    }
}

/// Framed packet I/O with fatal-error latching.
///
/// Any transport or framing failure closes the link for good; callers then
/// fail fast with [`DeviceError::Closed`] until the container reopens the
/// device.
pub struct Link {
    transport: Box<dyn PakTransport>,
    closed: bool,
}

impl Link {
    pub fn new(transport: Box<dyn PakTransport>) -> Link {
        Link {
            transport,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.transport.close()?;
        }
        Ok(())
    }

    /// Latch a fatal error: the transport is torn down exactly once.
    fn fatal(&mut self, err: DeviceError) -> DeviceError {
        self.closed = true;
        let _ = self.transport.close();
        err
    }

    fn guard(&self) -> Result<()> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }

    pub fn send_packet(&mut self, pkt: &[u8; PACKET_LEN], deadline: Deadline) -> Result<()> {
        self.send_raw(pkt, deadline)
    }

    /// Send pre-framed bytes (whole packets only).
    pub fn send_raw(&mut self, data: &[u8], deadline: Deadline) -> Result<()> {
        self.guard()?;
        debug_assert_eq!(data.len() % PACKET_LEN, 0);
        if env::wire_debug() {
            debug!(len = data.len(), "pak> {:02x?}", &data[..data.len().min(32)]);
        }
        match self.transport.send(data, deadline) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal(e)),
        }
    }

    pub fn recv_packet(&mut self, buf: &mut [u8; PACKET_LEN], deadline: Deadline) -> Result<()> {
        self.guard()?;
        if deadline.expired() {
            return Err(self.fatal(DeviceError::DeadlineExceeded));
        }
        match self
            .transport
            .recv_exact(buf, deadline.bound(SAFE_TIMEOUT))
        {
            Ok(()) => {
                if env::wire_debug() {
                    debug!("pak< {:02x?}", &buf[..32]);
                }
                Ok(())
            }
            Err(e) => Err(self.fatal(e)),
        }
    }

    /// Receive and validate one RESPONSE header packet.
    ///
    /// `retry_once` covers the USB endpoint bounce after BOOT/MENU: a single
    /// timed-out header read is retried before it turns fatal.
    pub fn recv_response_header(
        &mut self,
        deadline: Deadline,
        retry_once: bool,
    ) -> Result<([u8; PACKET_LEN], ResponseHeader)> {
        let mut pkt = [0u8; PACKET_LEN];
        if let Err(first) = self.recv_packet_soft(&mut pkt, deadline) {
            let retryable = retry_once && matches!(first, DeviceError::DeadlineExceeded);
            if !retryable {
                return Err(self.fatal(first));
            }
            debug!("header read timed out after endpoint reset, retrying once");
            if let Err(second) = self.recv_packet_soft(&mut pkt, deadline) {
                return Err(self.fatal(second));
            }
        }

        match parse_response_header(&pkt) {
            Ok(header) => Ok((pkt, header)),
            Err(e) => Err(self.fatal(DeviceError::fatal(e.to_string()))),
        }
    }

    // Receive without latching, so the caller decides whether a timeout is
    // retryable.
    fn recv_packet_soft(&mut self, buf: &mut [u8; PACKET_LEN], deadline: Deadline) -> Result<()> {
        self.guard()?;
        if deadline.expired() {
            return Err(DeviceError::DeadlineExceeded);
        }
        self.transport
            .recv_exact(buf, deadline.bound(SAFE_TIMEOUT))
    }

    /// Receive `len` payload bytes that arrive padded to whole packets,
    /// returning only the payload.
    pub fn recv_data(&mut self, len: usize, deadline: Deadline) -> Result<Vec<u8>> {
        let padded = snimux_fxpak_protocol::padded_len(len);
        let mut data = vec![0u8; padded];
        let mut pkt = [0u8; PACKET_LEN];
        for chunk in data.chunks_mut(PACKET_LEN) {
            self.recv_packet(&mut pkt, deadline)?;
            chunk.copy_from_slice(&pkt);
        }
        data.truncate(len);
        Ok(data)
    }
}
