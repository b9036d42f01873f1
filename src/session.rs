//! Per-device connection state: socket, sequence counter, availability and
//! the learned status command.
//!
//! A session is owned by exactly one call stack at a time; [`crate::Device`]
//! keeps it behind an async mutex held for a whole request/reply exchange.

use crate::device::DeviceConfig;
use crate::error::{Result, TuyaError};
use crate::payload::{PayloadCodec, Reply, generate_json};
use crate::protocol::{CommandType, TuyaMessage, pack_message};
use futures_core::Stream;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest chunk taken from the socket per read.
pub const RECV_BUFFER_SIZE: usize = 4096;

pub(crate) struct Session {
    stream: Option<TcpStream>,
    seqno: u32,
    available: bool,
    status_cmd: CommandType,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            stream: None,
            seqno: 0,
            available: false,
            status_cmd: CommandType::DpQuery,
        }
    }
}

impl Session {
    pub(crate) fn is_available(&self) -> bool {
        self.available
    }

    pub(crate) fn status_command(&self) -> CommandType {
        self.status_cmd
    }

    pub(crate) fn set_status_command(&mut self, cmd: CommandType) {
        self.status_cmd = cmd;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Drops the socket. The next send reconnects.
    pub(crate) fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Socket closed");
        }
        self.available = false;
    }

    pub(crate) async fn connect(&mut self, config: &DeviceConfig) -> Result<()> {
        self.close();

        info!(
            "Connecting to device {} at {}:{}",
            config.id, config.address, config.port
        );
        let stream = timeout(
            config.timeout(),
            TcpStream::connect((config.address.as_str(), config.port)),
        )
        .await
        .map_err(|_| TuyaError::Timeout)
        .and_then(|res| {
            res.map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => TuyaError::ConnectionFailed,
                _ => TuyaError::Io(e.to_string()),
            })
        })
        .inspect_err(|e| warn!("Failed to connect to {}: {}", config.address, e))?;

        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.available = true;
        Ok(())
    }

    fn next_seqno(&mut self) -> u32 {
        let seqno = self.seqno;
        self.seqno = self.seqno.wrapping_add(1);
        seqno
    }

    /// Sends `command` and returns the sequence number it was tagged with.
    pub(crate) async fn send(
        &mut self,
        config: &DeviceConfig,
        command: CommandType,
        data: Option<Value>,
    ) -> Result<u32> {
        let codec = PayloadCodec::new(&config.version, config.local_key.as_bytes())?;
        if self.stream.is_none() {
            self.connect(config).await?;
        }

        let seqno = self.next_seqno();
        debug!(
            "Sending command {} (seq {}) payload: {:?}",
            command, seqno, data
        );

        let json = serde_json::to_vec(&generate_json(&config.id, command, data))?;
        let packed = pack_message(&TuyaMessage {
            seqno,
            cmd: command.code(),
            payload: codec.encode(command, &json)?,
        })?;

        let stream = self.stream.as_mut().ok_or(TuyaError::Offline)?;
        timeout(config.timeout(), stream.write_all(&packed))
            .await
            .map_err(|_| TuyaError::Timeout)??;

        Ok(seqno)
    }

    /// Reads up to `max_attempts` chunks from the socket, yielding the replies
    /// in each as soon as it is parsed.
    ///
    /// A read timeout marks the device unavailable and ends the batch. Frames
    /// split across two reads are not reassembled.
    pub(crate) fn receive_batch<'a>(
        &'a mut self,
        config: &'a DeviceConfig,
        max_attempts: usize,
    ) -> impl Stream<Item = Result<Reply>> + Send + 'a {
        async_stream::try_stream! {
            let codec = PayloadCodec::new(&config.version, config.local_key.as_bytes())?;
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];

            for attempt in 0..max_attempts {
                let stream = self.stream.as_mut().ok_or(TuyaError::Offline)?;
                let read = timeout(config.timeout(), stream.read(&mut buf)).await;

                let n = match read {
                    Err(_) => {
                        debug!("Read {} of {} timed out for {}", attempt + 1, max_attempts, config.id);
                        self.available = false;
                        break;
                    }
                    Ok(res) => res?,
                };
                if n == 0 {
                    debug!("Device {} closed its side of the connection", config.id);
                }

                for reply in codec.decode_replies(&buf[..n]) {
                    debug!(
                        "Received msg (seq {}): [{:x}] rc={:?} '{}'",
                        reply.seqno,
                        reply.cmd,
                        reply.retcode,
                        reply.data.as_deref().unwrap_or_default()
                    );
                    yield reply;
                }
            }
        }
    }
}
