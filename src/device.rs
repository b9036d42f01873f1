//! Individual Tuya device communication.
//! Issues requests and correlates the replies that come back on the socket.

use crate::error::{Result, TuyaError};
use crate::payload::Reply;
use crate::protocol::{CommandType, Version};
use crate::session::Session;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_PORT: u16 = 6668;
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_VERSION: &str = "3.3";

/// DP toggled by [`Device::set_state`].
pub const DEFAULT_SWITCH_INDEX: u32 = 1;

/// Returned by some firmwares instead of a DP_QUERY status.
pub const DATA_UNVALID: &str = "json obj data unvalid";

/// Retry rounds after the first status request.
const MAX_STATUS_RETRIES: u32 = 3;
/// Reads per receive batch on the first status round.
const FIRST_ROUND_READS: usize = 1;
/// Reads per receive batch on status retries and controls.
const RETRY_READS: usize = 2;

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Everything needed to reach one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub address: String,
    /// 16-character local key
    pub local_key: String,
    /// "3.1" or "3.3"
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect, write and per-read timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Builder for [`Device`].
pub struct DeviceBuilder {
    config: DeviceConfig,
}

impl DeviceBuilder {
    pub fn new<I, K>(id: I, local_key: K) -> Self
    where
        I: Into<String>,
        K: Into<String>,
    {
        Self {
            config: DeviceConfig {
                id: id.into(),
                address: String::new(),
                local_key: local_key.into(),
                version: default_version(),
                port: DEFAULT_PORT,
                timeout_ms: DEFAULT_TIMEOUT_MS,
            },
        }
    }

    pub fn address<A: Into<String>>(mut self, address: A) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn version<V: Into<String>>(mut self, version: V) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> Device {
        Device::from_config(self.config)
    }
}

/// Represents a Tuya device and handles communication.
///
/// Clones share one session; operations on it are serialized.
#[derive(Clone)]
pub struct Device {
    config: Arc<DeviceConfig>,
    session: Arc<Mutex<Session>>,
}

impl Device {
    // -------------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------------

    /// Initialize device with ID, address, local key, and protocol version.
    ///
    /// No connection is made until the first request.
    pub fn new<I, A, K, V>(id: I, address: A, local_key: K, version: V) -> Self
    where
        I: Into<String>,
        A: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        DeviceBuilder::new(id, local_key)
            .address(address)
            .version(version)
            .build()
    }

    pub fn from_config(config: DeviceConfig) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The configured protocol version, if it is a supported one.
    pub fn version(&self) -> Result<Version> {
        self.config.version.parse()
    }

    /// False until connected, and after any read timed out.
    pub async fn is_available(&self) -> bool {
        self.session.lock().await.is_available()
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_connected()
    }

    /// The command this device answers status queries with.
    pub async fn status_command(&self) -> CommandType {
        self.session.lock().await.status_command()
    }

    /// Connects now instead of on the first request.
    pub async fn connect(&self) -> Result<()> {
        self.session.lock().await.connect(&self.config).await
    }

    /// Closes the connection. The next request reconnects.
    pub async fn close(&self) {
        info!("Closing connection to device {}", self.config.id);
        self.session.lock().await.close();
    }
}

// -------------------------------------------------------------------------
// Device Control API
// -------------------------------------------------------------------------
impl Device {
    /// Queries the current status of the device.
    ///
    /// Returns the decoded status object, or an empty object if the device
    /// never produced one.
    pub async fn status(&self) -> Result<Value> {
        let (reply, _) = self.status_replies().await?;
        decode_status(reply)
    }

    /// Queries the status and returns the reply used (if any) along with
    /// every reply received while waiting for it.
    pub async fn status_replies(&self) -> Result<(Option<Reply>, Vec<Reply>)> {
        let mut session = self.session.lock().await;
        self.query_status(&mut session)
            .await
            .inspect_err(|e| warn!("Status query for {} failed: {} ({})", self.id(), e, e.code()))
    }

    /// Sets multiple Data Points (DPs) on the device.
    ///
    /// # Arguments
    /// * `dps` - A JSON object containing DP IDs and their target values.
    ///
    /// Returns the status the device reports afterwards, or an empty object.
    pub async fn set_dps(&self, dps: Value) -> Result<Value> {
        let Value::Object(dps) = dps else {
            return Err(TuyaError::InvalidPayload);
        };
        self.set_values(dps).await
    }

    /// Sets DPs from any index/value pairs; indices are sent as strings.
    pub async fn set_values<K, I>(&self, dps: I) -> Result<Value>
    where
        K: ToString,
        I: IntoIterator<Item = (K, Value)>,
    {
        let dps: Map<String, Value> = dps.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let mut session = self.session.lock().await;
        let (reply, _) = self
            .mutate_state(&mut session, dps)
            .await
            .inspect_err(|e| warn!("Control of {} failed: {} ({})", self.id(), e, e.code()))?;
        decode_status(reply)
    }

    /// Sets a single Data Point (DP) value on the device.
    ///
    /// # Arguments
    /// * `index` - The ID of the Data Point (e.g., 1 for power).
    /// * `value` - The new value (e.g., `json!(true)`).
    pub async fn set_value<V: Into<Value>>(&self, index: u32, value: V) -> Result<Value> {
        let value: Value = value.into();
        self.set_values([(index, value)]).await
    }

    /// Switches DP 1 on or off.
    pub async fn set_state(&self, value: bool) -> Result<Value> {
        self.set_state_at(DEFAULT_SWITCH_INDEX, value).await
    }

    /// Switches a boolean DP on or off.
    pub async fn set_state_at(&self, index: u32, value: bool) -> Result<Value> {
        self.set_value(index, value).await
    }

    /// Sends a heartbeat and reports whether the device answered it.
    pub async fn heartbeat(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        let seqno = session
            .send(&self.config, CommandType::HeartBeat, None)
            .await?;
        let replies = self
            .exchange(&mut session, CommandType::HeartBeat, seqno, FIRST_ROUND_READS, false)
            .await?;
        Ok(select_command_reply(&replies, CommandType::HeartBeat, seqno).is_some())
    }
}

// -------------------------------------------------------------------------
// Request / reply correlation
// -------------------------------------------------------------------------
impl Device {
    /// Sends the preferred status command and waits for a status, retrying
    /// up to [`MAX_STATUS_RETRIES`] times while the device stays reachable.
    ///
    /// A DP_QUERY answered with [`DATA_UNVALID`] permanently switches this
    /// session to CONTROL_NEW.
    async fn query_status(&self, session: &mut Session) -> Result<(Option<Reply>, Vec<Reply>)> {
        let mut all_replies = Vec::new();
        let mut reads = FIRST_ROUND_READS;

        for round in 0..=MAX_STATUS_RETRIES {
            let cmd = session.status_command();
            let seqno = session.send(&self.config, cmd, None).await?;
            let replies = self
                .exchange(session, cmd, seqno, reads, cmd == CommandType::ControlNew)
                .await?;

            let request_reply = select_command_reply(&replies, cmd, seqno);
            let mut status_reply = select_status_reply(&replies);

            // A DP_QUERY is answered with the status itself.
            if cmd == CommandType::DpQuery
                && let Some(reply) = request_reply
                && reply.data.as_deref().is_some_and(|d| d != DATA_UNVALID)
            {
                status_reply = Some(reply);
            }

            let status = status_reply.cloned();
            let unvalid = request_reply.is_some_and(|r| r.data.as_deref() == Some(DATA_UNVALID));
            all_replies.extend(replies);

            if status.is_some() {
                return Ok((status, all_replies));
            }
            if round == MAX_STATUS_RETRIES || !session.is_available() {
                break;
            }

            if unvalid && cmd != CommandType::ControlNew {
                warn!(
                    "Device {} does not answer {}, using {} for status from now on",
                    self.config.id,
                    cmd,
                    CommandType::ControlNew
                );
                session.set_status_command(CommandType::ControlNew);
            }
            debug!("No status from {} yet, retry {}", self.config.id, round + 1);
            reads = RETRY_READS;
        }

        Ok((None, all_replies))
    }

    /// Sends a CONTROL and waits for its acknowledgement and the resulting status.
    async fn mutate_state(
        &self,
        session: &mut Session,
        dps: Map<String, Value>,
    ) -> Result<(Option<Reply>, Vec<Reply>)> {
        let seqno = session
            .send(&self.config, CommandType::Control, Some(Value::Object(dps)))
            .await?;
        let replies = self
            .exchange(session, CommandType::Control, seqno, RETRY_READS, true)
            .await?;
        Ok((select_status_reply(&replies).cloned(), replies))
    }

    /// Receives batches until the request is answered (and, if `need_status`,
    /// a status arrived) or a batch brings nothing new.
    async fn exchange(
        &self,
        session: &mut Session,
        cmd: CommandType,
        seqno: u32,
        reads: usize,
        need_status: bool,
    ) -> Result<Vec<Reply>> {
        let mut replies = Vec::new();
        loop {
            let batch: Vec<Reply> = session
                .receive_batch(&self.config, reads)
                .try_collect()
                .await?;
            let received = !batch.is_empty();
            replies.extend(batch);

            let answered = select_command_reply(&replies, cmd, seqno).is_some();
            let has_status = select_status_reply(&replies).is_some();
            if !received || (answered && (!need_status || has_status)) {
                return Ok(replies);
            }
        }
    }
}

/// First reply to `cmd` with sequence number `seqno`.
fn select_command_reply(replies: &[Reply], cmd: CommandType, seqno: u32) -> Option<&Reply> {
    let mut matching = replies
        .iter()
        .filter(|r| r.cmd == cmd.code() && r.seqno == seqno);
    let first = matching.next();
    let extra = matching.count();
    if extra > 0 {
        info!(
            "Got {} replies for request [{}] seq {}, using the first",
            extra + 1,
            cmd,
            seqno
        );
    }
    first
}

/// First STATUS reply carrying data.
fn select_status_reply(replies: &[Reply]) -> Option<&Reply> {
    replies
        .iter()
        .find(|r| r.cmd == CommandType::Status.code() && r.data.is_some())
}

fn decode_status(reply: Option<Reply>) -> Result<Value> {
    match reply.and_then(|r| r.data) {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(Value::Object(Map::new())),
    }
}
