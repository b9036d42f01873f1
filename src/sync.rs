//! Blocking wrappers around the async API.
//!
//! Every call blocks the current thread on the shared [`crate::runtime`].
//! Do not call these from inside an async context.

use crate::device::{self, DeviceConfig};
use crate::error::Result;
use crate::payload::Reply;
use crate::protocol::CommandType;
use crate::runtime;
use serde_json::Value;

/// Blocking handle to a Tuya device.
#[derive(Clone)]
pub struct Device {
    inner: device::Device,
}

impl Device {
    pub fn new<I, A, K, V>(id: I, address: A, local_key: K, version: V) -> Self
    where
        I: Into<String>,
        A: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        device::Device::new(id, address, local_key, version).into()
    }

    pub fn from_config(config: DeviceConfig) -> Self {
        device::Device::from_config(config).into()
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// The underlying async handle; both share one session.
    pub fn as_async(&self) -> &device::Device {
        &self.inner
    }

    pub fn status(&self) -> Result<Value> {
        runtime::get().block_on(self.inner.status())
    }

    pub fn status_replies(&self) -> Result<(Option<Reply>, Vec<Reply>)> {
        runtime::get().block_on(self.inner.status_replies())
    }

    pub fn set_dps(&self, dps: Value) -> Result<Value> {
        runtime::get().block_on(self.inner.set_dps(dps))
    }

    pub fn set_value<V: Into<Value>>(&self, index: u32, value: V) -> Result<Value> {
        runtime::get().block_on(self.inner.set_value(index, value))
    }

    pub fn set_state(&self, value: bool) -> Result<Value> {
        runtime::get().block_on(self.inner.set_state(value))
    }

    pub fn set_state_at(&self, index: u32, value: bool) -> Result<Value> {
        runtime::get().block_on(self.inner.set_state_at(index, value))
    }

    pub fn heartbeat(&self) -> Result<bool> {
        runtime::get().block_on(self.inner.heartbeat())
    }

    pub fn is_available(&self) -> bool {
        runtime::get().block_on(self.inner.is_available())
    }

    pub fn status_command(&self) -> CommandType {
        runtime::get().block_on(self.inner.status_command())
    }

    pub fn close(&self) {
        runtime::get().block_on(self.inner.close())
    }
}

impl From<device::Device> for Device {
    fn from(inner: device::Device) -> Self {
        Self { inner }
    }
}
