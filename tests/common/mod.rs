//! Scripted in-process Tuya device listening on loopback.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tuyaface::crypto::TuyaCipher;
use tuyaface::protocol::{CommandType, FrameBody, TuyaFrame, TuyaMessage, pack_message, unpack_frames};
use tuyaface::{Device, DeviceBuilder};

pub const DEVICE_ID: &str = "bf0123456789abcdefgh";
pub const LOCAL_KEY: &str = "0123456789abcdef";

/// What the fake device does with one request.
pub enum Action {
    /// Write these bytes back.
    Reply(Vec<u8>),
    /// Write these bytes, then close the write side of the socket.
    ReplyAndShutdown(Vec<u8>),
    /// Stay silent.
    Ignore,
}

/// A received request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub seqno: u32,
    pub cmd: u32,
}

pub struct FakeDevice {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<TuyaFrame>>>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    /// Accepts a single connection and answers each request frame with `respond`.
    pub async fn spawn<F>(mut respond: F) -> Self
    where
        F: FnMut(&TuyaFrame) -> Action + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut shut = false;
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for frame in unpack_frames(&buf[..n]) {
                    seen.lock().unwrap().push(frame.clone());
                    if shut {
                        continue;
                    }
                    match respond(&frame) {
                        Action::Reply(bytes) => {
                            let _ = socket.write_all(&bytes).await;
                        }
                        Action::ReplyAndShutdown(bytes) => {
                            let _ = socket.write_all(&bytes).await;
                            let _ = socket.shutdown().await;
                            shut = true;
                        }
                        Action::Ignore => {}
                    }
                }
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    /// Waits for the client to hang up and returns every request received.
    pub async fn finish(self) -> Vec<Request> {
        let FakeDevice { requests, task, .. } = self;
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        headers(&requests.lock().unwrap())
    }

    pub fn requests(&self) -> Vec<Request> {
        headers(&self.requests.lock().unwrap())
    }

    pub fn frames(&self) -> Vec<TuyaFrame> {
        self.requests.lock().unwrap().clone()
    }

    pub fn device(&self, version: &str) -> Device {
        DeviceBuilder::new(DEVICE_ID, LOCAL_KEY)
            .address(self.addr.ip().to_string())
            .port(self.addr.port())
            .version(version)
            .timeout(Duration::from_millis(300))
            .build()
    }
}

fn headers(frames: &[TuyaFrame]) -> Vec<Request> {
    frames
        .iter()
        .map(|f| Request {
            seqno: f.seqno,
            cmd: f.cmd,
        })
        .collect()
}

pub fn cipher() -> TuyaCipher {
    TuyaCipher::new(LOCAL_KEY.as_bytes()).unwrap()
}

pub fn frame(seqno: u32, cmd: CommandType, body: Vec<u8>) -> Vec<u8> {
    pack_message(&TuyaMessage {
        seqno,
        cmd: cmd.code(),
        payload: body,
    })
    .unwrap()
}

/// v3.3 reply: return code 0 followed by the raw ciphertext of `json`.
pub fn reply_v33(seqno: u32, cmd: CommandType, json: &str) -> Vec<u8> {
    let mut body = vec![0, 0, 0, 0];
    body.extend(cipher().encrypt(json.as_bytes(), false).unwrap());
    frame(seqno, cmd, body)
}

/// v3.3 acknowledgement without payload.
pub fn ack(seqno: u32, cmd: CommandType) -> Vec<u8> {
    frame(seqno, cmd, vec![0, 0, 0, 0])
}

/// v3.3 STATUS push: version header, then ciphertext.
pub fn status_push_v33(json: &str) -> Vec<u8> {
    let mut body = b"3.3".to_vec();
    body.extend([0u8; 12]);
    body.extend(cipher().encrypt(json.as_bytes(), false).unwrap());
    frame(0, CommandType::Status, body)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The body bytes exactly as sent, whatever variant they were parsed into.
pub fn raw_body(frame: &TuyaFrame) -> Vec<u8> {
    match &frame.body {
        FrameBody::WithReturnCode { retcode, payload } => {
            let mut body = retcode.to_be_bytes().to_vec();
            body.extend_from_slice(payload);
            body
        }
        FrameBody::PayloadOnly(payload) => payload.clone(),
    }
}
