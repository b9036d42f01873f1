//! Version-specific payload encoding and decoding.
//!
//! v3.1 sends plaintext JSON except for `Control`, which is Base64 ciphertext
//! signed with an MD5 tag. v3.3 encrypts everything with raw AES-ECB and puts a
//! 15-byte version header in front of every command but `DpQuery`.

use crate::crypto::TuyaCipher;
use crate::error::Result;
use crate::protocol::{CommandType, FrameBody, TuyaFrame, Version, unpack_frames};
use log::debug;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_DPS: &str = "dps";
const KEY_T: &str = "t";
const KEY_GW_ID: &str = "gwId";
const KEY_DEV_ID: &str = "devId";
const KEY_UID: &str = "uid";

/// "3.3" followed by 12 zero bytes.
pub const VERSION_HEADER_LEN: usize = 15;
/// Hex characters of the MD5 digest kept as the v3.1 signature.
pub const SIGNATURE_LEN: usize = 16;
/// Bytes in front of the ciphertext of a v3.3 `Status` push.
const STATUS_PREAMBLE_LEN: usize = 15;
/// Declared length of a v3.3 frame carrying no payload (return code + crc + suffix).
const EMPTY_BODY_LEN: u32 = 12;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub seqno: u32,
    pub cmd: u32,
    pub retcode: Option<u32>,
    /// Decrypted text, if the frame carried a usable payload.
    pub data: Option<String>,
}

impl Reply {
    pub fn command(&self) -> Option<CommandType> {
        CommandType::from_u32(self.cmd)
    }
}

/// Builds the JSON object sent with `command`, stamped with the current time.
pub fn generate_json(device_id: &str, command: CommandType, data: Option<Value>) -> Value {
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    generate_json_at(device_id, command, data, t)
}

/// Builds the JSON object sent with `command` using timestamp `t`.
///
/// `CommandType::ControlNew` without data probes DPs 1-3. Commands with no
/// known skeleton start from an empty object.
pub fn generate_json_at(
    device_id: &str,
    command: CommandType,
    data: Option<Value>,
    t: u64,
) -> Value {
    let keys: &[&str] = match command {
        CommandType::Control | CommandType::ControlNew | CommandType::DpQueryNew => {
            &[KEY_DEV_ID, KEY_UID, KEY_T]
        }
        CommandType::Status => &[KEY_GW_ID, KEY_DEV_ID],
        CommandType::DpQuery => &[KEY_GW_ID, KEY_DEV_ID, KEY_UID, KEY_T],
        _ => &[],
    };

    let mut payload = Map::new();
    for key in keys {
        let value = match *key {
            KEY_T => Value::String(t.to_string()),
            _ => Value::String(device_id.to_string()),
        };
        payload.insert((*key).to_string(), value);
    }

    match data {
        Some(d) => {
            payload.insert(KEY_DPS.into(), d);
        }
        None if command == CommandType::ControlNew => {
            payload.insert(
                KEY_DPS.into(),
                serde_json::json!({"1": null, "2": null, "3": null}),
            );
        }
        None => {}
    }

    Value::Object(payload)
}

/// The v3.1 integrity tag: hex digits 8..24 of
/// `md5("data=" + ciphertext + "||lpv=3.1||" + key)`.
pub fn signature_v31(ciphertext: &[u8], key: &[u8]) -> String {
    let mut md5 = Md5::new();
    md5.update(b"data=");
    md5.update(ciphertext);
    md5.update(b"||lpv=3.1||");
    md5.update(key);
    let digest = hex::encode(md5.finalize());
    digest[8..8 + SIGNATURE_LEN].to_string()
}

/// Encodes and decodes frame bodies for one device.
#[derive(Clone)]
pub struct PayloadCodec {
    version: Version,
    cipher: TuyaCipher,
}

impl PayloadCodec {
    /// Fails on a version other than "3.1"/"3.3" or a key that is not 16 bytes.
    pub fn new(version: &str, local_key: &[u8]) -> Result<Self> {
        Ok(Self {
            version: version.parse()?,
            cipher: TuyaCipher::new(local_key)?,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Builds the frame body for `command` from serialized JSON.
    pub fn encode(&self, command: CommandType, json: &[u8]) -> Result<Vec<u8>> {
        match self.version {
            Version::V3_1 => {
                if command != CommandType::Control {
                    return Ok(json.to_vec());
                }
                let ciphertext = self.cipher.encrypt(json, true)?;
                let signature = signature_v31(&ciphertext, self.cipher.key());

                let mut body = Vec::with_capacity(3 + SIGNATURE_LEN + ciphertext.len());
                body.extend_from_slice(Version::V3_1.as_bytes());
                body.extend_from_slice(signature.as_bytes());
                body.extend_from_slice(&ciphertext);
                Ok(body)
            }
            Version::V3_3 => {
                let ciphertext = self.cipher.encrypt(json, false)?;
                if command == CommandType::DpQuery {
                    return Ok(ciphertext);
                }
                let mut body = Vec::with_capacity(VERSION_HEADER_LEN + ciphertext.len());
                body.extend_from_slice(Version::V3_3.as_bytes());
                body.extend_from_slice(&[0u8; VERSION_HEADER_LEN - 3]);
                body.extend_from_slice(&ciphertext);
                Ok(body)
            }
        }
    }

    /// Extracts the text carried by a frame, or `None` if there is none.
    pub fn decode(&self, body: &FrameBody, cmd: u32, length: u32) -> Option<String> {
        let payload = body.payload();
        match self.version {
            Version::V3_1 => {
                if payload.first() == Some(&b'{') {
                    return Some(String::from_utf8_lossy(payload).into_owned());
                }
                if payload.starts_with(Version::V3_1.as_bytes()) {
                    debug!("Received encrypted v3.1 reply");
                    let ciphertext = payload.get(3 + SIGNATURE_LEN..)?;
                    return self.decrypt_text(ciphertext, true);
                }
                None
            }
            Version::V3_3 => {
                if length <= EMPTY_BODY_LEN {
                    return None;
                }
                let ciphertext = if cmd == CommandType::Status.code() {
                    payload.get(STATUS_PREAMBLE_LEN..)?
                } else {
                    payload
                };
                self.decrypt_text(ciphertext, false)
            }
        }
    }

    fn decrypt_text(&self, ciphertext: &[u8], use_base64: bool) -> Option<String> {
        match self.cipher.decrypt(ciphertext, use_base64) {
            Ok(plain) => Some(String::from_utf8_lossy(&plain).into_owned()),
            Err(e) => {
                debug!("Payload ({} bytes) not decrypted: {}", ciphertext.len(), e);
                None
            }
        }
    }

    pub fn decode_frame(&self, frame: &TuyaFrame) -> Reply {
        Reply {
            seqno: frame.seqno,
            cmd: frame.cmd,
            retcode: frame.body.retcode(),
            data: self.decode(&frame.body, frame.cmd, frame.length),
        }
    }

    /// Every reply in a raw receive buffer, in wire order.
    pub fn decode_replies<'a>(&'a self, data: &'a [u8]) -> impl Iterator<Item = Reply> + 'a {
        unpack_frames(data).map(move |frame| self.decode_frame(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TuyaError;
    use crate::protocol::{TuyaMessage, pack_message};
    use serde_json::json;

    const KEY: &[u8] = b"0123456789abcdef";

    fn frame(seqno: u32, cmd: CommandType, body: &[u8]) -> Vec<u8> {
        pack_message(&TuyaMessage {
            seqno,
            cmd: cmd.code(),
            payload: body.to_vec(),
        })
        .unwrap()
    }

    #[test]
    fn json_skeletons_per_command() {
        let q = generate_json_at("dev1", CommandType::DpQuery, None, 1700000000);
        assert_eq!(
            q,
            json!({"gwId": "dev1", "devId": "dev1", "uid": "dev1", "t": "1700000000"})
        );
        assert_eq!(
            serde_json::to_string(&q).unwrap(),
            r#"{"gwId":"dev1","devId":"dev1","uid":"dev1","t":"1700000000"}"#
        );

        let c = generate_json_at("dev1", CommandType::Control, Some(json!({"1": true})), 5);
        assert_eq!(
            c,
            json!({"devId": "dev1", "uid": "dev1", "t": "5", "dps": {"1": true}})
        );

        assert_eq!(
            generate_json_at("dev1", CommandType::Status, None, 5),
            json!({"gwId": "dev1", "devId": "dev1"})
        );
        assert_eq!(generate_json_at("dev1", CommandType::HeartBeat, None, 5), json!({}));
        assert_eq!(generate_json_at("dev1", CommandType::Unbind, None, 5), json!({}));
    }

    #[test]
    fn control_new_probes_first_dps() {
        let probe = generate_json_at("d", CommandType::ControlNew, None, 5);
        assert_eq!(probe["dps"], json!({"1": null, "2": null, "3": null}));

        let explicit = generate_json_at("d", CommandType::ControlNew, Some(json!({"4": 1})), 5);
        assert_eq!(explicit["dps"], json!({"4": 1}));
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(matches!(
            PayloadCodec::new("3.2", KEY),
            Err(TuyaError::UnsupportedVersion(v)) if v == "3.2"
        ));
        assert!(PayloadCodec::new("3.3", b"too short").is_err());
    }

    #[test]
    fn v31_control_is_signed_base64() {
        let codec = PayloadCodec::new("3.1", KEY).unwrap();
        let json = br#"{"devId":"d","uid":"d","t":"5","dps":{"1":true}}"#;

        let body = codec.encode(CommandType::Control, json).unwrap();
        assert_eq!(&body[..3], b"3.1");

        let signature = std::str::from_utf8(&body[3..3 + SIGNATURE_LEN]).unwrap();
        let ciphertext = &body[3 + SIGNATURE_LEN..];
        assert_eq!(signature, signature_v31(ciphertext, KEY));
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        let cipher = TuyaCipher::new(KEY).unwrap();
        assert_eq!(cipher.decrypt(ciphertext, true).unwrap(), json);

        // Same plaintext, same key: identical body.
        assert_eq!(codec.encode(CommandType::Control, json).unwrap(), body);
    }

    #[test]
    fn v31_signature_is_md5_slice() {
        let expected = hex::encode(Md5::digest(b"data=abc||lpv=3.1||0123456789abcdef"));
        assert_eq!(signature_v31(b"abc", KEY), expected[8..24]);
    }

    #[test]
    fn v31_queries_are_plaintext() {
        let codec = PayloadCodec::new("3.1", KEY).unwrap();
        let json = br#"{"gwId":"d"}"#;
        assert_eq!(codec.encode(CommandType::DpQuery, json).unwrap(), json);
        assert_eq!(codec.encode(CommandType::Status, json).unwrap(), json);
    }

    #[test]
    fn v33_header_on_all_but_dp_query() {
        let codec = PayloadCodec::new("3.3", KEY).unwrap();
        let cipher = TuyaCipher::new(KEY).unwrap();
        let json = br#"{"devId":"d"}"#;

        let query = codec.encode(CommandType::DpQuery, json).unwrap();
        assert_eq!(query, cipher.encrypt(json, false).unwrap());

        let control = codec.encode(CommandType::Control, json).unwrap();
        assert_eq!(&control[..3], b"3.3");
        assert_eq!(&control[3..VERSION_HEADER_LEN], &[0u8; 12]);
        assert_eq!(cipher.decrypt(&control[VERSION_HEADER_LEN..], false).unwrap(), json);

        let control_new = codec.encode(CommandType::ControlNew, json).unwrap();
        assert_eq!(&control_new[..3], b"3.3");
    }

    #[test]
    fn v33_decode_respects_length_guard() {
        let codec = PayloadCodec::new("3.3", KEY).unwrap();
        let cipher = TuyaCipher::new(KEY).unwrap();

        // Acknowledgement: return code only, declared length 12.
        let ack = frame(1, CommandType::Control, &[0, 0, 0, 0]);
        let replies: Vec<_> = codec.decode_replies(&ack).collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].retcode, Some(0));
        assert_eq!(replies[0].data, None);

        let mut body = vec![0, 0, 0, 0];
        body.extend(cipher.encrypt(br#"{"dps":{"1":true}}"#, false).unwrap());
        let reply = frame(1, CommandType::DpQuery, &body);
        let replies: Vec<_> = codec.decode_replies(&reply).collect();
        assert_eq!(replies[0].data.as_deref(), Some(r#"{"dps":{"1":true}}"#));
        assert_eq!(replies[0].command(), Some(CommandType::DpQuery));

        let body = FrameBody::PayloadOnly(cipher.encrypt(b"x", false).unwrap());
        assert_eq!(codec.decode(&body, CommandType::DpQuery.code(), 12), None);
        assert_eq!(
            codec.decode(&body, CommandType::DpQuery.code(), 24).as_deref(),
            Some("x")
        );
    }

    #[test]
    fn v33_status_skips_preamble() {
        let codec = PayloadCodec::new("3.3", KEY).unwrap();
        let cipher = TuyaCipher::new(KEY).unwrap();

        let mut body = b"3.3".to_vec();
        body.extend([0u8; 12]);
        body.extend(cipher.encrypt(br#"{"dps":{"2":5}}"#, false).unwrap());
        let push = frame(0, CommandType::Status, &body);

        let replies: Vec<_> = codec.decode_replies(&push).collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].retcode, None);
        assert_eq!(replies[0].data.as_deref(), Some(r#"{"dps":{"2":5}}"#));
    }

    #[test]
    fn v33_garbage_yields_no_text() {
        let codec = PayloadCodec::new("3.3", KEY).unwrap();
        let body = FrameBody::PayloadOnly(b"definitely not ciphertext".to_vec());
        assert_eq!(codec.decode(&body, CommandType::DpQuery.code(), 40), None);
    }

    #[test]
    fn v31_decodes_plaintext_and_signed_replies() {
        let codec = PayloadCodec::new("3.1", KEY).unwrap();

        let plain = frame(3, CommandType::DpQuery, br#"{"devId":"d","dps":{"1":false}}"#);
        let replies: Vec<_> = codec.decode_replies(&plain).collect();
        assert_eq!(replies[0].retcode, None);
        assert_eq!(
            replies[0].data.as_deref(),
            Some(r#"{"devId":"d","dps":{"1":false}}"#)
        );

        let signed = codec
            .encode(CommandType::Control, br#"{"dps":{"1":true}}"#)
            .unwrap();
        let mut body = vec![0, 0, 0, 0];
        body.extend(signed);
        let replies: Vec<_> = codec
            .decode_replies(&frame(4, CommandType::Status, &body))
            .collect();
        assert_eq!(replies[0].retcode, Some(0));
        assert_eq!(replies[0].data.as_deref(), Some(r#"{"dps":{"1":true}}"#));

        let unknown = frame(5, CommandType::Status, &[0, 0, 0, 0, b'x', b'y']);
        assert_eq!(codec.decode_replies(&unknown).next().unwrap().data, None);
    }

    #[test]
    fn two_frames_in_one_buffer_decode_in_order() {
        let codec = PayloadCodec::new("3.1", KEY).unwrap();
        let mut buf = frame(7, CommandType::Control, &[0, 0, 0, 0]);
        buf.extend(frame(8, CommandType::Status, br#"{"dps":{"1":true}}"#));

        let replies: Vec<_> = codec.decode_replies(&buf).collect();
        assert_eq!(replies.len(), 2);
        assert_eq!((replies[0].seqno, replies[0].cmd), (7, 0x07));
        assert_eq!(replies[0].data, None);
        assert_eq!((replies[1].seqno, replies[1].cmd), (8, 0x08));
        assert!(replies[1].data.is_some());
    }
}
