//! Tuya wire protocol implementation.
//! Handles 55AA packet framing, buffer splitting, and CRC verification.
//!
//! Frame layout (big-endian):
//!
//! ```text
//! prefix(4) | seqno(4) | cmd(4) | length(4) | body(length - 8) | crc32(4) | suffix(4)
//! ```

use crate::error::{Result, TuyaError};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use crc::{CRC_32_ISO_HDLC, Crc};
use log::debug;

pub const PREFIX_55AA: u32 = 0x000055AA;
pub const SUFFIX_55AA: u32 = 0x0000AA55;

const PREFIX_BYTES: [u8; 4] = PREFIX_55AA.to_be_bytes();
const SUFFIX_BYTES: [u8; 4] = SUFFIX_55AA.to_be_bytes();

/// prefix + seqno + cmd + length
pub const HEADER_LEN: usize = 16;
/// crc + suffix
pub const FOOTER_LEN: usize = 8;
/// Shortest span accepted as a frame: header, a 4-byte return code, footer.
pub const MIN_FRAME_LEN: usize = 28;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

define_command_type! {
    ApConfig = 0x01,
    Active = 0x02,
    SessKeyNegStart = 0x03,
    SessKeyNegResp = 0x04,
    SessKeyNegFinish = 0x05,
    Unbind = 0x06,
    Control = 0x07,
    Status = 0x08,
    HeartBeat = 0x09,
    DpQuery = 0x0a,
    QueryWifi = 0x0b,
    TokenBind = 0x0c,
    ControlNew = 0x0d,
    EnableWifi = 0x0e,
    WifiInfo = 0x0f,
    DpQueryNew = 0x10,
    SceneExecute = 0x11,
    UpdateDps = 0x12,
    UdpNew = 0x13,
    ApConfigNew = 0x14,
}

define_version! {
    V3_1 = "3.1",
    V3_3 = "3.3",
}

/// Outgoing message, before framing.
#[derive(Debug, Clone)]
pub struct TuyaMessage {
    /// Sequence number
    pub seqno: u32,
    /// Command code
    pub cmd: u32,
    /// Encoded body (see [`crate::payload::PayloadCodec::encode`])
    pub payload: Vec<u8>,
}

/// Body of a received frame.
///
/// Devices put a 4-byte return code in front of most replies, but not all of
/// them; the leading word is only taken as a return code when it is small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    WithReturnCode { retcode: u32, payload: Vec<u8> },
    PayloadOnly(Vec<u8>),
}

impl FrameBody {
    /// Classifies the bytes between header and footer.
    pub fn from_bytes(body: &[u8]) -> Self {
        match body.get(..4).map(BigEndian::read_u32) {
            Some(word) if word & 0xFFFF_FF00 == 0 => FrameBody::WithReturnCode {
                retcode: word,
                payload: body[4..].to_vec(),
            },
            _ => FrameBody::PayloadOnly(body.to_vec()),
        }
    }

    pub fn retcode(&self) -> Option<u32> {
        match self {
            FrameBody::WithReturnCode { retcode, .. } => Some(*retcode),
            FrameBody::PayloadOnly(_) => None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            FrameBody::WithReturnCode { payload, .. } => payload,
            FrameBody::PayloadOnly(payload) => payload,
        }
    }
}

/// A validated frame received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuyaFrame {
    pub seqno: u32,
    pub cmd: u32,
    /// Declared length field (body + crc + suffix)
    pub length: u32,
    pub body: FrameBody,
}

/// Pack a TuyaMessage into a 55AA frame.
pub fn pack_message(msg: &TuyaMessage) -> Result<Vec<u8>> {
    let length = msg.payload.len() + FOOTER_LEN;
    let mut data = Vec::with_capacity(HEADER_LEN + length);

    data.write_u32::<BigEndian>(PREFIX_55AA)?;
    data.write_u32::<BigEndian>(msg.seqno)?;
    data.write_u32::<BigEndian>(msg.cmd)?;
    data.write_u32::<BigEndian>(length as u32)?;
    data.extend_from_slice(&msg.payload);

    let crc_val = CRC32.checksum(&data);
    data.write_u32::<BigEndian>(crc_val)?;
    data.write_u32::<BigEndian>(SUFFIX_55AA)?;

    Ok(data)
}

/// Splits a receive buffer at every prefix magic.
///
/// Each span runs up to the next prefix (or the end of the buffer); bytes
/// before the first prefix are ignored.
pub fn split_frames(data: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    let starts: Vec<usize> = data
        .windows(PREFIX_BYTES.len())
        .enumerate()
        .filter(|(_, w)| *w == PREFIX_BYTES)
        .map(|(i, _)| i)
        .collect();

    let ends: Vec<usize> = starts
        .iter()
        .skip(1)
        .copied()
        .chain(std::iter::once(data.len()))
        .collect();

    starts
        .into_iter()
        .zip(ends)
        .map(move |(start, end)| &data[start..end])
}

/// Unpack a single span produced by [`split_frames`].
pub fn unpack_frame(span: &[u8]) -> Result<TuyaFrame> {
    if span.len() < MIN_FRAME_LEN {
        return Err(TuyaError::DecodeError(format!(
            "Frame too short ({} bytes)",
            span.len()
        )));
    }
    if span[..4] != PREFIX_BYTES || span[span.len() - 4..] != SUFFIX_BYTES {
        return Err(TuyaError::InvalidHeader);
    }

    let checked = &span[..span.len() - FOOTER_LEN];
    let recv_crc = BigEndian::read_u32(&span[span.len() - FOOTER_LEN..]);
    if CRC32.checksum(checked) != recv_crc {
        return Err(TuyaError::CrcMismatch);
    }

    Ok(TuyaFrame {
        seqno: BigEndian::read_u32(&span[4..8]),
        cmd: BigEndian::read_u32(&span[8..12]),
        length: BigEndian::read_u32(&span[12..16]),
        body: FrameBody::from_bytes(&checked[HEADER_LEN..]),
    })
}

/// Every valid frame in a receive buffer, in wire order. Corrupt spans are skipped.
pub fn unpack_frames(data: &[u8]) -> impl Iterator<Item = TuyaFrame> + '_ {
    split_frames(data).filter_map(|span| match unpack_frame(span) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!("Discarding frame ({} bytes): {}", span.len(), e);
            None
        }
    })
}
