//! S101 framing layer (GDMP).
//!
//! Byte-stuffed frames delimited by BOF/EOF, protected by CRC-16/CCITT.
//! The deframer is incremental: partial frames survive across `push`
//! calls, and multi-packet EmBER payloads are reassembled using the
//! first/last-packet flags.

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{trace, warn};

pub const BOF: u8 = 0xFE;
pub const EOF: u8 = 0xFF;
pub const CE: u8 = 0xFD;
pub const XOR: u8 = 0x20;
/// Bytes at or above this value must be escaped inside a frame.
const ESCAPE_THRESHOLD: u8 = 0xF8;

const SLOT: u8 = 0x00;
const MSG_EMBER: u8 = 0x0E;
const CMD_EMBER: u8 = 0x00;
const CMD_KEEPALIVE_REQ: u8 = 0x01;
const CMD_KEEPALIVE_RESP: u8 = 0x02;
const VERSION: u8 = 0x01;
const FLAG_FIRST_PACKET: u8 = 0x80;
const FLAG_LAST_PACKET: u8 = 0x40;
const DTD_GLOW: u8 = 0x01;
/// Glow DTD version advertised in the application bytes (2.31).
const APP_BYTES: [u8; 2] = [0x02, 0x1F];

/// CRC residue of a valid frame (content + trailer).
const CRC_RESIDUE: u16 = 0xF0B8;

/// One logical message extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S101Message {
    /// Complete EmBER payload (multi-packet frames already joined).
    Ember(Vec<u8>),
    KeepaliveRequest,
    KeepaliveResponse,
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    crc
}

fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        if b >= ESCAPE_THRESHOLD {
            out.push(CE);
            out.push(b ^ XOR);
        } else {
            out.push(b);
        }
    }
}

fn encode_frame(content: &[u8]) -> Vec<u8> {
    let mut trailer = Vec::with_capacity(2);
    trailer
        .write_u16::<LittleEndian>(!crc16(content))
        .expect("vec write");

    let mut frame = Vec::with_capacity(content.len() + 6);
    frame.push(BOF);
    push_escaped(&mut frame, content);
    push_escaped(&mut frame, &trailer);
    frame.push(EOF);
    frame
}

/// Wrap an EmBER payload in a single S101 frame.
pub fn encode_ember_frame(payload: &[u8]) -> Vec<u8> {
    let mut content = vec![
        SLOT,
        MSG_EMBER,
        CMD_EMBER,
        VERSION,
        FLAG_FIRST_PACKET | FLAG_LAST_PACKET,
        DTD_GLOW,
        APP_BYTES.len() as u8,
    ];
    content.extend_from_slice(&APP_BYTES);
    content.extend_from_slice(payload);
    encode_frame(&content)
}

pub fn encode_keepalive_request() -> Vec<u8> {
    encode_frame(&[SLOT, MSG_EMBER, CMD_KEEPALIVE_REQ, VERSION])
}

pub fn encode_keepalive_response() -> Vec<u8> {
    encode_frame(&[SLOT, MSG_EMBER, CMD_KEEPALIVE_RESP, VERSION])
}

/// Incremental frame extractor.
///
/// Feed it transport chunks as they arrive; it returns every message that
/// became complete. Bytes belonging to an unfinished frame are kept for
/// the next call. Frames with a bad CRC or unknown header are dropped
/// with a warning, never an error.
#[derive(Default)]
pub struct Deframer {
    buf: Vec<u8>,
    /// EmBER payload segments collected since the last first-packet flag.
    partial_payload: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered, not-yet-framed bytes.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<S101Message> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            let Some(bof) = self.buf.iter().position(|&b| b == BOF) else {
                // Nothing before a BOF can start a frame.
                self.buf.clear();
                break;
            };
            if bof > 0 {
                warn!(dropped = bof, "Dropping bytes before frame start");
                self.buf.drain(..bof);
            }
            let Some(eof) = self.buf.iter().position(|&b| b == EOF) else {
                break; // partial frame, wait for more bytes
            };

            let raw: Vec<u8> = self.buf.drain(..=eof).collect();
            match self.decode_frame(&raw[1..raw.len() - 1]) {
                Some(msg) => messages.push(msg),
                None => continue,
            }
        }

        messages
    }

    fn decode_frame(&mut self, escaped: &[u8]) -> Option<S101Message> {
        let mut content = Vec::with_capacity(escaped.len());
        let mut iter = escaped.iter();
        while let Some(&b) = iter.next() {
            if b == CE {
                let &next = iter.next()?;
                content.push(next ^ XOR);
            } else {
                content.push(b);
            }
        }

        if content.len() < 6 {
            warn!(len = content.len(), "Frame too short, dropped");
            return None;
        }
        if crc16(&content) != CRC_RESIDUE {
            warn!("Frame CRC mismatch, dropped");
            return None;
        }
        let content = &content[..content.len() - 2]; // strip CRC trailer

        if content[0] != SLOT || content[1] != MSG_EMBER {
            warn!(slot = content[0], message = content[1], "Unknown frame header, dropped");
            return None;
        }

        match content[2] {
            CMD_KEEPALIVE_REQ => Some(S101Message::KeepaliveRequest),
            CMD_KEEPALIVE_RESP => Some(S101Message::KeepaliveResponse),
            CMD_EMBER => {
                if content.len() < 7 {
                    warn!("EmBER frame missing header fields, dropped");
                    return None;
                }
                let flags = content[4];
                let app_bytes = content[6] as usize;
                let payload_start = 7 + app_bytes;
                if content.len() < payload_start {
                    warn!("EmBER frame shorter than its app bytes, dropped");
                    return None;
                }

                if flags & FLAG_FIRST_PACKET != 0 {
                    self.partial_payload.clear();
                }
                self.partial_payload
                    .extend_from_slice(&content[payload_start..]);

                if flags & FLAG_LAST_PACKET != 0 {
                    let payload = std::mem::take(&mut self.partial_payload);
                    trace!(len = payload.len(), "EmBER payload complete");
                    Some(S101Message::Ember(payload))
                } else {
                    trace!(
                        buffered = self.partial_payload.len(),
                        "EmBER packet buffered, awaiting last-packet flag"
                    );
                    None
                }
            }
            other => {
                warn!(command = other, "Unknown S101 command, dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ember_frame_roundtrip() {
        let payload = vec![0x60, 0x03, 0x6B, 0x01, 0x00];
        let frame = encode_ember_frame(&payload);
        assert_eq!(frame[0], BOF);
        assert_eq!(*frame.last().unwrap(), EOF);

        let mut deframer = Deframer::new();
        let messages = deframer.push(&frame);
        assert_eq!(messages, vec![S101Message::Ember(payload)]);
        assert_eq!(deframer.pending_len(), 0);
    }

    #[test]
    fn test_split_frame_across_chunks() {
        let frame = encode_ember_frame(&[0x60, 0x00]);
        let (a, b) = frame.split_at(frame.len() / 2);

        let mut deframer = Deframer::new();
        assert!(deframer.push(a).is_empty());
        assert!(deframer.pending_len() > 0);

        let messages = deframer.push(b);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut chunk = encode_keepalive_request();
        chunk.extend(encode_ember_frame(&[0x60, 0x00]));

        let mut deframer = Deframer::new();
        let messages = deframer.push(&chunk);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], S101Message::KeepaliveRequest);
    }

    #[test]
    fn test_payload_bytes_needing_escape() {
        // 0xFE inside the payload must not open a new frame.
        let payload = vec![0xFE, 0xFF, 0xFD, 0xF8, 0x00];
        let frame = encode_ember_frame(&payload);
        assert_eq!(frame.iter().filter(|&&b| b == BOF).count(), 1);

        let mut deframer = Deframer::new();
        let messages = deframer.push(&frame);
        assert_eq!(messages, vec![S101Message::Ember(payload)]);
    }

    #[test]
    fn test_corrupt_crc_dropped() {
        let mut frame = encode_ember_frame(&[0x60, 0x00]);
        let idx = frame.len() / 2;
        frame[idx] ^= 0x01;

        let mut deframer = Deframer::new();
        // Either the CRC fails or the escape structure breaks; both drop.
        assert!(deframer.push(&frame).is_empty());

        // The stream recovers on the next good frame.
        let good = encode_keepalive_response();
        assert_eq!(deframer.push(&good), vec![S101Message::KeepaliveResponse]);
    }

    #[test]
    fn test_garbage_before_bof_skipped() {
        let mut chunk = vec![0x01, 0x02, 0x03];
        chunk.extend(encode_keepalive_request());

        let mut deframer = Deframer::new();
        assert_eq!(deframer.push(&chunk), vec![S101Message::KeepaliveRequest]);
    }

    #[test]
    fn test_multi_packet_payload_joined() {
        // Hand-build two frames carrying one payload split in half.
        let build = |flags: u8, part: &[u8]| {
            let mut content = vec![SLOT, MSG_EMBER, CMD_EMBER, VERSION, flags, DTD_GLOW, 2];
            content.extend_from_slice(&APP_BYTES);
            content.extend_from_slice(part);
            encode_frame(&content)
        };
        let mut deframer = Deframer::new();
        assert!(deframer.push(&build(FLAG_FIRST_PACKET, &[0x60, 0x04])).is_empty());
        let messages = deframer.push(&build(FLAG_LAST_PACKET, &[0x6B, 0x02]));
        assert_eq!(
            messages,
            vec![S101Message::Ember(vec![0x60, 0x04, 0x6B, 0x02])]
        );
    }
}
