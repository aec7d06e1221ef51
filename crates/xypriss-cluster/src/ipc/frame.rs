//! The cluster IPC wire format.
//!
//! ```text
//! version(u8) | type(u8) | srcId(u32) | seq(u64) | ts(u64) |
//! nonceLen(u8) | nonce | ciphertextLen(u32) | ciphertext |
//! tagLen(u8) | tag
//! ```
//!
//! Integers are big-endian. The header bytes through the nonce are the
//! associated data of the AEAD, so a frame whose header was tampered with
//! fails tag verification.

use crate::error::ClusterError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 1;

const MAX_NONCE_LEN: usize = 24;
const MAX_CIPHERTEXT_LEN: usize = 16 * 1024 * 1024;
const MAX_TAG_LEN: usize = 32;

/// Control-plane message types. Admin operations only; HTTP requests are
/// never routed over this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Child → parent, sealed with the root key.
    Hello = 1,
    /// Parent → child, the sealed session key.
    KeyIssue = 2,
    Heartbeat = 3,
    Ready = 4,
    Drain = 5,
    /// Child → parent: drained and idle.
    DrainAck = 6,
    Shutdown = 7,
    Reload = 8,
    Stats = 9,
    WorkBroadcast = 10,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, ClusterError> {
        Ok(match value {
            1 => MessageType::Hello,
            2 => MessageType::KeyIssue,
            3 => MessageType::Heartbeat,
            4 => MessageType::Ready,
            5 => MessageType::Drain,
            6 => MessageType::DrainAck,
            7 => MessageType::Shutdown,
            8 => MessageType::Reload,
            9 => MessageType::Stats,
            10 => MessageType::WorkBroadcast,
            _ => return Err(ClusterError::Codec("unknown message type")),
        })
    }
}

/// One wire frame, ciphertext and tag detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_type: MessageType,
    pub src_id: u32,
    pub seq: u64,
    /// Sender clock, milliseconds since the Unix epoch.
    pub ts: u64,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl Frame {
    /// The associated data covered by the AEAD tag: every header byte up
    /// to and including the nonce.
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(23 + self.nonce.len());
        aad.push(self.version);
        aad.push(self.msg_type as u8);
        aad.extend_from_slice(&self.src_id.to_be_bytes());
        aad.extend_from_slice(&self.seq.to_be_bytes());
        aad.extend_from_slice(&self.ts.to_be_bytes());
        aad.push(self.nonce.len() as u8);
        aad.extend_from_slice(&self.nonce);
        aad
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            23 + self.nonce.len() + 5 + self.ciphertext.len() + 1 + self.tag.len(),
        );
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type as u8);
        buf.put_u32(self.src_id);
        buf.put_u64(self.seq);
        buf.put_u64(self.ts);
        buf.put_u8(self.nonce.len() as u8);
        buf.put_slice(&self.nonce);
        buf.put_u32(self.ciphertext.len() as u32);
        buf.put_slice(&self.ciphertext);
        buf.put_u8(self.tag.len() as u8);
        buf.put_slice(&self.tag);
        buf.freeze()
    }

    /// Writes the frame to a stream.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumes the frame's
    /// bytes only once the whole frame is present, so a partial frame in
    /// the buffer survives across reads (and across cancelled awaits).
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ClusterError> {
        use bytes::Buf;

        // Fixed header through nonceLen.
        if buf.len() < 23 {
            return Ok(None);
        }
        let nonce_len = buf[22] as usize;
        if nonce_len > MAX_NONCE_LEN {
            return Err(ClusterError::Codec("nonce too long"));
        }
        let ct_len_at = 23 + nonce_len;
        if buf.len() < ct_len_at + 4 {
            return Ok(None);
        }
        let ciphertext_len = u32::from_be_bytes([
            buf[ct_len_at],
            buf[ct_len_at + 1],
            buf[ct_len_at + 2],
            buf[ct_len_at + 3],
        ]) as usize;
        if ciphertext_len > MAX_CIPHERTEXT_LEN {
            return Err(ClusterError::Codec("ciphertext too long"));
        }
        let tag_len_at = ct_len_at + 4 + ciphertext_len;
        if buf.len() < tag_len_at + 1 {
            return Ok(None);
        }
        let tag_len = buf[tag_len_at] as usize;
        if tag_len > MAX_TAG_LEN {
            return Err(ClusterError::Codec("tag too long"));
        }
        if buf.len() < tag_len_at + 1 + tag_len {
            return Ok(None);
        }

        // The whole frame is buffered; consume it.
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ClusterError::Codec("unsupported version"));
        }
        let msg_type = MessageType::from_u8(buf.get_u8())?;
        let src_id = buf.get_u32();
        let seq = buf.get_u64();
        let ts = buf.get_u64();
        let _nonce_len = buf.get_u8();
        let nonce = buf.split_to(nonce_len).to_vec();
        let _ciphertext_len = buf.get_u32();
        let ciphertext = buf.split_to(ciphertext_len).to_vec();
        let _tag_len = buf.get_u8();
        let tag = buf.split_to(tag_len).to_vec();

        Ok(Some(Frame {
            version,
            msg_type,
            src_id,
            seq,
            ts,
            nonce,
            ciphertext,
            tag,
        }))
    }

    /// Reads one frame from a stream. Test and handshake helper; the
    /// session layer reads through its own persistent buffer.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ClusterError> {
        let mut buf = BytesMut::with_capacity(256);
        loop {
            if let Some(frame) = Self::decode(&mut buf)? {
                return Ok(frame);
            }
            let read = reader.read_buf(&mut buf).await?;
            if read == 0 {
                return Err(ClusterError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed mid-frame",
                )));
            }
        }
    }
}

/// Milliseconds since the Unix epoch, for frame timestamps.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Heartbeat,
            src_id: 7,
            seq: 42,
            ts: 1_700_000_000_000,
            nonce: vec![1; 12],
            ciphertext: vec![2, 3, 4],
            tag: vec![5; 16],
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let original = frame();
        let mut wire = original.encode().to_vec();
        let decoded = Frame::read_from(&mut wire.as_slice()).await.unwrap();
        assert_eq!(decoded, original);
        assert!(wire.len() > 23);
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let mut wire = frame().encode().to_vec();
        wire[0] = 9;
        assert!(matches!(
            Frame::read_from(&mut wire.as_slice()).await,
            Err(ClusterError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_unknown_type() {
        let mut wire = frame().encode().to_vec();
        wire[1] = 200;
        assert!(matches!(
            Frame::read_from(&mut wire.as_slice()).await,
            Err(ClusterError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_truncated_frame() {
        let wire = frame().encode();
        let truncated = &wire[..wire.len() - 3];
        assert!(Frame::read_from(&mut &truncated[..]).await.is_err());
    }

    #[test]
    fn test_aad_covers_header_and_nonce() {
        let f = frame();
        let aad = f.aad();
        assert_eq!(aad.len(), 23 + 12);
        assert_eq!(aad[0], PROTOCOL_VERSION);
        assert_eq!(aad[1], MessageType::Heartbeat as u8);
        assert_eq!(&aad[23..], &f.nonce[..]);
    }
}
