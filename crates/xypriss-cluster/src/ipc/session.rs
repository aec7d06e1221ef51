//! Authenticated sessions over an IPC stream.
//!
//! A session enforces, in order: timestamp window, strictly increasing
//! sequence numbers, nonce uniqueness, and AEAD verification. Replay and
//! staleness are droppable offenses (the caller logs and keeps the link);
//! a failed tag is grounds for terminating the session.
//!
//! The handshake runs on an unsplit [`Session`]; established links call
//! [`Session::split`] so one task can serve reads and writes from separate
//! `select!` branches. [`SessionReader::recv`] is cancellation-safe: a
//! partial frame stays in the reader's buffer across dropped awaits.

use crate::error::ClusterError;
use crate::ipc::crypto::{random_nonce, RootKey, SessionKey, NONCE_LEN};
use crate::ipc::endpoint::BoxedStream;
use crate::ipc::frame::{unix_millis, Frame, MessageType, PROTOCOL_VERSION};
use bytes::BytesMut;
use hashbrown::HashSet;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

/// The supervisor's source id on every link.
pub const PARENT_ID: u32 = 0;

/// Accepted clock skew between peers.
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// A decrypted, validated control message.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub src_id: u32,
    pub seq: u64,
    pub ts: u64,
    pub payload: Vec<u8>,
}

impl Message {
    /// Deserializes the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ClusterError> {
        serde_json::from_slice(&self.payload).map_err(|_| ClusterError::Codec("bad json payload"))
    }
}

#[derive(Clone)]
enum LinkKey {
    /// Handshake phase: `Hello` and `KeyIssue` only.
    Root(RootKey),
    /// Established phase.
    Session(SessionKey),
}

impl LinkKey {
    fn seal(
        &self,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), ClusterError> {
        match self {
            LinkKey::Root(key) => key.seal(nonce, aad, plaintext),
            LinkKey::Session(key) => key.seal(nonce, aad, plaintext),
        }
    }

    fn open(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, ClusterError> {
        match self {
            LinkKey::Root(key) => key.open(nonce, aad, ciphertext, tag),
            LinkKey::Session(key) => key.open(nonce, aad, ciphertext, tag),
        }
    }
}

/// Inbound replay-protection state, shared by [`Session`] and
/// [`SessionReader`].
struct InboundState {
    last_peer_seq: Option<u64>,
    seen_nonces: HashSet<[u8; NONCE_LEN]>,
}

impl InboundState {
    fn new() -> Self {
        Self {
            last_peer_seq: None,
            seen_nonces: HashSet::new(),
        }
    }

    /// Validates a frame and opens it. Only fully verified frames advance
    /// the replay state.
    fn validate_and_open(&mut self, key: &LinkKey, frame: Frame) -> Result<Message, ClusterError> {
        let now = unix_millis();
        if now.abs_diff(frame.ts) > MAX_CLOCK_SKEW.as_millis() as u64 {
            return Err(ClusterError::Replay("timestamp outside window"));
        }

        if let Some(last) = self.last_peer_seq {
            if frame.seq <= last {
                return Err(ClusterError::Replay("sequence regression"));
            }
        }

        let nonce: [u8; NONCE_LEN] = frame
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| ClusterError::Codec("bad nonce length"))?;
        if self.seen_nonces.contains(&nonce) {
            return Err(ClusterError::Replay("nonce reuse"));
        }

        let aad = frame.aad();
        let payload = key.open(&frame.nonce, &aad, &frame.ciphertext, &frame.tag)?;

        self.last_peer_seq = Some(frame.seq);
        self.seen_nonces.insert(nonce);

        Ok(Message {
            msg_type: frame.msg_type,
            src_id: frame.src_id,
            seq: frame.seq,
            ts: frame.ts,
            payload,
        })
    }
}

fn seal_frame(
    key: &LinkKey,
    src_id: u32,
    seq: u64,
    msg_type: MessageType,
    payload: &[u8],
) -> Result<Frame, ClusterError> {
    let mut frame = Frame {
        version: PROTOCOL_VERSION,
        msg_type,
        src_id,
        seq,
        ts: unix_millis(),
        nonce: random_nonce().to_vec(),
        ciphertext: Vec::new(),
        tag: Vec::new(),
    };
    let aad = frame.aad();
    let (ciphertext, tag) = key.seal(&frame.nonce, &aad, payload)?;
    frame.ciphertext = ciphertext;
    frame.tag = tag;
    Ok(frame)
}

/// One authenticated parent↔child link, before splitting.
pub struct Session {
    stream: BoxedStream,
    buf: BytesMut,
    key: LinkKey,
    src_id: u32,
    next_seq: u64,
    inbound: InboundState,
}

impl Session {
    /// A fresh link in the handshake phase.
    pub fn new(stream: BoxedStream, root: RootKey, src_id: u32) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            key: LinkKey::Root(root),
            src_id,
            next_seq: 1,
            inbound: InboundState::new(),
        }
    }

    /// Switches the link to the issued session key. Sequence counters and
    /// the nonce set persist across the upgrade.
    pub fn upgrade(&mut self, key: SessionKey) {
        self.key = LinkKey::Session(key);
    }

    /// Sends one sealed message.
    pub async fn send(
        &mut self,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), ClusterError> {
        let frame = seal_frame(&self.key, self.src_id, self.next_seq, msg_type, payload)?;
        self.next_seq += 1;
        frame.write_to(&mut self.stream).await?;
        Ok(())
    }

    /// Sends a JSON payload.
    pub async fn send_json<T: serde::Serialize>(
        &mut self,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<(), ClusterError> {
        let bytes =
            serde_json::to_vec(payload).map_err(|_| ClusterError::Codec("json serialize"))?;
        self.send(msg_type, &bytes).await
    }

    /// Receives and validates one message.
    pub async fn recv(&mut self) -> Result<Message, ClusterError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf)? {
                return self.inbound.validate_and_open(&self.key, frame);
            }
            let read = self.stream.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(ClusterError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the link",
                )));
            }
        }
    }

    /// Splits the established link into independently borrowable halves,
    /// so a link task can select over reads and writes.
    pub fn split(self) -> (SessionReader, SessionWriter) {
        let (read, write) = tokio::io::split(self.stream);
        (
            SessionReader {
                stream: read,
                buf: self.buf,
                key: self.key.clone(),
                inbound: self.inbound,
            },
            SessionWriter {
                stream: write,
                key: self.key,
                src_id: self.src_id,
                next_seq: self.next_seq,
            },
        )
    }
}

/// Inbound half of a split session.
pub struct SessionReader {
    stream: ReadHalf<BoxedStream>,
    buf: BytesMut,
    key: LinkKey,
    inbound: InboundState,
}

impl SessionReader {
    /// Receives and validates one message. Cancellation-safe: dropping the
    /// future mid-frame leaves the partial frame in the buffer.
    pub async fn recv(&mut self) -> Result<Message, ClusterError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf)? {
                return self.inbound.validate_and_open(&self.key, frame);
            }
            let read = self.stream.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(ClusterError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the link",
                )));
            }
        }
    }
}

/// Outbound half of a split session.
pub struct SessionWriter {
    stream: WriteHalf<BoxedStream>,
    key: LinkKey,
    src_id: u32,
    next_seq: u64,
}

impl SessionWriter {
    pub async fn send(
        &mut self,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), ClusterError> {
        let frame = seal_frame(&self.key, self.src_id, self.next_seq, msg_type, payload)?;
        self.next_seq += 1;
        frame.write_to(&mut self.stream).await?;
        Ok(())
    }

    pub async fn send_json<T: serde::Serialize>(
        &mut self,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<(), ClusterError> {
        let bytes =
            serde_json::to_vec(payload).map_err(|_| ClusterError::Codec("json serialize"))?;
        self.send(msg_type, &bytes).await
    }
}

/// Parent side of the handshake: await the root-sealed `Hello`, issue a
/// fresh session key sealed the same way, switch to it.
pub async fn parent_handshake(
    stream: BoxedStream,
    root: RootKey,
) -> Result<(Session, u32), ClusterError> {
    let mut session = Session::new(stream, root, PARENT_ID);
    let hello = session.recv().await?;
    if hello.msg_type != MessageType::Hello {
        return Err(ClusterError::AuthFailed);
    }
    let worker_id = hello.src_id;

    let key = SessionKey::random();
    session.send(MessageType::KeyIssue, key.as_bytes()).await?;
    session.upgrade(key);
    Ok((session, worker_id))
}

/// Child side of the handshake.
pub async fn child_handshake(
    stream: BoxedStream,
    root: RootKey,
    worker_id: u32,
) -> Result<Session, ClusterError> {
    let mut session = Session::new(stream, root, worker_id);
    session
        .send_json(
            MessageType::Hello,
            &serde_json::json!({ "pid": std::process::id() }),
        )
        .await?;

    let issue = session.recv().await?;
    if issue.msg_type != MessageType::KeyIssue {
        return Err(ClusterError::AuthFailed);
    }
    let key = SessionKey::from_bytes(&issue.payload)?;
    session.upgrade(key);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn pair() -> (BoxedStream, BoxedStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Box::new(a), Box::new(b))
    }

    fn root() -> RootKey {
        RootKey::from_secret(b"test-secret")
    }

    #[tokio::test]
    async fn test_handshake_and_heartbeat() {
        let (parent_stream, child_stream) = pair();
        let child = tokio::spawn(async move {
            let mut session = child_handshake(child_stream, root(), 3).await.unwrap();
            session
                .send_json(MessageType::Heartbeat, &serde_json::json!({"busy": false}))
                .await
                .unwrap();
            session
        });

        let (mut parent, worker_id) = parent_handshake(parent_stream, root()).await.unwrap();
        assert_eq!(worker_id, 3);

        let heartbeat = parent.recv().await.unwrap();
        assert_eq!(heartbeat.msg_type, MessageType::Heartbeat);
        let payload: serde_json::Value = heartbeat.json().unwrap();
        assert_eq!(payload["busy"], false);
        child.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_halves_keep_talking() {
        let (parent_stream, child_stream) = pair();
        let child = tokio::spawn(async move {
            let session = child_handshake(child_stream, root(), 5).await.unwrap();
            let (mut reader, mut writer) = session.split();
            writer.send(MessageType::Ready, b"").await.unwrap();
            let drain = reader.recv().await.unwrap();
            assert_eq!(drain.msg_type, MessageType::Drain);
        });

        let (session, _) = parent_handshake(parent_stream, root()).await.unwrap();
        let (mut reader, mut writer) = session.split();
        let ready = reader.recv().await.unwrap();
        assert_eq!(ready.msg_type, MessageType::Ready);
        writer.send(MessageType::Drain, b"").await.unwrap();
        child.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_with_wrong_secret_fails() {
        let (parent_stream, child_stream) = pair();
        let child = tokio::spawn(async move {
            let _ = child_handshake(child_stream, RootKey::from_secret(b"wrong"), 1).await;
        });
        let result = parent_handshake(parent_stream, root()).await;
        assert!(matches!(result, Err(ClusterError::AuthFailed)));
        child.abort();
    }

    /// Builds a sealed frame outside any session, for injection tests.
    fn sealed_frame(key: &SessionKey, seq: u64, nonce: [u8; NONCE_LEN]) -> Frame {
        let mut frame = Frame {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Heartbeat,
            src_id: 1,
            seq,
            ts: unix_millis(),
            nonce: nonce.to_vec(),
            ciphertext: Vec::new(),
            tag: Vec::new(),
        };
        let aad = frame.aad();
        let (ciphertext, tag) = key.seal(&frame.nonce, &aad, b"{}").unwrap();
        frame.ciphertext = ciphertext;
        frame.tag = tag;
        frame
    }

    fn receiver_with_key(key: SessionKey) -> (Session, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut session = Session::new(Box::new(a), root(), PARENT_ID);
        session.upgrade(key);
        (session, b)
    }

    #[tokio::test]
    async fn test_replayed_nonce_rejected() {
        let key = SessionKey::random();
        let (mut receiver, mut wire) = receiver_with_key(key.clone());

        let nonce = random_nonce();
        let frame = sealed_frame(&key, 1, nonce);
        wire.write_all(&frame.encode()).await.unwrap();
        assert!(receiver.recv().await.is_ok());

        // Same nonce on a fresh (higher) sequence number.
        let replay = sealed_frame(&key, 2, nonce);
        wire.write_all(&replay.encode()).await.unwrap();
        assert!(matches!(
            receiver.recv().await,
            Err(ClusterError::Replay("nonce reuse"))
        ));
    }

    #[tokio::test]
    async fn test_identical_frame_rejected_by_seq() {
        let key = SessionKey::random();
        let (mut receiver, mut wire) = receiver_with_key(key.clone());

        let frame = sealed_frame(&key, 1, random_nonce());
        let bytes = frame.encode();
        wire.write_all(&bytes).await.unwrap();
        assert!(receiver.recv().await.is_ok());

        // Verbatim re-injection of the captured frame.
        wire.write_all(&bytes).await.unwrap();
        assert!(matches!(
            receiver.recv().await,
            Err(ClusterError::Replay("sequence regression"))
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_rejected() {
        let key = SessionKey::random();
        let (mut receiver, mut wire) = receiver_with_key(key.clone());

        let mut frame = sealed_frame(&key, 1, random_nonce());
        frame.ciphertext[0] ^= 0xFF;
        wire.write_all(&frame.encode()).await.unwrap();
        assert!(matches!(
            receiver.recv().await,
            Err(ClusterError::AuthFailed)
        ));
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let key = SessionKey::random();
        let (mut receiver, mut wire) = receiver_with_key(key.clone());

        let mut frame = sealed_frame(&key, 1, random_nonce());
        frame.ts = unix_millis().saturating_sub(120_000);
        // Re-seal under the doctored header so only staleness can fail.
        let aad = frame.aad();
        let (ciphertext, tag) = key.seal(&frame.nonce, &aad, b"{}").unwrap();
        frame.ciphertext = ciphertext;
        frame.tag = tag;
        wire.write_all(&frame.encode()).await.unwrap();
        assert!(matches!(
            receiver.recv().await,
            Err(ClusterError::Replay("timestamp outside window"))
        ));
    }

    #[tokio::test]
    async fn test_rejected_frame_does_not_advance_state() {
        let key = SessionKey::random();
        let (mut receiver, mut wire) = receiver_with_key(key.clone());

        let mut bad = sealed_frame(&key, 1, random_nonce());
        bad.ciphertext[0] ^= 0xFF;
        wire.write_all(&bad.encode()).await.unwrap();
        assert!(receiver.recv().await.is_err());

        // A valid frame with the same seq still goes through: the bad one
        // never advanced the sequence floor.
        let good = sealed_frame(&key, 1, random_nonce());
        wire.write_all(&good.encode()).await.unwrap();
        assert!(receiver.recv().await.is_ok());
    }
}
