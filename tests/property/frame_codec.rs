//! IPC frame codec laws.

use proptest::prelude::*;
use xypriss_cluster::ipc::{Frame, MessageType, SessionKey};

fn message_type() -> impl Strategy<Value = MessageType> {
    prop::sample::select(vec![
        MessageType::Hello,
        MessageType::KeyIssue,
        MessageType::Heartbeat,
        MessageType::Ready,
        MessageType::Drain,
        MessageType::DrainAck,
        MessageType::Shutdown,
        MessageType::Reload,
        MessageType::Stats,
        MessageType::WorkBroadcast,
    ])
}

proptest! {
    /// Encode/decode is the identity for well-formed frames.
    #[test]
    fn frame_round_trips(
        msg_type in message_type(),
        src_id in any::<u32>(),
        seq in any::<u64>(),
        ts in any::<u64>(),
        ciphertext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame {
            version: 1,
            msg_type,
            src_id,
            seq,
            ts,
            nonce: vec![7u8; 12],
            ciphertext,
            tag: vec![9u8; 16],
        };
        let wire = frame.encode();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let decoded = runtime
            .block_on(Frame::read_from(&mut wire.as_ref()))
            .unwrap();
        prop_assert_eq!(decoded, frame);
    }

    /// Sealed payloads only open under the sealing key with the original
    /// header bytes.
    #[test]
    fn seal_open_identity(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let key = SessionKey::random();
        let nonce = [3u8; 12];
        let (ciphertext, tag) = key.seal(&nonce, b"header", &payload).unwrap();
        let opened = key.open(&nonce, b"header", &ciphertext, &tag).unwrap();
        prop_assert_eq!(opened, payload);
        prop_assert!(key.open(&nonce, b"tampered", &ciphertext, &tag).is_err());
    }
}
