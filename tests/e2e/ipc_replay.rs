//! Cluster IPC replay and authentication scenarios over a real endpoint.

use xypriss_cluster::ipc::{
    child_handshake, parent_handshake, IpcEndpoint, MessageType, RootKey,
};

fn secret() -> RootKey {
    RootKey::from_secret(b"e2e-secret")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handshake_heartbeat_over_private_endpoint() {
    let endpoint = IpcEndpoint::private("e2e");
    let (listener, actual) =
        xypriss_cluster::ipc::endpoint::IpcListener::bind(&endpoint).await.unwrap();

    let child = tokio::spawn(async move {
        let stream = actual.connect().await.unwrap();
        let mut session = child_handshake(stream, secret(), 7).await.unwrap();
        session
            .send_json(
                MessageType::Heartbeat,
                &serde_json::json!({ "busy": true }),
            )
            .await
            .unwrap();
    });

    let stream = listener.accept().await.unwrap();
    let (mut session, worker_id) = parent_handshake(stream, secret()).await.unwrap();
    assert_eq!(worker_id, 7);

    let heartbeat = session.recv().await.unwrap();
    assert_eq!(heartbeat.msg_type, MessageType::Heartbeat);
    let payload: serde_json::Value = heartbeat.json().unwrap();
    assert_eq!(payload["busy"], true);

    child.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wrong_root_secret_is_rejected() {
    let endpoint = IpcEndpoint::private("e2e-auth");
    let (listener, actual) =
        xypriss_cluster::ipc::endpoint::IpcListener::bind(&endpoint).await.unwrap();

    let child = tokio::spawn(async move {
        let stream = actual.connect().await.unwrap();
        let _ = child_handshake(stream, RootKey::from_secret(b"not the secret"), 1).await;
    });

    let stream = listener.accept().await.unwrap();
    assert!(parent_handshake(stream, secret()).await.is_err());
    child.abort();
}
