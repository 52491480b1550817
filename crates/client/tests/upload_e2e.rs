//! End-to-end upload tests: a real server and a real client on localhost.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use reelport_client::{ClientError, UploadDriver, WsClient};
use reelport_protocol::constants::{
    ERR_CODE_CONFLICT, ERR_CODE_PAYLOAD_TOO_LARGE, MessageType, TMP_PREFIX,
};
use reelport_protocol::messages::{UploadChunkRequest, UploadOpenRequest, UploadOpenResponse};
use reelport_server::{ServerConfig, UploadHandler, UploadServer};
use reelport_transfer::AssemblyStore;

struct TestServer {
    server: Arc<UploadServer<UploadHandler>>,
    url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(uploads_dir: &Path, chunk_size: usize) -> Self {
        let store = Arc::new(AssemblyStore::new(uploads_dir, chunk_size).unwrap());
        let accept = Arc::new(AtomicBool::new(true));
        let handler = UploadHandler::new(store, Arc::clone(&accept));
        let server = UploadServer::new(ServerConfig { port: 0 }, handler, accept);

        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the listener to bind.
        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(port > 0, "server did not bind");

        Self {
            server,
            url: format!("ws://127.0.0.1:{port}"),
            handle,
        }
    }

    async fn stop(self) {
        self.server.shutdown();
        self.handle.await.unwrap();
    }
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Deterministic non-repeating test bytes.
fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn round_trip_reproduces_the_source_bytes() {
    let uploads = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 0).await;

    // 2.5 MiB at the default 1 MiB chunk size: 3 chunks, short last one.
    let data = patterned_bytes(2 * 1024 * 1024 + 512 * 1024);
    let path = write_file(source.path(), "holiday.mp4", &data);

    let (client, status) = WsClient::connect(&ts.url, "e2e").await.unwrap();
    assert_eq!(status.chunk_size, 1024 * 1024);

    let mut driver = UploadDriver::new(0);
    driver.add_file(&path).unwrap();
    driver.run(&client).await.unwrap();

    let task = &driver.tasks()[0];
    assert_eq!(task.total_chunks, 3);
    let final_name = task.final_name.clone().expect("upload must complete");
    assert!(final_name.ends_with(".mp4"));

    // The reassembled file matches the source exactly, and no temp file
    // remains after finalization.
    assert_eq!(std::fs::read(uploads.path().join(&final_name)).unwrap(), data);
    let leftovers: Vec<String> = std::fs::read_dir(uploads.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(TMP_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");

    client.close();
    ts.stop().await;
}

#[tokio::test]
async fn disallowed_extension_is_rejected_with_413_and_no_disk_state() {
    let uploads = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 4).await;

    let (client, _) = WsClient::connect(&ts.url, "e2e").await.unwrap();

    let req = UploadOpenRequest {
        file_name: "video.txt".into(),
        size: 10,
    };
    let err = client
        .send_request(MessageType::UploadOpen, Some(&req))
        .await
        .unwrap_err();
    let ClientError::Server { code, .. } = err else {
        panic!("expected a structured server error, got {err:?}");
    };
    assert_eq!(code, ERR_CODE_PAYLOAD_TOO_LARGE);
    assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 0);

    client.close();
    ts.stop().await;
}

#[tokio::test]
async fn chunk_zero_resets_a_previous_attempt() {
    let uploads = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 4).await;

    let (client, _) = WsClient::connect(&ts.url, "e2e").await.unwrap();

    let open = UploadOpenRequest {
        file_name: "clip.mp4".into(),
        size: 8,
    };
    let resp = client
        .send_request(MessageType::UploadOpen, Some(&open))
        .await
        .unwrap();
    let open: UploadOpenResponse = resp.parse_payload().unwrap().unwrap();

    let chunk = |index: u32, data: &[u8]| UploadChunkRequest {
        upload_id: open.upload_id.clone(),
        file_name: "clip.mp4".into(),
        chunk_index: index,
        total_chunks: 2,
        data: data.to_vec(),
    };

    client
        .send_request(MessageType::UploadChunk, Some(&chunk(0, b"AAAA")))
        .await
        .unwrap();

    // Re-driving from chunk 0 discards the first attempt.
    client
        .send_request(MessageType::UploadChunk, Some(&chunk(0, b"BBBB")))
        .await
        .unwrap();
    let resp = client
        .send_request(MessageType::UploadChunk, Some(&chunk(1, b"CCCC")))
        .await
        .unwrap();
    let ack: reelport_protocol::messages::UploadChunkResponse =
        resp.parse_payload().unwrap().unwrap();
    let final_name = ack.final_name.unwrap();

    assert_eq!(
        std::fs::read(uploads.path().join(final_name)).unwrap(),
        b"BBBBCCCC"
    );

    client.close();
    ts.stop().await;
}

#[tokio::test]
async fn out_of_order_chunk_is_rejected_with_409() {
    let uploads = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 4).await;

    let (client, _) = WsClient::connect(&ts.url, "e2e").await.unwrap();

    let open = UploadOpenRequest {
        file_name: "clip.mp4".into(),
        size: 10,
    };
    let resp = client
        .send_request(MessageType::UploadOpen, Some(&open))
        .await
        .unwrap();
    let open: UploadOpenResponse = resp.parse_payload().unwrap().unwrap();

    let chunk0 = UploadChunkRequest {
        upload_id: open.upload_id.clone(),
        file_name: "clip.mp4".into(),
        chunk_index: 0,
        total_chunks: 3,
        data: b"AABB".to_vec(),
    };
    client
        .send_request(MessageType::UploadChunk, Some(&chunk0))
        .await
        .unwrap();

    let skipped = UploadChunkRequest {
        upload_id: open.upload_id.clone(),
        file_name: "clip.mp4".into(),
        chunk_index: 2,
        total_chunks: 3,
        data: b"EE".to_vec(),
    };
    let err = client
        .send_request(MessageType::UploadChunk, Some(&skipped))
        .await
        .unwrap_err();
    let ClientError::Server { code, .. } = err else {
        panic!("expected a structured server error, got {err:?}");
    };
    assert_eq!(code, ERR_CODE_CONFLICT);

    client.close();
    ts.stop().await;
}

#[tokio::test]
async fn concurrent_clients_with_same_file_name_stay_independent() {
    let uploads = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 4).await;

    let dir_a = source.path().join("a");
    let dir_b = source.path().join("b");
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    let path_a = write_file(&dir_a, "clip.mp4", b"AAAAAAAAAA");
    let path_b = write_file(&dir_b, "clip.mp4", b"BBBBBBBBBB");

    let url_a = ts.url.clone();
    let url_b = ts.url.clone();

    let upload_a = tokio::spawn(async move {
        let (client, _) = WsClient::connect(&url_a, "client-a").await.unwrap();
        let mut driver = UploadDriver::new(4);
        driver.add_file(&path_a).unwrap();
        driver.run(&client).await.unwrap();
        driver.tasks()[0].final_name.clone().unwrap()
    });
    let upload_b = tokio::spawn(async move {
        let (client, _) = WsClient::connect(&url_b, "client-b").await.unwrap();
        let mut driver = UploadDriver::new(4);
        driver.add_file(&path_b).unwrap();
        driver.run(&client).await.unwrap();
        driver.tasks()[0].final_name.clone().unwrap()
    });

    let final_a = upload_a.await.unwrap();
    let final_b = upload_b.await.unwrap();
    assert_ne!(final_a, final_b);

    // Each upload landed intact; no interleaving between the assemblies.
    assert_eq!(
        std::fs::read(uploads.path().join(final_a)).unwrap(),
        b"AAAAAAAAAA"
    );
    assert_eq!(
        std::fs::read(uploads.path().join(final_b)).unwrap(),
        b"BBBBBBBBBB"
    );

    ts.stop().await;
}

#[tokio::test]
async fn server_status_advertises_protocol_limits() {
    let uploads = tempfile::tempdir().unwrap();
    let ts = TestServer::start(uploads.path(), 4).await;

    let (client, status) = WsClient::connect(&ts.url, "e2e").await.unwrap();
    assert_eq!(status.name, "reelport");
    assert_eq!(status.chunk_size, 4);
    assert!(status.accept_uploads);
    assert_eq!(status.allowed_extensions, vec!["mp4", "avi", "mkv"]);

    client.close();
    ts.stop().await;
}
