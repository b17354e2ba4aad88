//! Integration tests for upload storage and the upload gRPC facade.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use socialops::db::UploadKind;
use socialops::error::CoreError;
use socialops::grpc::pb::upload::upload_service_client::UploadServiceClient;
use socialops::grpc::pb::upload::{
    DeleteUploadRequest, DownloadChunkRequest, GetUploadInfoRequest, UploadFileChunk,
};
use socialops::grpc::{self, UploadGrpc};

use common::{setup_db, upload_store, JPEG, PNG};

#[tokio::test]
async fn test_range_reads() {
    let (db, temp_dir) = setup_db().await;
    let uploads = upload_store(&db, &temp_dir);

    let data: Vec<u8> = (0..100u8).collect();
    let id = uploads
        .upload("uploads/range.bin", &data, UploadKind::Raw, Some(7))
        .await
        .unwrap();

    let slice = uploads.read_range(id, 10, 5).await.unwrap();
    assert_eq!(slice.data, vec![10, 11, 12, 13, 14]);
    assert_eq!(slice.offset, 10);
    assert_eq!(slice.total_size, 100);

    let empty = uploads.read_range(id, 10, 0).await.unwrap();
    assert!(empty.data.is_empty());
    assert_eq!(empty.offset, 10);
    assert_eq!(empty.total_size, 100);

    let tail = uploads.read_range(id, 95, 5).await.unwrap();
    assert_eq!(tail.data, vec![95, 96, 97, 98, 99]);

    // Longer than the rest is truncated.
    let truncated = uploads.read_range(id, 98, 50).await.unwrap();
    assert_eq!(truncated.data, vec![98, 99]);

    let past_end = uploads.read_range(id, 100, 10).await.unwrap();
    assert!(past_end.data.is_empty());
    assert_eq!(past_end.total_size, 100);

    assert!(matches!(
        uploads.read_range(id, -1, 10).await,
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        uploads.read_range(id, 0, -1).await,
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        uploads.read_range(id + 1, 0, 10).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_store_media_sniffs_extension() {
    let (db, temp_dir) = setup_db().await;
    let uploads = upload_store(&db, &temp_dir);

    let photo = uploads
        .store_media("tg", JPEG, UploadKind::Photo, None)
        .await
        .unwrap();
    let info = uploads.info(photo).await.unwrap();
    assert!(info.path.starts_with("tg/"));
    assert!(info.path.ends_with(".jpg"));
    assert_eq!(info.kind(), UploadKind::Photo);

    let doc = uploads
        .store_media("vk", b"\xfe\xfd\xfc\xfb", UploadKind::Doc, Some("pdf"))
        .await
        .unwrap();
    assert!(uploads.info(doc).await.unwrap().path.ends_with(".pdf"));
}

#[tokio::test]
async fn test_delete_removes_blob_and_record() {
    let (db, temp_dir) = setup_db().await;
    let uploads = upload_store(&db, &temp_dir);

    let id = uploads
        .upload("uploads/gone.png", PNG, UploadKind::Photo, None)
        .await
        .unwrap();
    assert!(temp_dir.path().join("objects/uploads/gone.png").exists());

    assert!(uploads.delete(id).await.unwrap());
    assert!(!uploads.delete(id).await.unwrap());
    assert!(!temp_dir.path().join("objects/uploads/gone.png").exists());
}

async fn start_upload_server(svc: UploadGrpc, shutdown: CancellationToken) -> UploadServiceClient<Channel> {
    let addr: SocketAddr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    tokio::spawn(grpc::serve_upload(addr, svc, shutdown));

    for _ in 0..50 {
        if let Ok(client) = UploadServiceClient::connect(format!("http://{addr}")).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("upload server did not start");
}

#[tokio::test]
async fn test_grpc_upload_download_round() {
    let (db, temp_dir) = setup_db().await;
    let uploads = upload_store(&db, &temp_dir);
    let shutdown = CancellationToken::new();
    let mut client = start_upload_server(UploadGrpc::new(uploads), shutdown.clone()).await;

    let chunks = vec![
        UploadFileChunk {
            file_name: "cat.PNG".to_string(),
            file_type: "photo".to_string(),
            user_id: 12,
            data: PNG[..4].to_vec(),
        },
        UploadFileChunk {
            data: PNG[4..].to_vec(),
            ..Default::default()
        },
    ];
    let uploaded = client
        .upload_file(stream::iter(chunks))
        .await
        .unwrap()
        .into_inner();
    assert!(uploaded.file_path.starts_with("uploads/"));
    assert!(uploaded.file_path.ends_with(".png"));

    let info = client
        .get_upload_info(GetUploadInfoRequest { id: uploaded.id })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.file_type, "photo");
    assert_eq!(info.user_id, 12);
    assert_eq!(info.size, PNG.len() as i64);
    assert!(info.created_at.ends_with('Z'));

    let chunk = client
        .download_chunk(DownloadChunkRequest {
            id: uploaded.id,
            offset: 1,
            length: 3,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(chunk.data, PNG[1..4].to_vec());
    assert_eq!(chunk.total_size, PNG.len() as i64);

    let deleted = client
        .delete_upload(DeleteUploadRequest { id: uploaded.id })
        .await
        .unwrap()
        .into_inner();
    assert!(deleted.success);

    let missing = client
        .get_upload_info(GetUploadInfoRequest { id: uploaded.id })
        .await
        .unwrap_err();
    assert_eq!(missing.code(), tonic::Code::NotFound);

    shutdown.cancel();
}

#[tokio::test]
async fn test_grpc_empty_upload_round_trips() {
    let (db, temp_dir) = setup_db().await;
    let uploads = upload_store(&db, &temp_dir);
    let shutdown = CancellationToken::new();
    let mut client = start_upload_server(UploadGrpc::new(uploads), shutdown.clone()).await;

    let uploaded = client
        .upload_file(stream::iter(vec![UploadFileChunk {
            file_name: "empty.txt".to_string(),
            ..Default::default()
        }]))
        .await
        .unwrap()
        .into_inner();

    let info = client
        .get_upload_info(GetUploadInfoRequest { id: uploaded.id })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.size, 0);

    let chunk = client
        .download_chunk(DownloadChunkRequest {
            id: uploaded.id,
            offset: 0,
            length: 0,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(chunk.data.is_empty());
    assert_eq!(chunk.total_size, 0);

    let status = client
        .download_chunk(DownloadChunkRequest {
            id: uploaded.id,
            offset: 0,
            length: -1,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    shutdown.cancel();
}
