//! gRPC surface: the comment subscription stream and the upload facade.

mod comments;
mod upload;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

pub use self::comments::CommentsGrpc;
pub use self::upload::UploadGrpc;

use crate::gateway::KEEP_ALIVE_INTERVAL;

pub mod pb {
    pub mod comments {
        tonic::include_proto!("comments");
    }
    pub mod upload {
        tonic::include_proto!("upload");
    }
}

/// Largest body accepted by the upload stream.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

fn server() -> Server {
    Server::builder()
        .http2_keepalive_interval(Some(KEEP_ALIVE_INTERVAL))
        .http2_keepalive_timeout(Some(KEEP_ALIVE_TIMEOUT))
}

/// Serve the `Comments` service until `shutdown` fires.
pub async fn serve_comments(addr: SocketAddr, svc: CommentsGrpc, shutdown: CancellationToken) -> Result<()> {
    info!(addr = %addr, "Starting comments gRPC server");
    server()
        .add_service(pb::comments::comments_server::CommentsServer::new(svc))
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await
        .context("Comments gRPC server error")
}

/// Serve the `UploadService` until `shutdown` fires.
pub async fn serve_upload(addr: SocketAddr, svc: UploadGrpc, shutdown: CancellationToken) -> Result<()> {
    info!(addr = %addr, "Starting upload gRPC server");
    server()
        .add_service(
            pb::upload::upload_service_server::UploadServiceServer::new(svc)
                .max_decoding_message_size(8 * 1024 * 1024),
        )
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await
        .context("Upload gRPC server error")
}
