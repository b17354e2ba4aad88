use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use super::pb::upload::upload_service_server::UploadService;
use super::pb::upload::{
    DeleteUploadRequest, DeleteUploadResponse, DownloadChunkRequest, DownloadChunkResponse,
    GetUploadInfoRequest, GetUploadInfoResponse, UploadFileChunk, UploadFileResponse,
};
use super::MAX_UPLOAD_BYTES;
use crate::db::{parse_db_time, UploadKind};
use crate::storage::{mime, UploadStore};

/// `UploadService` over the upload store.
#[derive(Clone)]
pub struct UploadGrpc {
    uploads: UploadStore,
}

impl UploadGrpc {
    #[must_use]
    pub fn new(uploads: UploadStore) -> Self {
        Self { uploads }
    }
}

impl std::fmt::Debug for UploadGrpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadGrpc").finish_non_exhaustive()
    }
}

/// Object path for a client-named file: `uploads/<uuid>.<ext>`.
fn storage_path(file_name: &str, data: &[u8]) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| mime::extension_for(mime::detect_mime(data)).to_string());
    format!("uploads/{}.{ext}", uuid::Uuid::new_v4())
}

#[tonic::async_trait]
impl UploadService for UploadGrpc {
    async fn upload_file(
        &self,
        request: Request<Streaming<UploadFileChunk>>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        let mut stream = request.into_inner();
        let mut data = Vec::new();
        let mut file_name = String::new();
        let mut file_type = String::new();
        let mut user_id = 0;

        while let Some(chunk) = stream.message().await? {
            if !chunk.file_name.is_empty() {
                file_name = chunk.file_name;
            }
            if !chunk.file_type.is_empty() {
                file_type = chunk.file_type;
            }
            if chunk.user_id != 0 {
                user_id = chunk.user_id;
            }
            if data.len() + chunk.data.len() > MAX_UPLOAD_BYTES {
                return Err(Status::resource_exhausted("upload is too large"));
            }
            data.extend_from_slice(&chunk.data);
        }

        let path = storage_path(&file_name, &data);
        let kind = UploadKind::from_str(&file_type);
        let owner = (user_id != 0).then_some(user_id);
        let id = self.uploads.upload(&path, &data, kind, owner).await?;

        info!(upload_id = id, path = %path, kind = kind.as_str(), size = data.len(), "Received upload");
        Ok(Response::new(UploadFileResponse { id, file_path: path }))
    }

    async fn download_chunk(
        &self,
        request: Request<DownloadChunkRequest>,
    ) -> Result<Response<DownloadChunkResponse>, Status> {
        let req = request.into_inner();
        let read = self.uploads.read_range(req.id, req.offset, req.length).await?;
        Ok(Response::new(DownloadChunkResponse {
            data: read.data,
            offset: read.offset,
            total_size: read.total_size,
        }))
    }

    async fn get_upload_info(
        &self,
        request: Request<GetUploadInfoRequest>,
    ) -> Result<Response<GetUploadInfoResponse>, Status> {
        let upload = self.uploads.info(request.into_inner().id).await?;
        let created_at = parse_db_time(&upload.created_at)
            .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_default();

        Ok(Response::new(GetUploadInfoResponse {
            id: upload.id,
            file_path: upload.path,
            file_type: upload.file_type,
            user_id: upload.user_id.unwrap_or(0),
            size: upload.size,
            created_at,
        }))
    }

    async fn delete_upload(
        &self,
        request: Request<DeleteUploadRequest>,
    ) -> Result<Response<DeleteUploadResponse>, Status> {
        let id = request.into_inner().id;
        let success = self.uploads.delete(id).await?;
        if success {
            info!(upload_id = id, "Deleted upload");
        }
        Ok(Response::new(DeleteUploadResponse { success }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path_keeps_clean_extension() {
        let path = storage_path("Holiday Photo.JPG", b"");
        assert!(path.starts_with("uploads/"));
        assert!(path.ends_with(".jpg"));
    }

    #[test]
    fn test_storage_path_sniffs_when_name_has_no_extension() {
        let png = b"\x89PNG\r\n\x1a\n0000";
        assert!(storage_path("image", png).ends_with(".png"));
        assert!(storage_path("weird.ex/t", png).ends_with(".png"));
    }
}
