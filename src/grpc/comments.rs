use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::debug;

use super::pb::comments::comments_server::Comments;
use super::pb::comments::{AffectedComment, SubscribeRequest};
use crate::auth::TokenVerifier;
use crate::gateway::Gateway;

type AffectedStream = Pin<Box<dyn Stream<Item = Result<AffectedComment, Status>> + Send + 'static>>;

/// `Comments.Subscribe` backed by the subscription gateway.
#[derive(Clone)]
pub struct CommentsGrpc {
    gateway: Gateway,
    verifier: TokenVerifier,
}

impl CommentsGrpc {
    #[must_use]
    pub fn new(gateway: Gateway, verifier: TokenVerifier) -> Self {
        Self { gateway, verifier }
    }
}

impl std::fmt::Debug for CommentsGrpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentsGrpc").finish_non_exhaustive()
    }
}

/// Resolve the caller from `authorization: Bearer <token>` metadata.
pub(crate) fn authorize(verifier: &TokenVerifier, metadata: &MetadataMap) -> Result<i64, Status> {
    let token = metadata
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Status::unauthenticated("missing bearer token"))?;

    verifier
        .verify(token)
        .map_err(|_| Status::unauthenticated("invalid or expired token"))
}

#[tonic::async_trait]
impl Comments for CommentsGrpc {
    type SubscribeStream = AffectedStream;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let user_id = authorize(&self.verifier, request.metadata())?;
        let req = request.into_inner();
        let post = (req.post_union_id != 0).then_some(req.post_union_id);

        let feed = self.gateway.open(req.team_id, user_id, post).await?;
        debug!(team_id = req.team_id, user_id, post_id = req.post_union_id, "gRPC comment subscription opened");

        let stream = feed.into_stream().map(|item| {
            item.map(|affected| AffectedComment {
                id: affected.comment_id,
                r#type: affected.kind.as_str().to_string(),
            })
            .map_err(Status::from)
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sign_token;

    #[test]
    fn test_authorize_reads_bearer_metadata() {
        let verifier = TokenVerifier::new("secret");
        let token = sign_token("secret", 7, chrono::Duration::hours(1)).unwrap();

        let mut metadata = MetadataMap::new();
        metadata.insert("authorization", format!("Bearer {token}").parse().unwrap());
        assert_eq!(authorize(&verifier, &metadata).unwrap(), 7);

        let empty = MetadataMap::new();
        assert_eq!(
            authorize(&verifier, &empty).unwrap_err().code(),
            tonic::Code::Unauthenticated
        );

        let mut bad = MetadataMap::new();
        bad.insert("authorization", "Bearer nope".parse().unwrap());
        assert_eq!(
            authorize(&verifier, &bad).unwrap_err().code(),
            tonic::Code::Unauthenticated
        );
    }
}
