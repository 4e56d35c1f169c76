use std::future::Future;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::data_model::UserId;
use crate::error::{RelayError, Result};
use crate::notifications::{NotificationRegistry, WebSocketPush};
use crate::services::PromptService;

pub const USER_ID_HEADER: &str = "x-user-id";

// Shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<PromptService>,
    pub notifications: Arc<NotificationRegistry>,
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidPromptPath | RelayError::Message(_) => StatusCode::BAD_REQUEST,
            RelayError::RawPromptNotFound | RelayError::PromptNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::RawPromptAlreadyExists => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "Request failed");
            RelayError::CannotProcessPrompt.to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Caller identity. Token verification happens in front of this service;
/// by the time a request arrives the user id is a trusted header (or, for
/// browser WebSockets that cannot set headers, a `user_id` query parameter).
pub struct CurrentUser(pub UserId);

fn parse_user_id(raw: &str) -> Option<UserId> {
    raw.trim().parse::<UserId>().ok().filter(|id| *id > 0)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_user_id);
        let from_query = || {
            parts.uri.query().and_then(|query| {
                query
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(key, _)| *key == "user_id")
                    .and_then(|(_, value)| parse_user_id(value))
            })
        };

        from_header
            .or_else(from_query)
            .map(CurrentUser)
            .ok_or((StatusCode::UNAUTHORIZED, "Missing or invalid user identity"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPromptRequest {
    pub key_path: String,
}

async fn presign_handler(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse> {
    let post = state.prompts.generate_presigned_post(user_id).await?;
    Ok(Json(post))
}

async fn confirm_handler(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<ConfirmPromptRequest>,
) -> Result<impl IntoResponse> {
    let prompt = state.prompts.confirm_prompt(&request.key_path, user_id).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

async fn result_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Response {
    ws.on_upgrade(move |socket| serve_result_socket(state.notifications, user_id, socket))
}

/// Registers the socket for pushes and holds it until the client goes away.
/// Client frames carry nothing; they are read only to notice the close.
async fn serve_result_socket(
    notifications: Arc<NotificationRegistry>,
    user_id: UserId,
    socket: WebSocket,
) {
    let (sink, mut stream) = socket.split();
    let id = match notifications
        .connect(user_id, Box::new(WebSocketPush::new(sink)))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(user_id, error = %e, "Could not register result socket");
            return;
        }
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(user_id, error = %e, "Result socket read error");
                break;
            }
        }
    }

    notifications.disconnect(user_id, id).await;
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/prompt/generate-s3-presigned-post", post(presign_handler))
        .route("/prompt/confirm", post(confirm_handler))
        .route("/prompt/result", get(result_socket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server<F>(state: AppState, bind: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind).await?;
    info!("listening on {}", bind);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MessageError, RepositoryError};

    #[test]
    fn business_errors_map_to_client_statuses() {
        assert_eq!(RelayError::InvalidPromptPath.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(RelayError::RawPromptNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(RelayError::RawPromptAlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            RelayError::Message(MessageError::Decode("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn infrastructure_errors_are_internal() {
        assert_eq!(
            RelayError::CannotProcessPrompt.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::TransportError("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Repository(RepositoryError::EmptyResult("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn user_id_must_be_positive_integer() {
        assert_eq!(parse_user_id("42"), Some(42));
        assert_eq!(parse_user_id(" 7 "), Some(7));
        assert_eq!(parse_user_id("0"), None);
        assert_eq!(parse_user_id("-3"), None);
        assert_eq!(parse_user_id("abc"), None);
    }
}
