use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use msgbridge_core::{MessageRequest, SessionError, SessionStatus};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::AppState;

/// Error reply of every route: a status code and `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(account: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Session not found for '{account}'"),
        )
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::InvalidAccount(_) => StatusCode::BAD_REQUEST,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::NotReady { .. } => StatusCode::REQUEST_TIMEOUT,
            SessionError::Store(_) | SessionError::Connection(_) => {
                error!("Request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// `GET /:account`: connects if needed and reports the pairing code or the
/// open session.
pub async fn session_status(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.manager.connect_and_wait(&account).await? {
        SessionStatus::Connected => Ok(Json(json!({ "connected": true }))),
        SessionStatus::PairingPending(pairing) => Ok(Json(json!({ "pairing": pairing }))),
        other => {
            warn!("Session for '{}' still {:?}", account, other);
            Err(ApiError::new(
                StatusCode::REQUEST_TIMEOUT,
                format!("Session for '{account}' is not ready"),
            ))
        }
    }
}

/// `GET /:account/:destination/message?text=&mediaType=&mediaPath=`
pub async fn send_message(
    State(state): State<AppState>,
    Path((account, destination)): Path<(String, String)>,
    Query(request): Query<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = request.into_message();
    debug!("Dispatching {:?} from '{}' to '{}'", message, account, destination);

    let result = if state.connect_on_send {
        state
            .manager
            .send_when_ready(&account, &destination, &message)
            .await
    } else {
        state.manager.send(&account, &destination, &message).await
    };

    match result {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        // no session could be established in time
        Err(SessionError::NotReady { .. }) => Err(ApiError::not_found(&account)),
        Err(e) => Err(e.into()),
    }
}

/// `GET /:account/close`: logs out and forgets the account.
pub async fn close_session(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.close(&account).await? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::not_found(&account))
    }
}
