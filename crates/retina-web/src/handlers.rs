//! HTTP处理器

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use retina_core::{RetinaError, Role, User};
use serde_json::json;
use tracing::{error, info, warn};

use crate::auth::require_role;
use crate::server::AppState;

/// 处理器统一返回类型
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// HTTP层错误，包装核心错误并映射为状态码
#[derive(Debug)]
pub struct ApiError(pub RetinaError);

impl From<RetinaError> for ApiError {
    fn from(error: RetinaError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RetinaError::NotFound(_) => StatusCode::NOT_FOUND,
            RetinaError::Conflict(_) => StatusCode::CONFLICT,
            RetinaError::Invalid(_) | RetinaError::InvalidStateTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            RetinaError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RetinaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RetinaError::Permission(_) => StatusCode::FORBIDDEN,
            RetinaError::RemoteDeclined(_) => StatusCode::BAD_GATEWAY,
            RetinaError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RetinaError::Config(_)
            | RetinaError::Io(_)
            | RetinaError::Serialization(_)
            | RetinaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 错误处理
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }

        let body = Json(json!({
            "error": true,
            "message": self.0.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "retina-backend",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 统计数据（医生、管理员）
pub async fn analytics_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor, Role::Admin])?;
    info!("Analytics requested by {}", user.id);

    let totals = state.store.get_stats().await;
    let detections = state.store.get_detection_stats().await;

    Ok(Json(json!({
        "totals": totals,
        "detections": detections
    })))
}

/// 远程CNN服务健康检查（医生、管理员）
pub async fn cnn_health(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor, Role::Admin])?;

    state.detection.delegate().health().await?;
    Ok(Json(json!({
        "status": "healthy",
        "service": "cnn"
    })))
}
