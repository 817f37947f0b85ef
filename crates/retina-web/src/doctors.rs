//! 医生相关处理器

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use retina_core::{RetinaError, Role, User};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::require_role;
use crate::handlers::ApiResult;
use crate::server::AppState;

/// 医生档案更新请求
#[derive(Debug, Deserialize)]
pub struct DoctorProfileRequest {
    pub license: String,
    #[serde(default)]
    pub specialization: String,
    #[serde(default)]
    pub experience: u32,
    #[serde(default)]
    pub hospital: String,
}

pub async fn list_doctors(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let doctors = state.store.get_all_doctors().await?;
    Ok(Json(json!({ "doctors": doctors })))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let doctor = state.store.get_doctor_by_id(id).await?;
    Ok(Json(json!({ "doctor": doctor })))
}

/// 获取当前医生档案
pub async fn get_doctor_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor])?;
    let doctor = state.store.get_doctor_by_user_id(user.id).await?;
    Ok(Json(json!({ "doctor": doctor })))
}

/// 更新当前医生档案，执照号必填
pub async fn update_doctor_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<DoctorProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor])?;
    if request.license.trim().is_empty() {
        return Err(RetinaError::Invalid("license is required".to_string()).into());
    }

    let mut doctor = state.store.get_doctor_by_user_id(user.id).await?.doctor;
    doctor.license = request.license;
    doctor.specialization = request.specialization;
    doctor.experience = request.experience;
    doctor.hospital = request.hospital;

    let updated = state.store.update_doctor(doctor).await?;
    info!("Doctor profile {} updated", updated.id);
    let doctor = state.store.get_doctor_by_id(updated.id).await?;
    Ok(Json(json!({ "doctor": doctor })))
}
