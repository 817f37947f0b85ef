//! 患者相关处理器

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::NaiveDate;
use retina_core::{RetinaError, Role, User};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::require_role;
use crate::handlers::ApiResult;
use crate::server::AppState;

/// 患者档案更新请求
#[derive(Debug, Deserialize)]
pub struct PatientProfileRequest {
    /// YYYY-MM-DD
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub medical_history: Option<String>,
}

/// 患者只能访问自己的档案
pub(crate) async fn ensure_patient_access(state: &AppState, user: &User, patient_id: Uuid) -> ApiResult<()> {
    if user.role == Role::Patient {
        let own = state.store.get_patient_by_user_id(user.id).await?;
        if own.patient.id != patient_id {
            return Err(RetinaError::Permission("Access denied".to_string()).into());
        }
    }
    Ok(())
}

/// 获取当前患者档案
pub async fn get_patient_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Patient])?;
    let patient = state.store.get_patient_by_user_id(user.id).await?;
    Ok(Json(json!({ "patient": patient })))
}

/// 更新当前患者档案
pub async fn update_patient_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<PatientProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Patient])?;
    let mut patient = state.store.get_patient_by_user_id(user.id).await?.patient;

    if let Some(date) = request.date_of_birth.filter(|s| !s.is_empty()) {
        let parsed = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|_| RetinaError::Invalid("Invalid date format, expected YYYY-MM-DD".to_string()))?;
        patient.date_of_birth = Some(parsed);
    }
    if let Some(gender) = request.gender {
        patient.gender = gender;
    }
    if let Some(address) = request.address {
        patient.address = address;
    }
    if let Some(contact) = request.emergency_contact {
        patient.emergency_contact = contact;
    }
    if let Some(history) = request.medical_history {
        patient.medical_history = history;
    }

    let updated = state.store.update_patient(patient).await?;
    info!("Patient profile {} updated", updated.id);
    let patient = state.store.get_patient_by_id(updated.id).await?;
    Ok(Json(json!({ "patient": patient })))
}

/// 患者列表（医生、管理员）
pub async fn list_patients(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor, Role::Admin])?;
    let patients = state.store.get_all_patients().await?;
    Ok(Json(json!({ "patients": patients })))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_patient_access(&state, &user, id).await?;
    let patient = state.store.get_patient_by_id(id).await?;
    Ok(Json(json!({ "patient": patient })))
}

/// 患者的全部影像
pub async fn get_patient_images(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_patient_access(&state, &user, id).await?;
    state.store.get_patient_by_id(id).await?;
    let images = state.store.get_images_by_patient_id(id).await?;
    Ok(Json(json!({ "images": images })))
}
