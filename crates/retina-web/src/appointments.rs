//! 预约处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use retina_core::{AppointmentStatus, RetinaError, Role, User};
use retina_store::{AppointmentView, NewAppointment};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::handlers::ApiResult;
use crate::server::AppState;

/// 创建预约请求
#[derive(Debug, Deserialize)]
pub struct AppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// RFC3339
    pub appointment_date: String,
    pub duration: u32,
    #[serde(default)]
    pub notes: String,
}

/// 更新预约请求，缺省字段保持不变
#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_date: Option<String>,
    pub duration: Option<u32>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, RetinaError> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| RetinaError::Invalid("Invalid date format, expected RFC3339".to_string()))
}

/// 患者与医生只能操作自己参与的预约
async fn ensure_party(state: &AppState, user: &User, patient_id: Uuid, doctor_id: Uuid) -> ApiResult<()> {
    let allowed = match user.role {
        Role::Patient => state.store.get_patient_by_user_id(user.id).await?.patient.id == patient_id,
        Role::Doctor => state.store.get_doctor_by_user_id(user.id).await?.doctor.id == doctor_id,
        Role::Admin => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(RetinaError::Permission("Access denied".to_string()).into())
    }
}

async fn load_for_user(state: &AppState, user: &User, id: Uuid) -> ApiResult<AppointmentView> {
    let view = state.store.get_appointment_by_id(id).await?;
    ensure_party(state, user, view.appointment.patient_id, view.appointment.doctor_id).await?;
    Ok(view)
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<AppointmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let appointment_date = parse_date(&request.appointment_date)?;

    // 缺失的一方返回 404
    state.store.get_patient_by_id(request.patient_id).await?;
    state.store.get_doctor_by_id(request.doctor_id).await?;
    ensure_party(&state, &user, request.patient_id, request.doctor_id).await?;

    let appointment = state
        .store
        .create_appointment(NewAppointment {
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            appointment_date,
            duration_minutes: request.duration,
            notes: request.notes,
        })
        .await?;

    info!("Appointment {} created by {}", appointment.id, user.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Appointment created successfully",
            "appointment": appointment
        })),
    ))
}

/// 预约列表：患者与医生各看自己的，管理员看全部
pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let appointments = match user.role {
        Role::Patient => {
            let patient = state.store.get_patient_by_user_id(user.id).await?;
            state.store.get_appointments_by_patient_id(patient.patient.id).await?
        }
        Role::Doctor => {
            let doctor = state.store.get_doctor_by_user_id(user.id).await?;
            state.store.get_appointments_by_doctor_id(doctor.doctor.id).await?
        }
        Role::Admin => state.store.get_all_appointments().await?,
    };
    Ok(Json(json!({ "appointments": appointments })))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let appointment = load_for_user(&state, &user, id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut appointment = load_for_user(&state, &user, id).await?.appointment;

    if let Some(date) = request.appointment_date.filter(|s| !s.is_empty()) {
        appointment.appointment_date = parse_date(&date)?;
    }
    if let Some(duration) = request.duration {
        appointment.duration_minutes = duration;
    }
    if let Some(status) = request.status {
        // 只有医生与管理员可以完成预约
        if status == AppointmentStatus::Completed && user.role == Role::Patient {
            return Err(RetinaError::Permission("Only doctors can complete appointments".to_string()).into());
        }
        appointment.status = status;
    }
    if let Some(notes) = request.notes {
        appointment.notes = notes;
    }

    let appointment = state.store.update_appointment(appointment).await?;
    info!("Appointment {} updated by {}", appointment.id, user.id);
    Ok(Json(json!({
        "message": "Appointment updated successfully",
        "appointment": appointment
    })))
}

/// 取消预约
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut appointment = load_for_user(&state, &user, id).await?.appointment;

    match appointment.status {
        AppointmentStatus::Cancelled => {
            return Err(RetinaError::Invalid("Appointment is already cancelled".to_string()).into())
        }
        AppointmentStatus::Completed => {
            return Err(RetinaError::Invalid("Cannot cancel completed appointment".to_string()).into())
        }
        AppointmentStatus::Scheduled => appointment.status = AppointmentStatus::Cancelled,
    }

    let appointment = state.store.update_appointment(appointment).await?;
    info!("Appointment {} cancelled by {}", appointment.id, user.id);
    Ok(Json(json!({ "message": "Appointment cancelled successfully" })))
}
