//! 影像上传、检测与复核处理器

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use retina_core::{ImageType, RetinaError, Role, User};
use retina_store::{ImageView, NewImage};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::require_role;
use crate::handlers::ApiResult;
use crate::patients::ensure_patient_access;
use crate::server::AppState;

/// 检测请求
#[derive(Debug, Deserialize)]
pub struct DetectionRequest {
    pub image_id: Uuid,
}

/// 检测结果复核请求
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub is_confirmed: bool,
    #[serde(default)]
    pub review_notes: String,
}

/// 上传表单
#[derive(Default)]
struct UploadForm {
    file: Option<(String, Bytes)>,
    image_type: Option<String>,
    notes: String,
    patient_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();
    let malformed = |e: axum::extract::multipart::MultipartError| {
        RetinaError::Invalid(format!("Malformed multipart body: {}", e))
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let data = field.bytes().await.map_err(malformed)?;
                form.file = Some((file_name, data));
            }
            "image_type" => form.image_type = Some(field.text().await.map_err(malformed)?),
            "notes" => form.notes = field.text().await.map_err(malformed)?,
            "patient_id" => form.patient_id = Some(field.text().await.map_err(malformed)?),
            _ => {}
        }
    }
    Ok(form)
}

fn file_extension(file_name: &str) -> Option<String> {
    FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn content_type_for(path: &str) -> &'static str {
    match file_extension(path).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// 患者只能访问自己的影像
async fn ensure_image_access(state: &AppState, user: &User, image: &ImageView) -> ApiResult<()> {
    ensure_patient_access(state, user, image.image.patient_id).await
}

/// 上传影像
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = read_upload_form(multipart).await?;
    let upload = &state.config.upload;

    let (file_name, data) = form
        .file
        .ok_or_else(|| RetinaError::Invalid("No image file provided".to_string()))?;
    if data.len() as u64 > upload.max_file_size {
        return Err(RetinaError::Invalid("File too large".to_string()).into());
    }
    let extension = file_extension(&file_name)
        .filter(|ext| upload.allowed_extensions.iter().any(|allowed| allowed == ext))
        .ok_or_else(|| RetinaError::Invalid("Invalid file type".to_string()))?;

    let image_type: ImageType = form
        .image_type
        .ok_or_else(|| RetinaError::Invalid("image_type is required".to_string()))?
        .parse()?;

    let requested_patient = form
        .patient_id
        .filter(|id| !id.is_empty())
        .map(|id| {
            Uuid::parse_str(&id).map_err(|_| RetinaError::Invalid("Invalid patient ID".to_string()))
        })
        .transpose()?;

    let (patient_id, doctor_id) = match user.role {
        Role::Patient => (state.store.get_patient_by_user_id(user.id).await?.patient.id, None),
        Role::Doctor | Role::Admin => {
            let patient_id = requested_patient.ok_or_else(|| {
                RetinaError::Invalid("Patient ID required for doctor uploads".to_string())
            })?;
            state.store.get_patient_by_id(patient_id).await?;
            let doctor_id = if user.role == Role::Doctor {
                Some(state.store.get_doctor_by_user_id(user.id).await?.doctor.id)
            } else {
                None
            };
            (patient_id, doctor_id)
        }
    };

    let upload_dir = PathBuf::from(&upload.upload_dir);
    tokio::fs::create_dir_all(&upload_dir).await.map_err(RetinaError::from)?;
    let stored_path = upload_dir.join(format!("{}.{}", Uuid::new_v4(), extension));
    tokio::fs::write(&stored_path, &data).await.map_err(RetinaError::from)?;

    let draft = NewImage {
        patient_id,
        doctor_id,
        file_name,
        file_path: stored_path.to_string_lossy().to_string(),
        file_size: data.len() as u64,
        image_type,
        notes: form.notes,
    };
    let image = match state.store.create_image(draft).await {
        Ok(image) => image,
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&stored_path).await {
                warn!("Failed to remove orphaned upload {}: {}", stored_path.display(), remove_err);
            }
            return Err(e.into());
        }
    };

    info!("Image {} uploaded for patient {}", image.id, image.patient_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Image uploaded successfully",
            "image": image
        })),
    ))
}

/// 对影像执行糖网检测
pub async fn detect_image(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<DetectionRequest>,
) -> ApiResult<impl IntoResponse> {
    let image = state.store.get_image_by_id(request.image_id).await?;
    ensure_image_access(&state, &user, &image).await?;

    let analyst = if user.role == Role::Doctor {
        state
            .store
            .get_doctor_by_user_id(user.id)
            .await
            .ok()
            .map(|view| view.doctor.id)
    } else {
        None
    };

    info!("Detection requested for image {} by {}", image.image.id, user.id);
    let report = state.detection.run(image.image.id, analyst).await?;

    Ok(Json(json!({
        "message": "Detection completed successfully",
        "result": report.result,
        "image_status": report.image_status,
        "source": report.source,
        "metrics": report.metrics
    })))
}

/// 影像列表：患者仅本人，医生与管理员全部
pub async fn list_images(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let images = match user.role {
        Role::Patient => {
            let patient = state.store.get_patient_by_user_id(user.id).await?;
            state.store.get_images_by_patient_id(patient.patient.id).await?
        }
        Role::Doctor | Role::Admin => state.store.get_all_images().await?,
    };
    Ok(Json(json!({ "images": images })))
}

/// 影像详情及其全部检测结果
pub async fn get_image(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let image = state.store.get_image_by_id(id).await?;
    ensure_image_access(&state, &user, &image).await?;

    let results = state.store.get_detection_results_by_image_id(id).await?;
    Ok(Json(json!({
        "image": image,
        "results": results
    })))
}

/// 返回影像文件内容
pub async fn serve_image_file(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let image = state.store.get_image_by_id(id).await?;
    ensure_image_access(&state, &user, &image).await?;

    let data = tokio::fs::read(&image.image.file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RetinaError::NotFound("Image file not found".to_string())
        } else {
            RetinaError::Io(e)
        }
    })?;

    Ok((
        [(header::CONTENT_TYPE, content_type_for(&image.image.file_path))],
        data,
    ))
}

/// 医生复核检测结果
pub async fn review_result(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&user, &[Role::Doctor])?;
    let doctor = state.store.get_doctor_by_user_id(user.id).await?;

    let mut result = state.store.get_detection_result_by_id(id).await?.result;
    result.reviewed_by = Some(doctor.doctor.id);
    result.review_date = Some(chrono::Utc::now());
    result.review_notes = request.review_notes;
    result.is_confirmed = request.is_confirmed;

    let updated = state.store.update_detection_result(result).await?;
    info!("Detection result {} reviewed by doctor {}", updated.id, doctor.doctor.id);
    Ok(Json(json!({ "result": updated })))
}
