//! 存储模型
//!
//! 草稿（插入模型）用于创建新记录，视图为读取时附带关联实体的聚合结果。

use chrono::{DateTime, NaiveDate, Utc};
use retina_core::models::*;
use serde::Serialize;
use uuid::Uuid;

// 插入模型 - 用于创建新记录，标识符与时间戳由存储分配

/// 新用户插入模型
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone: String,
}

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub user_id: Uuid,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: String,
    pub address: String,
    pub emergency_contact: String,
    pub medical_history: String,
}

impl NewPatient {
    /// 注册时创建的空档案
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id,
            date_of_birth: None,
            gender: String::new(),
            address: String::new(),
            emergency_contact: String::new(),
            medical_history: String::new(),
        }
    }
}

/// 新医生插入模型
#[derive(Debug, Clone)]
pub struct NewDoctor {
    pub user_id: Uuid,
    pub license: String,
    pub specialization: String,
    pub experience: u32,
    pub hospital: String,
}

impl NewDoctor {
    /// 注册时创建的空档案
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id,
            license: String::new(),
            specialization: String::new(),
            experience: 0,
            hospital: String::new(),
        }
    }
}

/// 新影像插入模型
#[derive(Debug, Clone)]
pub struct NewImage {
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub image_type: ImageType,
    pub notes: String,
}

/// 新检测结果插入模型
#[derive(Debug, Clone)]
pub struct NewDetectionResult {
    pub image_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub has_dr: bool,
    pub dr_stage: DrStage,
    pub confidence: f64,
    pub has_macular_edema: bool,
    pub has_hemorrhages: bool,
    pub has_exudates: bool,
    pub has_microaneurysms: bool,
    pub analysis_date: DateTime<Utc>,
    pub processing_time: f64,
    pub model_version: String,
}

/// 新预约插入模型
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub notes: String,
}

// 聚合视图 - 读取时即时拼装，不做缓存

/// 附带用户信息的患者
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientView {
    #[serde(flatten)]
    pub patient: Patient,
    pub user: Option<User>,
}

/// 附带用户信息的医生
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DoctorView {
    #[serde(flatten)]
    pub doctor: Doctor,
    pub user: Option<User>,
}

/// 附带患者与上传医生的影像
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageView {
    #[serde(flatten)]
    pub image: RetinalImage,
    pub patient: Option<PatientView>,
    pub doctor: Option<DoctorView>,
}

/// 附带影像与分析医生的检测结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectionResultView {
    #[serde(flatten)]
    pub result: DetectionResult,
    pub image: Option<RetinalImage>,
    pub doctor: Option<DoctorView>,
}

/// 附带患者与医生的预约
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<PatientView>,
    pub doctor: Option<DoctorView>,
}

/// 各表当前记录数（同一时刻的快照）
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total_users: usize,
    pub total_patients: usize,
    pub total_doctors: usize,
    pub total_images: usize,
    pub total_appointments: usize,
    pub total_detections: usize,
}

/// 检测结果统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectionStats {
    pub total_detections: usize,
    pub positive_detections: usize,
    pub negative_detections: usize,
    pub simulated_detections: usize,
    pub confirmed_detections: usize,
    pub average_confidence: f64,
    pub average_processing_time: f64,
}
