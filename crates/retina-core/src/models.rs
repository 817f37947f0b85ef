//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RetinaError;

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RetinaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            other => Err(RetinaError::Invalid(format!("Unknown role: {}", other))),
        }
    }
}

/// 用户基本信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 患者档案
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: String,
    pub address: String,
    pub emergency_contact: String,
    pub medical_history: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 医生档案
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub license: String,
    pub specialization: String,
    pub experience: u32,
    pub hospital: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 眼别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    LeftEye,
    RightEye,
}

impl FromStr for ImageType {
    type Err = RetinaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left_eye" => Ok(ImageType::LeftEye),
            "right_eye" => Ok(ImageType::RightEye),
            other => Err(RetinaError::Invalid(format!(
                "image_type must be left_eye or right_eye, got {}",
                other
            ))),
        }
    }
}

/// 影像处理状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,     // 待分析
    Processed,   // 模拟检测完成
    CnnProcessed, // 远程CNN检测完成
    Error,       // 检测失败
}

/// 视网膜影像
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetinalImage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub image_type: ImageType,
    pub upload_date: DateTime<Utc>,
    pub notes: String,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 糖尿病视网膜病变分期
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DrStage {
    #[serde(rename = "No DR")]
    NoDr,
    Mild,
    Moderate,
    Severe,
    Proliferative,
}

impl DrStage {
    /// 有病变时可能出现的分期
    pub const POSITIVE: [DrStage; 4] = [
        DrStage::Mild,
        DrStage::Moderate,
        DrStage::Severe,
        DrStage::Proliferative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DrStage::NoDr => "No DR",
            DrStage::Mild => "Mild",
            DrStage::Moderate => "Moderate",
            DrStage::Severe => "Severe",
            DrStage::Proliferative => "Proliferative",
        }
    }
}

impl fmt::Display for DrStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本地模拟检测使用的模型版本标记，下游据此区分真实CNN结论
pub const SIMULATED_MODEL_VERSION: &str = "simulated-fallback";

/// 检测结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionResult {
    pub id: Uuid,
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
    pub reviewed_by: Option<Uuid>,
    pub review_date: Option<DateTime<Utc>>,
    pub review_notes: String,
    pub is_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DetectionResult {
    /// 是否来自本地模拟而非远程CNN
    pub fn is_simulated(&self) -> bool {
        self.model_version == SIMULATED_MODEL_VERSION
    }
}

/// 预约状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled, // 已预约
    Cancelled, // 已取消
    Completed, // 已完成
}

/// 预约信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&DrStage::NoDr).unwrap(), "\"No DR\"");
        assert_eq!(
            serde_json::to_string(&ImageStatus::CnnProcessed).unwrap(),
            "\"cnn_processed\""
        );
        assert_eq!(
            serde_json::from_str::<AppointmentStatus>("\"cancelled\"").unwrap(),
            AppointmentStatus::Cancelled
        );
        assert!("nurse".parse::<Role>().is_err());
        assert_eq!("right_eye".parse::<ImageType>().unwrap(), ImageType::RightEye);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "secret-hash".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            role: Role::Patient,
            phone: String::new(),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "patient");
    }
}
