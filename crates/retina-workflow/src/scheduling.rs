//! 预约排期规则

use chrono::{DateTime, Utc};
use retina_core::{Appointment, AppointmentStatus, Result, RetinaError};

/// 最短预约时长（分钟）
pub const MIN_DURATION_MINUTES: u32 = 15;
/// 最长预约时长（分钟）
pub const MAX_DURATION_MINUTES: u32 = 120;

/// 预约时段规则
pub struct SlotRules;

impl SlotRules {
    /// 时长必须落在 [15, 120] 分钟内
    pub fn check_duration(minutes: u32) -> Result<()> {
        if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
            Ok(())
        } else {
            Err(RetinaError::Invalid(format!(
                "Appointment duration must be between {} and {} minutes, got {}",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES, minutes
            )))
        }
    }

    /// 预约时间必须严格晚于当前时间
    pub fn check_future(date: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if date > now {
            Ok(())
        } else {
            Err(RetinaError::Invalid(
                "Appointment date must be in the future".to_string(),
            ))
        }
    }

    /// 同一医生同一时刻的未取消预约视为冲突
    pub fn conflicts(existing: &Appointment, candidate: &Appointment) -> bool {
        existing.id != candidate.id
            && existing.doctor_id == candidate.doctor_id
            && existing.appointment_date == candidate.appointment_date
            && existing.status != AppointmentStatus::Cancelled
            && candidate.status != AppointmentStatus::Cancelled
    }
}
