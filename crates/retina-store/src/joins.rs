//! 关联实体拼装
//!
//! 所有函数都在调用方已持有的读/写锁内执行，只接收表的借用，不得再次加锁。

use retina_core::models::*;

use crate::models::{AppointmentView, DetectionResultView, DoctorView, ImageView, PatientView};
use crate::store::Tables;

/// 患者 + 所属用户
pub(crate) fn patient_view(tables: &Tables, patient: &Patient) -> PatientView {
    PatientView {
        patient: patient.clone(),
        user: tables.users.get(&patient.user_id).cloned(),
    }
}

/// 医生 + 所属用户
pub(crate) fn doctor_view(tables: &Tables, doctor: &Doctor) -> DoctorView {
    DoctorView {
        doctor: doctor.clone(),
        user: tables.users.get(&doctor.user_id).cloned(),
    }
}

/// 影像 + 患者(含用户) + 上传医生(含用户)
pub(crate) fn image_view(tables: &Tables, image: &RetinalImage) -> ImageView {
    ImageView {
        image: image.clone(),
        patient: tables
            .patients
            .get(&image.patient_id)
            .map(|patient| patient_view(tables, patient)),
        doctor: image
            .doctor_id
            .and_then(|id| tables.doctors.get(&id))
            .map(|doctor| doctor_view(tables, doctor)),
    }
}

/// 检测结果 + 影像 + 分析医生
pub(crate) fn detection_result_view(tables: &Tables, result: &DetectionResult) -> DetectionResultView {
    DetectionResultView {
        result: result.clone(),
        image: tables.images.get(&result.image_id).cloned(),
        doctor: result
            .doctor_id
            .and_then(|id| tables.doctors.get(&id))
            .map(|doctor| doctor_view(tables, doctor)),
    }
}

/// 预约 + 患者(含用户) + 医生(含用户)
pub(crate) fn appointment_view(tables: &Tables, appointment: &Appointment) -> AppointmentView {
    AppointmentView {
        appointment: appointment.clone(),
        patient: tables
            .patients
            .get(&appointment.patient_id)
            .map(|patient| patient_view(tables, patient)),
        doctor: tables
            .doctors
            .get(&appointment.doctor_id)
            .map(|doctor| doctor_view(tables, doctor)),
    }
}
