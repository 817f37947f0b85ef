//! 实体存储
//!
//! 六张内存表共用一把读写锁：写操作独占，读操作共享。关联拼装在同一把锁内完成，
//! 读取结果均为克隆副本，调用方修改后需通过 `update_*` 写回。

use chrono::Utc;
use retina_core::models::*;
use retina_core::utils::{advance_timestamp, generate_id};
use retina_core::{Result, RetinaError};
use retina_workflow::{ImageEvent, SlotRules, StateMachine};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::joins;
use crate::models::*;

/// 受锁保护的全部表
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) users: HashMap<Uuid, User>,
    pub(crate) user_by_email: HashMap<String, Uuid>,
    pub(crate) patients: HashMap<Uuid, Patient>,
    pub(crate) doctors: HashMap<Uuid, Doctor>,
    pub(crate) images: HashMap<Uuid, RetinalImage>,
    pub(crate) detection_results: HashMap<Uuid, DetectionResult>,
    pub(crate) appointments: HashMap<Uuid, Appointment>,
}

impl Tables {
    fn require_user(&self, id: Uuid) -> Result<()> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(RetinaError::Invalid(format!("User {} does not exist", id)))
        }
    }

    fn require_patient(&self, id: Uuid) -> Result<()> {
        if self.patients.contains_key(&id) {
            Ok(())
        } else {
            Err(RetinaError::Invalid(format!("Patient {} does not exist", id)))
        }
    }

    fn require_doctor(&self, id: Uuid) -> Result<()> {
        if self.doctors.contains_key(&id) {
            Ok(())
        } else {
            Err(RetinaError::Invalid(format!("Doctor {} does not exist", id)))
        }
    }

    fn require_image(&self, id: Uuid) -> Result<()> {
        if self.images.contains_key(&id) {
            Ok(())
        } else {
            Err(RetinaError::Invalid(format!("Image {} does not exist", id)))
        }
    }

    /// 按影像状态机推进状态，基于表内当前状态而非调用方副本
    fn advance_image(&mut self, id: Uuid, event: ImageEvent) -> Result<RetinalImage> {
        let image = self
            .images
            .get_mut(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Image {} not found", id)))?;

        let next = StateMachine::image_detection().transition(image.status, event)?;
        image.status = next;
        image.updated_at = advance_timestamp(image.updated_at);
        Ok(image.clone())
    }

    fn insert_detection_result(&mut self, draft: NewDetectionResult) -> Result<DetectionResult> {
        check_confidence(draft.confidence)?;
        self.require_image(draft.image_id)?;
        if let Some(doctor_id) = draft.doctor_id {
            self.require_doctor(doctor_id)?;
        }

        let now = Utc::now();
        let result = DetectionResult {
            id: generate_id(),
            image_id: draft.image_id,
            doctor_id: draft.doctor_id,
            has_dr: draft.has_dr,
            dr_stage: draft.dr_stage,
            confidence: draft.confidence,
            has_macular_edema: draft.has_macular_edema,
            has_hemorrhages: draft.has_hemorrhages,
            has_exudates: draft.has_exudates,
            has_microaneurysms: draft.has_microaneurysms,
            analysis_date: draft.analysis_date,
            processing_time: draft.processing_time,
            model_version: draft.model_version,
            reviewed_by: None,
            review_date: None,
            review_notes: String::new(),
            is_confirmed: false,
            created_at: now,
            updated_at: now,
        };
        self.detection_results.insert(result.id, result.clone());
        Ok(result)
    }

    fn check_doctor_slot(&self, candidate: &Appointment) -> Result<()> {
        if self
            .appointments
            .values()
            .any(|existing| SlotRules::conflicts(existing, candidate))
        {
            return Err(RetinaError::Conflict(
                "Doctor has another appointment at this time".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_confidence(confidence: f64) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(RetinaError::Invalid(format!(
            "Confidence must lie in [0,1], got {}",
            confidence
        )))
    }
}

/// 进程内实体存储
#[derive(Debug, Default)]
pub struct EntityStore {
    tables: RwLock<Tables>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // 用户
    // ---------------------------------------------------------------------

    /// 创建用户；邮箱唯一性在写锁内检查并插入
    pub async fn create_user(&self, draft: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;

        if tables.user_by_email.contains_key(&draft.email) {
            return Err(RetinaError::Conflict(format!(
                "User with email {} already exists",
                draft.email
            )));
        }

        let now = Utc::now();
        let user = User {
            id: generate_id(),
            email: draft.email,
            password_hash: draft.password_hash,
            first_name: draft.first_name,
            last_name: draft.last_name,
            role: draft.role,
            phone: draft.phone,
            created_at: now,
            updated_at: now,
        };

        tables.user_by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());

        info!("Created user {} with role {}", user.id, user.role);
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RetinaError::NotFound(format!("User {} not found", id)))
    }

    /// 通过邮箱二级索引查找
    pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
        let tables = self.tables.read().await;
        tables
            .user_by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned()
            .ok_or_else(|| RetinaError::NotFound(format!("User {} not found", email)))
    }

    /// 覆盖用户记录；角色与创建时间保持不变，邮箱变更时重建索引
    pub async fn update_user(&self, user: User) -> Result<User> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .users
            .get(&user.id)
            .cloned()
            .ok_or_else(|| RetinaError::NotFound(format!("User {} not found", user.id)))?;

        if user.email != existing.email {
            if let Some(owner) = tables.user_by_email.get(&user.email) {
                if *owner != user.id {
                    return Err(RetinaError::Conflict(format!(
                        "User with email {} already exists",
                        user.email
                    )));
                }
            }
            tables.user_by_email.remove(&existing.email);
            tables.user_by_email.insert(user.email.clone(), user.id);
        }

        let updated = User {
            role: existing.role,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..user
        };
        tables.users.insert(updated.id, updated.clone());

        debug!("Updated user {}", updated.id);
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // 患者
    // ---------------------------------------------------------------------

    pub async fn create_patient(&self, draft: NewPatient) -> Result<Patient> {
        let mut tables = self.tables.write().await;
        tables.require_user(draft.user_id)?;

        let now = Utc::now();
        let patient = Patient {
            id: generate_id(),
            user_id: draft.user_id,
            date_of_birth: draft.date_of_birth,
            gender: draft.gender,
            address: draft.address,
            emergency_contact: draft.emergency_contact,
            medical_history: draft.medical_history,
            created_at: now,
            updated_at: now,
        };
        tables.patients.insert(patient.id, patient.clone());

        info!("Created patient {} for user {}", patient.id, patient.user_id);
        Ok(patient)
    }

    pub async fn get_patient_by_id(&self, id: Uuid) -> Result<PatientView> {
        let tables = self.tables.read().await;
        let patient = tables
            .patients
            .get(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Patient {} not found", id)))?;
        Ok(joins::patient_view(&tables, patient))
    }

    pub async fn get_patient_by_user_id(&self, user_id: Uuid) -> Result<PatientView> {
        let tables = self.tables.read().await;
        let patient = tables
            .patients
            .values()
            .find(|patient| patient.user_id == user_id)
            .ok_or_else(|| {
                RetinaError::NotFound(format!("Patient profile for user {} not found", user_id))
            })?;
        Ok(joins::patient_view(&tables, patient))
    }

    pub async fn get_all_patients(&self) -> Result<Vec<PatientView>> {
        let tables = self.tables.read().await;
        let mut patients: Vec<PatientView> = tables
            .patients
            .values()
            .map(|patient| joins::patient_view(&tables, patient))
            .collect();
        patients.sort_by_key(|view| view.patient.created_at);
        Ok(patients)
    }

    /// 覆盖患者档案；所属用户与创建时间保持不变
    pub async fn update_patient(&self, patient: Patient) -> Result<Patient> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .patients
            .get(&patient.id)
            .ok_or_else(|| RetinaError::NotFound(format!("Patient {} not found", patient.id)))?;

        let updated = Patient {
            user_id: existing.user_id,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..patient
        };
        tables.patients.insert(updated.id, updated.clone());

        debug!("Updated patient {}", updated.id);
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // 医生
    // ---------------------------------------------------------------------

    pub async fn create_doctor(&self, draft: NewDoctor) -> Result<Doctor> {
        let mut tables = self.tables.write().await;
        tables.require_user(draft.user_id)?;

        let now = Utc::now();
        let doctor = Doctor {
            id: generate_id(),
            user_id: draft.user_id,
            license: draft.license,
            specialization: draft.specialization,
            experience: draft.experience,
            hospital: draft.hospital,
            created_at: now,
            updated_at: now,
        };
        tables.doctors.insert(doctor.id, doctor.clone());

        info!("Created doctor {} for user {}", doctor.id, doctor.user_id);
        Ok(doctor)
    }

    pub async fn get_doctor_by_id(&self, id: Uuid) -> Result<DoctorView> {
        let tables = self.tables.read().await;
        let doctor = tables
            .doctors
            .get(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Doctor {} not found", id)))?;
        Ok(joins::doctor_view(&tables, doctor))
    }

    pub async fn get_doctor_by_user_id(&self, user_id: Uuid) -> Result<DoctorView> {
        let tables = self.tables.read().await;
        let doctor = tables
            .doctors
            .values()
            .find(|doctor| doctor.user_id == user_id)
            .ok_or_else(|| {
                RetinaError::NotFound(format!("Doctor profile for user {} not found", user_id))
            })?;
        Ok(joins::doctor_view(&tables, doctor))
    }

    pub async fn get_all_doctors(&self) -> Result<Vec<DoctorView>> {
        let tables = self.tables.read().await;
        let mut doctors: Vec<DoctorView> = tables
            .doctors
            .values()
            .map(|doctor| joins::doctor_view(&tables, doctor))
            .collect();
        doctors.sort_by_key(|view| view.doctor.created_at);
        Ok(doctors)
    }

    pub async fn update_doctor(&self, doctor: Doctor) -> Result<Doctor> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .doctors
            .get(&doctor.id)
            .ok_or_else(|| RetinaError::NotFound(format!("Doctor {} not found", doctor.id)))?;

        let updated = Doctor {
            user_id: existing.user_id,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..doctor
        };
        tables.doctors.insert(updated.id, updated.clone());

        debug!("Updated doctor {}", updated.id);
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // 影像
    // ---------------------------------------------------------------------

    pub async fn create_image(&self, draft: NewImage) -> Result<RetinalImage> {
        let mut tables = self.tables.write().await;
        tables.require_patient(draft.patient_id)?;
        if let Some(doctor_id) = draft.doctor_id {
            tables.require_doctor(doctor_id)?;
        }

        let now = Utc::now();
        let image = RetinalImage {
            id: generate_id(),
            patient_id: draft.patient_id,
            doctor_id: draft.doctor_id,
            file_name: draft.file_name,
            file_path: draft.file_path,
            file_size: draft.file_size,
            image_type: draft.image_type,
            upload_date: now,
            notes: draft.notes,
            status: ImageStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables.images.insert(image.id, image.clone());

        info!("Created image {} for patient {}", image.id, image.patient_id);
        Ok(image)
    }

    pub async fn get_image_by_id(&self, id: Uuid) -> Result<ImageView> {
        let tables = self.tables.read().await;
        let image = tables
            .images
            .get(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Image {} not found", id)))?;
        Ok(joins::image_view(&tables, image))
    }

    pub async fn get_images_by_patient_id(&self, patient_id: Uuid) -> Result<Vec<ImageView>> {
        let tables = self.tables.read().await;
        let mut images: Vec<ImageView> = tables
            .images
            .values()
            .filter(|image| image.patient_id == patient_id)
            .map(|image| joins::image_view(&tables, image))
            .collect();
        images.sort_by_key(|view| view.image.upload_date);
        Ok(images)
    }

    pub async fn get_all_images(&self) -> Result<Vec<ImageView>> {
        let tables = self.tables.read().await;
        let mut images: Vec<ImageView> = tables
            .images
            .values()
            .map(|image| joins::image_view(&tables, image))
            .collect();
        images.sort_by_key(|view| view.image.upload_date);
        Ok(images)
    }

    /// 覆盖影像记录；所属患者、上传时间与创建时间保持不变
    ///
    /// 状态只经检测状态机推进，这里沿用存储中的状态。
    pub async fn update_image(&self, image: RetinalImage) -> Result<RetinalImage> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .images
            .get(&image.id)
            .ok_or_else(|| RetinaError::NotFound(format!("Image {} not found", image.id)))?;

        let updated = RetinalImage {
            patient_id: existing.patient_id,
            upload_date: existing.upload_date,
            status: existing.status,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..image
        };
        if let Some(doctor_id) = updated.doctor_id {
            tables.require_doctor(doctor_id)?;
        }
        tables.images.insert(updated.id, updated.clone());

        debug!("Updated image {} (status {:?})", updated.id, updated.status);
        Ok(updated)
    }

    /// 开启一次检测尝试：pending 保持不变，其余状态经 reanalyze 回到 pending
    pub async fn reopen_image(&self, id: Uuid) -> Result<RetinalImage> {
        let mut tables = self.tables.write().await;

        let status = tables
            .images
            .get(&id)
            .map(|image| image.status)
            .ok_or_else(|| RetinaError::NotFound(format!("Image {} not found", id)))?;
        if status == ImageStatus::Pending {
            return tables
                .images
                .get(&id)
                .cloned()
                .ok_or_else(|| RetinaError::NotFound(format!("Image {} not found", id)));
        }

        let image = tables.advance_image(id, ImageEvent::Reanalyze)?;
        debug!("Image {} reopened for detection", id);
        Ok(image)
    }

    /// 推进影像状态；当前状态不允许该事件时返回 `InvalidStateTransition`
    pub async fn transition_image_status(&self, id: Uuid, event: ImageEvent) -> Result<RetinalImage> {
        let mut tables = self.tables.write().await;
        let image = tables.advance_image(id, event)?;

        info!("Image {} moved to {:?} ({:?})", id, image.status, event);
        Ok(image)
    }

    /// 在同一把写锁内推进影像状态并写入检测结果
    ///
    /// 状态转换被拒绝时不写入任何结果。
    pub async fn record_detection(
        &self,
        draft: NewDetectionResult,
        event: ImageEvent,
    ) -> Result<(DetectionResult, RetinalImage)> {
        let mut tables = self.tables.write().await;

        let image_id = draft.image_id;
        let current = tables
            .images
            .get(&image_id)
            .map(|image| image.status)
            .ok_or_else(|| RetinaError::Invalid(format!("Image {} does not exist", image_id)))?;
        if !StateMachine::image_detection().can_transition(current, event) {
            warn!("Image {} is {:?}, dropping {:?}", image_id, current, event);
            return Err(RetinaError::InvalidStateTransition {
                from: format!("{:?}", current),
                event: format!("{:?}", event),
            });
        }

        let result = tables.insert_detection_result(draft)?;
        let image = tables.advance_image(image_id, event)?;

        info!(
            "Recorded detection result {} for image {} (status {:?}, model {})",
            result.id, image_id, image.status, result.model_version
        );
        Ok((result, image))
    }

    // ---------------------------------------------------------------------
    // 检测结果
    // ---------------------------------------------------------------------

    pub async fn create_detection_result(&self, draft: NewDetectionResult) -> Result<DetectionResult> {
        let mut tables = self.tables.write().await;
        let result = tables.insert_detection_result(draft)?;

        info!(
            "Created detection result {} for image {} (model {})",
            result.id, result.image_id, result.model_version
        );
        Ok(result)
    }

    pub async fn get_detection_result_by_id(&self, id: Uuid) -> Result<DetectionResultView> {
        let tables = self.tables.read().await;
        let result = tables
            .detection_results
            .get(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Detection result {} not found", id)))?;
        Ok(joins::detection_result_view(&tables, result))
    }

    pub async fn get_detection_results_by_image_id(
        &self,
        image_id: Uuid,
    ) -> Result<Vec<DetectionResultView>> {
        let tables = self.tables.read().await;
        let mut results: Vec<DetectionResultView> = tables
            .detection_results
            .values()
            .filter(|result| result.image_id == image_id)
            .map(|result| joins::detection_result_view(&tables, result))
            .collect();
        results.sort_by_key(|view| view.result.analysis_date);
        Ok(results)
    }

    /// 覆盖检测结果（复核）；影像关联与创建时间保持不变
    pub async fn update_detection_result(&self, result: DetectionResult) -> Result<DetectionResult> {
        check_confidence(result.confidence)?;

        let mut tables = self.tables.write().await;

        let existing = tables.detection_results.get(&result.id).ok_or_else(|| {
            RetinaError::NotFound(format!("Detection result {} not found", result.id))
        })?;

        let updated = DetectionResult {
            image_id: existing.image_id,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..result
        };
        if let Some(reviewer) = updated.reviewed_by {
            tables.require_doctor(reviewer)?;
        }
        tables.detection_results.insert(updated.id, updated.clone());

        debug!("Updated detection result {}", updated.id);
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // 预约
    // ---------------------------------------------------------------------

    /// 创建预约；时长、未来时间与医生时段冲突在写锁内一并检查
    pub async fn create_appointment(&self, draft: NewAppointment) -> Result<Appointment> {
        SlotRules::check_duration(draft.duration_minutes)?;

        let mut tables = self.tables.write().await;
        let now = Utc::now();
        SlotRules::check_future(draft.appointment_date, now)?;
        tables.require_patient(draft.patient_id)?;
        tables.require_doctor(draft.doctor_id)?;

        let appointment = Appointment {
            id: generate_id(),
            patient_id: draft.patient_id,
            doctor_id: draft.doctor_id,
            appointment_date: draft.appointment_date,
            duration_minutes: draft.duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        tables.check_doctor_slot(&appointment)?;
        tables.appointments.insert(appointment.id, appointment.clone());

        info!(
            "Created appointment {} for doctor {} at {}",
            appointment.id, appointment.doctor_id, appointment.appointment_date
        );
        Ok(appointment)
    }

    pub async fn get_appointment_by_id(&self, id: Uuid) -> Result<AppointmentView> {
        let tables = self.tables.read().await;
        let appointment = tables
            .appointments
            .get(&id)
            .ok_or_else(|| RetinaError::NotFound(format!("Appointment {} not found", id)))?;
        Ok(joins::appointment_view(&tables, appointment))
    }

    pub async fn get_appointments_by_patient_id(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<AppointmentView>> {
        self.scan_appointments(|appointment| appointment.patient_id == patient_id)
            .await
    }

    pub async fn get_appointments_by_doctor_id(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<AppointmentView>> {
        self.scan_appointments(|appointment| appointment.doctor_id == doctor_id)
            .await
    }

    pub async fn get_all_appointments(&self) -> Result<Vec<AppointmentView>> {
        self.scan_appointments(|_| true).await
    }

    async fn scan_appointments<F>(&self, filter: F) -> Result<Vec<AppointmentView>>
    where
        F: Fn(&Appointment) -> bool,
    {
        let tables = self.tables.read().await;
        let mut appointments: Vec<AppointmentView> = tables
            .appointments
            .values()
            .filter(|appointment| filter(appointment))
            .map(|appointment| joins::appointment_view(&tables, appointment))
            .collect();
        appointments.sort_by_key(|view| view.appointment.appointment_date);
        Ok(appointments)
    }

    /// 覆盖预约记录
    ///
    /// 患者与医生不可变更；改期时重新校验未来时间，状态变化须符合预约状态机，
    /// 结果仍处于有效状态时检查医生时段冲突。
    pub async fn update_appointment(&self, appointment: Appointment) -> Result<Appointment> {
        SlotRules::check_duration(appointment.duration_minutes)?;

        let mut tables = self.tables.write().await;

        let existing = tables.appointments.get(&appointment.id).cloned().ok_or_else(|| {
            RetinaError::NotFound(format!("Appointment {} not found", appointment.id))
        })?;

        if appointment.appointment_date != existing.appointment_date {
            SlotRules::check_future(appointment.appointment_date, Utc::now())?;
        }
        StateMachine::appointment().event_for(existing.status, appointment.status)?;

        let updated = Appointment {
            patient_id: existing.patient_id,
            doctor_id: existing.doctor_id,
            created_at: existing.created_at,
            updated_at: advance_timestamp(existing.updated_at),
            ..appointment
        };
        tables.check_doctor_slot(&updated)?;
        tables.appointments.insert(updated.id, updated.clone());

        info!("Updated appointment {} (status {:?})", updated.id, updated.status);
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // 统计
    // ---------------------------------------------------------------------

    /// 在同一把读锁内读取所有表的记录数
    pub async fn get_stats(&self) -> StoreStats {
        let tables = self.tables.read().await;
        StoreStats {
            total_users: tables.users.len(),
            total_patients: tables.patients.len(),
            total_doctors: tables.doctors.len(),
            total_images: tables.images.len(),
            total_appointments: tables.appointments.len(),
            total_detections: tables.detection_results.len(),
        }
    }

    pub async fn get_detection_stats(&self) -> DetectionStats {
        let tables = self.tables.read().await;
        let results = &tables.detection_results;

        let total = results.len();
        let positive = results.values().filter(|r| r.has_dr).count();
        let (confidence_sum, time_sum) = results.values().fold((0.0, 0.0), |(c, t), r| {
            (c + r.confidence, t + r.processing_time)
        });
        let average = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };

        DetectionStats {
            total_detections: total,
            positive_detections: positive,
            negative_detections: total - positive,
            simulated_detections: results.values().filter(|r| r.is_simulated()).count(),
            confirmed_detections: results.values().filter(|r| r.is_confirmed).count(),
            average_confidence: average(confidence_sum),
            average_processing_time: average(time_sum),
        }
    }
}
