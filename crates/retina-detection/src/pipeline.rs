//! 检测流水线
//!
//! 读取影像记录 → 检测委托 → 持久化检测结果并推进影像状态。
//! 远程调用期间不持有存储锁。状态转换一律以存储中的当前状态为准，
//! 同一影像上并发的检测只有先完成的一次生效。

use retina_core::{DetectionResult, ImageStatus, Result, RetinaError};
use retina_store::{EntityStore, NewDetectionResult};
use retina_workflow::ImageEvent;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::delegate::{DetectionDelegate, DetectionSource, RemoteMetrics};

/// 一次检测的对外报告
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub result: DetectionResult,
    pub image_status: ImageStatus,
    pub source: DetectionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RemoteMetrics>,
}

/// 检测流水线
pub struct DetectionPipeline {
    store: Arc<EntityStore>,
    delegate: Arc<DetectionDelegate>,
}

impl DetectionPipeline {
    pub fn new(store: Arc<EntityStore>, delegate: Arc<DetectionDelegate>) -> Self {
        Self { store, delegate }
    }

    pub fn delegate(&self) -> &DetectionDelegate {
        &self.delegate
    }

    /// 对指定影像执行检测，`analyst` 为发起检测的医生档案
    pub async fn run(&self, image_id: Uuid, analyst: Option<Uuid>) -> Result<DetectionReport> {
        let image = self.store.reopen_image(image_id).await?;

        let detection = match self.delegate.detect(Path::new(&image.file_path)).await {
            Ok(detection) => detection,
            Err(e) => {
                error!("Detection failed for image {}: {}", image.id, e);
                match self.store.transition_image_status(image.id, ImageEvent::Failed).await {
                    Ok(_) => {}
                    Err(RetinaError::InvalidStateTransition { from, .. }) => {
                        warn!("Image {} already resolved as {}, keeping it", image.id, from);
                    }
                    Err(store_err) => return Err(store_err),
                }
                return Err(e);
            }
        };

        let event = match detection.source {
            DetectionSource::Remote => ImageEvent::RemoteVerdict,
            DetectionSource::Simulated => ImageEvent::SimulatedVerdict,
        };
        let verdict = detection.verdict;
        let draft = NewDetectionResult {
            image_id: image.id,
            doctor_id: analyst,
            has_dr: verdict.has_dr,
            dr_stage: verdict.dr_stage,
            confidence: verdict.confidence,
            has_macular_edema: verdict.has_macular_edema,
            has_hemorrhages: verdict.has_hemorrhages,
            has_exudates: verdict.has_exudates,
            has_microaneurysms: verdict.has_microaneurysms,
            analysis_date: detection.analysis_date,
            processing_time: detection.processing_time,
            model_version: detection.model_version.clone(),
        };
        let (result, image) = self
            .store
            .record_detection(draft, event)
            .await
            .map_err(|e| match e {
                RetinaError::InvalidStateTransition { from, .. } => RetinaError::Conflict(format!(
                    "Image {} was resolved as {} by a concurrent detection",
                    image_id, from
                )),
                other => other,
            })?;

        info!(
            "Detection for image {} stored as {} ({:?})",
            image.id, result.id, detection.source
        );
        Ok(DetectionReport {
            result,
            image_status: image.status,
            source: detection.source,
            metrics: detection.metrics,
        })
    }
}
