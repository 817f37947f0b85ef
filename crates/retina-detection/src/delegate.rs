//! 检测委托
//!
//! 验证 → (可选)预处理 → 远程分析，远程不可用时回退到本地模拟。
//! 只有 `RemoteUnavailable` 回退，其余错误（包括本地 I/O）直接返回。

use chrono::{DateTime, Utc};
use retina_core::{DrStage, Result, RetinaError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cnn::{AnalysisService, CnnScanResult};
use crate::preprocess::preprocess_image;
use crate::simulator::Simulator;
use crate::validation::{validate_image_bytes, validate_image_file};

/// 临床结论（持久化到检测结果的部分）
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Verdict {
    pub has_dr: bool,
    pub dr_stage: DrStage,
    pub confidence: f64,
    pub has_macular_edema: bool,
    pub has_hemorrhages: bool,
    pub has_exudates: bool,
    pub has_microaneurysms: bool,
}

impl Verdict {
    /// 远程响应中分期无法识别时返回 None
    pub fn from_remote(result: &CnnScanResult) -> Option<Self> {
        Some(Self {
            has_dr: result.has_dr,
            dr_stage: result.stage()?,
            confidence: result.confidence,
            has_macular_edema: result.macular_edema,
            has_hemorrhages: result.hemorrhages,
            has_exudates: result.exudates,
            has_microaneurysms: result.microaneurysms,
        })
    }
}

/// 远程服务附带的补充指标，只随报告返回，不入库
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteMetrics {
    pub severity: String,
    pub risk_level: String,
    pub recommendation: String,
    pub neovascularization: bool,
    pub lesion_count: u32,
    pub lesion_area_percentage: f64,
    pub vessel_tortuosity: f64,
}

impl From<&CnnScanResult> for RemoteMetrics {
    fn from(result: &CnnScanResult) -> Self {
        Self {
            severity: result.severity.clone(),
            risk_level: result.risk_level.clone(),
            recommendation: result.recommendation.clone(),
            neovascularization: result.neovascularization,
            lesion_count: result.lesion_count,
            lesion_area_percentage: result.lesion_area,
            vessel_tortuosity: result.vessel_tortuosity,
        }
    }
}

/// 结论来源
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Remote,
    Simulated,
}

/// 一次检测尝试的完整结论
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Detection {
    pub verdict: Verdict,
    pub source: DetectionSource,
    pub metrics: Option<RemoteMetrics>,
    /// 耗时（秒）
    pub processing_time: f64,
    pub model_version: String,
    pub analysis_date: DateTime<Utc>,
}

/// 检测委托
pub struct DetectionDelegate {
    service: Arc<dyn AnalysisService>,
    simulator: Simulator,
    upload_dir: PathBuf,
    preprocess: bool,
}

impl DetectionDelegate {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        simulator: Simulator,
        upload_dir: impl Into<PathBuf>,
        preprocess: bool,
    ) -> Self {
        Self {
            service,
            simulator,
            upload_dir: upload_dir.into(),
            preprocess,
        }
    }

    /// 在阻塞线程池中验证影像文件
    pub async fn validate(&self, path: &Path) -> Result<(u32, u32)> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || validate_image_file(&path))
            .await
            .map_err(|e| RetinaError::Internal(format!("validation task failed: {}", e)))?
    }

    /// 对磁盘上的影像执行一次检测
    pub async fn detect(&self, path: &Path) -> Result<Detection> {
        let started = Instant::now();

        let (width, height) = self.validate(path).await?;
        debug!("Validated {} ({}x{})", path.display(), width, height);

        let upload_path = if self.preprocess {
            self.preprocessed_copy(path).await
        } else {
            path.to_path_buf()
        };

        let outcome = self.service.scan_file(&upload_path).await;
        if upload_path.as_path() != path {
            if let Err(e) = tokio::fs::remove_file(&upload_path).await {
                warn!("Failed to remove preprocessed copy {}: {}", upload_path.display(), e);
            }
        }
        self.resolve(outcome, started)
    }

    /// 对内存中的影像数据执行一次检测
    pub async fn detect_bytes(&self, bytes: Vec<u8>, filename: &str) -> Result<Detection> {
        let started = Instant::now();

        let (bytes, dimensions) = tokio::task::spawn_blocking(move || {
            let dimensions = validate_image_bytes(&bytes);
            (bytes, dimensions)
        })
        .await
        .map_err(|e| RetinaError::Internal(format!("validation task failed: {}", e)))?;
        let (width, height) = dimensions?;
        debug!("Validated {} ({}x{})", filename, width, height);

        let outcome = self.service.scan_bytes(bytes, filename).await;
        self.resolve(outcome, started)
    }

    pub async fn health(&self) -> Result<()> {
        self.service.health().await
    }

    /// 预处理失败时退回原文件
    async fn preprocessed_copy(&self, path: &Path) -> PathBuf {
        let source = path.to_path_buf();
        let upload_dir = self.upload_dir.clone();
        let result = tokio::task::spawn_blocking(move || preprocess_image(&source, &upload_dir)).await;

        match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Preprocessing {} failed, sending original: {}", path.display(), e);
                path.to_path_buf()
            }
            Err(e) => {
                warn!("Preprocessing task for {} failed, sending original: {}", path.display(), e);
                path.to_path_buf()
            }
        }
    }

    fn resolve(&self, outcome: Result<CnnScanResult>, started: Instant) -> Result<Detection> {
        let failure = match outcome {
            Ok(result) => match Verdict::from_remote(&result) {
                Some(verdict) => {
                    info!(
                        "CNN detection completed: has_dr={} stage={} model={}",
                        verdict.has_dr, verdict.dr_stage, result.model_version
                    );
                    return Ok(Detection {
                        verdict,
                        source: DetectionSource::Remote,
                        metrics: Some(RemoteMetrics::from(&result)),
                        processing_time: started.elapsed().as_secs_f64(),
                        model_version: result.model_version,
                        analysis_date: Utc::now(),
                    });
                }
                None => format!("unknown DR stage in remote verdict: {}", result.dr_stage),
            },
            Err(RetinaError::RemoteUnavailable(msg)) => msg,
            Err(RetinaError::RemoteDeclined(msg)) => {
                warn!("CNN service declined the image: {}", msg);
                return Err(RetinaError::RemoteDeclined(msg));
            }
            Err(e) => {
                warn!("CNN request failed before reaching the service: {}", e);
                return Err(e);
            }
        };

        warn!("CNN service unavailable, falling back to simulation: {}", failure);
        let verdict = self.simulator.simulate();
        Ok(Detection {
            verdict,
            source: DetectionSource::Simulated,
            metrics: None,
            processing_time: started.elapsed().as_secs_f64(),
            model_version: self.simulator.model_version().to_string(),
            analysis_date: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::RgbImage;
    use retina_core::SIMULATED_MODEL_VERSION;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// 分析服务的应答
    pub(crate) enum StubReply {
        Verdict(CnnScanResult),
        Unavailable,
        Declined(&'static str),
        /// 读取上传文件时的本地 I/O 错误
        LocalIo,
    }

    /// 挂起 `scan_file`：进入时通知 `entered`，等待 `release` 后再应答
    #[derive(Default)]
    pub(crate) struct Gate {
        pub(crate) entered: Notify,
        pub(crate) release: Notify,
    }

    pub(crate) struct StubService {
        reply: StubReply,
        /// 按调用顺序取出的延迟应答，取完后使用 `reply`
        script: Mutex<VecDeque<(Duration, StubReply)>>,
        pub(crate) gate: Option<Gate>,
        pub(crate) calls: AtomicUsize,
        pub(crate) uploads: Mutex<Vec<PathBuf>>,
    }

    impl StubService {
        pub(crate) fn new(reply: StubReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                script: Mutex::new(VecDeque::new()),
                gate: None,
                calls: AtomicUsize::new(0),
                uploads: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn scripted(script: Vec<(Duration, StubReply)>) -> Arc<Self> {
            Arc::new(Self {
                reply: StubReply::Unavailable,
                script: Mutex::new(script.into()),
                gate: None,
                calls: AtomicUsize::new(0),
                uploads: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn gated(reply: StubReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                script: Mutex::new(VecDeque::new()),
                gate: Some(Gate::default()),
                calls: AtomicUsize::new(0),
                uploads: Mutex::new(Vec::new()),
            })
        }

        async fn answer(&self) -> Result<CnnScanResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            let scripted = self.script.lock().unwrap().pop_front();
            match scripted {
                Some((delay, reply)) => {
                    tokio::time::sleep(delay).await;
                    Self::reply_with(&reply)
                }
                None => Self::reply_with(&self.reply),
            }
        }

        fn reply_with(reply: &StubReply) -> Result<CnnScanResult> {
            match reply {
                StubReply::Verdict(result) => Ok(result.clone()),
                StubReply::Unavailable => Err(RetinaError::RemoteUnavailable("connection refused".to_string())),
                StubReply::Declined(msg) => Err(RetinaError::RemoteDeclined(msg.to_string())),
                StubReply::LocalIo => Err(RetinaError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "upload file vanished",
                ))),
            }
        }
    }

    #[async_trait]
    impl AnalysisService for StubService {
        async fn scan_file(&self, path: &Path) -> Result<CnnScanResult> {
            self.uploads.lock().unwrap().push(path.to_path_buf());
            // 模拟真实客户端读取上传文件
            assert!(path.exists(), "upload file missing: {}", path.display());
            self.answer().await
        }

        async fn scan_bytes(&self, _bytes: Vec<u8>, _filename: &str) -> Result<CnnScanResult> {
            self.answer().await
        }

        async fn health(&self) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn remote_verdict() -> CnnScanResult {
        CnnScanResult {
            success: true,
            has_dr: true,
            dr_stage: "Severe".to_string(),
            confidence: 0.88,
            severity: "severe".to_string(),
            risk_level: "high".to_string(),
            hemorrhages: true,
            lesion_count: 20,
            model_version: "v2.1.0".to_string(),
            ..CnnScanResult::default()
        }
    }

    pub(crate) fn write_fundus(dir: &Path, name: &str, size: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(size, size, image::Rgb([150, 40, 20]))
            .save(&path)
            .unwrap();
        path
    }

    fn delegate(service: Arc<StubService>, dir: &Path) -> DetectionDelegate {
        DetectionDelegate::new(service, Simulator::seeded(1), dir, true)
    }

    #[tokio::test]
    async fn test_remote_verdict_used() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 600);
        let service = StubService::new(StubReply::Verdict(remote_verdict()));

        let detection = delegate(service.clone(), dir.path()).detect(&path).await.unwrap();

        assert_eq!(detection.source, DetectionSource::Remote);
        assert_eq!(detection.verdict.dr_stage, DrStage::Severe);
        assert_eq!(detection.model_version, "v2.1.0");
        assert_eq!(detection.metrics.unwrap().lesion_count, 20);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        // 上传的是本次尝试独有的预处理副本，扫描后即删除
        let uploads = service.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.parent().unwrap(), dir.path().join("preprocessed"));
        let name = upload.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("preprocessed_") && name.ends_with("_eye.png"), "{}", name);
        assert!(!upload.exists());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_local_io_error_is_not_simulated() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 600);
        let service = StubService::new(StubReply::LocalIo);

        let result = delegate(service.clone(), dir.path()).detect(&path).await;

        assert!(matches!(result, Err(RetinaError::Io(_))), "{:?}", result);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_falls_back_to_simulation() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 600);
        let service = StubService::new(StubReply::Unavailable);

        let detection = delegate(service, dir.path()).detect(&path).await.unwrap();

        assert_eq!(detection.source, DetectionSource::Simulated);
        assert_eq!(detection.model_version, SIMULATED_MODEL_VERSION);
        assert!(detection.metrics.is_none());
        assert!((0.7..=1.0).contains(&detection.verdict.confidence));
    }

    #[tokio::test]
    async fn test_unknown_stage_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 600);
        let mut verdict = remote_verdict();
        verdict.dr_stage = "Grade X".to_string();

        let detection = delegate(StubService::new(StubReply::Verdict(verdict)), dir.path())
            .detect(&path)
            .await
            .unwrap();
        assert_eq!(detection.source, DetectionSource::Simulated);
    }

    #[tokio::test]
    async fn test_declined_is_not_simulated() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 600);
        let service = StubService::new(StubReply::Declined("poor quality"));

        match delegate(service, dir.path()).detect(&path).await {
            Err(RetinaError::RemoteDeclined(msg)) => assert_eq!(msg, "poor quality"),
            other => panic!("expected decline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_runs_before_remote_call() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "small.png", 256);
        let service = StubService::new(StubReply::Verdict(remote_verdict()));

        let result = delegate(service.clone(), dir.path()).detect(&path).await;

        assert!(matches!(result, Err(RetinaError::ValidationFailed(_))));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detect_bytes() {
        let dir = TempDir::new().unwrap();
        let path = write_fundus(dir.path(), "eye.png", 700);
        let bytes = std::fs::read(&path).unwrap();
        let service = StubService::new(StubReply::Unavailable);

        let detection = delegate(service, dir.path())
            .detect_bytes(bytes, "eye.png")
            .await
            .unwrap();
        assert_eq!(detection.source, DetectionSource::Simulated);

        let rejected = delegate(StubService::new(StubReply::Unavailable), dir.path())
            .detect_bytes(b"not an image".to_vec(), "junk.bin")
            .await;
        assert!(matches!(rejected, Err(RetinaError::ValidationFailed(_))));
    }
}
