//! 远程CNN分析服务客户端
//!
//! `POST {base_url}/scan` 以 multipart 上传影像，`GET {base_url}/health` 探活。
//! 传输失败、非200、响应无法解析或置信度越界均归为 `RemoteUnavailable`，
//! 响应体 `success=false` 归为 `RemoteDeclined`。

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use retina_core::config::CnnConfig;
use retina_core::{DrStage, Result, RetinaError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// 远程分析服务接口
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// 上传磁盘上的影像文件
    async fn scan_file(&self, path: &Path) -> Result<CnnScanResult>;

    /// 上传内存中的影像数据
    async fn scan_bytes(&self, bytes: Vec<u8>, filename: &str) -> Result<CnnScanResult>;

    /// 健康检查
    async fn health(&self) -> Result<()>;
}

/// `/scan` 响应体
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CnnScanResult {
    pub success: bool,
    pub has_dr: bool,
    pub dr_stage: String,
    pub confidence: f64,
    pub severity: String,
    pub risk_level: String,
    pub recommendation: String,

    // 病灶
    pub macular_edema: bool,
    pub hemorrhages: bool,
    pub exudates: bool,
    pub microaneurysms: bool,
    pub neovascularization: bool,

    // 定量指标
    pub lesion_count: u32,
    #[serde(rename = "lesion_area_percentage")]
    pub lesion_area: f64,
    pub vessel_tortuosity: f64,

    pub processing_time: f64,
    pub model_version: String,
    pub analysis_date: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CnnScanResult {
    /// 解析分期字符串，大小写与分隔符不敏感
    pub fn stage(&self) -> Option<DrStage> {
        let normalized: String = self
            .dr_stage
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "nodr" | "none" => Some(DrStage::NoDr),
            "mild" => Some(DrStage::Mild),
            "moderate" => Some(DrStage::Moderate),
            "severe" => Some(DrStage::Severe),
            "proliferative" => Some(DrStage::Proliferative),
            _ => None,
        }
    }
}

/// CNN服务HTTP客户端
pub struct CnnClient {
    client: reqwest::Client,
    config: CnnConfig,
}

impl CnnClient {
    pub fn new(config: CnnConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("retina-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RetinaError::Internal(format!("failed to build HTTP client: {}", e)))?;

        info!("CNN client configured for {}", config.base_url);
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn scan_form(&self, bytes: Vec<u8>, filename: &str) -> Form {
        Form::new()
            .part("image", Part::bytes(bytes).file_name(filename.to_string()))
            .text("api_key", self.config.api_key.clone())
            .text("model_version", self.config.model_version.clone())
            .text("analysis_type", self.config.analysis_type.clone())
            .text("confidence_threshold", self.config.confidence_threshold.to_string())
    }

    async fn send_scan(&self, form: Form) -> Result<CnnScanResult> {
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(self.endpoint("/scan"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RetinaError::RemoteUnavailable(format!("failed to send request to CNN: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetinaError::RemoteUnavailable(format!("failed to read CNN response: {}", e)))?;

        if status != StatusCode::OK {
            return Err(RetinaError::RemoteUnavailable(format!(
                "CNN API returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let mut result: CnnScanResult = serde_json::from_str(&body)
            .map_err(|e| RetinaError::RemoteUnavailable(format!("failed to parse CNN response: {}", e)))?;

        if !result.success {
            return Err(RetinaError::RemoteDeclined(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "CNN analysis failed".to_string()),
            ));
        }
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(RetinaError::RemoteUnavailable(format!(
                "CNN returned confidence outside [0,1]: {}",
                result.confidence
            )));
        }
        if result.stage().is_none() {
            return Err(RetinaError::RemoteUnavailable(format!(
                "CNN returned unknown DR stage: {}",
                result.dr_stage
            )));
        }

        result.processing_time = started.elapsed().as_secs_f64();
        result.analysis_date = chrono::Utc::now().to_rfc3339();

        debug!(
            "CNN verdict: has_dr={} stage={} confidence={:.3}",
            result.has_dr, result.dr_stage, result.confidence
        );
        Ok(result)
    }
}

#[async_trait]
impl AnalysisService for CnnClient {
    async fn scan_file(&self, path: &Path) -> Result<CnnScanResult> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image");
        self.send_scan(self.scan_form(bytes, filename)).await
    }

    async fn scan_bytes(&self, bytes: Vec<u8>, filename: &str) -> Result<CnnScanResult> {
        self.send_scan(self.scan_form(bytes, filename)).await
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint("/health"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| RetinaError::RemoteUnavailable(format!("CNN health check failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(RetinaError::RemoteUnavailable(format!(
                "CNN service unhealthy, status: {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::{Multipart, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    /// 模拟CNN服务的响应方式
    #[derive(Clone)]
    pub(crate) enum MockReply {
        Json(serde_json::Value),
        Status(u16),
        Raw(&'static str),
    }

    #[derive(Clone)]
    struct MockState {
        reply: MockReply,
        seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    pub(crate) fn positive_body() -> serde_json::Value {
        json!({
            "success": true,
            "has_dr": true,
            "dr_stage": "Moderate",
            "confidence": 0.91,
            "severity": "moderate",
            "risk_level": "medium",
            "recommendation": "Refer to ophthalmologist",
            "macular_edema": false,
            "hemorrhages": true,
            "exudates": true,
            "microaneurysms": true,
            "neovascularization": false,
            "lesion_count": 12,
            "lesion_area_percentage": 3.5,
            "vessel_tortuosity": 0.2,
            "processing_time": 0.4,
            "model_version": "v2.1.0",
            "analysis_date": "2024-01-01T00:00:00Z"
        })
    }

    async fn scan(State(state): State<MockState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
        let mut fields = HashMap::new();
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let value = if name == "image" {
                format!("{} bytes", field.bytes().await.map(|b| b.len()).unwrap_or(0))
            } else {
                field.text().await.unwrap_or_default()
            };
            fields.insert(name, value);
        }
        if let Some(auth) = headers.get("authorization") {
            fields.insert("authorization".to_string(), auth.to_str().unwrap_or_default().to_string());
        }
        if let Some(agent) = headers.get("user-agent") {
            fields.insert("user-agent".to_string(), agent.to_str().unwrap_or_default().to_string());
        }
        state.seen.lock().unwrap().push(fields);

        match state.reply {
            MockReply::Json(body) => Json(body).into_response(),
            MockReply::Status(code) => AxumStatus::from_u16(code).unwrap().into_response(),
            MockReply::Raw(body) => body.into_response(),
        }
    }

    async fn health(State(state): State<MockState>) -> AxumStatus {
        match state.reply {
            MockReply::Status(code) => AxumStatus::from_u16(code).unwrap(),
            _ => AxumStatus::OK,
        }
    }

    /// 在随机端口启动模拟CNN服务，返回基础地址与请求记录
    pub(crate) async fn spawn_mock(reply: MockReply) -> (String, Arc<Mutex<Vec<HashMap<String, String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = MockState { reply, seen: seen.clone() };
        let app = Router::new()
            .route("/api/v1/cnn/scan", post(scan))
            .route("/api/v1/cnn/health", get(health))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/api/v1/cnn", addr), seen)
    }

    pub(crate) fn client_for(base_url: &str) -> CnnClient {
        CnnClient::new(CnnConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..CnnConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_scan_sends_contract_fields() {
        let (base_url, seen) = spawn_mock(MockReply::Json(positive_body())).await;
        let client = client_for(&base_url);

        let result = client.scan_bytes(vec![1, 2, 3, 4], "eye.png").await.unwrap();
        assert!(result.has_dr);
        assert_eq!(result.stage(), Some(DrStage::Moderate));
        assert_eq!(result.lesion_count, 12);

        let requests = seen.lock().unwrap();
        let fields = &requests[0];
        assert_eq!(fields["image"], "4 bytes");
        assert_eq!(fields["api_key"], "default-cnn-api-key");
        assert_eq!(fields["model_version"], "v2.1.0");
        assert_eq!(fields["analysis_type"], "comprehensive");
        assert_eq!(fields["confidence_threshold"], "0.7");
        assert_eq!(fields["authorization"], "Bearer default-cnn-api-key");
        assert!(fields["user-agent"].starts_with("retina-backend/"));
    }

    #[tokio::test]
    async fn test_declined_body_is_terminal() {
        let body = json!({"success": false, "error": "image quality too low"});
        let (base_url, _) = spawn_mock(MockReply::Json(body)).await;

        match client_for(&base_url).scan_bytes(vec![0], "eye.png").await {
            Err(RetinaError::RemoteDeclined(msg)) => assert_eq!(msg, "image quality too low"),
            other => panic!("expected decline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failures_are_unavailable() {
        let mut out_of_range = positive_body();
        out_of_range["confidence"] = json!(1.5);

        for reply in [
            MockReply::Status(500),
            MockReply::Raw("<html>gateway</html>"),
            MockReply::Json(out_of_range),
        ] {
            let (base_url, _) = spawn_mock(reply).await;
            let result = client_for(&base_url).scan_bytes(vec![0], "eye.png").await;
            assert!(matches!(result, Err(RetinaError::RemoteUnavailable(_))), "{:?}", result);
        }
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let client = client_for("http://127.0.0.1:1/api/v1/cnn");
        assert!(matches!(
            client.scan_bytes(vec![0], "eye.png").await,
            Err(RetinaError::RemoteUnavailable(_))
        ));
        assert!(matches!(client.health().await, Err(RetinaError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let (healthy, _) = spawn_mock(MockReply::Json(positive_body())).await;
        assert!(client_for(&healthy).health().await.is_ok());

        let (unhealthy, _) = spawn_mock(MockReply::Status(503)).await;
        assert!(client_for(&unhealthy).health().await.is_err());
    }

    #[test]
    fn test_stage_parsing() {
        let mut result = CnnScanResult {
            dr_stage: "No DR".to_string(),
            ..CnnScanResult::default()
        };
        assert_eq!(result.stage(), Some(DrStage::NoDr));
        result.dr_stage = "PROLIFERATIVE".to_string();
        assert_eq!(result.stage(), Some(DrStage::Proliferative));
        result.dr_stage = "stage-5".to_string();
        assert_eq!(result.stage(), None);
    }
}
