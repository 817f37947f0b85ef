//! 配置管理
//!
//! 默认值 → 配置文件 → `RETINA_` 前缀环境变量，逐层覆盖

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, RetinaError};

/// 系统完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// JWT配置
    pub jwt: JwtConfig,
    /// 上传配置
    pub upload: UploadConfig,
    /// 远程CNN分析服务配置
    pub cnn: CnnConfig,
    /// 跨域配置
    pub cors: CorsConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtConfig {
    /// 签名密钥
    pub secret: String,
    /// 有效期（小时）
    pub expiry_hours: i64,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// 上传目录
    pub upload_dir: String,
    /// 单文件大小上限（字节）
    pub max_file_size: u64,
    /// 允许的扩展名（不含点）
    pub allowed_extensions: Vec<String>,
}

/// CNN服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CnnConfig {
    /// 服务基础地址，`/scan` 与 `/health` 拼接其后
    pub base_url: String,
    /// API密钥
    pub api_key: String,
    /// 请求的模型版本
    pub model_version: String,
    /// 分析类型
    pub analysis_type: String,
    /// 置信度阈值
    pub confidence_threshold: f64,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 发送前是否重新编码影像
    pub preprocess: bool,
}

/// 跨域配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "default-secret-key".to_string(),
            expiry_hours: 24,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: "./uploads".to_string(),
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "tiff", "bmp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1/cnn".to_string(),
            api_key: "default-cnn-api-key".to_string(),
            model_version: "v2.1.0".to_string(),
            analysis_type: "comprehensive".to_string(),
            confidence_threshold: 0.7,
            timeout_secs: 60,
            preprocess: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            jwt: JwtConfig::default(),
            upload: UploadConfig::default(),
            cnn: CnnConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// 兼容旧部署的环境变量
const LEGACY_ENV_OVERRIDES: [(&str, &str); 5] = [
    ("CNN_BASE_URL", "cnn.base_url"),
    ("CNN_API_KEY", "cnn.api_key"),
    ("JWT_SECRET", "jwt.secret"),
    ("UPLOAD_DIR", "upload.upload_dir"),
    ("PORT", "server.port"),
];

impl AppConfig {
    /// 加载配置，`config_path` 为空时仅使用默认值与环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("RETINA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("upload.allowed_extensions")
                .with_list_parse_key("cors.allowed_origins"),
        );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            builder = builder.set_override_option(key, std::env::var(var).ok())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        ConfigValidator::new().validate(&config)?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }
}

/// 配置验证器
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验配置，汇总所有问题后一次性返回
    pub fn validate(&self, config: &AppConfig) -> Result<()> {
        let mut problems = Vec::new();

        if config.server.port == 0 {
            problems.push("server.port must be non-zero".to_string());
        }
        if config.jwt.secret.trim().is_empty() {
            problems.push("jwt.secret must not be empty".to_string());
        }
        if config.jwt.expiry_hours <= 0 {
            problems.push("jwt.expiry_hours must be positive".to_string());
        }
        if config.upload.max_file_size == 0 {
            problems.push("upload.max_file_size must be positive".to_string());
        }
        if config.upload.allowed_extensions.is_empty() {
            problems.push("upload.allowed_extensions must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&config.cnn.confidence_threshold) {
            problems.push(format!(
                "cnn.confidence_threshold must lie in [0,1], got {}",
                config.cnn.confidence_threshold
            ));
        }
        if config.cnn.timeout_secs == 0 {
            problems.push("cnn.timeout_secs must be positive".to_string());
        }
        if !(config.cnn.base_url.starts_with("http://") || config.cnn.base_url.starts_with("https://")) {
            problems.push(format!("cnn.base_url is not an http(s) URL: {}", config.cnn.base_url));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RetinaError::Config(problems.join("; ")))
        }
    }
}
