//! 错误定义模块

use thiserror::Error;

/// 系统统一错误类型
#[derive(Error, Debug)]
pub enum RetinaError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("无效数据: {0}")]
    Invalid(String),

    /// 图像格式或分辨率不满足分析前置条件
    #[error("图像验证失败: {0}")]
    ValidationFailed(String),

    /// 远程分析服务不可达或返回非200，由检测委托吸收并回退到模拟
    #[error("分析服务不可用: {0}")]
    RemoteUnavailable(String),

    /// 远程分析服务明确返回失败结果，不回退、不持久化
    #[error("分析服务拒绝请求: {0}")]
    RemoteDeclined(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl From<::config::ConfigError> for RetinaError {
    fn from(err: ::config::ConfigError) -> Self {
        RetinaError::Config(err.to_string())
    }
}

/// 系统统一结果类型
pub type Result<T> = std::result::Result<T, RetinaError>;
