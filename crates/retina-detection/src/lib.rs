//! # Retina检测模块
//!
//! 为已存储的视网膜影像给出糖网病变结论，包括：
//! - 影像验证：格式与分辨率前置检查
//! - 预处理：重新编码后作为上传副本
//! - 远程CNN分析服务客户端
//! - 本地模拟检测（远程不可用时的回退）
//! - 检测流水线：状态流转与结果持久化

pub mod cnn;
pub mod delegate;
pub mod pipeline;
pub mod preprocess;
pub mod simulator;
pub mod validation;

// 重新导出主要类型
pub use cnn::{AnalysisService, CnnClient, CnnScanResult};
pub use delegate::{Detection, DetectionDelegate, DetectionSource, RemoteMetrics, Verdict};
pub use pipeline::{DetectionPipeline, DetectionReport};
pub use simulator::Simulator;
pub use validation::{validate_image_bytes, validate_image_file, MAX_DIMENSION, MIN_DIMENSION};
