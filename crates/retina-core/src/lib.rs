//! # Retina Core
//!
//! 视网膜筛查后端的核心模块，提供实体模型、统一错误定义、配置与通用工具。

pub mod config;
pub mod error;
pub mod models;
pub mod utils;

pub use config::{AppConfig, ConfigValidator};
pub use error::{Result, RetinaError};
pub use models::*;
