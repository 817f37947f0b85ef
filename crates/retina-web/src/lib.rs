//! # Retina Web模块
//!
//! 提供HTTP接口，包括：
//! - JWT认证与角色授权
//! - 患者、医生档案
//! - 影像上传、检测与复核
//! - 预约管理
//! - 统计与服务状态

pub mod appointments;
pub mod auth;
pub mod doctors;
pub mod handlers;
pub mod images;
pub mod patients;
pub mod server;

// 重新导出主要类型
pub use auth::AuthService;
pub use handlers::ApiError;
pub use server::{create_app, AppState, WebServer};
