//! # Retina存储模块
//!
//! 进程内实体存储，提供：
//! - 用户、患者、医生、影像、检测结果、预约六张表的增改查
//! - 读取时拼装关联实体（患者→用户、影像→患者/医生等）
//! - 邮箱唯一性与预约排期规则的原子校验

mod joins;
pub mod models;
pub mod store;

pub use models::*;
pub use store::EntityStore;
