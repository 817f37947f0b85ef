//! # Retina工作流模块
//!
//! 提供影像检测与预约的业务规则，包括：
//! - 状态机：影像检测尝试与预约生命周期的状态转换
//! - 排期规则：预约时长、未来时间与医生时段冲突

pub mod scheduling;
pub mod state_machine;

// 重新导出主要类型
pub use scheduling::{SlotRules, MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};
pub use state_machine::{AppointmentEvent, ImageEvent, StateMachine};
