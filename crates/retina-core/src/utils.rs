//! 通用工具函数

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// 生成实体标识符（128位，随机部分来自操作系统随机源）
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

/// 计算新的更新时间，保证严格晚于上一次的时间戳
pub fn advance_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// 简单的邮箱格式校验
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    }
}
