//! 状态机
//!
//! 管理影像检测尝试与预约的状态转换

use retina_core::{AppointmentStatus, ImageStatus, Result, RetinaError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// 影像状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ImageEvent {
    /// 远程CNN返回有效结论
    RemoteVerdict,
    /// 回退到本地模拟得出结论
    SimulatedVerdict,
    /// 检测失败（验证失败或远程拒绝）
    Failed,
    /// 开启新一轮检测
    Reanalyze,
}

/// 预约状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentEvent {
    Cancel,
    Complete,
}

/// 通用状态机，按 (当前状态, 事件) 查表
#[derive(Debug)]
pub struct StateMachine<S, E> {
    transitions: HashMap<(S, E), S>,
}

impl<S, E> StateMachine<S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    fn from_rules(rules: &[(S, E, S)]) -> Self {
        let transitions = rules
            .iter()
            .map(|(from, event, to)| ((*from, *event), *to))
            .collect();
        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: S, event: E) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: S, event: E) -> Result<S> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| RetinaError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current: S) -> Vec<E> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl StateMachine<ImageStatus, ImageEvent> {
    /// 单次检测尝试内只能从 pending 单向流转
    pub fn image_detection() -> Self {
        use ImageStatus::*;
        Self::from_rules(&[
            (Pending, ImageEvent::RemoteVerdict, CnnProcessed),
            (Pending, ImageEvent::SimulatedVerdict, Processed),
            (Pending, ImageEvent::Failed, Error),
            (Processed, ImageEvent::Reanalyze, Pending),
            (CnnProcessed, ImageEvent::Reanalyze, Pending),
            (Error, ImageEvent::Reanalyze, Pending),
        ])
    }
}

impl StateMachine<AppointmentStatus, AppointmentEvent> {
    pub fn appointment() -> Self {
        use AppointmentStatus::*;
        Self::from_rules(&[
            (Scheduled, AppointmentEvent::Cancel, Cancelled),
            (Scheduled, AppointmentEvent::Complete, Completed),
        ])
    }

    /// 将目标状态还原为对应事件；同状态返回 None
    pub fn event_for(
        &self,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<Option<AppointmentEvent>> {
        if from == to {
            return Ok(None);
        }
        let event = match to {
            AppointmentStatus::Cancelled => AppointmentEvent::Cancel,
            AppointmentStatus::Completed => AppointmentEvent::Complete,
            AppointmentStatus::Scheduled => {
                return Err(RetinaError::InvalidStateTransition {
                    from: format!("{:?}", from),
                    event: "Reschedule".to_string(),
                })
            }
        };
        self.transition(from, event)?;
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_transitions() {
        let sm = StateMachine::image_detection();

        assert_eq!(
            sm.transition(ImageStatus::Pending, ImageEvent::RemoteVerdict).unwrap(),
            ImageStatus::CnnProcessed
        );
        assert_eq!(
            sm.transition(ImageStatus::Pending, ImageEvent::SimulatedVerdict).unwrap(),
            ImageStatus::Processed
        );
        assert!(sm.can_transition(ImageStatus::Error, ImageEvent::Reanalyze));

        // 终态不能直接跳到另一个终态
        assert!(!sm.can_transition(ImageStatus::Processed, ImageEvent::RemoteVerdict));
        assert!(sm.transition(ImageStatus::CnnProcessed, ImageEvent::Failed).is_err());
    }

    #[test]
    fn test_appointment_transitions() {
        let sm = StateMachine::appointment();

        assert!(sm.can_transition(AppointmentStatus::Scheduled, AppointmentEvent::Cancel));
        assert!(!sm.can_transition(AppointmentStatus::Cancelled, AppointmentEvent::Cancel));
        assert!(!sm.can_transition(AppointmentStatus::Completed, AppointmentEvent::Cancel));

        let events = sm.possible_events(AppointmentStatus::Scheduled);
        assert_eq!(events.len(), 2);
        assert!(sm.possible_events(AppointmentStatus::Completed).is_empty());
    }

    #[test]
    fn test_event_for_target_status() {
        let sm = StateMachine::appointment();

        assert_eq!(
            sm.event_for(AppointmentStatus::Scheduled, AppointmentStatus::Scheduled).unwrap(),
            None
        );
        assert_eq!(
            sm.event_for(AppointmentStatus::Scheduled, AppointmentStatus::Completed).unwrap(),
            Some(AppointmentEvent::Complete)
        );
        assert!(sm
            .event_for(AppointmentStatus::Cancelled, AppointmentStatus::Scheduled)
            .is_err());
        assert!(sm
            .event_for(AppointmentStatus::Completed, AppointmentStatus::Cancelled)
            .is_err());
    }
}
