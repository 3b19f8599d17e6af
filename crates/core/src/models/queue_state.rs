use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

/// 发送队列阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPhase {
    #[default]
    Idle,
    Sending,
    Paused,
    Stopped,
}

/// 触发阶段变化的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchAction {
    Start,
    Pause,
    Resume,
    Stop,
    /// 队列正常处理完毕
    Complete,
    /// 协作方不可恢复的失败导致中止
    Abort,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchPhase::Idle => "idle",
            DispatchPhase::Sending => "sending",
            DispatchPhase::Paused => "paused",
            DispatchPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl DispatchPhase {
    /// Apply `action`, returning the next phase or `InvalidTransition`.
    ///
    /// ```text
    /// idle ──start──▶ sending ◀──resume── paused
    ///                   │  └────pause────▶  │
    ///                   ├─complete─▶ idle ◀─┤
    ///                   └─stop/abort─▶ stopped ◀─┘
    /// ```
    pub fn apply(self, action: DispatchAction) -> DispatchResult<DispatchPhase> {
        use DispatchAction::*;
        use DispatchPhase::*;

        let next = match (self, action) {
            (Idle | Stopped, Start) => Sending,
            (Sending, Pause) => Paused,
            (Paused, Resume) => Sending,
            (Sending | Paused, Stop | Abort) => Stopped,
            (Stopped, Stop) => Stopped,
            (Sending | Paused, Complete) => Idle,
            _ => {
                return Err(DispatchError::InvalidTransition {
                    phase: self.to_string(),
                    action: action.to_string(),
                })
            }
        };
        Ok(next)
    }

    /// 正在运行（包括暂停中）
    pub fn is_active(&self) -> bool {
        matches!(self, DispatchPhase::Sending | DispatchPhase::Paused)
    }
}

/// 对外发布的队列状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueState {
    pub phase: DispatchPhase,
    pub sent: u64,
    pub failed: u64,
    /// 熔断器打开时延后的数量，可在熔断器关闭后重新入队
    pub queued: u64,
    /// 被判定为重复而跳过的数量
    pub skipped: u64,
    pub processed: u64,
    pub total: u64,
    /// 中止运行的根本原因
    pub error: Option<String>,
}

impl QueueState {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let phase = DispatchPhase::Idle;
        let phase = phase.apply(DispatchAction::Start).unwrap();
        assert_eq!(phase, DispatchPhase::Sending);
        let phase = phase.apply(DispatchAction::Pause).unwrap();
        assert_eq!(phase, DispatchPhase::Paused);
        let phase = phase.apply(DispatchAction::Resume).unwrap();
        assert_eq!(phase, DispatchPhase::Sending);
        let phase = phase.apply(DispatchAction::Complete).unwrap();
        assert_eq!(phase, DispatchPhase::Idle);
    }

    #[test]
    fn test_stop_from_paused() {
        let phase = DispatchPhase::Paused.apply(DispatchAction::Stop).unwrap();
        assert_eq!(phase, DispatchPhase::Stopped);
        // stop 可重复调用
        assert_eq!(phase.apply(DispatchAction::Stop).unwrap(), DispatchPhase::Stopped);
        // 停止后可以重新开始
        assert_eq!(phase.apply(DispatchAction::Start).unwrap(), DispatchPhase::Sending);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(DispatchPhase::Idle.apply(DispatchAction::Pause).is_err());
        assert!(DispatchPhase::Idle.apply(DispatchAction::Stop).is_err());
        assert!(DispatchPhase::Sending.apply(DispatchAction::Start).is_err());
        assert!(DispatchPhase::Sending.apply(DispatchAction::Resume).is_err());
        assert!(DispatchPhase::Stopped.apply(DispatchAction::Pause).is_err());

        let err = DispatchPhase::Paused.apply(DispatchAction::Start).unwrap_err();
        assert!(err.to_string().contains("paused"));
    }

    #[test]
    fn test_queue_state_progress() {
        let mut state = QueueState::new(4);
        assert_eq!(state.remaining(), 4);
        state.processed = 1;
        assert_eq!(state.remaining(), 3);
        assert!((state.progress() - 0.25).abs() < f64::EPSILON);
        assert_eq!(QueueState::new(0).progress(), 0.0);
    }
}
