//! 接收消息去重
//!
//! 从发送通道收到的消息与发送路径共用同一个 [`DuplicateDetector`]，
//! 运营商重传或短时间内的重复内容在这里被拦截。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::duplicate_detector::{DuplicateCheck, DuplicateDetector, DuplicateKind};

/// 接收消息的处理结论
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingDecision {
    /// 新消息，已登记
    Accepted,
    /// 与近期消息相似，已登记但调用方可以提示用户
    AcceptedSimilar(DuplicateCheck),
    /// 重复或重传，未登记
    Rejected(DuplicateCheck),
}

impl IncomingDecision {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, IncomingDecision::Rejected(_))
    }
}

pub struct IncomingMessageGate {
    detector: Arc<DuplicateDetector>,
}

impl IncomingMessageGate {
    pub fn new(detector: Arc<DuplicateDetector>) -> Self {
        Self { detector }
    }

    /// 判断一条接收到的消息是否需要处理，接受的消息会登记到检测器中
    pub fn accept(&self, message: &str, phone: &str, received_at: DateTime<Utc>) -> IncomingDecision {
        // 判定与登记在同一把锁内完成，并发到达的重传不会同时通过
        let check = self.detector.check_and_register(message, phone, received_at);

        match check.kind {
            DuplicateKind::Exact | DuplicateKind::Burst => {
                info!("丢弃来自 {} 的重复消息 ({})", phone, check.kind);
                metrics::counter!("bulksend_incoming_rejected_total").increment(1);
                IncomingDecision::Rejected(check)
            }
            DuplicateKind::Similar => {
                debug!("来自 {} 的消息与近期消息相似", phone);
                IncomingDecision::AcceptedSimilar(check)
            }
            DuplicateKind::None => IncomingDecision::Accepted,
        }
    }
}
