//! 发送记录持久化接口
//!
//! 控制器在发起发送时追加 `PENDING` 记录，并在得到结果后更新状态；
//! 对账服务扫描长时间未决的记录并将其标记为 `UNKNOWN`。两者可能并发访问，
//! 实现必须保证单条记录的状态更新是原子的，并拒绝不合法的状态流转。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::DispatchResult;
use crate::models::{SendLogRecord, SendStatus};

#[async_trait]
pub trait SendLogStore: Send + Sync {
    /// 追加一条记录，返回带有存储分配ID的记录
    async fn append(&self, record: &SendLogRecord) -> DispatchResult<SendLogRecord>;

    /// 查询时间早于 `older_than` 且状态为 `PENDING`/`SENT` 的记录，按时间升序，最多 `limit` 条
    async fn query_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<SendLogRecord>>;

    /// 更新记录状态
    ///
    /// # 错误
    ///
    /// * `SendLogNotFound` - 记录不存在
    /// * `InvalidStatusTransition` - 状态流转不合法（见 [`SendStatus::can_transition_to`]）
    async fn update_status(&self, id: i64, status: SendStatus) -> DispatchResult<()>;

    /// 记录发送过程中的重试次数
    async fn update_retry_count(&self, id: i64, retry_count: i32) -> DispatchResult<()>;

    async fn get(&self, id: i64) -> DispatchResult<Option<SendLogRecord>>;

    async fn list_by_status(&self, status: SendStatus) -> DispatchResult<Vec<SendLogRecord>>;
}
