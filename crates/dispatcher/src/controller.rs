//! 批量发送控制器
//!
//! 控制器为每次发送启动一个独立的工作任务，按列表顺序逐条处理接收人：
//!
//! ```text
//! 取消检查 → 暂停闸门 → 渲染模板 → 重复检测 → 熔断器/通道探测
//!          → 写入 PENDING 记录 → 带重试发送 → 更新记录与计数
//! ```
//!
//! 阶段变化由 [`DispatchHandle`] 发起，计数由工作任务批量刷新，两者都通过同一个
//! `watch` 通道发布 [`QueueState`] 快照。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bulksend_core::circuit_breaker::CircuitBreaker;
use bulksend_core::config::{DispatchConfig, RetryConfig};
use bulksend_core::errors::{DispatchError, DispatchResult, SendError};
use bulksend_core::models::{
    DispatchAction, DispatchPhase, QueueState, Recipient, SendLogRecord, SendStatus, SendTask,
};
use bulksend_core::traits::{Clock, SendLogStore, Sender, SystemClock};

use crate::duplicate_detector::{DuplicateDetector, DuplicateKind};
use crate::retry_service::{OnRetry, RetryPolicy};
use crate::template::MessageTemplate;

/// 是否有发送任务正在运行，供对账服务避让
#[derive(Debug, Clone, Default)]
pub struct DispatchActivity {
    active: Arc<AtomicBool>,
}

impl DispatchActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark a run as active; `None` if one already is.
    pub fn try_begin(&self) -> Option<ActivityGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ActivityGuard {
                active: self.active.clone(),
            })
    }
}

/// Clears the activity flag when dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    active: Arc<AtomicBool>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// 暂停闸门
#[derive(Debug, Clone)]
struct PauseGate {
    paused: watch::Receiver<bool>,
}

impl PauseGate {
    /// Wait until not paused. Returns `false` if cancelled while waiting.
    async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            if !*self.paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        // 控制端已释放，不会再有人恢复
                        return !cancel.is_cancelled();
                    }
                }
            }
        }
    }
}

/// 一次发送运行的最终结果
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub state: QueueState,
    /// 因熔断器打开或通道不可用而未发送的接收人，按原顺序排列
    pub deferred: Vec<Recipient>,
}

/// 正在运行的发送任务的控制句柄
pub struct DispatchHandle {
    run_id: Uuid,
    state_tx: Arc<watch::Sender<QueueState>>,
    state_rx: watch::Receiver<QueueState>,
    pause_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    worker: JoinHandle<DispatchResult<DispatchReport>>,
}

impl DispatchHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// 当前状态快照
    pub fn observe(&self) -> QueueState {
        self.state_rx.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, action: DispatchAction) -> DispatchResult<DispatchPhase> {
        apply_action(&self.state_tx, action)
    }

    pub fn pause(&self) -> DispatchResult<()> {
        self.transition(DispatchAction::Pause)?;
        self.pause_tx.send_replace(true);
        info!("发送任务 {} 已暂停", self.run_id);
        Ok(())
    }

    pub fn resume(&self) -> DispatchResult<()> {
        self.transition(DispatchAction::Resume)?;
        self.pause_tx.send_replace(false);
        info!("发送任务 {} 已恢复", self.run_id);
        Ok(())
    }

    /// 在发送中和暂停之间切换，返回切换后的阶段
    pub fn toggle_pause(&self) -> DispatchResult<DispatchPhase> {
        match self.observe().phase {
            DispatchPhase::Paused => self.resume()?,
            _ => self.pause()?,
        }
        Ok(self.observe().phase)
    }

    /// 停止发送
    ///
    /// 取消令牌会立即唤醒暂停中的工作任务。对已经结束的运行调用是无害的。
    pub fn stop(&self) -> DispatchResult<()> {
        let phase = self.observe().phase;
        if phase.is_active() || phase == DispatchPhase::Stopped {
            self.transition(DispatchAction::Stop)?;
        }
        self.cancel.cancel();
        self.pause_tx.send_replace(false);
        info!("发送任务 {} 已请求停止", self.run_id);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// 等待工作任务结束
    ///
    /// 持久化失败等不可恢复的错误会在这里返回，同时状态中的 `error` 字段记录原因。
    pub async fn wait(self) -> DispatchResult<DispatchReport> {
        match self.worker.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Internal(format!("发送任务异常退出: {e}"))),
        }
    }
}

fn apply_action(
    state_tx: &watch::Sender<QueueState>,
    action: DispatchAction,
) -> DispatchResult<DispatchPhase> {
    let mut outcome = Err(DispatchError::Internal("状态未更新".to_string()));
    state_tx.send_if_modified(|state| match state.phase.apply(action) {
        Ok(next) => {
            let changed = next != state.phase;
            state.phase = next;
            outcome = Ok(next);
            changed
        }
        Err(e) => {
            outcome = Err(e);
            false
        }
    });
    outcome
}

/// 批量发送控制器
pub struct DispatchController {
    sender: Arc<dyn Sender>,
    store: Arc<dyn SendLogStore>,
    detector: Arc<DuplicateDetector>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    retry_config: RetryConfig,
    activity: DispatchActivity,
}

impl DispatchController {
    pub fn new(
        sender: Arc<dyn Sender>,
        store: Arc<dyn SendLogStore>,
        detector: Arc<DuplicateDetector>,
        breaker: Arc<CircuitBreaker>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            sender,
            store,
            detector,
            breaker,
            clock: Arc::new(SystemClock),
            retry_config,
            activity: DispatchActivity::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 与对账服务共享的运行标记
    pub fn activity(&self) -> DispatchActivity {
        self.activity.clone()
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    pub fn detector(&self) -> Arc<DuplicateDetector> {
        self.detector.clone()
    }

    /// 启动一次批量发送
    ///
    /// 同一时间只允许一个运行；已有运行时返回 `AlreadyRunning`。
    /// 必须在 tokio 运行时中调用。
    pub fn start_dispatch(
        &self,
        recipients: Vec<Recipient>,
        template: impl Into<MessageTemplate>,
        config: DispatchConfig,
    ) -> DispatchResult<DispatchHandle> {
        config
            .validate()
            .map_err(|e| DispatchError::Configuration(e.to_string()))?;

        let guard = self.activity.try_begin().ok_or(DispatchError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let mut initial = QueueState::new(recipients.len() as u64);
        initial.phase = DispatchPhase::Idle.apply(DispatchAction::Start)?;

        let (state_tx, state_rx) = watch::channel(initial);
        let state_tx = Arc::new(state_tx);
        let (pause_tx, pause_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        info!(
            "启动发送任务 {}: {} 个接收人，批次大小 {}，发送间隔 {}ms",
            run_id,
            recipients.len(),
            config.batch_size,
            config.send_speed_ms
        );

        let worker = DispatchWorker {
            run_id,
            sender: self.sender.clone(),
            store: self.store.clone(),
            detector: self.detector.clone(),
            breaker: self.breaker.clone(),
            clock: self.clock.clone(),
            retry: RetryPolicy::new(self.retry_config.clone()),
            template: template.into(),
            config,
            state_tx: state_tx.clone(),
            gate: PauseGate { paused: pause_rx },
            cancel: cancel.clone(),
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            worker.run(recipients).await
        });

        Ok(DispatchHandle {
            run_id,
            state_tx,
            state_rx,
            pause_tx,
            cancel,
            worker: handle,
        })
    }
}

/// 单条接收人的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Sent,
    Failed,
    Skipped,
    Deferred,
    Cancelled,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    sent: u64,
    failed: u64,
    queued: u64,
    skipped: u64,
    processed: u64,
}

struct DispatchWorker {
    run_id: Uuid,
    sender: Arc<dyn Sender>,
    store: Arc<dyn SendLogStore>,
    detector: Arc<DuplicateDetector>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    template: MessageTemplate,
    config: DispatchConfig,
    state_tx: Arc<watch::Sender<QueueState>>,
    gate: PauseGate,
    cancel: CancellationToken,
}

impl DispatchWorker {
    async fn run(mut self, recipients: Vec<Recipient>) -> DispatchResult<DispatchReport> {
        let mut counters = Counters::default();
        let mut deferred = Vec::new();

        let result = self.process_all(&recipients, &mut counters, &mut deferred).await;
        self.flush(&counters);

        match result {
            Ok(()) => {
                let action = if self.cancel.is_cancelled() {
                    DispatchAction::Stop
                } else {
                    DispatchAction::Complete
                };
                if let Err(e) = apply_action(&self.state_tx, action) {
                    debug!("发送任务 {} 结束时阶段未变更: {}", self.run_id, e);
                }

                let state = self.state_tx.borrow().clone();
                info!(
                    "发送任务 {} 结束 ({}): 成功 {}，失败 {}，延后 {}，跳过 {}",
                    self.run_id, state.phase, state.sent, state.failed, state.queued, state.skipped
                );
                Ok(DispatchReport {
                    run_id: self.run_id,
                    state,
                    deferred,
                })
            }
            Err(e) => {
                error!("发送任务 {} 中止: {}", self.run_id, e);
                let reason = e.to_string();
                self.state_tx.send_modify(|state| {
                    state.phase = state.phase.apply(DispatchAction::Abort).unwrap_or(DispatchPhase::Stopped);
                    state.error = Some(reason);
                });
                self.cancel.cancel();
                Err(e)
            }
        }
    }

    async fn process_all(
        &mut self,
        recipients: &[Recipient],
        counters: &mut Counters,
        deferred: &mut Vec<Recipient>,
    ) -> DispatchResult<()> {
        let flush_interval = self.config.flush_interval();
        let send_speed = self.config.send_speed();
        let total = recipients.len();
        let mut last_flush = Instant::now();
        let mut position = 0usize;

        for (batch_index, batch) in recipients.chunks(self.config.batch_size).enumerate() {
            debug!(
                "发送任务 {} 开始第 {} 批，共 {} 条",
                self.run_id,
                batch_index + 1,
                batch.len()
            );

            for recipient in batch {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                if !self.gate.wait(&self.cancel).await {
                    return Ok(());
                }

                let outcome = self.process_item(recipient).await?;
                match outcome {
                    ItemOutcome::Sent => counters.sent += 1,
                    ItemOutcome::Failed => counters.failed += 1,
                    ItemOutcome::Skipped => counters.skipped += 1,
                    ItemOutcome::Deferred => {
                        counters.queued += 1;
                        deferred.push(recipient.clone());
                    }
                    ItemOutcome::Cancelled => return Ok(()),
                }
                counters.processed += 1;
                position += 1;

                if last_flush.elapsed() >= flush_interval {
                    self.flush(counters);
                    last_flush = Instant::now();
                }

                if position < total && !send_speed.is_zero() && !self.pace(send_speed).await {
                    return Ok(());
                }
            }

            self.flush(counters);
            last_flush = Instant::now();
        }

        Ok(())
    }

    /// Inter-item delay. Returns `false` if cancelled while sleeping.
    async fn pace(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn process_item(&self, recipient: &Recipient) -> DispatchResult<ItemOutcome> {
        let body = self.template.render(recipient);
        let phone = recipient.phone.trim();

        if !recipient.has_phone() || body.trim().is_empty() {
            warn!("接收人号码或消息内容为空，标记为失败: {:?}", recipient.phone);
            let task = SendTask::new(phone, body);
            let mut record = SendLogRecord::pending(phone, task.body_hash, self.clock.now());
            record.status = SendStatus::Failed;
            self.store.append(&record).await?;
            metrics::counter!("bulksend_messages_failed_total").increment(1);
            return Ok(ItemOutcome::Failed);
        }

        let check = self.detector.check_duplicate(&body, phone, self.clock.now());
        match check.kind {
            DuplicateKind::Exact | DuplicateKind::Burst => {
                info!(
                    "跳过重复消息 ({}): 号码 {}，距上一条 {:?}",
                    check.kind,
                    phone,
                    check.time_since_last.map(|d| d.num_milliseconds())
                );
                metrics::counter!("bulksend_messages_skipped_total").increment(1);
                return Ok(ItemOutcome::Skipped);
            }
            DuplicateKind::Similar => {
                debug!("号码 {} 的消息与近期消息相似，继续发送", phone);
            }
            DuplicateKind::None => {}
        }

        if !self.breaker.can_send().await {
            debug!(
                "熔断器打开，延后发送 {}（剩余冷却 {}ms）",
                phone,
                self.breaker.cooldown_remaining_ms().await
            );
            metrics::counter!("bulksend_messages_deferred_total").increment(1);
            return Ok(ItemOutcome::Deferred);
        }

        if !self.sender.can_send_now().await {
            warn!("发送通道 {} 当前不可用，延后发送 {}", self.sender.name(), phone);
            self.breaker.record_failure().await;
            metrics::counter!("bulksend_messages_deferred_total").increment(1);
            return Ok(ItemOutcome::Deferred);
        }

        let task = SendTask::new(phone, body);
        let record = self
            .store
            .append(&SendLogRecord::pending(
                &task.phone,
                &task.body_hash,
                self.clock.now(),
            ))
            .await?;

        let retries = AtomicU32::new(0);
        let on_retry = |attempt: u32, err: &SendError, delay: Duration| {
            retries.store(attempt, Ordering::Relaxed);
            debug!(
                "{} 第 {} 次发送失败 ({})，{}ms 后重试",
                task.phone,
                attempt,
                err,
                delay.as_millis()
            );
        };
        let hook: OnRetry<'_, SendError> = &on_retry;

        let sender = self.sender.clone();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                // 记录保持 PENDING，由对账服务处理
                debug!("发送 {} 时收到停止请求，记录 {} 保持待定", task.phone, record.id);
                return Ok(ItemOutcome::Cancelled);
            }
            result = self.retry.execute_with_retry(
                || sender.send(&task.phone, &task.body),
                "发送短信",
                Some(hook),
            ) => result,
        };

        let retry_count = retries.load(Ordering::Relaxed);
        if retry_count > 0 {
            self.store
                .update_retry_count(record.id, retry_count as i32)
                .await?;
        }

        match result {
            Ok(delivered) => {
                self.detector.register(&task.body, &task.phone, self.clock.now());
                self.breaker.record_success().await;
                self.store.update_status(record.id, SendStatus::Sent).await?;
                if delivered {
                    self.store
                        .update_status(record.id, SendStatus::Delivered)
                        .await?;
                }
                metrics::counter!("bulksend_messages_sent_total").increment(1);
                debug!("已发送至 {} (记录 {})", task.phone, record.id);
                Ok(ItemOutcome::Sent)
            }
            Err(err) => {
                warn!("发送至 {} 失败: {}", task.phone, err);
                self.breaker.record_failure().await;
                self.store.update_status(record.id, SendStatus::Failed).await?;
                metrics::counter!("bulksend_messages_failed_total").increment(1);
                Ok(ItemOutcome::Failed)
            }
        }
    }

    /// 把累计的计数发布到状态快照，阶段由控制端维护
    fn flush(&self, counters: &Counters) {
        self.state_tx.send_if_modified(|state| {
            let changed = state.sent != counters.sent
                || state.failed != counters.failed
                || state.queued != counters.queued
                || state.skipped != counters.skipped
                || state.processed != counters.processed;
            state.sent = counters.sent;
            state.failed = counters.failed;
            state.queued = counters.queued;
            state.skipped = counters.skipped;
            state.processed = counters.processed;
            changed
        });
    }
}
