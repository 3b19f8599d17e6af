//! 发送记录对账
//!
//! 发送通道不一定报告送达结果，进程也可能在发送中途退出。对账服务定期扫描
//! 长时间停留在 `PENDING`/`SENT` 的记录并标记为 `UNKNOWN`，交由外部跟进。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bulksend_core::config::ReconciliationConfig;
use bulksend_core::models::SendStatus;
use bulksend_core::traits::{Clock, SendLogStore, SystemClock};

use crate::controller::DispatchActivity;

/// 一次对账的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed,
    /// 已有对账正在运行
    AlreadyRunning,
    /// 有发送任务正在运行，本轮让出
    DispatchActive,
    /// 被关闭信号打断，已处理的记录保持更新后的状态
    Interrupted,
    /// 查询过期记录失败
    QueryFailed,
}

/// 对账统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub outcome: SweepOutcome,
    /// 扫描到的过期记录数
    pub scanned: usize,
    /// 标记为 UNKNOWN 的记录数
    pub reconciled: usize,
    /// 更新失败的记录数
    pub failed: usize,
    pub duration: Duration,
}

impl ReconciliationReport {
    fn empty(outcome: SweepOutcome) -> Self {
        Self {
            outcome,
            scanned: 0,
            reconciled: 0,
            failed: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Resets the reentry flag when a sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 对账服务
pub struct ReconciliationSweeper {
    store: Arc<dyn SendLogStore>,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
    activity: Option<DispatchActivity>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl ReconciliationSweeper {
    pub fn new(store: Arc<dyn SendLogStore>, config: ReconciliationConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
            activity: None,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 发送任务运行期间让出
    pub fn with_dispatch_activity(mut self, activity: DispatchActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// 关闭信号，取消后正在进行的对账在下一条记录前停止
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 使用配置中的过期阈值执行一次对账
    pub async fn run_once(&self) -> ReconciliationReport {
        self.run_reconciliation(self.config.stale_threshold()).await
    }

    /// 将早于 `stale_threshold` 的 `PENDING`/`SENT` 记录标记为 `UNKNOWN`
    ///
    /// 不返回错误：单条记录的失败只记录日志，查询失败体现在报告的 `outcome` 中。
    pub async fn run_reconciliation(&self, stale_threshold: Duration) -> ReconciliationReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("对账正在进行中，跳过本次请求");
            return ReconciliationReport::empty(SweepOutcome::AlreadyRunning);
        }
        let _guard = SweepGuard(&self.running);

        if self.config.defer_while_dispatching
            && self.activity.as_ref().is_some_and(DispatchActivity::is_active)
        {
            info!("发送任务正在运行，推迟本轮对账");
            return ReconciliationReport::empty(SweepOutcome::DispatchActive);
        }

        let start_time = std::time::Instant::now();
        let threshold = chrono::Duration::from_std(stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = self.clock.now() - threshold;

        info!("开始对账: 处理 {} 之前未决的发送记录", cutoff);

        let mut report = ReconciliationReport::empty(SweepOutcome::Completed);
        // 更新失败的记录仍然过期，会在下一页再次出现，只统计一次
        let mut failed_ids: HashSet<i64> = HashSet::new();

        loop {
            let records = match self.store.query_stale(cutoff, self.config.batch_limit).await {
                Ok(records) => records,
                Err(e) => {
                    error!("查询过期发送记录失败: {}", e);
                    report.outcome = SweepOutcome::QueryFailed;
                    break;
                }
            };

            let page_size = records.len();
            let mut progressed = 0usize;

            for record in records {
                if failed_ids.contains(&record.id) {
                    continue;
                }
                report.scanned += 1;

                if self.shutdown.is_cancelled() {
                    warn!("对账被关闭信号打断，已处理 {} 条", report.reconciled);
                    report.outcome = SweepOutcome::Interrupted;
                    report.duration = start_time.elapsed();
                    return report;
                }

                if !record.status.can_transition_to(SendStatus::Unknown) {
                    continue;
                }

                match self.store.update_status(record.id, SendStatus::Unknown).await {
                    Ok(()) => {
                        debug!(
                            "{} 状态 {} 超时未确认，标记为 UNKNOWN",
                            record.entity_description(),
                            record.status
                        );
                        report.reconciled += 1;
                        progressed += 1;
                    }
                    Err(e) => {
                        warn!("更新{}失败: {}", record.entity_description(), e);
                        failed_ids.insert(record.id);
                        report.failed += 1;
                    }
                }
            }

            // 未满一页或本页没有任何进展时结束，避免在无法更新的记录上打转
            if (page_size as i64) < self.config.batch_limit || progressed == 0 {
                break;
            }
        }

        report.duration = start_time.elapsed();
        metrics::counter!("bulksend_reconciled_total").increment(report.reconciled as u64);
        info!(
            "对账完成: 扫描 {} 条，标记 {} 条为 UNKNOWN，失败 {} 条，耗时 {:?}",
            report.scanned, report.reconciled, report.failed, report.duration
        );

        report
    }
}

/// 定时对账调度器
///
/// 启动后立即执行一次，之后按配置的间隔执行。
pub struct ReconciliationScheduler {
    sweeper: Arc<ReconciliationSweeper>,
    handle: Option<JoinHandle<()>>,
}

impl ReconciliationScheduler {
    pub fn new(sweeper: Arc<ReconciliationSweeper>) -> Self {
        Self {
            sweeper,
            handle: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// 启动调度器
    pub fn start(&mut self) {
        if !self.sweeper.config().enabled {
            info!("对账服务未启用");
            return;
        }
        if self.handle.is_some() {
            warn!("对账调度器已经启动");
            return;
        }

        let period = self.sweeper.config().interval();
        info!("启动对账调度器，间隔 {:?}", period);

        let shutdown = self.sweeper.shutdown_token();
        let sweeper = self.sweeper.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = sweeper.run_once().await;
                        if report.outcome == SweepOutcome::QueryFailed {
                            error!("定时对账失败，将在下个周期重试");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("对账调度器收到关闭信号");
                        break;
                    }
                }
            }

            info!("对账调度器已停止");
        });

        self.handle = Some(handle);
    }

    /// 停止调度器，并打断正在进行的对账
    pub async fn stop(&mut self) {
        self.sweeper.shutdown_token().cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("等待对账调度器停止时出错: {}", e);
            }
        }
    }
}
