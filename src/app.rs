use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bulksend_core::config::AppConfig;
use bulksend_core::models::Recipient;
use bulksend_core::traits::{SendLogStore, Sender};
use bulksend_core::CircuitBreaker;
use bulksend_dispatcher::{
    DispatchController, DispatchReport, DuplicateDetector, IncomingMessageGate,
    ReconciliationReport, ReconciliationScheduler, ReconciliationSweeper,
};
use bulksend_infrastructure::{DatabaseManager, LoggingSender};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 主应用程序
///
/// 持有数据库、发送控制器和共享的去重器，每个命令都在同一套组件上运行。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    store: Arc<dyn SendLogStore>,
    controller: DispatchController,
}

impl Application {
    /// 使用演练通道创建应用
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_sender(config, Arc::new(LoggingSender::new())).await
    }

    pub async fn with_sender(config: AppConfig, sender: Arc<dyn Sender>) -> Result<Self> {
        info!("初始化应用程序，发送通道: {}", sender.name());

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("数据库迁移失败")?;
        database.health_check().await.context("数据库健康检查失败")?;

        let store: Arc<dyn SendLogStore> = Arc::new(database.send_log_store());
        let detector = Arc::new(DuplicateDetector::new(config.duplicate.clone()));
        let breaker = Arc::new(CircuitBreaker::with_config(config.circuit_breaker.clone()));

        let controller = DispatchController::new(
            sender,
            store.clone(),
            detector,
            breaker,
            config.retry.clone(),
        );

        Ok(Self {
            config,
            database,
            store,
            controller,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SendLogStore> {
        self.store.clone()
    }

    pub fn controller(&self) -> &DispatchController {
        &self.controller
    }

    /// 与发送控制器共享去重历史的接收消息过滤器
    pub fn incoming_gate(&self) -> IncomingMessageGate {
        IncomingMessageGate::new(self.controller.detector())
    }

    /// 每个命令使用独立的对账服务，关闭令牌不会影响后续命令
    fn new_sweeper(&self) -> Arc<ReconciliationSweeper> {
        Arc::new(
            ReconciliationSweeper::new(self.store.clone(), self.config.reconciliation.clone())
                .with_dispatch_activity(self.controller.activity()),
        )
    }

    /// 执行一次批量发送，期间在后台运行对账调度器
    ///
    /// 收到关闭信号时停止发送，已发出的消息照常计数。
    pub async fn run_dispatch(
        &self,
        recipients: Vec<Recipient>,
        template: &str,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<DispatchReport> {
        let handle = self
            .controller
            .start_dispatch(recipients, template, self.config.dispatch.clone())
            .context("启动发送任务失败")?;

        // 发送期间到期的对账会推迟到下个周期
        let mut scheduler = ReconciliationScheduler::new(self.new_sweeper());
        scheduler.start();
        let mut state_rx = handle.subscribe();

        tokio::select! {
            _ = state_rx.wait_for(|state| !state.phase.is_active()) => {}
            _ = shutdown_rx.recv() => {
                info!("收到关闭信号，停止发送任务 {}", handle.run_id());
                handle.stop().context("停止发送任务失败")?;
            }
        }

        let result = handle.wait().await;
        scheduler.stop().await;

        let report = result.context("发送任务异常中止")?;
        info!(
            "发送任务 {} 结束: 成功 {}, 失败 {}, 延后 {}, 跳过 {}",
            report.run_id,
            report.state.sent,
            report.state.failed,
            report.state.queued,
            report.state.skipped
        );
        if !report.deferred.is_empty() {
            warn!("{} 个接收人因熔断或通道不可用未发送", report.deferred.len());
        }
        Ok(report)
    }

    /// 执行一次对账，`stale_threshold` 为空时使用配置值
    pub async fn run_reconcile(
        &self,
        stale_threshold: Option<Duration>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<ReconciliationReport> {
        let sweeper = self.new_sweeper();
        let threshold = stale_threshold.unwrap_or_else(|| self.config.reconciliation.stale_threshold());

        let shutdown = sweeper.shutdown_token();
        let watcher = tokio::spawn(async move {
            if shutdown_rx.recv().await.is_ok() {
                shutdown.cancel();
            }
        });

        let report = sweeper.run_reconciliation(threshold).await;
        watcher.abort();

        info!(
            "对账结束: {:?}, 扫描 {}, 标记 {}, 失败 {}",
            report.outcome, report.scanned, report.reconciled, report.failed
        );
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.database.close().await;
        info!("应用程序已关闭");
    }
}

/// 从JSON文件读取接收人列表
pub fn load_recipients(path: impl AsRef<Path>) -> Result<Vec<Recipient>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取接收人文件失败: {}", path.display()))?;
    let recipients: Vec<Recipient> = serde_json::from_str(&content)
        .with_context(|| format!("解析接收人文件失败: {}", path.display()))?;
    Ok(recipients)
}
