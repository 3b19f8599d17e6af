pub mod sqlite_send_log_store;

pub use sqlite_send_log_store::SqliteSendLogStore;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use bulksend_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{debug, info};

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate().context("数据库配置验证失败")?;

        info!("创建SQLite数据库连接池: {}", config.url);

        // 文件不存在时自动创建，启用WAL模式
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .context("解析数据库URL失败")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect_with(connect_options)
            .await
            .context("创建数据库连接池失败")?;

        Ok(Self { pool })
    }

    /// 复用已有的连接池
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建发送记录表和索引，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS send_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL,
                body_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                timestamp DATETIME NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建发送记录表失败")?;

        // 对账扫描按状态+时间查询
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_send_logs_status_timestamp ON send_logs(status, timestamp)",
        )
        .execute(&self.pool)
        .await
        .context("创建发送记录状态索引失败")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_send_logs_phone ON send_logs(phone)")
            .execute(&self.pool)
            .await
            .context("创建发送记录号码索引失败")?;

        info!("✅ 数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn send_log_store(&self) -> SqliteSendLogStore {
        SqliteSendLogStore::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbPool = Pool<Sqlite>;

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sqlite_database_manager() {
        let db_manager = DatabaseManager::new(&memory_config()).await.unwrap();

        assert!(db_manager.health_check().await.is_ok());
        db_manager.migrate().await.unwrap();
        // 迁移可以重复执行
        db_manager.migrate().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM send_logs")
            .fetch_one(db_manager.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);

        db_manager.close().await;
    }

    #[tokio::test]
    async fn test_rejects_non_sqlite_url() {
        let config = DatabaseConfig {
            url: "postgres://localhost/bulksend".to_string(),
            ..Default::default()
        };

        let err = DatabaseManager::new(&config).await.err().unwrap();
        assert!(err.to_string().contains("数据库配置验证失败"));
    }
}
