// ==========================================
// 客户档案导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ===== 配置键 =====
const KEY_PREVIEW_ROW_LIMIT: &str = "import/preview_row_limit";
const KEY_SAMPLE_VALUE_LIMIT: &str = "import/sample_value_limit";
const KEY_MAX_DUPLICATE_CANDIDATES: &str = "import/max_duplicate_candidates";
const KEY_DEFAULT_DUPLICATE_THRESHOLD: &str = "import/default_duplicate_threshold";
const KEY_AUTO_APPLY_THRESHOLD: &str = "import/auto_apply_threshold";
const KEY_REVIEW_THRESHOLD: &str = "import/review_threshold";
const KEY_RULE_MAPPING_CONFIDENCE: &str = "import/rule_mapping_confidence";
const KEY_ROLLBACK_WINDOW_HOURS: &str = "import/rollback_window_hours";
const KEY_BATCH_RETENTION_DAYS: &str = "import/batch_retention_days";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致,会对传入连接再次应用统一 PRAGMA(幂等)。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值(scope_id='global')
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取并解析配置值,缺失时返回默认值
    fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>> {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|_| format!("配置值格式错误 (key: {}, value: {})", key, raw).into()),
        }
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_preview_row_limit(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or(KEY_PREVIEW_ROW_LIMIT, 10)
    }

    async fn get_sample_value_limit(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or(KEY_SAMPLE_VALUE_LIMIT, 5)
    }

    async fn get_max_duplicate_candidates(&self) -> Result<usize, Box<dyn Error>> {
        self.get_parsed_or(KEY_MAX_DUPLICATE_CANDIDATES, 5)
    }

    async fn get_default_duplicate_threshold(&self) -> Result<f64, Box<dyn Error>> {
        self.get_parsed_or(KEY_DEFAULT_DUPLICATE_THRESHOLD, 0.7)
    }

    async fn get_auto_apply_threshold(&self) -> Result<f64, Box<dyn Error>> {
        self.get_parsed_or(KEY_AUTO_APPLY_THRESHOLD, 0.95)
    }

    async fn get_review_threshold(&self) -> Result<f64, Box<dyn Error>> {
        self.get_parsed_or(KEY_REVIEW_THRESHOLD, 0.80)
    }

    async fn get_rule_mapping_confidence(&self) -> Result<f64, Box<dyn Error>> {
        self.get_parsed_or(KEY_RULE_MAPPING_CONFIDENCE, 0.7)
    }

    async fn get_rollback_window_hours(&self) -> Result<i64, Box<dyn Error>> {
        self.get_parsed_or(KEY_ROLLBACK_WINDOW_HOURS, 24)
    }

    async fn get_batch_retention_days(&self) -> Result<i32, Box<dyn Error>> {
        self.get_parsed_or(KEY_BATCH_RETENTION_DAYS, 90)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn create_manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    #[tokio::test]
    async fn test_defaults_when_config_kv_empty() {
        let manager = create_manager();

        assert_eq!(manager.get_preview_row_limit().await.unwrap(), 10);
        assert_eq!(manager.get_max_duplicate_candidates().await.unwrap(), 5);
        assert_eq!(manager.get_rollback_window_hours().await.unwrap(), 24);
        assert_eq!(manager.get_auto_apply_threshold().await.unwrap(), 0.95);
    }

    #[tokio::test]
    async fn test_reads_overridden_value() {
        let manager = create_manager();
        {
            let conn = manager.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)",
                params![KEY_ROLLBACK_WINDOW_HOURS, "48"],
            )
            .unwrap();
        }

        assert_eq!(manager.get_rollback_window_hours().await.unwrap(), 48);
    }

    #[tokio::test]
    async fn test_invalid_value_is_an_error() {
        let manager = create_manager();
        {
            let conn = manager.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, 'abc')",
                params![KEY_PREVIEW_ROW_LIMIT],
            )
            .unwrap();
        }

        assert!(manager.get_preview_row_limit().await.is_err());
    }
}
