// ==========================================
// 客户档案导入系统 - 导入仓储实现
// ==========================================
// 职责: import_batch / import_record 表的 rusqlite 实现
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::import::{ImportBatch, ImportRecord};
use crate::domain::types::{BatchStatus, ImportAction, RecordStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_repo::ImportRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ImportRepositoryImpl
// ==========================================
pub struct ImportRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ImportRepositoryImpl {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 Repository
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批次行 → ImportBatch(JSON 列在此反序列化)
    fn map_batch_row(row: &Row<'_>) -> rusqlite::Result<RawBatchRow> {
        Ok(RawBatchRow {
            batch_id: row.get(0)?,
            org_id: row.get(1)?,
            file_name: row.get(2)?,
            file_size: row.get(3)?,
            status: row.get(4)?,
            total_rows: row.get(5)?,
            detected_columns_json: row.get(6)?,
            preview_rows_json: row.get(7)?,
            field_mappings_json: row.get(8)?,
            duplicate_settings_json: row.get(9)?,
            created_count: row.get(10)?,
            updated_count: row.get(11)?,
            skipped_count: row.get(12)?,
            failed_count: row.get(13)?,
            error_message: row.get(14)?,
            rollback_deadline: row.get(15)?,
            uploaded_by: row.get(16)?,
            elapsed_ms: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn map_record_row(row: &Row<'_>) -> rusqlite::Result<RawRecordRow> {
        Ok(RawRecordRow {
            record_id: row.get(0)?,
            batch_id: row.get(1)?,
            row_number: row.get(2)?,
            status: row.get(3)?,
            suggested_action: row.get(4)?,
            chosen_action: row.get(5)?,
            raw_values_json: row.get(6)?,
            mapped_values_json: row.get(7)?,
            matches_json: row.get(8)?,
            validation_errors_json: row.get(9)?,
            client_id: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

const BATCH_COLUMNS: &str = "batch_id, org_id, file_name, file_size, status, total_rows, \
     detected_columns_json, preview_rows_json, field_mappings_json, duplicate_settings_json, \
     created_count, updated_count, skipped_count, failed_count, error_message, \
     rollback_deadline, uploaded_by, elapsed_ms, created_at, updated_at";

const RECORD_COLUMNS: &str = "record_id, batch_id, row_number, status, suggested_action, \
     chosen_action, raw_values_json, mapped_values_json, matches_json, \
     validation_errors_json, client_id, created_at";

// 中间行结构: query_map 闭包内只取原始值,JSON/枚举解析在闭包外完成
struct RawBatchRow {
    batch_id: String,
    org_id: String,
    file_name: String,
    file_size: i64,
    status: String,
    total_rows: i32,
    detected_columns_json: String,
    preview_rows_json: String,
    field_mappings_json: String,
    duplicate_settings_json: String,
    created_count: i32,
    updated_count: i32,
    skipped_count: i32,
    failed_count: i32,
    error_message: Option<String>,
    rollback_deadline: Option<DateTime<Utc>>,
    uploaded_by: Option<String>,
    elapsed_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RawBatchRow {
    fn into_batch(self) -> RepositoryResult<ImportBatch> {
        let status = BatchStatus::parse_str(&self.status).ok_or_else(|| {
            RepositoryError::InternalError(format!("未知批次状态: {}", self.status))
        })?;

        Ok(ImportBatch {
            batch_id: self.batch_id,
            org_id: self.org_id,
            file_name: self.file_name,
            file_size: self.file_size,
            status,
            total_rows: self.total_rows,
            detected_columns: serde_json::from_str(&self.detected_columns_json)?,
            preview_rows: serde_json::from_str(&self.preview_rows_json)?,
            field_mappings: serde_json::from_str(&self.field_mappings_json)?,
            duplicate_settings: serde_json::from_str(&self.duplicate_settings_json)?,
            created_count: self.created_count,
            updated_count: self.updated_count,
            skipped_count: self.skipped_count,
            failed_count: self.failed_count,
            error_message: self.error_message,
            rollback_deadline: self.rollback_deadline,
            uploaded_by: self.uploaded_by,
            elapsed_ms: self.elapsed_ms,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RawRecordRow {
    record_id: String,
    batch_id: String,
    row_number: i64,
    status: String,
    suggested_action: String,
    chosen_action: String,
    raw_values_json: String,
    mapped_values_json: String,
    matches_json: String,
    validation_errors_json: String,
    client_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl RawRecordRow {
    fn into_record(self) -> RepositoryResult<ImportRecord> {
        let status = RecordStatus::parse_str(&self.status).ok_or_else(|| {
            RepositoryError::InternalError(format!("未知行记录状态: {}", self.status))
        })?;
        let suggested_action = ImportAction::parse_str(&self.suggested_action).ok_or_else(|| {
            RepositoryError::InternalError(format!("未知导入动作: {}", self.suggested_action))
        })?;
        let chosen_action = ImportAction::parse_str(&self.chosen_action).ok_or_else(|| {
            RepositoryError::InternalError(format!("未知导入动作: {}", self.chosen_action))
        })?;

        Ok(ImportRecord {
            record_id: self.record_id,
            batch_id: self.batch_id,
            row_number: self.row_number as usize,
            status,
            suggested_action,
            chosen_action,
            raw_values: serde_json::from_str(&self.raw_values_json)?,
            mapped_values: serde_json::from_str(&self.mapped_values_json)?,
            matches: serde_json::from_str(&self.matches_json)?,
            validation_errors: serde_json::from_str(&self.validation_errors_json)?,
            client_id: self.client_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl ImportRepository for ImportRepositoryImpl {
    async fn insert_batch(&self, batch: ImportBatch) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO import_batch (
                batch_id, org_id, file_name, file_size, status, total_rows,
                detected_columns_json, preview_rows_json, field_mappings_json,
                duplicate_settings_json, created_count, updated_count, skipped_count,
                failed_count, error_message, rollback_deadline, uploaded_by, elapsed_ms,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
            )
            "#,
            params![
                batch.batch_id,
                batch.org_id,
                batch.file_name,
                batch.file_size,
                batch.status.as_str(),
                batch.total_rows,
                serde_json::to_string(&batch.detected_columns)
                    .map_err(RepositoryError::from)?,
                serde_json::to_string(&batch.preview_rows).map_err(RepositoryError::from)?,
                serde_json::to_string(&batch.field_mappings).map_err(RepositoryError::from)?,
                serde_json::to_string(&batch.duplicate_settings)
                    .map_err(RepositoryError::from)?,
                batch.created_count,
                batch.updated_count,
                batch.skipped_count,
                batch.failed_count,
                batch.error_message,
                batch.rollback_deadline,
                batch.uploaded_by,
                batch.elapsed_ms,
                batch.created_at,
                batch.updated_at,
            ],
        )
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<ImportBatch>, Box<dyn Error>> {
        let raw = {
            let conn = self.lock()?;
            let sql = format!("SELECT {} FROM import_batch WHERE batch_id = ?1", BATCH_COLUMNS);
            let result = conn.query_row(&sql, params![batch_id], Self::map_batch_row);

            match result {
                Ok(raw) => Some(raw),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(Box::new(RepositoryError::from(e))),
            }
        };

        match raw {
            Some(raw) => Ok(Some(raw.into_batch()?)),
            None => Ok(None),
        }
    }

    async fn update_batch(&self, batch: &ImportBatch) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        let affected = conn
            .execute(
                r#"
                UPDATE import_batch SET
                    status = ?2,
                    total_rows = ?3,
                    detected_columns_json = ?4,
                    preview_rows_json = ?5,
                    field_mappings_json = ?6,
                    duplicate_settings_json = ?7,
                    created_count = ?8,
                    updated_count = ?9,
                    skipped_count = ?10,
                    failed_count = ?11,
                    error_message = ?12,
                    rollback_deadline = ?13,
                    elapsed_ms = ?14,
                    updated_at = ?15
                WHERE batch_id = ?1
                "#,
                params![
                    batch.batch_id,
                    batch.status.as_str(),
                    batch.total_rows,
                    serde_json::to_string(&batch.detected_columns)
                        .map_err(RepositoryError::from)?,
                    serde_json::to_string(&batch.preview_rows).map_err(RepositoryError::from)?,
                    serde_json::to_string(&batch.field_mappings)
                        .map_err(RepositoryError::from)?,
                    serde_json::to_string(&batch.duplicate_settings)
                        .map_err(RepositoryError::from)?,
                    batch.created_count,
                    batch.updated_count,
                    batch.skipped_count,
                    batch.failed_count,
                    batch.error_message,
                    batch.rollback_deadline,
                    batch.elapsed_ms,
                    Utc::now(),
                ],
            )
            .map_err(RepositoryError::from)?;

        if affected == 0 {
            return Err(Box::new(RepositoryError::NotFound {
                entity: "ImportBatch".to_string(),
                id: batch.batch_id.clone(),
            }));
        }

        Ok(())
    }

    async fn get_recent_batches(&self, limit: usize) -> Result<Vec<ImportBatch>, Box<dyn Error>> {
        let raws = {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT {} FROM import_batch ORDER BY created_at DESC LIMIT ?1",
                BATCH_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(RepositoryError::from)?;
            let rows = stmt
                .query_map(params![limit as i64], Self::map_batch_row)
                .map_err(RepositoryError::from)?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(RepositoryError::from)?
        };

        let mut batches = Vec::with_capacity(raws.len());
        for raw in raws {
            batches.push(raw.into_batch()?);
        }
        Ok(batches)
    }

    async fn insert_record(&self, record: ImportRecord) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO import_record (
                record_id, batch_id, row_number, status, suggested_action, chosen_action,
                raw_values_json, mapped_values_json, matches_json, validation_errors_json,
                client_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.record_id,
                record.batch_id,
                record.row_number as i64,
                record.status.as_str(),
                record.suggested_action.as_str(),
                record.chosen_action.as_str(),
                serde_json::to_string(&record.raw_values).map_err(RepositoryError::from)?,
                serde_json::to_string(&record.mapped_values).map_err(RepositoryError::from)?,
                serde_json::to_string(&record.matches).map_err(RepositoryError::from)?,
                serde_json::to_string(&record.validation_errors)
                    .map_err(RepositoryError::from)?,
                record.client_id,
                record.created_at,
            ],
        )
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn list_records_by_batch(
        &self,
        batch_id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<ImportRecord>, Box<dyn Error>> {
        let raws = {
            let conn = self.lock()?;

            match status {
                Some(status) => {
                    let sql = format!(
                        "SELECT {} FROM import_record \
                         WHERE batch_id = ?1 AND status = ?2 ORDER BY row_number ASC",
                        RECORD_COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql).map_err(RepositoryError::from)?;
                    let rows = stmt
                        .query_map(params![batch_id, status.as_str()], Self::map_record_row)
                        .map_err(RepositoryError::from)?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(RepositoryError::from)?
                }
                None => {
                    let sql = format!(
                        "SELECT {} FROM import_record \
                         WHERE batch_id = ?1 ORDER BY row_number ASC",
                        RECORD_COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql).map_err(RepositoryError::from)?;
                    let rows = stmt
                        .query_map(params![batch_id], Self::map_record_row)
                        .map_err(RepositoryError::from)?;
                    rows.collect::<Result<Vec<_>, _>>()
                        .map_err(RepositoryError::from)?
                }
            }
        };

        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    async fn update_record_status(
        &self,
        record_id: &str,
        status: RecordStatus,
    ) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        let affected = conn
            .execute(
                "UPDATE import_record SET status = ?2 WHERE record_id = ?1",
                params![record_id, status.as_str()],
            )
            .map_err(RepositoryError::from)?;

        if affected == 0 {
            return Err(Box::new(RepositoryError::NotFound {
                entity: "ImportRecord".to_string(),
                id: record_id.to_string(),
            }));
        }

        Ok(())
    }
}
