// ==========================================
// 客户档案导入系统 - 回滚管理器实现
// ==========================================
// 职责: 在回滚窗口内撤销已完成批次的新建记录
// 语义: 逐条软删,单条失败不中断;扫完后批次一律置 ROLLED_BACK
// ==========================================

use crate::domain::import::RollbackSummary;
use crate::domain::types::{BatchStatus, RecordStatus};
use crate::importer::error::ImportError;
use crate::repository::{ClientRepository, ImportRepository};
use chrono::Utc;
use std::error::Error;
use tracing::{info, instrument, warn};

// ==========================================
// RollbackManager - 回滚管理器
// ==========================================
pub struct RollbackManager<R, K>
where
    R: ImportRepository,
    K: ClientRepository,
{
    import_repo: R,
    client_repo: K,
}

impl<R, K> RollbackManager<R, K>
where
    R: ImportRepository + Send + Sync,
    K: ClientRepository + Send + Sync,
{
    pub fn new(import_repo: R, client_repo: K) -> Self {
        Self {
            import_repo,
            client_repo,
        }
    }

    /// 回滚一个已完成批次
    ///
    /// # 前置条件
    /// - 批次状态为 COMPLETED,且当前时间早于回滚截止时间
    /// - 否则返回结构化拒绝原因(未完成 / 窗口过期),不做任何部分操作
    ///
    /// # 语义
    /// - 仅处理 CREATED 行: 软删对应客户,行状态翻转为 ROLLED_BACK
    /// - 单条失败计数并继续;扫完后批次置 ROLLED_BACK(与单条成败无关)
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn rollback(&self, batch_id: &str) -> Result<RollbackSummary, Box<dyn Error>> {
        let mut batch = self
            .import_repo
            .get_batch(batch_id)
            .await
            .map_err(|e| ImportError::RepositoryAccess(e.to_string()))?
            .ok_or_else(|| ImportError::BatchNotFound(batch_id.to_string()))?;

        // === 前置校验(拒绝时零副作用) ===
        if batch.status != BatchStatus::Completed {
            return Err(Box::new(ImportError::RollbackNotCompleted {
                status: batch.status.to_string(),
            }));
        }

        let deadline = batch.rollback_deadline.ok_or_else(|| {
            ImportError::InternalError(format!("批次缺少回滚截止时间: {}", batch_id))
        })?;
        if Utc::now() >= deadline {
            return Err(Box::new(ImportError::RollbackWindowExpired {
                deadline: deadline.to_rfc3339(),
            }));
        }

        // === 回滚扫描: 仅 CREATED 行 ===
        let records = self
            .import_repo
            .list_records_by_batch(batch_id, Some(RecordStatus::Created))
            .await
            .map_err(|e| ImportError::RepositoryAccess(e.to_string()))?;

        info!(records = records.len(), "开始回滚扫描");

        let mut rolled_back = 0usize;
        let mut failed = 0usize;

        for record in records {
            let Some(client_id) = record.client_id.as_deref() else {
                warn!(record_id = %record.record_id, "CREATED 行缺少客户 ID,计为失败");
                failed += 1;
                continue;
            };

            if let Err(e) = self.client_repo.soft_delete_client(client_id).await {
                warn!(record_id = %record.record_id, error = %e, "客户软删失败,继续处理剩余记录");
                failed += 1;
                continue;
            }

            if let Err(e) = self
                .import_repo
                .update_record_status(&record.record_id, RecordStatus::RolledBack)
                .await
            {
                warn!(record_id = %record.record_id, error = %e, "行状态翻转失败");
                failed += 1;
                continue;
            }

            rolled_back += 1;
        }

        // === 批次终态(与单条成败无关) ===
        batch.status = BatchStatus::RolledBack;
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(|e| ImportError::RepositoryAccess(e.to_string()))?;

        info!(rolled_back, failed, "批次回滚完成");

        Ok(RollbackSummary {
            rolled_back,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::client::ClientRecord;
    use crate::domain::import::{ImportBatch, ImportRecord, MappedValues};
    use crate::domain::types::{ImportAction, TargetField};
    use crate::repository::{ClientRepositoryImpl, ImportRepositoryImpl};
    use chrono::Duration;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn setup() -> (
        RollbackManager<ImportRepositoryImpl, ClientRepositoryImpl>,
        ImportRepositoryImpl,
        ClientRepositoryImpl,
    ) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let manager = RollbackManager::new(
            ImportRepositoryImpl::from_connection(conn.clone()),
            ClientRepositoryImpl::from_connection(conn.clone()),
        );
        (
            manager,
            ImportRepositoryImpl::from_connection(conn.clone()),
            ClientRepositoryImpl::from_connection(conn),
        )
    }

    fn completed_batch(deadline_hours: i64) -> ImportBatch {
        let mut batch = ImportBatch::new("org-1", "clients.csv", 100);
        batch.status = BatchStatus::Completed;
        batch.rollback_deadline = Some(Utc::now() + Duration::hours(deadline_hours));
        batch
    }

    fn created_record(batch_id: &str, row_number: usize, client_id: &str) -> ImportRecord {
        ImportRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            row_number,
            status: RecordStatus::Created,
            suggested_action: ImportAction::CreateNew,
            chosen_action: ImportAction::CreateNew,
            raw_values: HashMap::new(),
            mapped_values: MappedValues::new(),
            matches: Vec::new(),
            validation_errors: Vec::new(),
            client_id: Some(client_id.to_string()),
            created_at: Utc::now(),
        }
    }

    fn test_client() -> ClientRecord {
        let mut values = MappedValues::new();
        values.insert(TargetField::FirstName, "Ana".to_string());
        values.insert(TargetField::LastName, "Silva".to_string());
        ClientRecord::from_mapped("org-1", &values)
    }

    #[tokio::test]
    async fn test_rollback_soft_deletes_created_rows() {
        let (manager, import_repo, client_repo) = setup();

        let batch = completed_batch(24);
        let batch_id = batch.batch_id.clone();
        import_repo.insert_batch(batch).await.unwrap();

        let client = test_client();
        let client_id = client.client_id.clone();
        client_repo.insert_client(client).await.unwrap();
        import_repo
            .insert_record(created_record(&batch_id, 1, &client_id))
            .await
            .unwrap();

        let summary = manager.rollback(&batch_id).await.unwrap();
        assert_eq!(summary.rolled_back, 1);
        assert_eq!(summary.failed, 0);

        // 客户已软删,批次与行均进入 ROLLED_BACK
        let client = client_repo.get_client(&client_id).await.unwrap().unwrap();
        assert!(!client.active);

        let batch = import_repo.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::RolledBack);

        let records = import_repo
            .list_records_by_batch(&batch_id, None)
            .await
            .unwrap();
        assert_eq!(records[0].status, RecordStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_second_rollback_is_rejected() {
        let (manager, import_repo, client_repo) = setup();

        let batch = completed_batch(24);
        let batch_id = batch.batch_id.clone();
        import_repo.insert_batch(batch).await.unwrap();

        let client = test_client();
        let client_id = client.client_id.clone();
        client_repo.insert_client(client).await.unwrap();
        import_repo
            .insert_record(created_record(&batch_id, 1, &client_id))
            .await
            .unwrap();

        manager.rollback(&batch_id).await.unwrap();

        // 第二次回滚: 状态已非 COMPLETED,必须拒绝而非二次软删
        let err = manager.rollback(&batch_id).await.unwrap_err();
        assert!(err.to_string().contains("未完成"));
    }

    #[tokio::test]
    async fn test_expired_window_is_rejected() {
        let (manager, import_repo, _client_repo) = setup();

        let batch = completed_batch(-1); // 截止时间已过
        let batch_id = batch.batch_id.clone();
        import_repo.insert_batch(batch).await.unwrap();

        let err = manager.rollback(&batch_id).await.unwrap_err();
        assert!(err.to_string().contains("窗口已过期"));
    }

    #[tokio::test]
    async fn test_partial_failure_still_rolls_batch() {
        let (manager, import_repo, client_repo) = setup();

        let batch = completed_batch(24);
        let batch_id = batch.batch_id.clone();
        import_repo.insert_batch(batch).await.unwrap();

        let client = test_client();
        let client_id = client.client_id.clone();
        client_repo.insert_client(client).await.unwrap();
        import_repo
            .insert_record(created_record(&batch_id, 1, &client_id))
            .await
            .unwrap();
        // 指向不存在客户的 CREATED 行: 软删会失败
        import_repo
            .insert_record(created_record(&batch_id, 2, "missing-client"))
            .await
            .unwrap();

        let summary = manager.rollback(&batch_id).await.unwrap();
        assert_eq!(summary.rolled_back, 1);
        assert_eq!(summary.failed, 1);

        let batch = import_repo.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_unknown_batch() {
        let (manager, _import_repo, _client_repo) = setup();
        let err = manager.rollback("no-such-batch").await.unwrap_err();
        assert!(err.to_string().contains("批次不存在"));
    }
}
