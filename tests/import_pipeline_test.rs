// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标: 验证完整的 摄入 → 确认 → 预演 → 提交 → 回滚 流程
// ==========================================


use client_import_system::config::ConfigManager;
use client_import_system::domain::{
    BatchStatus, CommitOutcome, ImportAction, ParseOptions, RecordStatus, TargetField,
};
use client_import_system::importer::{
    ClientImporter, ClientImporterImpl, NoopProgressTracker, ProgressTracker,
};
use client_import_system::logging;
use client_import_system::repository::{
    ClientRepository, ClientRepositoryImpl, ImportRepository, ImportRepositoryImpl,
};
use std::sync::{Arc, Mutex};
use test_helpers::{create_test_db, seed_client};

/// 创建测试用的导入执行器实例(无 AI 协作方,走规则映射)
fn create_test_importer(
    db_path: &str,
) -> ClientImporterImpl<ImportRepositoryImpl, ClientRepositoryImpl, ConfigManager> {
    let import_repo =
        ImportRepositoryImpl::new(db_path).expect("Failed to create ImportRepository");
    let client_repo =
        ClientRepositoryImpl::new(db_path).expect("Failed to create ClientRepository");
    let config = ConfigManager::new(db_path).expect("Failed to create ConfigManager");

    ClientImporterImpl::new(
        import_repo,
        client_repo,
        config,
        None,
        Box::new(NoopProgressTracker),
    )
}

/// 进度记录器(校验进度单调与终态回调)
struct RecordingProgress {
    reports: Arc<Mutex<Vec<u8>>>,
    completed: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl ProgressTracker for RecordingProgress {
    async fn report(&self, _job_id: &str, progress: u8) {
        self.reports.lock().unwrap().push(progress);
    }

    async fn completed(&self, job_id: &str, _outcome: &CommitOutcome) {
        self.completed.lock().unwrap().push(job_id.to_string());
    }

    async fn failed(&self, _job_id: &str, _message: &str) {}
}

const E2E_CSV: &str = "\
first,last,phone,email
John,Doe,5559876543,john@example.com
Maria,Gomez,555-123-4567,maria@example.com
Sam,Lee,,sam@example.com
";

/// 端到端场景(含既有客户命中与必填失败行)
///
/// - 行 1: 干净新客户 → CREATED
/// - 行 2: first+last+phone 命中既有客户(≥0.95) → UPDATED
/// - 行 3: phone 为必填映射且为空 → FAILED
#[tokio::test]
async fn test_end_to_end_import_flow() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");

    // 既有客户: Maria Gomez
    let existing_id = seed_client(
        &db_path,
        "org-1",
        &[
            (TargetField::FirstName, "Maria"),
            (TargetField::LastName, "Gomez"),
            (TargetField::Phone, "5551234567"),
            (TargetField::Email, "maria@example.com"),
        ],
    )
    .await
    .expect("Failed to seed client");

    let importer = create_test_importer(&db_path);

    // === 摄入: 规则映射应覆盖 4 列 ===
    let batch = importer
        .ingest(
            "org-1",
            "clients.csv",
            E2E_CSV.as_bytes(),
            ParseOptions::default(),
            Some("tester"),
        )
        .await
        .expect("Ingest should succeed");

    assert_eq!(batch.status, BatchStatus::Mapping);
    assert_eq!(batch.total_rows, 3);
    assert_eq!(batch.detected_columns, vec!["first", "last", "phone", "email"]);
    assert_eq!(batch.field_mappings.len(), 4);

    // === 确认映射: phone 标记为必填 ===
    let mut mappings = batch.field_mappings.clone();
    for mapping in &mut mappings {
        if mapping.target_field == TargetField::Phone {
            mapping.required = true;
        }
    }

    let batch = importer
        .apply_mappings(&batch.batch_id, mappings, None)
        .await
        .expect("Apply mappings should succeed");
    assert_eq!(batch.status, BatchStatus::Ready);

    // === 预演: 只读,不写实体 ===
    let report = importer
        .preview(&batch.batch_id)
        .await
        .expect("Preview should succeed");

    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.new_count, 1);
    assert_eq!(report.update_count, 1);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.rows[1].suggested_action, ImportAction::Update);
    assert!(!report.rows[1].requires_review);

    let client_repo = ClientRepositoryImpl::new(&db_path).unwrap();
    assert_eq!(client_repo.count_active_by_org("org-1").await.unwrap(), 1);

    // === 提交 ===
    let outcome = importer
        .commit(&batch.batch_id, E2E_CSV.as_bytes(), ParseOptions::default())
        .await
        .expect("Commit should succeed");

    assert_eq!(outcome.total_rows, 3);
    assert_eq!(outcome.counts.created, 1);
    assert_eq!(outcome.counts.updated, 1);
    assert_eq!(outcome.counts.skipped, 0);
    assert_eq!(outcome.counts.failed, 1);

    // 批次终态与回滚窗口
    let import_repo = ImportRepositoryImpl::new(&db_path).unwrap();
    let stored = import_repo
        .get_batch(&batch.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
    assert_eq!(stored.created_count, 1);
    assert_eq!(stored.updated_count, 1);
    assert_eq!(stored.failed_count, 1);
    assert!(stored.rollback_deadline.unwrap() > chrono::Utc::now());

    // 行记录逐行校验
    let records = import_repo
        .list_records_by_batch(&batch.batch_id, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].status, RecordStatus::Created);
    assert!(records[0].client_id.is_some());

    assert_eq!(records[1].status, RecordStatus::Updated);
    assert_eq!(records[1].client_id.as_deref(), Some(existing_id.as_str()));
    assert!(!records[1].matches.is_empty());
    assert!(records[1].matches[0].score >= 0.95);

    assert_eq!(records[2].status, RecordStatus::Failed);
    assert!(records[2]
        .validation_errors
        .iter()
        .any(|e| e.contains("必填字段缺失")));

    // 更新行应把格式化电话归一写回既有客户
    let updated = client_repo.get_client(&existing_id).await.unwrap().unwrap();
    assert_eq!(updated.phone.as_deref(), Some("5551234567"));
    assert_eq!(updated.first_name, "Maria");

    // === 回滚: 仅撤销 CREATED 行 ===
    let rollback = client_import_system::importer::RollbackManager::new(
        ImportRepositoryImpl::new(&db_path).unwrap(),
        ClientRepositoryImpl::new(&db_path).unwrap(),
    );

    let summary = rollback.rollback(&batch.batch_id).await.unwrap();
    assert_eq!(summary.rolled_back, 1);
    assert_eq!(summary.failed, 0);

    // 新建客户被软删,既有客户保持活动
    assert_eq!(client_repo.count_active_by_org("org-1").await.unwrap(), 1);
    let updated = client_repo.get_client(&existing_id).await.unwrap().unwrap();
    assert!(updated.active);

    let stored = import_repo
        .get_batch(&batch.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, BatchStatus::RolledBack);

    // 二次回滚必须被拒绝(不得二次软删)
    let err = rollback.rollback(&batch.batch_id).await.unwrap_err();
    assert!(err.to_string().contains("未完成"));
}

#[tokio::test]
async fn test_commit_requires_ready_status() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = create_test_importer(&db_path);

    let batch = importer
        .ingest(
            "org-1",
            "clients.csv",
            E2E_CSV.as_bytes(),
            ParseOptions::default(),
            None,
        )
        .await
        .unwrap();

    // 未确认映射(MAPPING)直接提交 → 状态拒绝
    let err = importer
        .commit(&batch.batch_id, E2E_CSV.as_bytes(), ParseOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("批次状态非法"));
}

#[tokio::test]
async fn test_ingest_fatal_parse_marks_batch_failed() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = create_test_importer(&db_path);

    // 损坏的 xlsx 字节: 文件级致命错误
    let result = importer
        .ingest(
            "org-1",
            "clients.xlsx",
            b"definitely not a workbook",
            ParseOptions::default(),
            None,
        )
        .await;
    assert!(result.is_err());

    // 批次应落库为 FAILED 且零行
    let import_repo = ImportRepositoryImpl::new(&db_path).unwrap();
    let batches = import_repo.get_recent_batches(10).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert_eq!(batches[0].total_rows, 0);
    assert!(batches[0].error_message.is_some());
}

#[tokio::test]
async fn test_commit_reports_progress_and_terminal_payload() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");

    let reports = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(Mutex::new(Vec::new()));
    let progress = RecordingProgress {
        reports: reports.clone(),
        completed: completed.clone(),
    };

    let importer = ClientImporterImpl::new(
        ImportRepositoryImpl::new(&db_path).unwrap(),
        ClientRepositoryImpl::new(&db_path).unwrap(),
        ConfigManager::new(&db_path).unwrap(),
        None,
        Box::new(progress),
    );

    let batch = importer
        .ingest(
            "org-1",
            "clients.csv",
            E2E_CSV.as_bytes(),
            ParseOptions::default(),
            None,
        )
        .await
        .unwrap();
    let batch = importer
        .apply_mappings(&batch.batch_id, batch.field_mappings.clone(), None)
        .await
        .unwrap();
    importer
        .commit(&batch.batch_id, E2E_CSV.as_bytes(), ParseOptions::default())
        .await
        .unwrap();

    // 每行一次进度,单调不减,终值 100
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*reports.last().unwrap(), 100);

    assert_eq!(completed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_json_ingest_and_commit() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = create_test_importer(&db_path);

    let json = r#"[
        {"first_name": "Ana", "last_name": "Silva", "email": "ana@example.com"},
        {"first_name": "Bo", "last_name": "Chan", "email": "bo@example.com"}
    ]"#;

    let batch = importer
        .ingest(
            "org-2",
            "clients.json",
            json.as_bytes(),
            ParseOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(batch.total_rows, 2);

    let batch = importer
        .apply_mappings(&batch.batch_id, batch.field_mappings.clone(), None)
        .await
        .unwrap();
    let outcome = importer
        .commit(&batch.batch_id, json.as_bytes(), ParseOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.counts.created, 2);
    assert_eq!(outcome.counts.failed, 0);

    let client_repo = ClientRepositoryImpl::new(&db_path).unwrap();
    assert_eq!(client_repo.count_active_by_org("org-2").await.unwrap(), 2);
}

/// 同批次内两条近重复的新行都会被创建(快照只取一次,已知权衡)
#[tokio::test]
async fn test_within_batch_near_duplicates_both_created() {
    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = create_test_importer(&db_path);

    let csv = "\
first,last,phone,email
Dana,Reyes,5550001111,dana@example.com
Dana,Reyes,5550001111,dana@example.com
";

    let batch = importer
        .ingest(
            "org-3",
            "clients.csv",
            csv.as_bytes(),
            ParseOptions::default(),
            None,
        )
        .await
        .unwrap();
    let batch = importer
        .apply_mappings(&batch.batch_id, batch.field_mappings.clone(), None)
        .await
        .unwrap();
    let outcome = importer
        .commit(&batch.batch_id, csv.as_bytes(), ParseOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.counts.created, 2);
}

/// AI 协作方路径: 围栏包裹的 JSON 建议直接进入批次映射
#[tokio::test]
async fn test_ingest_with_ai_generator() {
    use client_import_system::importer::TextGenerator;

    struct ScriptedGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _prompt: &str,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(r#"```json
{
  "mappings": [
    {"sourceColumn": "fn", "targetField": "client.firstName", "confidence": 0.91, "reason": "abbreviation"},
    {"sourceColumn": "ln", "targetField": "client.lastName", "confidence": 0.9, "reason": "abbreviation"},
    {"sourceColumn": "contact", "targetField": "client.email", "confidence": 0.85, "reason": "samples look like emails"}
  ],
  "unmappedColumns": [],
  "notes": "short headers resolved from samples"
}
```"#
            .to_string())
        }
    }

    logging::init_test();

    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let importer = ClientImporterImpl::new(
        ImportRepositoryImpl::new(&db_path).unwrap(),
        ClientRepositoryImpl::new(&db_path).unwrap(),
        ConfigManager::new(&db_path).unwrap(),
        Some(Arc::new(ScriptedGenerator)),
        Box::new(NoopProgressTracker),
    );

    let csv = "fn,ln,contact\nAna,Silva,ana@example.com\n";
    let batch = importer
        .ingest(
            "org-1",
            "clients.csv",
            csv.as_bytes(),
            ParseOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(batch.field_mappings.len(), 3);
    assert!(batch.field_mappings.iter().all(|m| m.ai_suggested));
    assert!(batch
        .field_mappings
        .iter()
        .any(|m| m.target_field == TargetField::Email && m.source_column == "contact"));

    // AI 建议可直接确认并提交
    let batch = importer
        .apply_mappings(&batch.batch_id, batch.field_mappings.clone(), None)
        .await
        .unwrap();
    let outcome = importer
        .commit(&batch.batch_id, csv.as_bytes(), ParseOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.counts.created, 1);
}
