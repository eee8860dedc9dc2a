// ==========================================
// 仓储层集成测试
// ==========================================
// 测试目标: 批次 JSON 列往返、行记录查询、客户软删语义
// ==========================================


use chrono::Utc;
use client_import_system::domain::{
    BatchStatus, DuplicateSettings, FieldMapping, ImportAction, ImportBatch, ImportRecord,
    MatchFieldRule, MatchType, RecordStatus, TargetField,
};
use client_import_system::repository::{
    ClientRepository, ClientRepositoryImpl, ImportRepository, ImportRepositoryImpl,
};
use std::collections::HashMap;
use test_helpers::{create_test_db, mapped_values, seed_client};

fn sample_batch() -> ImportBatch {
    let mut batch = ImportBatch::new("org-1", "clients.csv", 4096);
    batch.detected_columns = vec!["first".to_string(), "last".to_string()];
    batch.preview_rows = vec![HashMap::from([
        ("first".to_string(), "Ana".to_string()),
        ("last".to_string(), "Silva".to_string()),
    ])];
    batch.field_mappings = vec![FieldMapping {
        source_column: "first".to_string(),
        target_field: TargetField::FirstName,
        transform: None,
        required: true,
        confidence: 0.92,
        ai_suggested: true,
    }];
    batch.duplicate_settings = DuplicateSettings {
        enabled: true,
        match_fields: vec![MatchFieldRule {
            field: TargetField::Email,
            weight: 1.0,
            match_type: MatchType::Normalized,
            case_sensitive: false,
        }],
        threshold: 0.6,
        default_action: ImportAction::Skip,
    };
    batch
}

#[tokio::test]
async fn test_batch_json_columns_round_trip() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let repo = ImportRepositoryImpl::new(&db_path).unwrap();

    let batch = sample_batch();
    let batch_id = batch.batch_id.clone();
    repo.insert_batch(batch.clone()).await.unwrap();

    let stored = repo.get_batch(&batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Pending);
    assert_eq!(stored.detected_columns, batch.detected_columns);
    assert_eq!(stored.preview_rows, batch.preview_rows);
    assert_eq!(stored.field_mappings, batch.field_mappings);
    assert_eq!(stored.duplicate_settings.threshold, 0.6);
    assert_eq!(
        stored.duplicate_settings.default_action,
        ImportAction::Skip
    );

    // 不存在的批次
    assert!(repo.get_batch("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_update_and_recent_listing() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let repo = ImportRepositoryImpl::new(&db_path).unwrap();

    let mut batch = sample_batch();
    repo.insert_batch(batch.clone()).await.unwrap();

    batch.status = BatchStatus::Parsing;
    batch.total_rows = 42;
    batch.error_message = None;
    repo.update_batch(&batch).await.unwrap();

    let stored = repo.get_batch(&batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Parsing);
    assert_eq!(stored.total_rows, 42);

    let recent = repo.get_recent_batches(5).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn test_record_listing_and_status_filter() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let repo = ImportRepositoryImpl::new(&db_path).unwrap();

    let batch = sample_batch();
    let batch_id = batch.batch_id.clone();
    repo.insert_batch(batch).await.unwrap();

    for (row_number, status) in [
        (1usize, RecordStatus::Created),
        (2, RecordStatus::Failed),
        (3, RecordStatus::Created),
    ] {
        repo.insert_record(ImportRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.clone(),
            row_number,
            status,
            suggested_action: ImportAction::CreateNew,
            chosen_action: ImportAction::CreateNew,
            raw_values: HashMap::new(),
            mapped_values: mapped_values(&[(TargetField::FirstName, "Ana")]),
            matches: Vec::new(),
            validation_errors: Vec::new(),
            client_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    let all = repo.list_records_by_batch(&batch_id, None).await.unwrap();
    assert_eq!(all.len(), 3);
    // 按行号升序
    assert_eq!(
        all.iter().map(|r| r.row_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let created = repo
        .list_records_by_batch(&batch_id, Some(RecordStatus::Created))
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    // 状态翻转(回滚路径)
    repo.update_record_status(&created[0].record_id, RecordStatus::RolledBack)
        .await
        .unwrap();
    let rolled = repo
        .list_records_by_batch(&batch_id, Some(RecordStatus::RolledBack))
        .await
        .unwrap();
    assert_eq!(rolled.len(), 1);
}

#[tokio::test]
async fn test_client_soft_delete_and_org_scoping() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let repo = ClientRepositoryImpl::new(&db_path).unwrap();

    let id_a = seed_client(
        &db_path,
        "org-a",
        &[
            (TargetField::FirstName, "Ana"),
            (TargetField::LastName, "Silva"),
        ],
    )
    .await
    .unwrap();
    seed_client(
        &db_path,
        "org-b",
        &[
            (TargetField::FirstName, "Bo"),
            (TargetField::LastName, "Chan"),
        ],
    )
    .await
    .unwrap();

    // 快照按组织隔离
    let org_a = repo.list_active_by_org("org-a").await.unwrap();
    assert_eq!(org_a.len(), 1);
    assert_eq!(org_a[0].first_name, "Ana");

    // 软删后退出活动快照,但仍可按 ID 查到
    repo.soft_delete_client(&id_a).await.unwrap();
    assert!(repo.list_active_by_org("org-a").await.unwrap().is_empty());

    let deleted = repo.get_client(&id_a).await.unwrap().unwrap();
    assert!(!deleted.active);

    // 软删不存在的客户报错
    assert!(repo.soft_delete_client("missing").await.is_err());
}
