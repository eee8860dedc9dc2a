// ==========================================
// 客户档案导入系统 - 导入执行器实现
// ==========================================
// 职责: 整合导入流程,从文件字节到客户档案落库
// 流程: 解析 → 列分析 → 映射 → 确认 → 预演 → 全量提交
// ==========================================
// 语义红线:
// - 提交按行号顺序串行处理,单行失败不中断批次(部分完成是常态)
// - 存量快照在提交开始时取一次,同批次后行看不到前行新建的客户
// - 批次级异常(行循环之外)才将批次置为 FAILED
// ==========================================

use crate::config::ImportConfigReader;
use crate::domain::client::ClientRecord;
use crate::domain::import::{
    BatchCounts, CommitOutcome, DuplicateDecision, DuplicateSettings, FieldMapping, ImportBatch,
    ImportRecord, MappedValues, ParseOptions, PreviewReport, PreviewRow,
};
use crate::domain::types::{BatchStatus, ImportAction, RecordStatus, TargetField};
use crate::importer::client_importer_trait::{ClientImporter, ProgressTracker, TextGenerator};
use crate::importer::column_analyzer::analyze_columns;
use crate::importer::duplicate_detector::DuplicateDetector;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{apply_transform, FieldMapper};
use crate::importer::file_parser::UniversalFileParser;
use crate::repository::{ClientRepository, ImportRepository};
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 按映射把一行原始值装配为目标值(值转换在此应用)
fn map_row(mappings: &[FieldMapping], raw_row: &HashMap<String, String>) -> MappedValues {
    let mut mapped = MappedValues::new();

    for mapping in mappings {
        let Some(raw) = raw_row.get(&mapping.source_column) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }

        let value = match &mapping.transform {
            Some(tag) => apply_transform(tag, raw),
            None => raw.trim().to_string(),
        };
        mapped.insert(mapping.target_field, value);
    }

    mapped
}

/// 行级必填校验
///
/// # 规则
/// - 每个 required 映射的目标值非空
/// - 联系标识: email 或 phone 至少其一非空
fn validate_required_values(mappings: &[FieldMapping], mapped: &MappedValues) -> Vec<String> {
    let mut errors = Vec::new();

    for mapping in mappings {
        if mapping.required && mapped.get(mapping.target_field).is_none() {
            errors.push(format!("必填字段缺失: {}", mapping.target_field.as_path()));
        }
    }

    if mapped.get(TargetField::Email).is_none() && mapped.get(TargetField::Phone).is_none() {
        errors.push("缺少联系标识: client.email 或 client.phone 至少其一".to_string());
    }

    errors
}

/// 映射集合校验: 必填目标字段覆盖 + 目标字段唯一
fn validate_mapping_set(mappings: &[FieldMapping]) -> ImportResult<()> {
    let mut seen = HashSet::new();
    for mapping in mappings {
        if !seen.insert(mapping.target_field) {
            return Err(ImportError::DuplicateTargetMapping(
                mapping.target_field.as_path().to_string(),
            ));
        }
    }

    for field in TargetField::ALL {
        if field.is_required() && !seen.contains(&field) {
            return Err(ImportError::MissingRequiredMapping(
                field.as_path().to_string(),
            ));
        }
    }

    // 联系标识: email 或 phone 至少映射其一
    if !seen.contains(&TargetField::Email) && !seen.contains(&TargetField::Phone) {
        return Err(ImportError::MissingRequiredMapping(
            "client.email 或 client.phone".to_string(),
        ));
    }

    Ok(())
}

// ==========================================
// ClientImporterImpl - 导入执行器
// ==========================================
pub struct ClientImporterImpl<R, K, C>
where
    R: ImportRepository,
    K: ClientRepository,
    C: ImportConfigReader,
{
    // 数据访问层
    import_repo: R,
    client_repo: K,

    // 配置读取器
    config: C,

    // 导入组件
    file_parser: UniversalFileParser,

    // 文本生成协作方(AI 辅助映射,None = 只走规则映射)
    generator: Option<Arc<dyn TextGenerator>>,

    // 进度上报协作方(任务队列)
    progress: Box<dyn ProgressTracker>,
}

impl<R, K, C> ClientImporterImpl<R, K, C>
where
    R: ImportRepository + Send + Sync,
    K: ClientRepository + Send + Sync,
    C: ImportConfigReader + Send + Sync,
{
    /// 创建新的导入执行器实例
    ///
    /// # 参数
    /// - import_repo: 批次/行记录仓储
    /// - client_repo: 客户档案仓储
    /// - config: 配置读取器
    /// - generator: 文本生成协作方(None = 只走规则映射)
    /// - progress: 进度上报协作方
    pub fn new(
        import_repo: R,
        client_repo: K,
        config: C,
        generator: Option<Arc<dyn TextGenerator>>,
        progress: Box<dyn ProgressTracker>,
    ) -> Self {
        Self {
            import_repo,
            client_repo,
            config,
            file_parser: UniversalFileParser,
            generator,
            progress,
        }
    }

    fn repo_err(e: Box<dyn Error>) -> ImportError {
        ImportError::RepositoryAccess(e.to_string())
    }

    fn config_err(e: Box<dyn Error>) -> ImportError {
        ImportError::ConfigReadError(e.to_string())
    }

    async fn load_batch(&self, batch_id: &str) -> ImportResult<ImportBatch> {
        self.import_repo
            .get_batch(batch_id)
            .await
            .map_err(Self::repo_err)?
            .ok_or_else(|| ImportError::BatchNotFound(batch_id.to_string()))
    }

    async fn build_detector(&self) -> ImportResult<DuplicateDetector> {
        let max_candidates = self
            .config
            .get_max_duplicate_candidates()
            .await
            .map_err(Self::config_err)?;
        let auto_apply = self
            .config
            .get_auto_apply_threshold()
            .await
            .map_err(Self::config_err)?;
        let review = self
            .config
            .get_review_threshold()
            .await
            .map_err(Self::config_err)?;

        Ok(DuplicateDetector::new(max_candidates, auto_apply, review))
    }

    /// 将批次置为 FAILED 并记录原因(二次失败仅记日志)
    async fn mark_batch_failed(&self, batch: &mut ImportBatch, message: &str) {
        if batch.status.can_transition_to(BatchStatus::Failed) {
            batch.status = BatchStatus::Failed;
        }
        batch.error_message = Some(message.to_string());
        if let Err(e) = self.import_repo.update_batch(batch).await {
            error!(batch_id = %batch.batch_id, error = %e, "批次失败状态落库失败");
        }
    }

    /// 提交阶段主体(错误由 commit 包装为批次 FAILED)
    async fn run_commit(
        &self,
        batch: &mut ImportBatch,
        bytes: &[u8],
        options: &ParseOptions,
    ) -> ImportResult<CommitOutcome> {
        let start_time = Instant::now();

        // === 步骤 1: 重新解析全量行集 ===
        debug!("步骤 1: 重新解析文件");
        let parsed = self.file_parser.parse(bytes, &batch.file_name, options)?;
        batch.total_rows = parsed.total_rows as i32;
        info!(total_rows = parsed.total_rows, "文件解析完成");

        // === 步骤 2: 取存量客户快照(仅此一次) ===
        debug!("步骤 2: 读取存量客户快照");
        let population = self
            .client_repo
            .list_active_by_org(&batch.org_id)
            .await
            .map_err(Self::repo_err)?;
        info!(population = population.len(), "存量快照就绪");

        let detector = self.build_detector().await?;
        let total = parsed.rows.len();
        let mut counts = BatchCounts::default();

        // === 步骤 3: 逐行执行(行号顺序,单行失败不中断) ===
        debug!("步骤 3: 逐行执行");
        for (idx, raw_row) in parsed.rows.iter().enumerate() {
            let row_number = idx + 1;

            let mapped = map_row(&batch.field_mappings, raw_row);
            let validation_errors = validate_required_values(&batch.field_mappings, &mapped);

            let record = if validation_errors.is_empty() {
                let decision = detector.detect(&mapped, &population, &batch.duplicate_settings);
                self.execute_row(batch, row_number, raw_row, mapped, decision, &mut counts)
                    .await
            } else {
                // 必填校验失败: 行置 FAILED,不参与去重匹配
                counts.failed += 1;
                ImportRecord {
                    record_id: Uuid::new_v4().to_string(),
                    batch_id: batch.batch_id.clone(),
                    row_number,
                    status: RecordStatus::Failed,
                    suggested_action: ImportAction::CreateNew,
                    chosen_action: ImportAction::CreateNew,
                    raw_values: raw_row.clone(),
                    mapped_values: mapped,
                    matches: Vec::new(),
                    validation_errors,
                    client_id: None,
                    created_at: Utc::now(),
                }
            };

            if let Err(e) = self.import_repo.insert_record(record).await {
                // 行记录落库失败不中断批次,但必须留痕
                error!(row_number, error = %e, "行记录落库失败");
            }

            // 进度上报(0-100,上报失败不得影响导入)
            let percent = ((row_number * 100) / total.max(1)) as u8;
            self.progress.report(&batch.batch_id, percent).await;
        }

        // === 步骤 4: 批次收尾 ===
        debug!("步骤 4: 批次收尾");
        let elapsed_ms = start_time.elapsed().as_millis() as i64;
        let window_hours = self
            .config
            .get_rollback_window_hours()
            .await
            .map_err(Self::config_err)?;

        batch.created_count = counts.created as i32;
        batch.updated_count = counts.updated as i32;
        batch.skipped_count = counts.skipped as i32;
        batch.failed_count = counts.failed as i32;
        batch.status = BatchStatus::Completed;
        batch.rollback_deadline = Some(Utc::now() + Duration::hours(window_hours));
        batch.elapsed_ms = Some(elapsed_ms);
        self.import_repo
            .update_batch(batch)
            .await
            .map_err(Self::repo_err)?;

        let outcome = CommitOutcome {
            batch_id: batch.batch_id.clone(),
            total_rows: total,
            counts,
            elapsed_ms,
        };

        info!(
            batch_id = %batch.batch_id,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            elapsed_ms,
            "批次提交完成"
        );

        Ok(outcome)
    }

    /// 按决议动作执行单行(行内错误转为 FAILED 记录,不向上抛)
    async fn execute_row(
        &self,
        batch: &ImportBatch,
        row_number: usize,
        raw_row: &HashMap<String, String>,
        mapped: MappedValues,
        decision: DuplicateDecision,
        counts: &mut BatchCounts,
    ) -> ImportRecord {
        let suggested_action = decision.action;
        let mut chosen_action = decision.action;
        let status;
        let mut client_id = None;
        let mut validation_errors = Vec::new();

        match decision.action {
            ImportAction::CreateNew => {
                let client = ClientRecord::from_mapped(&batch.org_id, &mapped);
                let new_id = client.client_id.clone();
                match self.client_repo.insert_client(client).await {
                    Ok(()) => {
                        status = RecordStatus::Created;
                        client_id = Some(new_id);
                        counts.created += 1;
                    }
                    Err(e) => {
                        warn!(row_number, error = %e, "客户新建失败");
                        status = RecordStatus::Failed;
                        validation_errors.push(format!("客户新建失败: {}", e));
                        counts.failed += 1;
                    }
                }
            }
            ImportAction::Update => {
                // 取最高分候选;执行时已无可用候选则降级为 SKIPPED
                match decision.matches.first().map(|m| m.client_id.clone()) {
                    Some(target_id) => match self.update_existing(&target_id, &mapped).await {
                        Ok(true) => {
                            status = RecordStatus::Updated;
                            client_id = Some(target_id);
                            counts.updated += 1;
                        }
                        Ok(false) => {
                            status = RecordStatus::Skipped;
                            chosen_action = ImportAction::Skip;
                            counts.skipped += 1;
                        }
                        Err(e) => {
                            warn!(row_number, error = %e, "客户更新失败");
                            status = RecordStatus::Failed;
                            validation_errors.push(format!("客户更新失败: {}", e));
                            counts.failed += 1;
                        }
                    },
                    None => {
                        status = RecordStatus::Skipped;
                        chosen_action = ImportAction::Skip;
                        counts.skipped += 1;
                    }
                }
            }
            ImportAction::Skip => {
                status = RecordStatus::Skipped;
                counts.skipped += 1;
            }
        }

        ImportRecord {
            record_id: Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            row_number,
            status,
            suggested_action,
            chosen_action,
            raw_values: raw_row.clone(),
            mapped_values: mapped,
            matches: decision.matches,
            validation_errors,
            client_id,
            created_at: Utc::now(),
        }
    }

    /// 更新既有客户;目标客户已不存在时返回 Ok(false)(调用方降级 SKIPPED)
    async fn update_existing(
        &self,
        client_id: &str,
        mapped: &MappedValues,
    ) -> Result<bool, Box<dyn Error>> {
        let Some(mut client) = self.client_repo.get_client(client_id).await? else {
            return Ok(false);
        };

        client.apply_mapped(mapped);
        self.client_repo.update_client(&client).await?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl<R, K, C> ClientImporter for ClientImporterImpl<R, K, C>
where
    R: ImportRepository + Send + Sync,
    K: ClientRepository + Send + Sync,
    C: ImportConfigReader + Send + Sync,
{
    /// 摄入上传文件: 解析 + 列分析 + 映射建议
    #[instrument(skip(self, bytes), fields(org_id = %org_id, file_name = %file_name))]
    async fn ingest(
        &self,
        org_id: &str,
        file_name: &str,
        bytes: &[u8],
        options: ParseOptions,
        uploaded_by: Option<&str>,
    ) -> Result<ImportBatch, Box<dyn Error>> {
        let mut batch = ImportBatch::new(org_id, file_name, bytes.len() as i64);
        batch.uploaded_by = uploaded_by.map(|s| s.to_string());

        info!(batch_id = %batch.batch_id, size = bytes.len(), "开始摄入导入文件");
        self.import_repo
            .insert_batch(batch.clone())
            .await
            .map_err(Self::repo_err)?;

        // === 阶段 1: 解析 ===
        batch.status = BatchStatus::Parsing;
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(Self::repo_err)?;

        let parsed = match self.file_parser.parse(bytes, file_name, &options) {
            Ok(parsed) => parsed,
            Err(e) => {
                // 文件级致命错误: 批次直接 FAILED,零行可用
                error!(batch_id = %batch.batch_id, error = %e, "文件解析失败");
                self.mark_batch_failed(&mut batch, &e.to_string()).await;
                return Err(Box::new(e));
            }
        };

        for diagnostic in &parsed.diagnostics {
            warn!(
                batch_id = %batch.batch_id,
                row = ?diagnostic.row,
                "解析诊断: {}",
                diagnostic.message
            );
        }

        let preview_limit = self
            .config
            .get_preview_row_limit()
            .await
            .map_err(Self::config_err)?;
        batch.detected_columns = parsed.columns.clone();
        batch.total_rows = parsed.total_rows as i32;
        batch.preview_rows = parsed.rows.iter().take(preview_limit).cloned().collect();

        // === 阶段 2: 列分析 + 映射建议 ===
        batch.status = BatchStatus::Mapping;
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(Self::repo_err)?;

        let sample_limit = self
            .config
            .get_sample_value_limit()
            .await
            .map_err(Self::config_err)?;
        let profiles = analyze_columns(&parsed.columns, &batch.preview_rows, sample_limit);

        let rule_confidence = self
            .config
            .get_rule_mapping_confidence()
            .await
            .map_err(Self::config_err)?;
        let mapper = FieldMapper::new(self.generator.clone(), rule_confidence);
        let outcome = mapper
            .map_columns(&parsed.columns, &profiles, None)
            .await;
        for note in &outcome.notes {
            debug!(batch_id = %batch.batch_id, "映射备注: {}", note);
        }

        batch.field_mappings = outcome.mappings;
        batch.duplicate_settings = DuplicateSettings {
            threshold: self
                .config
                .get_default_duplicate_threshold()
                .await
                .map_err(Self::config_err)?,
            ..DuplicateSettings::default()
        };
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(Self::repo_err)?;

        info!(
            batch_id = %batch.batch_id,
            columns = batch.detected_columns.len(),
            mapped = batch.field_mappings.len(),
            confidence = outcome.overall_confidence,
            "摄入完成,等待映射确认"
        );

        Ok(batch)
    }

    /// 确认映射与去重设置,批次进入 READY
    async fn apply_mappings(
        &self,
        batch_id: &str,
        mappings: Vec<FieldMapping>,
        settings: Option<DuplicateSettings>,
    ) -> Result<ImportBatch, Box<dyn Error>> {
        let mut batch = self.load_batch(batch_id).await?;

        if !matches!(batch.status, BatchStatus::Mapping | BatchStatus::Ready) {
            return Err(Box::new(ImportError::InvalidBatchState {
                batch_id: batch_id.to_string(),
                expected: "MAPPING/READY".to_string(),
                actual: batch.status.to_string(),
            }));
        }

        validate_mapping_set(&mappings)?;

        // 固化必填标记(无条件必填字段不可被用户取消)
        batch.field_mappings = mappings
            .into_iter()
            .map(|mut m| {
                m.required = m.required || m.target_field.is_required();
                m
            })
            .collect();

        if let Some(settings) = settings {
            batch.duplicate_settings = settings;
        }

        if batch.status == BatchStatus::Mapping {
            batch.status = BatchStatus::Ready;
        }
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(Self::repo_err)?;

        info!(batch_id = %batch_id, mappings = batch.field_mappings.len(), "映射已确认,批次就绪");
        Ok(batch)
    }

    /// 只读预演: 对预览样本执行映射 + 去重检测
    async fn preview(&self, batch_id: &str) -> Result<PreviewReport, Box<dyn Error>> {
        let batch = self.load_batch(batch_id).await?;

        if !matches!(batch.status, BatchStatus::Mapping | BatchStatus::Ready) {
            return Err(Box::new(ImportError::InvalidBatchState {
                batch_id: batch_id.to_string(),
                expected: "MAPPING/READY".to_string(),
                actual: batch.status.to_string(),
            }));
        }

        let population = self
            .client_repo
            .list_active_by_org(&batch.org_id)
            .await
            .map_err(Self::repo_err)?;
        let detector = self.build_detector().await?;

        let mut rows = Vec::with_capacity(batch.preview_rows.len());
        let mut new_count = 0usize;
        let mut update_count = 0usize;
        let mut duplicate_count = 0usize;
        let mut error_count = 0usize;

        for (idx, raw_row) in batch.preview_rows.iter().enumerate() {
            let row_number = idx + 1;
            let mapped = map_row(&batch.field_mappings, raw_row);
            let validation_errors = validate_required_values(&batch.field_mappings, &mapped);

            if !validation_errors.is_empty() {
                error_count += 1;
                rows.push(PreviewRow {
                    row_number,
                    mapped,
                    suggested_action: ImportAction::CreateNew,
                    requires_review: false,
                    validation_errors,
                    matches: Vec::new(),
                });
                continue;
            }

            let decision = detector.detect(&mapped, &population, &batch.duplicate_settings);
            if !decision.matches.is_empty() {
                duplicate_count += 1;
            }
            match decision.action {
                ImportAction::CreateNew => new_count += 1,
                ImportAction::Update => update_count += 1,
                ImportAction::Skip => {}
            }

            rows.push(PreviewRow {
                row_number,
                mapped,
                suggested_action: decision.action,
                requires_review: decision.requires_review,
                validation_errors: Vec::new(),
                matches: decision.matches,
            });
        }

        debug!(
            batch_id = %batch_id,
            rows = rows.len(),
            new = new_count,
            update = update_count,
            error = error_count,
            "预演完成"
        );

        Ok(PreviewReport {
            rows,
            new_count,
            update_count,
            duplicate_count,
            error_count,
        })
    }

    /// 全量提交: 重跑映射 + 去重检测并落库
    #[instrument(skip(self, bytes), fields(batch_id = %batch_id))]
    async fn commit(
        &self,
        batch_id: &str,
        bytes: &[u8],
        options: ParseOptions,
    ) -> Result<CommitOutcome, Box<dyn Error>> {
        let mut batch = self.load_batch(batch_id).await?;

        if batch.status != BatchStatus::Ready {
            return Err(Box::new(ImportError::InvalidBatchState {
                batch_id: batch_id.to_string(),
                expected: "READY".to_string(),
                actual: batch.status.to_string(),
            }));
        }

        // 执行前不变式: 必填目标字段全部有活动映射
        validate_mapping_set(&batch.field_mappings)?;

        batch.status = BatchStatus::Processing;
        self.import_repo
            .update_batch(&batch)
            .await
            .map_err(Self::repo_err)?;
        info!(batch_id = %batch_id, "批次开始提交");

        match self.run_commit(&mut batch, bytes, &options).await {
            Ok(outcome) => {
                self.progress.completed(batch_id, &outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                // 批次级异常: 置 FAILED,已落库的行保持各自状态
                error!(batch_id = %batch_id, error = %e, "批次提交失败");
                self.mark_batch_failed(&mut batch, &e.to_string()).await;
                self.progress.failed(batch_id, &e.to_string()).await;
                Err(Box::new(e))
            }
        }
    }
}

// ==========================================
// NoopProgressTracker - 空进度上报
// ==========================================
// 用途: 不接任务队列的调用方(测试/同步场景)
pub struct NoopProgressTracker;

#[async_trait::async_trait]
impl ProgressTracker for NoopProgressTracker {
    async fn report(&self, _job_id: &str, _progress: u8) {}

    async fn completed(&self, _job_id: &str, _outcome: &CommitOutcome) {}

    async fn failed(&self, _job_id: &str, _message: &str) {}
}
