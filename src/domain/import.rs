// ==========================================
// 客户档案导入系统 - 导入领域模型
// ==========================================
// 依据: Import_Pipeline_Spec - 数据模型(批次/行记录/映射/匹配规则)
// 红线: ImportBatch 永不删除,只打终态; ImportRecord 内容不可变,仅回滚改状态
// ==========================================

use crate::domain::types::{
    BatchStatus, ImportAction, InferredType, MatchType, ParseSeverity, RecordStatus, TargetField,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ==========================================
// ImportBatch - 导入批次
// ==========================================
// 用途: 一次文件上传到提交的完整尝试
// 对齐: import_batch 表(列/预览/映射/去重设置为 JSON 列)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: String,                      // 批次 ID(UUID)
    pub org_id: String,                        // 所属组织
    pub file_name: String,                     // 源文件名
    pub file_size: i64,                        // 源文件大小(字节)
    pub status: BatchStatus,                   // 生命周期状态
    pub total_rows: i32,                       // 总行数(不含表头)
    pub detected_columns: Vec<String>,         // 探测到的列名(有序)
    pub preview_rows: Vec<HashMap<String, String>>, // 预览样本(前 10 行原始值)
    pub field_mappings: Vec<FieldMapping>,     // 已确认的字段映射
    pub duplicate_settings: DuplicateSettings, // 去重检测设置
    pub created_count: i32,                    // 新建行数
    pub updated_count: i32,                    // 更新行数
    pub skipped_count: i32,                    // 跳过行数
    pub failed_count: i32,                     // 失败行数
    pub error_message: Option<String>,         // 批次级失败原因
    pub rollback_deadline: Option<DateTime<Utc>>, // 回滚窗口截止时间
    pub uploaded_by: Option<String>,           // 上传人
    pub elapsed_ms: Option<i64>,               // 提交阶段耗时(毫秒)
    pub created_at: DateTime<Utc>,             // 创建时间
    pub updated_at: DateTime<Utc>,             // 最后更新时间
}

impl ImportBatch {
    /// 创建新批次(上传时,状态 PENDING)
    pub fn new(org_id: &str, file_name: &str, file_size: i64) -> Self {
        let now = Utc::now();
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
            status: BatchStatus::Pending,
            total_rows: 0,
            detected_columns: Vec::new(),
            preview_rows: Vec::new(),
            field_mappings: Vec::new(),
            duplicate_settings: DuplicateSettings::default(),
            created_count: 0,
            updated_count: 0,
            skipped_count: 0,
            failed_count: 0,
            error_message: None,
            rollback_deadline: None,
            uploaded_by: None,
            elapsed_ms: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ==========================================
// ImportRecord - 行记录结果
// ==========================================
// 用途: 一行源数据在批次内的最终结局
// 对齐: import_record 表(原始值/映射值/候选匹配为 JSON 列)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub record_id: String,                 // 记录 ID(UUID)
    pub batch_id: String,                  // 关联批次 ID
    pub row_number: usize,                 // 源文件行号(1 起,不含表头)
    pub status: RecordStatus,              // 行结局状态
    pub suggested_action: ImportAction,    // 去重决策建议动作
    pub chosen_action: ImportAction,       // 实际执行动作
    pub raw_values: HashMap<String, String>, // 原始源值(列名 → 值)
    pub mapped_values: MappedValues,       // 映射后目标值
    pub matches: Vec<DuplicateMatch>,      // 候选匹配(≤5,降序)
    pub validation_errors: Vec<String>,    // 校验/执行错误信息
    pub client_id: Option<String>,         // 关联的新建/更新客户 ID
    pub created_at: DateTime<Utc>,         // 创建时间
}

// ==========================================
// MappedValues - 映射值容器
// ==========================================
// 红线: 以封闭 TargetField 为键,非开放字符串 Map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappedValues(BTreeMap<TargetField, String>);

impl MappedValues {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 写入一个目标字段值(空白值视同缺失,不写入)
    pub fn insert(&mut self, field: TargetField, value: String) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.0.insert(field, trimmed.to_string());
        }
    }

    pub fn get(&self, field: TargetField) -> Option<&str> {
        self.0.get(&field).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetField, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

// ==========================================
// FieldMapping - 字段映射
// ==========================================
// 约束: 以源列名为键的集合,同一目标字段至多一个活动映射(由映射器保证)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_column: String,        // 源列名
    pub target_field: TargetField,    // 目标字段路径
    pub transform: Option<String>,    // 值转换标签(date/phone/ssn/uppercase/...)
    pub required: bool,               // 必填标记
    pub confidence: f64,              // 置信度(0-1)
    pub ai_suggested: bool,           // 是否来自 AI 建议
}

// ==========================================
// DuplicateMatch - 候选匹配
// ==========================================
// 生命周期: 预览/执行期间计算,仅随所属 ImportRecord 持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub client_id: String,                 // 候选既有客户 ID
    pub display_name: String,              // 候选客户展示名
    pub score: f64,                        // 加权聚合分(0-1)
    pub field_details: Vec<FieldMatchDetail>, // 逐字段匹配明细
}

// ==========================================
// FieldMatchDetail - 逐字段匹配明细
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMatchDetail {
    pub field: TargetField,       // 参与比较的目标字段
    pub import_value: String,     // 导入侧值
    pub existing_value: String,   // 既有侧值
    pub score: f64,               // 该字段相似度(0-1)
}

// ==========================================
// MatchFieldRule - 字段匹配规则
// ==========================================
// 权重不要求归一,聚合分按实际参与规则的权重归一化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFieldRule {
    pub field: TargetField,       // 参与匹配的目标字段
    pub weight: f64,              // 权重
    pub match_type: MatchType,    // 比较策略
    pub case_sensitive: bool,     // 大小写敏感(仅 exact 生效)
}

// ==========================================
// DuplicateSettings - 去重检测设置
// ==========================================
// 逐批次配置,提供默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSettings {
    pub enabled: bool,                  // 是否启用去重检测
    pub match_fields: Vec<MatchFieldRule>, // 活动匹配规则
    pub threshold: f64,                 // 候选保留阈值
    pub default_action: ImportAction,   // 命中时的默认动作(UPDATE/SKIP)
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            match_fields: vec![
                MatchFieldRule {
                    field: TargetField::FirstName,
                    weight: 0.3,
                    match_type: MatchType::Fuzzy,
                    case_sensitive: false,
                },
                MatchFieldRule {
                    field: TargetField::LastName,
                    weight: 0.3,
                    match_type: MatchType::Fuzzy,
                    case_sensitive: false,
                },
                MatchFieldRule {
                    field: TargetField::Email,
                    weight: 0.25,
                    match_type: MatchType::Normalized,
                    case_sensitive: false,
                },
                MatchFieldRule {
                    field: TargetField::Phone,
                    weight: 0.15,
                    match_type: MatchType::Normalized,
                    case_sensitive: false,
                },
            ],
            threshold: 0.7,
            default_action: ImportAction::Update,
        }
    }
}

// ==========================================
// ParseOptions - 文件解析选项
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOptions {
    pub delimiter: char,              // CSV 分隔符
    pub has_headers: bool,            // 首行是否为表头
    pub sheet_name: Option<String>,   // Excel 工作表名(None = 第一个)
    pub skip_rows: usize,             // 表头前跳过的行数
    pub max_rows: Option<usize>,      // 最大读取行数(None = 不限)
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_headers: true,
            sheet_name: None,
            skip_rows: 0,
            max_rows: None,
        }
    }
}

// ==========================================
// ParsedFile - 文件解析输出
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFile {
    pub columns: Vec<String>,                  // 列名(有序)
    pub total_rows: usize,                     // 有效行数
    pub rows: Vec<HashMap<String, String>>,    // 全部行记录(列名 → 值)
    pub preview: Vec<HashMap<String, String>>, // 前 10 行预览
    pub diagnostics: Vec<ParseDiagnostic>,     // 解析诊断
}

impl ParsedFile {
    /// 是否存在文件级致命错误
    pub fn has_fatal_error(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == ParseSeverity::Error)
    }
}

// ==========================================
// ParseDiagnostic - 解析诊断
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub row: Option<usize>,        // 行号(行级诊断)
    pub column: Option<String>,    // 列名(列级诊断)
    pub message: String,           // 诊断信息
    pub severity: ParseSeverity,   // 级别
}

// ==========================================
// ColumnProfile - 列画像
// ==========================================
// Column Analyzer 输出(纯函数,无 I/O)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,                  // 列名
    pub inferred_type: InferredType,   // 推断类型
    pub samples: Vec<String>,          // 采样值(前 5 个非空)
    pub unique_count: usize,           // 唯一值数量
    pub null_count: usize,             // 空值数量
    pub fixed_length: Option<usize>,   // 样本定长(全部样本等长时)
    pub common_prefix: Option<String>, // 公共字面前缀(长度 > 2 时报告)
}

// ==========================================
// MappingOutcome - 字段映射输出
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingOutcome {
    pub mappings: Vec<FieldMapping>,    // 接受的映射
    pub unmapped_columns: Vec<String>,  // 未映射列
    pub overall_confidence: f64,        // 整体置信度(接受映射的均值)
    pub notes: Vec<String>,             // 过程备注(含降级原因)
}

// ==========================================
// MappingSuggestion - 交互式重映射建议
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub target_field: TargetField, // 建议目标字段
    pub confidence: f64,           // 建议分(0-1)
}

// ==========================================
// DuplicateDecision - 行级去重决策
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateDecision {
    pub matches: Vec<DuplicateMatch>, // 保留候选(≥阈值,降序,≤5)
    pub action: ImportAction,         // 建议动作
    pub requires_review: bool,        // 是否需人工复核
}

// ==========================================
// PreviewRow / PreviewReport - 预览阶段输出
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRow {
    pub row_number: usize,               // 源文件行号
    pub mapped: MappedValues,            // 映射后值
    pub suggested_action: ImportAction,  // 建议动作
    pub requires_review: bool,           // 是否需复核
    pub validation_errors: Vec<String>,  // 校验错误
    pub matches: Vec<DuplicateMatch>,    // 候选匹配
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewReport {
    pub rows: Vec<PreviewRow>,  // 逐行预览
    pub new_count: usize,       // 预计新建
    pub update_count: usize,    // 预计更新
    pub duplicate_count: usize, // 命中候选的行数
    pub error_count: usize,     // 校验失败行数
}

// ==========================================
// BatchCounts - 批次聚合计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ==========================================
// CommitOutcome - 提交阶段结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub batch_id: String,        // 批次 ID
    pub total_rows: usize,       // 处理行数
    pub counts: BatchCounts,     // 聚合计数
    pub elapsed_ms: i64,         // 耗时(毫秒)
}

// ==========================================
// RollbackSummary - 回滚结果汇总
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub rolled_back: usize, // 成功回滚的记录数
    pub failed: usize,      // 回滚失败的记录数
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_starts_pending() {
        let batch = ImportBatch::new("org-1", "clients.csv", 2048);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.total_rows, 0);
        assert!(batch.rollback_deadline.is_none());
    }

    #[test]
    fn test_mapped_values_drops_blank_input() {
        let mut values = MappedValues::new();
        values.insert(TargetField::FirstName, "  Ana  ".to_string());
        values.insert(TargetField::Email, "   ".to_string());

        assert_eq!(values.get(TargetField::FirstName), Some("Ana"));
        assert_eq!(values.get(TargetField::Email), None);
    }

    #[test]
    fn test_mapped_values_serde_uses_paths_as_keys() {
        let mut values = MappedValues::new();
        values.insert(TargetField::LastName, "Silva".to_string());

        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"client.lastName":"Silva"}"#);

        let back: MappedValues = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_default_duplicate_settings() {
        let settings = DuplicateSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.match_fields.len(), 4);
        assert_eq!(settings.threshold, 0.7);
        assert_eq!(settings.default_action, ImportAction::Update);
    }
}
