// ==========================================
// 客户档案导入系统 - 领域层
// ==========================================
// 职责: 实体与类型定义,不含业务流程
// ==========================================

pub mod client;
pub mod import;
pub mod types;

// 重导出核心类型
pub use client::ClientRecord;
pub use import::{
    BatchCounts, ColumnProfile, CommitOutcome, DuplicateDecision, DuplicateMatch,
    DuplicateSettings, FieldMapping, FieldMatchDetail, ImportBatch, ImportRecord, MappedValues,
    MappingOutcome, MappingSuggestion, MatchFieldRule, ParseDiagnostic, ParseOptions, ParsedFile,
    PreviewReport, PreviewRow, RollbackSummary,
};
pub use types::{
    BatchStatus, ImportAction, InferredType, MatchType, ParseSeverity, RecordStatus, TargetField,
};
