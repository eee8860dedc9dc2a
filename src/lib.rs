// ==========================================
// 客户档案导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批量客户档案导入的数据/算法核心
// (解析 / 映射 / 去重匹配 / 事务化执行 / 限时回滚)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 管道核心
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施(连接初始化/PRAGMA 统一/schema)
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    BatchStatus, ImportAction, InferredType, MatchType, ParseSeverity, RecordStatus, TargetField,
};

// 领域实体
pub use domain::{
    ClientRecord, CommitOutcome, DuplicateMatch, DuplicateSettings, FieldMapping, ImportBatch,
    ImportRecord, MatchFieldRule, ParseOptions, PreviewReport, RollbackSummary,
};

// 导入管道
pub use importer::{
    ClientImporter, ClientImporterImpl, DuplicateDetector, FieldMapper, RollbackManager,
    UniversalFileParser,
};

// 仓储
pub use repository::{
    ClientRepository, ClientRepositoryImpl, ImportRepository, ImportRepositoryImpl,
};

// 配置
pub use config::{ConfigManager, ImportConfigReader};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "客户档案导入系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
