// ==========================================
// 客户档案导入系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误(文件级致命)=====
    #[error("文件为空")]
    EmptyFile,

    #[error("文件格式不支持: {0}(仅支持 .csv/.xlsx/.json)")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("JSON 解析失败: {0}")]
    JsonParseError(String),

    // ===== 字段映射错误 =====
    #[error("AI 映射响应不可解析: {0}")]
    AiResponseError(String),

    #[error("必填目标字段缺少活动映射: {0}")]
    MissingRequiredMapping(String),

    #[error("同一目标字段存在多个活动映射: {0}")]
    DuplicateTargetMapping(String),

    #[error("值转换失败 (行 {row}, 字段 {field}): {message}")]
    TransformError {
        row: usize,
        field: String,
        message: String,
    },

    // ===== 批次状态错误 =====
    #[error("批次不存在: {0}")]
    BatchNotFound(String),

    #[error("批次状态非法 (batch {batch_id}): 期望 {expected}, 实际 {actual}")]
    InvalidBatchState {
        batch_id: String,
        expected: String,
        actual: String,
    },

    // ===== 回滚拒绝(结构化原因)=====
    #[error("回滚被拒绝: 批次未完成 (当前状态 {status})")]
    RollbackNotCompleted { status: String },

    #[error("回滚被拒绝: 回滚窗口已过期 (截止 {deadline})")]
    RollbackWindowExpired { deadline: String },

    // ===== 协作方错误 =====
    #[error("仓储访问失败: {0}")]
    RepositoryAccess(String),

    #[error("配置读取失败: {0}")]
    ConfigReadError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::JsonParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
