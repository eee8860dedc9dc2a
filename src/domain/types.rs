// ==========================================
// 客户档案导入系统 - 领域类型定义
// ==========================================
// 依据: Import_Pipeline_Spec - 批次生命周期与目标字段体系
// 红线: 目标字段为封闭枚举,非开放字符串键
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 红线: 严格单向推进,FAILED 仅可从活动状态进入
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,    // 已创建,等待解析
    Parsing,    // 解析中
    Mapping,    // 字段映射中
    Ready,      // 映射确认,等待执行
    Processing, // 批次执行中
    Completed,  // 执行完成(可回滚)
    RolledBack, // 已回滚(终态)
    Failed,     // 失败(终态)
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Parsing => "PARSING",
            BatchStatus::Mapping => "MAPPING",
            BatchStatus::Ready => "READY",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::RolledBack => "ROLLED_BACK",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BatchStatus::Pending),
            "PARSING" => Some(BatchStatus::Parsing),
            "MAPPING" => Some(BatchStatus::Mapping),
            "READY" => Some(BatchStatus::Ready),
            "PROCESSING" => Some(BatchStatus::Processing),
            "COMPLETED" => Some(BatchStatus::Completed),
            "ROLLED_BACK" => Some(BatchStatus::RolledBack),
            "FAILED" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    /// 是否为活动状态(尚未进入终态分支)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BatchStatus::Pending
                | BatchStatus::Parsing
                | BatchStatus::Mapping
                | BatchStatus::Ready
                | BatchStatus::Processing
        )
    }

    /// 状态转换合法性判定
    ///
    /// # 规则
    /// - 正向推进: PENDING → PARSING → MAPPING → READY → PROCESSING → COMPLETED → ROLLED_BACK
    /// - FAILED: 仅可从活动状态进入
    /// - 终态(ROLLED_BACK / FAILED)不可再转换
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::Pending, BatchStatus::Parsing) => true,
            (BatchStatus::Parsing, BatchStatus::Mapping) => true,
            (BatchStatus::Mapping, BatchStatus::Ready) => true,
            (BatchStatus::Ready, BatchStatus::Processing) => true,
            (BatchStatus::Processing, BatchStatus::Completed) => true,
            (BatchStatus::Completed, BatchStatus::RolledBack) => true,
            (from, BatchStatus::Failed) => from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 行记录状态 (Record Status)
// ==========================================
// 每行一条 ImportRecord,仅回滚可修改状态(不改内容)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Created,    // 新建客户
    Updated,    // 更新既有客户
    Skipped,    // 跳过
    Failed,     // 校验/执行失败
    RolledBack, // 已回滚(仅 CREATED 可进入)
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Created => "CREATED",
            RecordStatus::Updated => "UPDATED",
            RecordStatus::Skipped => "SKIPPED",
            RecordStatus::Failed => "FAILED",
            RecordStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(RecordStatus::Created),
            "UPDATED" => Some(RecordStatus::Updated),
            "SKIPPED" => Some(RecordStatus::Skipped),
            "FAILED" => Some(RecordStatus::Failed),
            "ROLLED_BACK" => Some(RecordStatus::RolledBack),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入动作 (Import Action)
// ==========================================
// 去重决策输出/用户选择,执行阶段按此分支
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportAction {
    CreateNew, // 新建客户
    Update,    // 更新最高分候选
    Skip,      // 不做任何写入
}

impl ImportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportAction::CreateNew => "CREATE_NEW",
            ImportAction::Update => "UPDATE",
            ImportAction::Skip => "SKIP",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "CREATE_NEW" => Some(ImportAction::CreateNew),
            "UPDATE" => Some(ImportAction::Update),
            "SKIP" => Some(ImportAction::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for ImportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 字段匹配类型 (Match Type)
// ==========================================
// 每条匹配规则使用一种比较策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,      // 完全相等(默认忽略大小写)
    Normalized, // 剥离非字母数字后相等
    Fuzzy,      // Levenshtein 编辑距离相似度
    Phonetic,   // Soundex 语音编码
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Exact => "exact",
            MatchType::Normalized => "normalized",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Phonetic => "phonetic",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// 列推断类型 (Inferred Type)
// ==========================================
// Column Analyzer 输出,供映射建议与预览展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Email,
    Phone,
    Ssn,
    Boolean,
    Date,
    Number,
    Text,
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InferredType::Email => "email",
            InferredType::Phone => "phone",
            InferredType::Ssn => "ssn",
            InferredType::Boolean => "boolean",
            InferredType::Date => "date",
            InferredType::Number => "number",
            InferredType::Text => "text",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// 解析诊断级别 (Parse Severity)
// ==========================================
// Error = 文件级致命(批次不可用), Warning = 行级(跳过该行)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseSeverity {
    Error,
    Warning,
}

// ==========================================
// 目标字段 (Target Field)
// ==========================================
// 红线: 封闭集合,非法目标字段在解析期拒绝
// 路径格式: 点分标识(client.firstName),与映射 JSON 一致
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TargetField {
    #[serde(rename = "client.firstName")]
    FirstName,
    #[serde(rename = "client.lastName")]
    LastName,
    #[serde(rename = "client.email")]
    Email,
    #[serde(rename = "client.phone")]
    Phone,
    #[serde(rename = "client.dateOfBirth")]
    DateOfBirth,
    #[serde(rename = "client.ssn")]
    Ssn,
    #[serde(rename = "client.gender")]
    Gender,
    #[serde(rename = "client.externalId")]
    ExternalId,
    #[serde(rename = "client.address.street")]
    AddressStreet,
    #[serde(rename = "client.address.city")]
    AddressCity,
    #[serde(rename = "client.address.state")]
    AddressState,
    #[serde(rename = "client.address.zip")]
    AddressZip,
    #[serde(rename = "client.notes")]
    Notes,
}

impl TargetField {
    /// 全部目标字段(顺序 = 目标 schema 展示顺序)
    pub const ALL: [TargetField; 13] = [
        TargetField::FirstName,
        TargetField::LastName,
        TargetField::Email,
        TargetField::Phone,
        TargetField::DateOfBirth,
        TargetField::Ssn,
        TargetField::Gender,
        TargetField::ExternalId,
        TargetField::AddressStreet,
        TargetField::AddressCity,
        TargetField::AddressState,
        TargetField::AddressZip,
        TargetField::Notes,
    ];

    pub fn as_path(&self) -> &'static str {
        match self {
            TargetField::FirstName => "client.firstName",
            TargetField::LastName => "client.lastName",
            TargetField::Email => "client.email",
            TargetField::Phone => "client.phone",
            TargetField::DateOfBirth => "client.dateOfBirth",
            TargetField::Ssn => "client.ssn",
            TargetField::Gender => "client.gender",
            TargetField::ExternalId => "client.externalId",
            TargetField::AddressStreet => "client.address.street",
            TargetField::AddressCity => "client.address.city",
            TargetField::AddressState => "client.address.state",
            TargetField::AddressZip => "client.address.zip",
            TargetField::Notes => "client.notes",
        }
    }

    /// 点分路径 → 枚举(未知路径返回 None,用于拦截幻觉字段)
    pub fn from_path(path: &str) -> Option<Self> {
        TargetField::ALL
            .iter()
            .copied()
            .find(|f| f.as_path() == path)
    }

    /// 字段描述(用于 AI 提示词中的目标字段目录)
    pub fn description(&self) -> &'static str {
        match self {
            TargetField::FirstName => "Legal first / given name",
            TargetField::LastName => "Legal last / family name",
            TargetField::Email => "Primary email address",
            TargetField::Phone => "Primary phone number",
            TargetField::DateOfBirth => "Date of birth",
            TargetField::Ssn => "Social security number",
            TargetField::Gender => "Gender",
            TargetField::ExternalId => "Identifier in the source system",
            TargetField::AddressStreet => "Street address",
            TargetField::AddressCity => "City",
            TargetField::AddressState => "State / province",
            TargetField::AddressZip => "ZIP / postal code",
            TargetField::Notes => "Free-form notes",
        }
    }

    /// 是否为必填目标字段(执行前必须有活动映射)
    ///
    /// # 说明
    /// - firstName / lastName 无条件必填
    /// - 联系标识(email 或 phone 至少其一)由执行器单独校验
    pub fn is_required(&self) -> bool {
        matches!(self, TargetField::FirstName | TargetField::LastName)
    }
}

impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_path())
    }
}
