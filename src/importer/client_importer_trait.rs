// ==========================================
// 客户档案导入系统 - 客户导入 Trait
// ==========================================
// 职责: 定义导入管道接口与外部协作方接口(不包含实现)
// 红线: 协作方(文本生成/进度上报/对象存储)只消费,不实现
// ==========================================

use crate::domain::import::{
    CommitOutcome, DuplicateSettings, FieldMapping, ImportBatch, ParseOptions, ParsedFile,
    PreviewReport,
};
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ClientImporter Trait
// ==========================================
// 用途: 导入管道主接口
// 实现者: ClientImporterImpl
//
// 调用顺序(与批次生命周期对齐):
// 1. ingest          → 解析 + 列分析 + 映射建议 (PENDING → PARSING → MAPPING)
// 2. apply_mappings  → 用户确认映射/去重设置 (MAPPING → READY)
// 3. preview         → 只读预演(不改状态,不写实体)
// 4. commit          → 全量执行 (READY → PROCESSING → COMPLETED/FAILED)
#[async_trait]
pub trait ClientImporter: Send + Sync {
    /// 摄入上传文件,生成批次并产出映射建议
    ///
    /// # 参数
    /// - org_id: 所属组织
    /// - file_name: 声明文件名(扩展名决定解析器)
    /// - bytes: 已拉取的文件字节(对象存储由调用方负责)
    /// - options: 解析选项
    /// - uploaded_by: 上传人标识
    ///
    /// # 返回
    /// - Ok(ImportBatch): 处于 MAPPING 状态的批次(含映射建议)
    /// - Err: 文件级致命错误(批次落库为 FAILED)
    async fn ingest(
        &self,
        org_id: &str,
        file_name: &str,
        bytes: &[u8],
        options: ParseOptions,
        uploaded_by: Option<&str>,
    ) -> Result<ImportBatch, Box<dyn Error>>;

    /// 确认字段映射与去重设置,批次进入 READY
    ///
    /// # 校验
    /// - 必填目标字段(firstName/lastName + email 或 phone 其一)必须有活动映射
    /// - 同一目标字段至多一个活动映射
    async fn apply_mappings(
        &self,
        batch_id: &str,
        mappings: Vec<FieldMapping>,
        settings: Option<DuplicateSettings>,
    ) -> Result<ImportBatch, Box<dyn Error>>;

    /// 只读预演: 对预览样本行执行映射 + 去重检测
    ///
    /// # 说明
    /// - 不写实体、不改批次状态
    async fn preview(&self, batch_id: &str) -> Result<PreviewReport, Box<dyn Error>>;

    /// 全量提交: 对整个行集重跑映射 + 去重检测并落库
    ///
    /// # 参数
    /// - batch_id: 批次 ID(须处于 READY)
    /// - bytes: 文件字节(由调用方重新拉取)
    /// - options: 解析选项(与摄入阶段一致)
    ///
    /// # 语义
    /// - 行间无整体事务,单行失败不中断批次
    /// - 完成后设置回滚截止时间
    async fn commit(
        &self,
        batch_id: &str,
        bytes: &[u8],
        options: ParseOptions,
    ) -> Result<CommitOutcome, Box<dyn Error>>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件解析接口(阶段 0)
// 实现者: CsvParser, ExcelParser, JsonParser
pub trait FileParser: Send + Sync {
    /// 解析字节缓冲为列/行/预览/诊断
    ///
    /// # 参数
    /// - bytes: 文件字节
    /// - options: 解析选项
    ///
    /// # 返回
    /// - Ok(ParsedFile): 解析输出(行级失败记为 warning 诊断)
    /// - Err: 文件级致命错误
    fn parse_bytes(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
    ) -> crate::importer::error::ImportResult<ParsedFile>;
}

// ==========================================
// TextGenerator Trait
// ==========================================
// 用途: 外部文本生成服务(AI 辅助映射)
// 约束: 请求 = 提示词字符串; 响应 = 自由文本(允许围栏包裹的 JSON)
// 容错: 调用失败或响应不可解析时,映射器静默降级为规则映射
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

// ==========================================
// ProgressTracker Trait
// ==========================================
// 用途: 任务队列进度上报(长批次可观测)
// 约束: 上报失败不得中断导入
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// 上报进度(0-100)
    async fn report(&self, job_id: &str, progress: u8);

    /// 终态: 成功
    async fn completed(&self, job_id: &str, outcome: &CommitOutcome);

    /// 终态: 失败
    async fn failed(&self, job_id: &str, message: &str);
}
