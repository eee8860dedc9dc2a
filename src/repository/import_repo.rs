// ==========================================
// 客户档案导入系统 - 导入仓储 Trait
// ==========================================
// 职责: 定义批次/行记录数据访问接口(不包含实现)
// 红线: Repository 不含业务规则,只做数据 CRUD
// ==========================================

use crate::domain::import::{ImportBatch, ImportRecord};
use crate::domain::types::RecordStatus;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ImportRepository Trait
// ==========================================
// 用途: 批次与行记录数据访问
// 实现者: ImportRepositoryImpl(使用 rusqlite)
#[async_trait]
pub trait ImportRepository: Send + Sync {
    // ===== 批次管理 =====

    /// 插入导入批次记录
    ///
    /// # 参数
    /// - batch: 批次信息
    async fn insert_batch(&self, batch: ImportBatch) -> Result<(), Box<dyn Error>>;

    /// 根据 ID 查询批次
    ///
    /// # 返回
    /// - Ok(Some(batch)): 找到批次
    /// - Ok(None): 未找到
    async fn get_batch(&self, batch_id: &str) -> Result<Option<ImportBatch>, Box<dyn Error>>;

    /// 整体更新批次(状态/JSON 列/计数/回滚截止时间)
    ///
    /// # 说明
    /// - updated_at 由实现方写入当前时间
    async fn update_batch(&self, batch: &ImportBatch) -> Result<(), Box<dyn Error>>;

    /// 查询最近的导入批次
    ///
    /// # 参数
    /// - limit: 返回记录数限制
    async fn get_recent_batches(&self, limit: usize) -> Result<Vec<ImportBatch>, Box<dyn Error>>;

    // ===== 行记录管理 =====

    /// 插入行记录(每行恰好一条)
    ///
    /// # 参数
    /// - record: 行记录
    async fn insert_record(&self, record: ImportRecord) -> Result<(), Box<dyn Error>>;

    /// 查询批次的行记录(可按状态过滤,按行号升序)
    ///
    /// # 参数
    /// - batch_id: 批次 ID
    /// - status: 状态过滤(None = 全部)
    async fn list_records_by_batch(
        &self,
        batch_id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<ImportRecord>, Box<dyn Error>>;

    /// 更新行记录状态(回滚专用,内容不可变)
    ///
    /// # 参数
    /// - record_id: 记录 ID
    /// - status: 新状态
    async fn update_record_status(
        &self,
        record_id: &str,
        status: RecordStatus,
    ) -> Result<(), Box<dyn Error>>;
}
