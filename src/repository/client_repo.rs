// ==========================================
// 客户档案导入系统 - 客户仓储 Trait
// ==========================================
// 职责: 定义客户档案数据访问接口(不包含实现)
// 红线: Repository 不含业务规则,只做数据 CRUD
// ==========================================

use crate::domain::client::ClientRecord;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ClientRepository Trait
// ==========================================
// 用途: 客户档案(实体存储)数据访问
// 实现者: ClientRepositoryImpl(使用 rusqlite)
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// 插入新客户
    async fn insert_client(&self, client: ClientRecord) -> Result<(), Box<dyn Error>>;

    /// 整体更新既有客户
    async fn update_client(&self, client: &ClientRecord) -> Result<(), Box<dyn Error>>;

    /// 软删除客户(active = false,回滚专用)
    ///
    /// # 参数
    /// - client_id: 客户 ID
    async fn soft_delete_client(&self, client_id: &str) -> Result<(), Box<dyn Error>>;

    /// 根据 ID 查询客户(含已软删)
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>, Box<dyn Error>>;

    /// 查询组织下全部活动客户(去重检测的存量快照)
    ///
    /// # 参数
    /// - org_id: 组织 ID
    async fn list_active_by_org(&self, org_id: &str) -> Result<Vec<ClientRecord>, Box<dyn Error>>;

    /// 统计组织下活动客户数量
    async fn count_active_by_org(&self, org_id: &str) -> Result<usize, Box<dyn Error>>;
}
