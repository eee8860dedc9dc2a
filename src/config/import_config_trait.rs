// ==========================================
// 客户档案导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口(不包含实现)
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入管道所需的配置读取接口
// 实现者: ConfigManager(从 config_kv 表读取)
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 解析与预览配置 =====

    /// 获取预览行数上限
    ///
    /// # 默认值
    /// - 10
    async fn get_preview_row_limit(&self) -> Result<usize, Box<dyn Error>>;

    /// 获取列画像采样值数量
    ///
    /// # 默认值
    /// - 5
    async fn get_sample_value_limit(&self) -> Result<usize, Box<dyn Error>>;

    // ===== 去重检测配置 =====

    /// 获取候选匹配数量上限
    ///
    /// # 默认值
    /// - 5
    async fn get_max_duplicate_candidates(&self) -> Result<usize, Box<dyn Error>>;

    /// 获取默认候选保留阈值
    ///
    /// # 默认值
    /// - 0.7
    async fn get_default_duplicate_threshold(&self) -> Result<f64, Box<dyn Error>>;

    /// 获取自动套用阈值(候选分 ≥ 该值时不需复核)
    ///
    /// # 默认值
    /// - 0.95
    async fn get_auto_apply_threshold(&self) -> Result<f64, Box<dyn Error>>;

    /// 获取复核阈值(候选分 ≥ 该值且 < 自动套用阈值时走默认动作并标记复核)
    ///
    /// # 默认值
    /// - 0.80
    async fn get_review_threshold(&self) -> Result<f64, Box<dyn Error>>;

    // ===== 字段映射配置 =====

    /// 获取规则映射的固定置信度(低于强 AI 匹配)
    ///
    /// # 默认值
    /// - 0.7
    async fn get_rule_mapping_confidence(&self) -> Result<f64, Box<dyn Error>>;

    // ===== 回滚与保留配置 =====

    /// 获取回滚窗口时长(小时)
    ///
    /// # 默认值
    /// - 24
    ///
    /// # 用途
    /// - 批次完成时设置 rollback_deadline = now + window
    async fn get_rollback_window_hours(&self) -> Result<i64, Box<dyn Error>>;

    /// 获取导入批次保留天数
    ///
    /// # 默认值
    /// - 90
    async fn get_batch_retention_days(&self) -> Result<i32, Box<dyn Error>>;
}
