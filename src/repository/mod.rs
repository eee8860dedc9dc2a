// ==========================================
// 客户档案导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod client_repo;
pub mod client_repo_impl;
pub mod error;
pub mod import_repo;
pub mod import_repo_impl;

// 重导出核心仓储
pub use client_repo::ClientRepository;
pub use client_repo_impl::ClientRepositoryImpl;
pub use error::{RepositoryError, RepositoryResult};
pub use import_repo::ImportRepository;
pub use import_repo_impl::ImportRepositoryImpl;
