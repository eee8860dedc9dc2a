// ==========================================
// 客户档案导入系统 - 客户领域模型
// ==========================================
// 依据: Import_Pipeline_Spec - 实体存储(按组织隔离)
// 用途: 导入执行器写入,去重检测只读
// 对齐: client_record 表
// ==========================================

use crate::domain::import::MappedValues;
use crate::domain::types::TargetField;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ClientRecord - 客户档案
// ==========================================
// 红线: 删除一律软删(active = false),回滚依赖此语义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    // ===== 主键与归属 =====
    pub client_id: String, // 客户 ID(UUID)
    pub org_id: String,    // 所属组织

    // ===== 基础信息 =====
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub ssn: Option<String>,
    pub gender: Option<String>,
    pub external_id: Option<String>, // 源系统标识

    // ===== 地址 =====
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,

    // ===== 备注 =====
    pub notes: Option<String>,

    // ===== 软删标记 =====
    pub active: bool,

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientRecord {
    /// 从映射值创建新客户(执行阶段 CREATE_NEW 分支)
    ///
    /// # 前置条件
    /// - 调用方已校验 firstName / lastName 非空
    pub fn from_mapped(org_id: &str, values: &MappedValues) -> Self {
        let now = Utc::now();
        let mut client = Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: None,
            phone: None,
            date_of_birth: None,
            ssn: None,
            gender: None,
            external_id: None,
            address_street: None,
            address_city: None,
            address_state: None,
            address_zip: None,
            notes: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        client.apply_mapped(values);
        client
    }

    /// 将映射值套用到档案上(执行阶段 UPDATE 分支)
    ///
    /// # 说明
    /// - 仅覆盖映射中出现的字段,缺失字段保持原值
    pub fn apply_mapped(&mut self, values: &MappedValues) {
        for (field, value) in values.iter() {
            match field {
                TargetField::FirstName => self.first_name = value.to_string(),
                TargetField::LastName => self.last_name = value.to_string(),
                TargetField::Email => self.email = Some(value.to_string()),
                TargetField::Phone => self.phone = Some(value.to_string()),
                TargetField::DateOfBirth => {
                    // 转换器已归一为 YYYY-MM-DD,仍按解析结果兜底
                    self.date_of_birth = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();
                }
                TargetField::Ssn => self.ssn = Some(value.to_string()),
                TargetField::Gender => self.gender = Some(value.to_string()),
                TargetField::ExternalId => self.external_id = Some(value.to_string()),
                TargetField::AddressStreet => self.address_street = Some(value.to_string()),
                TargetField::AddressCity => self.address_city = Some(value.to_string()),
                TargetField::AddressState => self.address_state = Some(value.to_string()),
                TargetField::AddressZip => self.address_zip = Some(value.to_string()),
                TargetField::Notes => self.notes = Some(value.to_string()),
            }
        }
        self.updated_at = Utc::now();
    }

    /// 读取目标字段对应的存量值(去重检测用)
    pub fn value_of(&self, field: TargetField) -> Option<String> {
        match field {
            TargetField::FirstName => Some(self.first_name.clone()),
            TargetField::LastName => Some(self.last_name.clone()),
            TargetField::Email => self.email.clone(),
            TargetField::Phone => self.phone.clone(),
            TargetField::DateOfBirth => {
                self.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string())
            }
            TargetField::Ssn => self.ssn.clone(),
            TargetField::Gender => self.gender.clone(),
            TargetField::ExternalId => self.external_id.clone(),
            TargetField::AddressStreet => self.address_street.clone(),
            TargetField::AddressCity => self.address_city.clone(),
            TargetField::AddressState => self.address_state.clone(),
            TargetField::AddressZip => self.address_zip.clone(),
            TargetField::Notes => self.notes.clone(),
        }
    }

    /// 展示名(候选匹配列表用)
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}
