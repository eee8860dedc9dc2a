// ==========================================
// 客户档案导入系统 - 客户仓储实现
// ==========================================
// 职责: client_record 表的 rusqlite 实现
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::client::ClientRecord;
use crate::repository::client_repo::ClientRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ClientRepositoryImpl
// ==========================================
pub struct ClientRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

const CLIENT_COLUMNS: &str = "client_id, org_id, first_name, last_name, email, phone, \
     date_of_birth, ssn, gender, external_id, address_street, address_city, \
     address_state, address_zip, notes, active, created_at, updated_at";

impl ClientRepositoryImpl {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 Repository
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_client_row(row: &Row<'_>) -> rusqlite::Result<ClientRecord> {
        let date_of_birth: Option<String> = row.get(6)?;

        Ok(ClientRecord {
            client_id: row.get(0)?,
            org_id: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
            date_of_birth: date_of_birth
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            ssn: row.get(7)?,
            gender: row.get(8)?,
            external_id: row.get(9)?,
            address_street: row.get(10)?,
            address_city: row.get(11)?,
            address_state: row.get(12)?,
            address_zip: row.get(13)?,
            notes: row.get(14)?,
            active: row.get::<_, i64>(15)? != 0,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }
}

#[async_trait]
impl ClientRepository for ClientRepositoryImpl {
    async fn insert_client(&self, client: ClientRecord) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO client_record (
                client_id, org_id, first_name, last_name, email, phone,
                date_of_birth, ssn, gender, external_id, address_street, address_city,
                address_state, address_zip, notes, active, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
            )
            "#,
            params![
                client.client_id,
                client.org_id,
                client.first_name,
                client.last_name,
                client.email,
                client.phone,
                client
                    .date_of_birth
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                client.ssn,
                client.gender,
                client.external_id,
                client.address_street,
                client.address_city,
                client.address_state,
                client.address_zip,
                client.notes,
                client.active as i64,
                client.created_at,
                client.updated_at,
            ],
        )
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn update_client(&self, client: &ClientRecord) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        let affected = conn
            .execute(
                r#"
                UPDATE client_record SET
                    first_name = ?2, last_name = ?3, email = ?4, phone = ?5,
                    date_of_birth = ?6, ssn = ?7, gender = ?8, external_id = ?9,
                    address_street = ?10, address_city = ?11, address_state = ?12,
                    address_zip = ?13, notes = ?14, active = ?15, updated_at = ?16
                WHERE client_id = ?1
                "#,
                params![
                    client.client_id,
                    client.first_name,
                    client.last_name,
                    client.email,
                    client.phone,
                    client
                        .date_of_birth
                        .map(|d| d.format("%Y-%m-%d").to_string()),
                    client.ssn,
                    client.gender,
                    client.external_id,
                    client.address_street,
                    client.address_city,
                    client.address_state,
                    client.address_zip,
                    client.notes,
                    client.active as i64,
                    Utc::now(),
                ],
            )
            .map_err(RepositoryError::from)?;

        if affected == 0 {
            return Err(Box::new(RepositoryError::NotFound {
                entity: "ClientRecord".to_string(),
                id: client.client_id.clone(),
            }));
        }

        Ok(())
    }

    async fn soft_delete_client(&self, client_id: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.lock()?;

        let affected = conn
            .execute(
                "UPDATE client_record SET active = 0, updated_at = ?2 WHERE client_id = ?1",
                params![client_id, Utc::now()],
            )
            .map_err(RepositoryError::from)?;

        if affected == 0 {
            return Err(Box::new(RepositoryError::NotFound {
                entity: "ClientRecord".to_string(),
                id: client_id.to_string(),
            }));
        }

        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>, Box<dyn Error>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM client_record WHERE client_id = ?1",
            CLIENT_COLUMNS
        );

        let result = conn.query_row(&sql, params![client_id], Self::map_client_row);

        match result {
            Ok(client) => Ok(Some(client)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(RepositoryError::from(e))),
        }
    }

    async fn list_active_by_org(&self, org_id: &str) -> Result<Vec<ClientRecord>, Box<dyn Error>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM client_record \
             WHERE org_id = ?1 AND active = 1 ORDER BY created_at ASC",
            CLIENT_COLUMNS
        );

        let mut stmt = conn.prepare(&sql).map_err(RepositoryError::from)?;
        let rows = stmt
            .query_map(params![org_id], Self::map_client_row)
            .map_err(RepositoryError::from)?;

        let clients = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(RepositoryError::from)?;
        Ok(clients)
    }

    async fn count_active_by_org(&self, org_id: &str) -> Result<usize, Box<dyn Error>> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM client_record WHERE org_id = ?1 AND active = 1",
                params![org_id],
                |row| row.get(0),
            )
            .map_err(RepositoryError::from)?;

        Ok(count as usize)
    }
}
