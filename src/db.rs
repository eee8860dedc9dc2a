// ==========================================
// 客户档案导入系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为,避免"部分模块外键开启/部分不开启"
// - 统一 busy_timeout,减少并发写入时的偶发 busy 错误
// - 提供内嵌 schema 初始化(导入核心不做迁移管理)
// ==========================================

use rusqlite::Connection;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化导入核心所需的全部表结构(幂等)
///
/// # 表
/// - import_batch: 批次元信息(列/预览/映射/去重设置为 JSON 列)
/// - import_record: 行记录结局
/// - client_record: 客户档案(实体存储,软删)
/// - config_scope / config_kv: 键值配置
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS import_batch (
            batch_id                TEXT PRIMARY KEY,
            org_id                  TEXT NOT NULL,
            file_name               TEXT NOT NULL,
            file_size               INTEGER NOT NULL DEFAULT 0,
            status                  TEXT NOT NULL,
            total_rows              INTEGER NOT NULL DEFAULT 0,
            detected_columns_json   TEXT NOT NULL DEFAULT '[]',
            preview_rows_json       TEXT NOT NULL DEFAULT '[]',
            field_mappings_json     TEXT NOT NULL DEFAULT '[]',
            duplicate_settings_json TEXT NOT NULL DEFAULT '{}',
            created_count           INTEGER NOT NULL DEFAULT 0,
            updated_count           INTEGER NOT NULL DEFAULT 0,
            skipped_count           INTEGER NOT NULL DEFAULT 0,
            failed_count            INTEGER NOT NULL DEFAULT 0,
            error_message           TEXT,
            rollback_deadline       TEXT,
            uploaded_by             TEXT,
            elapsed_ms              INTEGER,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_record (
            record_id              TEXT PRIMARY KEY,
            batch_id               TEXT NOT NULL REFERENCES import_batch(batch_id),
            row_number             INTEGER NOT NULL,
            status                 TEXT NOT NULL,
            suggested_action       TEXT NOT NULL,
            chosen_action          TEXT NOT NULL,
            raw_values_json        TEXT NOT NULL DEFAULT '{}',
            mapped_values_json     TEXT NOT NULL DEFAULT '{}',
            matches_json           TEXT NOT NULL DEFAULT '[]',
            validation_errors_json TEXT NOT NULL DEFAULT '[]',
            client_id              TEXT,
            created_at             TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_import_record_batch
            ON import_record(batch_id, row_number);

        CREATE TABLE IF NOT EXISTS client_record (
            client_id       TEXT PRIMARY KEY,
            org_id          TEXT NOT NULL,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL,
            email           TEXT,
            phone           TEXT,
            date_of_birth   TEXT,
            ssn             TEXT,
            gender          TEXT,
            external_id     TEXT,
            address_street  TEXT,
            address_city    TEXT,
            address_state   TEXT,
            address_zip     TEXT,
            notes           TEXT,
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_client_record_org
            ON client_record(org_id, active);

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id   TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key  TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id   TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key        TEXT NOT NULL,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='import_batch'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
