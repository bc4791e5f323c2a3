//! Model catalog backed by SQLite.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};

use super::catalog::{ModelCatalog, ModelCatalogError};
use crate::types::{ModelId, ModelRecord, ModelType};

const SELECT_COLUMNS: &str = "SELECT id, name, file, file_path, file_size, context_length,
        params, quantization, architecture, model_type
 FROM model_data";

/// SQLite-backed store for imported models.
pub struct SqliteModelCatalog {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl SqliteModelCatalog {
    /// Open (or create) the catalog at the given path.
    pub fn open(path: &Path) -> Result<Self, ModelCatalogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ModelCatalogError::Storage {
                reason: format!("create dir: {e}"),
            })?;
        }
        let conn = rusqlite::Connection::open(path).map_err(storage)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage)?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Open an in-memory catalog (useful for tests).
    pub fn open_in_memory() -> Result<Self, ModelCatalogError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(storage)?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Default database path: `$XDG_DATA_HOME/llamaslot/models.db`
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("llamaslot").join("models.db")
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), ModelCatalogError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS model_data (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                name           TEXT NOT NULL,
                file           TEXT NOT NULL,
                file_path      TEXT NOT NULL,
                file_size      INTEGER NOT NULL DEFAULT 0,
                context_length INTEGER NOT NULL DEFAULT 0,
                params         TEXT NOT NULL DEFAULT '',
                quantization   TEXT NOT NULL DEFAULT '-1',
                architecture   TEXT NOT NULL DEFAULT '',
                model_type     TEXT NOT NULL DEFAULT 'main_chat',
                create_date    INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_model_data_type ON model_data(model_type);",
        )
        .map_err(storage)?;
        Ok(())
    }

    /// Import a model row. The id on `model` is ignored; the assigned id is
    /// returned.
    pub async fn insert(&self, model: &ModelRecord) -> Result<ModelId, ModelCatalogError> {
        let quantization = model
            .quantization
            .map(|q| q.to_string())
            .unwrap_or_else(|| "-1".to_string());

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO model_data
                (name, file, file_path, file_size, context_length, params,
                 quantization, architecture, model_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                model.name,
                model.file,
                model.file_path.to_string_lossy(),
                model.file_size as i64,
                model.context_length as i64,
                model.params,
                quantization,
                model.architecture,
                model.model_type.as_str(),
            ],
        )
        .map_err(storage)?;

        Ok(conn.last_insert_rowid())
    }

    /// Delete a row. Returns whether anything was removed.
    pub async fn remove(&self, id: ModelId) -> Result<bool, ModelCatalogError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM model_data WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(storage)?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl ModelCatalog for SqliteModelCatalog {
    async fn find_by_id(&self, id: ModelId) -> Result<Option<ModelRecord>, ModelCatalogError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .map_err(storage)?;

        let result = stmt
            .query_row(rusqlite::params![id], row_to_model)
            .optional()
            .map_err(storage)?;

        result.transpose()
    }

    async fn list(&self) -> Result<Vec<ModelRecord>, ModelCatalogError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .map_err(storage)?;

        let rows = stmt.query_map([], row_to_model).map_err(storage)?;

        let mut models = Vec::new();
        for row_result in rows {
            let inner = row_result.map_err(storage)?;
            models.push(inner?);
        }
        Ok(models)
    }
}

fn storage(e: rusqlite::Error) -> ModelCatalogError {
    ModelCatalogError::Storage {
        reason: e.to_string(),
    }
}

fn row_to_model(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<ModelRecord, ModelCatalogError>> {
    let id: ModelId = row.get(0)?;
    let name: String = row.get(1)?;
    let file: String = row.get(2)?;
    let file_path: String = row.get(3)?;
    let file_size: i64 = row.get(4)?;
    let context_length: i64 = row.get(5)?;
    let params: String = row.get(6)?;
    let quantization: String = row.get(7)?;
    let architecture: String = row.get(8)?;
    let model_type: String = row.get(9)?;

    let model_type = match model_type.parse::<ModelType>() {
        Ok(t) => t,
        Err(reason) => return Ok(Err(ModelCatalogError::Corrupt { id, reason })),
    };

    let quantization = match quantization.trim().parse::<i64>() {
        Ok(q) if q < 0 => None,
        Ok(q) => match u32::try_from(q) {
            Ok(q) => Some(q),
            Err(_) => {
                return Ok(Err(ModelCatalogError::Corrupt {
                    id,
                    reason: format!("quantization {q} out of range"),
                }))
            }
        },
        Err(_) => {
            return Ok(Err(ModelCatalogError::Corrupt {
                id,
                reason: format!("quantization '{quantization}' is not a number"),
            }))
        }
    };

    Ok(Ok(ModelRecord {
        id,
        name,
        file,
        file_path: PathBuf::from(file_path),
        file_size: file_size.max(0) as u64,
        context_length: context_length.clamp(0, u32::MAX as i64) as u32,
        params,
        quantization,
        architecture,
        model_type,
    }))
}
