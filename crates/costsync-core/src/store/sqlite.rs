//! SQLite document store
//!
//! Schema (one file per logical database):
//! - `qto.db`: projects, elements
//! - `cost.db`: cost_data, cost_elements, cost_summaries, kennwerte
//!
//! Documents are stored as JSON in a `data` column next to the few columns
//! needed for lookups.

use super::{BulkInsertOutcome, DocumentStore};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    BimElement, CostElement, KennwerteRecord, Project, ProjectCostSummary, UnitCostEntry,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Params};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bump when the stored document shape changes; mismatches clear derived tables
const SCHEMA_VERSION: i64 = 1;

const QTO_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name_lower TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS elements (
        id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (project_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name_lower);
    CREATE INDEX IF NOT EXISTS idx_elements_project ON elements(project_id);
"#;

const COST_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS store_metadata (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cost_data (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cost_elements (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cost_summaries (
        project_id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS kennwerte (
        project_id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cost_data_project ON cost_data(project_id);
    CREATE INDEX IF NOT EXISTS idx_cost_elements_project ON cost_elements(project_id);
"#;

/// SQLite-backed document store (thread-safe)
pub struct SqliteStore {
    qto: Mutex<Connection>,
    cost: Mutex<Connection>,
    location: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open `qto.db` and `cost.db` under `data_dir`
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| CoreError::FileRead {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let qto = open_file(&data_dir.join("qto.db"))?;
        let cost = open_file(&data_dir.join("cost.db"))?;
        let store = Self::from_connections(qto, cost, Some(data_dir.to_path_buf()))?;

        debug!(path = %data_dir.display(), "SQLite document store opened");
        Ok(store)
    }

    /// Private in-memory databases (tests, dry runs)
    pub fn in_memory() -> CoreResult<Self> {
        let qto = Connection::open_in_memory()
            .map_err(|e| CoreError::database("open in-memory qto database", e))?;
        let cost = Connection::open_in_memory()
            .map_err(|e| CoreError::database("open in-memory cost database", e))?;
        Self::from_connections(qto, cost, None)
    }

    fn from_connections(
        qto: Connection,
        cost: Connection,
        location: Option<PathBuf>,
    ) -> CoreResult<Self> {
        qto.execute_batch(QTO_SCHEMA)
            .map_err(|e| CoreError::database("create qto schema", e))?;
        cost.execute_batch(COST_SCHEMA)
            .map_err(|e| CoreError::database("create cost schema", e))?;
        check_schema_version(&cost, &["cost_elements", "cost_summaries"])?;

        Ok(Self {
            qto: Mutex::new(qto),
            cost: Mutex::new(cost),
            location,
        })
    }

    /// Data directory, `None` when in memory
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn with_qto<T>(&self, f: impl FnOnce(&Connection) -> CoreResult<T>) -> CoreResult<T> {
        let conn = self.qto.lock();
        f(&conn)
    }

    fn with_cost<T>(&self, f: impl FnOnce(&Connection) -> CoreResult<T>) -> CoreResult<T> {
        let conn = self.cost.lock();
        f(&conn)
    }
}

fn open_file(path: &Path) -> CoreResult<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| CoreError::database(format!("open {}", path.display()), e))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| CoreError::database("enable WAL mode", e))?;
    Ok(conn)
}

/// Derived tables are rebuilt by the next reconciliation, so a version
/// mismatch simply clears them.
fn check_schema_version(conn: &Connection, derived_tables: &[&str]) -> CoreResult<()> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CoreError::database("query schema version", e))?;

    match stored {
        Some(v) if v == SCHEMA_VERSION => return Ok(()),
        Some(v) => {
            warn!(
                stored = v,
                current = SCHEMA_VERSION,
                "Schema version mismatch, clearing derived cost tables"
            );
            for table in derived_tables {
                conn.execute(&format!("DELETE FROM {}", table), [])
                    .map_err(|e| CoreError::database(format!("clear {}", table), e))?;
            }
        }
        None => debug!("Schema version initialized to {}", SCHEMA_VERSION),
    }

    conn.execute(
        "INSERT OR REPLACE INTO store_metadata (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )
    .map_err(|e| CoreError::database("update schema version", e))?;
    Ok(())
}

fn encode<T: Serialize>(what: &str, value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::serialization(what, e))
}

fn decode<T: DeserializeOwned>(what: &str, data: &str) -> CoreResult<T> {
    serde_json::from_str(data).map_err(|e| CoreError::serialization(what, e))
}

fn load_docs<T: DeserializeOwned>(
    conn: &Connection,
    what: &str,
    sql: &str,
    params: impl Params,
) -> CoreResult<Vec<T>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| CoreError::database(format!("prepare {} query", what), e))?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|e| CoreError::database(format!("query {}", what), e))?;

    let mut docs = Vec::new();
    for row in rows {
        let data = row.map_err(|e| CoreError::database(format!("read {}", what), e))?;
        docs.push(decode(what, &data)?);
    }
    Ok(docs)
}

fn load_doc<T: DeserializeOwned>(
    conn: &Connection,
    what: &str,
    sql: &str,
    params: impl Params,
) -> CoreResult<Option<T>> {
    let data: Option<String> = conn
        .query_row(sql, params, |row| row.get(0))
        .optional()
        .map_err(|e| CoreError::database(format!("query {}", what), e))?;
    data.map(|data| decode(what, &data)).transpose()
}

fn delete_where_project(conn: &Connection, table: &str, project_id: &str) -> CoreResult<u64> {
    let deleted = conn
        .execute(
            &format!("DELETE FROM {} WHERE project_id = ?1", table),
            params![project_id],
        )
        .map_err(|e| CoreError::database(format!("delete from {}", table), e))?;
    Ok(deleted as u64)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ping(&self) -> CoreResult<()> {
        self.with_qto(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| CoreError::database("ping qto database", e))
        })?;
        self.with_cost(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| CoreError::database("ping cost database", e))
        })?;
        Ok(())
    }

    async fn find_project_by_name(&self, name: &str) -> CoreResult<Option<Project>> {
        let key = name.trim().to_lowercase();
        self.with_qto(|conn| {
            load_doc(
                conn,
                "project",
                "SELECT data FROM projects WHERE name_lower = ?1 ORDER BY rowid LIMIT 1",
                params![key],
            )
        })
    }

    async fn list_projects(&self) -> CoreResult<Vec<Project>> {
        self.with_qto(|conn| {
            load_docs(
                conn,
                "projects",
                "SELECT data FROM projects ORDER BY name_lower",
                [],
            )
        })
    }

    async fn upsert_project(&self, project: &Project) -> CoreResult<()> {
        let data = encode("project", project)?;
        self.with_qto(|conn| {
            // An existing id is only updated while it keeps its name
            let changed = conn
                .execute(
                    "INSERT INTO projects (id, name_lower, data) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data
                     WHERE projects.name_lower = excluded.name_lower",
                    params![project.id, project.name.trim().to_lowercase(), data],
                )
                .map_err(|e| CoreError::database("upsert project", e))?;
            if changed == 0 {
                return Err(CoreError::ProjectIdConflict {
                    id: project.id.clone(),
                    name: project.name.clone(),
                });
            }
            Ok(())
        })
    }

    async fn elements_for_project(&self, project_id: &str) -> CoreResult<Vec<BimElement>> {
        self.with_qto(|conn| {
            load_docs(
                conn,
                "elements",
                "SELECT data FROM elements WHERE project_id = ?1 ORDER BY rowid",
                params![project_id],
            )
        })
    }

    async fn all_elements(&self) -> CoreResult<Vec<BimElement>> {
        self.with_qto(|conn| {
            load_docs(conn, "elements", "SELECT data FROM elements ORDER BY rowid", [])
        })
    }

    async fn upsert_elements(&self, elements: &[BimElement]) -> CoreResult<usize> {
        let mut encoded = Vec::with_capacity(elements.len());
        for element in elements {
            encoded.push((element, encode("element", element)?));
        }

        self.with_qto(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CoreError::database("begin element upsert", e))?;
            for (element, data) in &encoded {
                tx.execute(
                    "INSERT INTO elements (id, project_id, data) VALUES (?1, ?2, ?3)
                     ON CONFLICT(project_id, id) DO UPDATE SET data = excluded.data",
                    params![element.id, element.project_id, data],
                )
                .map_err(|e| CoreError::database("upsert element", e))?;
            }
            tx.commit()
                .map_err(|e| CoreError::database("commit element upsert", e))?;
            Ok(encoded.len())
        })
    }

    async fn unit_costs_for_project(&self, project_id: &str) -> CoreResult<Vec<UnitCostEntry>> {
        self.with_cost(|conn| {
            load_docs(
                conn,
                "cost data",
                "SELECT data FROM cost_data WHERE project_id = ?1 ORDER BY rowid",
                params![project_id],
            )
        })
    }

    async fn upsert_unit_cost(&self, entry: &UnitCostEntry) -> CoreResult<()> {
        let data = encode("cost data", entry)?;
        self.with_cost(|conn| {
            conn.execute(
                "INSERT INTO cost_data (id, project_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![entry.id, entry.project_id, data],
            )
            .map_err(|e| CoreError::database("upsert cost data", e))?;
            Ok(())
        })
    }

    async fn delete_unit_costs(&self, project_id: &str) -> CoreResult<u64> {
        self.with_cost(|conn| delete_where_project(conn, "cost_data", project_id))
    }

    async fn sum_unit_cost_totals(&self, project_id: &str) -> CoreResult<f64> {
        self.with_cost(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(json_extract(data, '$.total_cost')), 0.0)
                 FROM cost_data WHERE project_id = ?1",
                params![project_id],
                |row| row.get::<_, f64>(0),
            )
            .map_err(|e| CoreError::database("sum cost data totals", e))
        })
    }

    async fn cost_elements_for_project(&self, project_id: &str) -> CoreResult<Vec<CostElement>> {
        self.with_cost(|conn| {
            load_docs(
                conn,
                "cost elements",
                "SELECT data FROM cost_elements WHERE project_id = ?1 ORDER BY rowid",
                params![project_id],
            )
        })
    }

    async fn delete_cost_elements(&self, project_id: &str) -> CoreResult<u64> {
        self.with_cost(|conn| delete_where_project(conn, "cost_elements", project_id))
    }

    async fn insert_cost_elements(
        &self,
        elements: &[CostElement],
    ) -> CoreResult<BulkInsertOutcome> {
        self.with_cost(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CoreError::database("begin cost element insert", e))?;

            let mut outcome = BulkInsertOutcome::default();
            for element in elements {
                let result = encode("cost element", element).and_then(|data| {
                    tx.execute(
                        "INSERT INTO cost_elements (id, project_id, data) VALUES (?1, ?2, ?3)",
                        params![element.id, element.project_id, data],
                    )
                    .map_err(|e| CoreError::database("insert cost element", e))
                });

                match result {
                    Ok(_) => outcome.inserted += 1,
                    Err(e) => {
                        warn!(id = %element.id, error = %e, "Cost element insert failed");
                        outcome.failed += 1;
                    }
                }
            }

            tx.commit()
                .map_err(|e| CoreError::database("commit cost element insert", e))?;
            Ok(outcome)
        })
    }

    async fn upsert_summary(&self, summary: &ProjectCostSummary) -> CoreResult<()> {
        let data = encode("cost summary", summary)?;
        self.with_cost(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cost_summaries (project_id, data) VALUES (?1, ?2)",
                params![summary.project_id, data],
            )
            .map_err(|e| CoreError::database("upsert cost summary", e))?;
            Ok(())
        })
    }

    async fn get_summary(&self, project_id: &str) -> CoreResult<Option<ProjectCostSummary>> {
        self.with_cost(|conn| {
            load_doc(
                conn,
                "cost summary",
                "SELECT data FROM cost_summaries WHERE project_id = ?1",
                params![project_id],
            )
        })
    }

    async fn delete_summary(&self, project_id: &str) -> CoreResult<u64> {
        self.with_cost(|conn| delete_where_project(conn, "cost_summaries", project_id))
    }

    async fn upsert_kennwerte(&self, record: &KennwerteRecord) -> CoreResult<()> {
        let data = encode("kennwerte", record)?;
        self.with_cost(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kennwerte (project_id, data) VALUES (?1, ?2)",
                params![record.project_id, data],
            )
            .map_err(|e| CoreError::database("upsert kennwerte", e))?;
            Ok(())
        })
    }

    async fn get_kennwerte(&self, project_id: &str) -> CoreResult<Option<KennwerteRecord>> {
        self.with_cost(|conn| {
            load_doc(
                conn,
                "kennwerte",
                "SELECT data FROM kennwerte WHERE project_id = ?1",
                params![project_id],
            )
        })
    }

    async fn delete_kennwerte(&self, project_id: &str) -> CoreResult<u64> {
        self.with_cost(|conn| delete_where_project(conn, "kennwerte", project_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CostSource, Provenance};
    use chrono::Utc;
    use tempfile::TempDir;

    fn cost_element(id: &str, total: f64) -> CostElement {
        CostElement {
            id: id.to_string(),
            project_id: "p1".to_string(),
            qto_element_id: None,
            unit_cost_id: None,
            global_id: None,
            ebkp_code: "C1.1".to_string(),
            normalized_code: "C1.1".to_string(),
            name: None,
            ifc_class: None,
            level: None,
            quantity: 1.0,
            unit_cost: total,
            total_cost: total,
            currency: "CHF".to_string(),
            provenance: Provenance::QtoCostData,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_project_lookup_is_case_insensitive() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_project(&Project::new("Tower A", Utc::now()))
            .await
            .unwrap();

        let found = store.find_project_by_name("  tower a").await.unwrap();
        assert_eq!(found.unwrap().id, "prj-tower-a");
        assert!(store.find_project_by_name("Tower").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_project_never_renames_another_project() {
        let store = SqliteStore::in_memory().unwrap();
        let tower = Project::new("Tower A", Utc::now());
        store.upsert_project(&tower).await.unwrap();

        let mut clash = Project::new("Tower-A", Utc::now());
        clash.id = tower.id.clone();
        let err = store.upsert_project(&clash).await.unwrap_err();
        assert!(matches!(err, CoreError::ProjectIdConflict { .. }));

        let found = store.find_project_by_name("Tower A").await.unwrap().unwrap();
        assert_eq!(found.name, "Tower A");

        let mut archived = tower.clone();
        archived.status = "archived".into();
        store.upsert_project(&archived).await.unwrap();
        let found = store.find_project_by_name("tower a").await.unwrap().unwrap();
        assert_eq!(found.status, "archived");
    }

    #[tokio::test]
    async fn test_bulk_insert_isolates_failures() {
        let store = SqliteStore::in_memory().unwrap();
        let elements = vec![
            cost_element("a", 10.0),
            cost_element("a", 20.0),
            cost_element("b", 30.0),
        ];

        let outcome = store.insert_cost_elements(&elements).await.unwrap();
        assert_eq!(outcome, BulkInsertOutcome { inserted: 2, failed: 1 });

        let stored = store.cost_elements_for_project("p1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(store.delete_cost_elements("p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sum_unit_cost_totals() {
        let store = SqliteStore::in_memory().unwrap();
        for (code, total) in [("C1.1", 100.0), ("C2", 250.5)] {
            store
                .upsert_unit_cost(&UnitCostEntry {
                    id: UnitCostEntry::id_for("p1", code),
                    project_id: "p1".into(),
                    code: code.into(),
                    normalized_code: code.into(),
                    unit_price: 10.0,
                    quantity: None,
                    total_cost: total,
                    currency: "CHF".into(),
                    source: CostSource::ExcelImport,
                    description: None,
                    unit: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.sum_unit_cost_totals("p1").await.unwrap(), 350.5);
        assert_eq!(store.sum_unit_cost_totals("other").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_documents() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store
                .upsert_project(&Project::new("Tower A", Utc::now()))
                .await
                .unwrap();
            store
                .upsert_elements(&[BimElement {
                    id: "e1".into(),
                    project_id: "prj-tower-a".into(),
                    ..Default::default()
                }])
                .await
                .unwrap();
        }

        let store = SqliteStore::open(dir.path()).unwrap();
        assert_eq!(store.location(), Some(dir.path()));
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
        assert_eq!(
            store.elements_for_project("prj-tower-a").await.unwrap().len(),
            1
        );
        store.ping().await.unwrap();
    }
}
