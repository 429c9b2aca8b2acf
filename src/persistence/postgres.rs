//! # PostgreSQL Service Store
//!
//! Service records live in `jacs_services`: the indexed columns (state,
//! priority, parent, root) drive lookups, the `data` JSONB column carries the
//! full record. Dependency edges live in `jacs_service_dependencies` and
//! hierarchies are fetched with a recursive query over them.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::hierarchy::{assemble_hierarchy, count_unassigned, flatten_hierarchy, wire_hierarchy};
use super::{PersistenceError, PersistenceResult, ServiceDataPersistence};
use crate::models::{PageRequest, PageResult, ServiceData, ServiceId};
use crate::state_machine::ServiceState;

const SCHEMA: &str = include_str!("../../migrations/20240601000000_create_jacs_services.sql");

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: i64,
    data: Json<ServiceData>,
}

impl ServiceRow {
    fn into_service_data(self) -> ServiceData {
        let mut service_data = self.data.0;
        service_data.id = Some(ServiceId(self.id));
        service_data.dependencies.clear();
        service_data
    }
}

fn state_names(states: &[ServiceState]) -> Vec<String> {
    states.iter().map(|state| state.as_str().to_string()).collect()
}

fn page_limit(page: &PageRequest) -> Option<i64> {
    (page.page_size > 0).then_some(page.page_size as i64)
}

/// PostgreSQL-backed [`ServiceDataPersistence`]
#[derive(Debug, Clone)]
pub struct PgServiceDataPersistence {
    pool: PgPool,
}

impl PgServiceDataPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "🗄️ Connected service store to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the service tables when missing
    pub async fn migrate(&self) -> PersistenceResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Service store schema is up to date");
        Ok(())
    }

    async fn allocate_ids(&self, count: usize) -> PersistenceResult<Vec<ServiceId>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT nextval('jacs_services_id_seq') FROM generate_series(1, $1::BIGINT)",
        )
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| ServiceId(id)).collect())
    }
}

#[async_trait]
impl ServiceDataPersistence for PgServiceDataPersistence {
    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>> {
        let row = sqlx::query_as::<_, ServiceRow>("SELECT id, data FROM jacs_services WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ServiceRow::into_service_data))
    }

    async fn find_service_hierarchy(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            r#"
            WITH RECURSIVE hierarchy(id) AS (
                SELECT $1::BIGINT
                UNION
                SELECT d.dependency_id
                FROM jacs_service_dependencies d
                INNER JOIN hierarchy h ON d.service_id = h.id
            )
            SELECT s.id, s.data
            FROM jacs_services s
            INNER JOIN hierarchy h ON s.id = h.id
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let records: HashMap<ServiceId, ServiceData> = rows
            .into_iter()
            .map(|row| (ServiceId(row.id), row.into_service_data()))
            .collect();
        Ok(assemble_hierarchy(id, &records))
    }

    async fn find_child_services(&self, id: ServiceId) -> PersistenceResult<Vec<ServiceData>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, data FROM jacs_services WHERE parent_service_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ServiceRow::into_service_data).collect())
    }

    async fn find_services_by_state(
        &self,
        states: &[ServiceState],
        page: &PageRequest,
    ) -> PersistenceResult<PageResult<ServiceData>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT id, data
            FROM jacs_services
            WHERE state = ANY($1)
            ORDER BY priority DESC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(state_names(states))
        .bind(page_limit(page))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(PageResult::new(
            page,
            rows.into_iter().map(ServiceRow::into_service_data).collect(),
        ))
    }

    async fn save_hierarchy(&self, service_data: &mut ServiceData) -> PersistenceResult<()> {
        let ids = self.allocate_ids(count_unassigned(service_data)).await?;
        wire_hierarchy(service_data, &mut ids.into_iter());

        let now = Utc::now();
        let records = flatten_hierarchy(service_data);
        let mut tx = self.pool.begin().await?;

        for (position, record) in records.iter().enumerate() {
            let id = record
                .id
                .ok_or_else(|| PersistenceError::MissingId(record.name.clone()))?;
            // the top record is upserted, already persisted dependencies are left alone
            let conflict_clause = if position == 0 {
                r#"ON CONFLICT (id) DO UPDATE SET
                    parent_service_id = EXCLUDED.parent_service_id,
                    root_service_id = EXCLUDED.root_service_id,
                    name = EXCLUDED.name,
                    state = EXCLUDED.state,
                    priority = EXCLUDED.priority,
                    owner = EXCLUDED.owner,
                    modification_date = EXCLUDED.modification_date,
                    data = EXCLUDED.data"#
            } else {
                "ON CONFLICT (id) DO NOTHING"
            };
            let statement = format!(
                r#"
                INSERT INTO jacs_services
                    (id, parent_service_id, root_service_id, name, state, priority, owner,
                     creation_date, modification_date, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                {conflict_clause}
                "#
            );
            sqlx::query(&statement)
                .bind(id.0)
                .bind(record.parent_service_id.map(|p| p.0))
                .bind(record.root_service_id.map(|r| r.0))
                .bind(&record.name)
                .bind(record.state.as_str())
                .bind(record.priority())
                .bind(&record.owner)
                .bind(record.creation_date)
                .bind(now)
                .bind(Json(record))
                .execute(&mut *tx)
                .await?;
        }

        for record in &records {
            let Some(id) = record.id else { continue };
            for dependency_id in &record.dependency_ids {
                sqlx::query(
                    r#"
                    INSERT INTO jacs_service_dependencies (service_id, dependency_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(id.0)
                .bind(dependency_id.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(
            service_id = ?service_data.id,
            records = records.len(),
            "Saved service hierarchy"
        );
        Ok(())
    }

    async fn update(&self, service_data: &ServiceData) -> PersistenceResult<()> {
        let id = service_data
            .id
            .ok_or_else(|| PersistenceError::MissingId(service_data.name.clone()))?;
        let mut record = service_data.clone();
        record.dependencies.clear();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE jacs_services SET
                parent_service_id = $2,
                root_service_id = $3,
                name = $4,
                state = $5,
                priority = $6,
                owner = $7,
                modification_date = $8,
                data = $9
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(record.parent_service_id.map(|p| p.0))
        .bind(record.root_service_id.map(|r| r.0))
        .bind(&record.name)
        .bind(record.state.as_str())
        .bind(record.priority())
        .bind(&record.owner)
        .bind(Utc::now())
        .bind(Json(&record))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(id));
        }

        for dependency_id in &record.dependency_ids {
            sqlx::query(
                r#"
                INSERT INTO jacs_service_dependencies (service_id, dependency_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id.0)
            .bind(dependency_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_takes_id_from_column() {
        let mut stored = ServiceData::new("flirt").with_priority(3);
        stored.id = Some(ServiceId(7));
        stored.dependencies.push(ServiceData::new("stale"));
        let row = ServiceRow {
            id: 12,
            data: Json(stored),
        };
        let sd = row.into_service_data();
        assert_eq!(sd.id, Some(ServiceId(12)));
        assert!(sd.dependencies.is_empty());
        assert_eq!(sd.priority(), 3);
    }

    #[test]
    fn test_state_names_and_limits() {
        assert_eq!(
            state_names(&ServiceState::RUNNABLE),
            vec!["CREATED".to_string(), "QUEUED".to_string()]
        );
        assert_eq!(page_limit(&PageRequest::default()), None);
        assert_eq!(page_limit(&PageRequest::first(25)), Some(25));
    }

    #[test]
    fn test_schema_declares_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS jacs_services"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS jacs_service_dependencies"));
    }
}
