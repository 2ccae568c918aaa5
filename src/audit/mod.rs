//! Append-only application log
//!
//! Every completed application is recorded once, after its report has been
//! produced. Records carry a SHA-256 over the loan data so a stored entry
//! can be checked against the application it claims to describe.

use crate::error::PipelineError;
use crate::models::{ApplicationRecord, DecisionOutcome, LoanApplication, LoanDecision};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

impl ApplicationRecord {
    pub fn new(user_id: Uuid, loan_data: LoanApplication, decision: &LoanDecision) -> Result<Self> {
        let record_hash = compute_record_hash(&loan_data)?;
        Ok(Self {
            record_id: Uuid::new_v4(),
            user_id,
            loan_data,
            decision: decision.decision,
            reason: decision.reason.clone(),
            recorded_at: Utc::now(),
            record_hash,
        })
    }

    /// True when the stored hash still matches the loan data.
    pub fn verify_integrity(&self) -> bool {
        compute_record_hash(&self.loan_data)
            .map(|hash| hash == self.record_hash)
            .unwrap_or(false)
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn append(&self, record: ApplicationRecord) -> Result<Uuid>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<ApplicationRecord>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApplicationRecord>> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .collect())
    }
}

//
// ================= In-memory backend =================
//

pub struct InMemoryApplicationStore {
    records: Arc<RwLock<Vec<ApplicationRecord>>>,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryApplicationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn append(&self, record: ApplicationRecord) -> Result<Uuid> {
        let record_id = record.record_id;
        let mut records = self.records.write().await;
        records.push(record);
        Ok(record_id)
    }

    async fn list(&self) -> Result<Vec<ApplicationRecord>> {
        let records = self.records.read().await;
        Ok(records.clone())
    }
}

//
// ================= Postgres backend =================
//

pub struct PostgresApplicationStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresApplicationStore {
    /// Lazily connecting pool; nothing touches the database until the first
    /// append or list.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS loan_applications (
                      record_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      loan_data TEXT NOT NULL,
                      decision TEXT NOT NULL,
                      reason TEXT NOT NULL,
                      record_hash TEXT NOT NULL,
                      recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                PipelineError::Database(format!("Failed to initialize application log schema: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for PostgresApplicationStore {
    async fn append(&self, record: ApplicationRecord) -> Result<Uuid> {
        self.ensure_schema().await?;

        let loan_data = serde_json::to_string(&record.loan_data)?;
        sqlx::query(
            r#"
            INSERT INTO loan_applications
              (record_id, user_id, loan_data, decision, reason, record_hash, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.record_id)
        .bind(record.user_id)
        .bind(loan_data)
        .bind(record.decision.as_str())
        .bind(&record.reason)
        .bind(&record.record_hash)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(format!("Failed to append application: {}", e)))?;

        info!(record_id = %record.record_id, "Application record stored in postgres");
        Ok(record.record_id)
    }

    async fn list(&self) -> Result<Vec<ApplicationRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT record_id, user_id, loan_data, decision, reason, record_hash, recorded_at
            FROM loan_applications
            ORDER BY recorded_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(format!("Failed to load applications: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let loan_data: String = row.try_get("loan_data")?;
            let decision: String = row.try_get("decision")?;
            let Some(decision) = DecisionOutcome::parse(&decision) else {
                warn!(decision = %decision, "Skipping record with unknown decision");
                continue;
            };
            let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;

            records.push(ApplicationRecord {
                record_id: row.try_get("record_id")?,
                user_id: row.try_get("user_id")?,
                loan_data: serde_json::from_str(&loan_data)?,
                decision,
                reason: row.try_get("reason")?,
                recorded_at,
                record_hash: row.try_get("record_hash")?,
            });
        }
        Ok(records)
    }
}

/// Postgres when a database URL is configured, otherwise in-memory.
pub fn build_store(database_url: Option<&str>) -> Arc<dyn ApplicationStore> {
    if let Some(url) = database_url {
        match PostgresApplicationStore::connect_lazy(url) {
            Ok(store) => {
                info!("Application log backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres application log, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Application log backend: in-memory");
    Arc::new(InMemoryApplicationStore::new())
}

/// SHA-256 of the loan data, streamed straight from the serializer.
pub fn compute_record_hash(loan_data: &LoanApplication) -> Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut HashWriter(&mut hasher), loan_data)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
