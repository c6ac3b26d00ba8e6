//! Database schema definitions using SurrealQL.

use crate::{Database, StoreError};

/// Initialize the database schema.
///
/// Idempotent: every definition uses `IF NOT EXISTS`.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema. Timestamps are epoch milliseconds so eligibility and
/// retention checks are plain integer comparisons.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS job_type ON job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string DEFAULT "pending";
DEFINE FIELD IF NOT EXISTS priority ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS max_attempts ON job TYPE int DEFAULT 3;
DEFINE FIELD IF NOT EXISTS error_message ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS scheduled_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS started_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS completed_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE int;

DEFINE INDEX IF NOT EXISTS job_id_unique ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_type ON job FIELDS job_type;

-- Claim polling: pending jobs by due time
DEFINE INDEX IF NOT EXISTS job_claim ON job FIELDS status, scheduled_at;
-- Cleanup sweeps: terminal jobs by age
DEFINE INDEX IF NOT EXISTS job_cleanup ON job FIELDS status, updated_at;
"#;
