use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;
use watchdog_core::{error::Result, DatabasePool};

/// The single tenant organization. The system is single-tenant by design;
/// exactly one row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub legal_name: Option<String>,
    pub tax_id: Option<String>,
    pub employee_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OrganizationRepository {
    db: DatabasePool,
}

impl OrganizationRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn get(&self) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, legal_name, tax_id, employee_count, created_at, updated_at
             FROM organizations LIMIT 1",
        )
        .fetch_optional(self.db.get())
        .await?;

        Ok(match row {
            Some(row) => Some(Organization {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                legal_name: row.try_get("legal_name")?,
                tax_id: row.try_get("tax_id")?,
                employee_count: row.try_get("employee_count")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            }),
            None => None,
        })
    }

    pub async fn upsert(&self, org: &Organization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, legal_name, tax_id, employee_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                legal_name = EXCLUDED.legal_name,
                tax_id = EXCLUDED.tax_id,
                employee_count = EXCLUDED.employee_count,
                updated_at = NOW()
            "#,
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.legal_name)
        .bind(&org.tax_id)
        .bind(org.employee_count)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }
}
