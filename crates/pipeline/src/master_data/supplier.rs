use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{error::Result, types::CostType, DatabasePool};

/// A vendor invoicing the organization.
///
/// `cost_types` lists what the supplier bills for; ingestion uses it to
/// sanity-check extracted cost types and the PDF connector seeds its
/// detector profiles from supplier rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub short_name: Option<String>,
    pub tax_id: Option<String>,
    pub category: Option<String>,
    pub cost_types: Vec<CostType>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SupplierRepository {
    db: DatabasePool,
}

fn map_supplier(row: &PgRow) -> Result<Supplier> {
    let cost_type_strs: Vec<String> = row.try_get("cost_types")?;
    let cost_types = cost_type_strs
        .iter()
        .filter_map(|s| CostType::from_str(s).ok())
        .collect();

    Ok(Supplier {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        short_name: row.try_get("short_name")?,
        tax_id: row.try_get("tax_id")?,
        category: row.try_get("category")?,
        cost_types,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SUPPLIER_COLUMNS: &str =
    "id, name, short_name, tax_id, category, cost_types, is_active, created_at, updated_at";

impl SupplierRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Supplier>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM suppliers WHERE id = $1",
            SUPPLIER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_supplier).transpose()
    }

    /// Match by exact name or short name, case-insensitively. Used to
    /// resolve connector supplier hints.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Supplier>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM suppliers
             WHERE lower(name) = lower($1) OR lower(short_name) = lower($1)",
            SUPPLIER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_supplier).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<Supplier>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM suppliers WHERE is_active ORDER BY name",
            SUPPLIER_COLUMNS
        ))
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(map_supplier).collect()
    }

    pub async fn insert(&self, supplier: &Supplier) -> Result<()> {
        let cost_types: Vec<String> = supplier
            .cost_types
            .iter()
            .map(|ct| ct.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO suppliers (id, name, short_name, tax_id, category, cost_types,
                                   is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.short_name)
        .bind(&supplier.tax_id)
        .bind(&supplier.category)
        .bind(&cost_types)
        .bind(supplier.is_active)
        .bind(supplier.created_at)
        .bind(supplier.updated_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }
}
