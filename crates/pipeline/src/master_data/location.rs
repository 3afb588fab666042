use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{error::Result, DatabasePool, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Office,
    Production,
    Warehouse,
    DataCenter,
    Other,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Office => "office",
            LocationType::Production => "production",
            LocationType::Warehouse => "warehouse",
            LocationType::DataCenter => "data_center",
            LocationType::Other => "other",
        }
    }
}

impl FromStr for LocationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "office" => Ok(LocationType::Office),
            "production" => Ok(LocationType::Production),
            "warehouse" => Ok(LocationType::Warehouse),
            "data_center" => Ok(LocationType::DataCenter),
            "other" => Ok(LocationType::Other),
            other => Err(format!("unknown location type: {}", other)),
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Owned,
    Leased,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ownership::Owned => "owned",
            Ownership::Leased => "leased",
        }
    }
}

impl FromStr for Ownership {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owned" => Ok(Ownership::Owned),
            "leased" => Ok(Ownership::Leased),
            other => Err(format!("unknown ownership: {}", other)),
        }
    }
}

/// A physical site whose utility and facility spend is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub org_id: Uuid,
    pub code: String,
    pub location_type: LocationType,
    pub ownership: Ownership,
    pub gross_floor_area: Option<Decimal>,
    pub address: Option<String>,
    pub active_since: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocationRepository {
    db: DatabasePool,
}

fn map_location(row: &PgRow) -> Result<Location> {
    let type_str: String = row.try_get("location_type")?;
    let ownership_str: String = row.try_get("ownership")?;

    Ok(Location {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        code: row.try_get("code")?,
        location_type: LocationType::from_str(&type_str)
            .map_err(|e| Error::internal(format!("Corrupt location type: {}", e)))?,
        ownership: Ownership::from_str(&ownership_str)
            .map_err(|e| Error::internal(format!("Corrupt ownership: {}", e)))?,
        gross_floor_area: row.try_get("gross_floor_area")?,
        address: row.try_get("address")?,
        active_since: row.try_get("active_since")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const LOCATION_COLUMNS: &str = "id, org_id, code, location_type, ownership, gross_floor_area, \
     address, active_since, is_active, created_at, updated_at";

impl LocationRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Location>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM locations WHERE id = $1",
            LOCATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_location).transpose()
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Location>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM locations WHERE code = $1",
            LOCATION_COLUMNS
        ))
        .bind(code)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_location).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<Location>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM locations WHERE is_active ORDER BY code",
            LOCATION_COLUMNS
        ))
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(map_location).collect()
    }

    pub async fn insert(&self, location: &Location) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, org_id, code, location_type, ownership,
                                   gross_floor_area, address, active_since, is_active,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(location.id)
        .bind(location.org_id)
        .bind(&location.code)
        .bind(location.location_type.as_str())
        .bind(location.ownership.as_str())
        .bind(location.gross_floor_area)
        .bind(&location.address)
        .bind(location.active_since)
        .bind(location.is_active)
        .bind(location.created_at)
        .bind(location.updated_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }
}
