//! Postgres-backed record store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate national id / external tag |
//! | Database (foreign key violation) | `23503` | `NotFound` | Production insert for a vanished animal |
//! | Database (other) | Any other | `Unavailable` | Check constraints, syntax, permissions |
//! | Anything else | N/A | `Unavailable` | Pool closed, network errors |
//!
//! ## Owner Scoping
//!
//! Every list and report query carries the owner predicate in its `WHERE`
//! clause (`owner_id = $1` for animals, `animal_id = ANY($1)` for production).
//! User filters are appended as additional `AND` terms and can only narrow it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use agrotrack_core::{
    Animal, AnimalChanges, AnimalId, ExternalTag, Identity, NationalId, NewAnimal,
    NewProductionRecord, OwnedProduction, ProductionAnimal, ProductionChanges, ProductionId,
    ProductionKind, ProductionRecord, Quantity, ReportPeriod, UserId,
};

use super::{
    AnimalFilter, AnimalScope, AnimalSort, IdentityStore, LivestockStore, OwnerScope, OwnershipStore,
    ProductionFilter, ProductionSort, ReportRow, StoreError, StoreResult,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        national_id TEXT NOT NULL UNIQUE,
        credential_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS animals (
        id UUID PRIMARY KEY,
        owner_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        external_tag TEXT NOT NULL UNIQUE,
        breed TEXT NOT NULL,
        birth_date DATE NOT NULL,
        sex TEXT NOT NULL CHECK (sex IN ('Male', 'Female')),
        weight DOUBLE PRECISION NOT NULL CHECK (weight > 0),
        status TEXT NOT NULL CHECK (status IN ('Active', 'Sold', 'Deceased')),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS animals_owner_idx ON animals(owner_id)",
    r#"
    CREATE TABLE IF NOT EXISTS production_records (
        id UUID PRIMARY KEY,
        animal_id UUID NOT NULL REFERENCES animals(id) ON DELETE CASCADE,
        kind TEXT NOT NULL CHECK (kind IN ('milk', 'meat')),
        quantity DOUBLE PRECISION NOT NULL CHECK (quantity >= 0),
        recorded_date DATE NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS production_animal_date_idx ON production_records(animal_id, recorded_date)",
];

const ANIMAL_COLUMNS: &str =
    "id, owner_id, external_tag, breed, birth_date, sex, weight, status, created_at, updated_at";

const PRODUCTION_COLUMNS: &str = r#"
    p.id, p.animal_id, p.kind, p.quantity, p.recorded_date, p.created_at, p.updated_at,
    a.owner_id, a.external_tag, a.breed, a.sex
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("initialize", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_identity_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        let row = sqlx::query(
            "SELECT id, name, national_id, credential_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_identity_by_id", e))?;
        row.map(|r| identity_from_row(&r)).transpose()
    }

    #[instrument(skip(self, national_id), err)]
    async fn find_identity_by_national_id(&self, national_id: &NationalId) -> StoreResult<Option<Identity>> {
        let row = sqlx::query(
            "SELECT id, name, national_id, credential_hash, created_at FROM users WHERE national_id = $1",
        )
        .bind(national_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_identity_by_national_id", e))?;
        row.map(|r| identity_from_row(&r)).transpose()
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id), err)]
    async fn insert_identity(&self, identity: Identity) -> StoreResult<Identity> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, national_id, credential_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.name)
        .bind(identity.national_id.as_str())
        .bind(&identity.credential_hash)
        .bind(identity.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_identity", e))?;
        Ok(identity)
    }
}

#[async_trait::async_trait]
impl OwnershipStore for PostgresStore {
    #[instrument(skip(self), fields(animal_id = %id), err)]
    async fn find_animal_by_id(&self, id: AnimalId) -> StoreResult<Option<Animal>> {
        let row = sqlx::query(&format!("SELECT {ANIMAL_COLUMNS} FROM animals WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_animal_by_id", e))?;
        row.map(|r| animal_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(production_id = %id), err)]
    async fn find_production_by_id(&self, id: ProductionId) -> StoreResult<Option<OwnedProduction>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PRODUCTION_COLUMNS}
            FROM production_records p
            INNER JOIN animals a ON a.id = p.animal_id
            WHERE p.id = $1
            "#
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_production_by_id", e))?;
        row.map(|r| production_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(owner_id = %owner), err)]
    async fn owned_animal_ids(&self, owner: UserId) -> StoreResult<Vec<AnimalId>> {
        let rows = sqlx::query("SELECT id FROM animals WHERE owner_id = $1 ORDER BY id")
            .bind(owner.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("owned_animal_ids", e))?;
        rows.iter()
            .map(|r| column::<Uuid>(r, "id").map(AnimalId::from_uuid))
            .collect()
    }
}

#[async_trait::async_trait]
impl LivestockStore for PostgresStore {
    #[instrument(skip(self, filter), fields(owner_id = %scope.owner()), err)]
    async fn list_animals(
        &self,
        scope: &OwnerScope,
        filter: &AnimalFilter,
        sort: AnimalSort,
    ) -> StoreResult<Vec<Animal>> {
        let sql = format!(
            r#"
            SELECT {ANIMAL_COLUMNS}
            FROM animals
            WHERE owner_id = $1
              AND ($2::text IS NULL OR breed = $2)
              AND ($3::text IS NULL OR sex = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY {}, id
            "#,
            sort.order_by()
        );
        let rows = sqlx::query(&sql)
            .bind(scope.owner().as_uuid())
            .bind(filter.breed.as_deref())
            .bind(filter.sex.map(|s| s.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_animals", e))?;
        rows.iter().map(animal_from_row).collect()
    }

    #[instrument(skip(self, new, now), fields(owner_id = %new.owner_id), err)]
    async fn insert_animal(&self, new: NewAnimal, now: DateTime<Utc>) -> StoreResult<Animal> {
        let animal = Animal::create(new, now);
        sqlx::query(&format!(
            r#"
            INSERT INTO animals ({ANIMAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#
        ))
        .bind(animal.id.as_uuid())
        .bind(animal.owner_id.as_uuid())
        .bind(animal.external_tag.as_str())
        .bind(&animal.breed)
        .bind(animal.birth_date)
        .bind(animal.sex.as_str())
        .bind(animal.weight)
        .bind(animal.status.as_str())
        .bind(animal.created_at)
        .bind(animal.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_animal", e))?;
        Ok(animal)
    }

    #[instrument(skip(self, changes, now), fields(animal_id = %id), err)]
    async fn update_animal(
        &self,
        id: AnimalId,
        changes: AnimalChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Animal> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE animals SET
                external_tag = COALESCE($2, external_tag),
                breed = COALESCE($3, breed),
                birth_date = COALESCE($4, birth_date),
                sex = COALESCE($5, sex),
                weight = COALESCE($6, weight),
                status = COALESCE($7, status),
                updated_at = $8
            WHERE id = $1
            RETURNING {ANIMAL_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(changes.external_tag.as_ref().map(ExternalTag::as_str))
        .bind(changes.breed.as_deref())
        .bind(changes.birth_date)
        .bind(changes.sex.map(|s| s.as_str()))
        .bind(changes.weight)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_animal", e))?
        .ok_or(StoreError::NotFound)?;
        animal_from_row(&row)
    }

    #[instrument(skip(self), fields(animal_id = %id), err)]
    async fn delete_animal(&self, id: AnimalId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM animals WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_animal", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, scope, filter), fields(owner_id = %scope.owner(), animals = scope.animal_ids().len()), err)]
    async fn list_production(
        &self,
        scope: &AnimalScope,
        filter: &ProductionFilter,
        sort: ProductionSort,
    ) -> StoreResult<Vec<OwnedProduction>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {PRODUCTION_COLUMNS}
            FROM production_records p
            INNER JOIN animals a ON a.id = p.animal_id
            WHERE p.animal_id = ANY($1)
              AND ($2::uuid IS NULL OR p.animal_id = $2)
              AND ($3::text IS NULL OR p.kind = $3)
              AND ($4::date IS NULL OR p.recorded_date >= $4)
              AND ($5::date IS NULL OR p.recorded_date <= $5)
            ORDER BY {}, p.id
            "#,
            sort.order_by()
        );
        let rows = sqlx::query(&sql)
            .bind(scope_uuids(scope))
            .bind(filter.animal_id.map(|id| *id.as_uuid()))
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_production", e))?;
        rows.iter().map(production_from_row).collect()
    }

    #[instrument(skip(self, new, now), fields(animal_id = %new.animal_id), err)]
    async fn insert_production(
        &self,
        new: NewProductionRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction> {
        let record = ProductionRecord::create(new, now);
        let row = sqlx::query(&format!(
            r#"
            WITH p AS (
                INSERT INTO production_records (id, animal_id, kind, quantity, recorded_date, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            )
            SELECT {PRODUCTION_COLUMNS}
            FROM p
            INNER JOIN animals a ON a.id = p.animal_id
            "#
        ))
        .bind(record.id.as_uuid())
        .bind(record.animal_id.as_uuid())
        .bind(record.kind.as_str())
        .bind(record.quantity.value())
        .bind(record.recorded_date)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_production", e))?
        .ok_or(StoreError::NotFound)?;
        production_from_row(&row)
    }

    #[instrument(skip(self, changes, now), fields(production_id = %id), err)]
    async fn update_production(
        &self,
        id: ProductionId,
        changes: ProductionChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction> {
        let row = sqlx::query(&format!(
            r#"
            WITH p AS (
                UPDATE production_records SET
                    kind = COALESCE($2, kind),
                    quantity = COALESCE($3, quantity),
                    recorded_date = COALESCE($4, recorded_date),
                    updated_at = $5
                WHERE id = $1
                RETURNING *
            )
            SELECT {PRODUCTION_COLUMNS}
            FROM p
            INNER JOIN animals a ON a.id = p.animal_id
            "#
        ))
        .bind(id.as_uuid())
        .bind(changes.kind.map(|k| k.as_str()))
        .bind(changes.quantity.map(|q| q.value()))
        .bind(changes.recorded_date)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_production", e))?
        .ok_or(StoreError::NotFound)?;
        production_from_row(&row)
    }

    #[instrument(skip(self), fields(production_id = %id), err)]
    async fn delete_production(&self, id: ProductionId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM production_records WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_production", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, scope), fields(owner_id = %scope.owner(), kind = kind.as_str(), period = period.as_str()), err)]
    async fn production_report(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        period: ReportPeriod,
    ) -> StoreResult<Vec<ReportRow>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT
                {} AS period,
                SUM(quantity)::float8 AS total_production,
                COUNT(DISTINCT animal_id) AS animal_count,
                AVG(quantity)::float8 AS average_production
            FROM production_records
            WHERE animal_id = ANY($1) AND kind = $2
            GROUP BY 1
            ORDER BY 1 DESC
            "#,
            period_expr(period)
        );
        let rows = sqlx::query(&sql)
            .bind(scope_uuids(scope))
            .bind(kind.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("production_report", e))?;
        rows.iter()
            .map(|r| {
                Ok(ReportRow {
                    period: column(r, "period")?,
                    total_production: column(r, "total_production")?,
                    animal_count: column(r, "animal_count")?,
                    average_production: column(r, "average_production")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, scope), fields(owner_id = %scope.owner()), err)]
    async fn has_production_between(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<bool> {
        if scope.is_empty() {
            return Ok(false);
        }
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM production_records
                WHERE animal_id = ANY($1) AND kind = $2
                  AND recorded_date BETWEEN $3 AND $4
            ) AS found
            "#,
        )
        .bind(scope_uuids(scope))
        .bind(kind.as_str())
        .bind(from)
        .bind(to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_production_between", e))?;
        column(&row, "found")
    }
}

/// Bucket expression per period. Labels match [`ReportPeriod::bucket`].
fn period_expr(period: ReportPeriod) -> &'static str {
    match period {
        ReportPeriod::Daily => "to_char(recorded_date, 'YYYY-MM-DD')",
        ReportPeriod::Weekly => r#"to_char(recorded_date, 'IYYY-"W"IW')"#,
        ReportPeriod::Monthly => "to_char(recorded_date, 'YYYY-MM')",
    }
}

fn scope_uuids(scope: &AnimalScope) -> Vec<Uuid> {
    scope.animal_ids().iter().map(|id| *id.as_uuid()).collect()
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Unavailable(format!("failed to read column {name}: {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> StoreResult<T>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e| StoreError::Unavailable(format!("unexpected value in column {name}: {e}")))
}

fn identity_from_row(row: &PgRow) -> StoreResult<Identity> {
    let national_id: String = column(row, "national_id")?;
    Ok(Identity {
        id: UserId::from_uuid(column(row, "id")?),
        name: column(row, "name")?,
        national_id: NationalId::parse(&national_id)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        credential_hash: column(row, "credential_hash")?,
        created_at: column(row, "created_at")?,
    })
}

fn animal_from_row(row: &PgRow) -> StoreResult<Animal> {
    let tag: String = column(row, "external_tag")?;
    Ok(Animal {
        id: AnimalId::from_uuid(column(row, "id")?),
        owner_id: UserId::from_uuid(column(row, "owner_id")?),
        external_tag: ExternalTag::parse(&tag).map_err(|e| StoreError::Unavailable(e.to_string()))?,
        breed: column(row, "breed")?,
        birth_date: column(row, "birth_date")?,
        sex: parsed(row, "sex")?,
        weight: column(row, "weight")?,
        status: parsed(row, "status")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn production_from_row(row: &PgRow) -> StoreResult<OwnedProduction> {
    let animal_id = AnimalId::from_uuid(column(row, "animal_id")?);
    let tag: String = column(row, "external_tag")?;
    let quantity: f64 = column(row, "quantity")?;
    Ok(OwnedProduction {
        record: ProductionRecord {
            id: ProductionId::from_uuid(column(row, "id")?),
            animal_id,
            kind: parsed(row, "kind")?,
            quantity: Quantity::new(quantity).map_err(|e| StoreError::Unavailable(e.to_string()))?,
            recorded_date: column(row, "recorded_date")?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        },
        animal: ProductionAnimal {
            id: animal_id,
            owner_id: UserId::from_uuid(column(row, "owner_id")?),
            external_tag: ExternalTag::parse(&tag).map_err(|e| StoreError::Unavailable(e.to_string()))?,
            breed: column(row, "breed")?,
            sex: parsed(row, "sex")?,
        },
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => {
                    let what = match db_err.constraint() {
                        Some(c) if c.contains("national_id") => "national id already registered",
                        Some(c) if c.contains("external_tag") => "an animal with this external tag already exists",
                        _ => "duplicate value",
                    };
                    StoreError::Conflict(what.to_string())
                }
                Some("23503") => StoreError::NotFound,
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {}", operation)),
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
