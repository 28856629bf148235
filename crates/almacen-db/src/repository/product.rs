//! # Product Repository
//!
//! Database operations for products and their stock pools.
//!
//! ## Key Operations
//! - Lookup by normalized `external_key`
//! - Insert (for the inventory collaborator and seeding)
//! - CAS-guarded delta update of the stock pools
//!
//! ## Delta + Version Guard
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE products SET                                                    │
//! │      stock            = stock + Δstock,                                 │
//! │      stock_transito   = MAX(0, stock_transito + Δtransito),             │
//! │      stock_proyectado = <both of the above> - stock_reservado,          │
//! │      sync_version     = sync_version + 1                                │
//! │  WHERE id = ? AND sync_version = <version the plan was built from>      │
//! │                                                                         │
//! │  0 rows → someone else wrote first → caller re-reads and re-plans       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use almacen_core::{Product, ProductDelta};

use crate::error::{DbError, DbResult};

const PRODUCT_COLUMNS: &str = r#"
    id, external_key, nombre, condicion,
    stock, stock_transito, stock_reservado, stock_proyectado,
    costo_prom, created_at, updated_at, sync_version
"#;

/// Row shape of `products`; money columns arrive as TEXT.
#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    external_key: String,
    nombre: String,
    condicion: String,
    stock: i64,
    stock_transito: i64,
    stock_reservado: i64,
    stock_proyectado: i64,
    costo_prom: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl ProductRow {
    fn into_product(self) -> DbResult<Product> {
        Ok(Product {
            costo_prom: parse_decimal("costo_prom", &self.costo_prom)?,
            id: self.id,
            external_key: self.external_key,
            nombre: self.nombre,
            condicion: self.condicion,
            stock: self.stock,
            stock_transito: self.stock_transito,
            stock_reservado: self.stock_reservado,
            stock_proyectado: self.stock_proyectado,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_version: self.sync_version,
        })
    }
}

/// Parses a TEXT money column.
pub(crate) fn parse_decimal(column: &str, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DbError::InvalidData(format!("{} = '{}': {}", column, raw, e)))
}

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = ProductRepository::new(pool);
///
/// let product = repo.get_by_key("LENTE 50MM NUEVO").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its normalized external key.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_key(&self, external_key: &str) -> DbResult<Option<Product>> {
        debug!(external_key = %external_key, "Loading product by key");

        let sql = format!("SELECT {} FROM products WHERE external_key = ?1", PRODUCT_COLUMNS);
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(external_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ProductRow::into_product).transpose()
    }

    /// Gets a product by its internal ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ProductRow::into_product).transpose()
    }

    /// Inserts a new product.
    ///
    /// `stock_proyectado` is written as recomputed from the pools, whatever
    /// the struct holds.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - external_key already exists
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        debug!(external_key = %product.external_key, "Inserting product");

        let mut stored = product.clone();
        stored.recompute_projection();

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                id, external_key, nombre, condicion,
                stock, stock_transito, stock_reservado, stock_proyectado,
                costo_prom, created_at, updated_at, sync_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.external_key)
        .bind(&stored.nombre)
        .bind(&stored.condicion)
        .bind(stored.stock)
        .bind(stored.stock_transito)
        .bind(stored.stock_reservado)
        .bind(stored.stock_proyectado)
        .bind(stored.costo_prom.to_string())
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .bind(stored.sync_version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(stored),
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { field, .. } => {
                    Err(DbError::duplicate(field, &stored.external_key))
                }
                other => Err(other),
            },
        }
    }

    /// Applies a stock delta if the row is still at `expected_version`.
    ///
    /// Runs on the caller's transaction connection.
    ///
    /// ## Returns
    /// * `Ok(true)` - Row updated, version bumped
    /// * `Ok(false)` - Version moved (or row gone); nothing written
    pub async fn apply_delta(
        conn: &mut SqliteConnection,
        id: &str,
        expected_version: i64,
        delta: &ProductDelta,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(
            product_id = %id,
            expected_version,
            stock = delta.stock,
            stock_transito = delta.stock_transito,
            costo_prom = ?delta.costo_prom,
            "Applying product delta"
        );

        let result = sqlx::query(
            r#"
            UPDATE products
            SET
                stock = stock + ?1,
                stock_transito = MAX(0, stock_transito + ?2),
                stock_proyectado = (stock + ?1) + MAX(0, stock_transito + ?2) - stock_reservado,
                costo_prom = COALESCE(?3, costo_prom),
                updated_at = ?4,
                sync_version = sync_version + 1
            WHERE id = ?5 AND sync_version = ?6
            "#,
        )
        .bind(delta.stock)
        .bind(delta.stock_transito)
        .bind(delta.costo_prom.map(|c| c.to_string()))
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Counts products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn sample(key: &str, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: generate_product_id(),
            external_key: key.to_string(),
            nombre: "Objetivo".to_string(),
            condicion: "usado".to_string(),
            stock,
            stock_transito: 0,
            stock_reservado: 2,
            stock_proyectado: 999,
            costo_prom: Decimal::new(1250, 2),
            created_at: now,
            updated_at: now,
            sync_version: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_recomputes_projection() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        repo.insert(&sample("OBJETIVO USADO", 10)).await.unwrap();

        let loaded = repo.get_by_key("OBJETIVO USADO").await.unwrap().unwrap();
        assert_eq!(loaded.stock_proyectado, 8);
        assert_eq!(loaded.costo_prom, Decimal::new(1250, 2));
        assert!(repo.get_by_key("NADA").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();

        repo.insert(&sample("OBJETIVO USADO", 1)).await.unwrap();
        let err = repo.insert(&sample("OBJETIVO USADO", 1)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_apply_delta_is_version_guarded() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        let product = repo.insert(&sample("OBJETIVO USADO", 1)).await.unwrap();

        let delta = ProductDelta {
            stock: 3,
            stock_transito: -4,
            costo_prom: Some(Decimal::new(15, 0)),
        };

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(ProductRepository::apply_delta(&mut conn, &product.id, 0, &delta, Utc::now())
            .await
            .unwrap());
        // Same version again: stale
        assert!(!ProductRepository::apply_delta(&mut conn, &product.id, 0, &delta, Utc::now())
            .await
            .unwrap());
        drop(conn);

        let loaded = repo.get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(loaded.stock, 4);
        assert_eq!(loaded.stock_transito, 0);
        assert_eq!(loaded.stock_proyectado, 2);
        assert_eq!(loaded.costo_prom, Decimal::from(15));
        assert_eq!(loaded.sync_version, 1);
        assert!(loaded.projection_is_consistent());
    }
}
