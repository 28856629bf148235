//! # Purchase Order Repository
//!
//! Reads go through the pool; writes take the caller's transaction
//! connection so they commit together with the product delta.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use almacen_core::{PurchaseOrder, TransitState};

use crate::error::{DbError, DbResult};
use crate::repository::product::parse_decimal;

const ORDER_COLUMNS: &str = r#"
    id, external_key, estado_transito, cantidad, cant_recibido_total,
    total_costo, costo_unitario, costo_envio_total,
    n_rastreo, proveedor, notas, foto_url,
    fecha_compra, fecha_recibido, created_at, updated_at, sync_version
"#;

#[derive(Debug, sqlx::FromRow)]
struct PurchaseOrderRow {
    id: String,
    external_key: String,
    estado_transito: TransitState,
    cantidad: i64,
    cant_recibido_total: i64,
    total_costo: String,
    costo_unitario: String,
    costo_envio_total: String,
    n_rastreo: Option<String>,
    proveedor: Option<String>,
    notas: Option<String>,
    foto_url: Option<String>,
    fecha_compra: NaiveDate,
    fecha_recibido: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl PurchaseOrderRow {
    fn into_order(self) -> DbResult<PurchaseOrder> {
        Ok(PurchaseOrder {
            total_costo: parse_decimal("total_costo", &self.total_costo)?,
            costo_unitario: parse_decimal("costo_unitario", &self.costo_unitario)?,
            costo_envio_total: parse_decimal("costo_envio_total", &self.costo_envio_total)?,
            id: self.id,
            external_key: self.external_key,
            estado_transito: self.estado_transito,
            cantidad: self.cantidad,
            cant_recibido_total: self.cant_recibido_total,
            n_rastreo: self.n_rastreo,
            proveedor: self.proveedor,
            notas: self.notas,
            foto_url: self.foto_url,
            fecha_compra: self.fecha_compra,
            fecha_recibido: self.fecha_recibido,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_version: self.sync_version,
        })
    }
}

/// Maps a UNIQUE failure on `n_rastreo` to a duplicate carrying the value.
fn map_write_error(err: sqlx::Error, order: &PurchaseOrder) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.contains("n_rastreo") => {
            DbError::duplicate("n_rastreo", order.n_rastreo.clone().unwrap_or_default())
        }
        other => other,
    }
}

/// Repository for purchase order database operations.
#[derive(Debug, Clone)]
pub struct PurchaseOrderRepository {
    pool: SqlitePool,
}

impl PurchaseOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseOrderRepository { pool }
    }

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PurchaseOrder>> {
        debug!(order_id = %id, "Loading purchase order");

        let sql = format!("SELECT {} FROM purchase_orders WHERE id = ?1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, PurchaseOrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PurchaseOrderRow::into_order).transpose()
    }

    /// Lists all orders for a product, oldest purchase first.
    pub async fn list_for_product(&self, external_key: &str) -> DbResult<Vec<PurchaseOrder>> {
        let sql = format!(
            "SELECT {} FROM purchase_orders WHERE external_key = ?1 \
             ORDER BY fecha_compra, created_at",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, PurchaseOrderRow>(&sql)
            .bind(external_key)
            .fetch_all(&self.pool)
            .await?;

        debug!(external_key = %external_key, count = rows.len(), "Listed purchase orders");
        rows.into_iter().map(PurchaseOrderRow::into_order).collect()
    }

    /// Whether another order already uses `n_rastreo`.
    pub async fn tracking_in_use(
        conn: &mut SqliteConnection,
        n_rastreo: &str,
        exclude_id: &str,
    ) -> DbResult<bool> {
        let taken: Option<String> = sqlx::query_scalar(
            "SELECT id FROM purchase_orders WHERE n_rastreo = ?1 AND id <> ?2 LIMIT 1",
        )
        .bind(n_rastreo)
        .bind(exclude_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(taken.is_some())
    }

    /// Inserts a new order.
    pub async fn insert(conn: &mut SqliteConnection, order: &PurchaseOrder) -> DbResult<()> {
        debug!(
            order_id = %order.id,
            external_key = %order.external_key,
            cantidad = order.cantidad,
            "Inserting purchase order"
        );

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, external_key, estado_transito, cantidad, cant_recibido_total,
                total_costo, costo_unitario, costo_envio_total,
                n_rastreo, proveedor, notas, foto_url,
                fecha_compra, fecha_recibido, created_at, updated_at, sync_version
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8,
                ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.external_key)
        .bind(order.estado_transito)
        .bind(order.cantidad)
        .bind(order.cant_recibido_total)
        .bind(order.total_costo.to_string())
        .bind(order.costo_unitario.to_string())
        .bind(order.costo_envio_total.to_string())
        .bind(&order.n_rastreo)
        .bind(&order.proveedor)
        .bind(&order.notas)
        .bind(&order.foto_url)
        .bind(order.fecha_compra)
        .bind(order.fecha_recibido)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.sync_version)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_write_error(e, order))?;

        Ok(())
    }

    /// Rewrites an order if it is still at `order.sync_version`.
    ///
    /// ## Returns
    /// * `Ok(false)` - Version moved or row deleted; nothing written
    pub async fn update_cas(conn: &mut SqliteConnection, order: &PurchaseOrder) -> DbResult<bool> {
        debug!(
            order_id = %order.id,
            expected_version = order.sync_version,
            estado = %order.estado_transito,
            recibido = order.cant_recibido_total,
            "Updating purchase order"
        );

        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET
                estado_transito = ?1,
                cantidad = ?2,
                cant_recibido_total = ?3,
                total_costo = ?4,
                costo_unitario = ?5,
                costo_envio_total = ?6,
                n_rastreo = ?7,
                proveedor = ?8,
                notas = ?9,
                foto_url = ?10,
                fecha_compra = ?11,
                fecha_recibido = ?12,
                updated_at = ?13,
                sync_version = sync_version + 1
            WHERE id = ?14 AND sync_version = ?15
            "#,
        )
        .bind(order.estado_transito)
        .bind(order.cantidad)
        .bind(order.cant_recibido_total)
        .bind(order.total_costo.to_string())
        .bind(order.costo_unitario.to_string())
        .bind(order.costo_envio_total.to_string())
        .bind(&order.n_rastreo)
        .bind(&order.proveedor)
        .bind(&order.notas)
        .bind(&order.foto_url)
        .bind(order.fecha_compra)
        .bind(order.fecha_recibido)
        .bind(order.updated_at)
        .bind(&order.id)
        .bind(order.sync_version)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_write_error(e, order))?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes an order if it is still at `expected_version`.
    pub async fn delete_cas(
        conn: &mut SqliteConnection,
        id: &str,
        expected_version: i64,
    ) -> DbResult<bool> {
        debug!(order_id = %id, expected_version, "Deleting purchase order");

        let result = sqlx::query("DELETE FROM purchase_orders WHERE id = ?1 AND sync_version = ?2")
            .bind(id)
            .bind(expected_version)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Counts orders (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM purchase_orders")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Helper to generate a new order ID.
pub fn generate_order_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::generate_product_id;
    use almacen_core::Product;
    use rust_decimal::Decimal;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.products()
            .insert(&Product {
                id: generate_product_id(),
                external_key: "FILTRO ND NUEVO".to_string(),
                nombre: "Filtro ND".to_string(),
                condicion: "nuevo".to_string(),
                stock: 0,
                stock_transito: 0,
                stock_reservado: 0,
                stock_proyectado: 0,
                costo_prom: Decimal::ZERO,
                created_at: now,
                updated_at: now,
                sync_version: 0,
            })
            .await
            .unwrap();
        db
    }

    fn order(n_rastreo: Option<&str>) -> PurchaseOrder {
        let now = Utc::now();
        PurchaseOrder {
            id: generate_order_id(),
            external_key: "FILTRO ND NUEVO".to_string(),
            estado_transito: TransitState::SinPrealertar,
            cantidad: 4,
            cant_recibido_total: 0,
            total_costo: Decimal::new(3999, 2),
            costo_unitario: Decimal::new(999750, 5),
            costo_envio_total: Decimal::ZERO,
            n_rastreo: n_rastreo.map(str::to_string),
            proveedor: Some("Casa Foto".to_string()),
            notas: None,
            foto_url: None,
            fecha_compra: now.date_naive(),
            fecha_recibido: None,
            created_at: now,
            updated_at: now,
            sync_version: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_roundtrip_and_cas() {
        let db = setup().await;
        let repo = db.purchase_orders();
        let mut o = order(Some("LP-1"));

        let mut conn = db.pool().acquire().await.unwrap();
        PurchaseOrderRepository::insert(&mut conn, &o).await.unwrap();

        o.estado_transito = TransitState::EnTransito;
        assert!(PurchaseOrderRepository::update_cas(&mut conn, &o).await.unwrap());
        // The stored version is now 1; a second write from version 0 is stale
        assert!(!PurchaseOrderRepository::update_cas(&mut conn, &o).await.unwrap());
        assert!(!PurchaseOrderRepository::delete_cas(&mut conn, &o.id, 0).await.unwrap());
        drop(conn);

        let loaded = repo.get_by_id(&o.id).await.unwrap().unwrap();
        assert_eq!(loaded.estado_transito, TransitState::EnTransito);
        assert_eq!(loaded.total_costo, Decimal::new(3999, 2));
        assert_eq!(loaded.sync_version, 1);
        assert_eq!(repo.list_for_product("FILTRO ND NUEVO").await.unwrap().len(), 1);

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(PurchaseOrderRepository::delete_cas(&mut conn, &o.id, 1).await.unwrap());
        drop(conn);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tracking_number_unique() {
        let db = setup().await;
        let first = order(Some("LP-9"));

        let mut conn = db.pool().acquire().await.unwrap();
        PurchaseOrderRepository::insert(&mut conn, &first).await.unwrap();

        assert!(PurchaseOrderRepository::tracking_in_use(&mut conn, "LP-9", "other")
            .await
            .unwrap());
        assert!(!PurchaseOrderRepository::tracking_in_use(&mut conn, "LP-9", &first.id)
            .await
            .unwrap());

        let err = PurchaseOrderRepository::insert(&mut conn, &order(Some("LP-9")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref field, ref value } if field == "n_rastreo" && value == "LP-9"
        ));

        // Several orders without tracking are fine
        PurchaseOrderRepository::insert(&mut conn, &order(None)).await.unwrap();
        PurchaseOrderRepository::insert(&mut conn, &order(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_product_rejected_by_foreign_key() {
        let db = setup().await;
        let mut o = order(None);
        o.external_key = "NO EXISTE".to_string();

        let mut conn = db.pool().acquire().await.unwrap();
        let err = PurchaseOrderRepository::insert(&mut conn, &o).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
