//! # Seed Data Generator
//!
//! Loads a handful of demo products and walks one purchase order through
//! its whole life: ordered, received in two shipments, audited.
//!
//! ## Usage
//! ```bash
//! # Use almacen.toml / ALMACEN_DATABASE_PATH (default ./almacen.db)
//! cargo run -p almacen-db --bin seed
//!
//! # Specify database path
//! cargo run -p almacen-db --bin seed -- --db ./data/almacen.db
//!
//! # Skip the purchase order walkthrough
//! cargo run -p almacen-db --bin seed -- --products-only
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use almacen_core::{CreateOrderInput, EditOrderInput, PhotoUpload, Product, ReceiptInput};
use almacen_db::{Database, DbConfig, MemoryPhotoStore, PurchasingConfig, RequestContext};

/// Demo catalogue: (nombre, condicion, stock, stock_reservado, costo_prom)
const PRODUCTS: &[(&str, &str, i64, i64, &str)] = &[
    ("Auriculares BT-200", "Nuevo", 0, 0, "0"),
    ("Auriculares BT-200", "Reacondicionado", 4, 1, "12.50"),
    ("Cable USB-C 2m", "Nuevo", 40, 5, "1.85"),
    ("Cargador 65W", "Nuevo", 12, 2, "9.40"),
    ("Teclado Mecánico K8", "Nuevo", 3, 0, "38.00"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut products_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--products-only" => products_only = true,
            "--help" | "-h" => {
                println!("Almacén Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>      Database file path (default: from almacen.toml)");
                println!("      --products-only  Insert products, skip the order walkthrough");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = PurchasingConfig::load(None)?;
    if let Some(path) = db_path {
        config.database_path = path;
    }

    info!(path = ?config.database_path, "Opening database");
    let db = Database::new(DbConfig::from_purchasing(&config)).await?;

    let (total, applied) = db.migration_status().await?;
    info!(total, applied, "Schema migrations");

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(
            existing,
            "Database already has products, skipping seed. Delete the file to regenerate."
        );
        return Ok(());
    }

    let now = Utc::now();
    for (nombre, condicion, stock, reservado, costo) in PRODUCTS {
        let doc = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "nombre": nombre,
            "condicion": condicion,
            "stock": stock,
            "stock_reservado": reservado,
            "costo_prom": costo,
        });
        let product = Product::from_document(&doc, now)?;
        db.products().insert(&product).await?;
        info!(
            external_key = %product.external_key,
            stock = product.stock,
            costo_prom = %product.costo_prom,
            "Product inserted"
        );
    }

    if products_only {
        info!("Seed complete (products only)");
        return Ok(());
    }

    walkthrough(&db, config).await?;

    info!("Seed complete");
    Ok(())
}

/// Orders 5 units for 100, receives 3 (shipping 6) then 2.
async fn walkthrough(
    db: &Database,
    config: PurchasingConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let purchasing = db
        .purchasing(config)
        .with_photo_store(Arc::new(MemoryPhotoStore::new()));
    let ctx = RequestContext::new("seed");
    let key = "AURICULARES BT-200 NUEVO";

    let id = purchasing
        .create_order(
            &ctx,
            CreateOrderInput {
                external_key: key.to_string(),
                cantidad: 5,
                total_costo: Decimal::new(100, 0),
                n_rastreo: Some("LP00123456789".to_string()),
                proveedor: Some("Mayorista Centro".to_string()),
                photo: Some(PhotoUpload {
                    file_name: "factura.jpg".to_string(),
                    content_type: "image/jpeg".to_string(),
                    bytes: b"demo".to_vec(),
                }),
                ..Default::default()
            },
        )
        .await?;
    log_product(db, key, "after order").await?;

    for (qty, shipping) in [(3, Decimal::new(6, 0)), (2, Decimal::ZERO)] {
        purchasing
            .edit_order(
                &ctx,
                &id,
                EditOrderInput {
                    receipt: Some(ReceiptInput {
                        received_qty_delta: qty,
                        shipping_cost_delta: shipping,
                        fecha_recibido: None,
                    }),
                    ..Default::default()
                },
            )
            .await?;
        log_product(db, key, "after receipt").await?;
    }

    let order = purchasing.get_order(&id).await?;
    info!(
        order_id = %order.id,
        estado = %order.estado_transito,
        recibido = order.cant_recibido_total,
        costo_envio = %order.costo_envio_total,
        "Order closed"
    );

    let audit = purchasing.audit_transit(key).await?;
    info!(
        recorded = audit.recorded,
        expected = audit.expected,
        consistent = audit.is_consistent(),
        "Transit audit"
    );
    Ok(())
}

async fn log_product(
    db: &Database,
    key: &str,
    step: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(product) = db.products().get_by_key(key).await? {
        info!(
            step,
            stock = product.stock,
            stock_transito = product.stock_transito,
            stock_proyectado = product.stock_proyectado,
            costo_prom = %product.costo_prom,
            "Product state"
        );
    }
    Ok(())
}

/// Log level comes from `RUST_LOG`, defaulting to info with debug for this
/// workspace.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,almacen_db=debug,almacen_core=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
