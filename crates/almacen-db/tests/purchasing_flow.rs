//! End-to-end purchasing flows against an in-memory database.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use almacen_core::{
    CreateOrderInput, EditOrderInput, PhotoUpload, Product, ReceiptInput, TransitState,
    ValidationError,
};
use almacen_db::{
    Database, DbConfig, MemoryPhotoStore, PurchasingConfig, PurchasingError, PurchasingService,
    RequestContext,
};

const KEY: &str = "FLASH SPEEDLITE NUEVO";

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::new("tests")
}

fn test_config() -> PurchasingConfig {
    PurchasingConfig {
        max_retries: 20,
        retry_backoff_ms: 1,
        ..PurchasingConfig::default()
    }
}

async fn setup(stock: i64, costo_prom: &str) -> (Database, PurchasingService) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let now = Utc::now();
    let mut product = Product {
        id: uuid::Uuid::new_v4().to_string(),
        external_key: KEY.to_string(),
        nombre: "Flash Speedlite".to_string(),
        condicion: "Nuevo".to_string(),
        stock,
        stock_transito: 0,
        stock_reservado: 1,
        stock_proyectado: 0,
        costo_prom: dec(costo_prom),
        created_at: now,
        updated_at: now,
        sync_version: 0,
    };
    product.recompute_projection();
    db.products().insert(&product).await.unwrap();

    let service = db.purchasing(test_config());
    (db, service)
}

async fn product(db: &Database) -> Product {
    db.products().get_by_key(KEY).await.unwrap().unwrap()
}

fn order(cantidad: i64, total: &str) -> CreateOrderInput {
    CreateOrderInput {
        external_key: KEY.to_string(),
        cantidad,
        total_costo: dec(total),
        ..Default::default()
    }
}

fn receipt(qty: i64, shipping: &str) -> EditOrderInput {
    EditOrderInput {
        receipt: Some(ReceiptInput {
            received_qty_delta: qty,
            shipping_cost_delta: dec(shipping),
            fecha_recibido: None,
        }),
        ..Default::default()
    }
}

fn photo(content_type: &str) -> PhotoUpload {
    PhotoUpload {
        file_name: "caja.png".to_string(),
        content_type: content_type.to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    }
}

// =============================================================================
// Receiving
// =============================================================================

#[tokio::test]
async fn test_two_receipts_settle_order() {
    let (db, service) = setup(0, "0").await;

    let id = service.create_order(&ctx(), order(5, "100")).await.unwrap();
    let p = product(&db).await;
    assert_eq!(p.stock_transito, 5);
    assert_eq!(p.stock_proyectado, 4);

    service.edit_order(&ctx(), &id, receipt(3, "6")).await.unwrap();
    let p = product(&db).await;
    assert_eq!(p.stock, 3);
    assert_eq!(p.stock_transito, 2);
    assert_eq!(p.costo_prom, dec("22"));

    let o = service.get_order(&id).await.unwrap();
    assert_eq!(o.estado_transito, TransitState::RecibidoParcialmente);
    assert_eq!(o.cant_recibido_total, 3);
    assert!(o.fecha_recibido.is_none());

    service.edit_order(&ctx(), &id, receipt(2, "0")).await.unwrap();
    let p = product(&db).await;
    assert_eq!(p.stock, 5);
    assert_eq!(p.stock_transito, 0);
    assert_eq!(p.stock_proyectado, 4);
    assert_eq!(p.costo_prom, dec("21.2"));

    let o = service.get_order(&id).await.unwrap();
    assert_eq!(o.estado_transito, TransitState::Recibido);
    assert_eq!(o.cant_recibido_total, 5);
    assert_eq!(o.costo_envio_total, dec("6"));
    assert!(o.fecha_recibido.is_some());
}

#[tokio::test]
async fn test_receipt_blends_with_existing_stock() {
    let (db, service) = setup(10, "15").await;

    let id = service.create_order(&ctx(), order(10, "200")).await.unwrap();
    service.edit_order(&ctx(), &id, receipt(10, "0")).await.unwrap();

    // (10 × 15 + 10 × 20) / 20
    let p = product(&db).await;
    assert_eq!(p.stock, 20);
    assert_eq!(p.costo_prom, dec("17.5"));
}

#[tokio::test]
async fn test_over_receipt_rejected_without_writes() {
    let (db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(5, "100")).await.unwrap();
    service.edit_order(&ctx(), &id, receipt(3, "0")).await.unwrap();
    let before = product(&db).await;

    let err = service
        .edit_order(&ctx(), &id, receipt(3, "0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::OverReceipt {
            requested: 3,
            remaining: 2
        })
    ));

    assert_eq!(product(&db).await, before);
    assert_eq!(service.get_order(&id).await.unwrap().cant_recibido_total, 3);
}

#[tokio::test]
async fn test_shipping_without_units_rejected() {
    let (_db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(5, "100")).await.unwrap();

    let err = service
        .edit_order(&ctx(), &id, receipt(0, "4"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::ShippingWithoutReceipt)
    ));
}

#[tokio::test]
async fn test_receipt_on_closed_order_rejected() {
    let (_db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(2, "10")).await.unwrap();
    service.edit_order(&ctx(), &id, receipt(2, "0")).await.unwrap();

    let err = service
        .edit_order(&ctx(), &id, receipt(1, "0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::OrderClosed { .. })
    ));
}

// =============================================================================
// Editing and Deleting
// =============================================================================

#[tokio::test]
async fn test_quantity_edit_moves_transit() {
    let (db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(5, "100")).await.unwrap();
    service.edit_order(&ctx(), &id, receipt(2, "0")).await.unwrap();

    let edit = EditOrderInput {
        cantidad: Some(8),
        ..Default::default()
    };
    service.edit_order(&ctx(), &id, edit).await.unwrap();
    assert_eq!(product(&db).await.stock_transito, 6);

    let edit = EditOrderInput {
        cantidad: Some(1),
        ..Default::default()
    };
    let err = service.edit_order(&ctx(), &id, edit).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::QuantityBelowReceived {
            cantidad: 1,
            recibido: 2
        })
    ));
    assert_eq!(product(&db).await.stock_transito, 6);
}

#[tokio::test]
async fn test_cancel_releases_transit() {
    let (db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(5, "100")).await.unwrap();

    let edit = EditOrderInput {
        estado_transito: Some(TransitState::OrdenCancelada),
        ..Default::default()
    };
    service.edit_order(&ctx(), &id, edit).await.unwrap();
    assert_eq!(product(&db).await.stock_transito, 0);

    let edit = EditOrderInput {
        estado_transito: Some(TransitState::EnTransito),
        ..Default::default()
    };
    let err = service.edit_order(&ctx(), &id, edit).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_delete_releases_only_pending_units() {
    let (db, service) = setup(0, "0").await;
    let id = service.create_order(&ctx(), order(10, "100")).await.unwrap();
    service.edit_order(&ctx(), &id, receipt(4, "0")).await.unwrap();

    let edit = EditOrderInput {
        estado_transito: Some(TransitState::EnTransito),
        ..Default::default()
    };
    service.edit_order(&ctx(), &id, edit).await.unwrap();

    let before = product(&db).await;
    assert_eq!(before.stock_transito, 6);

    service.delete_order(&ctx(), &id).await.unwrap();
    let after = product(&db).await;
    assert_eq!(after.stock_transito, 0);
    assert_eq!(after.stock, 4);
    assert_eq!(after.costo_prom, before.costo_prom);

    assert!(matches!(
        service.get_order(&id).await.unwrap_err(),
        PurchasingError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_delete_received_order_keeps_transit() {
    let (db, service) = setup(0, "0").await;
    let open = service.create_order(&ctx(), order(3, "30")).await.unwrap();
    let done = service.create_order(&ctx(), order(2, "20")).await.unwrap();
    service.edit_order(&ctx(), &done, receipt(2, "0")).await.unwrap();
    assert_eq!(product(&db).await.stock_transito, 3);

    service.delete_order(&ctx(), &done).await.unwrap();
    let p = product(&db).await;
    assert_eq!(p.stock_transito, 3);
    assert_eq!(p.stock, 2);

    assert!(service.get_order(&open).await.is_ok());
}

#[tokio::test]
async fn test_missing_order() {
    let (_db, service) = setup(0, "0").await;

    let err = service.delete_order(&ctx(), "nope").await.unwrap_err();
    assert!(matches!(err, PurchasingError::NotFound { .. }));
    assert_eq!(err.kind(), "NOT_FOUND");

    let err = service
        .edit_order(&ctx(), "nope", receipt(1, "0"))
        .await
        .unwrap_err();
    assert!(matches!(err, PurchasingError::NotFound { .. }));
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_unknown_product_writes_nothing() {
    let (db, service) = setup(0, "0").await;

    let mut input = order(5, "100");
    input.external_key = "no existe".to_string();
    let err = service.create_order(&ctx(), input).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::UnknownProduct(ref key)) if key == "NO EXISTE"
    ));

    assert_eq!(db.purchase_orders().count().await.unwrap(), 0);
    assert_eq!(product(&db).await.stock_transito, 0);
}

#[tokio::test]
async fn test_key_is_normalized_on_create() {
    let (db, service) = setup(0, "0").await;

    let mut input = order(2, "10");
    input.external_key = "  flash   speedlite nuevo ".to_string();
    let id = service.create_order(&ctx(), input).await.unwrap();

    assert_eq!(service.get_order(&id).await.unwrap().external_key, KEY);
    assert_eq!(product(&db).await.stock_transito, 2);
}

#[tokio::test]
async fn test_duplicate_tracking_number() {
    let (db, service) = setup(0, "0").await;

    let mut first = order(2, "10");
    first.n_rastreo = Some("lp-0001".to_string());
    let first_id = service.create_order(&ctx(), first).await.unwrap();
    assert_eq!(
        service.get_order(&first_id).await.unwrap().n_rastreo.as_deref(),
        Some("LP-0001")
    );

    let mut second = order(3, "10");
    second.n_rastreo = Some("LP-0001".to_string());
    let err = service.create_order(&ctx(), second).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::Duplicate { ref field, .. }) if field == "n_rastreo"
    ));
    assert_eq!(product(&db).await.stock_transito, 2);

    // Re-saving an order with its own number is fine
    let edit = EditOrderInput {
        n_rastreo: Some("LP-0001".to_string()),
        notas: Some("llega el martes".to_string()),
        ..Default::default()
    };
    service.edit_order(&ctx(), &first_id, edit).await.unwrap();

    // Empty string clears it
    let edit = EditOrderInput {
        n_rastreo: Some(String::new()),
        ..Default::default()
    };
    service.edit_order(&ctx(), &first_id, edit).await.unwrap();
    assert!(service.get_order(&first_id).await.unwrap().n_rastreo.is_none());
}

#[tokio::test]
async fn test_create_as_received_rejected() {
    let (db, service) = setup(0, "0").await;

    let mut input = order(2, "10");
    input.estado_transito = Some(TransitState::Recibido);
    let err = service.create_order(&ctx(), input).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::NotAllowed { .. })
    ));
    assert_eq!(err.kind(), "VALIDATION_ERROR");
    assert_eq!(db.purchase_orders().count().await.unwrap(), 0);
}

// =============================================================================
// Photos
// =============================================================================

#[tokio::test]
async fn test_photo_attached_on_create() {
    let (_db, service) = setup(0, "0").await;
    let store = MemoryPhotoStore::new();
    let service = service.with_photo_store(Arc::new(store.clone()));

    let mut input = order(1, "10");
    input.photo = Some(photo("image/png"));
    let id = service.create_order(&ctx(), input).await.unwrap();

    let o = service.get_order(&id).await.unwrap();
    assert_eq!(o.foto_url, Some(format!("memory://{}/caja.png", id)));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_photo_failure_still_saves_order() {
    let (db, service) = setup(0, "0").await;
    let service = service.with_photo_store(Arc::new(MemoryPhotoStore::new()));

    let mut input = order(4, "10");
    input.photo = Some(photo("application/pdf"));
    let id = service.create_order(&ctx(), input).await.unwrap();

    assert!(service.get_order(&id).await.unwrap().foto_url.is_none());
    assert_eq!(product(&db).await.stock_transito, 4);
}

#[tokio::test]
async fn test_rejected_create_uploads_no_photo() {
    let (db, service) = setup(0, "0").await;
    let store = MemoryPhotoStore::new();
    let service = service.with_photo_store(Arc::new(store.clone()));

    let mut input = order(1, "10");
    input.external_key = "PRODUCTO INEXISTENTE".to_string();
    input.photo = Some(photo("image/png"));
    let err = service.create_order(&ctx(), input).await.unwrap_err();
    assert!(matches!(
        err,
        PurchasingError::Validation(ValidationError::UnknownProduct(_))
    ));

    let mut input = order(0, "10");
    input.photo = Some(photo("image/png"));
    assert!(service.create_order(&ctx(), input).await.is_err());

    let mut first = order(1, "10");
    first.n_rastreo = Some("LP-0002".to_string());
    service.create_order(&ctx(), first).await.unwrap();
    let mut second = order(1, "10");
    second.n_rastreo = Some("LP-0002".to_string());
    second.photo = Some(photo("image/png"));
    assert!(service.create_order(&ctx(), second).await.is_err());

    assert_eq!(store.len().await, 0);
    assert_eq!(db.purchase_orders().count().await.unwrap(), 1);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_list_and_audit() {
    let (db, service) = setup(0, "0").await;
    let a = service.create_order(&ctx(), order(5, "50")).await.unwrap();
    let b = service.create_order(&ctx(), order(3, "30")).await.unwrap();
    service.edit_order(&ctx(), &b, receipt(1, "0")).await.unwrap();

    let orders = service.list_orders_for_product("flash speedlite nuevo").await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().any(|o| o.id == a));

    let audit = service.audit_transit(KEY).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.expected, 7);
    assert_eq!(audit.recorded, product(&db).await.stock_transito);
    assert_eq!(audit.active_orders, 2);

    let err = service.audit_transit("OTRO").await.unwrap_err();
    assert!(matches!(err, PurchasingError::NotFound { .. }));
    let err = service.list_orders_for_product("OTRO").await.unwrap_err();
    assert!(matches!(err, PurchasingError::NotFound { .. }));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_receipts_lose_no_updates() {
    let (db, service) = setup(0, "0").await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(service.create_order(&ctx(), order(6, "60")).await.unwrap());
    }
    assert_eq!(product(&db).await.stock_transito, 24);

    let mut handles = Vec::new();
    for id in &ids {
        for _ in 0..3 {
            let service = service.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service.edit_order(&ctx(), &id, receipt(1, "0")).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let p = product(&db).await;
    assert_eq!(p.stock, 12);
    assert_eq!(p.stock_transito, 12);
    assert_eq!(p.costo_prom, dec("10"));
    assert!(p.projection_is_consistent());

    for id in &ids {
        let o = service.get_order(id).await.unwrap();
        assert_eq!(o.cant_recibido_total, 3);
        assert_eq!(o.estado_transito, TransitState::RecibidoParcialmente);
    }
    assert!(service.audit_transit(KEY).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_retries_report_conflict() {
    let (db, _) = setup(0, "0").await;
    let service = db.purchasing(PurchasingConfig {
        max_retries: 0,
        retry_backoff_ms: 0,
        ..PurchasingConfig::default()
    });

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(service.create_order(&ctx(), order(6, "60")).await.unwrap());
    }

    let mut handles = Vec::new();
    for id in &ids {
        for _ in 0..6 {
            let service = service.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service.edit_order(&ctx(), &id, receipt(1, "0")).await
            }));
        }
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(err) => {
                assert!(
                    matches!(err, PurchasingError::Conflict { attempts: 1, .. }),
                    "{:?}",
                    err
                );
                assert!(err.is_retryable());
                assert_eq!(err.kind(), "CONFLICT");
                conflicts += 1;
            }
        }
    }
    assert_eq!(committed + conflicts, 24);
    assert!(conflicts > 0);

    // Only committed receipts moved stock
    let p = product(&db).await;
    assert_eq!(p.stock, committed);
    assert_eq!(p.stock_transito, 24 - committed);
    assert!(p.projection_is_consistent());

    let mut received = 0;
    for id in &ids {
        received += service.get_order(id).await.unwrap().cant_recibido_total;
    }
    assert_eq!(received, committed);

    let audit = service.audit_transit(KEY).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.expected, 24 - committed);
}
