//! Postgres-backed stock store implementation.
//!
//! Every commit runs in one `SERIALIZABLE` transaction. Aggregate versions are
//! checked under `SELECT ... FOR UPDATE`, and lot draws are compare-and-set
//! updates (`WHERE remaining_quantity = <expected>`), so two writers that read
//! the same snapshot cannot both drain the same lot.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Generated number already taken |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction won |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Concurrent transaction won |
//! | Database (foreign key violation) | `23503` | `Backend` | Dangling product/lot reference |
//! | Database (check constraint violation) | `23514` | `Backend` | Negative stock or remaining quantity |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `Backend` | Connection failures etc. |

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{
    AggregateRoot, ExitVoucherId, ExpectedVersion, LotId, MovementId, OrderId, ProductId,
    SupplierId,
};
use stockledger_inventory::{Lot, LotDraw, Movement, MovementType, Product};
use stockledger_issuing::{ExitVoucher, ExitVoucherLine, ExitVoucherStatus};
use stockledger_purchasing::{Order, OrderLine, OrderStatus, Supplier};

use crate::config::StockConfig;

use super::changeset::{AggregateWrite, ChangeSet};
use super::query::{MovementFilter, Page, Pagination, SortDirection};
use super::r#trait::{StockStore, StoreError};

/// Schema applied by [`PostgresStockStore::migrate`]. Idempotent.
/// Advisory lock key taken while the schema script runs.
const MIGRATION_LOCK_KEY: i64 = 0x5354_4f43_4b4c_4447;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id UUID PRIMARY KEY,
    reference TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    unit_price NUMERIC(19, 4) NOT NULL,
    category TEXT NOT NULL,
    current_stock BIGINT NOT NULL CHECK (current_stock >= 0),
    reorder_point BIGINT NOT NULL,
    unit_of_measure TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS suppliers (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    order_number TEXT NOT NULL UNIQUE,
    order_date DATE NOT NULL,
    requested_delivery DATE,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'VALIDATED', 'DELIVERED')),
    total_amount NUMERIC(19, 4) NOT NULL,
    supplier_id UUID NOT NULL REFERENCES suppliers (id),
    lines JSONB NOT NULL,
    version BIGINT NOT NULL CHECK (version > 0)
);

CREATE TABLE IF NOT EXISTS lots (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    lot_number TEXT NOT NULL UNIQUE,
    entry_date DATE NOT NULL,
    initial_quantity BIGINT NOT NULL CHECK (initial_quantity > 0),
    remaining_quantity BIGINT NOT NULL
        CHECK (remaining_quantity >= 0 AND remaining_quantity <= initial_quantity),
    unit_price NUMERIC(19, 4) NOT NULL CHECK (unit_price >= 0),
    product_id UUID NOT NULL REFERENCES products (id),
    order_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS lots_fifo_idx
    ON lots (product_id, entry_date, seq)
    WHERE remaining_quantity > 0;

CREATE TABLE IF NOT EXISTS movements (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    movement_date DATE NOT NULL,
    movement_type TEXT NOT NULL CHECK (movement_type IN ('ENTRY', 'EXIT')),
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    unit_price NUMERIC(19, 4) NOT NULL,
    reference TEXT NOT NULL,
    product_id UUID NOT NULL REFERENCES products (id),
    lot_id UUID NOT NULL REFERENCES lots (id),
    recorded_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS movements_product_date_idx
    ON movements (product_id, movement_date, seq);

CREATE TABLE IF NOT EXISTS exit_vouchers (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    voucher_number TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL,
    validated_at TIMESTAMPTZ,
    status TEXT NOT NULL CHECK (status IN ('DRAFT', 'VALIDATED', 'CANCELLED')),
    workshop TEXT NOT NULL,
    comment TEXT,
    lines JSONB NOT NULL,
    version BIGINT NOT NULL CHECK (version > 0)
);
"#;

const PRODUCT_COLUMNS: &str = "id, reference, name, description, unit_price, category, \
     current_stock, reorder_point, unit_of_measure";
const LOT_COLUMNS: &str = "id, lot_number, entry_date, initial_quantity, remaining_quantity, \
     unit_price, product_id, order_id, created_at";
const ORDER_COLUMNS: &str = "id, order_number, order_date, requested_delivery, status, \
     supplier_id, lines, version";
const VOUCHER_COLUMNS: &str = "id, voucher_number, created_at, validated_at, status, \
     workshop, comment, lines, version";

/// Postgres-backed stock store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    /// Create a new PostgresStockStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from `DATABASE_URL` and friends.
    pub async fn connect(config: &StockConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// Holds a transaction-scoped advisory lock, so processes starting at the
    /// same time run the schema script one after another.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        sqlx::raw_sql(SCHEMA)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_products(&self, operation: &str, sql: &str) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(|row| decode::<ProductRow>(row).map(Into::into)).collect()
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product", e))?;
        row.map(|row| decode::<ProductRow>(&row).map(Into::into)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn product_by_reference(&self, reference: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_by_reference", e))?;
        row.map(|row| decode::<ProductRow>(&row).map(Into::into)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn products(&self) -> Result<Vec<Product>, StoreError> {
        self.fetch_products(
            "products",
            &format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY reference"),
        )
        .await
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn put_product(&self, product: Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, reference, name, description, unit_price, category,
                current_stock, reorder_point, unit_of_measure
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                reference = EXCLUDED.reference,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                unit_price = EXCLUDED.unit_price,
                category = EXCLUDED.category,
                reorder_point = EXCLUDED.reorder_point,
                unit_of_measure = EXCLUDED.unit_of_measure
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.reference)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.unit_price)
        .bind(&product.category)
        .bind(product.current_stock)
        .bind(product.reorder_point)
        .bind(&product.unit_of_measure)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_product", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(supplier_id = %id), err)]
    async fn supplier(&self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM suppliers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("supplier", e))?;
        row.map(|row| decode::<SupplierRow>(&row).map(Into::into)).transpose()
    }

    #[instrument(skip(self, supplier), fields(supplier_id = %supplier.id), err)]
    async fn put_supplier(&self, supplier: Supplier) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO suppliers (id, name) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(supplier.id.as_uuid())
        .bind(&supplier.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_supplier", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product_id, lot_count), err)]
    async fn available_lots(&self, product_id: ProductId) -> Result<Vec<Lot>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOT_COLUMNS} FROM lots
            WHERE product_id = $1 AND remaining_quantity > 0
            ORDER BY entry_date ASC, seq ASC
            "#
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("available_lots", e))?;

        let lots = rows
            .iter()
            .map(|row| decode::<LotRow>(row)?.into_lot())
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("lot_count", lots.len());
        Ok(lots)
    }

    #[instrument(skip(self), err)]
    async fn lots(&self) -> Result<Vec<Lot>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {LOT_COLUMNS} FROM lots ORDER BY seq ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("lots", e))?;
        rows.iter().map(|row| decode::<LotRow>(row)?.into_lot()).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_lots(&self) -> Result<u64, StoreError> {
        count(&self.pool, "count_lots", "SELECT COUNT(*) FROM lots").await
    }

    #[instrument(skip(self, filter), fields(total), err)]
    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        let pagination = pagination.clamped();
        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_movement_filter(&mut counter, filter);
        let total: i64 = counter
            .build_query_scalar::<i64>()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;
        Span::current().record("total", total);

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT m.id, m.movement_date, m.movement_type, m.quantity, m.unit_price, \
             m.reference, m.product_id, m.lot_id, m.recorded_at",
        );
        push_movement_filter(&mut select, filter);
        select.push(match filter.direction {
            SortDirection::NewestFirst => " ORDER BY m.movement_date DESC, m.seq DESC",
            SortDirection::OldestFirst => " ORDER BY m.movement_date ASC, m.seq ASC",
        });
        select.push(" LIMIT ").push_bind(pagination.limit as i64);
        select.push(" OFFSET ").push_bind(pagination.offset as i64);

        let rows = select
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;
        let items = rows
            .iter()
            .map(|row| decode::<MovementRow>(row)?.into_movement())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total as u64, pagination))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn movements_for_product(&self, product_id: ProductId) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, movement_date, movement_type, quantity, unit_price,
                   reference, product_id, lot_id, recorded_at
            FROM movements
            WHERE product_id = $1
            ORDER BY movement_date DESC, seq DESC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_for_product", e))?;
        rows.iter()
            .map(|row| decode::<MovementRow>(row)?.into_movement())
            .collect()
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("order", e))?;
        row.map(|row| decode::<OrderRow>(&row)?.into_order()).transpose()
    }

    #[instrument(skip(self), err)]
    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(order_number)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_by_number", e))?;
        row.map(|row| decode::<OrderRow>(&row)?.into_order()).transpose()
    }

    #[instrument(skip(self), err)]
    async fn orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY seq ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("orders", e))?;
        rows.iter().map(|row| decode::<OrderRow>(row)?.into_order()).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_orders(&self) -> Result<u64, StoreError> {
        count(&self.pool, "count_orders", "SELECT COUNT(*) FROM orders").await
    }

    #[instrument(skip(self), fields(exit_voucher_id = %id), err)]
    async fn exit_voucher(&self, id: ExitVoucherId) -> Result<Option<ExitVoucher>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM exit_vouchers WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("exit_voucher", e))?;
        row.map(|row| decode::<ExitVoucherRow>(&row)?.into_voucher())
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn exit_vouchers(&self) -> Result<Vec<ExitVoucher>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM exit_vouchers ORDER BY seq ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("exit_vouchers", e))?;
        rows.iter()
            .map(|row| decode::<ExitVoucherRow>(row)?.into_voucher())
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn count_exit_vouchers(&self) -> Result<u64, StoreError> {
        count(&self.pool, "count_exit_vouchers", "SELECT COUNT(*) FROM exit_vouchers").await
    }

    /// Apply the change set in one serializable transaction.
    ///
    /// 1. Check the set is balanced (stock deltas match lot changes)
    /// 2. Upsert/delete aggregates under version checks
    /// 3. Insert lots, then apply compare-and-set lot draws
    /// 4. Append movements and adjust cached stock
    /// 5. Commit
    #[instrument(
        skip(self, changes),
        fields(
            orders = changes.orders.len(),
            exit_vouchers = changes.exit_vouchers.len(),
            new_lots = changes.new_lots.len(),
            lot_draws = changes.lot_draws.len(),
            movements = changes.movements.len()
        ),
        err
    )]
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        changes.ensure_balanced()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        for write in &changes.orders {
            save_order(&mut tx, write).await?;
        }
        for (id, expected) in &changes.deleted_orders {
            delete_order(&mut tx, *id, *expected).await?;
        }
        for write in &changes.exit_vouchers {
            save_exit_voucher(&mut tx, write).await?;
        }
        for lot in &changes.new_lots {
            insert_lot(&mut tx, lot).await?;
        }
        for draw in &changes.lot_draws {
            apply_draw(&mut tx, draw).await?;
        }
        for movement in &changes.movements {
            insert_movement(&mut tx, movement).await?;
        }
        for (product_id, delta) in &changes.stock_deltas {
            adjust_stock(&mut tx, *product_id, *delta).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

async fn count(pool: &PgPool, operation: &str, sql: &str) -> Result<u64, StoreError> {
    let n: i64 = sqlx::query_scalar(sql)
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(n as u64)
}

fn push_movement_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &MovementFilter) {
    builder.push(
        " FROM movements m \
         JOIN products p ON p.id = m.product_id \
         JOIN lots l ON l.id = m.lot_id \
         WHERE TRUE",
    );
    if let Some(from) = filter.from {
        builder.push(" AND m.movement_date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND m.movement_date <= ").push_bind(to);
    }
    if let Some(product_id) = filter.product_id {
        builder.push(" AND m.product_id = ").push_bind(*product_id.as_uuid());
    }
    if let Some(reference) = &filter.product_reference {
        builder.push(" AND p.reference = ").push_bind(reference.clone());
    }
    if let Some(movement_type) = filter.movement_type {
        builder
            .push(" AND m.movement_type = ")
            .push_bind(movement_type.as_str());
    }
    if let Some(lot_number) = &filter.lot_number {
        builder.push(" AND l.lot_number = ").push_bind(lot_number.clone());
    }
}

fn check_version(
    entity: &str,
    number: &str,
    expected: ExpectedVersion,
    current: u64,
) -> Result<(), StoreError> {
    if expected.matches(current) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{entity} {number}: expected {expected:?}, found version {current}"
        )))
    }
}

async fn locked_version(
    tx: &mut Transaction<'_, Postgres>,
    operation: &str,
    sql: &str,
    id: &uuid::Uuid,
) -> Result<Option<u64>, StoreError> {
    let version: Option<i64> = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(version.map(|v| v as u64))
}

async fn save_order(
    tx: &mut Transaction<'_, Postgres>,
    write: &AggregateWrite<Order>,
) -> Result<(), StoreError> {
    let order = &write.record;
    let id = order.id_typed();
    let current = locked_version(
        tx,
        "save_order",
        "SELECT version FROM orders WHERE id = $1 FOR UPDATE",
        id.as_uuid(),
    )
    .await?;
    check_version("order", order.order_number(), write.expected, current.unwrap_or(0))?;

    let sql = if current.is_some() {
        r#"
        UPDATE orders SET
            order_number = $2, order_date = $3, requested_delivery = $4, status = $5,
            total_amount = $6, supplier_id = $7, lines = $8, version = $9
        WHERE id = $1
        "#
    } else {
        r#"
        INSERT INTO orders (
            id, order_number, order_date, requested_delivery, status,
            total_amount, supplier_id, lines, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#
    };

    sqlx::query(sql)
        .bind(id.as_uuid())
        .bind(order.order_number())
        .bind(order.order_date())
        .bind(order.requested_delivery())
        .bind(order.status().as_str())
        .bind(order.total_amount())
        .bind(order.supplier_id().as_uuid())
        .bind(Json(order.lines()))
        .bind(order.version() as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;
    Ok(())
}

async fn delete_order(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let current = locked_version(
        tx,
        "delete_order",
        "SELECT version FROM orders WHERE id = $1 FOR UPDATE",
        id.as_uuid(),
    )
    .await?
    .ok_or_else(|| StoreError::missing("order", id))?;
    check_version("order", &id.to_string(), expected, current)?;

    sqlx::query("DELETE FROM orders WHERE id = $1")
        .bind(id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete_order", e))?;
    Ok(())
}

async fn save_exit_voucher(
    tx: &mut Transaction<'_, Postgres>,
    write: &AggregateWrite<ExitVoucher>,
) -> Result<(), StoreError> {
    let voucher = &write.record;
    let id = voucher.id_typed();
    let current = locked_version(
        tx,
        "save_exit_voucher",
        "SELECT version FROM exit_vouchers WHERE id = $1 FOR UPDATE",
        id.as_uuid(),
    )
    .await?;
    check_version(
        "exit voucher",
        voucher.voucher_number(),
        write.expected,
        current.unwrap_or(0),
    )?;

    let sql = if current.is_some() {
        r#"
        UPDATE exit_vouchers SET
            voucher_number = $2, created_at = $3, validated_at = $4, status = $5,
            workshop = $6, comment = $7, lines = $8, version = $9
        WHERE id = $1
        "#
    } else {
        r#"
        INSERT INTO exit_vouchers (
            id, voucher_number, created_at, validated_at, status,
            workshop, comment, lines, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#
    };

    sqlx::query(sql)
        .bind(id.as_uuid())
        .bind(voucher.voucher_number())
        .bind(voucher.created_at())
        .bind(voucher.validated_at())
        .bind(voucher.status().as_str())
        .bind(voucher.workshop())
        .bind(voucher.comment())
        .bind(Json(voucher.lines()))
        .bind(voucher.version() as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("save_exit_voucher", e))?;
    Ok(())
}

async fn insert_lot(tx: &mut Transaction<'_, Postgres>, lot: &Lot) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO lots (
            id, lot_number, entry_date, initial_quantity, remaining_quantity,
            unit_price, product_id, order_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(lot.id.as_uuid())
    .bind(&lot.lot_number)
    .bind(lot.entry_date)
    .bind(lot.initial_quantity)
    .bind(lot.remaining_quantity())
    .bind(lot.unit_price)
    .bind(lot.product_id.as_uuid())
    .bind(lot.order_id.as_uuid())
    .bind(lot.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_lot", e))?;
    Ok(())
}

async fn apply_draw(tx: &mut Transaction<'_, Postgres>, draw: &LotDraw) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE lots SET remaining_quantity = remaining_quantity - $2
        WHERE id = $1 AND remaining_quantity = $3
        "#,
    )
    .bind(draw.lot_id.as_uuid())
    .bind(draw.quantity)
    .bind(draw.expected_remaining)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("apply_draw", e))?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let remaining: Option<i64> =
        sqlx::query_scalar("SELECT remaining_quantity FROM lots WHERE id = $1")
            .bind(draw.lot_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("apply_draw", e))?;
    match remaining {
        None => Err(StoreError::missing("lot", draw.lot_id)),
        Some(remaining) => Err(StoreError::Conflict(format!(
            "lot {} has {remaining} remaining, expected {}",
            draw.lot_id, draw.expected_remaining
        ))),
    }
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO movements (
            id, movement_date, movement_type, quantity, unit_price,
            reference, product_id, lot_id, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.movement_date)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity)
    .bind(movement.unit_price)
    .bind(&movement.reference)
    .bind(movement.product_id.as_uuid())
    .bind(movement.lot_id.as_uuid())
    .bind(movement.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

async fn adjust_stock(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    delta: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE products SET current_stock = current_stock + $2 WHERE id = $1")
        .bind(product_id.as_uuid())
        .bind(delta)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;
    if result.rows_affected() == 0 {
        return Err(StoreError::missing("product", product_id));
    }
    Ok(())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some(code) if is_retryable_code(code) => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Unique violation, serialization failure or deadlock: another writer won.
fn is_retryable_code(code: &str) -> bool {
    matches!(code, "23505" | "40001" | "40P01")
}

fn decode<'r, T>(row: &'r PgRow) -> Result<T, StoreError>
where
    T: FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode row: {}", e)))
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: uuid::Uuid,
    reference: String,
    name: String,
    description: Option<String>,
    unit_price: Decimal,
    category: String,
    current_stock: i64,
    reorder_point: i64,
    unit_of_measure: String,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: row.try_get("unit_price")?,
            category: row.try_get("category")?,
            current_stock: row.try_get("current_stock")?,
            reorder_point: row.try_get("reorder_point")?,
            unit_of_measure: row.try_get("unit_of_measure")?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: ProductId::from_uuid(row.id),
            reference: row.reference,
            name: row.name,
            description: row.description,
            unit_price: row.unit_price,
            category: row.category,
            current_stock: row.current_stock,
            reorder_point: row.reorder_point,
            unit_of_measure: row.unit_of_measure,
        }
    }
}

#[derive(Debug)]
struct SupplierRow {
    id: uuid::Uuid,
    name: String,
}

impl<'r> FromRow<'r, PgRow> for SupplierRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SupplierRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

impl From<SupplierRow> for Supplier {
    fn from(row: SupplierRow) -> Self {
        Supplier {
            id: SupplierId::from_uuid(row.id),
            name: row.name,
        }
    }
}

#[derive(Debug)]
struct LotRow {
    id: uuid::Uuid,
    lot_number: String,
    entry_date: NaiveDate,
    initial_quantity: i64,
    remaining_quantity: i64,
    unit_price: Decimal,
    product_id: uuid::Uuid,
    order_id: uuid::Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LotRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LotRow {
            id: row.try_get("id")?,
            lot_number: row.try_get("lot_number")?,
            entry_date: row.try_get("entry_date")?,
            initial_quantity: row.try_get("initial_quantity")?,
            remaining_quantity: row.try_get("remaining_quantity")?,
            unit_price: row.try_get("unit_price")?,
            product_id: row.try_get("product_id")?,
            order_id: row.try_get("order_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl LotRow {
    fn into_lot(self) -> Result<Lot, StoreError> {
        Lot::restore(
            LotId::from_uuid(self.id),
            self.lot_number,
            self.entry_date,
            self.initial_quantity,
            self.remaining_quantity,
            self.unit_price,
            ProductId::from_uuid(self.product_id),
            OrderId::from_uuid(self.order_id),
            self.created_at,
        )
        .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    movement_date: NaiveDate,
    movement_type: String,
    quantity: i64,
    unit_price: Decimal,
    reference: String,
    product_id: uuid::Uuid,
    lot_id: uuid::Uuid,
    recorded_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            movement_date: row.try_get("movement_date")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            reference: row.try_get("reference")?,
            product_id: row.try_get("product_id")?,
            lot_id: row.try_get("lot_id")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl MovementRow {
    fn into_movement(self) -> Result<Movement, StoreError> {
        Ok(Movement {
            id: MovementId::from_uuid(self.id),
            movement_date: self.movement_date,
            movement_type: self
                .movement_type
                .parse::<MovementType>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            quantity: self.quantity,
            unit_price: self.unit_price,
            reference: self.reference,
            product_id: ProductId::from_uuid(self.product_id),
            lot_id: LotId::from_uuid(self.lot_id),
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(Debug)]
struct OrderRow {
    id: uuid::Uuid,
    order_number: String,
    order_date: NaiveDate,
    requested_delivery: Option<NaiveDate>,
    status: String,
    supplier_id: uuid::Uuid,
    lines: Json<Vec<OrderLine>>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            order_date: row.try_get("order_date")?,
            requested_delivery: row.try_get("requested_delivery")?,
            status: row.try_get("status")?,
            supplier_id: row.try_get("supplier_id")?,
            lines: row.try_get("lines")?,
            version: row.try_get("version")?,
        })
    }
}

impl OrderRow {
    fn into_order(self) -> Result<Order, StoreError> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Order::restore(
            OrderId::from_uuid(self.id),
            self.order_number,
            self.order_date,
            self.requested_delivery,
            status,
            SupplierId::from_uuid(self.supplier_id),
            self.lines.0,
            self.version as u64,
        ))
    }
}

#[derive(Debug)]
struct ExitVoucherRow {
    id: uuid::Uuid,
    voucher_number: String,
    created_at: DateTime<Utc>,
    validated_at: Option<DateTime<Utc>>,
    status: String,
    workshop: String,
    comment: Option<String>,
    lines: Json<Vec<ExitVoucherLine>>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for ExitVoucherRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ExitVoucherRow {
            id: row.try_get("id")?,
            voucher_number: row.try_get("voucher_number")?,
            created_at: row.try_get("created_at")?,
            validated_at: row.try_get("validated_at")?,
            status: row.try_get("status")?,
            workshop: row.try_get("workshop")?,
            comment: row.try_get("comment")?,
            lines: row.try_get("lines")?,
            version: row.try_get("version")?,
        })
    }
}

impl ExitVoucherRow {
    fn into_voucher(self) -> Result<ExitVoucher, StoreError> {
        let status = self
            .status
            .parse::<ExitVoucherStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(ExitVoucher::restore(
            ExitVoucherId::from_uuid(self.id),
            self.voucher_number,
            self.created_at,
            self.validated_at,
            status,
            self.workshop,
            self.comment,
            self.lines.0,
            self.version as u64,
        ))
    }
}
