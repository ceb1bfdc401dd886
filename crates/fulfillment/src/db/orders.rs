//! `PostgreSQL` order ledger.
//!
//! Conditional updates lock the order row (`SELECT ... FOR UPDATE`), evaluate
//! the [`UpdateGuard`] against the locked row and write back in the same
//! transaction. Order materialization relies on the unique
//! `checkout_session_id` constraint.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::order::{LineItem, NewOrder, Order};
use sweetbox_core::{FlavorId, OrderId, OrderStatus, PaymentStatus, ProductId, UserId};
use tracing::instrument;

use super::RepositoryError;
use super::ledger::{CreateOutcome, OrderLedger, OrderPatch, UpdateGuard, UpdateOutcome};

const ORDER_COLUMNS: &str = r"
    id, user_id, total, shipping_address, notes, status, payment_status,
    shipment_id, checkout_session_id, payment_reference, created_at, updated_at
";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: Option<UserId>,
    total: Decimal,
    shipping_address: Option<Json<CanonicalAddress>>,
    notes: Option<String>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    shipment_id: Option<String>,
    checkout_session_id: Option<String>,
    payment_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<LineItem>) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            total: self.total,
            items,
            shipping_address: self.shipping_address.map(|Json(address)| address),
            notes: self.notes,
            status: self.status,
            payment_status: self.payment_status,
            shipment_id: self.shipment_id,
            checkout_session_id: self.checkout_session_id,
            payment_reference: self.payment_reference,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineItemRow {
    order_id: OrderId,
    product_id: ProductId,
    quantity: i32,
    unit_price: Decimal,
    line_total: Decimal,
    flavor_ids: Vec<i32>,
    custom_pack_label: Option<String>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = RepositoryError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "order {} has line item with quantity {}",
                row.order_id, row.quantity
            ))
        })?;
        Ok(Self {
            product_id: row.product_id,
            quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
            flavor_ids: row.flavor_ids.into_iter().map(FlavorId::new).collect(),
            custom_pack_label: row.custom_pack_label,
        })
    }
}

/// `PostgreSQL`-backed [`OrderLedger`].
#[derive(Clone, Debug)]
pub struct PgOrderLedger {
    pool: PgPool,
    timeout: Duration,
}

impl PgOrderLedger {
    /// Create a ledger whose operations fail with
    /// [`RepositoryError::Timeout`] after `timeout`.
    #[must_use]
    pub const fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T>(
        &self,
        operation: impl Future<Output = Result<T, RepositoryError>> + Send,
    ) -> Result<T, RepositoryError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| RepositoryError::Timeout(self.timeout))?
    }

    async fn load_one(&self, row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id = row.id;
        let items = collect_items(fetch_items(&self.pool, &[id.as_i32()]).await?)?
            .remove(&id)
            .unwrap_or_default();
        Ok(Some(row.into_order(items)))
    }

    async fn insert(&self, order: NewOrder) -> Result<CreateOutcome, RepositoryError> {
        let total = order
            .total()
            .ok_or_else(|| RepositoryError::InvalidOrder("order total overflows".to_string()))?;
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO fulfillment."order" (
                user_id, total, shipping_address, notes, status, payment_status,
                checkout_session_id, payment_reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (checkout_session_id) DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id)
        .bind(total)
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.notes.as_deref())
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.checkout_session_id.as_deref())
        .bind(order.payment_reference.as_deref())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            let session_id = order.checkout_session_id.unwrap_or_default();
            return match self.find_by_session(&session_id).await? {
                Some(existing) => Ok(CreateOutcome::AlreadyExists(existing)),
                None => Err(RepositoryError::Conflict(format!(
                    "checkout session {session_id} conflicted but no order was found"
                ))),
            };
        };

        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| {
                RepositoryError::DataCorruption("too many line items".to_string())
            })?;
            sqlx::query(
                r"
                INSERT INTO fulfillment.order_line_item (
                    order_id, position, product_id, quantity, unit_price, line_total,
                    flavor_ids, custom_pack_label
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(row.id)
            .bind(position)
            .bind(item.product_id)
            .bind(quantity_column(item)?)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.flavor_ids.iter().map(FlavorId::as_i32).collect::<Vec<_>>())
            .bind(item.custom_pack_label.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        if row.payment_status == PaymentStatus::Paid {
            decrement_inventory(&mut tx, &order.items).await?;
        }

        tx.commit().await?;
        Ok(CreateOutcome::Created(row.into_order(order.items)))
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"SELECT {ORDER_COLUMNS} FROM fulfillment."order" WHERE checkout_session_id = $1"#
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        self.load_one(row).await
    }

    async fn apply_update(
        &self,
        id: OrderId,
        patch: OrderPatch,
        guard: UpdateGuard,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"SELECT {ORDER_COLUMNS} FROM fulfillment."order" WHERE id = $1 FOR UPDATE"#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let row = row.ok_or(RepositoryError::NotFound)?;

        let items = fetch_items(&mut *tx, &[id.as_i32()]).await?;
        let mut order = row.into_order(collect_items(items)?.remove(&id).unwrap_or_default());

        if !guard.allows(&order) {
            tx.rollback().await?;
            return Ok(UpdateOutcome::Skipped(order));
        }

        let became_paid = patch.apply(&mut order, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE fulfillment."order"
            SET status = $2,
                payment_status = $3,
                shipping_address = $4,
                shipment_id = $5,
                checkout_session_id = $6,
                payment_reference = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.shipment_id.as_deref())
        .bind(order.checkout_session_id.as_deref())
        .bind(order.payment_reference.as_deref())
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(ref db_err)) = result
            && db_err.is_unique_violation()
        {
            return Err(RepositoryError::Conflict(format!(
                "checkout session already belongs to another order (order {id})"
            )));
        }
        result?;

        if became_paid {
            decrement_inventory(&mut tx, &order.items).await?;
        }

        tx.commit().await?;
        Ok(UpdateOutcome::Applied(order))
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM fulfillment."order"
            WHERE payment_status = $1
            ORDER BY created_at, id
            "#
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i32> = rows.iter().map(|row| row.id.as_i32()).collect();
        let mut items = collect_items(fetch_items(&self.pool, &ids).await?)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect())
    }
}

impl OrderLedger for PgOrderLedger {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.timed(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.timed(async {
            let row: Option<OrderRow> = sqlx::query_as(&format!(
                r#"SELECT {ORDER_COLUMNS} FROM fulfillment."order" WHERE id = $1"#
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            self.load_one(row).await
        })
        .await
    }

    #[instrument(skip(self, order), fields(checkout_session_id = ?order.checkout_session_id))]
    async fn create(&self, order: NewOrder) -> Result<CreateOutcome, RepositoryError> {
        self.timed(self.insert(order)).await
    }

    #[instrument(skip(self, patch), fields(order_id = %id, guard = ?guard))]
    async fn update(
        &self,
        id: OrderId,
        patch: OrderPatch,
        guard: UpdateGuard,
    ) -> Result<UpdateOutcome, RepositoryError> {
        self.timed(self.apply_update(id, patch, guard)).await
    }

    #[instrument(skip(self))]
    async fn list_by_payment_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Order>, RepositoryError> {
        self.timed(self.list_by_status(status)).await
    }

    async fn has_processed_event(&self, event_id: &str) -> Result<bool, RepositoryError> {
        self.timed(async {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM fulfillment.processed_event WHERE event_id = $1)",
            )
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        })
        .await
    }

    async fn record_processed_event(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<OrderId>,
    ) -> Result<bool, RepositoryError> {
        self.timed(async {
            let result = sqlx::query(
                r"
                INSERT INTO fulfillment.processed_event (event_id, event_type, order_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (event_id) DO NOTHING
                ",
            )
            .bind(event_id)
            .bind(event_type)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn fetch_items<'e>(
    executor: impl PgExecutor<'e>,
    order_ids: &[i32],
) -> Result<Vec<LineItemRow>, RepositoryError> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as(
        r"
        SELECT order_id, product_id, quantity, unit_price, line_total, flavor_ids, custom_pack_label
        FROM fulfillment.order_line_item
        WHERE order_id = ANY($1)
        ORDER BY order_id, position
        ",
    )
    .bind(order_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

fn collect_items(
    rows: Vec<LineItemRow>,
) -> Result<HashMap<OrderId, Vec<LineItem>>, RepositoryError> {
    let mut grouped: HashMap<OrderId, Vec<LineItem>> = HashMap::new();
    for row in rows {
        let order_id = row.order_id;
        grouped
            .entry(order_id)
            .or_default()
            .push(LineItem::try_from(row)?);
    }
    Ok(grouped)
}

fn quantity_column(item: &LineItem) -> Result<i32, RepositoryError> {
    i32::try_from(item.quantity).map_err(|_| {
        RepositoryError::DataCorruption(format!(
            "quantity {} for product {} does not fit the ledger",
            item.quantity, item.product_id
        ))
    })
}

async fn decrement_inventory(
    tx: &mut Transaction<'_, Postgres>,
    items: &[LineItem],
) -> Result<(), RepositoryError> {
    for item in items {
        sqlx::query(
            r"
            UPDATE fulfillment.product_inventory
            SET quantity_on_hand = quantity_on_hand - $2, updated_at = now()
            WHERE product_id = $1
            ",
        )
        .bind(item.product_id)
        .bind(quantity_column(item)?)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
