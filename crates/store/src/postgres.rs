//! PostgreSQL storage adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CredentialId, OrderId, OrderItemId, UserId};
use domain::{
    CredentialLink, CredentialRecord, Order, OrderItem, OrderStatus, PaymentMethod, Points,
    ProductId, ProductSummary,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::StoreError;
use crate::ports::{BalanceLedger, CredentialStore, OrderLedger, ProductCatalog};
use crate::Result;

/// PostgreSQL-backed implementation of all storage ports.
///
/// Claiming credentials and debiting balances are single conditional
/// `UPDATE` statements, so contention between concurrent checkouts is
/// resolved by the database's row-level atomicity and reported back as
/// an affected-row count.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_credential(row: PgRow) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            id: CredentialId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            email: row.try_get("email")?,
            password: row.try_get("password")?,
            is_sold: row.try_get("is_sold")?,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            created_at: row.try_get("created_at")?,
            sold_at: row.try_get("sold_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_method: String = row.try_get("payment_method")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            user_email: row.try_get("user_email")?,
            total: Points::new(row.try_get("total")?),
            status: status.parse::<OrderStatus>().map_err(StoreError::Backend)?,
            payment_method: payment_method
                .parse::<PaymentMethod>()
                .map_err(StoreError::Backend)?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            cancelled_reason: row.try_get("cancelled_reason")?,
        })
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn insert_credential(&self, credential: CredentialRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, product_id, email, password, is_sold, order_id, created_at, sold_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(credential.id.as_uuid())
        .bind(credential.product_id.as_str())
        .bind(&credential.email)
        .bind(&credential.password)
        .bind(credential.is_sold)
        .bind(credential.order_id.map(|id| id.as_uuid()))
        .bind(credential.created_at)
        .bind(credential.sold_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_credential(&self, id: CredentialId) -> Result<Option<CredentialRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, email, password, is_sold, order_id, created_at, sold_at
            FROM credentials
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_credential).transpose()
    }

    async fn count_unsold(&self, product_id: &ProductId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credentials WHERE product_id = $1 AND is_sold = FALSE",
        )
        .bind(product_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    async fn unsold_oldest_first(
        &self,
        product_id: &ProductId,
        limit: u32,
    ) -> Result<Vec<CredentialRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, email, password, is_sold, order_id, created_at, sold_at
            FROM credentials
            WHERE product_id = $1 AND is_sold = FALSE
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_credential).collect()
    }

    async fn claim(
        &self,
        ids: &[CredentialId],
        order_id: OrderId,
        sold_at: DateTime<Utc>,
    ) -> Result<usize> {
        let uuids: Vec<Uuid> = ids.iter().map(CredentialId::as_uuid).collect();
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET is_sold = TRUE, order_id = $1, sold_at = $2
            WHERE id = ANY($3) AND is_sold = FALSE
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(sold_at)
        .bind(&uuids)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() as usize;
        if claimed < ids.len() {
            tracing::debug!(%order_id, requested = ids.len(), claimed, "partial credential claim");
        }
        metrics::counter!("store_credentials_claimed").increment(claimed as u64);
        Ok(claimed)
    }

    async fn release(&self, ids: &[CredentialId], order_id: OrderId) -> Result<usize> {
        let uuids: Vec<Uuid> = ids.iter().map(CredentialId::as_uuid).collect();
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET is_sold = FALSE, order_id = NULL, sold_at = NULL
            WHERE id = ANY($1) AND order_id = $2
            "#,
        )
        .bind(&uuids)
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected() as usize;
        metrics::counter!("store_credentials_released").increment(released as u64);
        Ok(released)
    }
}

#[async_trait]
impl OrderLedger for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, user_email, total, status, payment_method,
                                created_at, completed_at, cancelled_at, cancelled_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.user_email)
        .bind(order.total.amount())
        .bind(order.status.as_str())
        .bind(order.payment_method.to_string())
        .bind(order.created_at)
        .bind(order.completed_at)
        .bind(order.cancelled_at)
        .bind(order.cancelled_reason.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_items(&self, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, name, price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(&item.name)
            .bind(item.price.amount())
            .bind(item.quantity as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        // Items and links go with it via ON DELETE CASCADE.
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_credentials(&self, links: &[CredentialLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for link in links {
            sqlx::query(
                r#"
                INSERT INTO order_item_credentials (order_item_id, credential_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(link.order_item_id.as_uuid())
            .bind(link.credential_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_processing(&self, order_id: OrderId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'processing' WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_order(order_id).await?;
        }
        Ok(())
    }

    async fn mark_completed(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'completed', completed_at = $2
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_order(order_id).await?;
        }
        Ok(())
    }

    async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'cancelled', cancelled_at = $2, cancelled_reason = $3
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_order(order_id).await?;
        }
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, user_email, total, status, payment_method,
                   created_at, completed_at, cancelled_at, cancelled_reason
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.order_id, i.product_id, i.name, i.price, i.quantity,
                   COALESCE(
                       ARRAY_AGG(l.credential_id) FILTER (WHERE l.credential_id IS NOT NULL),
                       '{}'
                   ) AS credential_ids
            FROM order_items i
            LEFT JOIN order_item_credentials l ON l.order_item_id = i.id
            WHERE i.order_id = $1
            GROUP BY i.id, i.order_id, i.product_id, i.name, i.price, i.quantity
            ORDER BY i.product_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OrderItem {
                    id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    name: row.try_get("name")?,
                    price: Points::new(row.try_get("price")?),
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    credential_ids: row
                        .try_get::<Vec<Uuid>, _>("credential_ids")?
                        .into_iter()
                        .map(CredentialId::from_uuid)
                        .collect(),
                })
            })
            .collect()
    }
}

impl PostgresStore {
    async fn require_order(&self, order_id: OrderId) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::not_found("order", order_id))
        }
    }
}

#[async_trait]
impl BalanceLedger for PostgresStore {
    async fn balance(&self, user_id: UserId) -> Result<Points> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(Points::new(balance.unwrap_or(0)))
    }

    async fn credit(&self, user_id: UserId, amount: Points) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, balance)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET balance = users.balance + EXCLUDED.balance
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.amount())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_debit(&self, user_id: UserId, amount: Points) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET balance = balance - $2
            WHERE id = $1 AND balance >= $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.amount())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            tracing::debug!(%user_id, %amount, "debit rejected, balance below amount");
            metrics::counter!("store_debits_rejected").increment(1);
        }
        Ok(applied)
    }
}

#[async_trait]
impl ProductCatalog for PostgresStore {
    async fn upsert_product(&self, product_id: &ProductId, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(product_id.as_str())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<ProductSummary>> {
        let row = sqlx::query(
            r#"
            SELECT p.name,
                   EXISTS(SELECT 1 FROM credentials c WHERE c.product_id = p.id) AS has_pool,
                   (SELECT COUNT(*) FROM credentials c
                    WHERE c.product_id = p.id AND c.is_sold = FALSE) AS unsold
            FROM products p
            WHERE p.id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let has_pool: bool = row.try_get("has_pool")?;
        let unsold: i64 = row.try_get("unsold")?;

        Ok(Some(ProductSummary {
            id: product_id.clone(),
            name: row.try_get("name")?,
            stock: has_pool.then_some(unsold as u32),
        }))
    }
}
