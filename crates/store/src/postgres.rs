use async_trait::async_trait;
use chrono::Utc;
use common::{
    AddressId, CartId, CartItemId, OrderId, OrderItemId, OrderStatus, PaymentStatus, ProductId,
    ShopId, UserId,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AddressRecord, CartLine, CartRecord, CheckoutCommit, Milestone, OrderItemDetails,
    OrderItemRecord, OrderRecord, OrderSummary, PostalAddress, ProductQuery, ProductRecord,
    Result, ShopRecord, StatusChange, StoreError, UserRecord,
    store::{AddressStore, CartStore, CommerceStore, OrderStore, ProductStore, UserStore},
};

macro_rules! order_columns {
    () => {
        "id, user_id, order_number, status, payment_status, payment_method, \
         shipping_address_id, billing_address_id, subtotal, shipping_cost, tax, discount, \
         total, payment_session_id, notes, created_at, updated_at, confirmed_at, shipped_at, \
         delivered_at"
    };
}

macro_rules! product_columns {
    () => {
        "id, shop_id, name, sku, price, stock_quantity, is_active, created_at, updated_at"
    };
}

macro_rules! address_columns {
    () => {
        "id, user_id, full_name, phone, address_line1, address_line2, city, state, postal_code, \
         country, is_default, address_type, created_at, updated_at"
    };
}

macro_rules! cart_line_select {
    () => {
        "SELECT ci.id, ci.cart_id, ci.product_id, ci.quantity, ci.created_at, ci.updated_at, \
                p.name AS product_name, p.sku AS product_sku, p.price AS product_price, \
                p.stock_quantity, p.is_active, p.shop_id, s.name AS shop_name \
         FROM cart_items ci \
         JOIN products p ON p.id = ci.product_id \
         JOIN shops s ON s.id = p.shop_id"
    };
}

macro_rules! order_summary_select {
    () => {
        "SELECT o.id, o.order_number, o.status, o.payment_status, o.total, o.created_at, \
                (SELECT COUNT(*) FROM order_items oi WHERE oi.order_id = o.id) AS item_count \
         FROM orders o"
    };
}

/// PostgreSQL-backed commerce store.
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
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_user(row: PgRow) -> Result<UserRecord> {
        Ok(UserRecord {
            id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            role: row.try_get::<String, _>("role")?.parse()?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_shop(row: PgRow) -> Result<ShopRecord> {
        Ok(ShopRecord {
            id: ShopId::from_uuid(row.try_get::<Uuid, _>("id")?),
            vendor_id: UserId::from_uuid(row.try_get::<Uuid, _>("vendor_id")?),
            name: row.try_get("name")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<ProductRecord> {
        Ok(ProductRecord {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            shop_id: ShopId::from_uuid(row.try_get::<Uuid, _>("shop_id")?),
            name: row.try_get("name")?,
            sku: row.try_get("sku")?,
            price: row.try_get("price")?,
            stock_quantity: row.try_get("stock_quantity")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_cart(row: PgRow) -> Result<CartRecord> {
        Ok(CartRecord {
            id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
        Ok(CartLine {
            id: CartItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            product_name: row.try_get("product_name")?,
            product_sku: row.try_get("product_sku")?,
            product_price: row.try_get("product_price")?,
            stock_quantity: row.try_get("stock_quantity")?,
            is_active: row.try_get("is_active")?,
            shop_id: ShopId::from_uuid(row.try_get::<Uuid, _>("shop_id")?),
            shop_name: row.try_get("shop_name")?,
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_address(row: PgRow) -> Result<AddressRecord> {
        Ok(AddressRecord {
            id: AddressId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            postal: PostalAddress {
                full_name: row.try_get("full_name")?,
                phone: row.try_get("phone")?,
                address_line1: row.try_get("address_line1")?,
                address_line2: row.try_get("address_line2")?,
                city: row.try_get("city")?,
                state: row.try_get("state")?,
                postal_code: row.try_get("postal_code")?,
                country: row.try_get("country")?,
            },
            is_default: row.try_get("is_default")?,
            address_type: row.try_get::<String, _>("address_type")?.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            order_number: row.try_get("order_number")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            payment_method: row.try_get::<String, _>("payment_method")?.parse()?,
            shipping_address_id: row
                .try_get::<Option<Uuid>, _>("shipping_address_id")?
                .map(AddressId::from_uuid),
            billing_address_id: row
                .try_get::<Option<Uuid>, _>("billing_address_id")?
                .map(AddressId::from_uuid),
            subtotal: row.try_get("subtotal")?,
            shipping_cost: row.try_get("shipping_cost")?,
            tax: row.try_get("tax")?,
            discount: row.try_get("discount")?,
            total: row.try_get("total")?,
            payment_session_id: row.try_get("payment_session_id")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
            shipped_at: row.try_get("shipped_at")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }

    fn row_to_summary(row: PgRow) -> Result<OrderSummary> {
        Ok(OrderSummary {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            item_count: row.try_get("item_count")?,
            total: row.try_get("total")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_order_item(row: PgRow) -> Result<OrderItemDetails> {
        Ok(OrderItemDetails {
            item: OrderItemRecord {
                id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
                order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                shop_id: ShopId::from_uuid(row.try_get::<Uuid, _>("shop_id")?),
                product_name: row.try_get("product_name")?,
                product_sku: row.try_get("product_sku")?,
                quantity: row.try_get("quantity")?,
                unit_price: row.try_get("unit_price")?,
                subtotal: row.try_get("subtotal")?,
                created_at: row.try_get("created_at")?,
            },
            shop_name: row.try_get("shop_name")?,
        })
    }

    /// Returns the current status of an order, for reporting a lost compare-and-set.
    async fn current_status(conn: &mut PgConnection, order_id: OrderId) -> Result<OrderStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        match status {
            Some(status) => Ok(status.parse()?),
            None => Err(StoreError::not_found("order", order_id)),
        }
    }

    /// Conditional decrement. Leaves the row untouched when stock is short.
    async fn reserve_in(
        conn: &mut PgConnection,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<()> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }

        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $1, updated_at = NOW()
            WHERE id = $2 AND stock_quantity >= $1
            "#,
        )
        .bind(quantity)
        .bind(product_id.as_uuid())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let available: Option<i32> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;

        match available {
            Some(available) => Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            }),
            None => Err(StoreError::not_found("product", product_id)),
        }
    }

    async fn release_in(
        conn: &mut PgConnection,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<()> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }

        let result = sqlx::query(
            "UPDATE products SET stock_quantity = stock_quantity + $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(quantity)
        .bind(product_id.as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(|e| quantity_overflow(e, quantity))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", product_id));
        }
        Ok(())
    }

    async fn insert_address_in(conn: &mut PgConnection, address: &AddressRecord) -> Result<()> {
        if address.is_default {
            sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1 AND is_default")
                .bind(address.user_id.as_uuid())
                .execute(&mut *conn)
                .await?;
        }

        sqlx::query(concat!(
            "INSERT INTO addresses (",
            address_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(address.id.as_uuid())
        .bind(address.user_id.as_uuid())
        .bind(&address.postal.full_name)
        .bind(&address.postal.phone)
        .bind(&address.postal.address_line1)
        .bind(&address.postal.address_line2)
        .bind(&address.postal.city)
        .bind(&address.postal.state)
        .bind(&address.postal.postal_code)
        .bind(&address.postal.country)
        .bind(address.is_default)
        .bind(address.address_type.as_str())
        .bind(address.created_at)
        .bind(address.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Maps a unique-constraint violation to `Duplicate`, anything else to `Database`.
fn unique_violation(e: sqlx::Error, constraint: &str, what: String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.constraint() == Some(constraint)
    {
        return StoreError::Duplicate(what);
    }
    StoreError::Database(e)
}

/// Maps an integer overflow on a quantity column to `QuantityOverflow`.
fn quantity_overflow(e: sqlx::Error, added: i32) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.code().as_deref() == Some("22003")
    {
        return StoreError::QuantityOverflow(added);
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn upsert_user(&self, user: UserRecord) -> Result<UserRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO UPDATE SET
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                deleted_at = NULL
            RETURNING id, external_id, email, role, created_at
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_user(row)
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRecord>> {
        sqlx::query(
            r#"
            SELECT id, external_id, email, role, created_at FROM users
            WHERE external_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_user)
        .transpose()
    }

    async fn deactivate_user(&self, external_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW() WHERE external_id = $1 AND deleted_at IS NULL",
        )
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProductStore for PostgresStore {
    async fn insert_shop(&self, shop: ShopRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO shops (id, vendor_id, name, is_active, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(shop.id.as_uuid())
        .bind(shop.vendor_id.as_uuid())
        .bind(&shop.name)
        .bind(shop.is_active)
        .bind(shop.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(e, "unique_shop_vendor", format!("shop for vendor {}", shop.vendor_id))
        })?;
        Ok(())
    }

    async fn shop_for_vendor(&self, vendor_id: UserId) -> Result<Option<ShopRecord>> {
        sqlx::query(
            r#"
            SELECT id, vendor_id, name, is_active, created_at
            FROM shops
            WHERE vendor_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(vendor_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_shop)
        .transpose()
    }

    async fn insert_product(&self, product: ProductRecord) -> Result<()> {
        if product.stock_quantity < 0 {
            return Err(StoreError::InvalidQuantity(product.stock_quantity));
        }

        sqlx::query(concat!(
            "INSERT INTO products (",
            product_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(product.id.as_uuid())
        .bind(product.shop_id.as_uuid())
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.price)
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        sqlx::query(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE id = $1"
        ))
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_product)
        .transpose()
    }

    async fn list_products(&self, query: ProductQuery) -> Result<Vec<ProductRecord>> {
        let mut sql = String::from(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE is_active"
        ));
        let mut param_count = 0;

        // Build dynamic query
        if query.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND name ILIKE ${param_count}"));
        }
        if query.min_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price >= ${param_count}"));
        }
        if query.max_price.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND price <= ${param_count}"));
        }
        if query.shop_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND shop_id = ${param_count}"));
        }

        sql.push_str(&format!(" ORDER BY {}", query.sort.order_by()));

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(search) = query.search {
            sqlx_query = sqlx_query.bind(format!("%{search}%"));
        }
        if let Some(min_price) = query.min_price {
            sqlx_query = sqlx_query.bind(min_price);
        }
        if let Some(max_price) = query.max_price {
            sqlx_query = sqlx_query.bind(max_price);
        }
        if let Some(shop_id) = query.shop_id {
            sqlx_query = sqlx_query.bind(shop_id.as_uuid());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn reserve_stock(&self, product_id: ProductId, quantity: i32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::reserve_in(&mut conn, product_id, quantity).await
    }

    async fn release_stock(&self, product_id: ProductId, quantity: i32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::release_in(&mut conn, product_id, quantity).await
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<CartRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO carts (id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING id, user_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_cart(row)
    }

    async fn find_cart(&self, user_id: UserId) -> Result<Option<CartRecord>> {
        sqlx::query("SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_cart)
            .transpose()
    }

    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(concat!(
            cart_line_select!(),
            " WHERE ci.cart_id = $1 ORDER BY ci.created_at ASC"
        ))
        .bind(cart_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_cart_line).collect()
    }

    async fn cart_line(&self, cart_id: CartId, item_id: CartItemId) -> Result<Option<CartLine>> {
        sqlx::query(concat!(
            cart_line_select!(),
            " WHERE ci.cart_id = $1 AND ci.id = $2"
        ))
        .bind(cart_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_cart_line)
        .transpose()
    }

    async fn upsert_cart_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItemId> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO cart_items (id, cart_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cart_id, product_id) DO UPDATE SET
                quantity = cart_items.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cart_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| quantity_overflow(e, quantity))?;

        Ok(CartItemId::from_uuid(id))
    }

    async fn set_cart_item_quantity(&self, item_id: CartItemId, quantity: i32) -> Result<()> {
        let result =
            sqlx::query("UPDATE cart_items SET quantity = $1, updated_at = NOW() WHERE id = $2")
                .bind(quantity)
                .bind(item_id.as_uuid())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("cart item", item_id));
        }
        Ok(())
    }

    async fn remove_cart_item(&self, item_id: CartItemId) -> Result<()> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(item_id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("cart item", item_id));
        }
        Ok(())
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AddressStore for PostgresStore {
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<AddressRecord>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            address_columns!(),
            " FROM addresses WHERE user_id = $1 ORDER BY is_default DESC, created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_address).collect()
    }

    async fn get_address(&self, address_id: AddressId) -> Result<Option<AddressRecord>> {
        sqlx::query(concat!(
            "SELECT ",
            address_columns!(),
            " FROM addresses WHERE id = $1"
        ))
        .bind(address_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_address)
        .transpose()
    }

    async fn default_address(&self, user_id: UserId) -> Result<Option<AddressRecord>> {
        sqlx::query(concat!(
            "SELECT ",
            address_columns!(),
            " FROM addresses WHERE user_id = $1 AND is_default"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_address)
        .transpose()
    }

    async fn insert_address(&self, address: AddressRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_address_in(&mut tx, &address).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_address(
        &self,
        address_id: AddressId,
        postal: PostalAddress,
    ) -> Result<AddressRecord> {
        sqlx::query(concat!(
            r#"
            UPDATE addresses SET
                full_name = $1, phone = $2, address_line1 = $3, address_line2 = $4,
                city = $5, state = $6, postal_code = $7, country = $8, updated_at = NOW()
            WHERE id = $9
            RETURNING "#,
            address_columns!()
        ))
        .bind(&postal.full_name)
        .bind(&postal.phone)
        .bind(&postal.address_line1)
        .bind(&postal.address_line2)
        .bind(&postal.city)
        .bind(&postal.state)
        .bind(&postal.postal_code)
        .bind(&postal.country)
        .bind(address_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_address)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("address", address_id))
    }

    async fn delete_address(&self, address_id: AddressId) -> Result<()> {
        let result = sqlx::query("DELETE FROM addresses WHERE id = $1")
            .bind(address_id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("address", address_id));
        }
        Ok(())
    }

    async fn set_default_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE addresses SET is_default = TRUE, updated_at = NOW() WHERE id = $1 AND user_id = $2",
        )
        .bind(address_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("address", address_id));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_order)
        .transpose()
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderSummary>> {
        let rows = sqlx::query(concat!(
            order_summary_select!(),
            " WHERE o.user_id = $1 ORDER BY o.created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_summary).collect()
    }

    async fn list_orders_for_shop(&self, shop_id: ShopId) -> Result<Vec<OrderSummary>> {
        let rows = sqlx::query(concat!(
            order_summary_select!(),
            " WHERE EXISTS (SELECT 1 FROM order_items oi WHERE oi.order_id = o.id AND oi.shop_id = $1)",
            " ORDER BY o.created_at DESC"
        ))
        .bind(shop_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_summary).collect()
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemDetails>> {
        let rows = sqlx::query(
            r#"
            SELECT oi.id, oi.order_id, oi.product_id, oi.shop_id, oi.product_name, oi.product_sku,
                   oi.quantity, oi.unit_price, oi.subtotal, oi.created_at, s.name AS shop_name
            FROM order_items oi
            JOIN shops s ON s.id = oi.shop_id
            WHERE oi.order_id = $1
            ORDER BY oi.created_at ASC, oi.product_name ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order_item).collect()
    }

    async fn order_contains_shop(&self, order_id: OrderId, shop_id: ShopId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM order_items WHERE order_id = $1 AND shop_id = $2)",
        )
        .bind(order_id.as_uuid())
        .bind(shop_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn set_payment_session(&self, order_id: OrderId, session_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET payment_session_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(session_id)
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(e, "unique_payment_session", format!("payment session {session_id}"))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("order", order_id));
        }
        Ok(())
    }

    async fn find_order_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderRecord>> {
        sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE payment_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_order)
        .transpose()
    }

    async fn apply_status_change(&self, change: StatusChange) -> Result<OrderRecord> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query(concat!(
            r#"
            UPDATE orders SET
                status = $1,
                updated_at = $2,
                payment_status = COALESCE($3::text, payment_status),
                confirmed_at = CASE WHEN $4 THEN COALESCE(confirmed_at, $2) ELSE confirmed_at END,
                shipped_at = CASE WHEN $5 THEN COALESCE(shipped_at, $2) ELSE shipped_at END,
                delivered_at = CASE WHEN $6 THEN COALESCE(delivered_at, $2) ELSE delivered_at END
            WHERE id = $7 AND status = $8
            RETURNING "#,
            order_columns!()
        ))
        .bind(change.to.as_str())
        .bind(change.at)
        .bind(change.payment_status.map(|p| p.as_str()))
        .bind(change.stamp == Some(Milestone::Confirmed))
        .bind(change.stamp == Some(Milestone::Shipped))
        .bind(change.stamp == Some(Milestone::Delivered))
        .bind(change.order_id.as_uuid())
        .bind(change.from.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => {
                let actual = Self::current_status(&mut conn, change.order_id).await?;
                Err(StoreError::StatusConflict {
                    order_id: change.order_id,
                    expected: change.from,
                    actual,
                })
            }
        }
    }

    async fn set_payment_status(
        &self,
        order_id: OrderId,
        payment_status: PaymentStatus,
    ) -> Result<OrderRecord> {
        sqlx::query(concat!(
            "UPDATE orders SET payment_status = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            order_columns!()
        ))
        .bind(payment_status.as_str())
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_order)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("order", order_id))
    }
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<OrderRecord> {
        // Start a transaction; dropping it on any error rolls everything back.
        let mut tx = self.pool.begin().await?;

        for address in &commit.new_addresses {
            Self::insert_address_in(&mut tx, address).await?;
        }

        let order = &commit.order;
        sqlx::query(concat!(
            "INSERT INTO orders (",
            order_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        ))
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.shipping_address_id.map(|id| id.as_uuid()))
        .bind(order.billing_address_id.map(|id| id.as_uuid()))
        .bind(order.subtotal)
        .bind(order.shipping_cost)
        .bind(order.tax)
        .bind(order.discount)
        .bind(order.total)
        .bind(&order.payment_session_id)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.confirmed_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                "unique_order_number",
                format!("order number {}", order.order_number),
            )
        })?;

        for item in &commit.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, shop_id, product_name, product_sku,
                                         quantity, unit_price, subtotal, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.shop_id.as_uuid())
            .bind(&item.product_name)
            .bind(&item.product_sku)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for item in &commit.items {
            Self::reserve_in(&mut tx, item.product_id, item.quantity).await?;
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(commit.cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(commit.cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(commit.order)
    }

    async fn commit_cancellation(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
    ) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        // Lock the order row so a concurrent cancellation waits for this one.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let actual: OrderStatus = status
            .ok_or_else(|| StoreError::not_found("order", order_id))?
            .parse()?;
        if actual != expected {
            return Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual,
            });
        }

        let lines = sqlx::query("SELECT product_id, quantity FROM order_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&mut *tx)
            .await?;
        for line in lines {
            let product_id = ProductId::from_uuid(line.try_get::<Uuid, _>("product_id")?);
            Self::release_in(&mut tx, product_id, line.try_get("quantity")?).await?;
        }

        let row = sqlx::query(concat!(
            "UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 RETURNING ",
            order_columns!()
        ))
        .bind(OrderStatus::Cancelled.as_str())
        .bind(Utc::now())
        .bind(order_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;
        let order = Self::row_to_order(row)?;

        tx.commit().await?;
        Ok(order)
    }
}
