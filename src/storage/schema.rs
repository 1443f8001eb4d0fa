//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "request_id"]
    RequestId,
    #[iden = "buyer_id"]
    BuyerId,
    #[iden = "status"]
    Status,
    #[iden = "total_price"]
    TotalPrice,
    #[iden = "payment_method"]
    PaymentMethod,
    #[iden = "description"]
    Description,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "version"]
    Version,
}

/// Order items table schema.
#[derive(Iden)]
pub enum OrderItems {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "position"]
    Position,
    #[iden = "menu_item_id"]
    MenuItemId,
    #[iden = "menu_item_name"]
    MenuItemName,
    #[iden = "picture_url"]
    PictureUrl,
    #[iden = "unit_price"]
    UnitPrice,
    #[iden = "quantity"]
    Quantity,
    #[iden = "discount"]
    Discount,
}

/// Order status history table schema.
#[derive(Iden)]
pub enum OrderHistory {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "seq"]
    Seq,
    #[iden = "status"]
    Status,
    #[iden = "description"]
    Description,
    #[iden = "created_at"]
    CreatedAt,
}

/// Processed request ledger schema.
#[derive(Iden)]
pub enum ProcessedRequests {
    Table,
    #[iden = "request_id"]
    RequestId,
    #[iden = "command_type"]
    CommandType,
    #[iden = "result"]
    Result,
    #[iden = "created_at"]
    CreatedAt,
}

/// Payments table schema.
#[derive(Iden)]
pub enum Payments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "buyer_id"]
    BuyerId,
    #[iden = "amount"]
    Amount,
    #[iden = "currency"]
    Currency,
    #[iden = "status"]
    Status,
    #[iden = "transaction_id"]
    TransactionId,
    #[iden = "failure_reason"]
    FailureReason,
    #[iden = "failure_code"]
    FailureCode,
    #[iden = "event_id"]
    EventId,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "processed_at"]
    ProcessedAt,
}

/// Stock levels table schema.
#[derive(Iden)]
pub enum MenuStock {
    Table,
    #[iden = "menu_item_id"]
    MenuItemId,
    #[iden = "available"]
    Available,
}

/// Per-order reservation ledger schema.
#[derive(Iden)]
pub enum StockReservations {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "items"]
    Items,
    #[iden = "decision"]
    Decision,
    #[iden = "rejected_items"]
    RejectedItems,
    #[iden = "decided_at"]
    DecidedAt,
    #[iden = "released_at"]
    ReleasedAt,
}

/// SQL for creating the Order service tables.
pub const CREATE_ORDER_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL UNIQUE,
    buyer_id TEXT NOT NULL,
    status TEXT NOT NULL,
    total_price TEXT NOT NULL,
    payment_method TEXT,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id, id);
CREATE INDEX IF NOT EXISTS idx_orders_status_created ON orders(status, created_at);

CREATE TABLE IF NOT EXISTS order_items (
    order_id INTEGER NOT NULL REFERENCES orders(id),
    position INTEGER NOT NULL,
    menu_item_id INTEGER NOT NULL,
    menu_item_name TEXT NOT NULL,
    picture_url TEXT,
    unit_price TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity >= 1),
    discount TEXT NOT NULL,
    PRIMARY KEY (order_id, position)
);

CREATE TABLE IF NOT EXISTS order_history (
    order_id INTEGER NOT NULL REFERENCES orders(id),
    seq INTEGER NOT NULL,
    status TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (order_id, seq)
);

CREATE TABLE IF NOT EXISTS processed_requests (
    request_id TEXT PRIMARY KEY,
    command_type TEXT NOT NULL,
    result TEXT,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the payments table.
pub const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    id TEXT PRIMARY KEY,
    order_id INTEGER NOT NULL UNIQUE,
    buyer_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    currency TEXT NOT NULL,
    status TEXT NOT NULL,
    transaction_id TEXT,
    failure_reason TEXT,
    failure_code TEXT,
    event_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    processed_at TEXT
);
"#;

/// SQL for creating the Menu service stock tables.
pub const CREATE_STOCK_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS menu_stock (
    menu_item_id INTEGER PRIMARY KEY,
    available INTEGER NOT NULL CHECK (available >= 0)
);

CREATE TABLE IF NOT EXISTS stock_reservations (
    order_id INTEGER PRIMARY KEY,
    items TEXT NOT NULL,
    decision TEXT NOT NULL,
    rejected_items TEXT,
    decided_at TEXT NOT NULL,
    released_at TEXT
);
"#;
