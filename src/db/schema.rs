//! Idempotent schema bootstrap for the loyalty tables

use sqlx::PgPool;

/// Create tables and indexes if they do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, statement) in [
        ("orders", CREATE_ORDERS_TABLE),
        ("orders_pending_idx", CREATE_ORDERS_PENDING_INDEX),
        ("orders_user_idx", CREATE_ORDERS_USER_INDEX),
        ("balances", CREATE_BALANCES_TABLE),
        ("withdraw_history", CREATE_WITHDRAW_HISTORY_TABLE),
        ("withdraw_history_user_idx", CREATE_WITHDRAW_HISTORY_USER_INDEX),
    ] {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, error = %e, "Failed to create schema object");
            e
        })?;
    }

    tracing::info!("PostgreSQL schema initialized");
    Ok(())
}

// Order numbers stay VARCHAR: Luhn numbers may exceed BIGINT and keep leading zeros
const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id           BIGSERIAL PRIMARY KEY,
    user_login   VARCHAR(255) NOT NULL,
    order_number VARCHAR(64)  NOT NULL UNIQUE,
    status       VARCHAR(16)  NOT NULL DEFAULT 'NEW',
    accrual      NUMERIC(18, 2),
    created_at   TIMESTAMPTZ  NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ORDERS_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS orders_pending_idx
    ON orders (created_at, id)
    WHERE status IN ('NEW', 'PROCESSING')
"#;

const CREATE_ORDERS_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS orders_user_idx ON orders (user_login, created_at)
"#;

const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id            BIGSERIAL PRIMARY KEY,
    user_login    VARCHAR(255)   NOT NULL UNIQUE,
    current_sum   NUMERIC(18, 2) NOT NULL DEFAULT 0 CHECK (current_sum >= 0),
    withdrawn_sum NUMERIC(18, 2) NOT NULL DEFAULT 0 CHECK (withdrawn_sum >= 0)
)
"#;

const CREATE_WITHDRAW_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdraw_history (
    id           BIGSERIAL PRIMARY KEY,
    user_login   VARCHAR(255)   NOT NULL,
    order_number VARCHAR(64)    NOT NULL,
    amount       NUMERIC(18, 2) NOT NULL CHECK (amount > 0),
    created_at   TIMESTAMPTZ    NOT NULL DEFAULT NOW()
)
"#;

const CREATE_WITHDRAW_HISTORY_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS withdraw_history_user_idx
    ON withdraw_history (user_login, created_at)
"#;
