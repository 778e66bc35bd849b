use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqliteExecutor, SqlitePool,
};

use crate::{
    errors::AppError,
    structs::{BillItemRow, BillStatus, MonthlyBill, PublicUser, User},
};

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, AppError> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .read_only(false)
        .busy_timeout(Duration::from_secs(5));

    let mut pool_opts = SqlitePoolOptions::new().max_connections(max_connections);
    if database_url.contains(":memory:") {
        // every connection to :memory: is a separate database
        pool_opts = pool_opts
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = pool_opts.connect_with(opts).await?;

    sqlx::migrate!().run(&pool).await?;
    log::info!("Database migrated successfully");
    Ok(pool)
}

pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

fn map_unique(e: sqlx::Error, message: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(message.to_owned())
        }
        _ => AppError::DatabaseError(e),
    }
}

// users

pub async fn get_all_users(pool: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn get_user_by_id<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_user_by_account_id(
    pool: &SqlitePool,
    account_id: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE account_id = $1")
        .bind(account_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_public_user<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<PublicUser>, sqlx::Error> {
    sqlx::query_as::<_, PublicUser>("SELECT id, name, account_id FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    account_id: &str,
    pwd_hash: &str,
) -> Result<User, AppError> {
    let created_at = Utc::now();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, account_id, pwd_hash, token_version, created_at, updated_at) VALUES ($1, $2, $3, 0, $4, $5) RETURNING *",
    )
    .bind(name)
    .bind(account_id)
    .bind(pwd_hash)
    .bind(created_at)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .map_err(|e| map_unique(e, "Account ID already exists"))?;
    log::info!("User created: id={} account_id={}", user.id, user.account_id);
    Ok(user)
}

pub async fn bump_token_version(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET token_version = token_version + 1, updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// revoked tokens

pub async fn revoke_token(
    pool: &SqlitePool,
    jti: &str,
    user_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_token_revoked(pool: &SqlitePool, jti: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT jti FROM revoked_tokens WHERE jti = $1")
        .bind(jti)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn purge_expired_revocations(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < $1")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// bills

pub async fn get_bill_by_id<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<Option<MonthlyBill>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyBill>("SELECT * FROM monthly_bills WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn find_bill_by_period<'e>(
    executor: impl SqliteExecutor<'e>,
    year: i64,
    month: i64,
) -> Result<Option<MonthlyBill>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyBill>("SELECT * FROM monthly_bills WHERE year = $1 AND month = $2")
        .bind(year)
        .bind(month)
        .fetch_optional(executor)
        .await
}

pub async fn list_bills_for_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<MonthlyBill>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyBill>(
        "SELECT * FROM monthly_bills WHERE requester_id = $1 OR payer_id = $2 ORDER BY year DESC, month DESC",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_bill<'e>(
    executor: impl SqliteExecutor<'e>,
    year: i64,
    month: i64,
    requester_id: i64,
    payer_id: i64,
) -> Result<MonthlyBill, AppError> {
    let created_at = Utc::now();
    sqlx::query_as::<_, MonthlyBill>(
        "INSERT INTO monthly_bills (year, month, requester_id, payer_id, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(year)
    .bind(month)
    .bind(requester_id)
    .bind(payer_id)
    .bind(BillStatus::Pending)
    .bind(created_at)
    .bind(created_at)
    .fetch_one(executor)
    .await
    .map_err(|e| map_unique(e, "A bill for this month already exists"))
}

pub async fn insert_item<'e>(
    executor: impl SqliteExecutor<'e>,
    bill_id: i64,
    item_name: &str,
    amount: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO bill_items (bill_id, item_name, amount, created_at) VALUES ($1, $2, $3, $4)")
        .bind(bill_id)
        .bind(item_name)
        .bind(amount)
        .bind(Utc::now())
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn get_items<'e>(
    executor: impl SqliteExecutor<'e>,
    bill_id: i64,
) -> Result<Vec<BillItemRow>, sqlx::Error> {
    sqlx::query_as::<_, BillItemRow>(
        "SELECT id, bill_id, item_name, amount FROM bill_items WHERE bill_id = $1 ORDER BY id",
    )
    .bind(bill_id)
    .fetch_all(executor)
    .await
}

pub async fn delete_items<'e>(
    executor: impl SqliteExecutor<'e>,
    bill_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM bill_items WHERE bill_id = $1")
        .bind(bill_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn touch_bill<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE monthly_bills SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_requested<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<MonthlyBill, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, MonthlyBill>(
        "UPDATE monthly_bills SET status = $1, requested_at = $2, updated_at = $3 WHERE id = $4 AND status = $5 RETURNING *",
    )
    .bind(BillStatus::Requested)
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(BillStatus::Pending)
    .fetch_one(executor)
    .await
}

pub async fn mark_paid<'e>(
    executor: impl SqliteExecutor<'e>,
    id: i64,
) -> Result<MonthlyBill, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, MonthlyBill>(
        "UPDATE monthly_bills SET status = $1, paid_at = $2, updated_at = $3 WHERE id = $4 AND status = $5 RETURNING *",
    )
    .bind(BillStatus::Paid)
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(BillStatus::Requested)
    .fetch_one(executor)
    .await
}

pub async fn delete_bill<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM monthly_bills WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn count_items(pool: &SqlitePool, bill_id: i64) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bill_items WHERE bill_id = $1")
        .bind(bill_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
