use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub account_id: String,
    #[serde(skip_serializing)]
    pub pwd_hash: String,
    #[serde(skip_serializing)]
    pub token_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User as exposed to other members of the household.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, FromRow)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub account_id: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            account_id: user.account_id.clone(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Requested,
    Paid,
}

impl std::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillStatus::Pending => "pending",
            BillStatus::Requested => "requested",
            BillStatus::Paid => "paid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MonthlyBill {
    pub id: i64,
    pub year: i64,
    pub month: i64,
    pub requester_id: i64,
    pub payer_id: i64,
    pub status: BillStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored line item. Amounts are kept as decimal text.
#[derive(Debug, Clone, FromRow)]
pub struct BillItemRow {
    pub id: i64,
    pub bill_id: i64,
    pub item_name: String,
    pub amount: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BillItem {
    pub id: i64,
    pub item_name: String,
    pub amount: Decimal,
}

#[derive(Serialize, Debug, Clone)]
pub struct BillResponse {
    pub id: i64,
    pub year: i64,
    pub month: i64,
    pub status: BillStatus,
    pub requester: PublicUser,
    pub payer: PublicUser,
    pub items: Vec<BillItem>,
    pub total_amount: Decimal,
    pub requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Login {
    pub account_id: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Register {
    pub name: String,
    pub account_id: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ItemInput {
    pub name: String,
    pub amount: Decimal,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateBill {
    pub year: i64,
    pub month: i64,
    pub payer_id: i64,
    #[serde(default)]
    pub items: Vec<ItemInput>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UpdateItems {
    pub items: Vec<ItemInput>,
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
