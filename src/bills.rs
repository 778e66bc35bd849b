//! Monthly bill workflow.
//!
//! A bill moves `pending -> requested -> paid`. While pending, only the
//! requester may replace its items, request payment or delete it. Once
//! requested, only the payer may mark it paid. Paid bills are read-only.

use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::{
    db,
    errors::AppError,
    structs::{BillItem, BillResponse, BillStatus, CreateBill, ItemInput, MonthlyBill},
};

pub const MIN_YEAR: i64 = 2000;
pub const MAX_YEAR: i64 = 2100;
pub const MAX_ITEMS: usize = 100;
pub const MAX_ITEM_NAME_LENGTH: usize = 100;

const MAX_ITEM_AMOUNT: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

#[derive(Clone)]
pub struct BillService {
    pool: SqlitePool,
}

impl BillService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, requester_id: i64, form: CreateBill) -> Result<BillResponse, AppError> {
        validate_period(form.year, form.month)?;
        let items = validate_items(&form.items)?;

        if db::get_user_by_id(&self.pool, form.payer_id).await?.is_none() {
            return Err(AppError::Validation("Payer not found".into()));
        }
        if db::find_bill_by_period(&self.pool, form.year, form.month)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("A bill for this month already exists".into()));
        }

        let mut tx = self.pool.begin().await?;
        let bill = db::insert_bill(&mut *tx, form.year, form.month, requester_id, form.payer_id).await?;
        for item in &items {
            db::insert_item(&mut *tx, bill.id, &item.name, &item.amount.to_string()).await?;
        }
        tx.commit().await?;

        log::info!(target: "audit",
            "bill {} created for {}-{:02} by user {} (payer {})",
            bill.id, bill.year, bill.month, requester_id, bill.payer_id
        );
        self.to_response(bill).await
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<BillResponse>, AppError> {
        let bills = db::list_bills_for_user(&self.pool, user_id).await?;
        let mut responses = Vec::with_capacity(bills.len());
        for bill in bills {
            responses.push(self.to_response(bill).await?);
        }
        Ok(responses)
    }

    pub async fn get_by_period(&self, user_id: i64, year: i64, month: i64) -> Result<BillResponse, AppError> {
        validate_period(year, month)?;
        let bill = db::find_bill_by_period(&self.pool, year, month)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        if bill.requester_id != user_id && bill.payer_id != user_id {
            return Err(AppError::Forbidden("You are not a party to this bill".into()));
        }
        self.to_response(bill).await
    }

    pub async fn update_items(
        &self,
        user_id: i64,
        bill_id: i64,
        items: &[ItemInput],
    ) -> Result<BillResponse, AppError> {
        let items = validate_items(items)?;

        let mut tx = self.pool.begin().await?;
        let bill = db::get_bill_by_id(&mut *tx, bill_id)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        check_requester(&bill, user_id, "Only the requester can edit items")?;
        check_status(&bill, BillStatus::Pending)?;

        db::delete_items(&mut *tx, bill.id).await?;
        for item in &items {
            db::insert_item(&mut *tx, bill.id, &item.name, &item.amount.to_string()).await?;
        }
        db::touch_bill(&mut *tx, bill.id).await?;
        tx.commit().await?;

        log::info!(target: "audit", "bill {} items replaced ({} items) by user {}", bill.id, items.len(), user_id);
        self.reload(bill.id).await
    }

    pub async fn request_payment(&self, user_id: i64, bill_id: i64) -> Result<BillResponse, AppError> {
        let mut tx = self.pool.begin().await?;
        let bill = db::get_bill_by_id(&mut *tx, bill_id)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        check_requester(&bill, user_id, "Only the requester can request payment")?;
        check_status(&bill, BillStatus::Pending)?;

        let bill = db::mark_requested(&mut *tx, bill.id).await?;
        tx.commit().await?;

        log::info!(target: "audit", "bill {} requested by user {}", bill.id, user_id);
        self.to_response(bill).await
    }

    pub async fn confirm_payment(&self, user_id: i64, bill_id: i64) -> Result<BillResponse, AppError> {
        let mut tx = self.pool.begin().await?;
        let bill = db::get_bill_by_id(&mut *tx, bill_id)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        if bill.payer_id != user_id {
            return Err(AppError::Forbidden("Only the payer can confirm payment".into()));
        }
        check_status(&bill, BillStatus::Requested)?;

        let bill = db::mark_paid(&mut *tx, bill.id).await?;
        tx.commit().await?;

        log::info!(target: "audit", "bill {} paid by user {}", bill.id, user_id);
        self.to_response(bill).await
    }

    pub async fn delete(&self, user_id: i64, bill_id: i64) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let bill = db::get_bill_by_id(&mut *tx, bill_id)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        check_requester(&bill, user_id, "Only the requester can delete this bill")?;
        check_status(&bill, BillStatus::Pending)?;

        let removed = db::delete_items(&mut *tx, bill.id).await?;
        db::delete_bill(&mut *tx, bill.id).await?;
        tx.commit().await?;

        log::info!(target: "audit", "bill {} deleted with {} items by user {}", bill.id, removed, user_id);
        Ok(())
    }

    async fn reload(&self, bill_id: i64) -> Result<BillResponse, AppError> {
        let bill = db::get_bill_by_id(&self.pool, bill_id)
            .await?
            .ok_or(AppError::NotFound("Bill"))?;
        self.to_response(bill).await
    }

    async fn to_response(&self, bill: MonthlyBill) -> Result<BillResponse, AppError> {
        let requester = db::get_public_user(&self.pool, bill.requester_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        let payer = db::get_public_user(&self.pool, bill.payer_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;

        let items = db::get_items(&self.pool, bill.id)
            .await?
            .into_iter()
            .map(|row| -> Result<BillItem, AppError> {
                let amount = Decimal::from_str(&row.amount).map_err(|e| {
                    log::error!("Stored amount '{}' of item {} is not a decimal: {}", row.amount, row.id, e);
                    AppError::InternalServerError
                })?;
                Ok(BillItem {
                    id: row.id,
                    item_name: row.item_name,
                    amount,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BillResponse {
            id: bill.id,
            year: bill.year,
            month: bill.month,
            status: bill.status,
            requester,
            payer,
            total_amount: total(&items),
            items,
            requested_at: bill.requested_at,
            paid_at: bill.paid_at,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
        })
    }
}

pub fn total(items: &[BillItem]) -> Decimal {
    items.iter().map(|item| item.amount).sum()
}

fn check_requester(bill: &MonthlyBill, user_id: i64, message: &str) -> Result<(), AppError> {
    if bill.requester_id != user_id {
        return Err(AppError::Forbidden(message.into()));
    }
    Ok(())
}

fn check_status(bill: &MonthlyBill, expected: BillStatus) -> Result<(), AppError> {
    if bill.status != expected {
        return Err(AppError::Validation(format!(
            "Invalid status transition: bill is {}, expected {}",
            bill.status, expected
        )));
    }
    Ok(())
}

pub fn validate_period(year: i64, month: i64) -> Result<(), AppError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(AppError::Validation(format!(
            "Year must be between {MIN_YEAR} and {MAX_YEAR}"
        )));
    }
    if !(1..=12).contains(&month) {
        return Err(AppError::Validation("Month must be between 1 and 12".into()));
    }
    Ok(())
}

/// Returns the items with trimmed names and normalized amounts.
pub fn validate_items(items: &[ItemInput]) -> Result<Vec<ItemInput>, AppError> {
    if items.len() > MAX_ITEMS {
        return Err(AppError::Validation(format!(
            "A bill may have at most {MAX_ITEMS} items"
        )));
    }
    items
        .iter()
        .map(|item| {
            let name = item.name.trim();
            if name.is_empty() {
                return Err(AppError::Validation("Item name is required".into()));
            }
            if name.chars().count() > MAX_ITEM_NAME_LENGTH {
                return Err(AppError::Validation(format!(
                    "Item name must be at most {MAX_ITEM_NAME_LENGTH} characters long"
                )));
            }
            if item.amount.is_sign_negative() && !item.amount.is_zero() {
                return Err(AppError::Validation("Amount must not be negative".into()));
            }
            if item.amount > MAX_ITEM_AMOUNT {
                return Err(AppError::Validation("Amount is too large".into()));
            }
            if item.amount.normalize().scale() > 2 {
                return Err(AppError::Validation(
                    "Amount may have at most 2 decimal places".into(),
                ));
            }
            Ok(ItemInput {
                name: name.to_owned(),
                amount: item.amount.normalize(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::init_pool, utils::hash_password};

    struct Fixture {
        bills: BillService,
        pool: SqlitePool,
        requester: i64,
        payer: i64,
        outsider: i64,
    }

    async fn fixture() -> Fixture {
        let pool = init_pool("sqlite::memory:", 1).await.unwrap();
        let hash = hash_password("password123").unwrap();
        let requester = db::create_user(&pool, "Hanako", "hanako", &hash).await.unwrap().id;
        let payer = db::create_user(&pool, "Taro", "taro", &hash).await.unwrap().id;
        let outsider = db::create_user(&pool, "Jiro", "jiro", &hash).await.unwrap().id;
        Fixture {
            bills: BillService::new(pool.clone()),
            pool,
            requester,
            payer,
            outsider,
        }
    }

    fn item(name: &str, amount: &str) -> ItemInput {
        ItemInput {
            name: name.into(),
            amount: Decimal::from_str(amount).unwrap(),
        }
    }

    fn create_form(payer_id: i64, year: i64, month: i64) -> CreateBill {
        CreateBill {
            year,
            month,
            payer_id,
            items: vec![item("Electricity", "5400"), item("Water", "2100.50")],
        }
    }

    #[actix_web::test]
    async fn create_computes_total_and_starts_pending() {
        let f = fixture().await;
        let bill = f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();
        assert_eq!(bill.status, BillStatus::Pending);
        assert_eq!(bill.items.len(), 2);
        assert_eq!(bill.total_amount, Decimal::from_str("7500.50").unwrap());
        assert_eq!(bill.requester.id, f.requester);
        assert_eq!(bill.payer.id, f.payer);
        assert!(bill.requested_at.is_none());
    }

    #[actix_web::test]
    async fn same_period_cannot_be_created_twice() {
        let f = fixture().await;
        f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();
        let err = f
            .bills
            .create(f.payer, create_form(f.requester, 2025, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(f.bills.create(f.requester, create_form(f.payer, 2025, 4)).await.is_ok());
    }

    #[actix_web::test]
    async fn create_rejects_unknown_payer_and_bad_period() {
        let f = fixture().await;
        assert!(matches!(
            f.bills.create(f.requester, create_form(4242, 2025, 3)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.bills.create(f.requester, create_form(f.payer, 2025, 13)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.bills.create(f.requester, create_form(f.payer, 1999, 1)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[actix_web::test]
    async fn only_requester_edits_items_while_pending() {
        let f = fixture().await;
        let bill = f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();

        let err = f
            .bills
            .update_items(f.payer, bill.id, &[item("Gas", "3000")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let updated = f
            .bills
            .update_items(f.requester, bill.id, &[item("Gas", "3000")])
            .await
            .unwrap();
        assert_eq!(updated.items.len(), 1);
        assert_eq!(updated.items[0].item_name, "Gas");
        assert_eq!(updated.total_amount, Decimal::from(3000));

        f.bills.request_payment(f.requester, bill.id).await.unwrap();
        let err = f
            .bills
            .update_items(f.requester, bill.id, &[item("Gas", "1")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[actix_web::test]
    async fn status_moves_strictly_forward() {
        let f = fixture().await;
        let bill = f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();

        assert!(matches!(
            f.bills.confirm_payment(f.payer, bill.id).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.bills.request_payment(f.payer, bill.id).await,
            Err(AppError::Forbidden(_))
        ));

        let requested = f.bills.request_payment(f.requester, bill.id).await.unwrap();
        assert_eq!(requested.status, BillStatus::Requested);
        assert!(requested.requested_at.is_some());

        assert!(matches!(
            f.bills.request_payment(f.requester, bill.id).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.bills.confirm_payment(f.requester, bill.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.bills.confirm_payment(f.outsider, bill.id).await,
            Err(AppError::Forbidden(_))
        ));

        let paid = f.bills.confirm_payment(f.payer, bill.id).await.unwrap();
        assert_eq!(paid.status, BillStatus::Paid);
        assert!(paid.paid_at.is_some());
        assert!(matches!(
            f.bills.confirm_payment(f.payer, bill.id).await,
            Err(AppError::Validation(_))
        ));
    }

    #[actix_web::test]
    async fn delete_removes_items_and_is_requester_only() {
        let f = fixture().await;
        let bill = f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();
        assert_eq!(db::count_items(&f.pool, bill.id).await.unwrap(), 2);

        assert!(matches!(
            f.bills.delete(f.payer, bill.id).await,
            Err(AppError::Forbidden(_))
        ));
        f.bills.delete(f.requester, bill.id).await.unwrap();

        assert_eq!(db::count_items(&f.pool, bill.id).await.unwrap(), 0);
        assert!(matches!(
            f.bills.delete(f.requester, bill.id).await,
            Err(AppError::NotFound("Bill"))
        ));
    }

    #[actix_web::test]
    async fn requested_bill_cannot_be_deleted() {
        let f = fixture().await;
        let bill = f.bills.create(f.requester, create_form(f.payer, 2025, 3)).await.unwrap();
        f.bills.request_payment(f.requester, bill.id).await.unwrap();
        assert!(matches!(
            f.bills.delete(f.requester, bill.id).await,
            Err(AppError::Validation(_))
        ));
    }

    #[actix_web::test]
    async fn list_and_get_are_scoped_to_parties() {
        let f = fixture().await;
        f.bills.create(f.requester, create_form(f.payer, 2025, 1)).await.unwrap();
        f.bills.create(f.requester, create_form(f.payer, 2025, 2)).await.unwrap();

        let listed = f.bills.list(f.payer).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].month, 2);
        assert!(f.bills.list(f.outsider).await.unwrap().is_empty());

        assert_eq!(f.bills.get_by_period(f.requester, 2025, 1).await.unwrap().month, 1);
        assert!(matches!(
            f.bills.get_by_period(f.outsider, 2025, 1).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.bills.get_by_period(f.requester, 2025, 5).await,
            Err(AppError::NotFound("Bill"))
        ));
    }

    #[test]
    fn item_validation() {
        assert!(validate_items(&[item("  ", "1")]).is_err());
        assert!(validate_items(&[item("Rent", "-1")]).is_err());
        assert!(validate_items(&[item("Rent", "0.001")]).is_err());
        assert!(validate_items(&[item("Rent", "100000001")]).is_err());
        assert!(validate_items(&[item("Rent", "100000000")]).is_ok());
        let ok = validate_items(&[item(" Rent ", "1200.50")]).unwrap();
        assert_eq!(ok[0].name, "Rent");
        assert_eq!(ok[0].amount, Decimal::from_str("1200.5").unwrap());
        let too_many: Vec<_> = (0..=MAX_ITEMS).map(|i| item(&format!("i{i}"), "1")).collect();
        assert!(validate_items(&too_many).is_err());
    }
}
