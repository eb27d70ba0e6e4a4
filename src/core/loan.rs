//! Loan schedule generator.
//!
//! A loan is an installment purchase: a total amount repaid over `num_months`
//! with a flat interest rate. Creating one writes the loan row and its full
//! schedule of ledger entries in a single transaction, one entry per month
//! dated on the 1st, starting at the first due month derived from the
//! provider's statement cutoff day.

use crate::{
    config::Settings,
    core::{
        calendar::{YearMonth, round2},
        cc::AccountSettlementData,
        entry::{get_entries_for_loan, validate_amount, validate_name},
        lookup,
    },
    entities::{
        CcState, EntryOrigin, EntryType, LedgerEntry, Loan, SettlementIntent, ledger_entry, loan,
    },
    errors::{Error, Result},
    events::{DomainEvent, EventKind, EventPublisher},
};
use chrono::{Datelike, NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

const MAX_ITEM_NAME_LEN: usize = 200;
/// Longest schedule accepted, fifty years of monthly installments
pub const MAX_LOAN_MONTHS: i32 = 600;

/// Input for a new loan.
#[derive(Debug, Clone)]
pub struct CreateLoanArgs {
    pub provider_id: i64,
    pub account_id: i64,
    pub item_name: String,
    pub notes: Option<String>,
    pub total_amount: f64,
    pub num_months: i32,
    pub purchase_date: NaiveDate,
    /// Flat rate in percent over the whole term
    pub interest_rate: f64,
    /// Only used when the account is a credit card
    pub settlement_intent: Option<SettlementIntent>,
    /// Per-month amounts replacing the computed installment, one per month
    pub custom_amounts: Option<Vec<f64>>,
}

/// Editable loan fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct LoanUpdate {
    pub item_name: Option<String>,
    pub notes: Option<Option<String>>,
    pub provider_id: Option<i64>,
}

/// Monthly installment for a flat-rate loan.
///
/// Returns zero for a non-positive term.
#[must_use]
pub fn calculate_monthly_payment(total: f64, interest_rate: f64, months: i32) -> f64 {
    if months <= 0 {
        return 0.0;
    }
    round2(total * (1.0 + interest_rate / 100.0) / f64::from(months))
}

/// Month of the first installment.
///
/// A purchase made strictly before the provider's cutoff day lands on the
/// current statement and is due in the purchase month; anything on or after
/// the cutoff rolls to the following month.
pub fn calculate_first_due_month(purchase_date: NaiveDate, cutoff_day: u32) -> Result<YearMonth> {
    if !(1..=31).contains(&cutoff_day) {
        return Err(Error::InvalidCutoffDay { day: cutoff_day });
    }
    let purchase_month = YearMonth::of(purchase_date);
    if purchase_date.day() < cutoff_day {
        Ok(purchase_month)
    } else {
        Ok(purchase_month.next())
    }
}

fn validate_interest_rate(rate: f64) -> Result<f64> {
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(Error::InvalidInterestRate { rate });
    }
    Ok(rate)
}

fn installment_amounts(args: &CreateLoanArgs, monthly_payment: f64) -> Result<Vec<f64>> {
    let months = usize::try_from(args.num_months)
        .map_err(|_| Error::validation("Number of months must be at least 1"))?;
    match &args.custom_amounts {
        None => Ok(vec![monthly_payment; months]),
        Some(amounts) => {
            if amounts.len() != months {
                return Err(Error::validation(format!(
                    "Expected {months} custom amounts, got {}",
                    amounts.len()
                )));
            }
            amounts.iter().copied().map(validate_amount).collect()
        }
    }
}

/// Due date of each installment, the 1st of consecutive months.
fn installment_dates(first_month: YearMonth, count: usize) -> Result<Vec<NaiveDate>> {
    std::iter::successors(Some(first_month), |m| Some(m.next()))
        .take(count)
        .map(YearMonth::try_first_day)
        .collect()
}

/// Creates a loan together with its complete installment schedule.
///
/// Every input check runs before the first write. The loan row and all
/// installments commit together or not at all.
#[instrument(skip(db, events, settings, args), fields(item = %args.item_name, months = args.num_months))]
pub async fn create_loan(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    workspace_id: i64,
    args: CreateLoanArgs,
) -> Result<(loan::Model, Vec<ledger_entry::Model>)> {
    let item_name = validate_name(&args.item_name, MAX_ITEM_NAME_LEN)?;
    let total_amount = validate_amount(args.total_amount)?;
    if !(1..=MAX_LOAN_MONTHS).contains(&args.num_months) {
        return Err(Error::validation(format!(
            "Number of months must be between 1 and {MAX_LOAN_MONTHS}"
        )));
    }
    let interest_rate = validate_interest_rate(args.interest_rate)?;
    let monthly_payment = calculate_monthly_payment(total_amount, interest_rate, args.num_months);
    let amounts = installment_amounts(&args, monthly_payment)?;

    let txn = db.begin().await?;

    let provider = lookup::require_provider(&txn, workspace_id, args.provider_id).await?;
    let account = lookup::require_account(&txn, workspace_id, args.account_id).await?;
    let first_month = calculate_first_due_month(args.purchase_date, provider.cutoff_day)?;
    let due_dates = installment_dates(first_month, amounts.len())?;

    let intent = args.settlement_intent.filter(|_| account.is_credit_card());
    let now = Utc::now();

    let loan = loan::ActiveModel {
        workspace_id: Set(workspace_id),
        provider_id: Set(provider.id),
        account_id: Set(account.id),
        item_name: Set(item_name.clone()),
        notes: Set(args.notes),
        total_amount: Set(total_amount),
        num_months: Set(args.num_months),
        purchase_date: Set(args.purchase_date),
        interest_rate: Set(interest_rate),
        monthly_payment: Set(monthly_payment),
        first_payment_year: Set(first_month.year),
        first_payment_month: Set(first_month.month),
        settlement_intent: Set(intent),
        is_deleted: Set(false),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut entries = Vec::with_capacity(amounts.len());
    for (index, (amount, due)) in amounts.into_iter().zip(due_dates).enumerate() {
        let installment = i32::try_from(index + 1)
            .map_err(|_| Error::validation("Too many installments"))?;
        let mut active = ledger_entry::ActiveModel {
            workspace_id: Set(workspace_id),
            account_id: Set(account.id),
            category_id: Set(None),
            name: Set(format!("{item_name} ({installment}/{})", args.num_months)),
            amount: Set(amount),
            entry_type: Set(EntryType::Expense),
            entry_date: Set(due),
            is_paid: Set(false),
            origin: Set(EntryOrigin::Loan),
            template_id: Set(None),
            loan_id: Set(Some(loan.id)),
            is_projected: Set(true),
            projection_month: Set(None),
            installment_number: Set(Some(installment)),
            transfer_pair_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        AccountSettlementData::for_new_entry(
            account.is_credit_card(),
            intent,
            settings.settlement.default_intent,
        )
        .apply(&mut active);
        entries.push(active.insert(&txn).await?);
    }

    txn.commit().await?;

    info!(
        "Created loan {} with {} installments of {:.2}",
        loan.id,
        entries.len(),
        monthly_payment
    );
    events.publish(
        DomainEvent::new(EventKind::LoanCreated, workspace_id)
            .with("loan_id", loan.id)
            .with("installments", entries.len()),
    );
    events.publish(
        DomainEvent::new(EventKind::EntryBatchCreated, workspace_id)
            .with("loan_id", loan.id)
            .with("count", entries.len()),
    );

    Ok((loan, entries))
}

async fn find_loan<C>(db: &C, workspace_id: i64, loan_id: i64) -> Result<loan::Model>
where
    C: ConnectionTrait,
{
    Loan::find_by_id(loan_id)
        .filter(loan::Column::WorkspaceId.eq(workspace_id))
        .filter(loan::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "loan",
            id: loan_id,
        })
}

/// Fetches a live loan in the workspace.
pub async fn get_loan(
    db: &DatabaseConnection,
    workspace_id: i64,
    loan_id: i64,
) -> Result<loan::Model> {
    find_loan(db, workspace_id, loan_id).await
}

/// Lists the live loans of a workspace, newest purchase first.
pub async fn list_loans(db: &DatabaseConnection, workspace_id: i64) -> Result<Vec<loan::Model>> {
    Loan::find()
        .filter(loan::Column::WorkspaceId.eq(workspace_id))
        .filter(loan::Column::IsDeleted.eq(false))
        .order_by_desc(loan::Column::PurchaseDate)
        .order_by_desc(loan::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Edits the display fields of a loan.
///
/// The provider cannot change once any installment has been paid.
pub async fn update_loan(
    db: &DatabaseConnection,
    workspace_id: i64,
    loan_id: i64,
    update: LoanUpdate,
) -> Result<loan::Model> {
    let item_name = update
        .item_name
        .as_deref()
        .map(|n| validate_name(n, MAX_ITEM_NAME_LEN))
        .transpose()?;

    let txn = db.begin().await?;
    let loan = find_loan(&txn, workspace_id, loan_id).await?;

    let provider_id = match update.provider_id.filter(|id| *id != loan.provider_id) {
        Some(provider_id) => {
            let paid = LedgerEntry::find()
                .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
                .filter(ledger_entry::Column::LoanId.eq(loan_id))
                .filter(ledger_entry::Column::IsPaid.eq(true))
                .count(&txn)
                .await?;
            if paid > 0 {
                return Err(Error::ProviderChangeAfterPayment { loan_id });
            }
            Some(lookup::require_provider(&txn, workspace_id, provider_id).await?.id)
        }
        None => None,
    };

    let mut active: loan::ActiveModel = loan.into();
    if let Some(item_name) = item_name {
        active.item_name = Set(item_name);
    }
    if let Some(notes) = update.notes {
        active.notes = Set(notes);
    }
    if let Some(provider_id) = provider_id {
        active.provider_id = Set(provider_id);
    }
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Deletes a loan.
///
/// Paid installments are kept with their loan link cleared, unpaid ones are
/// removed, then the loan itself is soft deleted.
#[instrument(skip(db, events))]
pub async fn delete_loan(
    db: &DatabaseConnection,
    events: &EventPublisher,
    workspace_id: i64,
    loan_id: i64,
) -> Result<()> {
    let txn = db.begin().await?;
    let loan = find_loan(&txn, workspace_id, loan_id).await?;

    let orphaned = LedgerEntry::update_many()
        .col_expr(ledger_entry::Column::LoanId, Expr::value(Option::<i64>::None))
        .col_expr(ledger_entry::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::LoanId.eq(loan_id))
        .filter(ledger_entry::Column::IsPaid.eq(true))
        .exec(&txn)
        .await?
        .rows_affected;

    let removed = LedgerEntry::delete_many()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::LoanId.eq(loan_id))
        .filter(ledger_entry::Column::IsPaid.eq(false))
        .exec(&txn)
        .await?
        .rows_affected;

    let mut active: loan::ActiveModel = loan.into();
    active.is_deleted = Set(true);
    active.update(&txn).await?;

    txn.commit().await?;

    info!(
        "Deleted loan {}: {} paid installments kept, {} unpaid removed",
        loan_id, orphaned, removed
    );
    events.publish(
        DomainEvent::new(EventKind::LoanDeleted, workspace_id)
            .with("loan_id", loan_id)
            .with("entries_orphaned", orphaned)
            .with("entries_removed", removed),
    );
    Ok(())
}

/// Pays every outstanding installment of a loan due in `month`.
///
/// Card installments go straight to `settled`. Fails with
/// [`Error::NothingOutstanding`] when there is nothing to pay and with
/// [`Error::AtomicityFailure`] when the bulk update touches fewer rows than
/// were selected, in which case nothing is kept.
#[instrument(skip(db))]
pub async fn pay_loan_month(
    db: &DatabaseConnection,
    workspace_id: i64,
    loan_id: i64,
    month: YearMonth,
) -> Result<Vec<ledger_entry::Model>> {
    let txn = db.begin().await?;
    find_loan(&txn, workspace_id, loan_id).await?;

    let due: Vec<ledger_entry::Model> = get_entries_for_loan(&txn, workspace_id, loan_id)
        .await?
        .into_iter()
        .filter(|e| !e.is_paid && month.contains(e.entry_date))
        .collect();
    if due.is_empty() {
        return Err(Error::NothingOutstanding {
            loan_id,
            year: month.year,
            month: month.month,
        });
    }

    let mut plain_ids = Vec::new();
    let mut card_ids = Vec::new();
    for entry in &due {
        if AccountSettlementData::from_entry(entry)?.is_credit_card() {
            card_ids.push(entry.id);
        } else {
            plain_ids.push(entry.id);
        }
    }

    let now = Utc::now();
    let mut affected = 0;
    if !plain_ids.is_empty() {
        affected += LedgerEntry::update_many()
            .col_expr(ledger_entry::Column::IsPaid, Expr::value(true))
            .col_expr(ledger_entry::Column::IsProjected, Expr::value(false))
            .col_expr(ledger_entry::Column::UpdatedAt, Expr::value(now))
            .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
            .filter(ledger_entry::Column::Id.is_in(plain_ids))
            .filter(ledger_entry::Column::IsPaid.eq(false))
            .exec(&txn)
            .await?
            .rows_affected;
    }
    if !card_ids.is_empty() {
        // Billing timestamp is only filled in where the entry was never billed
        LedgerEntry::update_many()
            .col_expr(ledger_entry::Column::BilledAt, Expr::value(now))
            .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
            .filter(ledger_entry::Column::Id.is_in(card_ids.clone()))
            .filter(ledger_entry::Column::BilledAt.is_null())
            .exec(&txn)
            .await?;
        affected += LedgerEntry::update_many()
            .col_expr(ledger_entry::Column::IsPaid, Expr::value(true))
            .col_expr(ledger_entry::Column::IsProjected, Expr::value(false))
            .col_expr(ledger_entry::Column::CcState, Expr::value(CcState::Settled))
            .col_expr(ledger_entry::Column::UpdatedAt, Expr::value(now))
            .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
            .filter(ledger_entry::Column::Id.is_in(card_ids))
            .filter(ledger_entry::Column::IsPaid.eq(false))
            .exec(&txn)
            .await?
            .rows_affected;
    }

    let expected = due.len() as u64;
    if affected != expected {
        return Err(Error::AtomicityFailure { expected, affected });
    }

    let ids: Vec<i64> = due.iter().map(|e| e.id).collect();
    let paid = LedgerEntry::find()
        .filter(ledger_entry::Column::Id.is_in(ids))
        .order_by_asc(ledger_entry::Column::Id)
        .all(&txn)
        .await?;

    txn.commit().await?;
    info!("Paid {} installments of loan {} for {}", paid.len(), loan_id, month);
    Ok(paid)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::{cc::cc_metrics, entry::get_entry};
    use crate::entities::AccountType;
    use crate::test_utils::*;
    use crate::config::settings::SettlementSettings;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn loan_args(provider_id: i64, account_id: i64) -> CreateLoanArgs {
        CreateLoanArgs {
            provider_id,
            account_id,
            item_name: "Laptop".to_string(),
            notes: None,
            total_amount: 300.0,
            num_months: 3,
            purchase_date: date(2025, 3, 20),
            interest_rate: 0.0,
            settlement_intent: None,
            custom_amounts: None,
        }
    }

    #[test]
    fn test_monthly_payment() {
        assert_eq!(calculate_monthly_payment(300.0, 0.0, 3), 100.0);
        assert_eq!(calculate_monthly_payment(1000.0, 10.0, 10), 110.0);
        assert_eq!(calculate_monthly_payment(100.0, 0.0, 3), 33.33);
        assert_eq!(calculate_monthly_payment(500.0, 5.0, 0), 0.0);
        assert_eq!(calculate_monthly_payment(500.0, 5.0, -2), 0.0);
    }

    #[test]
    fn test_monthly_payment_times_months_matches_total() {
        for (total, rate, months) in [(1234.56, 7.5, 7), (99.99, 0.0, 12), (5000.0, 19.9, 24)] {
            let payment = calculate_monthly_payment(total, rate, months);
            let expected = total * (1.0 + rate / 100.0);
            assert!((payment * f64::from(months) - expected).abs() <= 0.005 * f64::from(months));
        }
    }

    #[test]
    fn test_first_due_month() -> Result<()> {
        assert_eq!(
            calculate_first_due_month(date(2025, 3, 20), 25)?,
            YearMonth::new(2025, 3)?
        );
        // On the cutoff day rolls over
        assert_eq!(
            calculate_first_due_month(date(2025, 3, 25), 25)?,
            YearMonth::new(2025, 4)?
        );
        assert_eq!(
            calculate_first_due_month(date(2025, 12, 28), 15)?,
            YearMonth::new(2026, 1)?
        );
        assert!(matches!(
            calculate_first_due_month(date(2025, 3, 1), 0),
            Err(Error::InvalidCutoffDay { day: 0 })
        ));
        assert!(matches!(
            calculate_first_due_month(date(2025, 3, 1), 32),
            Err(Error::InvalidCutoffDay { day: 32 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_validation_before_writes() {
        // Any query on this connection fails, so rejection must happen first
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let events = EventPublisher::disabled();

        let mut args = loan_args(1, 1);
        args.item_name = "  ".to_string();
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::Validation { .. })
        ));

        let mut args = loan_args(1, 1);
        args.total_amount = -5.0;
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::InvalidAmount { .. })
        ));

        let mut args = loan_args(1, 1);
        args.num_months = 0;
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::Validation { .. })
        ));

        let mut args = loan_args(1, 1);
        args.num_months = i32::MAX;
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::Validation { .. })
        ));

        let mut args = loan_args(1, 1);
        args.num_months = MAX_LOAN_MONTHS + 1;
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::Validation { .. })
        ));

        let mut args = loan_args(1, 1);
        args.interest_rate = 120.0;
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::InvalidInterestRate { .. })
        ));

        let mut args = loan_args(1, 1);
        args.custom_amounts = Some(vec![100.0, 200.0]);
        assert!(matches!(
            create_loan(&db, &events, &Settings::default(), 1, args).await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_loan_schedule() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "PayLater", 25).await?;
        let (events, mut rx) = EventPublisher::channel(8);

        let (loan, entries) = create_loan(&db, &events, &Settings::default(), 1, loan_args(provider.id, bank.id)).await?;
        assert_eq!(loan.monthly_payment, 100.0);
        assert_eq!((loan.first_payment_year, loan.first_payment_month), (2025, 3));
        assert_eq!(loan.settlement_intent, None);

        assert_eq!(entries.len(), 3);
        let dates: Vec<NaiveDate> = entries.iter().map(|e| e.entry_date).collect();
        assert_eq!(dates, vec![date(2025, 3, 1), date(2025, 4, 1), date(2025, 5, 1)]);
        assert_eq!(entries[1].name, "Laptop (2/3)");
        assert_eq!(entries[1].installment_number, Some(2));
        assert!(entries.iter().all(|e| e.amount == 100.0
            && e.origin == EntryOrigin::Loan
            && e.loan_id == Some(loan.id)
            && e.template_id.is_none()
            && e.cc_state.is_none()
            && e.settlement_intent.is_none()));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::LoanCreated);
        Ok(())
    }

    #[tokio::test]
    async fn test_card_loan_entries_carry_intent() -> Result<()> {
        let db = setup_test_db().await?;
        let card = create_test_account(&db, 1, "Card", AccountType::CreditCard).await?;
        let provider = create_test_provider(&db, 1, "Store card", 10).await?;
        let events = EventPublisher::disabled();

        let (_, entries) = create_loan(&db, &events, &Settings::default(), 1, loan_args(provider.id, card.id)).await?;
        assert!(entries.iter().all(|e| e.cc_state == Some(CcState::Pending)
            && e.settlement_intent == Some(SettlementIntent::Deferred)
            && e.billed_at.is_none()));

        let mut args = loan_args(provider.id, card.id);
        args.settlement_intent = Some(SettlementIntent::Immediate);
        let (loan, entries) = create_loan(&db, &events, &Settings::default(), 1, args).await?;
        assert_eq!(loan.settlement_intent, Some(SettlementIntent::Immediate));
        assert!(entries
            .iter()
            .all(|e| e.settlement_intent == Some(SettlementIntent::Immediate)));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_custom_amounts() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "PayLater", 25).await?;

        let mut args = loan_args(provider.id, bank.id);
        args.custom_amounts = Some(vec![150.0, 100.0, 75.0]);
        let (_, entries) = create_loan(&db, &EventPublisher::disabled(), &Settings::default(), 1, args).await?;
        let amounts: Vec<f64> = entries.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![150.0, 100.0, 75.0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_unknown_provider_leaves_nothing() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let foreign = create_test_provider(&db, 2, "Elsewhere", 25).await?;

        let result = create_loan(
            &db,
            &EventPublisher::disabled(),
            &Settings::default(),
            1,
            loan_args(foreign.id, bank.id),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(Loan::find().count(&db).await?, 0);
        assert_eq!(LedgerEntry::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_bad_cutoff_rolls_back() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "Broken", 40).await?;

        let result = create_loan(
            &db,
            &EventPublisher::disabled(),
            &Settings::default(),
            1,
            loan_args(provider.id, bank.id),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidCutoffDay { day: 40 })));
        assert_eq!(Loan::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_change_blocked_after_payment() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "PayLater", 25).await?;
        let other = create_test_provider(&db, 1, "Other", 5).await?;
        let events = EventPublisher::disabled();

        let (loan, _) = create_loan(&db, &events, &Settings::default(), 1, loan_args(provider.id, bank.id)).await?;

        let renamed = update_loan(
            &db,
            1,
            loan.id,
            LoanUpdate {
                item_name: Some("Work laptop".to_string()),
                notes: Some(Some("Refurbished".to_string())),
                provider_id: Some(other.id),
            },
        )
        .await?;
        assert_eq!(renamed.item_name, "Work laptop");
        assert_eq!(renamed.provider_id, other.id);

        pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 3)?).await?;
        let result = update_loan(
            &db,
            1,
            loan.id,
            LoanUpdate {
                provider_id: Some(provider.id),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::ProviderChangeAfterPayment { .. })
        ));

        // Name edits stay allowed
        update_loan(
            &db,
            1,
            loan.id,
            LoanUpdate {
                item_name: Some("Old laptop".to_string()),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_loan_orphans_paid_entries() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "PayLater", 25).await?;
        let events = EventPublisher::disabled();

        let (loan, entries) = create_loan(&db, &events, &Settings::default(), 1, loan_args(provider.id, bank.id)).await?;
        pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 3)?).await?;

        delete_loan(&db, &events, 1, loan.id).await?;

        let kept = get_entry(&db, 1, entries[0].id).await?;
        assert!(kept.is_paid);
        assert_eq!(kept.loan_id, None);
        assert_eq!(LedgerEntry::find().count(&db).await?, 1);
        assert!(matches!(
            get_loan(&db, 1, loan.id).await,
            Err(Error::NotFound { .. })
        ));
        assert!(list_loans(&db, 1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_pay_loan_month() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "PayLater", 25).await?;

        let (loan, _) = create_loan(
            &db,
            &EventPublisher::disabled(),
            &Settings::default(),
            1,
            loan_args(provider.id, bank.id),
        )
        .await?;

        let paid = pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 4)?).await?;
        assert_eq!(paid.len(), 1);
        assert!(paid[0].is_paid);
        assert_eq!(paid[0].entry_date, date(2025, 4, 1));

        let again = pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 4)?).await;
        assert!(matches!(again, Err(Error::NothingOutstanding { .. })));

        let outside = pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 9)?).await;
        assert!(matches!(outside, Err(Error::NothingOutstanding { .. })));

        let other_workspace = pay_loan_month(&db, 2, loan.id, YearMonth::new(2025, 3)?).await;
        assert!(matches!(other_workspace, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_pay_card_loan_month_settles() -> Result<()> {
        let db = setup_test_db().await?;
        let card = create_test_account(&db, 1, "Card", AccountType::CreditCard).await?;
        let provider = create_test_provider(&db, 1, "Store card", 25).await?;

        let (loan, _) = create_loan(
            &db,
            &EventPublisher::disabled(),
            &Settings::default(),
            1,
            loan_args(provider.id, card.id),
        )
        .await?;

        let before = cc_metrics(&db, 1, Some(card.id), date(2025, 3, 1), date(2025, 5, 31)).await?;
        assert_eq!(before.purchases, 300.0);
        assert_eq!(before.pending, 300.0);

        let paid = pay_loan_month(&db, 1, loan.id, YearMonth::new(2025, 3)?).await?;
        assert_eq!(paid[0].cc_state, Some(CcState::Settled));
        assert!(paid[0].billed_at.is_some());

        let after = cc_metrics(&db, 1, Some(card.id), date(2025, 3, 1), date(2025, 5, 31)).await?;
        assert_eq!(after.purchases, 300.0);
        assert_eq!(after.pending, 200.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_longest_schedule_accepted() -> Result<()> {
        let db = setup_test_db().await?;
        let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
        let provider = create_test_provider(&db, 1, "Mortgage", 25).await?;

        let mut args = loan_args(provider.id, bank.id);
        args.total_amount = 120_000.0;
        args.num_months = MAX_LOAN_MONTHS;
        let (_, entries) = create_loan(&db, &EventPublisher::disabled(), &Settings::default(), 1, args).await?;
        assert_eq!(entries.len(), 600);
        assert_eq!(entries[599].entry_date, date(2075, 2, 1));
        Ok(())
    }

    #[test]
    fn test_installment_dates_past_calendar_end() {
        let last = YearMonth::of(NaiveDate::MAX);
        assert!(matches!(
            installment_dates(last, 2),
            Err(Error::InvalidMonth { .. })
        ));
        assert_eq!(installment_dates(last, 1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_card_loan_uses_configured_default_intent() -> Result<()> {
        let db = setup_test_db().await?;
        let card = create_test_account(&db, 1, "Card", AccountType::CreditCard).await?;
        let provider = create_test_provider(&db, 1, "Store card", 10).await?;
        let settings = Settings {
            settlement: SettlementSettings {
                default_intent: SettlementIntent::Immediate,
            },
            ..Default::default()
        };

        let (loan, entries) =
            create_loan(&db, &EventPublisher::disabled(), &settings, 1, loan_args(provider.id, card.id)).await?;
        assert_eq!(loan.settlement_intent, None);
        assert!(entries
            .iter()
            .all(|e| e.settlement_intent == Some(SettlementIntent::Immediate)));

        let mut args = loan_args(provider.id, card.id);
        args.settlement_intent = Some(SettlementIntent::Deferred);
        let (_, entries) = create_loan(&db, &EventPublisher::disabled(), &settings, 1, args).await?;
        assert!(entries
            .iter()
            .all(|e| e.settlement_intent == Some(SettlementIntent::Deferred)));
        Ok(())
    }

    #[tokio::test]
    async fn test_short_pay_update_rolls_back() -> Result<()> {
        let now = Utc::now();
        let loan_row = loan::Model {
            id: 7,
            workspace_id: 1,
            provider_id: 1,
            account_id: 1,
            item_name: "Laptop".to_string(),
            notes: None,
            total_amount: 200.0,
            num_months: 2,
            purchase_date: date(2025, 3, 20),
            interest_rate: 0.0,
            monthly_payment: 100.0,
            first_payment_year: 2025,
            first_payment_month: 3,
            settlement_intent: None,
            is_deleted: false,
            created_at: now,
        };
        let installment = |id: i64| ledger_entry::Model {
            origin: EntryOrigin::Loan,
            loan_id: Some(7),
            is_projected: true,
            ..entry_row(id, 1, 100.0, date(2025, 3, 1))
        };
        // Two installments due in the month, but only one row is updated
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([vec![loan_row]])
            .append_query_results([vec![installment(1), installment(2)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let result = pay_loan_month(&db, 1, 7, YearMonth::new(2025, 3)?).await;
        assert!(matches!(
            result,
            Err(Error::AtomicityFailure {
                expected: 2,
                affected: 1
            })
        ));

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("COMMIT"));
        Ok(())
    }
}
