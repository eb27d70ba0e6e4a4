//! Ledger entry operations - manual entries and the store queries the generators share.
//!
//! Manual entries follow the same CC rules as generated ones: an entry on a
//! card account starts `pending` with a settlement intent and is never created
//! already paid.

use crate::{
    config::Settings,
    core::{calendar::round2, cc::AccountSettlementData, lookup},
    entities::{
        CcState, EntryOrigin, EntryType, LedgerEntry, SettlementIntent, ledger_entry,
        recurring_template,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::debug;

/// Input for a manually entered ledger entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub amount: f64,
    pub entry_type: EntryType,
    pub entry_date: NaiveDate,
    pub is_paid: bool,
    /// Only used for card accounts; the configured default when absent
    pub settlement_intent: Option<SettlementIntent>,
}

/// User edit of an entry. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub category_id: Option<Option<i64>>,
    pub account_id: Option<i64>,
    pub entry_date: Option<NaiveDate>,
}

pub(crate) fn validate_name(name: &str, max_len: usize) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("Name cannot be empty"));
    }
    if trimmed.chars().count() > max_len {
        return Err(Error::validation(format!(
            "Name cannot be longer than {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(round2(amount))
}

const MAX_ENTRY_NAME_LEN: usize = 200;

/// Creates a manual (actual) ledger entry.
pub async fn create_entry(
    db: &DatabaseConnection,
    settings: &Settings,
    workspace_id: i64,
    new_entry: NewEntry,
) -> Result<ledger_entry::Model> {
    let name = validate_name(&new_entry.name, MAX_ENTRY_NAME_LEN)?;
    let amount = validate_amount(new_entry.amount)?;

    let account = lookup::require_account(db, workspace_id, new_entry.account_id).await?;
    if let Some(category_id) = new_entry.category_id {
        lookup::require_category(db, workspace_id, category_id).await?;
    }

    let settlement = AccountSettlementData::for_new_entry(
        account.is_credit_card(),
        new_entry.settlement_intent,
        settings.settlement.default_intent,
    );
    if settlement.is_credit_card() && new_entry.is_paid {
        return Err(Error::validation(
            "Card entries start unpaid and are paid through billing and settlement",
        ));
    }

    let now = Utc::now();
    let mut active = ledger_entry::ActiveModel {
        workspace_id: Set(workspace_id),
        account_id: Set(account.id),
        category_id: Set(new_entry.category_id),
        name: Set(name),
        amount: Set(amount),
        entry_type: Set(new_entry.entry_type),
        entry_date: Set(new_entry.entry_date),
        is_paid: Set(new_entry.is_paid),
        origin: Set(EntryOrigin::Manual),
        template_id: Set(None),
        loan_id: Set(None),
        is_projected: Set(false),
        projection_month: Set(None),
        installment_number: Set(None),
        transfer_pair_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    settlement.apply(&mut active);

    Ok(active.insert(db).await?)
}

/// Applies a user edit to an entry.
///
/// Moving an unpaid entry between a card and a non-card account re-derives its
/// settlement data; moving a paid entry across that boundary is rejected.
/// Generated entries edited here stop following their template.
pub async fn update_entry(
    db: &DatabaseConnection,
    settings: &Settings,
    workspace_id: i64,
    entry_id: i64,
    update: EntryUpdate,
) -> Result<ledger_entry::Model> {
    let txn = db.begin().await?;
    let entry = get_entry(&txn, workspace_id, entry_id).await?;
    let current = AccountSettlementData::from_entry(&entry)?;

    let name = update
        .name
        .as_deref()
        .map(|n| validate_name(n, MAX_ENTRY_NAME_LEN))
        .transpose()?;
    let amount = update.amount.map(validate_amount).transpose()?;
    if let Some(Some(category_id)) = update.category_id {
        lookup::require_category(&txn, workspace_id, category_id).await?;
    }

    let mut settlement = None;
    if let Some(account_id) = update.account_id.filter(|id| *id != entry.account_id) {
        let account = lookup::require_account(&txn, workspace_id, account_id).await?;
        if account.is_credit_card() != current.is_credit_card() {
            if entry.is_paid {
                return Err(Error::InvalidCcTransition {
                    id: entry.id,
                    from: current.state().map_or("none", CcState::as_str).to_string(),
                    to: "moved account".to_string(),
                });
            }
            settlement = Some(AccountSettlementData::for_new_entry(
                account.is_credit_card(),
                current.intent(),
                settings.settlement.default_intent,
            ));
        }
    }

    let mut active: ledger_entry::ActiveModel = entry.into();
    if let Some(name) = name {
        active.name = Set(name);
    }
    if let Some(amount) = amount {
        active.amount = Set(amount);
    }
    if let Some(category_id) = update.category_id {
        active.category_id = Set(category_id);
    }
    if let Some(account_id) = update.account_id {
        active.account_id = Set(account_id);
    }
    if let Some(entry_date) = update.entry_date {
        active.entry_date = Set(entry_date);
    }
    if let Some(settlement) = settlement {
        settlement.apply(&mut active);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Marks an entry as paid.
///
/// Non-card entries are simply flagged. Card entries with immediate intent go
/// through the same-month flow, passing through `billed` to `settled` in a
/// single write. Card entries with deferred intent must be settled instead.
pub async fn mark_entry_paid(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_id: i64,
) -> Result<ledger_entry::Model> {
    let entry = get_entry(db, workspace_id, entry_id).await?;
    if entry.is_paid {
        return Err(Error::AlreadyPaid { id: entry_id });
    }

    let now = Utc::now();
    let settlement = match AccountSettlementData::from_entry(&entry)? {
        AccountSettlementData::None => AccountSettlementData::None,
        data @ AccountSettlementData::CreditCard {
            intent: SettlementIntent::Immediate,
            state,
            ..
        } => {
            let billed = if state == CcState::Pending {
                data.transition(entry_id, CcState::Billed, now)?
            } else {
                data
            };
            billed.transition(entry_id, CcState::Settled, now)?
        }
        AccountSettlementData::CreditCard {
            intent: SettlementIntent::Deferred,
            ..
        } => return Err(Error::DeferredEntryRequiresSettlement { id: entry_id }),
    };

    let mut active: ledger_entry::ActiveModel = entry.into();
    settlement.apply(&mut active);
    active.is_paid = Set(true);
    active.is_projected = Set(false);
    active.updated_at = Set(now);
    debug!("Marking entry {} as paid", entry_id);
    Ok(active.update(db).await?)
}

/// Fetches one entry in the workspace.
pub async fn get_entry<C>(db: &C, workspace_id: i64, entry_id: i64) -> Result<ledger_entry::Model>
where
    C: ConnectionTrait,
{
    LedgerEntry::find_by_id(entry_id)
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "ledger entry",
            id: entry_id,
        })
}

/// Fetches the entries of `entry_ids` that exist in the workspace, ordered by id.
pub async fn get_entries_by_ids<C>(
    db: &C,
    workspace_id: i64,
    entry_ids: &[i64],
) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    if entry_ids.is_empty() {
        return Ok(Vec::new());
    }
    LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::Id.is_in(entry_ids.iter().copied()))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Fetches every entry linked to a template, ordered by date.
pub async fn get_entries_for_template<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::TemplateId.eq(template_id))
        .order_by_asc(ledger_entry::Column::EntryDate)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Fetches every entry linked to a loan, in installment order.
pub async fn get_entries_for_loan<C>(
    db: &C,
    workspace_id: i64,
    loan_id: i64,
) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::LoanId.eq(loan_id))
        .order_by_asc(ledger_entry::Column::EntryDate)
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Whether a generated entry has been edited away from its template.
///
/// An entry counts as edited when its name, amount, category or account no
/// longer matches the template. Edited entries are never refreshed from the
/// template again.
#[must_use]
pub fn is_modified(entry: &ledger_entry::Model, template: &recurring_template::Model) -> bool {
    entry.name != template.description
        || (entry.amount - template.amount).abs() >= 0.005
        || entry.category_id != Some(template.category_id)
        || entry.account_id != template.account_id
}
