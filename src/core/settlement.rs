//! Settlement engine - pays off billed card entries from a funding account.
//!
//! A settlement creates one transfer entry on the funding account for the sum
//! of the selected entries and moves every selected entry from `billed` to
//! `settled`. Both writes share one transaction; if the bulk transition touches
//! fewer rows than were selected, the transaction is dropped and nothing is
//! kept, including the transfer entry.

use crate::{
    core::{calendar::round2, lookup},
    entities::{
        CcState, EntryOrigin, EntryType, LedgerEntry, SettlementIntent, ledger_entry,
    },
    errors::{Error, Result},
    events::{DomainEvent, EventKind, EventPublisher},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};
use uuid::Uuid;

/// Entries to settle and the accounts involved.
#[derive(Debug, Clone)]
pub struct SettleArgs {
    pub entry_ids: Vec<i64>,
    /// Non-card account the money comes from
    pub source_account_id: i64,
    /// Card account whose billed entries are paid off
    pub target_account_id: i64,
}

/// Outcome of a successful settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementResult {
    pub transfer_entry_id: i64,
    /// Shared by the transfer entry and every entry it settled
    pub transfer_pair_id: String,
    pub settled_count: usize,
    pub total_amount: f64,
    pub settled_at: DateTime<Utc>,
}

fn check_entries(entries: &[ledger_entry::Model], target_account_id: i64) -> Result<()> {
    for entry in entries {
        if entry.cc_state != Some(CcState::Billed) {
            return Err(Error::NotBilled { id: entry.id });
        }
    }
    for entry in entries {
        if entry.settlement_intent != Some(SettlementIntent::Deferred) {
            return Err(Error::NotDeferred { id: entry.id });
        }
    }
    for entry in entries {
        if entry.account_id != target_account_id {
            return Err(Error::EntryAccountMismatch {
                id: entry.id,
                account_id: target_account_id,
            });
        }
    }
    Ok(())
}

/// Settles billed, deferred card entries against a funding account.
///
/// Preconditions are checked in this order, each failing with its own error:
/// a non-empty id list, a non-card source account, a card target account,
/// every id resolving in the workspace, every entry billed, every entry with
/// deferred intent and every entry posted to the target account.
#[instrument(skip(db, events, args), fields(entries = args.entry_ids.len()))]
pub async fn settle(
    db: &DatabaseConnection,
    events: &EventPublisher,
    workspace_id: i64,
    args: SettleArgs,
) -> Result<SettlementResult> {
    let mut entry_ids = args.entry_ids;
    entry_ids.sort_unstable();
    entry_ids.dedup();
    if entry_ids.is_empty() {
        return Err(Error::EmptySettlement);
    }

    let txn = db.begin().await?;

    let source = lookup::require_account(&txn, workspace_id, args.source_account_id).await?;
    if source.is_credit_card() {
        return Err(Error::SourceIsCreditCard { id: source.id });
    }
    let target = lookup::require_account(&txn, workspace_id, args.target_account_id).await?;
    if !target.is_credit_card() {
        return Err(Error::TargetNotCreditCard { id: target.id });
    }

    let entries = LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::Id.is_in(entry_ids.iter().copied()))
        .order_by_asc(ledger_entry::Column::Id)
        .all(&txn)
        .await?;
    if entries.len() != entry_ids.len() {
        return Err(Error::EntryCountMismatch {
            requested: entry_ids.len(),
            found: entries.len(),
        });
    }
    check_entries(&entries, target.id)?;

    let total_amount = round2(entries.iter().map(|e| e.amount).sum());
    let settled_at = Utc::now();
    let transfer_pair_id = Uuid::new_v4().to_string();

    let transfer = ledger_entry::ActiveModel {
        workspace_id: Set(workspace_id),
        account_id: Set(source.id),
        category_id: Set(None),
        name: Set(format!("Card payment: {}", target.name)),
        amount: Set(total_amount),
        entry_type: Set(EntryType::Transfer),
        entry_date: Set(settled_at.date_naive()),
        is_paid: Set(true),
        origin: Set(EntryOrigin::Manual),
        template_id: Set(None),
        loan_id: Set(None),
        is_projected: Set(false),
        projection_month: Set(None),
        installment_number: Set(None),
        cc_state: Set(None),
        billed_at: Set(None),
        settlement_intent: Set(None),
        transfer_pair_id: Set(Some(transfer_pair_id.clone())),
        created_at: Set(settled_at),
        updated_at: Set(settled_at),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let affected = LedgerEntry::update_many()
        .col_expr(ledger_entry::Column::CcState, Expr::value(CcState::Settled))
        .col_expr(ledger_entry::Column::IsPaid, Expr::value(true))
        .col_expr(ledger_entry::Column::IsProjected, Expr::value(false))
        .col_expr(
            ledger_entry::Column::TransferPairId,
            Expr::value(transfer_pair_id.clone()),
        )
        .col_expr(ledger_entry::Column::UpdatedAt, Expr::value(settled_at))
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::Id.is_in(entry_ids.iter().copied()))
        .filter(ledger_entry::Column::CcState.eq(CcState::Billed))
        .exec(&txn)
        .await?
        .rows_affected;

    let expected = entry_ids.len() as u64;
    if affected != expected {
        // Dropping the transaction rolls back the transfer entry as well
        return Err(Error::AtomicityFailure { expected, affected });
    }

    txn.commit().await?;

    let result = SettlementResult {
        transfer_entry_id: transfer.id,
        transfer_pair_id,
        settled_count: entries.len(),
        total_amount,
        settled_at,
    };

    info!(
        "Settled {} entries for {:.2} from account {} to card {}",
        result.settled_count, total_amount, source.id, target.id
    );
    events.publish(
        DomainEvent::new(EventKind::SettlementCompleted, workspace_id)
            .with("transfer_entry_id", result.transfer_entry_id)
            .with("transfer_pair_id", &result.transfer_pair_id)
            .with("settled_count", result.settled_count)
            .with("total_amount", format!("{total_amount:.2}"))
            .with("settled_at", settled_at.to_rfc3339()),
    );

    Ok(result)
}

/// Fetches every entry created or settled by one settlement, transfer first.
pub async fn get_settlement_group(
    db: &DatabaseConnection,
    workspace_id: i64,
    transfer_pair_id: &str,
) -> Result<Vec<ledger_entry::Model>> {
    let mut entries = LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::TransferPairId.eq(transfer_pair_id))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await?;
    entries.sort_by_key(|e| e.entry_type != EntryType::Transfer);
    Ok(entries)
}
