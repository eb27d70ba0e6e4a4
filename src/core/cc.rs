//! Credit card lifecycle - pending → billed → settled.
//!
//! Entries posted to a credit card account carry a lifecycle state, a billing
//! timestamp and a settlement intent. [`AccountSettlementData`] is the only way
//! the rest of the core reads or writes those columns: it is built from a
//! stored row (rejecting rows whose columns disagree) and written back as a
//! unit, so a row cannot end up with a state but no intent, or a billing
//! timestamp on a pending entry.
//!
//! `pending ↔ billed` may be toggled by the user until the entry is settled.
//! `billed → settled` happens through settlement, or through the same-month
//! flow for entries with immediate intent.

use crate::{
    core::calendar::round2,
    entities::{CcState, EntryType, LedgerEntry, SettlementIntent, ledger_entry},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

/// Settlement columns of a ledger entry, present only for credit card accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSettlementData {
    /// The entry is not posted to a credit card account.
    None,
    /// The entry takes part in the CC lifecycle.
    CreditCard {
        state: CcState,
        intent: SettlementIntent,
        billed_at: Option<DateTimeUtc>,
    },
}

impl AccountSettlementData {
    /// Settlement data for a new, unpaid entry on an account.
    ///
    /// Non-card accounts get [`AccountSettlementData::None`] whatever intent is passed.
    #[must_use]
    pub fn for_new_entry(
        is_credit_card: bool,
        intent: Option<SettlementIntent>,
        default_intent: SettlementIntent,
    ) -> Self {
        if is_credit_card {
            Self::CreditCard {
                state: CcState::Pending,
                intent: intent.unwrap_or(default_intent),
                billed_at: None,
            }
        } else {
            Self::None
        }
    }

    /// Reads the settlement columns of a stored entry, checking they are consistent.
    pub fn from_entry(entry: &ledger_entry::Model) -> Result<Self> {
        let corrupt = |reason: &str| Error::CorruptEntry {
            id: entry.id,
            reason: reason.to_string(),
        };
        match (entry.cc_state, entry.settlement_intent) {
            (None, None) => {
                if entry.billed_at.is_some() {
                    return Err(corrupt("billed_at set without a CC state"));
                }
                Ok(Self::None)
            }
            (Some(state), Some(intent)) => {
                let billed = matches!(state, CcState::Billed | CcState::Settled);
                if billed != entry.billed_at.is_some() {
                    return Err(corrupt("billed_at does not match CC state"));
                }
                if state == CcState::Settled && !entry.is_paid {
                    return Err(corrupt("settled entry is not paid"));
                }
                if state == CcState::Pending && entry.is_paid {
                    return Err(corrupt("pending entry is paid"));
                }
                Ok(Self::CreditCard {
                    state,
                    intent,
                    billed_at: entry.billed_at,
                })
            }
            _ => Err(corrupt("CC state and settlement intent must be set together")),
        }
    }

    /// Writes the settlement columns into an active model.
    pub fn apply(self, model: &mut ledger_entry::ActiveModel) {
        match self {
            Self::None => {
                model.cc_state = Set(None);
                model.settlement_intent = Set(None);
                model.billed_at = Set(None);
            }
            Self::CreditCard {
                state,
                intent,
                billed_at,
            } => {
                model.cc_state = Set(Some(state));
                model.settlement_intent = Set(Some(intent));
                model.billed_at = Set(billed_at);
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> Option<CcState> {
        match self {
            Self::None => None,
            Self::CreditCard { state, .. } => Some(*state),
        }
    }

    #[must_use]
    pub const fn intent(&self) -> Option<SettlementIntent> {
        match self {
            Self::None => None,
            Self::CreditCard { intent, .. } => Some(*intent),
        }
    }

    #[must_use]
    pub const fn is_credit_card(&self) -> bool {
        matches!(self, Self::CreditCard { .. })
    }

    /// Moves a card entry to `to`, stamping `billed_at` on entry to `billed`.
    pub fn transition(self, entry_id: i64, to: CcState, now: DateTimeUtc) -> Result<Self> {
        let Self::CreditCard {
            state,
            intent,
            billed_at,
        } = self
        else {
            return Err(Error::NotCreditCardEntry { id: entry_id });
        };

        let state = state.transition(entry_id, to)?;
        let billed_at = match state {
            CcState::Pending => None,
            CcState::Billed => Some(now),
            CcState::Settled => billed_at.or(Some(now)),
        };
        Ok(Self::CreditCard {
            state,
            intent,
            billed_at,
        })
    }
}

impl CcState {
    /// Validates a single lifecycle step.
    ///
    /// Allowed: `pending → billed`, `billed → pending` (undo) and `billed → settled`.
    /// A settled entry never moves again.
    pub fn transition(self, entry_id: i64, to: Self) -> Result<Self> {
        match (self, to) {
            (Self::Pending, Self::Billed)
            | (Self::Billed, Self::Pending)
            | (Self::Billed, Self::Settled) => Ok(to),
            (from, to) => Err(Error::InvalidCcTransition {
                id: entry_id,
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

/// Card balances over a date range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CcMetrics {
    /// Unbilled, unpaid card expenses dated in the range
    pub pending: f64,
    /// Billed, unpaid card expenses with deferred intent dated up to the end of the range
    pub outstanding: f64,
    /// Every card expense dated in the range, whatever its state
    pub purchases: f64,
}

async fn find_entry<C>(db: &C, workspace_id: i64, entry_id: i64) -> Result<ledger_entry::Model>
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

async fn write_transition<C>(
    db: &C,
    entry: ledger_entry::Model,
    to: CcState,
) -> Result<ledger_entry::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let data = AccountSettlementData::from_entry(&entry)?.transition(entry.id, to, now)?;
    let mut active: ledger_entry::ActiveModel = entry.into();
    data.apply(&mut active);
    if to == CcState::Settled {
        active.is_paid = Set(true);
    }
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}

/// Marks a pending card entry as billed.
pub async fn mark_billed(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_id: i64,
) -> Result<ledger_entry::Model> {
    let entry = find_entry(db, workspace_id, entry_id).await?;
    write_transition(db, entry, CcState::Billed).await
}

/// Reverts a billed card entry to pending.
pub async fn unmark_billed(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_id: i64,
) -> Result<ledger_entry::Model> {
    let entry = find_entry(db, workspace_id, entry_id).await?;
    write_transition(db, entry, CcState::Pending).await
}

/// Flips a card entry between pending and billed.
///
/// Fails with [`Error::InvalidCcTransition`] on a settled entry and with
/// [`Error::NotCreditCardEntry`] on an entry outside a card account.
pub async fn toggle_billed(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_id: i64,
) -> Result<ledger_entry::Model> {
    let entry = find_entry(db, workspace_id, entry_id).await?;
    let target = match AccountSettlementData::from_entry(&entry)?.state() {
        None => return Err(Error::NotCreditCardEntry { id: entry_id }),
        Some(CcState::Pending) => CcState::Billed,
        Some(CcState::Billed | CcState::Settled) => CcState::Pending,
    };
    write_transition(db, entry, target).await
}

/// Moves a batch of pending card entries to billed in one transaction.
///
/// Each row gets its own billing timestamp. Ids outside the workspace are
/// skipped and missing from the result. Any resolved entry that is not a
/// pending card entry fails the whole batch before anything is written.
#[instrument(skip(db, entry_ids), fields(requested = entry_ids.len()))]
pub async fn batch_mark_billed(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_ids: &[i64],
) -> Result<Vec<ledger_entry::Model>> {
    if entry_ids.is_empty() {
        return Ok(Vec::new());
    }

    let txn = db.begin().await?;

    let entries = LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::Id.is_in(entry_ids.iter().copied()))
        .order_by_asc(ledger_entry::Column::Id)
        .all(&txn)
        .await?;

    if entries.len() < entry_ids.len() {
        debug!(
            "Skipping {} ids outside workspace {}",
            entry_ids.len() - entries.len(),
            workspace_id
        );
    }

    for entry in &entries {
        AccountSettlementData::from_entry(entry)?.transition(
            entry.id,
            CcState::Billed,
            Utc::now(),
        )?;
    }

    let mut billed = Vec::with_capacity(entries.len());
    for entry in entries {
        billed.push(write_transition(&txn, entry, CcState::Billed).await?);
    }

    txn.commit().await?;
    info!("Billed {} card entries", billed.len());
    Ok(billed)
}

/// Computes card balances for a workspace, optionally for a single card account.
///
/// Loan installments count exactly like manually entered expenses.
pub async fn cc_metrics(
    db: &DatabaseConnection,
    workspace_id: i64,
    account_id: Option<i64>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<CcMetrics> {
    let mut query = LedgerEntry::find()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::CcState.is_not_null())
        .filter(ledger_entry::Column::EntryType.eq(EntryType::Expense))
        .filter(ledger_entry::Column::EntryDate.lte(to));
    if let Some(account_id) = account_id {
        query = query.filter(ledger_entry::Column::AccountId.eq(account_id));
    }

    let mut metrics = CcMetrics::default();
    for entry in query.all(db).await? {
        let in_range = entry.entry_date >= from;
        if in_range {
            metrics.purchases += entry.amount;
        }
        match (entry.cc_state, entry.settlement_intent, entry.is_paid) {
            (Some(CcState::Pending), _, false) if in_range => metrics.pending += entry.amount,
            (Some(CcState::Billed), Some(SettlementIntent::Deferred), false) => {
                metrics.outstanding += entry.amount;
            }
            _ => {}
        }
    }

    metrics.pending = round2(metrics.pending);
    metrics.outstanding = round2(metrics.outstanding);
    metrics.purchases = round2(metrics.purchases);
    Ok(metrics)
}
