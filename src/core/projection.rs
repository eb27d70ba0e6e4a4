//! Projection generator - expands recurring templates into monthly ledger entries.
//!
//! For every active template the generator makes sure one entry exists for
//! each due month between the first upcoming occurrence and the rolling
//! horizon (today plus `horizon_months`, capped by the template's end date).
//! A month is skipped when the template already has an entry in it or when
//! the user excluded it. The check runs inside the same transaction as the
//! insert, and the `(template_id, projection_month)` unique index turns a
//! concurrent duplicate insert into a no-op.
//!
//! Entries whose name, amount, category or account no longer match their
//! template are user-edited. Template updates refresh every other linked entry
//! and leave edited ones untouched.

use crate::{
    config::Settings,
    core::{
        calendar::YearMonth,
        cc::AccountSettlementData,
        entry::{get_entries_for_template, get_entry, is_modified, validate_amount, validate_name},
        exclusion::excluded_months,
        lookup,
    },
    entities::{
        CcState, EntryOrigin, EntryType, LedgerEntry, ProjectionExclusion, RecurringTemplate,
        SettlementIntent, ledger_entry, projection_exclusion, recurring_template,
    },
    errors::{Error, Result, SyncFailure},
    events::{DomainEvent, EventKind, EventPublisher},
};
use chrono::{Datelike, Months, NaiveDate, Utc};
use sea_orm::{
    QueryOrder, Set, TransactionTrait,
    prelude::*,
    sea_query::{Expr, OnConflict},
};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

const MAX_DESCRIPTION_LEN: usize = 200;

/// Input for a new recurring template.
#[derive(Debug, Clone)]
pub struct TemplateInput {
    pub description: String,
    pub amount: f64,
    pub entry_type: EntryType,
    pub category_id: i64,
    pub account_id: i64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub settlement_intent: Option<SettlementIntent>,
    /// An existing manual entry to adopt as the template's occurrence for its month
    pub link_entry_id: Option<i64>,
}

/// Changes to a template. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category_id: Option<i64>,
    pub account_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub settlement_intent: Option<Option<SettlementIntent>>,
}

/// Result of creating or updating a template.
#[derive(Debug, Clone)]
pub struct TemplateOutcome {
    pub template: recurring_template::Model,
    /// New projected entries inserted
    pub entries_created: u64,
    /// Unedited entries refreshed from the template
    pub entries_refreshed: usize,
    /// Unedited, unpaid projections removed for falling outside the template's range
    pub entries_pruned: usize,
}

/// Result of a full sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub templates_processed: usize,
    pub entries_created: u64,
}

/// Due dates of a template from the first upcoming occurrence up to the horizon.
///
/// The first occurrence is the start date when it lies in the future, otherwise
/// the template's day of month in the current month if that is not yet past,
/// otherwise in the next month. Days are clamped to the end of short months.
#[must_use]
pub fn due_dates(
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    today: NaiveDate,
    horizon_months: u32,
) -> Vec<NaiveDate> {
    let day = start_date.day();
    let first = if start_date > today {
        start_date
    } else {
        let this_month = YearMonth::of(today).day_clamped(day);
        if this_month >= today {
            this_month
        } else {
            YearMonth::of(today).next().day_clamped(day)
        }
    };

    let horizon = today
        .checked_add_months(Months::new(horizon_months))
        .unwrap_or(NaiveDate::MAX);
    let limit = end_date.map_or(horizon, |end| end.min(horizon));

    let mut dates = Vec::new();
    let mut month = YearMonth::of(first);
    loop {
        let due = month.day_clamped(day);
        if due > limit {
            break;
        }
        dates.push(due);
        month = month.next();
    }
    dates
}

fn projection_model(
    template: &recurring_template::Model,
    due: NaiveDate,
    settlement: AccountSettlementData,
) -> ledger_entry::ActiveModel {
    let now = Utc::now();
    let mut active = ledger_entry::ActiveModel {
        workspace_id: Set(template.workspace_id),
        account_id: Set(template.account_id),
        category_id: Set(Some(template.category_id)),
        name: Set(template.description.clone()),
        amount: Set(template.amount),
        entry_type: Set(template.entry_type),
        entry_date: Set(due),
        is_paid: Set(false),
        origin: Set(EntryOrigin::Recurring),
        template_id: Set(Some(template.id)),
        loan_id: Set(None),
        is_projected: Set(true),
        projection_month: Set(Some(YearMonth::of(due).first_day())),
        installment_number: Set(None),
        transfer_pair_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    settlement.apply(&mut active);
    active
}

/// Fills the missing, non-excluded months of one template on `db`.
///
/// Meant to run inside the caller's transaction. Returns the number of rows
/// the store actually inserted.
pub(crate) async fn fill_missing_months<C>(
    db: &C,
    template: &recurring_template::Model,
    settings: &Settings,
    today: NaiveDate,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    if !template.is_active || template.is_deleted {
        return Ok(0);
    }

    let account = lookup::require_account(db, template.workspace_id, template.account_id).await?;

    let existing: HashSet<YearMonth> =
        get_entries_for_template(db, template.workspace_id, template.id)
            .await?
            .iter()
            .flat_map(|e| {
                [Some(YearMonth::of(e.entry_date)), e.projection_month.map(YearMonth::of)]
            })
            .flatten()
            .collect();
    let excluded = excluded_months(db, template.workspace_id, template.id).await?;

    let models: Vec<ledger_entry::ActiveModel> = due_dates(
        template.start_date,
        template.end_date,
        today,
        settings.projection.horizon_months,
    )
    .into_iter()
    .filter(|due| {
        let month = YearMonth::of(*due);
        !existing.contains(&month) && !excluded.contains(&month)
    })
    .map(|due| {
        let settlement = AccountSettlementData::for_new_entry(
            account.is_credit_card(),
            template.settlement_intent,
            settings.settlement.default_intent,
        );
        projection_model(template, due, settlement)
    })
    .collect();

    if models.is_empty() {
        debug!("Template {} already covers its horizon", template.id);
        return Ok(0);
    }

    let inserted = LedgerEntry::insert_many(models)
        .on_conflict(
            OnConflict::columns([
                ledger_entry::Column::TemplateId,
                ledger_entry::Column::ProjectionMonth,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    debug!("Template {}: inserted {} projections", template.id, inserted);
    Ok(inserted)
}

async fn find_template<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
) -> Result<recurring_template::Model>
where
    C: ConnectionTrait,
{
    RecurringTemplate::find_by_id(template_id)
        .filter(recurring_template::Column::WorkspaceId.eq(workspace_id))
        .filter(recurring_template::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "recurring template",
            id: template_id,
        })
}

/// Fetches a live template in the workspace.
pub async fn get_template(
    db: &DatabaseConnection,
    workspace_id: i64,
    template_id: i64,
) -> Result<recurring_template::Model> {
    find_template(db, workspace_id, template_id).await
}

fn validate_range(start_date: NaiveDate, end_date: Option<NaiveDate>) -> Result<()> {
    if end_date.is_some_and(|end| end < start_date) {
        return Err(Error::validation("End date cannot be before start date"));
    }
    Ok(())
}

fn batch_event(template: &recurring_template::Model, created: u64) -> DomainEvent {
    DomainEvent::new(EventKind::EntryBatchCreated, template.workspace_id)
        .with("template_id", template.id)
        .with("count", created)
}

/// Creates a template and its initial projections as one unit.
///
/// A missing account, category or linked entry fails the whole call and
/// nothing is written.
#[instrument(skip(db, events, settings, input), fields(description = %input.description))]
pub async fn create_template(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    workspace_id: i64,
    input: TemplateInput,
    today: NaiveDate,
) -> Result<TemplateOutcome> {
    let description = validate_name(&input.description, MAX_DESCRIPTION_LEN)?;
    let amount = validate_amount(input.amount)?;
    validate_range(input.start_date, input.end_date)?;

    let txn = db.begin().await?;

    let account = lookup::require_account(&txn, workspace_id, input.account_id).await?;
    lookup::require_category(&txn, workspace_id, input.category_id).await?;

    let now = Utc::now();
    let template = recurring_template::ActiveModel {
        workspace_id: Set(workspace_id),
        description: Set(description),
        amount: Set(amount),
        entry_type: Set(input.entry_type),
        category_id: Set(input.category_id),
        account_id: Set(account.id),
        start_date: Set(input.start_date),
        end_date: Set(input.end_date),
        settlement_intent: Set(input
            .settlement_intent
            .filter(|_| account.is_credit_card())),
        is_active: Set(true),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if let Some(entry_id) = input.link_entry_id {
        let entry = get_entry(&txn, workspace_id, entry_id).await?;
        if entry.template_id.is_some() || entry.loan_id.is_some() {
            return Err(Error::validation(format!(
                "Entry {entry_id} is already linked to a template or loan"
            )));
        }
        let month = YearMonth::of(entry.entry_date).first_day();
        let mut active: ledger_entry::ActiveModel = entry.into();
        active.template_id = Set(Some(template.id));
        active.origin = Set(EntryOrigin::Recurring);
        active.projection_month = Set(Some(month));
        active.updated_at = Set(now);
        active.update(&txn).await?;
    }

    let created = fill_missing_months(&txn, &template, settings, today).await?;

    txn.commit().await?;

    info!(
        "Created template {} with {} projections",
        template.id, created
    );
    events.publish(
        DomainEvent::new(EventKind::TemplateCreated, workspace_id)
            .with("template_id", template.id)
            .with("entries_created", created),
    );
    if created > 0 {
        events.publish(batch_event(&template, created));
    }

    Ok(TemplateOutcome {
        template,
        entries_created: created,
        entries_refreshed: 0,
        entries_pruned: 0,
    })
}

/// Re-derives settlement data when a refreshed entry moves between account kinds.
///
/// Returns `None` when the entry cannot follow the move (it is paid or already
/// past `pending`), in which case it is left as it is.
fn settlement_after_move(
    entry: &ledger_entry::Model,
    to_credit_card: bool,
    intent: Option<SettlementIntent>,
    default_intent: SettlementIntent,
) -> Result<Option<AccountSettlementData>> {
    let current = AccountSettlementData::from_entry(entry)?;
    if current.is_credit_card() == to_credit_card {
        return Ok(Some(current));
    }
    let movable = !entry.is_paid && matches!(current.state(), None | Some(CcState::Pending));
    if !movable {
        return Ok(None);
    }
    Ok(Some(AccountSettlementData::for_new_entry(
        to_credit_card,
        intent.or(current.intent()),
        default_intent,
    )))
}

/// Updates a template, refreshes its unedited entries and fills missing months.
///
/// Edited entries keep their values. Paid state and billing metadata of
/// refreshed entries are preserved. Unedited, unpaid projections that no
/// longer fall between the start and end dates are removed.
#[instrument(skip(db, events, settings, update))]
pub async fn update_template(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    workspace_id: i64,
    template_id: i64,
    update: TemplateUpdate,
    today: NaiveDate,
) -> Result<TemplateOutcome> {
    let description = update
        .description
        .as_deref()
        .map(|d| validate_name(d, MAX_DESCRIPTION_LEN))
        .transpose()?;
    let amount = update.amount.map(validate_amount).transpose()?;

    let txn = db.begin().await?;
    let previous = find_template(&txn, workspace_id, template_id).await?;

    let start_date = update.start_date.unwrap_or(previous.start_date);
    let end_date = update.end_date.unwrap_or(previous.end_date);
    validate_range(start_date, end_date)?;

    let account_id = update.account_id.unwrap_or(previous.account_id);
    let account = lookup::require_account(&txn, workspace_id, account_id).await?;
    let category_id = update.category_id.unwrap_or(previous.category_id);
    lookup::require_category(&txn, workspace_id, category_id).await?;

    let intent = update
        .settlement_intent
        .unwrap_or(previous.settlement_intent)
        .filter(|_| account.is_credit_card());

    let mut active: recurring_template::ActiveModel = previous.clone().into();
    if let Some(description) = description {
        active.description = Set(description);
    }
    if let Some(amount) = amount {
        active.amount = Set(amount);
    }
    active.category_id = Set(category_id);
    active.account_id = Set(account.id);
    active.start_date = Set(start_date);
    active.end_date = Set(end_date);
    active.settlement_intent = Set(intent);
    active.updated_at = Set(Utc::now());
    let template = active.update(&txn).await?;

    let mut refreshed = 0;
    let mut pruned = 0;
    for entry in get_entries_for_template(&txn, workspace_id, template_id).await? {
        // Compared against the template as it was before this update
        if is_modified(&entry, &previous) {
            debug!("Entry {} is user-edited, leaving it as is", entry.id);
            continue;
        }

        let out_of_range = entry.entry_date < start_date
            || end_date.is_some_and(|end| entry.entry_date > end);
        if out_of_range && entry.is_projected && !entry.is_paid {
            LedgerEntry::delete_by_id(entry.id).exec(&txn).await?;
            pruned += 1;
            continue;
        }

        let Some(settlement) = settlement_after_move(
            &entry,
            account.is_credit_card(),
            intent,
            settings.settlement.default_intent,
        )?
        else {
            warn!(
                "Entry {} cannot move between card and non-card accounts, leaving it as is",
                entry.id
            );
            continue;
        };

        let mut entry_active: ledger_entry::ActiveModel = entry.into();
        entry_active.name = Set(template.description.clone());
        entry_active.amount = Set(template.amount);
        entry_active.category_id = Set(Some(template.category_id));
        entry_active.account_id = Set(template.account_id);
        entry_active.entry_type = Set(template.entry_type);
        settlement.apply(&mut entry_active);
        entry_active.updated_at = Set(Utc::now());
        entry_active.update(&txn).await?;
        refreshed += 1;
    }

    let created = fill_missing_months(&txn, &template, settings, today).await?;

    txn.commit().await?;

    info!(
        "Updated template {}: {} refreshed, {} pruned, {} created",
        template_id, refreshed, pruned, created
    );
    events.publish(
        DomainEvent::new(EventKind::TemplateUpdated, workspace_id)
            .with("template_id", template_id)
            .with("entries_refreshed", refreshed)
            .with("entries_pruned", pruned)
            .with("entries_created", created),
    );
    if created > 0 {
        events.publish(batch_event(&template, created));
    }

    Ok(TemplateOutcome {
        template,
        entries_created: created,
        entries_refreshed: refreshed,
        entries_pruned: pruned,
    })
}

/// Deletes a template.
///
/// Projected entries are removed, actual entries are kept with their template
/// link cleared, the template's exclusions are dropped and the template is
/// soft deleted.
#[instrument(skip(db, events))]
pub async fn delete_template(
    db: &DatabaseConnection,
    events: &EventPublisher,
    workspace_id: i64,
    template_id: i64,
) -> Result<()> {
    let txn = db.begin().await?;
    let template = find_template(&txn, workspace_id, template_id).await?;

    let removed = LedgerEntry::delete_many()
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::TemplateId.eq(template_id))
        .filter(ledger_entry::Column::IsProjected.eq(true))
        .exec(&txn)
        .await?
        .rows_affected;

    let orphaned = LedgerEntry::update_many()
        .col_expr(
            ledger_entry::Column::TemplateId,
            Expr::value(Option::<i64>::None),
        )
        .col_expr(
            ledger_entry::Column::ProjectionMonth,
            Expr::value(Option::<NaiveDate>::None),
        )
        .filter(ledger_entry::Column::WorkspaceId.eq(workspace_id))
        .filter(ledger_entry::Column::TemplateId.eq(template_id))
        .exec(&txn)
        .await?
        .rows_affected;

    ProjectionExclusion::delete_many()
        .filter(projection_exclusion::Column::TemplateId.eq(template_id))
        .exec(&txn)
        .await?;

    let mut active: recurring_template::ActiveModel = template.into();
    active.is_deleted = Set(true);
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;

    txn.commit().await?;

    info!(
        "Deleted template {}: {} projections removed, {} entries orphaned",
        template_id, removed, orphaned
    );
    events.publish(
        DomainEvent::new(EventKind::TemplateDeleted, workspace_id)
            .with("template_id", template_id)
            .with("entries_removed", removed)
            .with("entries_orphaned", orphaned),
    );
    Ok(())
}

/// Pauses or resumes a template. Resuming fills the horizon immediately.
pub async fn set_template_active(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    workspace_id: i64,
    template_id: i64,
    is_active: bool,
    today: NaiveDate,
) -> Result<recurring_template::Model> {
    let txn = db.begin().await?;
    let template = find_template(&txn, workspace_id, template_id).await?;
    let mut active: recurring_template::ActiveModel = template.into();
    active.is_active = Set(is_active);
    active.updated_at = Set(Utc::now());
    let template = active.update(&txn).await?;

    let created = fill_missing_months(&txn, &template, settings, today).await?;
    txn.commit().await?;

    if created > 0 {
        events.publish(batch_event(&template, created));
    }
    Ok(template)
}

/// Runs the generator for one template in its own transaction.
pub async fn generate_projections(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    workspace_id: i64,
    template_id: i64,
    today: NaiveDate,
) -> Result<u64> {
    let txn = db.begin().await?;
    let template = find_template(&txn, workspace_id, template_id).await?;
    let created = fill_missing_months(&txn, &template, settings, today).await?;
    txn.commit().await?;

    if created > 0 {
        events.publish(batch_event(&template, created));
    }
    Ok(created)
}

async fn sync_template(
    db: &DatabaseConnection,
    template: &recurring_template::Model,
    settings: &Settings,
    today: NaiveDate,
) -> Result<u64> {
    let txn = db.begin().await?;
    let created = fill_missing_months(&txn, template, settings, today).await?;
    txn.commit().await?;
    Ok(created)
}

/// Extends the horizon of every active template in every workspace.
///
/// Templates are processed independently, each in its own transaction. A
/// failing template is logged and skipped; once all templates have been
/// attempted, the failures are returned together as
/// [`Error::SyncIncomplete`].
#[instrument(skip(db, events, settings))]
pub async fn sync_all(
    db: &DatabaseConnection,
    events: &EventPublisher,
    settings: &Settings,
    today: NaiveDate,
) -> Result<SyncReport> {
    let templates = RecurringTemplate::find()
        .filter(recurring_template::Column::IsActive.eq(true))
        .filter(recurring_template::Column::IsDeleted.eq(false))
        .order_by_asc(recurring_template::Column::WorkspaceId)
        .order_by_asc(recurring_template::Column::Id)
        .all(db)
        .await?;

    info!("Syncing projections for {} templates", templates.len());

    let mut report = SyncReport::default();
    let mut failures = Vec::new();
    for template in &templates {
        match sync_template(db, template, settings, today).await {
            Ok(created) => {
                report.templates_processed += 1;
                report.entries_created += created;
                if created > 0 {
                    events.publish(batch_event(template, created));
                }
            }
            Err(e) => {
                warn!(
                    "Failed to sync template {} in workspace {}: {}",
                    template.id, template.workspace_id, e
                );
                failures.push(SyncFailure {
                    workspace_id: template.workspace_id,
                    template_id: template.id,
                    error: Box::new(e),
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(Error::SyncIncomplete {
            total: templates.len(),
            entries_created: usize::try_from(report.entries_created).unwrap_or(usize::MAX),
            failures,
        });
    }

    info!(
        "Projection sync complete: {} templates, {} new entries",
        report.templates_processed, report.entries_created
    );
    Ok(report)
}
