//! Projection exclusions - months a user removed from a template's projections.
//!
//! Removing a projected entry through [`exclude_projection`] records its month
//! so that no later regeneration recreates it. The generator only ever reads
//! these rows through [`excluded_months`].

use crate::{
    core::{calendar::YearMonth, entry::get_entry},
    entities::{
        ProjectionExclusion, RecurringTemplate, ledger_entry, projection_exclusion,
        recurring_template,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    QueryOrder, Set, TransactionTrait, prelude::*, sea_query::OnConflict,
};
use std::collections::HashSet;
use tracing::info;

async fn require_template<C>(db: &C, workspace_id: i64, template_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    RecurringTemplate::find_by_id(template_id)
        .filter(recurring_template::Column::WorkspaceId.eq(workspace_id))
        .filter(recurring_template::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .map(|_| ())
        .ok_or(Error::NotFound {
            entity: "recurring template",
            id: template_id,
        })
}

async fn insert_exclusion<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
    month: YearMonth,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let exclusion = projection_exclusion::ActiveModel {
        workspace_id: Set(workspace_id),
        template_id: Set(template_id),
        month_start: Set(month.first_day()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    // Excluding an already excluded month is a no-op
    ProjectionExclusion::insert(exclusion)
        .on_conflict(
            OnConflict::columns([
                projection_exclusion::Column::TemplateId,
                projection_exclusion::Column::MonthStart,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Records that `month` must not be projected for the template.
pub async fn add_exclusion(
    db: &DatabaseConnection,
    workspace_id: i64,
    template_id: i64,
    month: YearMonth,
) -> Result<()> {
    require_template(db, workspace_id, template_id).await?;
    insert_exclusion(db, workspace_id, template_id, month).await
}

/// Removes an exclusion so the next generation pass may fill the month again.
///
/// Returns whether an exclusion existed.
pub async fn remove_exclusion(
    db: &DatabaseConnection,
    workspace_id: i64,
    template_id: i64,
    month: YearMonth,
) -> Result<bool> {
    let result = ProjectionExclusion::delete_many()
        .filter(projection_exclusion::Column::WorkspaceId.eq(workspace_id))
        .filter(projection_exclusion::Column::TemplateId.eq(template_id))
        .filter(projection_exclusion::Column::MonthStart.eq(month.first_day()))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Whether the month starting at (or containing) `month_start` is excluded.
pub async fn is_excluded<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
    month_start: NaiveDate,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let count = ProjectionExclusion::find()
        .filter(projection_exclusion::Column::WorkspaceId.eq(workspace_id))
        .filter(projection_exclusion::Column::TemplateId.eq(template_id))
        .filter(
            projection_exclusion::Column::MonthStart.eq(YearMonth::of(month_start).first_day()),
        )
        .count(db)
        .await?;
    Ok(count > 0)
}

/// All excluded months of a template.
pub async fn excluded_months<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
) -> Result<HashSet<YearMonth>>
where
    C: ConnectionTrait,
{
    Ok(list_exclusions(db, workspace_id, template_id)
        .await?
        .into_iter()
        .map(|e| YearMonth::of(e.month_start))
        .collect())
}

/// Lists a template's exclusions, oldest month first.
pub async fn list_exclusions<C>(
    db: &C,
    workspace_id: i64,
    template_id: i64,
) -> Result<Vec<projection_exclusion::Model>>
where
    C: ConnectionTrait,
{
    ProjectionExclusion::find()
        .filter(projection_exclusion::Column::WorkspaceId.eq(workspace_id))
        .filter(projection_exclusion::Column::TemplateId.eq(template_id))
        .order_by_asc(projection_exclusion::Column::MonthStart)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Deletes a projected entry and excludes its month from future generation.
///
/// Only unpaid projections linked to a template can be excluded; anything
/// else is reported as a validation error.
pub async fn exclude_projection(
    db: &DatabaseConnection,
    workspace_id: i64,
    entry_id: i64,
) -> Result<YearMonth> {
    let txn = db.begin().await?;

    let entry = get_entry(&txn, workspace_id, entry_id).await?;
    let Some(template_id) = entry.template_id else {
        return Err(Error::validation(format!(
            "Entry {entry_id} is not linked to a recurring template"
        )));
    };
    if !entry.is_projected || entry.is_paid {
        return Err(Error::validation(format!(
            "Entry {entry_id} is not an unpaid projection"
        )));
    }

    let month = entry
        .projection_month
        .map_or_else(|| YearMonth::of(entry.entry_date), YearMonth::of);

    ledger_entry::Entity::delete_by_id(entry.id).exec(&txn).await?;
    insert_exclusion(&txn, workspace_id, template_id, month).await?;

    txn.commit().await?;
    info!(
        "Excluded {} from template {} (entry {} removed)",
        month, template_id, entry_id
    );
    Ok(month)
}
