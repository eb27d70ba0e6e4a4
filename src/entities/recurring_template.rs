//! Recurring template entity - A monthly income or expense that is projected
//! forward into ledger entries.
//!
//! The day of month for every projection is taken from `start_date`.
//! `settlement_intent` only matters when `account_id` is a credit card account.

use super::enums::{EntryType, SettlementIntent};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Recurring template database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recurring_templates")]
pub struct Model {
    /// Unique identifier for the template
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Workspace (tenant) owning the template
    pub workspace_id: i64,
    /// Name given to every generated entry
    pub description: String,
    /// Fixed amount of every generated entry (always positive)
    pub amount: f64,
    /// Income or expense
    pub entry_type: EntryType,
    /// Category of every generated entry
    pub category_id: i64,
    /// Account every generated entry is posted to
    pub account_id: i64,
    /// First due date; its day of month is the recurring day
    pub start_date: Date,
    /// Last date (inclusive) a projection may fall on
    pub end_date: Option<Date>,
    /// Intent for generated card entries, `deferred` when absent
    pub settlement_intent: Option<SettlementIntent>,
    /// Inactive templates are skipped by the generator
    pub is_active: bool,
    /// Soft delete flag
    pub is_deleted: bool,
    /// When the template was created
    pub created_at: DateTimeUtc,
    /// When the template was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `RecurringTemplate` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each template posts to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    /// One template generates many ledger entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    LedgerEntries,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
