//! Ledger entry entity - A single posting against an account on a date.
//!
//! Entries are either actual (entered by a user, or confirmed) or projected
//! (generated from a recurring template or a loan schedule). `template_id` and
//! `loan_id` are never both set.
//!
//! The `cc_state`, `billed_at` and `settlement_intent` columns only carry values
//! for entries posted to credit card accounts. Code outside the storage layer
//! reads and writes them through
//! [`AccountSettlementData`](crate::core::cc::AccountSettlementData), which keeps
//! the three columns consistent with each other.

use super::enums::{CcState, EntryOrigin, EntryType, SettlementIntent};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Workspace (tenant) owning the entry
    pub workspace_id: i64,
    /// Account the entry is posted to
    pub account_id: i64,
    /// Optional category
    pub category_id: Option<i64>,
    /// Human-readable name
    pub name: String,
    /// Amount, always positive; direction comes from `entry_type`
    pub amount: f64,
    /// Income, expense or transfer
    pub entry_type: EntryType,
    /// Posting date
    pub entry_date: Date,
    /// Whether the entry has been paid
    pub is_paid: bool,
    /// Manual, recurring or loan
    pub origin: EntryOrigin,
    /// Template this entry was generated from
    pub template_id: Option<i64>,
    /// Loan this entry is an installment of
    pub loan_id: Option<i64>,
    /// Generated ahead of time rather than confirmed by a user
    pub is_projected: bool,
    /// First day of the month a projection was generated for.
    /// Unique together with `template_id`.
    pub projection_month: Option<Date>,
    /// 1-based installment position for loan entries
    pub installment_number: Option<i32>,
    /// CC lifecycle state
    pub cc_state: Option<CcState>,
    /// When the entry was billed
    pub billed_at: Option<DateTimeUtc>,
    /// CC settlement intent
    pub settlement_intent: Option<SettlementIntent>,
    /// Shared by all entries produced or consumed by one transfer/settlement
    pub transfer_pair_id: Option<String>,
    /// When the entry was created
    pub created_at: DateTimeUtc,
    /// When the entry was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `LedgerEntry` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry is posted to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    /// Generated entries belong to a template
    #[sea_orm(
        belongs_to = "super::recurring_template::Entity",
        from = "Column::TemplateId",
        to = "super::recurring_template::Column::Id"
    )]
    Template,
    /// Installment entries belong to a loan
    #[sea_orm(
        belongs_to = "super::loan::Entity",
        from = "Column::LoanId",
        to = "super::loan::Column::Id"
    )]
    Loan,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::recurring_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
