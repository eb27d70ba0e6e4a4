//! Loan entity - An installment purchase expanded into one ledger entry per due month.
//!
//! Amount, term and schedule are fixed at creation; only `item_name`, `notes`
//! and `provider_id` change afterwards.

use super::enums::SettlementIntent;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loan database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    /// Unique identifier for the loan
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Workspace (tenant) owning the loan
    pub workspace_id: i64,
    /// Lender or pay-later service
    pub provider_id: i64,
    /// Account the installments are posted to
    pub account_id: i64,
    /// What was bought
    pub item_name: String,
    /// Free-form notes
    pub notes: Option<String>,
    /// Principal
    pub total_amount: f64,
    /// Term in months
    pub num_months: i32,
    /// Purchase date, compared against the provider cutoff day
    pub purchase_date: Date,
    /// Flat interest rate in percent over the whole term
    pub interest_rate: f64,
    /// Computed installment amount
    pub monthly_payment: f64,
    /// Year of the first installment
    pub first_payment_year: i32,
    /// Month (1-12) of the first installment
    pub first_payment_month: u32,
    /// Intent for card-backed installments
    pub settlement_intent: Option<SettlementIntent>,
    /// Soft delete flag
    pub is_deleted: bool,
    /// When the loan was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Loan and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each loan belongs to one provider
    #[sea_orm(
        belongs_to = "super::loan_provider::Entity",
        from = "Column::ProviderId",
        to = "super::loan_provider::Column::Id"
    )]
    Provider,
    /// One loan has many installment entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    LedgerEntries,
}

impl Related<super::loan_provider::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Provider.def()
    }
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
