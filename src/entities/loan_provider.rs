//! Loan provider entity - The lender or pay-later service behind a loan.
//!
//! A provider carries the statement cutoff day used to work out which month
//! the first installment of a new loan falls in.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loan provider database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loan_providers")]
pub struct Model {
    /// Unique identifier for the provider
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Workspace (tenant) owning the provider
    pub workspace_id: i64,
    /// Display name of the provider
    pub name: String,
    /// Day of month (1-31) on which the provider closes its statement
    pub cutoff_day: u32,
    /// Soft delete flag
    pub is_deleted: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::loan::Entity")]
    Loans,
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
