//! Account entity - Funding accounts and credit cards entries are posted to.
//!
//! The core only reads accounts: existence within a workspace and whether the
//! account is a credit card decide how entries posted to it behave.

use super::enums::AccountType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier for the account
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Workspace (tenant) owning the account
    pub workspace_id: i64,
    /// Display name, e.g. "Main checking" or "Travel card"
    pub name: String,
    /// Bank, cash or credit card
    pub account_type: AccountType,
    /// Soft delete flag
    pub is_deleted: bool,
}

impl Model {
    /// Whether entries on this account take part in the CC lifecycle.
    #[must_use]
    pub const fn is_credit_card(&self) -> bool {
        self.account_type.is_credit_card()
    }
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account has many ledger entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    LedgerEntries,
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
