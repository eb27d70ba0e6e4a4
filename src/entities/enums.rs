//! Shared active enums stored as short strings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of account an entry is posted to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[sea_orm(string_value = "bank")]
    Bank,
    #[sea_orm(string_value = "cash")]
    Cash,
    #[sea_orm(string_value = "credit_card")]
    CreditCard,
}

impl AccountType {
    #[must_use]
    pub const fn is_credit_card(self) -> bool {
        matches!(self, Self::CreditCard)
    }
}

/// Direction of a ledger entry. Amounts are always stored positive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    #[sea_orm(string_value = "income")]
    Income,
    #[sea_orm(string_value = "expense")]
    Expense,
    /// Money moved out of a funding account to pay down a card.
    #[sea_orm(string_value = "transfer")]
    Transfer,
}

/// What created a ledger entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "recurring")]
    Recurring,
    #[sea_orm(string_value = "loan")]
    Loan,
}

/// Billing lifecycle of an entry posted to a credit card account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum CcState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "billed")]
    Billed,
    #[sea_orm(string_value = "settled")]
    Settled,
}

impl CcState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Billed => "billed",
            Self::Settled => "settled",
        }
    }
}

impl fmt::Display for CcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a card entry is expected to be funded.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SettlementIntent {
    /// Paid within the same statement cycle.
    #[sea_orm(string_value = "immediate")]
    Immediate,
    /// Carried to a later settlement.
    #[default]
    #[sea_orm(string_value = "deferred")]
    Deferred,
}

impl SettlementIntent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for SettlementIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
