//! Read-only lookups of the rows the core references but does not own.
//!
//! Every lookup is scoped by workspace. A row that exists in another workspace,
//! or has been soft deleted, is reported exactly like a missing one.

use crate::{
    entities::{Account, Category, LoanProvider, account, category, loan_provider},
    errors::{Error, Result},
};
use sea_orm::prelude::*;

/// Finds an active account in the workspace.
pub async fn require_account<C>(db: &C, workspace_id: i64, account_id: i64) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    Account::find_by_id(account_id)
        .filter(account::Column::WorkspaceId.eq(workspace_id))
        .filter(account::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "account",
            id: account_id,
        })
}

/// Finds an active category in the workspace.
pub async fn require_category<C>(
    db: &C,
    workspace_id: i64,
    category_id: i64,
) -> Result<category::Model>
where
    C: ConnectionTrait,
{
    Category::find_by_id(category_id)
        .filter(category::Column::WorkspaceId.eq(workspace_id))
        .filter(category::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "category",
            id: category_id,
        })
}

/// Finds an active loan provider in the workspace.
pub async fn require_provider<C>(
    db: &C,
    workspace_id: i64,
    provider_id: i64,
) -> Result<loan_provider::Model>
where
    C: ConnectionTrait,
{
    LoanProvider::find_by_id(provider_id)
        .filter(loan_provider::Column::WorkspaceId.eq(workspace_id))
        .filter(loan_provider::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "loan provider",
            id: provider_id,
        })
}

/// Whether the account is a credit card account. Fails if the account is not found.
pub async fn is_credit_card_account<C>(db: &C, workspace_id: i64, account_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(require_account(db, workspace_id, account_id)
        .await?
        .is_credit_card())
}
