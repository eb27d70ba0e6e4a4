//! Shared test utilities for the ledger core.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test rows with sensible defaults.

use crate::{
    config::Settings,
    core::entry::{NewEntry, create_entry},
    entities::{
        AccountType, EntryOrigin, EntryType, account, category, ledger_entry, loan_provider, recurring_template,
    },
    errors::Result,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Shorthand for a calendar date in tests.
///
/// # Panics
/// Panics on an invalid date.
#[allow(clippy::expect_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// Inserts an account directly.
pub async fn create_test_account(
    db: &DatabaseConnection,
    workspace_id: i64,
    name: &str,
    account_type: AccountType,
) -> Result<account::Model> {
    Ok(account::ActiveModel {
        workspace_id: Set(workspace_id),
        name: Set(name.to_string()),
        account_type: Set(account_type),
        is_deleted: Set(false),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Inserts a category directly.
pub async fn create_test_category(
    db: &DatabaseConnection,
    workspace_id: i64,
    name: &str,
) -> Result<category::Model> {
    Ok(category::ActiveModel {
        workspace_id: Set(workspace_id),
        name: Set(name.to_string()),
        is_deleted: Set(false),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Inserts a loan provider directly. The cutoff day is not validated, so
/// tests can store broken providers.
pub async fn create_test_provider(
    db: &DatabaseConnection,
    workspace_id: i64,
    name: &str,
    cutoff_day: u32,
) -> Result<loan_provider::Model> {
    Ok(loan_provider::ActiveModel {
        workspace_id: Set(workspace_id),
        name: Set(name.to_string()),
        cutoff_day: Set(cutoff_day),
        is_deleted: Set(false),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// An unpaid, uncategorized expense dated today.
pub fn new_expense(account_id: i64, name: &str, amount: f64) -> NewEntry {
    NewEntry {
        account_id,
        category_id: None,
        name: name.to_string(),
        amount,
        entry_type: EntryType::Expense,
        entry_date: Utc::now().date_naive(),
        is_paid: false,
        settlement_intent: None,
    }
}

/// Creates an unpaid manual expense dated today.
pub async fn create_test_entry(
    db: &DatabaseConnection,
    workspace_id: i64,
    account_id: i64,
    name: &str,
    amount: f64,
) -> Result<ledger_entry::Model> {
    create_entry(db, &Settings::default(), workspace_id, new_expense(account_id, name, amount)).await
}

/// Creates an unpaid manual expense on a given date.
pub async fn create_dated_entry(
    db: &DatabaseConnection,
    workspace_id: i64,
    account_id: i64,
    name: &str,
    amount: f64,
    entry_date: NaiveDate,
) -> Result<ledger_entry::Model> {
    create_entry(
        db,
        &Settings::default(),
        workspace_id,
        NewEntry {
            entry_date,
            ..new_expense(account_id, name, amount)
        },
    )
    .await
}

/// Inserts an active template without generating any projections.
///
/// # Defaults
/// * description: "Internet"
/// * amount: 45.0
/// * category: a fresh "Bills" category in the workspace
/// * no end date, no settlement intent
pub async fn insert_raw_template(
    db: &DatabaseConnection,
    workspace_id: i64,
    account_id: i64,
    start_date: NaiveDate,
) -> Result<recurring_template::Model> {
    let category = create_test_category(db, workspace_id, "Bills").await?;
    let now = Utc::now();
    Ok(recurring_template::ActiveModel {
        workspace_id: Set(workspace_id),
        description: Set("Internet".to_string()),
        amount: Set(45.0),
        entry_type: Set(EntryType::Expense),
        category_id: Set(category.id),
        account_id: Set(account_id),
        start_date: Set(start_date),
        end_date: Set(None),
        settlement_intent: Set(None),
        is_active: Set(true),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Sets up a database with a bank account and a category in workspace 1.
pub async fn setup_with_bank_and_category()
-> Result<(DatabaseConnection, account::Model, category::Model)> {
    let db = setup_test_db().await?;
    let bank = create_test_account(&db, 1, "Bank", AccountType::Bank).await?;
    let category = create_test_category(&db, 1, "Utilities").await?;
    Ok((db, bank, category))
}

/// An unpaid manual expense row, for feeding `MockDatabase` query results.
pub fn entry_row(id: i64, account_id: i64, amount: f64, entry_date: NaiveDate) -> ledger_entry::Model {
    let now = Utc::now();
    ledger_entry::Model {
        id,
        workspace_id: 1,
        account_id,
        category_id: None,
        name: format!("Entry {id}"),
        amount,
        entry_type: EntryType::Expense,
        entry_date,
        is_paid: false,
        origin: EntryOrigin::Manual,
        template_id: None,
        loan_id: None,
        is_projected: false,
        projection_month: None,
        installment_number: None,
        cc_state: None,
        billed_at: None,
        settlement_intent: None,
        transfer_pair_id: None,
        created_at: now,
        updated_at: now,
    }
}

/// An account row, for feeding `MockDatabase` query results.
pub fn account_row(id: i64, name: &str, account_type: AccountType) -> account::Model {
    account::Model {
        id,
        workspace_id: 1,
        name: name.to_string(),
        account_type,
        is_deleted: false,
    }
}
