//! Database configuration module.
//!
//! This module handles the `SQLite` connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! models. The two composite unique indexes the generators rely on for
//! idempotency are created here as well.

use crate::entities::{
    Account, Category, LedgerEntry, LedgerEntryColumn, Loan, LoanProvider, ProjectionExclusion,
    ProjectionExclusionColumn, RecurringTemplate,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

/// Default database location when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/ledger.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database at `database_url`.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database: {}", database_url);
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all tables and indexes if they do not exist yet.
///
/// The `(template_id, projection_month)` index on ledger entries is what makes a
/// concurrent duplicate projection insert a no-op rather than a second row.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables = vec![
        schema.create_table_from_entity(Account),
        schema.create_table_from_entity(Category),
        schema.create_table_from_entity(LoanProvider),
        schema.create_table_from_entity(RecurringTemplate),
        schema.create_table_from_entity(Loan),
        schema.create_table_from_entity(LedgerEntry),
        schema.create_table_from_entity(ProjectionExclusion),
    ];
    for table in &mut tables {
        table.if_not_exists();
        db.execute(builder.build(&*table)).await?;
    }

    let projection_index = Index::create()
        .name("idx_ledger_entries_template_month")
        .table(LedgerEntry)
        .col(LedgerEntryColumn::TemplateId)
        .col(LedgerEntryColumn::ProjectionMonth)
        .unique()
        .if_not_exists()
        .to_owned();
    let exclusion_index = Index::create()
        .name("idx_projection_exclusions_template_month")
        .table(ProjectionExclusion)
        .col(ProjectionExclusionColumn::TemplateId)
        .col(ProjectionExclusionColumn::MonthStart)
        .unique()
        .if_not_exists()
        .to_owned();

    db.execute(builder.build(&projection_index)).await?;
    db.execute(builder.build(&exclusion_index)).await?;

    info!("Ledger tables and indexes are in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AccountModel, LedgerEntryModel, ProjectionExclusionModel};
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<AccountModel> = Account::find().limit(1).all(&db).await?;
        let _: Vec<LedgerEntryModel> = LedgerEntry::find().limit(1).all(&db).await?;
        let _: Vec<ProjectionExclusionModel> =
            ProjectionExclusion::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_repeatable() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
