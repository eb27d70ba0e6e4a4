//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod category;
pub mod enums;
pub mod ledger_entry;
pub mod loan;
pub mod loan_provider;
pub mod projection_exclusion;
pub mod recurring_template;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use category::{Column as CategoryColumn, Entity as Category, Model as CategoryModel};
pub use enums::{AccountType, CcState, EntryOrigin, EntryType, SettlementIntent};
pub use ledger_entry::{
    Column as LedgerEntryColumn, Entity as LedgerEntry, Model as LedgerEntryModel,
};
pub use loan::{Column as LoanColumn, Entity as Loan, Model as LoanModel};
pub use loan_provider::{
    Column as LoanProviderColumn, Entity as LoanProvider, Model as LoanProviderModel,
};
pub use projection_exclusion::{
    Column as ProjectionExclusionColumn, Entity as ProjectionExclusion,
    Model as ProjectionExclusionModel,
};
pub use recurring_template::{
    Column as RecurringTemplateColumn, Entity as RecurringTemplate,
    Model as RecurringTemplateModel,
};
