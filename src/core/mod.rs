//! Framework-agnostic ledger logic.
//!
//! Every operation takes a database connection and a workspace id; rows from
//! other workspaces are indistinguishable from missing ones.

/// Month arithmetic and money rounding
pub mod calendar;

/// Credit card lifecycle and card metrics
pub mod cc;

/// Manual entries and shared entry queries
pub mod entry;

/// Months removed from a template's projections
pub mod exclusion;

/// Workspace-scoped account, category and provider lookups
pub mod lookup;

/// Installment loans and their payment schedules
pub mod loan;

/// Recurring templates and the projection generator
pub mod projection;

/// Settling billed card entries from a funding account
pub mod settlement;
