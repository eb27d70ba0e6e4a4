//! Projection exclusion entity - A month the user removed from a template's projections.
//!
//! The generator reads these rows and never writes them. `(template_id, month_start)`
//! is unique.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Projection exclusion database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projection_exclusions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub workspace_id: i64,
    pub template_id: i64,
    /// First day of the excluded month
    pub month_start: Date,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recurring_template::Entity",
        from = "Column::TemplateId",
        to = "super::recurring_template::Column::Id"
    )]
    Template,
}

impl Related<super::recurring_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
