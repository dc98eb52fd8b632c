//! Revision marker entity: a single row naming the last applied migration.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chronicle_revision")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub version_num: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
