//! SeaORM database migrations.
//!
//! The chain is linear; [`Migrator::migrations`] order is the revision order and each
//! migration's name is its revision id.

pub use sea_orm_migration::prelude::*;

mod m20250917_000001_create_test_runs_and_cases;
mod m20250917_000002_add_lookup_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250917_000001_create_test_runs_and_cases::Migration),
            Box::new(m20250917_000002_add_lookup_indexes::Migration),
        ]
    }
}
