//! SeaORM entity definitions shared by the PostgreSQL and SQLite backends.

pub mod schema_revision;
pub mod test_case;
pub mod test_run;
