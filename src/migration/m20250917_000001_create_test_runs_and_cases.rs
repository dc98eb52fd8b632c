//! Create test_runs and test_cases tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TestRun::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TestRun::Id).string().not_null().primary_key())
                    .col(
                        ColumnDef::new(TestRun::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TestRun::Project).string().not_null())
                    .col(ColumnDef::new(TestRun::Suite).string())
                    .col(ColumnDef::new(TestRun::Status).string().not_null())
                    .col(ColumnDef::new(TestRun::HeadSha).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::CodeHash).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Branch).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::ParentSha).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::OriginUrl).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Describe).string().not_null().default(""))
                    .col(
                        ColumnDef::new(TestRun::CommitTimestamp)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(TestRun::IsDirty).boolean().not_null().default(false))
                    .col(ColumnDef::new(TestRun::Gpu).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Marks).text().not_null().default(""))
                    .col(ColumnDef::new(TestRun::PytestArgs).text().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Platform).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Host).string().not_null().default(""))
                    .col(ColumnDef::new(TestRun::Tests).integer().not_null().default(0))
                    .col(ColumnDef::new(TestRun::Failures).integer().not_null().default(0))
                    .col(ColumnDef::new(TestRun::Errors).integer().not_null().default(0))
                    .col(ColumnDef::new(TestRun::Skipped).integer().not_null().default(0))
                    .col(ColumnDef::new(TestRun::Passed).integer().not_null().default(0))
                    .col(ColumnDef::new(TestRun::TimeSec).double().not_null().default(0.0))
                    .col(ColumnDef::new(TestRun::Env).json_binary())
                    .col(ColumnDef::new(TestRun::Ci).json_binary())
                    .col(ColumnDef::new(TestRun::ReportDir).text().not_null().default(""))
                    .col(
                        ColumnDef::new(TestRun::RunKey)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TestCase::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TestCase::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TestCase::RunId).string().not_null())
                    .col(ColumnDef::new(TestCase::Nodeid).text().not_null())
                    .col(ColumnDef::new(TestCase::Classname).text().not_null().default(""))
                    .col(ColumnDef::new(TestCase::Name).text().not_null().default(""))
                    .col(ColumnDef::new(TestCase::Status).string().not_null())
                    .col(ColumnDef::new(TestCase::TimeSec).double().not_null().default(0.0))
                    .col(ColumnDef::new(TestCase::Message).text())
                    .col(ColumnDef::new(TestCase::Detail).text())
                    .col(ColumnDef::new(TestCase::StdoutText).text().not_null().default(""))
                    .col(ColumnDef::new(TestCase::StderrText).text().not_null().default(""))
                    .col(ColumnDef::new(TestCase::Phases).json_binary())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_cases_run_id")
                            .from(TestCase::Table, TestCase::RunId)
                            .to(TestRun::Table, TestRun::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TestCase::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TestRun::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden, Clone, Copy)]
pub enum TestRun {
    #[sea_orm(iden = "test_runs")]
    Table,
    Id,
    CreatedAt,
    Project,
    Suite,
    Status,
    HeadSha,
    CodeHash,
    Branch,
    ParentSha,
    OriginUrl,
    Describe,
    CommitTimestamp,
    IsDirty,
    Gpu,
    Marks,
    PytestArgs,
    Platform,
    Host,
    Tests,
    Failures,
    Errors,
    Skipped,
    Passed,
    TimeSec,
    Env,
    Ci,
    ReportDir,
    RunKey,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum TestCase {
    #[sea_orm(iden = "test_cases")]
    Table,
    Id,
    RunId,
    Nodeid,
    Classname,
    Name,
    Status,
    TimeSec,
    Message,
    Detail,
    StdoutText,
    StderrText,
    Phases,
}
