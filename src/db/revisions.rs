//! Schema revision management.
//!
//! Revisions are the migrations of [`Migrator`], in order. The name of the last applied
//! revision is kept in the `chronicle_revision` table of the store itself, and every
//! upgrade or downgrade step runs in its own transaction together with the marker
//! update, so the marker never disagrees with the schema.
//!
//! Positions: `0` is `base` (nothing applied), `n` means the first `n` revisions are applied.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sea_orm::{ActiveValue::Set, ConnectionTrait, EntityTrait, TransactionTrait};
use sea_orm_migration::prelude::*;
use tracing::{info, warn};

use crate::entity::schema_revision;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

use super::DbPool;

/// Table holding the revision marker.
pub const MARKER_TABLE: &str = "chronicle_revision";

/// Application tables whose presence implies a schema was created.
const APPLICATION_TABLES: &[&str] = &["test_runs", "test_cases"];

#[derive(DeriveIden)]
enum ChronicleRevision {
    #[sea_orm(iden = "chronicle_revision")]
    Table,
    VersionNum,
}

/// One revision in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: String,
    pub down_revision: Option<String>,
    pub is_head: bool,
    pub is_current: bool,
}

impl std::fmt::Display for RevisionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.down_revision.as_deref().unwrap_or("<base>"),
            self.revision
        )?;
        if self.is_head {
            write!(f, " (head)")?;
        }
        if self.is_current {
            write!(f, " (current)")?;
        }
        Ok(())
    }
}

/// A `FROM:TO` revision range; either side may be omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRange {
    pub from: String,
    pub to: String,
}

impl Default for RevisionRange {
    fn default() -> Self {
        RevisionRange {
            from: "base".to_string(),
            to: "head".to_string(),
        }
    }
}

impl RevisionRange {
    pub fn parse(text: &str) -> AppResult<Self> {
        let Some((from, to)) = text.split_once(':') else {
            return Err(AppError::InvalidInput(format!(
                "Revision range '{}' must look like FROM:TO",
                text
            )));
        };
        let side = |s: &str, default: &str| {
            let s = s.trim();
            if s.is_empty() { default.to_string() } else { s.to_string() }
        };
        Ok(RevisionRange {
            from: side(from, "base"),
            to: side(to, "head"),
        })
    }
}

/// Ordered revision names.
pub fn chain() -> Vec<String> {
    Migrator::migrations()
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}

/// Name of the newest revision.
pub fn head() -> Option<String> {
    chain().pop()
}

/// Resolve `head`, `base`, a full revision name, or an unambiguous prefix to a position.
pub fn resolve_target(target: &str) -> AppResult<usize> {
    let chain = chain();
    let target = target.trim();
    match target {
        "head" | "heads" => return Ok(chain.len()),
        "base" => return Ok(0),
        _ => {}
    }

    if let Some(idx) = chain.iter().position(|name| name == target) {
        return Ok(idx + 1);
    }

    let candidates: Vec<usize> = chain
        .iter()
        .enumerate()
        .filter(|(_, name)| !target.is_empty() && name.starts_with(target))
        .map(|(idx, _)| idx + 1)
        .collect();

    match candidates.as_slice() {
        [pos] => Ok(*pos),
        [] => Err(AppError::InvalidInput(format!("Unknown revision '{}'", target))),
        _ => Err(AppError::InvalidInput(format!(
            "Revision prefix '{}' is ambiguous",
            target
        ))),
    }
}

/// Revision name at a position; `None` for base.
pub fn revision_at(position: usize) -> Option<String> {
    position.checked_sub(1).and_then(|idx| chain().get(idx).cloned())
}

async fn write_marker<C: ConnectionTrait>(conn: &C, revision: Option<&str>) -> Result<(), DbErr> {
    schema_revision::Entity::delete_many().exec(conn).await?;
    if let Some(name) = revision {
        let marker = schema_revision::ActiveModel {
            version_num: Set(name.to_string()),
        };
        schema_revision::Entity::insert(marker)
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

impl DbPool {
    async fn ensure_marker_table(&self) -> AppResult<()> {
        let manager = SchemaManager::new(self.connection());
        manager
            .create_table(
                Table::create()
                    .table(ChronicleRevision::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChronicleRevision::VersionNum)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .to_owned(),
            )
            .await
            .map_err(|e| {
                AppError::StorageUnavailable(format!("Failed to create revision table: {}", e))
            })
    }

    async fn has_table(&self, table: &str) -> AppResult<bool> {
        SchemaManager::new(self.connection())
            .has_table(table)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to inspect schema: {}", e)))
    }

    /// Raw marker value, `None` when nothing is recorded.
    pub async fn current_revision(&self) -> AppResult<Option<String>> {
        if !self.has_table(MARKER_TABLE).await? {
            return Ok(None);
        }

        let rows = schema_revision::Entity::find()
            .all(self.connection())
            .await
            .map_err(|e| {
                AppError::StorageUnavailable(format!("Failed to read revision marker: {}", e))
            })?;

        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row.version_num.clone())),
            _ => Err(AppError::MigrationConflict(format!(
                "{} holds {} rows; expected one",
                MARKER_TABLE,
                rows.len()
            ))),
        }
    }

    /// Position of the marker in the chain, validating the store's state.
    pub async fn current_position(&self) -> AppResult<usize> {
        match self.current_revision().await? {
            Some(name) => chain()
                .iter()
                .position(|rev| *rev == name)
                .map(|idx| idx + 1)
                .ok_or_else(|| {
                    AppError::MigrationConflict(format!(
                        "Store is at unknown revision '{}'",
                        name
                    ))
                }),
            None => {
                for table in APPLICATION_TABLES {
                    if self.has_table(table).await? {
                        return Err(AppError::MigrationConflict(format!(
                            "Table '{}' exists but no revision is recorded; run `db stamp <revision>` first",
                            table
                        )));
                    }
                }
                Ok(0)
            }
        }
    }

    /// Apply revisions from the current one up to `target`.
    pub async fn upgrade(&self, target: &str) -> AppResult<Option<String>> {
        let target_pos = resolve_target(target)?;
        self.ensure_marker_table().await?;
        let current_pos = self.current_position().await?;

        if target_pos < current_pos {
            return Err(AppError::MigrationConflict(format!(
                "Cannot upgrade to '{}': store is already at '{}'",
                target,
                revision_at(current_pos).unwrap_or_default()
            )));
        }

        let migrations = Migrator::migrations();
        for idx in current_pos..target_pos {
            let migration = &migrations[idx];
            let name = migration.name().to_string();

            let txn = self.connection().begin().await?;
            let manager = SchemaManager::new(&txn);
            migration.up(&manager).await.map_err(|e| {
                AppError::StorageUnavailable(format!("Upgrade to {} failed: {}", name, e))
            })?;
            write_marker(&txn, Some(&name)).await?;
            txn.commit().await?;

            info!(revision = %name, "Applied revision");
        }

        Ok(revision_at(target_pos))
    }

    /// Revert revisions from the current one down to `target`.
    pub async fn downgrade(&self, target: &str) -> AppResult<Option<String>> {
        let target_pos = resolve_target(target)?;
        self.ensure_marker_table().await?;
        let current_pos = self.current_position().await?;

        if target_pos > current_pos {
            return Err(AppError::MigrationConflict(format!(
                "Cannot downgrade to '{}': store is only at '{}'",
                target,
                revision_at(current_pos).unwrap_or_else(|| "base".to_string())
            )));
        }

        let migrations = Migrator::migrations();
        for idx in (target_pos..current_pos).rev() {
            let migration = &migrations[idx];
            let name = migration.name().to_string();
            let previous = revision_at(idx);

            let txn = self.connection().begin().await?;
            let manager = SchemaManager::new(&txn);
            migration.down(&manager).await.map_err(|e| {
                AppError::StorageUnavailable(format!("Downgrade of {} failed: {}", name, e))
            })?;
            write_marker(&txn, previous.as_deref()).await?;
            txn.commit().await?;

            info!(revision = %name, "Reverted revision");
        }

        Ok(revision_at(target_pos))
    }

    /// Record `target` as current without running any migration.
    pub async fn stamp(&self, target: &str) -> AppResult<Option<String>> {
        let target_pos = resolve_target(target)?;
        self.ensure_marker_table().await?;
        let revision = revision_at(target_pos);

        let txn = self.connection().begin().await?;
        write_marker(&txn, revision.as_deref()).await?;
        txn.commit().await?;

        warn!(revision = ?revision, "Stamped revision without running migrations");
        Ok(revision)
    }

    /// Bring the schema to head; used before every store mutation.
    pub async fn ensure_head(&self) -> AppResult<()> {
        self.upgrade("head").await.map(|_| ())
    }

    /// List revisions within `range`, newest first.
    pub async fn history(&self, range: &RevisionRange) -> AppResult<Vec<RevisionInfo>> {
        let from = resolve_target(&range.from)?;
        let to = resolve_target(&range.to)?;
        let current = self.current_revision().await?;
        Ok(history_entries(from, to, current.as_deref()))
    }
}

/// Chain entries between two positions (inclusive), newest first.
pub fn history_entries(from: usize, to: usize, current: Option<&str>) -> Vec<RevisionInfo> {
    let chain = chain();
    let start = from.max(1);
    (start..=to.min(chain.len()))
        .rev()
        .map(|pos| {
            let revision = chain[pos - 1].clone();
            RevisionInfo {
                is_current: current == Some(revision.as_str()),
                is_head: pos == chain.len(),
                down_revision: revision_at(pos - 1),
                revision,
            }
        })
        .collect()
}

/// Turn a free-form message into a file-name slug.
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for ch in message.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').chars().take(48).collect()
}

/// Scaffold an empty revision on top of the current head.
///
/// The new file still has to be registered in `Migrator::migrations`.
pub fn generate(message: &str, dir: &Path) -> AppResult<PathBuf> {
    let slug = slugify(message);
    if slug.is_empty() {
        return Err(AppError::InvalidInput(
            "Revision message must contain letters or digits".to_string(),
        ));
    }

    let chain = chain();
    let name = format!(
        "m{}_{:06}_{}",
        Utc::now().format("%Y%m%d"),
        chain.len() + 1,
        slug
    );
    let path = dir.join(format!("{}.rs", name));
    if path.exists() {
        return Err(AppError::FileSystem(format!(
            "{} already exists",
            path.display()
        )));
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, revision_template(message, chain.last().map(String::as_str)))?;

    info!(path = %path.display(), "Generated revision");
    Ok(path)
}

fn revision_template(message: &str, revises: Option<&str>) -> String {
    format!(
        r#"//! {message}
//!
//! Revises: {revises}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {{
    async fn up(&self, _manager: &SchemaManager) -> Result<(), DbErr> {{
        Ok(())
    }}

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {{
        Ok(())
    }}
}}
"#,
        message = message.trim(),
        revises = revises.unwrap_or("<base>"),
    )
}
