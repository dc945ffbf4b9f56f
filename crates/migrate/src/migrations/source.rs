//! Migration Source - where migration SQL comes from
//!
//! The runner only sees `MigrationSource`. `DirectorySource` reads the
//! on-disk layout `<root>/<migration name>/migration.sql`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::definitions::{MigrationFile, MIGRATION_FILE_NAME};
use crate::error::{MigrateError, MigrateResult};

/// Supplies the ordered list of migrations
pub trait MigrationSource: Send + Sync {
    /// Load all migrations, sorted ascending by name
    fn load(&self) -> MigrateResult<Vec<MigrationFile>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Reads migrations from a directory tree, one subdirectory per migration
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    file_name: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_name: MIGRATION_FILE_NAME.to_string(),
        }
    }

    /// Use a different SQL file name inside each migration directory
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_migration(&self, dir: &Path, name: String) -> MigrateResult<Option<MigrationFile>> {
        let path = dir.join(&self.file_name);
        match fs::read_to_string(&path) {
            Ok(sql) => Ok(Some(MigrationFile { name, sql })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(
                    "Skipping {}: no {} inside",
                    dir.display(),
                    self.file_name
                );
                Ok(None)
            }
            Err(source) => Err(MigrateError::Source { path, source }),
        }
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> MigrateResult<Vec<MigrationFile>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Migrations directory {} does not exist", self.root.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::warn!(
                    "Migrations directory {} is unreadable, treating as empty: {}",
                    self.root.display(),
                    e
                );
                return Ok(Vec::new());
            }
        };

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read entry in {}: {}", self.root.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("Skipping migration directory with non UTF-8 name: {}", path.display());
                continue;
            };

            if let Some(migration) = self.read_migration(&path, name)? {
                migrations.push(migration);
            }
        }

        // Byte-wise lexicographic order is the application order
        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(migrations)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

/// Fixed in-memory list of migrations, mainly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    migrations: Vec<MigrationFile>,
}

impl StaticSource {
    pub fn new(mut migrations: Vec<MigrationFile>) -> Self {
        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Self { migrations }
    }
}

impl MigrationSource for StaticSource {
    fn load(&self) -> MigrateResult<Vec<MigrationFile>> {
        Ok(self.migrations.clone())
    }

    fn describe(&self) -> String {
        format!("{} embedded migrations", self.migrations.len())
    }
}
