use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tern_core::{AppConfigTrait, DatabaseConfig};
use tern_migrate::{
    migrate, MigrateError, MigrateOptions, MigrationClient, MigrationConfig, MigrationRunResult,
    MigrationRunner, MigrationStatus, MigrationStatusEntry, PostgresClient,
};

/// Environment configuration with command-line overrides applied, validated
pub fn load_config(
    database_url: Option<String>,
    auth_token: Option<String>,
    migrations_dir: Option<PathBuf>,
) -> Result<DatabaseConfig> {
    let mut config = DatabaseConfig::from_env_with_overrides(database_url, auth_token)?;
    if let Some(dir) = migrations_dir {
        config = config.with_migrations_dir(dir);
    }
    config.validate()?;
    Ok(config)
}

pub async fn run(config: &DatabaseConfig, force_reset: bool, json: bool) -> Result<()> {
    let options = MigrateOptions::from_config(config).with_force_reset(force_reset);

    if !json {
        println!(
            "Migrating {} from {}",
            config.display_url(),
            config.migrations_dir.display()
        );
        if force_reset {
            println!("Force reset requested: every table will be dropped");
        }
    }

    let result = match migrate(options).await {
        Ok(result) => result,
        Err(e) => {
            if !json {
                for line in failure_report(&e) {
                    println!("{}", line);
                }
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in run_report(&result) {
            println!("{}", line);
        }
    }

    Ok(())
}

pub async fn status(config: &DatabaseConfig, json: bool) -> Result<()> {
    let runner = MigrationRunner::new(MigrationConfig {
        migrations_dir: config.migrations_dir.clone(),
        migrations_table: config.migrations_table.clone(),
    })?;

    let mut client = PostgresClient::connect(&config.database_url, &config.auth_token)
        .await
        .with_context(|| format!("connecting to {}", config.display_url()))?;

    let entries = runner.status(&mut client).await;
    if let Err(e) = client.close().await {
        tracing::warn!("Failed to close database client: {}", e);
    }
    let entries = entries?;

    if json {
        let report = StatusReport {
            pending: entries
                .iter()
                .filter(|e| e.status == MigrationStatus::Pending)
                .count(),
            migrations: &entries,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in status_report(&entries) {
            println!("{}", line);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct StatusReport<'a> {
    pending: usize,
    migrations: &'a [MigrationStatusEntry],
}

fn run_report(result: &MigrationRunResult) -> Vec<String> {
    let mut lines = Vec::new();

    if !result.reset_tables.is_empty() {
        lines.push(format!("Dropped {} table(s)", result.reset_tables.len()));
    }
    for name in &result.repaired_migrations {
        lines.push(format!("Repaired {} (tables missing, will be reapplied)", name));
    }
    for name in &result.applied_migrations {
        lines.push(format!("Applied {}", name));
    }

    if result.applied_count == 0 {
        lines.push(format!(
            "Database is up to date ({} migration(s) already applied)",
            result.skipped_count
        ));
    } else {
        lines.push(format!(
            "{} migration(s) applied, {} already up to date in {} ms",
            result.applied_count, result.skipped_count, result.execution_time_ms
        ));
    }

    lines
}

/// Migrations committed before the failing one stay applied; say so
fn failure_report(err: &MigrateError) -> Vec<String> {
    let applied = err.applied_before_failure();
    let mut lines: Vec<String> = applied.iter().map(|name| format!("Applied {}", name)).collect();

    if let Some(failed) = err.migration() {
        lines.push(format!(
            "{} migration(s) applied before {} failed",
            applied.len(),
            failed
        ));
    }

    lines
}

fn status_report(entries: &[MigrationStatusEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["No migrations found".to_string()];
    }

    let mut applied = 0;
    let mut pending = 0;
    let mut lines = Vec::with_capacity(entries.len() + 1);

    for entry in entries {
        let line = match &entry.status {
            MigrationStatus::Applied {
                checksum_matches, ..
            } => {
                applied += 1;
                if *checksum_matches {
                    format!("  applied  {}", entry.name)
                } else {
                    format!("  applied  {} (file changed since it was applied)", entry.name)
                }
            }
            MigrationStatus::Pending => {
                pending += 1;
                format!("  pending  {}", entry.name)
            }
            MigrationStatus::Missing => format!("  missing  {} (no migration file)", entry.name),
        };
        lines.push(line);
    }

    lines.push(format!("{} applied, {} pending", applied, pending));
    lines
}
