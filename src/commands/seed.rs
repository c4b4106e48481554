use anyhow::{Context, Result};
use std::path::Path;

use hivecrawl::config::Config;
use hivecrawl::models::EntityKind;
use hivecrawl::storage::Database;

/// Outcome of loading a seed file
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub read: usize,
    pub skipped: usize,
    pub inserted: usize,
}

/// Load a JSON array of IDs into the identifier store
pub fn seed_file(db: &Database, path: &Path, kind: EntityKind) -> Result<SeedReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    let ids: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Seed file must be a JSON array of strings: {}", path.display()))?;

    let (valid, invalid): (Vec<String>, Vec<String>) =
        ids.iter().cloned().partition(|id| kind.is_valid(id));
    for id in &invalid {
        tracing::warn!(kind = %kind, id = %id, "Skipping malformed seed ID");
    }

    let inserted = db
        .insert_ids(kind, &valid, None, None)
        .context("Failed to insert seed IDs")?;

    Ok(SeedReport {
        read: ids.len(),
        skipped: invalid.len(),
        inserted: inserted.len(),
    })
}

/// Seed the identifier store from a file
pub async fn seed(config: Config, file: String, kind: EntityKind, database: Option<String>) -> Result<()> {
    let db_path = database
        .map(Into::into)
        .unwrap_or_else(|| config.database.path.clone());
    let path = std::path::PathBuf::from(file);

    let report = tokio::task::spawn_blocking(move || -> Result<SeedReport> {
        let db = Database::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        seed_file(&db, &path, kind)
    })
    .await
    .context("Seeding task panicked")??;

    tracing::info!(
        read = report.read,
        skipped = report.skipped,
        inserted = report.inserted,
        "Seeding complete"
    );
    println!(
        "Seeded {} new {} ({} read, {} skipped)",
        report.inserted,
        kind.plural(),
        report.read,
        report.skipped
    );
    Ok(())
}
