// Migration directory: reading scripts and scaffolding new ones
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::{slugify, MigrationRecord, MIGRATION_EXTENSION};
use keel_core::error::Result;
use keel_core::port::MigrationSource;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Migrations stored as `<YYYYMMDDHHMMSS>-<name>.sql` files in one directory
pub struct FsMigrationSource {
    dir: PathBuf,
}

impl FsMigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write an empty migration file named after `name` and `now`
    ///
    /// Creates the directory when missing. An existing file with the same
    /// name is never overwritten.
    ///
    /// # Example
    /// ```ignore
    /// let path = source.create("Create users", Utc::now()).await?;
    /// // migrations/20200511072746-create-users.sql
    /// ```
    pub async fn create(&self, name: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let slug = slugify(name)?;
        let path = self.dir.join(MigrationRecord::file_name_for(now, &slug));

        fs::create_dir_all(&self.dir).await?;
        // create_new fails with AlreadyExists instead of truncating
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.flush().await?;

        info!(path = %path.display(), "Created migration");
        Ok(path)
    }
}

#[async_trait]
impl MigrationSource for FsMigrationSource {
    async fn load(&self) -> Result<Vec<MigrationRecord>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files: Vec<(String, PathBuf)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_EXTENSION) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            files.push((file_name, path));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(files.len());
        for (file_name, path) in files {
            let body = fs::read_to_string(&path).await?;
            records.push(MigrationRecord::from_file(file_name, body)?);
        }

        debug!(dir = %self.dir.display(), count = records.len(), "Loaded migrations");
        Ok(records)
    }
}
