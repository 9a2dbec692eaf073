// Database connection and schema management
// This module handles the SQLite job store connection using sqlx

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Opens (creating if necessary) the store at `database_url`.
    ///
    /// The pool holds exactly one connection: the claim protocol relies on a
    /// single writer, and an in-memory store only lives as long as its
    /// connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {database_url}"))?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open job store at {database_url}"))?;

        Ok(Self { pool })
    }

    /// Opens a store file inside `data_dir`
    pub async fn open_file(path: &Path) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Fresh private in-memory store
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_listing_pages_sql = r"
            CREATE TABLE IF NOT EXISTS listing_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                fetch_status TEXT NOT NULL DEFAULT 'pending',
                parse_status TEXT,
                captured_at TEXT,
                document_ref TEXT,
                created_at TEXT NOT NULL
            )
        ";

        // product_url is nullable: rows without a link end in failed_unfetchable,
        // and UNIQUE does not collapse NULLs.
        let create_product_records_sql = r"
            CREATE TABLE IF NOT EXISTS product_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_url TEXT UNIQUE,
                listing_page_id INTEGER,
                listing_title TEXT,
                fetch_status TEXT NOT NULL DEFAULT 'pending',
                parse_status TEXT,
                document_ref TEXT,
                fetched_at TEXT,
                name TEXT,
                price REAL,
                currency TEXT,
                product_code TEXT,
                reviews INTEGER,
                image_ref TEXT,
                parsed_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (listing_page_id) REFERENCES listing_pages (id)
            )
        ";

        let create_indexes_sql = r"
            CREATE INDEX IF NOT EXISTS idx_listing_pages_fetch_status ON listing_pages (fetch_status);
            CREATE INDEX IF NOT EXISTS idx_listing_pages_parse_status ON listing_pages (fetch_status, parse_status);
            CREATE INDEX IF NOT EXISTS idx_product_records_fetch_status ON product_records (fetch_status);
            CREATE INDEX IF NOT EXISTS idx_product_records_parse_status ON product_records (fetch_status, parse_status);
        ";

        sqlx::query(create_listing_pages_sql).execute(&self.pool).await?;
        sqlx::query(create_product_records_sql).execute(&self.pool).await?;
        sqlx::raw_sql(create_indexes_sql).execute(&self.pool).await?;

        debug!("Job store schema is up to date");
        Ok(())
    }
}
