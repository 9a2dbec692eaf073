//! Job store for listing pages and product records
//!
//! Every status transition of the pipeline goes through this module. The
//! claim protocol (`claim_one`) and the recovery sweep (`recover_stale`) are
//! the only places that move a row into or out of an in-progress status.
//!
//! Claiming is lock-by-write: the oldest matching row is selected and then
//! updated with a status guard inside one transaction. Correctness assumes a
//! single process owns the store; the pool is limited to one connection to
//! keep that discipline inside the process as well.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::domain::{
    CrawlStage, FetchStatus, ListingPage, ParseStatus, ProductDetail, ProductRecord,
};

/// The two row families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTable {
    ListingPages,
    ProductRecords,
}

impl JobTable {
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::ListingPages => "listing_pages",
            Self::ProductRecords => "product_records",
        }
    }

    const fn url_column(self) -> &'static str {
        match self {
            Self::ListingPages => "url",
            Self::ProductRecords => "product_url",
        }
    }

    /// Column stamped when a fetch succeeds
    const fn fetched_at_column(self) -> &'static str {
        match self {
            Self::ListingPages => "captured_at",
            Self::ProductRecords => "fetched_at",
        }
    }
}

/// Which status machine a stage drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Fetch,
    Parse,
}

/// Claim parameters for one stage
///
/// All SQL fragments derived from a spec are fixed identifiers and literals,
/// never caller-provided text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimSpec {
    pub table: JobTable,
    pub kind: StatusKind,
}

impl ClaimSpec {
    pub const fn fetch(table: JobTable) -> Self {
        Self {
            table,
            kind: StatusKind::Fetch,
        }
    }

    pub const fn parse(table: JobTable) -> Self {
        Self {
            table,
            kind: StatusKind::Parse,
        }
    }

    /// Claim spec of a pipeline stage; seeding claims nothing
    pub const fn for_stage(stage: CrawlStage) -> Option<Self> {
        match stage {
            CrawlStage::Seed => None,
            CrawlStage::ListFetch => Some(Self::fetch(JobTable::ListingPages)),
            CrawlStage::ListParse => Some(Self::parse(JobTable::ListingPages)),
            CrawlStage::DetailFetch => Some(Self::fetch(JobTable::ProductRecords)),
            CrawlStage::DetailParse => Some(Self::parse(JobTable::ProductRecords)),
        }
    }

    pub const fn status_column(self) -> &'static str {
        match self.kind {
            StatusKind::Fetch => "fetch_status",
            StatusKind::Parse => "parse_status",
        }
    }

    /// Value written while a worker holds the row
    pub const fn claimed_value(self) -> &'static str {
        match self.kind {
            StatusKind::Fetch => FetchStatus::Fetching.as_str(),
            StatusKind::Parse => ParseStatus::Parsing.as_str(),
        }
    }

    fn pending_predicate(self) -> &'static str {
        match self.kind {
            StatusKind::Fetch => "fetch_status = 'pending'",
            StatusKind::Parse => "fetch_status = 'fetched' AND parse_status IS NULL",
        }
    }

    fn claimed_predicate(self) -> &'static str {
        match self.kind {
            StatusKind::Fetch => "fetch_status = 'fetching'",
            StatusKind::Parse => "parse_status = 'parsing'",
        }
    }

    /// Assignment that puts a row back into the claimable pool
    fn release_assignment(self) -> &'static str {
        match self.kind {
            StatusKind::Fetch => "fetch_status = 'pending'",
            StatusKind::Parse => "parse_status = NULL",
        }
    }
}

/// Terminal status written for a claimed row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Fetch(FetchStatus),
    Parse(ParseStatus),
}

impl StatusUpdate {
    const fn kind(self) -> StatusKind {
        match self {
            Self::Fetch(_) => StatusKind::Fetch,
            Self::Parse(_) => StatusKind::Parse,
        }
    }

    const fn value(self) -> &'static str {
        match self {
            Self::Fetch(status) => status.as_str(),
            Self::Parse(status) => status.as_str(),
        }
    }
}

/// A row handed to a worker by `claim_one`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: i64,
    pub url: Option<String>,
    pub document_ref: Option<String>,
}

/// A product row to create from a listing entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewProductRecord {
    pub product_url: Option<String>,
    pub listing_title: Option<String>,
}

/// Result of inserting a listing page's products
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// One line of the status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub fetch_status: FetchStatus,
    pub parse_status: Option<ParseStatus>,
    pub count: i64,
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a pending listing page; returns whether a row was created
    pub async fn insert_listing_if_absent(&self, url: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO listing_pages (url, fetch_status, created_at) VALUES (?, 'pending', ?)",
        )
        .bind(url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert listing page {url}"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Inserts a pending product record; returns whether a row was created.
    /// Rows without a URL are always created.
    pub async fn insert_product_if_absent(
        &self,
        listing_page_id: Option<i64>,
        record: &NewProductRecord,
    ) -> Result<bool> {
        let result = Self::insert_product_query(listing_page_id, record)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert product record {:?}", record.product_url))?;

        Ok(result.rows_affected() == 1)
    }

    fn insert_product_query(
        listing_page_id: Option<i64>,
        record: &NewProductRecord,
    ) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO product_records (
                product_url, listing_page_id, listing_title, fetch_status, created_at
            )
            VALUES (?, ?, ?, 'pending', ?)
            ",
        )
        .bind(record.product_url.as_deref())
        .bind(listing_page_id)
        .bind(record.listing_title.as_deref())
        .bind(Utc::now().to_rfc3339())
    }

    /// Oldest row that `claim_one` would hand out next, without claiming it
    pub async fn find_next(&self, spec: ClaimSpec) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(&Self::select_next_sql(spec))
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up next job in {}", spec.table.table_name()))?;

        row.as_ref().map(Self::row_to_claimed).transpose()
    }

    /// Claims the oldest claimable row of `spec`, or returns `None` when the
    /// stage has no work left.
    pub async fn claim_one(&self, spec: ClaimSpec) -> Result<Option<ClaimedJob>> {
        let table = spec.table.table_name();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin claim transaction")?;

        let Some(row) = sqlx::query(&Self::select_next_sql(spec))
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("Failed to select claimable job in {table}"))?
        else {
            tx.rollback().await?;
            return Ok(None);
        };
        let job = Self::row_to_claimed(&row)?;

        let update_sql = format!(
            "UPDATE {table} SET {column} = ? WHERE id = ? AND {pending}",
            column = spec.status_column(),
            pending = spec.pending_predicate(),
        );
        let result = sqlx::query(&update_sql)
            .bind(spec.claimed_value())
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to claim {table} row {}", job.id))?;

        if result.rows_affected() != 1 {
            bail!("{table} row {} was no longer claimable", job.id);
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit claim of {table} row {}", job.id))?;

        debug!(table, id = job.id, status = spec.claimed_value(), "Claimed job");
        Ok(Some(job))
    }

    /// Returns every row left in the claimed status of `spec` to its pending
    /// predecessor. Idempotent.
    pub async fn recover_stale(&self, spec: ClaimSpec) -> Result<u64> {
        let sql = format!(
            "UPDATE {table} SET {release} WHERE {claimed}",
            table = spec.table.table_name(),
            release = spec.release_assignment(),
            claimed = spec.claimed_predicate(),
        );
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Recovery sweep failed on {}", spec.table.table_name()))?;

        Ok(result.rows_affected())
    }

    /// Puts a single claimed row back into the claimable pool
    pub async fn release(&self, spec: ClaimSpec, id: i64) -> Result<bool> {
        let sql = format!(
            "UPDATE {table} SET {release} WHERE id = ? AND {claimed}",
            table = spec.table.table_name(),
            release = spec.release_assignment(),
            claimed = spec.claimed_predicate(),
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to release {} row {id}", spec.table.table_name()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Writes a terminal status with no extra fields
    pub async fn update_status(&self, table: JobTable, id: i64, status: StatusUpdate) -> Result<()> {
        let column = match status.kind() {
            StatusKind::Fetch => "fetch_status",
            StatusKind::Parse => "parse_status",
        };
        let sql = format!("UPDATE {} SET {column} = ? WHERE id = ?", table.table_name());
        let result = sqlx::query(&sql)
            .bind(status.value())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to set {} row {id} to {}", table.table_name(), status.value()))?;

        if result.rows_affected() == 0 {
            bail!("{} row {id} does not exist", table.table_name());
        }
        Ok(())
    }

    /// Marks a claimed fetch as `fetched` and publishes its document.
    ///
    /// The status write is prepared first, then `publish` moves the document
    /// under its final name, then the transaction commits. If `publish` fails
    /// the status write is rolled back, so a row is never `fetched` without
    /// its document.
    pub async fn complete_fetch<F>(
        &self,
        table: JobTable,
        id: i64,
        document_ref: &str,
        publish: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send,
    {
        let table_name = table.table_name();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            r"
            UPDATE {table_name}
            SET fetch_status = 'fetched',
                document_ref = ?,
                {stamp} = COALESCE({stamp}, ?)
            WHERE id = ? AND fetch_status = 'fetching'
            ",
            stamp = table.fetched_at_column(),
        );

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&sql)
            .bind(document_ref)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to mark {table_name} row {id} fetched"))?;

        if result.rows_affected() != 1 {
            bail!("{table_name} row {id} is not claimed for fetching");
        }

        publish().with_context(|| format!("Failed to publish document for {table_name} row {id}"))?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit fetch of {table_name} row {id}"))?;
        Ok(())
    }

    /// Inserts the products found on a listing page and marks the page
    /// parsed, in one transaction. Individual insert failures are logged and
    /// counted, they do not fail the page.
    pub async fn complete_listing_parse(
        &self,
        listing_page_id: i64,
        records: &[NewProductRecord],
    ) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for record in records {
            match Self::insert_product_query(Some(listing_page_id), record)
                .execute(&mut *tx)
                .await
            {
                Ok(result) if result.rows_affected() == 1 => outcome.inserted += 1,
                Ok(_) => outcome.duplicates += 1,
                Err(e) => {
                    warn!(
                        listing_page_id,
                        url = ?record.product_url,
                        error = %e,
                        "Skipping product record that could not be inserted"
                    );
                    outcome.rejected += 1;
                }
            }
        }

        let result = sqlx::query(
            "UPDATE listing_pages SET parse_status = ? WHERE id = ? AND parse_status = 'parsing'",
        )
        .bind(ParseStatus::ParsedSucceeded.as_str())
        .bind(listing_page_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to mark listing page {listing_page_id} parsed"))?;

        if result.rows_affected() != 1 {
            bail!("listing page {listing_page_id} is not claimed for parsing");
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit parse of listing page {listing_page_id}"))?;
        Ok(outcome)
    }

    /// Writes extracted attributes together with `parsed_succeeded`
    pub async fn complete_product_parse(&self, id: i64, detail: &ProductDetail) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE product_records
            SET parse_status = 'parsed_succeeded',
                name = ?, price = ?, currency = ?, product_code = ?,
                reviews = ?, image_ref = ?, parsed_at = ?
            WHERE id = ? AND parse_status = 'parsing'
            ",
        )
        .bind(&detail.name)
        .bind(detail.price)
        .bind(detail.currency.as_deref())
        .bind(detail.code.as_deref())
        .bind(detail.reviews)
        .bind(detail.image_ref.as_deref())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store parsed product {id}"))?;

        if result.rows_affected() != 1 {
            bail!("product record {id} is not claimed for parsing");
        }
        Ok(())
    }

    /// Operator action: moves a stage's failed rows back to pending.
    /// The pipeline never calls this on its own.
    pub async fn requeue_failed(&self, spec: ClaimSpec, include_unfetchable: bool) -> Result<u64> {
        let table = spec.table.table_name();
        let sql = match spec.kind {
            StatusKind::Fetch if include_unfetchable => format!(
                "UPDATE {table} SET fetch_status = 'pending', document_ref = NULL \
                 WHERE fetch_status IN ('failed', 'failed_unfetchable')"
            ),
            StatusKind::Fetch => format!(
                "UPDATE {table} SET fetch_status = 'pending', document_ref = NULL \
                 WHERE fetch_status = 'failed'"
            ),
            StatusKind::Parse => format!(
                "UPDATE {table} SET parse_status = NULL WHERE parse_status = 'parsing_failed'"
            ),
        };

        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to requeue failed rows in {table}"))?;
        Ok(result.rows_affected())
    }

    pub async fn status_counts(&self, table: JobTable) -> Result<Vec<StatusCount>> {
        let sql = format!(
            "SELECT fetch_status, parse_status, COUNT(*) AS count FROM {} \
             GROUP BY fetch_status, parse_status ORDER BY fetch_status, parse_status",
            table.table_name()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<StatusCount> {
                let fetch_status: String = row.try_get("fetch_status")?;
                let parse_status: Option<String> = row.try_get("parse_status")?;
                Ok(StatusCount {
                    fetch_status: fetch_status.parse()?,
                    parse_status: ParseStatus::from_column(parse_status.as_deref())?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn get_listing(&self, id: i64) -> Result<Option<ListingPage>> {
        let row = sqlx::query("SELECT * FROM listing_pages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_listing).transpose()
    }

    pub async fn listings(&self) -> Result<Vec<ListingPage>> {
        let rows = sqlx::query("SELECT * FROM listing_pages ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_listing).collect()
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>> {
        let row = sqlx::query("SELECT * FROM product_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    pub async fn products(&self) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query("SELECT * FROM product_records ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_product).collect()
    }

    fn select_next_sql(spec: ClaimSpec) -> String {
        format!(
            "SELECT id, {url} AS url, document_ref FROM {table} WHERE {pending} ORDER BY id ASC LIMIT 1",
            url = spec.table.url_column(),
            table = spec.table.table_name(),
            pending = spec.pending_predicate(),
        )
    }

    fn row_to_claimed(row: &SqliteRow) -> Result<ClaimedJob> {
        Ok(ClaimedJob {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            document_ref: row.try_get("document_ref")?,
        })
    }

    fn row_to_listing(row: &SqliteRow) -> Result<ListingPage> {
        let fetch_status: String = row.try_get("fetch_status")?;
        let parse_status: Option<String> = row.try_get("parse_status")?;

        Ok(ListingPage {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            fetch_status: fetch_status.parse()?,
            parse_status: ParseStatus::from_column(parse_status.as_deref())?,
            captured_at: parse_timestamp(row.try_get("captured_at")?)?,
            document_ref: row.try_get("document_ref")?,
        })
    }

    fn row_to_product(row: &SqliteRow) -> Result<ProductRecord> {
        let fetch_status: String = row.try_get("fetch_status")?;
        let parse_status: Option<String> = row.try_get("parse_status")?;

        Ok(ProductRecord {
            id: row.try_get("id")?,
            product_url: row.try_get("product_url")?,
            listing_page_id: row.try_get("listing_page_id")?,
            listing_title: row.try_get("listing_title")?,
            fetch_status: fetch_status.parse()?,
            parse_status: ParseStatus::from_column(parse_status.as_deref())?,
            document_ref: row.try_get("document_ref")?,
            fetched_at: parse_timestamp(row.try_get("fetched_at")?)?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            currency: row.try_get("currency")?,
            product_code: row.try_get("product_code")?,
            reviews: row.try_get("reviews")?,
            image_ref: row.try_get("image_ref")?,
            parsed_at: parse_timestamp(row.try_get("parsed_at")?)?,
        })
    }
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| anyhow!("Failed to parse timestamp {raw}: {e}"))
        })
        .transpose()
}
