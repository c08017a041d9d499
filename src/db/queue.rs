//! Queue table operations: upsert, ordered range scans, completion,
//! aggregation, and bulk delete.
//!
//! Every public operation is a single statement, or for upsert two
//! statements in one short transaction; nothing holds a transaction across
//! calls.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};

use crate::error::{Error, Result};
use crate::model::{Cursor, LocationHash, StatusRow, WorkItem, format_instant, parse_instant};
use crate::shard::ShardRange;

const SELECT_ITEM: &str = "SELECT location, location_hash, content_hash, treatment, completed_at, result, next_at FROM queue";

// Claim branches name their index so the scan walks it in hash order and
// stops at LIMIT; both indexes are partial, matching the branch predicate.
const SELECT_PENDING: &str = "SELECT location, location_hash, content_hash, treatment, completed_at, result, next_at \
     FROM queue INDEXED BY idx_queue_pending WHERE completed_at IS NULL";
const SELECT_REVISIT_DUE: &str = "SELECT location, location_hash, content_hash, treatment, completed_at, result, next_at \
     FROM queue INDEXED BY idx_queue_revisit_order WHERE completed_at IS NOT NULL AND next_at IS NOT NULL AND next_at <= ";

/// What an upsert did to the row for (location_hash, treatment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; a pending one was created.
    Inserted,
    /// Content changed; the row was reset to pending.
    Requeued,
    /// Same content; completion state left alone.
    Unchanged,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Requeued => "requeued",
            UpsertOutcome::Unchanged => "unchanged",
        }
    }
}

/// Parameters for an ordered scan of claimable rows.
#[derive(Debug, Clone)]
pub struct RangeQuery<'a> {
    pub treatment: &'a str,
    /// Exclusive lower bound (cursor).
    pub after: Option<&'a Cursor>,
    /// Restrict to one shard's slice of the hash space.
    pub range: Option<&'a ShardRange>,
    /// When set, completed rows whose `next_at` is at or before this instant
    /// are claimable too. When `None`, only pending rows are returned.
    pub revisit_due_at: Option<DateTime<Utc>>,
    pub limit: u32,
}

/// Rows returned by a range scan.
#[derive(Debug, Default)]
pub struct RangeScan {
    /// Decoded rows, ascending by location hash.
    pub items: Vec<WorkItem>,
    /// Rows the scan returned but that failed to decode.
    pub skipped: usize,
    /// Stored hash text of the last row scanned, decoded or not.
    pub last_cursor: Option<Cursor>,
}

impl super::Db {
    /// Insert a pending item, or reconcile an existing one against a fresh
    /// content hash.
    pub async fn upsert(
        &self,
        location: &str,
        location_hash: &LocationHash,
        content_hash: &str,
        treatment: &str,
    ) -> Result<UpsertOutcome> {
        let write_err = |source: sqlx::Error| Error::Write {
            action: "enqueue",
            treatment: treatment.to_string(),
            location: location.to_string(),
            source,
        };

        // One transaction so a concurrent delete cannot slip between the two
        // statements and leave an outcome that no stored row backs.
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        let inserted = sqlx::query(
            "INSERT INTO queue (location, location_hash, content_hash, treatment, completed_at, result, next_at)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL)
             ON CONFLICT (location_hash, treatment) DO NOTHING",
        )
        .bind(location)
        .bind(location_hash.as_str())
        .bind(content_hash)
        .bind(treatment)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?
        .rows_affected();

        if inserted > 0 {
            tx.commit().await.map_err(write_err)?;
            return Ok(UpsertOutcome::Inserted);
        }

        // Row exists. Only a changed content hash touches it.
        let requeued = sqlx::query(
            "UPDATE queue
             SET location = ?1, content_hash = ?2, completed_at = NULL, result = NULL, next_at = NULL
             WHERE location_hash = ?3 AND treatment = ?4 AND content_hash <> ?2",
        )
        .bind(location)
        .bind(content_hash)
        .bind(location_hash.as_str())
        .bind(treatment)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?
        .rows_affected();

        tx.commit().await.map_err(write_err)?;

        Ok(if requeued > 0 {
            UpsertOutcome::Requeued
        } else {
            UpsertOutcome::Unchanged
        })
    }

    /// Point lookup by key.
    pub async fn get(&self, location_hash: &LocationHash, treatment: &str) -> Result<Option<WorkItem>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "{SELECT_ITEM} WHERE location_hash = ?1 AND treatment = ?2"
        ))
        .bind(location_hash.as_str())
        .bind(treatment)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| Error::Query {
            action: "look up item",
            treatment: treatment.to_string(),
            source,
        })?;

        row.map(QueueRow::try_into_work_item).transpose()
    }

    /// Ordered scan of claimable rows for one treatment.
    ///
    /// Pending rows and revisit-due rows are read by two separate
    /// `ORDER BY location_hash LIMIT n` branches, each walking its own
    /// partial index, and merged. A single `OR` predicate would force SQLite
    /// to sort every pending row past the cursor.
    ///
    /// Rows that fail to decode are counted in [`RangeScan::skipped`] and
    /// logged, never returned and never fatal.
    pub async fn range_query(&self, query: &RangeQuery<'_>) -> Result<RangeScan> {
        let mut qb = QueryBuilder::<Sqlite>::new("");
        push_claim_select(&mut qb, query);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|source| Error::Query {
                action: "claim",
                treatment: query.treatment.to_string(),
                source,
            })?;

        let mut scan = RangeScan::default();
        for row in rows {
            if let Ok(raw) = row.try_get::<String, _>("location_hash") {
                scan.last_cursor = Some(Cursor::from_stored(raw));
            }

            match QueueRow::from_row(&row)
                .map_err(Error::from)
                .and_then(QueueRow::try_into_work_item)
            {
                Ok(item) => scan.items.push(item),
                Err(e) => {
                    tracing::warn!(treatment = query.treatment, error = %e, "skipping undecodable queue row");
                    scan.skipped += 1;
                }
            }
        }
        Ok(scan)
    }

    /// Mark one item complete. Returns the number of rows updated (0 or 1).
    pub async fn mark_complete(
        &self,
        location_hash: &LocationHash,
        treatment: &str,
        completed_at: DateTime<Utc>,
        result: &str,
        next_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE queue SET completed_at = ?1, result = ?2, next_at = ?3
             WHERE location_hash = ?4 AND treatment = ?5",
        )
        .bind(format_instant(completed_at))
        .bind(result)
        .bind(next_at.map(format_instant))
        .bind(location_hash.as_str())
        .bind(treatment)
        .execute(&self.pool)
        .await
        .map_err(|source| Error::Query {
            action: "mark item complete",
            treatment: treatment.to_string(),
            source,
        })?
        .rows_affected();

        Ok(rows_affected)
    }

    /// Pending / done / revisit-due counts per treatment, ordered by name.
    pub async fn aggregate(&self, treatment: Option<&str>, now: DateTime<Utc>) -> Result<Vec<StatusRow>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT treatment,
                    COUNT(*) FILTER (WHERE completed_at IS NULL),
                    COUNT(*) FILTER (WHERE completed_at IS NOT NULL),
                    COUNT(*) FILTER (WHERE completed_at IS NOT NULL AND next_at IS NOT NULL AND next_at <= ?1)
             FROM queue
             WHERE ?2 IS NULL OR treatment = ?2
             GROUP BY treatment
             ORDER BY treatment",
        )
        .bind(format_instant(now))
        .bind(treatment)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| Error::Query {
            action: "query status",
            treatment: treatment.unwrap_or("*").to_string(),
            source,
        })?;

        Ok(rows
            .into_iter()
            .map(|(treatment, pending, done, due)| StatusRow {
                treatment,
                pending: pending.max(0) as u64,
                done: done.max(0) as u64,
                due: due.max(0) as u64,
            })
            .collect())
    }

    /// Delete every row for `treatment`. Returns the deleted count.
    pub async fn delete_by_treatment(&self, treatment: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM queue WHERE treatment = ?1")
            .bind(treatment)
            .execute(&self.pool)
            .await
            .map_err(|source| Error::Query {
                action: "reset treatment",
                treatment: treatment.to_string(),
                source,
            })?
            .rows_affected();
        Ok(deleted)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

/// The merged pending / revisit-due select for `query`.
fn push_claim_select(qb: &mut QueryBuilder<'_, Sqlite>, query: &RangeQuery<'_>) {
    let limit = i64::from(query.limit);
    qb.push("SELECT * FROM (").push(SELECT_PENDING);
    push_range_filters(qb, query);
    qb.push(" ORDER BY location_hash LIMIT ").push_bind(limit).push(")");

    if let Some(now) = query.revisit_due_at {
        qb.push(" UNION ALL SELECT * FROM (")
            .push(SELECT_REVISIT_DUE)
            .push_bind(format_instant(now));
        push_range_filters(qb, query);
        qb.push(" ORDER BY location_hash LIMIT ").push_bind(limit).push(")");
    }
    qb.push(" ORDER BY location_hash LIMIT ").push_bind(limit);
}

/// Treatment, cursor, and shard predicates shared by both claim branches.
fn push_range_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &RangeQuery<'_>) {
    qb.push(" AND treatment = ").push_bind(query.treatment.to_owned());
    if let Some(after) = query.after {
        qb.push(" AND location_hash > ").push_bind(after.as_str().to_owned());
    }
    if let Some(range) = query.range {
        qb.push(" AND location_hash >= ").push_bind(range.start.as_str().to_owned());
        qb.push(if range.end_inclusive {
            " AND location_hash <= "
        } else {
            " AND location_hash < "
        })
        .push_bind(range.end.as_str().to_owned());
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(FromRow)]
struct QueueRow {
    location: String,
    location_hash: String,
    content_hash: String,
    treatment: String,
    completed_at: Option<String>,
    result: Option<String>,
    next_at: Option<String>,
}

impl QueueRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            location_hash: LocationHash::parse(&self.location_hash)?,
            location: self.location,
            content_hash: self.content_hash,
            treatment: self.treatment,
            completed_at: self.completed_at.as_deref().map(parse_instant).transpose()?,
            result: self.result,
            next_at: self.next_at.as_deref().map(parse_instant).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::hash::location_hash;
    use chrono::Duration;

    async fn seed(db: &Db, location: &str, content: &str, treatment: &str) -> LocationHash {
        let hash = location_hash(location);
        db.upsert(location, &hash, content, treatment).await.unwrap();
        hash
    }

    #[tokio::test]
    async fn upsert_reports_each_outcome() {
        let db = Db::in_memory().await.unwrap();
        let hash = location_hash("/a");

        assert_eq!(db.upsert("/a", &hash, "c1", "lint").await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(db.upsert("/a", &hash, "c1", "lint").await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(db.upsert("/a", &hash, "c2", "lint").await.unwrap(), UpsertOutcome::Requeued);
        // Same location, other treatment: independent row.
        assert_eq!(db.upsert("/a", &hash, "c2", "fmt").await.unwrap(), UpsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn range_query_respects_bounds_and_order() {
        let db = Db::in_memory().await.unwrap();
        let mut hashes = Vec::new();
        for i in 0..10 {
            hashes.push(seed(&db, &format!("/f{i}"), "c", "lint").await);
        }
        hashes.sort();
        let cursor = Cursor::from(hashes[2].clone());

        let scan = db
            .range_query(&RangeQuery {
                treatment: "lint",
                after: Some(&cursor),
                range: None,
                revisit_due_at: None,
                limit: 3,
            })
            .await
            .unwrap();

        let got: Vec<_> = scan.items.iter().map(|i| i.location_hash.clone()).collect();
        assert_eq!(got, hashes[3..6].to_vec());
        assert_eq!(scan.last_cursor, Some(Cursor::from(hashes[5].clone())));
        assert_eq!(scan.skipped, 0);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let db = Db::in_memory().await.unwrap();
        seed(&db, "/good", "c", "lint").await;

        sqlx::query(
            "INSERT INTO queue (location, location_hash, content_hash, treatment, completed_at, result, next_at)
             VALUES ('/bad', 'not-a-hash', 'c', 'lint', NULL, NULL, NULL)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let scan = db
            .range_query(&RangeQuery {
                treatment: "lint",
                after: None,
                range: None,
                revisit_due_at: None,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(scan.items.len(), 1);
        assert_eq!(scan.items[0].location, "/good");
        assert_eq!(scan.skipped, 1);
    }

    #[tokio::test]
    async fn cursor_moves_past_malformed_row() {
        let db = Db::in_memory().await.unwrap();
        let mut hashes = Vec::new();
        for i in 0..40 {
            hashes.push(seed(&db, &format!("/f{i}"), "c", "lint").await);
        }
        hashes.sort();

        sqlx::query(
            "INSERT INTO queue (location, location_hash, content_hash, treatment)
             VALUES ('/bad', '7-bad', 'c', 'lint')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        // Stop the window exactly on the bad row.
        let before_bad = hashes
            .iter()
            .filter(|h| h.as_str() < "7-bad")
            .last()
            .map(|h| Cursor::from(h.clone()));
        let now = Utc::now();
        let scan = db
            .range_query(&RangeQuery {
                treatment: "lint",
                after: before_bad.as_ref(),
                range: None,
                revisit_due_at: Some(now),
                limit: 1,
            })
            .await
            .unwrap();
        assert!(scan.items.is_empty());
        assert_eq!(scan.skipped, 1);
        let cursor = scan.last_cursor.expect("cursor advances onto the bad row");
        assert_eq!(cursor.as_str(), "7-bad");

        let rest = db
            .range_query(&RangeQuery {
                treatment: "lint",
                after: Some(&cursor),
                range: None,
                revisit_due_at: Some(now),
                limit: 100,
            })
            .await
            .unwrap();
        let expected: Vec<_> = hashes.iter().filter(|h| h.as_str() > "7-bad").cloned().collect();
        let got: Vec<_> = rest.items.into_iter().map(|i| i.location_hash).collect();
        assert_eq!(got, expected);
        assert_eq!(rest.skipped, 0);
    }

    #[tokio::test]
    async fn pending_and_due_rows_merge_in_hash_order() {
        let db = Db::in_memory().await.unwrap();
        let now = Utc::now();
        let mut claimable = Vec::new();
        for i in 0..9 {
            let hash = seed(&db, &format!("/m{i}"), "c", "lint").await;
            match i % 3 {
                // Revisit due an hour ago.
                0 => {
                    db.mark_complete(&hash, "lint", now - Duration::hours(2), "", Some(now - Duration::hours(1)))
                        .await
                        .unwrap();
                    claimable.push(hash);
                }
                // Done for good.
                1 => {
                    db.mark_complete(&hash, "lint", now, "", None).await.unwrap();
                }
                _ => claimable.push(hash),
            }
        }
        claimable.sort();

        let scan = db
            .range_query(&RangeQuery {
                treatment: "lint",
                after: None,
                range: None,
                revisit_due_at: Some(now),
                limit: 4,
            })
            .await
            .unwrap();
        let got: Vec<_> = scan.items.into_iter().map(|i| i.location_hash).collect();
        assert_eq!(got, claimable[..4].to_vec());
    }

    #[tokio::test]
    async fn claim_branches_walk_their_partial_indexes() {
        let db = Db::in_memory().await.unwrap();
        let cursor = Cursor::from(LocationHash::from_prefix(0x4000_0000_0000_0000));
        let query = RangeQuery {
            treatment: "lint",
            after: Some(&cursor),
            range: None,
            revisit_due_at: Some(Utc::now()),
            limit: 2,
        };

        let mut qb = QueryBuilder::<Sqlite>::new("EXPLAIN QUERY PLAN ");
        push_claim_select(&mut qb, &query);
        let plan: Vec<String> = qb
            .build()
            .fetch_all(db.pool())
            .await
            .unwrap()
            .iter()
            .map(|row| row.get::<String, _>("detail"))
            .collect();
        let plan = plan.join("\n");

        assert!(plan.contains("idx_queue_pending"), "{plan}");
        assert!(plan.contains("idx_queue_revisit_order"), "{plan}");
    }

    #[tokio::test]
    async fn upsert_outcome_is_backed_by_a_row() {
        let db = Db::in_memory().await.unwrap();
        let hash = location_hash("/a");

        for content in ["c1", "c1", "c2", "c2"] {
            db.upsert("/a", &hash, content, "lint").await.unwrap();
            assert!(db.get(&hash, "lint").await.unwrap().is_some());
            db.delete_by_treatment("lint").await.unwrap();
            // A reset between enqueues means the next upsert creates the row.
            assert_eq!(
                db.upsert("/a", &hash, content, "lint").await.unwrap(),
                UpsertOutcome::Inserted
            );
        }
    }

    #[tokio::test]
    async fn failed_requeue_leaves_row_untouched() {
        let db = Db::in_memory().await.unwrap();
        let hash = seed(&db, "/a", "c1", "lint").await;
        db.mark_complete(&hash, "lint", Utc::now(), "r1", None).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER refuse_requeue BEFORE UPDATE ON queue
             BEGIN SELECT RAISE(ABORT, 'requeue refused'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = db.upsert("/a", &hash, "c2", "lint").await.unwrap_err();
        assert!(matches!(err, Error::Write { action: "enqueue", .. }), "{err}");

        let item = db.get(&hash, "lint").await.unwrap().unwrap();
        assert_eq!(item.content_hash, "c1");
        assert_eq!(item.result.as_deref(), Some("r1"));
        assert!(!item.is_pending());
    }

    #[tokio::test]
    async fn mark_complete_reports_missing_rows() {
        let db = Db::in_memory().await.unwrap();
        let hash = seed(&db, "/a", "c", "lint").await;
        let now = Utc::now();

        let updated = db
            .mark_complete(&hash, "lint", now, "ok", Some(now + Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let item = db.get(&hash, "lint").await.unwrap().unwrap();
        assert!(!item.is_pending());
        assert_eq!(item.result.as_deref(), Some("ok"));
        assert!(item.next_at.is_some());

        let missing = db
            .mark_complete(&location_hash("/nope"), "lint", now, "", None)
            .await
            .unwrap();
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn aggregate_on_empty_table_is_empty() {
        let db = Db::in_memory().await.unwrap();
        assert!(db.aggregate(None, Utc::now()).await.unwrap().is_empty());
        assert!(db.aggregate(Some("lint"), Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_treatment_counts_rows() {
        let db = Db::in_memory().await.unwrap();
        seed(&db, "/a", "c", "lint").await;
        seed(&db, "/b", "c", "lint").await;
        seed(&db, "/a", "c", "other").await;

        assert_eq!(db.delete_by_treatment("lint").await.unwrap(), 2);
        assert_eq!(db.delete_by_treatment("lint").await.unwrap(), 0);
        let rows = db.aggregate(None, Utc::now()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].treatment, "other");
    }
}
