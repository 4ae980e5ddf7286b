//! Durable, at-least-once work queue.
//!
//! Each entry is a job id with the earliest time it may run and the number
//! of retries it still has. Claiming stamps `claimed_until_ms`; an entry
//! whose claim lapses without an ack becomes claimable again.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_millis, to_millis, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: String,
    pub eligible_at: DateTime<Utc>,
    pub attempts_remaining: u32,
    pub claimed_until: Option<DateTime<Utc>>,
}

/// Adds (or replaces) the queue entry for a job.
pub fn enqueue(
    db: &Database,
    job_id: &str,
    eligible_at: DateTime<Utc>,
    attempts_remaining: u32,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_queue (job_id, eligible_at_ms, attempts_remaining,
             claimed_until_ms, enqueued_at_ms)
             VALUES (?1, ?2, ?3, NULL, ?4)
             ON CONFLICT(job_id) DO UPDATE SET
               eligible_at_ms = excluded.eligible_at_ms,
               attempts_remaining = excluded.attempts_remaining,
               claimed_until_ms = NULL",
            params![
                job_id,
                to_millis(eligible_at),
                attempts_remaining as i64,
                to_millis(Utc::now())
            ],
        )?;
        Ok(())
    })
}

/// Moves an existing entry to a later eligibility time with one retry fewer.
/// Also drops the claim so the dispatcher can pick it up once due.
pub fn reschedule(
    db: &Database,
    job_id: &str,
    eligible_at: DateTime<Utc>,
    attempts_remaining: u32,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE job_queue SET eligible_at_ms = ?2, attempts_remaining = ?3,
             claimed_until_ms = NULL
             WHERE job_id = ?1",
            params![job_id, to_millis(eligible_at), attempts_remaining as i64],
        )?;
        Ok(changed == 1)
    })
}

/// Atomically claims the oldest due entry that is unclaimed or whose claim
/// has lapsed.
pub fn claim_due(
    db: &Database,
    now: DateTime<Utc>,
    claim_for: Duration,
) -> Result<Option<QueueEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let now_ms = to_millis(now);

        let candidate: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT job_id, eligible_at_ms, attempts_remaining FROM job_queue
                 WHERE eligible_at_ms <= ?1
                 AND (claimed_until_ms IS NULL OR claimed_until_ms <= ?1)
                 ORDER BY eligible_at_ms, enqueued_at_ms
                 LIMIT 1",
                params![now_ms],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((job_id, eligible_at_ms, attempts_remaining)) = candidate else {
            return Ok(None);
        };

        let claimed_until = now + claim_for;
        tx.execute(
            "UPDATE job_queue SET claimed_until_ms = ?2 WHERE job_id = ?1",
            params![job_id, to_millis(claimed_until)],
        )?;
        tx.commit()?;

        Ok(Some(QueueEntry {
            job_id,
            eligible_at: from_millis(eligible_at_ms),
            attempts_remaining: attempts_remaining.max(0) as u32,
            claimed_until: Some(claimed_until),
        }))
    })
}

/// Removes the entry once its job reached a terminal state (or vanished).
pub fn ack(db: &Database, job_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM job_queue WHERE job_id = ?1", params![job_id])?;
        Ok(())
    })
}

/// Drops the claim so the entry can be redelivered immediately.
pub fn release(db: &Database, job_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_queue SET claimed_until_ms = NULL WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    })
}

pub fn find(db: &Database, job_id: &str) -> Result<Option<QueueEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let entry = conn
            .query_row(
                "SELECT job_id, eligible_at_ms, attempts_remaining, claimed_until_ms
                 FROM job_queue WHERE job_id = ?1",
                params![job_id],
                |r| {
                    let attempts: i64 = r.get(2)?;
                    let claimed: Option<i64> = r.get(3)?;
                    Ok(QueueEntry {
                        job_id: r.get(0)?,
                        eligible_at: from_millis(r.get(1)?),
                        attempts_remaining: attempts.max(0) as u32,
                        claimed_until: claimed.map(from_millis),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    })
}

/// Number of entries in the queue, claimed or not.
pub fn depth(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM job_queue", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    })
}
