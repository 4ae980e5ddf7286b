//! Job repository. All job record mutations go through here.
//!
//! Every transition is a conditional `UPDATE ... WHERE id = ? AND status = ?`
//! that bumps `version`. A `false` return means the row was not in the
//! expected status (another worker won the race, or the job is terminal).

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::{Job, JobStatus};

const SELECT_COLUMNS: &str = "id, owner_id, title, filename, content_type, file_size, audio_ref,
    requested_language, requested_model, language, model_name, transcribed_text,
    segments_count, status, error_detail, last_error, retry_count, created_at, updated_at,
    completed_at, version, lease_owner, lease_expires_at";

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_opt_timestamp(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let status: String = row.get(13)?;
    let status: JobStatus = status.parse().map_err(|e| conversion_error(13, e))?;
    let file_size: i64 = row.get(5)?;
    let segments_count: i64 = row.get(12)?;
    let retry_count: i64 = row.get(16)?;

    Ok(Job {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        filename: row.get(3)?,
        content_type: row.get(4)?,
        file_size: file_size.max(0) as u64,
        audio_ref: row.get(6)?,
        requested_language: row.get(7)?,
        requested_model: row.get(8)?,
        language: row.get(9)?,
        model_name: row.get(10)?,
        transcribed_text: row.get(11)?,
        segments_count: segments_count.max(0) as u32,
        status,
        error_detail: row.get(14)?,
        last_error: row.get(15)?,
        retry_count: retry_count.max(0) as u32,
        created_at: get_timestamp(row, 17)?,
        updated_at: get_timestamp(row, 18)?,
        completed_at: get_opt_timestamp(row, 19)?,
        version: row.get(20)?,
        lease_owner: row.get(21)?,
        lease_expires_at: get_opt_timestamp(row, 22)?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Result payload written by the `processing -> completed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub language: Option<String>,
    pub model_name: Option<String>,
    pub segments_count: u32,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, title, filename, content_type, file_size, audio_ref,
             requested_language, requested_model, language, model_name, transcribed_text,
             segments_count, status, error_detail, last_error, retry_count, created_at,
             updated_at, completed_at, version, lease_owner, lease_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                job.id,
                job.owner_id,
                job.title,
                job.filename,
                job.content_type,
                job.file_size as i64,
                job.audio_ref,
                job.requested_language,
                job.requested_model,
                job.language,
                job.model_name,
                job.transcribed_text,
                job.segments_count as i64,
                job.status.as_str(),
                job.error_detail,
                job.last_error,
                job.retry_count as i64,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                job.completed_at.map(format_timestamp),
                job.version,
                job.lease_owner,
                job.lease_expires_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", SELECT_COLUMNS);
        let job = conn
            .query_row(&sql, params![id], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Finds a job by ID, but only if it belongs to `owner_id`.
pub fn find_for_owner(
    db: &Database,
    owner_id: &str,
    id: &str,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs WHERE id = ?1 AND owner_id = ?2",
            SELECT_COLUMNS
        );
        let job = conn
            .query_row(&sql, params![id, owner_id], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Lists an owner's jobs newest first, returning (rows, total_count).
pub fn query(
    db: &Database,
    owner_id: &str,
    filter: &JobFilter,
) -> Result<(Vec<Job>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["owner_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(owner_id.to_string())];

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: i64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            SELECT_COLUMNS,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total.max(0) as u64))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
}

/// `pending -> processing`. Takes the durable execution lease.
pub fn begin_processing(
    db: &Database,
    id: &str,
    lease_owner: &str,
    lease_expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', lease_owner = ?2, lease_expires_at = ?3,
             updated_at = ?4, version = version + 1
             WHERE id = ?1 AND status = 'pending'",
            params![
                id,
                lease_owner,
                format_timestamp(lease_expires_at),
                format_timestamp(now)
            ],
        )?;
        Ok(changed == 1)
    })
}

/// `processing -> completed`. Stores the transcript and sets `completed_at`.
pub fn mark_completed(
    db: &Database,
    id: &str,
    completion: &Completion,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', transcribed_text = ?2, language = ?3,
             model_name = ?4, segments_count = ?5, error_detail = '', last_error = NULL,
             completed_at = ?6, updated_at = ?6, lease_owner = NULL, lease_expires_at = NULL,
             version = version + 1
             WHERE id = ?1 AND status = 'processing'",
            params![
                id,
                completion.text,
                completion.language,
                completion.model_name,
                completion.segments_count as i64,
                ts
            ],
        )?;
        Ok(changed == 1)
    })
}

/// `processing -> failed`. The caller bounds `error_detail`.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error_detail: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_detail = ?2, updated_at = ?3,
             lease_owner = NULL, lease_expires_at = NULL, version = version + 1
             WHERE id = ?1 AND status = 'processing'",
            params![id, error_detail, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// `processing -> pending` for a retry. Records the retryable diagnostic and
/// bumps `retry_count`.
pub fn requeue(
    db: &Database,
    id: &str,
    last_error: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'pending', last_error = ?2, retry_count = retry_count + 1,
             updated_at = ?3, lease_owner = NULL, lease_expires_at = NULL,
             version = version + 1
             WHERE id = ?1 AND status = 'processing'",
            params![id, last_error, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// IDs of `processing` jobs whose lease expired before `now`.
pub fn find_expired_leases(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs
             WHERE status = 'processing' AND lease_expires_at IS NOT NULL
             AND lease_expires_at < ?1",
        )?;
        let ids = stmt
            .query_map(params![format_timestamp(now)], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// `(id, retry_count)` of `pending` jobs that have no queue entry.
pub fn find_pending_unqueued(db: &Database) -> Result<Vec<(String, u32)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT j.id, j.retry_count FROM jobs j
             LEFT JOIN job_queue q ON q.job_id = j.id
             WHERE j.status = 'pending' AND q.job_id IS NULL
             ORDER BY j.created_at",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let retry_count: i64 = r.get(1)?;
                Ok((r.get(0)?, retry_count.max(0) as u32))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(owner: &str) -> Job {
        Job::new_pending(
            owner,
            "interview.mp3",
            "audio/mpeg",
            2048,
            "audio/2026/01/interview.mp3",
            Some("de".to_string()),
            None,
            Some("Interview".to_string()),
        )
    }

    fn completion() -> Completion {
        Completion {
            text: "Hallo Welt".to_string(),
            language: Some("de".to_string()),
            model_name: Some("whisper-large-v3".to_string()),
            segments_count: 2,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.filename, "interview.mp3");
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.requested_language.as_deref(), Some("de"));
        assert_eq!(found.title.as_deref(), Some("Interview"));
        assert_eq!(found.created_at.timestamp_millis(), job.created_at.timestamp_millis());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_find_for_owner_hides_other_owners() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();

        assert!(find_for_owner(&db, "owner-1", &job.id).unwrap().is_some());
        assert!(find_for_owner(&db, "owner-2", &job.id).unwrap().is_none());
    }

    #[test]
    fn test_begin_processing_only_once() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();
        let now = Utc::now();

        assert!(begin_processing(&db, &job.id, "w-1", now + Duration::minutes(31), now).unwrap());
        assert!(!begin_processing(&db, &job.id, "w-2", now + Duration::minutes(31), now).unwrap());

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(found.lease_owner.as_deref(), Some("w-1"));
        assert_eq!(found.version, 1);
    }

    #[test]
    fn test_complete_sets_completed_at_and_clears_lease() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();
        let now = Utc::now();
        begin_processing(&db, &job.id, "w-1", now + Duration::minutes(31), now).unwrap();

        assert!(mark_completed(&db, &job.id, &completion(), now).unwrap());

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.transcribed_text, "Hallo Welt");
        assert_eq!(found.segments_count, 2);
        assert!(found.completed_at.is_some());
        assert!(found.lease_owner.is_none());
        assert!(found.invariant_violation().is_none());
    }

    #[test]
    fn test_terminal_rows_reject_further_transitions() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();
        let now = Utc::now();
        begin_processing(&db, &job.id, "w-1", now + Duration::minutes(31), now).unwrap();
        mark_failed(&db, &job.id, "Invalid API key", now).unwrap();

        assert!(!mark_completed(&db, &job.id, &completion(), now).unwrap());
        assert!(!requeue(&db, &job.id, "boom", now).unwrap());
        assert!(!begin_processing(&db, &job.id, "w-2", now, now).unwrap());

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert_eq!(found.error_detail, "Invalid API key");
        assert!(found.invariant_violation().is_none());
    }

    #[test]
    fn test_complete_requires_processing() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();
        assert!(!mark_completed(&db, &job.id, &completion(), Utc::now()).unwrap());
    }

    #[test]
    fn test_requeue_bumps_retry_count_and_keeps_detail_empty() {
        let db = test_db();
        let job = sample_job("owner-1");
        insert(&db, &job).unwrap();
        let now = Utc::now();
        begin_processing(&db, &job.id, "w-1", now + Duration::minutes(31), now).unwrap();

        assert!(requeue(&db, &job.id, "HTTP 503", now).unwrap());

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.retry_count, 1);
        assert_eq!(found.last_error.as_deref(), Some("HTTP 503"));
        assert!(found.error_detail.is_empty());
        assert!(found.invariant_violation().is_none());
    }

    #[test]
    fn test_query_by_owner_and_status() {
        let db = test_db();
        for _ in 0..3 {
            insert(&db, &sample_job("owner-1")).unwrap();
        }
        insert(&db, &sample_job("owner-2")).unwrap();

        let (rows, total) = query(&db, "owner-1", &JobFilter::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 3);

        let (rows, total) = query(
            &db,
            "owner-1",
            &JobFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 0);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_pagination() {
        let db = test_db();
        for i in 0..10 {
            let mut job = sample_job("owner-1");
            job.created_at = job.created_at + Duration::seconds(i);
            insert(&db, &job).unwrap();
        }

        let (rows, total) = query(
            &db,
            "owner-1",
            &JobFilter {
                limit: Some(3),
                offset: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 10);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].created_at >= rows[1].created_at);
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        insert(&db, &sample_job("o")).unwrap();
        insert(&db, &sample_job("o")).unwrap();
        assert_eq!(count_by_status(&db, JobStatus::Pending).unwrap(), 2);
        assert_eq!(count_by_status(&db, JobStatus::Failed).unwrap(), 0);
    }

    #[test]
    fn test_find_expired_leases() {
        let db = test_db();
        let stale = sample_job("o");
        let fresh = sample_job("o");
        insert(&db, &stale).unwrap();
        insert(&db, &fresh).unwrap();
        let now = Utc::now();
        begin_processing(&db, &stale.id, "w-1", now - Duration::seconds(1), now).unwrap();
        begin_processing(&db, &fresh.id, "w-2", now + Duration::minutes(5), now).unwrap();

        let expired = find_expired_leases(&db, now).unwrap();
        assert_eq!(expired, vec![stale.id]);
    }
}
