//! Job queue storage and management.
//!
//! Jobs move `pending -> processing -> completed`, or back to `pending` on a
//! failure until `attempts` reaches the job's own `max_retries`, at which
//! point they are `failed`. Claiming is a conditional update, so a job that
//! another tick already took is never run twice.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::job::{Job, JobKind, JobStatus};
use crate::error::CrmError;
use crate::storage::{parse_optional_timestamp, parse_timestamp, sql_time, Database, OptionalExt};

const JOB_COLUMNS_SQL: &str = "id, organization_id, kind, payload, status, attempts, max_retries, last_error, run_at, created_at, updated_at";

/// Queue of scheduled jobs.
pub struct JobQueue<'a> {
    db: &'a Database,
}

impl<'a> JobQueue<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add a job to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be saved.
    pub fn enqueue(&self, job: &mut Job) -> Result<i64, CrmError> {
        let conn = self.db.connection();

        conn.execute(
            r"INSERT INTO scheduled_jobs (organization_id, kind, payload, status, attempts, max_retries, last_error, run_at, created_at, updated_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.organization_id,
                job.kind.as_str(),
                job.payload,
                job.status.as_str(),
                job.attempts,
                job.max_retries,
                job.last_error,
                sql_time(&job.run_at),
                sql_time(&job.created_at),
                sql_time(&job.updated_at),
            ],
        )
        .map_err(|e| CrmError::Database(format!("Failed to enqueue job: {e}")))?;

        let id = conn.last_insert_rowid();
        job.id = Some(id);
        tracing::debug!(job_id = id, kind = job.kind.as_str(), "job enqueued");
        Ok(id)
    }

    /// Pending jobs that may run at `now`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, CrmError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(
            &format!(
                r"SELECT {JOB_COLUMNS_SQL} FROM scheduled_jobs
                  WHERE status = 'pending' AND run_at <= ?1
                  ORDER BY created_at ASC, id ASC
                  LIMIT ?2"
            ),
            params![sql_time(&now), limit],
        )
    }

    /// Move a job from `pending` to `processing`.
    ///
    /// Returns `false` if the job was not pending any more.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool, CrmError> {
        let rows = self
            .db
            .connection()
            .execute(
                "UPDATE scheduled_jobs SET status = 'processing', updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
                params![sql_time(&now), id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to claim job {id}: {e}")))?;
        Ok(rows == 1)
    }

    /// Mark a job as completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_completed(&self, id: i64, now: DateTime<Utc>) -> Result<(), CrmError> {
        self.db
            .connection()
            .execute(
                "UPDATE scheduled_jobs SET status = 'completed', last_error = NULL, updated_at = ?1 WHERE id = ?2",
                params![sql_time(&now), id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to mark job {id} completed: {e}")))?;
        Ok(())
    }

    /// Mark a job as failed without counting another attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_failed(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<(), CrmError> {
        self.db
            .connection()
            .execute(
                "UPDATE scheduled_jobs SET status = 'failed', last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, sql_time(&now), id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to mark job {id} failed: {e}")))?;
        Ok(())
    }

    /// Count a failed attempt and decide the job's next status.
    ///
    /// The job returns to `pending` unless its attempts have reached
    /// `max_retries`, in which case it becomes `failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails or the job does not exist.
    pub fn record_failure(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<JobStatus, CrmError> {
        let conn = self.db.connection();
        conn.execute(
            r"UPDATE scheduled_jobs SET
              attempts = attempts + 1,
              last_error = ?1,
              updated_at = ?2,
              status = CASE WHEN attempts + 1 >= max_retries THEN 'failed' ELSE 'pending' END
              WHERE id = ?3",
            params![error, sql_time(&now), id],
        )
        .map_err(|e| CrmError::Database(format!("Failed to record job failure: {e}")))?;

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM scheduled_jobs WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to read job {id}: {e}")))?;

        status
            .map(|s| JobStatus::from_string(&s))
            .ok_or_else(|| CrmError::NotFound(format!("Job: {id}")))
    }

    /// Return `processing` jobs untouched since `cutoff` to `pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn requeue_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize, CrmError> {
        self.db
            .connection()
            .execute(
                "UPDATE scheduled_jobs SET status = 'pending', updated_at = ?1 WHERE status = 'processing' AND updated_at < ?2",
                params![sql_time(&now), sql_time(&cutoff)],
            )
            .map_err(|e| CrmError::Database(format!("Failed to requeue stale jobs: {e}")))
    }

    /// Get a specific job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<Job>, CrmError> {
        self.db
            .connection()
            .query_row(
                &format!("SELECT {JOB_COLUMNS_SQL} FROM scheduled_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to query job: {e}")))
    }

    /// List jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(
        &self,
        organization_id: Option<&str>,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, CrmError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(
            &format!(
                r"SELECT {JOB_COLUMNS_SQL} FROM scheduled_jobs
                  WHERE (?1 IS NULL OR organization_id = ?1) AND (?2 IS NULL OR status = ?2)
                  ORDER BY id DESC
                  LIMIT ?3"
            ),
            params![organization_id, status.map(|s| s.as_str()), limit],
        )
    }

    /// Put a failed job back in the queue with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown job and `Conflict` if the job is
    /// not failed.
    pub fn retry(&self, organization_id: &str, id: i64) -> Result<(), CrmError> {
        let now = sql_time(&Utc::now());
        let rows = self
            .db
            .connection()
            .execute(
                r"UPDATE scheduled_jobs SET status = 'pending', attempts = 0, last_error = NULL, run_at = ?1, updated_at = ?1
                  WHERE organization_id = ?2 AND id = ?3 AND status = 'failed'",
                params![now, organization_id, id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to retry job {id}: {e}")))?;

        if rows == 1 {
            return Ok(());
        }
        match self.get(id)? {
            Some(job) if job.organization_id == organization_id => Err(CrmError::Conflict(
                format!("Job {id} is {}, not failed", job.status),
            )),
            _ => Err(CrmError::NotFound(format!("Job: {id}"))),
        }
    }

    /// Delete completed jobs last touched more than `max_age_hours` ago,
    /// for one organization or (with `None`) all of them.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `max_age_hours` is positive and
    /// representable, or an error if the delete fails.
    pub fn cleanup(
        &self,
        organization_id: Option<&str>,
        max_age_hours: i64,
    ) -> Result<usize, CrmError> {
        let cutoff = chrono::Duration::try_hours(max_age_hours)
            .filter(|_| max_age_hours > 0)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                CrmError::Validation(format!(
                    "Cleanup age must be a positive number of hours, got {max_age_hours}"
                ))
            })?;

        self.db
            .connection()
            .execute(
                "DELETE FROM scheduled_jobs
                 WHERE status = 'completed' AND updated_at < ?1
                   AND (?2 IS NULL OR organization_id = ?2)",
                params![sql_time(&cutoff), organization_id],
            )
            .map_err(|e| CrmError::Database(format!("Failed to cleanup jobs: {e}")))
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self, organization_id: Option<&str>) -> Result<QueueStats, CrmError> {
        let conn = self.db.connection();

        let count = |status: &str| -> Result<i64, CrmError> {
            conn.query_row(
                "SELECT COUNT(*) FROM scheduled_jobs WHERE (?1 IS NULL OR organization_id = ?1) AND status = ?2",
                params![organization_id, status],
                |row| row.get(0),
            )
            .map_err(|e| CrmError::Database(format!("Failed to count {status} jobs: {e}")))
        };

        let oldest_pending: Option<String> = conn
            .query_row(
                r"SELECT created_at FROM scheduled_jobs
                  WHERE (?1 IS NULL OR organization_id = ?1) AND status = 'pending'
                  ORDER BY created_at ASC LIMIT 1",
                params![organization_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CrmError::Database(format!("Failed to get oldest pending: {e}")))?;

        Ok(QueueStats {
            pending: count("pending")?,
            processing: count("processing")?,
            completed: count("completed")?,
            failed: count("failed")?,
            oldest_pending: parse_optional_timestamp(oldest_pending),
        })
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Job>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params, row_to_job)
            .map_err(|e| CrmError::Database(format!("Failed to query jobs: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Oldest pending job timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
}

fn row_to_job(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let kind: String = row.get(2)?;
    let status: String = row.get(4)?;
    let run_at: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let now = Utc::now();

    let kind = JobKind::from_string(&kind).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Job {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        kind,
        payload: row.get(3)?,
        status: JobStatus::from_string(&status),
        attempts: row.get(5)?,
        max_retries: row.get(6)?,
        last_error: row.get(7)?,
        run_at: parse_timestamp(&run_at, now),
        created_at: parse_timestamp(&created_at, now),
        updated_at: parse_timestamp(&updated_at, now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn enqueue(queue: &JobQueue<'_>, org: &str, max_retries: i32) -> i64 {
        queue
            .enqueue(&mut Job::run_rule(org, 1, 1, max_retries))
            .unwrap()
    }

    #[test]
    fn test_enqueue_and_get() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = enqueue(&queue, "acme", 3);
        let loaded = queue.get(id).unwrap().unwrap();
        assert_eq!(loaded.kind, JobKind::RunRule);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.max_retries, 3);
    }

    #[test]
    fn test_due_respects_run_at_and_order() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);
        let now = Utc::now();

        let first = enqueue(&queue, "acme", 3);
        let later = Job::resume_rule("acme", 1, 1, 1, now + Duration::hours(1), 3);
        queue.enqueue(&mut later.clone()).unwrap();
        let second = enqueue(&queue, "globex", 3);

        let due = queue.due(now + Duration::seconds(1), 10).unwrap();
        let ids: Vec<_> = due.iter().filter_map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second]);

        assert_eq!(queue.due(now + Duration::seconds(1), 1).unwrap().len(), 1);
        assert_eq!(queue.due(now + Duration::hours(2), 10).unwrap().len(), 3);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = enqueue(&queue, "acme", 3);
        assert!(queue.claim(id, Utc::now()).unwrap());
        assert!(!queue.claim(id, Utc::now()).unwrap());
        assert_eq!(queue.get(id).unwrap().unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_record_failure_retries_then_fails() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = enqueue(&queue, "acme", 2);
        queue.claim(id, Utc::now()).unwrap();
        assert_eq!(
            queue.record_failure(id, "boom", Utc::now()).unwrap(),
            JobStatus::Pending
        );

        queue.claim(id, Utc::now()).unwrap();
        assert_eq!(
            queue.record_failure(id, "boom again", Utc::now()).unwrap(),
            JobStatus::Failed
        );

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn test_mark_completed() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = enqueue(&queue, "acme", 3);
        queue.claim(id, Utc::now()).unwrap();
        queue.mark_completed(id, Utc::now()).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_requeue_stale() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);
        let now = Utc::now();

        let stale = enqueue(&queue, "acme", 3);
        let fresh = enqueue(&queue, "acme", 3);
        queue.claim(stale, now - Duration::hours(1)).unwrap();
        queue.claim(fresh, now).unwrap();

        let requeued = queue
            .requeue_stale(now - Duration::minutes(15), now)
            .unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(queue.get(stale).unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(queue.get(fresh).unwrap().unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_retry_failed_job() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = enqueue(&queue, "acme", 1);
        queue.claim(id, Utc::now()).unwrap();
        queue.record_failure(id, "boom", Utc::now()).unwrap();

        assert!(matches!(queue.retry("globex", id), Err(CrmError::NotFound(_))));
        queue.retry("acme", id).unwrap();

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(matches!(queue.retry("acme", id), Err(CrmError::Conflict(_))));
    }

    #[test]
    fn test_list_and_stats() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        enqueue(&queue, "acme", 3);
        let done = enqueue(&queue, "acme", 3);
        enqueue(&queue, "globex", 3);
        queue.claim(done, Utc::now()).unwrap();
        queue.mark_completed(done, Utc::now()).unwrap();

        assert_eq!(queue.list(None, None, 10).unwrap().len(), 3);
        assert_eq!(queue.list(Some("acme"), None, 10).unwrap().len(), 2);
        assert_eq!(
            queue
                .list(Some("acme"), Some(JobStatus::Completed), 10)
                .unwrap()
                .len(),
            1
        );

        let stats = queue.stats(Some("acme")).unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert!(stats.oldest_pending.is_some());

        assert_eq!(queue.stats(None).unwrap().pending, 2);
    }

    fn completed(queue: &JobQueue<'_>, org: &str, hours_ago: i64) -> i64 {
        let id = enqueue(queue, org, 3);
        queue.claim(id, Utc::now()).unwrap();
        queue
            .mark_completed(id, Utc::now() - Duration::hours(hours_ago))
            .unwrap();
        id
    }

    #[test]
    fn test_cleanup() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let id = completed(&queue, "acme", 48);
        enqueue(&queue, "acme", 3);

        assert_eq!(queue.cleanup(Some("acme"), 24).unwrap(), 1);
        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.cleanup(Some("acme"), 24).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_is_scoped_to_organization() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);

        let acme = completed(&queue, "acme", 48);
        let globex = completed(&queue, "globex", 48);

        assert_eq!(queue.cleanup(Some("acme"), 24).unwrap(), 1);
        assert!(queue.get(acme).unwrap().is_none());
        assert!(queue.get(globex).unwrap().is_some());

        assert_eq!(queue.cleanup(None, 24).unwrap(), 1);
        assert!(queue.get(globex).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_rejects_bad_age() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(&db);
        let id = completed(&queue, "acme", 1);

        for hours in [0, -24, i64::MAX] {
            assert!(matches!(
                queue.cleanup(Some("acme"), hours),
                Err(CrmError::Validation(_))
            ));
        }
        assert!(queue.get(id).unwrap().is_some());
    }
}
