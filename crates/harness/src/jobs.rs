//! Generic polling and job completion
//!
//! Long-running server operations (publish, download, import, fork) are
//! started by one API call and finished by server-side processing; the
//! harness only ever polls. [`poll`] is the generic primitive; [`await_job`]
//! and [`await_app`] layer the job state machine on top and convert
//! ambiguous terminal states into distinct errors.

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace};

use crate::client::{AppInfo, EditorClient, Job};
use crate::error::{Error, Result};

/// Interval between checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default deadline applied by the job wrappers. A stuck backend then
/// surfaces as [`Error::PollTimeout`] instead of a hung test.
pub const JOB_DEADLINE: Duration = Duration::from_secs(300);

/// Invoke `check` on a fixed interval until it yields a value or errors.
///
/// `Ok(None)` keeps polling, `Ok(Some(v))` resolves with `v`, and an error
/// rejects immediately with no further invocations. Without a `deadline` the
/// loop runs indefinitely; with one it fails with a poll-timeout error once
/// the deadline elapses between checks.
pub async fn poll<T, F, Fut>(
    mut check: F,
    interval: Duration,
    deadline: Option<Duration>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        if let Some(limit) = deadline {
            let waited = started.elapsed();
            if waited >= limit {
                return Err(Error::PollTimeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }
        }
        trace!("poll check pending, sleeping {:?}", interval);
        sleep(interval).await;
    }
}

/// Interpret a terminal job: an error message wins, then a non-`complete`
/// status, else success.
pub fn finish_job(job: Job) -> Result<Job> {
    if let Some(message) = &job.error {
        return Err(Error::Job(message.clone()));
    }
    if !job.is_complete() {
        return Err(Error::JobStatus(job.status.clone()));
    }
    Ok(job)
}

/// Poll a job until it leaves `running`, then classify the outcome.
pub async fn await_job(client: &EditorClient, job_id: u64) -> Result<Job> {
    debug!(job_id, "waiting for job");
    let job = poll(
        move || async move {
            let job = client.job(job_id).await?;
            Ok((!job.is_running()).then_some(job))
        },
        POLL_INTERVAL,
        Some(JOB_DEADLINE),
    )
    .await?;
    debug!(job_id, status = %job.status, "job terminal");
    finish_job(job)
}

/// Poll an app until its embedded build task is terminal, then classify.
/// An app with no task at all is treated as already built.
pub async fn await_app(client: &EditorClient, app_id: u64) -> Result<AppInfo> {
    debug!(app_id, "waiting for app build");
    let app = poll(
        move || async move {
            let app = client.app(app_id).await?;
            let settled = app.task.as_ref().map_or(true, |task| !task.is_running());
            Ok(settled.then_some(app))
        },
        POLL_INTERVAL,
        Some(JOB_DEADLINE),
    )
    .await?;
    if let Some(task) = app.task.clone() {
        finish_job(task)?;
    }
    Ok(app)
}

/// Pull a required string field out of a completed job's payload.
pub fn job_data_str(job: &Job, field: &str) -> Result<String> {
    job.data
        .as_ref()
        .and_then(|data| data.get(field))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Fetch(format!("job {} payload missing {field}", job.id)))
}

/// Pull a required numeric field out of a completed job's payload.
pub fn job_data_u64(job: &Job, field: &str) -> Result<u64> {
    job.data
        .as_ref()
        .and_then(|data| data.get(field))
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::Fetch(format!("job {} payload missing {field}", job.id)))
}
