use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::model::{JobStatus, Platform};

/// One ingestion run against one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperJob {
    pub id: String,
    pub platform: Platform,
    pub location: Option<String>,
    pub category: Option<String>,
    pub status: JobStatus,
    pub listings_found: i64,
    pub opportunities_found: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Start,
    Succeed {
        listings_found: i64,
        opportunities_found: i64,
    },
    Fail {
        message: String,
    },
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Start => "start",
            JobEvent::Succeed { .. } => "succeed",
            JobEvent::Fail { .. } => "fail",
        }
    }
}

/// Validate a status change. Only forward moves are legal.
pub fn transition(status: JobStatus, event: &JobEvent) -> Result<JobStatus> {
    match (status, event) {
        (JobStatus::Pending, JobEvent::Start) => Ok(JobStatus::Running),
        (JobStatus::Running, JobEvent::Succeed { .. }) => Ok(JobStatus::Completed),
        (JobStatus::Running, JobEvent::Fail { .. }) => Ok(JobStatus::Failed),
        (status, event) => Err(PipelineError::StateConflict(format!(
            "cannot {} a job in status {status}",
            event.name()
        ))),
    }
}

impl ScraperJob {
    pub fn new(
        platform: Platform,
        location: Option<String>,
        category: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            location,
            category,
            status: JobStatus::Pending,
            listings_found: 0,
            opportunities_found: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    /// Apply an event in place. On error the job is left untouched.
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<()> {
        let next = transition(self.status, &event)?;
        match event {
            JobEvent::Start => self.started_at = Some(now),
            JobEvent::Succeed {
                listings_found,
                opportunities_found,
            } => {
                self.listings_found = listings_found;
                self.opportunities_found = opportunities_found;
                self.completed_at = Some(now);
            }
            JobEvent::Fail { message } => {
                self.error_message = Some(message);
                self.completed_at = Some(now);
            }
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> (ScraperJob, DateTime<Utc>) {
        let now = Utc::now();
        (ScraperJob::new(Platform::Ebay, None, None, now), now)
    }

    #[test]
    fn happy_path_sets_timestamps_and_counts() {
        let (mut job, now) = job();
        job.apply(JobEvent::Start, now).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(now));
        assert!(job.completed_at.is_none());

        let later = now + Duration::seconds(5);
        job.apply(
            JobEvent::Succeed {
                listings_found: 12,
                opportunities_found: 3,
            },
            later,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!((job.listings_found, job.opportunities_found), (12, 3));
        assert_eq!(job.completed_at, Some(later));
    }

    #[test]
    fn failure_records_message() {
        let (mut job, now) = job();
        job.apply(JobEvent::Start, now).unwrap();
        job.apply(JobEvent::Fail { message: "rate limited".into() }, now).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn terminal_jobs_reject_further_events() {
        let (mut job, now) = job();
        job.apply(JobEvent::Start, now).unwrap();
        job.apply(JobEvent::Fail { message: "x".into() }, now).unwrap();
        let before = job.clone();
        let later = now + Duration::seconds(9);
        let err = job.apply(JobEvent::Fail { message: "again".into() }, later).unwrap_err();
        assert!(matches!(err, PipelineError::StateConflict(_)));
        assert_eq!(job, before);
    }

    #[test]
    fn skipping_start_is_a_conflict() {
        assert!(transition(
            JobStatus::Pending,
            &JobEvent::Succeed {
                listings_found: 0,
                opportunities_found: 0
            }
        )
        .is_err());
        assert!(transition(JobStatus::Running, &JobEvent::Start).is_err());
        assert!(transition(JobStatus::Completed, &JobEvent::Start).is_err());
    }
}
