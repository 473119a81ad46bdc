//! Scheduled workloads

use super::pod::PodSpec;

const DEFAULT_JOB_HISTORY_LIMIT: i32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct CronJobSpec {
    pub pod: PodSpec,
    pub description: String,
    pub slug_url: String,
    pub schedule: String,
    pub successful_jobs_history_limit: i32,
    pub failed_jobs_history_limit: i32,
}

impl CronJobSpec {
    pub fn name(&self) -> &str {
        &self.pod.name
    }

    pub fn namespace(&self) -> &str {
        &self.pod.namespace
    }
}

#[derive(Debug, Clone)]
pub struct CronJobBuilder {
    slug_url: String,
    description: String,
    schedule: String,
}

impl CronJobBuilder {
    pub fn new(slug_url: impl Into<String>) -> Self {
        Self {
            slug_url: slug_url.into(),
            description: String::new(),
            schedule: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn build(self, pod: PodSpec) -> CronJobSpec {
        CronJobSpec {
            pod,
            description: self.description,
            slug_url: self.slug_url,
            schedule: self.schedule,
            successful_jobs_history_limit: DEFAULT_JOB_HISTORY_LIMIT,
            failed_jobs_history_limit: DEFAULT_JOB_HISTORY_LIMIT,
        }
    }
}
