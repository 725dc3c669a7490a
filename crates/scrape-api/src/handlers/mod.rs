//! HTTP handlers for scrape-api.

pub mod jobs;
pub mod service;

pub use jobs::{create_job, delete_job, get_job, list_jobs, CreateJobBody, ListJobsQuery};
pub use service::{health_check, queue_stats, service_info};
