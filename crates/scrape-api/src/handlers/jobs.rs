//! Job submission, query, and deletion handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use scrape_core::{defaults, JobStatus, ListJobsRequest, ScrapeOptions};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub url: String,
    #[serde(default)]
    pub options: ScrapeOptions,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.store.create(&body.url, body.options).await?;
    info!(job_id = %job.id, url = %job.url, "Job submitted");
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.store.get(id).await?;
    Ok(Json(job))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListJobsQuery {
    /// Validate the status filter and normalize paging.
    pub fn into_request(self) -> Result<ListJobsRequest, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<JobStatus>)
            .transpose()?;
        Ok(ListJobsRequest::new(
            status,
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(defaults::PAGE_SIZE),
        ))
    }
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = query.into_request()?;
    let jobs = state.store.list(request).await?;
    Ok(Json(jobs))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete(id).await?;
    info!(job_id = %id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let request = ListJobsQuery::default().into_request().unwrap();
        assert_eq!(request.status, None);
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, defaults::PAGE_SIZE);
    }

    #[test]
    fn test_list_query_parses_status_and_clamps() {
        let query = ListJobsQuery {
            status: Some("in_progress".into()),
            page: Some(0),
            page_size: Some(1_000_000),
        };
        let request = query.into_request().unwrap();
        assert_eq!(request.status, Some(JobStatus::InProgress));
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, defaults::PAGE_SIZE_MAX);
    }

    #[test]
    fn test_list_query_rejects_unknown_status() {
        let query = ListJobsQuery {
            status: Some("running".into()),
            ..Default::default()
        };
        assert!(matches!(query.into_request(), Err(ApiError::BadRequest(_))));
    }
}
