use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::approval::{ApprovalStatus, ApprovalStore};
use crate::db::models::tag_request::TagRequest;
use crate::error::AppError;

const TAG_REQUEST_COLUMNS: &str = "id, submission_id, powerform_submission_id, \
     powerform_data_orig, powerform_data_edited, status, requested_at, granted_at";

pub async fn create_tag_request(
    pool: &PgPool,
    submission_id: i32,
    token: Uuid,
    powerform_data_orig: &str,
) -> Result<TagRequest, AppError> {
    let request = sqlx::query_as::<_, TagRequest>(&format!(
        "INSERT INTO tag_requests (submission_id, powerform_submission_id, powerform_data_orig)
         VALUES ($1, $2, $3)
         RETURNING {TAG_REQUEST_COLUMNS}"
    ))
    .bind(submission_id)
    .bind(token)
    .bind(powerform_data_orig)
    .fetch_one(pool)
    .await?;
    Ok(request)
}

pub async fn get_tag_request_by_token(
    pool: &PgPool,
    token: Uuid,
) -> Result<TagRequest, AppError> {
    sqlx::query_as::<_, TagRequest>(&format!(
        "SELECT {TAG_REQUEST_COLUMNS} FROM tag_requests WHERE powerform_submission_id = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("no tag request for token {token}")))
}

/// Compare-and-set away from `pending`. The WHERE clause is the whole
/// at-most-once story: only one poll can ever observe rows_affected == 1
/// for a given token, terminal rows never match again.
pub async fn try_transition_tag_request(
    pool: &PgPool,
    token: Uuid,
    next: ApprovalStatus,
) -> Result<bool, AppError> {
    let query = if next == ApprovalStatus::Approved {
        "UPDATE tag_requests SET status = $2, granted_at = now()
         WHERE powerform_submission_id = $1 AND status = 'pending'"
    } else {
        "UPDATE tag_requests SET status = $2
         WHERE powerform_submission_id = $1 AND status = 'pending'"
    };
    let result = sqlx::query(query).bind(token).bind(next).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn record_tag_request_form_data(
    pool: &PgPool,
    token: Uuid,
    form_data: &HashMap<String, String>,
) -> Result<(), AppError> {
    let edited = serde_json::to_value(form_data)
        .map_err(|e| AppError::configuration(format!("form data not serializable: {e}")))?;
    sqlx::query(
        "UPDATE tag_requests SET powerform_data_edited = $2 WHERE powerform_submission_id = $1",
    )
    .bind(token)
    .bind(edited)
    .execute(pool)
    .await?;
    Ok(())
}

/// Pg-backed [`ApprovalStore`] for one tag request.
pub struct TagRequestStore {
    pool: PgPool,
    token: Uuid,
}

impl TagRequestStore {
    pub fn new(pool: PgPool, token: Uuid) -> Self {
        Self { pool, token }
    }
}

impl ApprovalStore for TagRequestStore {
    async fn try_transition(&self, next: ApprovalStatus) -> Result<bool, AppError> {
        try_transition_tag_request(&self.pool, self.token, next).await
    }

    async fn record_form_data(&self, form_data: &HashMap<String, String>) -> Result<(), AppError> {
        record_tag_request_form_data(&self.pool, self.token, form_data).await
    }
}
