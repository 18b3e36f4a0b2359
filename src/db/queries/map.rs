use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::approval::{ApprovalStatus, ApprovalStore};
use crate::core::map_document::MapPointAttributes;
use crate::db::models::map::MapRecord;
use crate::error::AppError;

const MAP_COLUMNS: &str = "id, powerform_submission_id, status, submission_attributes, \
     webmap_json, webmap_url, webmap_public_url, requested_at, granted_at";

/// Freeze the per-camera attributes and the rendered map document in one
/// insert; neither changes after this.
pub async fn create_map(
    pool: &PgPool,
    submission_attributes: BTreeMap<String, MapPointAttributes>,
    webmap_json: Value,
) -> Result<MapRecord, AppError> {
    let map = sqlx::query_as::<_, MapRecord>(&format!(
        "INSERT INTO maps (submission_attributes, webmap_json)
         VALUES ($1, $2)
         RETURNING {MAP_COLUMNS}"
    ))
    .bind(Json(submission_attributes))
    .bind(webmap_json)
    .fetch_one(pool)
    .await?;
    Ok(map)
}

/// Record the created (still private) webmap item and mint the correlation
/// token for the publish approval. Written once per map.
pub async fn set_webmap(
    pool: &PgPool,
    map_id: i32,
    webmap_url: &str,
    token: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE maps SET webmap_url = $2, powerform_submission_id = $3 WHERE id = $1",
    )
    .bind(map_id)
    .bind(webmap_url)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_map_by_token(pool: &PgPool, token: Uuid) -> Result<MapRecord, AppError> {
    sqlx::query_as::<_, MapRecord>(&format!(
        "SELECT {MAP_COLUMNS} FROM maps WHERE powerform_submission_id = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("no map for token {token}")))
}

/// Same compare-and-set as tag requests; one poll wins, terminal rows stay
/// terminal.
pub async fn try_transition_map(
    pool: &PgPool,
    token: Uuid,
    next: ApprovalStatus,
) -> Result<bool, AppError> {
    let query = if next == ApprovalStatus::Approved {
        "UPDATE maps SET status = $2, granted_at = now()
         WHERE powerform_submission_id = $1 AND status = 'pending'"
    } else {
        "UPDATE maps SET status = $2
         WHERE powerform_submission_id = $1 AND status = 'pending'"
    };
    let result = sqlx::query(query).bind(token).bind(next).execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

/// Written once by the publish side effect.
pub async fn set_public_url(
    pool: &PgPool,
    map_id: i32,
    webmap_public_url: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE maps SET webmap_public_url = $2 WHERE id = $1")
        .bind(map_id)
        .bind(webmap_public_url)
        .execute(pool)
        .await?;
    Ok(())
}

/// Pg-backed [`ApprovalStore`] for one map publish request.
pub struct MapStore {
    pool: PgPool,
    token: Uuid,
}

impl MapStore {
    pub fn new(pool: PgPool, token: Uuid) -> Self {
        Self { pool, token }
    }
}

impl ApprovalStore for MapStore {
    async fn try_transition(&self, next: ApprovalStatus) -> Result<bool, AppError> {
        try_transition_map(&self.pool, self.token, next).await
    }

    async fn record_form_data(&self, _form_data: &HashMap<String, String>) -> Result<(), AppError> {
        // map publishing keeps nothing from the form; the signer only
        // confirms the webmap URL shown to them
        Ok(())
    }
}
