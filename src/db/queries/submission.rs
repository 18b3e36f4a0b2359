use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::clients::arcgis::ArcGisClient;
use crate::config::Config;
use crate::core::matcher::{latest_matching_submission, CameraFolder};
use crate::core::normalize::{normalize_submission, CanonicalAttributes};
use crate::db::models::submission::{Photo, Submission};
use crate::error::AppError;

const SUBMISSION_COLUMNS: &str =
    "id, camera_folder, submission_raw, submission_cleaned, created_at";

pub async fn create_submission(
    pool: &PgPool,
    camera_folder: &str,
    submission_raw: Value,
    submission_cleaned: CanonicalAttributes,
) -> Result<Submission, AppError> {
    let submission = sqlx::query_as::<_, Submission>(&format!(
        "INSERT INTO submissions (camera_folder, submission_raw, submission_cleaned)
         VALUES ($1, $2, $3)
         RETURNING {SUBMISSION_COLUMNS}"
    ))
    .bind(camera_folder)
    .bind(submission_raw)
    .bind(Json(submission_cleaned))
    .fetch_one(pool)
    .await?;
    Ok(submission)
}

pub async fn get_submission(pool: &PgPool, submission_id: i32) -> Result<Submission, AppError> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("submission {submission_id} not found")))
}

/// The newest locally cached submission for a camera folder, if any.
/// camera_folder isn't unique, last-created wins.
pub async fn latest_for_camera_folder(
    pool: &PgPool,
    camera_folder: &str,
) -> Result<Option<Submission>, AppError> {
    let submission = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions
         WHERE camera_folder = $1
         ORDER BY id DESC
         LIMIT 1"
    ))
    .bind(camera_folder)
    .fetch_optional(pool)
    .await?;
    Ok(submission)
}

/// Resolve a camera folder to a submission, cache-first.
///
/// An already-reconciled folder is served from the local store without
/// re-querying the survey source. Otherwise the full survey export is
/// matched (exact camera id, setup date at day granularity, newest creation
/// date wins), normalized once, and persisted. Zero survey matches is the
/// user's problem (wrong folder name), not a server failure.
pub async fn find_or_create_for_camera_folder(
    pool: &PgPool,
    arcgis: &ArcGisClient,
    config: &Config,
    camera_folder: &str,
) -> Result<Submission, AppError> {
    let folder = CameraFolder::parse(camera_folder, &config.camera_setup_date_format)?;

    if let Some(existing) = latest_for_camera_folder(pool, camera_folder).await? {
        return Ok(existing);
    }

    let records = arcgis.list_submissions().await?;
    let raw = latest_matching_submission(
        records,
        &folder,
        &config.survey_setup_date_field,
        &config.survey_creation_date_field,
    )
    .ok_or_else(|| {
        AppError::validation("No submission for the combination of CAMERAID + DATE found!")
    })?;

    let cleaned = normalize_submission(&raw, &config.metadata_rules())?;
    create_submission(pool, camera_folder, Value::Object(raw), cleaned).await
}

pub async fn add_photo(
    pool: &PgPool,
    submission_id: i32,
    file_path: &str,
) -> Result<Photo, AppError> {
    let photo = sqlx::query_as::<_, Photo>(
        "INSERT INTO photos (submission_id, file_path)
         VALUES ($1, $2)
         RETURNING id, submission_id, file_path",
    )
    .bind(submission_id)
    .bind(file_path)
    .fetch_one(pool)
    .await?;
    Ok(photo)
}

pub async fn photos_for_submission(
    pool: &PgPool,
    submission_id: i32,
) -> Result<Vec<Photo>, AppError> {
    let photos = sqlx::query_as::<_, Photo>(
        "SELECT id, submission_id, file_path FROM photos WHERE submission_id = $1 ORDER BY id",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;
    Ok(photos)
}

/// Drop the local photo rows once MediaValet holds the files.
pub async fn delete_photos_for_submission(
    pool: &PgPool,
    submission_id: i32,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM photos WHERE submission_id = $1")
        .bind(submission_id)
        .execute(pool)
        .await?;
    Ok(())
}
