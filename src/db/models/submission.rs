// src/db/models/submission.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::core::normalize::CanonicalAttributes;

/// One camera-trap deployment event, reconciled from the survey source.
///
/// `camera_folder` is deliberately not unique at the storage level; when the
/// same folder is resolved again, the newest row wins. `submission_raw`
/// keeps the survey record exactly as received, `submission_cleaned` the
/// canonical attributes derived from it at creation time — neither is ever
/// rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Submission {
    pub id: i32,
    pub camera_folder: String,
    #[schema(value_type = Object)]
    pub submission_raw: Value,
    #[schema(value_type = Object)]
    pub submission_cleaned: Json<CanonicalAttributes>,
    pub created_at: Option<NaiveDateTime>,
}

/// A locally staged photo. Rows only exist between upload from the user and
/// the push to MediaValet (or a re-download for a map popup); MediaValet is
/// the source of truth for photo bytes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Photo {
    pub id: i32,
    pub submission_id: i32,
    pub file_path: String,
}
