// src/db/models/map.rs
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::approval::ApprovalStatus;
use crate::core::map_document::MapPointAttributes;

/// One published (or publish-pending) web map.
///
/// `submission_attributes` (camera folder → projected point, title, image,
/// description) and `webmap_json` are frozen at creation. `webmap_url` and
/// the correlation token are written once when the private webmap item is
/// created; `webmap_public_url` once by the publish side effect.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct MapRecord {
    pub id: i32,
    pub powerform_submission_id: Option<Uuid>,
    pub status: ApprovalStatus,
    #[schema(value_type = Object)]
    pub submission_attributes: Json<BTreeMap<String, MapPointAttributes>>,
    #[schema(value_type = Object)]
    pub webmap_json: Value,
    pub webmap_url: String,
    pub webmap_public_url: String,
    pub requested_at: Option<NaiveDateTime>,
    pub granted_at: Option<NaiveDateTime>,
}
