// src/db/models/tag_request.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::approval::ApprovalStatus;

/// A pending/settled request to tag the assets of one submission's camera
/// folder, gated behind a DocuSign sign-off.
///
/// `powerform_submission_id` is the correlation token round-tripped through
/// DocuSign. `powerform_data_orig` is the outbound PowerForm URL exactly as
/// sent (audit trail, never mutated); `powerform_data_edited` is the form
/// data pulled from the completed envelope, written once on approval.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TagRequest {
    pub id: i32,
    pub submission_id: i32,
    pub powerform_submission_id: Uuid,
    pub powerform_data_orig: String,
    #[schema(value_type = Object)]
    pub powerform_data_edited: Value,
    pub status: ApprovalStatus,
    pub requested_at: Option<NaiveDateTime>,
    pub granted_at: Option<NaiveDateTime>,
}
