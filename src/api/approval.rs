use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::NaiveDateTime;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::clients::arcgis::ArcGisClient;
use crate::clients::docusign::DocusignClient;
use crate::core::approval::{check_approval, ApprovalAction, ApprovalStatus, CheckOutcome};
use crate::db::queries::map::{get_map_by_token, set_public_url, MapStore};
use crate::db::queries::submission::get_submission;
use crate::db::queries::tag_request::{get_tag_request_by_token, TagRequestStore};
use crate::error::AppError;
use crate::utils::api_response::ApiResponse;

/// The webhook-style poll boundary: DocuSign's landing page redirects the
/// signer here, and operators can re-check any time. Both routes are safe
/// under repetition — the CAS in the store guarantees the bound side effect
/// fires at most once per token.
pub fn approval_routes() -> Router<AppState> {
    Router::new()
        .route("/approvals/tag/{token}", get(check_tag_approval))
        .route("/approvals/map/{token}", get(check_map_approval))
}

#[derive(Serialize, ToSchema)]
pub struct ApprovalCheckResponse {
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webmap_public_url: Option<String>,
}

/// Tagging the camera folder's assets with the form data the signer
/// (possibly) edited.
struct TagAssetsAction {
    state: AppState,
    camera_folder: String,
    /// Uppercased canonical labels of the direct attributes; form data is
    /// addressed by these same labels.
    direct_labels: Vec<String>,
}

impl ApprovalAction for TagAssetsAction {
    async fn run(&self, form_data: &HashMap<String, String>) -> Result<(), AppError> {
        let config = &self.state.config;

        let mut pairs = Vec::with_capacity(self.direct_labels.len() + 1);
        for label in &self.direct_labels {
            let value = form_data.get(label).ok_or_else(|| {
                AppError::external("docusign", format!("form data has no attribute '{label}'"))
            })?;
            pairs.push((label.clone(), value.clone()));
        }
        let description = form_data
            .get(&config.metadata_description_attribute)
            .ok_or_else(|| {
                AppError::external(
                    "docusign",
                    format!(
                        "form data has no '{}' attribute",
                        config.metadata_description_attribute
                    ),
                )
            })?;
        pairs.push((
            config.metadata_description_attribute.clone(),
            description.clone(),
        ));

        let folder_id = self
            .state
            .mediavalet
            .find_folder_id(&self.camera_folder)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "MediaValet folder '{}' disappeared before tagging",
                    self.camera_folder
                ))
            })?;
        let assets = self.state.mediavalet.list_assets(&folder_id).await?;
        let asset_ids: Vec<String> = assets.into_iter().map(|asset| asset.id).collect();

        self.state
            .mediavalet
            .tag_attributes(&pairs, &asset_ids, &config.metadata_description_attribute)
            .await
    }
}

/// Sharing the webmap publicly and recording its viewer URL.
struct PublishMapAction {
    state: AppState,
    map_id: i32,
    webmap_url: String,
}

impl ApprovalAction for PublishMapAction {
    async fn run(&self, _form_data: &HashMap<String, String>) -> Result<(), AppError> {
        let webmap_id = ArcGisClient::webmap_id_from_url(&self.webmap_url)?;
        self.state.arcgis.share_webmap_public(&webmap_id).await?;
        let public_url = self.state.arcgis.public_map_url(&webmap_id);
        set_public_url(&self.state.pool, self.map_id, &public_url).await?;
        tracing::info!(map_id = self.map_id, %public_url, "published webmap");
        Ok(())
    }
}

/// Check whether the tag request's PowerForm has been signed, and tag the
/// assets on the first poll that observes the completed envelope.
#[utoipa::path(
    get,
    path = "/approvals/tag/{token}",
    params(("token" = Uuid, Path, description = "Correlation token of the tag request")),
    responses(
        (status = 200, description = "Current approval state", body = ApprovalCheckResponse),
        (status = 404, description = "Unknown token or envelope not yet visible"),
        (status = 502, description = "Signature service unavailable")
    ),
    tag = "Approvals"
)]
pub async fn check_tag_approval(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<ApiResponse<ApprovalCheckResponse>, AppError> {
    let request = get_tag_request_by_token(&state.pool, token).await?;

    // terminal rows answer from the store, no external round-trip and no
    // chance of re-firing the side effect
    if request.status.is_terminal() {
        return Ok(ApiResponse::success(
            StatusCode::OK,
            "Request already settled",
            ApprovalCheckResponse {
                outcome: settled_outcome(request.status),
                webmap_public_url: None,
            },
        ));
    }

    let submission = get_submission(&state.pool, request.submission_id).await?;
    let action = TagAssetsAction {
        camera_folder: submission.camera_folder.clone(),
        direct_labels: direct_labels_for(&state, &submission.submission_cleaned.0)?,
        state: state.clone(),
    };
    let store = TagRequestStore::new(state.pool.clone(), token);
    let powerform_id = DocusignClient::powerform_id_from_url(
        &state.config.docusign_asset_tagging_powerform_url,
    )?;

    let outcome = check_approval(
        state.docusign.as_ref(),
        &store,
        &action,
        token,
        &powerform_id,
        search_window_start(request.requested_at),
    )
    .await?;

    let message = match &outcome {
        CheckOutcome::Waiting { envelope_status } => {
            format!("Approval still pending (envelope is '{envelope_status}')")
        }
        CheckOutcome::Rejected => "Tag request was declined".to_string(),
        CheckOutcome::Approved { .. } => {
            format!("Successfully tagged assets for {}", submission.camera_folder)
        }
    };
    Ok(ApiResponse::success(
        StatusCode::OK,
        message,
        ApprovalCheckResponse {
            outcome,
            webmap_public_url: None,
        },
    ))
}

/// Check whether the map publish PowerForm has been signed, and share the
/// webmap publicly on the first poll that observes the completed envelope.
#[utoipa::path(
    get,
    path = "/approvals/map/{token}",
    params(("token" = Uuid, Path, description = "Correlation token of the map publish request")),
    responses(
        (status = 200, description = "Current approval state", body = ApprovalCheckResponse),
        (status = 404, description = "Unknown token or envelope not yet visible"),
        (status = 502, description = "Signature service unavailable")
    ),
    tag = "Approvals"
)]
pub async fn check_map_approval(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<ApiResponse<ApprovalCheckResponse>, AppError> {
    let map = get_map_by_token(&state.pool, token).await?;

    if map.status.is_terminal() {
        let public_url = (!map.webmap_public_url.is_empty()).then(|| map.webmap_public_url.clone());
        return Ok(ApiResponse::success(
            StatusCode::OK,
            "Request already settled",
            ApprovalCheckResponse {
                outcome: settled_outcome(map.status),
                webmap_public_url: public_url,
            },
        ));
    }

    let action = PublishMapAction {
        state: state.clone(),
        map_id: map.id,
        webmap_url: map.webmap_url.clone(),
    };
    let store = MapStore::new(state.pool.clone(), token);
    let powerform_id = DocusignClient::powerform_id_from_url(
        &state.config.docusign_map_publish_powerform_url,
    )?;

    let outcome = check_approval(
        state.docusign.as_ref(),
        &store,
        &action,
        token,
        &powerform_id,
        search_window_start(map.requested_at),
    )
    .await?;

    let (message, webmap_public_url) = match &outcome {
        CheckOutcome::Waiting { envelope_status } => (
            format!("Approval still pending (envelope is '{envelope_status}')"),
            None,
        ),
        CheckOutcome::Rejected => ("Map publish request was declined".to_string(), None),
        CheckOutcome::Approved { .. } => {
            let webmap_id = ArcGisClient::webmap_id_from_url(&map.webmap_url)?;
            (
                "Map publish request was granted! Find your public map below.".to_string(),
                Some(state.arcgis.public_map_url(&webmap_id)),
            )
        }
    };
    Ok(ApiResponse::success(
        StatusCode::OK,
        message,
        ApprovalCheckResponse {
            outcome,
            webmap_public_url,
        },
    ))
}

/// Uppercased canonical labels for the configured direct attributes.
fn direct_labels_for(
    state: &AppState,
    canonical: &crate::core::normalize::CanonicalAttributes,
) -> Result<Vec<String>, AppError> {
    state
        .config
        .metadata_attributes_direct
        .iter()
        .map(|key| {
            canonical
                .get(key)
                .map(|attr| attr.label.to_uppercase())
                .ok_or_else(|| {
                    AppError::configuration(format!(
                        "direct attribute '{key}' not present in submission"
                    ))
                })
        })
        .collect()
}

fn settled_outcome(status: ApprovalStatus) -> CheckOutcome {
    match status {
        ApprovalStatus::Approved => CheckOutcome::Approved { action_ran: false },
        _ => CheckOutcome::Rejected,
    }
}

/// Envelope search lower bound: the request's creation time, with an epoch
/// fallback for rows that predate the requested_at column.
fn search_window_start(requested_at: Option<NaiveDateTime>) -> NaiveDateTime {
    requested_at.unwrap_or_else(|| chrono::DateTime::UNIX_EPOCH.naive_utc())
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(check_tag_approval, check_map_approval),
    components(schemas(ApprovalCheckResponse)),
    tags(
        (name = "Approvals", description = "Inbound sign-off checks keyed by correlation token")
    )
)]
pub struct ApprovalDoc;
