use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::core::approval::compose_powerform_url;
use crate::core::attributes::route_attributes;
use crate::db::models::submission::Submission;
use crate::db::models::tag_request::TagRequest;
use crate::db::queries::submission::{
    add_photo, delete_photos_for_submission, find_or_create_for_camera_folder, get_submission,
    photos_for_submission,
};
use crate::db::queries::tag_request::create_tag_request;
use crate::error::AppError;
use crate::utils::api_response::ApiResponse;

pub fn submission_routes() -> Router<AppState> {
    Router::new()
        .route("/submissions", post(resolve_submission))
        .route("/submissions/{submission_id}", get(get_submission_handler))
        .route("/submissions/{submission_id}/photos", post(upload_photos))
        .route(
            "/submissions/{submission_id}/tag-requests",
            post(request_tagging),
        )
        // camera photos run well past axum's 2MB default
        .layer(axum::extract::DefaultBodyLimit::max(50 * 1024 * 1024))
}

#[derive(Deserialize, ToSchema)]
pub struct CameraFolderRequest {
    /// MediaValet folder name, e.g. CAMERA2_20220408
    pub camera_folder: String,
}

#[derive(Serialize, ToSchema)]
pub struct PhotoUploadResponse {
    pub uploaded: usize,
    pub mediavalet_folder_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct TagRequestResponse {
    /// True when sign-off is disabled and the assets were tagged right away.
    pub tagged_immediately: bool,
    /// Where to send the signer; present only when a sign-off is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<TagRequest>,
}

/// Resolve a camera folder name to a submission. The folder name is the
/// join key: its camera id and setup date identify the survey record, and
/// MediaValet uses the same name for the photo folder.
#[utoipa::path(
    post,
    path = "/submissions",
    request_body = CameraFolderRequest,
    responses(
        (status = 201, description = "Submission resolved", body = Submission),
        (status = 400, description = "Malformed camera folder or no matching survey submission"),
        (status = 502, description = "Survey source unavailable")
    ),
    tag = "Submissions"
)]
pub async fn resolve_submission(
    State(state): State<AppState>,
    Json(payload): Json<CameraFolderRequest>,
) -> Result<ApiResponse<Submission>, AppError> {
    let submission = find_or_create_for_camera_folder(
        &state.pool,
        &state.arcgis,
        &state.config,
        &payload.camera_folder,
    )
    .await?;

    Ok(ApiResponse::success(
        StatusCode::CREATED,
        "Submission resolved",
        submission,
    ))
}

#[utoipa::path(
    get,
    path = "/submissions/{submission_id}",
    params(("submission_id" = i32, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Submission retrieved", body = Submission),
        (status = 404, description = "Submission not found")
    ),
    tag = "Submissions"
)]
pub async fn get_submission_handler(
    State(state): State<AppState>,
    Path(submission_id): Path<i32>,
) -> Result<ApiResponse<Submission>, AppError> {
    let submission = get_submission(&state.pool, submission_id).await?;
    Ok(ApiResponse::success(
        StatusCode::OK,
        "Submission retrieved",
        submission,
    ))
}

/// Take multipart photo uploads, stage them locally, push them into the
/// submission's MediaValet folder, then drop the local copies — MediaValet
/// owns the bytes from here on.
#[utoipa::path(
    post,
    path = "/submissions/{submission_id}/photos",
    params(("submission_id" = i32, Path, description = "Submission ID")),
    responses(
        (status = 201, description = "Photos uploaded to MediaValet", body = PhotoUploadResponse),
        (status = 404, description = "Submission not found"),
        (status = 502, description = "MediaValet unavailable")
    ),
    tag = "Submissions"
)]
pub async fn upload_photos(
    State(state): State<AppState>,
    Path(submission_id): Path<i32>,
    mut multipart: Multipart,
) -> Result<ApiResponse<PhotoUploadResponse>, AppError> {
    let submission = get_submission(&state.pool, submission_id).await?;

    let folder_dir = state.config.photo_storage_path.join(&submission.camera_folder);
    tokio::fs::create_dir_all(&folder_dir)
        .await
        .map_err(|e| AppError::configuration(format!("cannot create photo storage: {e}")))?;

    let mut staged: Vec<(String, bytes::Bytes)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("invalid multipart upload: {e}")))?
    {
        let Some(filename) = field.file_name().map(sanitize_filename) else {
            continue; // not a file field
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation(format!("failed reading upload: {e}")))?;
        staged.push((filename, bytes));
    }

    if staged.is_empty() {
        return Err(AppError::validation("no photo files in upload"));
    }

    for (filename, bytes) in &staged {
        let path = folder_dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::configuration(format!("cannot store photo: {e}")))?;
        add_photo(
            &state.pool,
            submission.id,
            &format!("{}/{}", submission.camera_folder, filename),
        )
        .await?;
    }

    let folder_id = state.mediavalet.create_folder(&submission.camera_folder).await?;
    for (filename, bytes) in staged {
        state
            .mediavalet
            .upload_file(bytes, &filename, &folder_id)
            .await?;
    }

    // MediaValet is now the source of truth; if photos are needed again
    // (map popups) they get re-downloaded from there
    let uploaded = remove_local_photos(&state, submission.id).await?;

    Ok(ApiResponse::success(
        StatusCode::CREATED,
        format!("Uploaded photos for {}", submission.camera_folder),
        PhotoUploadResponse {
            uploaded,
            mediavalet_folder_id: folder_id,
        },
    ))
}

/// Start the tagging workflow for a submission's assets. With sign-off
/// disabled this tags immediately; otherwise it creates a pending tag
/// request and hands back the PowerForm URL for the signer.
#[utoipa::path(
    post,
    path = "/submissions/{submission_id}/tag-requests",
    params(("submission_id" = i32, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Assets tagged immediately", body = TagRequestResponse),
        (status = 201, description = "Tag request created, awaiting sign-off", body = TagRequestResponse),
        (status = 404, description = "Submission or MediaValet folder not found"),
        (status = 502, description = "External service unavailable")
    ),
    tag = "Submissions"
)]
pub async fn request_tagging(
    State(state): State<AppState>,
    Path(submission_id): Path<i32>,
) -> Result<ApiResponse<TagRequestResponse>, AppError> {
    let submission = get_submission(&state.pool, submission_id).await?;
    let config = &state.config;

    let folder_id = state
        .mediavalet
        .find_folder_id(&submission.camera_folder)
        .await?
        .ok_or_else(|| {
            AppError::not_found(
                "Folder doesn't exist in MediaValet. Please make sure it's created first.",
            )
        })?;
    let assets = state.mediavalet.list_assets(&folder_id).await?;

    // the direct/aggregated split is config-driven and re-evaluated on
    // every request, config may have changed since the submission was stored
    let routed = route_attributes(
        &submission.submission_cleaned.0,
        &config.metadata_attributes_direct,
    )?;
    let tag_pairs = routed.to_tag_pairs(&config.metadata_description_attribute);

    if !config.require_esign_for_asset_tagging {
        let asset_ids: Vec<String> = assets.iter().map(|asset| asset.id.clone()).collect();
        state
            .mediavalet
            .tag_attributes(&tag_pairs, &asset_ids, &config.metadata_description_attribute)
            .await?;
        return Ok(ApiResponse::success(
            StatusCode::OK,
            format!("Successfully tagged assets for {}", submission.camera_folder),
            TagRequestResponse {
                tagged_immediately: true,
                approval_url: None,
                request: None,
            },
        ));
    }

    // unique token per tagging iteration, the same folder can be re-tagged
    let token = Uuid::new_v4();
    let asset_titles: Vec<&str> = assets.iter().map(|asset| asset.title.as_str()).collect();
    let mut form_pairs = tag_pairs;
    form_pairs.push(("camera_folder".to_string(), submission.camera_folder.clone()));
    form_pairs.push(("assets".to_string(), asset_titles.join("\n")));

    let approval_url = compose_powerform_url(
        &config.docusign_asset_tagging_powerform_url,
        token,
        &form_pairs,
    )?;
    let request = create_tag_request(&state.pool, submission.id, token, &approval_url).await?;

    Ok(ApiResponse::success(
        StatusCode::CREATED,
        "Tag request created, awaiting sign-off",
        TagRequestResponse {
            tagged_immediately: false,
            approval_url: Some(approval_url),
            request: Some(request),
        },
    ))
}

/// Delete local photo files and rows, returning how many there were.
async fn remove_local_photos(state: &AppState, submission_id: i32) -> Result<usize, AppError> {
    let photos = photos_for_submission(&state.pool, submission_id).await?;
    for photo in &photos {
        let path = state.config.photo_storage_path.join(&photo.file_path);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "could not delete staged photo");
        }
    }
    delete_photos_for_submission(&state.pool, submission_id).await?;
    Ok(photos.len())
}

/// Keep only the final path component of a client-supplied filename.
fn sanitize_filename(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .to_string()
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(
        resolve_submission,
        get_submission_handler,
        upload_photos,
        request_tagging
    ),
    components(schemas(CameraFolderRequest, PhotoUploadResponse, TagRequestResponse, Submission, TagRequest)),
    tags(
        (name = "Submissions", description = "Camera-folder reconciliation, photo intake and tag requests")
    )
)]
pub struct SubmissionDoc;
