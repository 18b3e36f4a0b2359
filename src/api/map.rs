use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use geo::Point;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::core::approval::compose_powerform_url;
use crate::core::attributes::value_to_string;
use crate::core::map_document::{interpolate_map_document, MapPointAttributes};
use crate::core::projection::to_web_mercator;
use crate::db::models::submission::Submission;
use crate::db::queries::map::{create_map, set_webmap};
use crate::db::queries::submission::{
    add_photo, find_or_create_for_camera_folder, photos_for_submission,
};
use crate::error::AppError;
use crate::utils::api_response::ApiResponse;

pub fn map_routes() -> Router<AppState> {
    Router::new().route("/maps", post(create_map_request))
}

#[derive(Deserialize, ToSchema)]
pub struct MapRequest {
    /// Camera folders whose traps should appear on the map.
    pub camera_folders: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct MapRequestResponse {
    pub map_id: i32,
    /// The private webmap item, visible to the publishing account only.
    pub webmap_url: String,
    /// PowerForm URL; the map goes public once this is signed.
    pub approval_url: String,
}

/// Build a webmap for a set of camera folders and open the publish
/// approval.
///
/// For each folder the submission is resolved (cache-first), its GPS
/// coordinates projected into the map's reference system, and its first
/// photo wired into the popup — pulled from MediaValet when not staged
/// locally. The rendered document is frozen onto the map record, created as
/// a private webmap item, and the signer gets a link that, once completed,
/// lets the publish check share the map publicly.
#[utoipa::path(
    post,
    path = "/maps",
    request_body = MapRequest,
    responses(
        (status = 201, description = "Webmap created, awaiting publish sign-off", body = MapRequestResponse),
        (status = 400, description = "Unknown camera folder or malformed request"),
        (status = 502, description = "External service unavailable")
    ),
    tag = "Maps"
)]
pub async fn create_map_request(
    State(state): State<AppState>,
    Json(payload): Json<MapRequest>,
) -> Result<ApiResponse<MapRequestResponse>, AppError> {
    if payload.camera_folders.is_empty() {
        return Err(AppError::validation("at least one camera folder is required"));
    }

    let mut points: BTreeMap<String, MapPointAttributes> = BTreeMap::new();
    for camera_folder in &payload.camera_folders {
        let submission = find_or_create_for_camera_folder(
            &state.pool,
            &state.arcgis,
            &state.config,
            camera_folder,
        )
        .await?;

        let image_url = first_photo_url(&state, &submission).await?;
        points.insert(
            camera_folder.clone(),
            point_attributes(&state, &submission, image_url)?,
        );
    }

    let map_json = interpolate_map_document(points.values().cloned())?;
    let map = create_map(&state.pool, points, map_json.clone()).await?;

    let folders: Vec<String> = payload.camera_folders.clone();
    let title = format!("Map for {}", folders.join(", "));
    let snippet = format!(
        "This map shows photos for the following camera traps: {}",
        folders.join("\n")
    );
    let webmap = state
        .arcgis
        .create_webmap(&map_json, &title, &folders, &snippet)
        .await?;

    // correlation token for the publish approval, minted exactly once
    let token = Uuid::new_v4();
    set_webmap(&state.pool, map.id, &webmap.homepage_url, token).await?;

    let approval_url = compose_powerform_url(
        &state.config.docusign_map_publish_powerform_url,
        token,
        &[("webmap_url".to_string(), webmap.homepage_url.clone())],
    )?;

    Ok(ApiResponse::success(
        StatusCode::CREATED,
        "Webmap created, awaiting publish sign-off",
        MapRequestResponse {
            map_id: map.id,
            webmap_url: webmap.homepage_url,
            approval_url,
        },
    ))
}

/// Project the submission's GPS fix and assemble the popup attributes.
fn point_attributes(
    state: &AppState,
    submission: &Submission,
    image_url: String,
) -> Result<MapPointAttributes, AppError> {
    let canonical = &submission.submission_cleaned.0;
    let coordinate = |key: &str| -> Result<f64, AppError> {
        canonical
            .get(key)
            .and_then(|attr| attr.value.as_f64())
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "submission {} has no numeric '{key}' attribute",
                    submission.camera_folder
                ))
            })
    };

    let projected = to_web_mercator(Point::new(coordinate("x")?, coordinate("y")?))?;
    let description = canonical
        .get(&state.config.map_description_field)
        .map(|attr| value_to_string(&attr.value))
        .unwrap_or_default();

    Ok(MapPointAttributes {
        x: projected.x(),
        y: projected.y(),
        title: submission.camera_folder.clone(),
        image_url,
        description,
    })
}

/// URL of the submission's first photo for the map popup. Prefers a locally
/// staged file; otherwise pulls the folder's first asset out of MediaValet
/// into local storage. A folder with no photos yet gets an empty URL.
async fn first_photo_url(state: &AppState, submission: &Submission) -> Result<String, AppError> {
    let photos = photos_for_submission(&state.pool, submission.id).await?;
    if let Some(photo) = photos.first() {
        return Ok(media_url(state, &photo.file_path));
    }

    let Some(folder_id) = state
        .mediavalet
        .find_folder_id(&submission.camera_folder)
        .await?
    else {
        return Ok(String::new());
    };
    let assets = state.mediavalet.list_assets(&folder_id).await?;
    let Some(asset) = assets.first() else {
        return Ok(String::new());
    };

    let bytes = state.mediavalet.download_asset(&asset.id).await?;
    let folder_dir = state.config.photo_storage_path.join(&submission.camera_folder);
    tokio::fs::create_dir_all(&folder_dir)
        .await
        .map_err(|e| AppError::configuration(format!("cannot create photo storage: {e}")))?;
    tokio::fs::write(folder_dir.join(&asset.file.file_name), &bytes)
        .await
        .map_err(|e| AppError::configuration(format!("cannot store photo: {e}")))?;

    let relative = format!("{}/{}", submission.camera_folder, asset.file.file_name);
    add_photo(&state.pool, submission.id, &relative).await?;
    Ok(media_url(state, &relative))
}

fn media_url(state: &AppState, relative_path: &str) -> String {
    format!("{}/media/{}", state.config.public_base_url, relative_path)
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(create_map_request),
    components(schemas(MapRequest, MapRequestResponse)),
    tags(
        (name = "Maps", description = "Webmap creation and publish requests")
    )
)]
pub struct MapDoc;
