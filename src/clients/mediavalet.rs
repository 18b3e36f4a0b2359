use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::clients::token_cache::TokenSlot;
use crate::clients::{get_with_retry, RetryConfig};
use crate::config::Config;
use crate::error::AppError;

const SERVICE: &str = "mediavalet";
const API_BASE: &str = "https://api.mediavalet.com";
const LOGIN_URL: &str = "https://login.mediavalet.com/connect/token";
// MediaValet tokens expire after ~300s; refresh at 240s so a token taken
// from the cache is never about to go stale mid-call.
const TOKEN_TTL: Duration = Duration::from_secs(240);

/// MediaValet (the digital asset manager). Folders are "categories" keyed by
/// UUID; the human-readable camera folder name lives in their `name` /
/// `treeName` attribute and can't be searched server-side.
pub struct MediaValetClient {
    http: Client,
    token: TokenSlot,
    config: Arc<Config>,
}

// Every response wraps its content in a `payload` envelope.
#[derive(Deserialize)]
struct Payload<T> {
    payload: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subfolder {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub title: String,
    pub file: AssetFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    pub file_name: String,
}

#[derive(Deserialize)]
struct AssetList {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeInfo {
    id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTicket {
    id: String,
    upload_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadValidation {
    download_link: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadTicket {
    sas_url: String,
}

impl MediaValetClient {
    pub fn new(config: Arc<Config>, http: Client) -> Self {
        Self {
            http,
            token: TokenSlot::new(SERVICE, TOKEN_TTL),
            config,
        }
    }

    async fn token(&self) -> Result<String, AppError> {
        let http = self.http.clone();
        let config = self.config.clone();
        self.token
            .get_or_refresh(async move {
                let response: AccessToken = http
                    .post(LOGIN_URL)
                    .basic_auth(
                        &config.mediavalet_client_id,
                        Some(&config.mediavalet_client_secret),
                    )
                    .form(&[
                        ("grant_type", "password"),
                        ("username", config.mediavalet_username.as_str()),
                        ("password", config.mediavalet_password.as_str()),
                        ("scope", "api"),
                    ])
                    .send()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .error_for_status()
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .json()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))?;
                Ok(response.access_token)
            })
            .await
    }

    /// Bearer token plus the API-management subscription key every call needs.
    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, AppError> {
        let token = self.token().await?;
        Ok(builder
            .bearer_auth(token)
            .header("Ocp-Apim-Subscription-Key", &self.config.mediavalet_subscription_key))
    }

    /// Find the category whose name matches the camera folder. There is no
    /// server-side name search, so this lists the subfolders of the base
    /// category and scans them.
    pub async fn find_folder_id(&self, camera_folder: &str) -> Result<Option<String>, AppError> {
        let url = format!(
            "{API_BASE}/folders/{}/subfolders",
            self.config.mediavalet_base_category
        );
        let subfolders: Payload<Vec<Subfolder>> =
            get_with_retry("list subfolders", &RetryConfig::default(), || async {
                self.authed(self.http.get(&url))
                    .await?
                    .send()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .error_for_status()
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .json()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))
            })
            .await?;

        Ok(subfolders
            .payload
            .into_iter()
            .find(|folder| folder.name == camera_folder)
            .map(|folder| folder.id))
    }

    /// Reuse the existing folder for this camera folder name, or create one
    /// under the base category. New category ids are minted client-side.
    pub async fn create_folder(&self, camera_folder: &str) -> Result<String, AppError> {
        if let Some(existing) = self.find_folder_id(camera_folder).await? {
            return Ok(existing);
        }

        let new_folder_id = Uuid::new_v4().to_string();
        let response = self
            .authed(self.http.post(format!("{API_BASE}/categories")))
            .await?
            .json(&json!({
                "parentId": self.config.mediavalet_base_category,
                "description": camera_folder,
                "treeName": camera_folder,
                "categoryId": new_folder_id,
            }))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        if response.status() != reqwest::StatusCode::CREATED {
            return Err(AppError::external(
                SERVICE,
                format!("creating category returned {}", response.status()),
            ));
        }
        Ok(new_folder_id)
    }

    /// All assets inside a category/folder.
    pub async fn list_assets(&self, folder_id: &str) -> Result<Vec<Asset>, AppError> {
        let url = format!("{API_BASE}/categories/{folder_id}/assets");
        let assets: Payload<AssetList> =
            get_with_retry("list assets", &RetryConfig::default(), || async {
                self.authed(self.http.get(&url))
                    .await?
                    .send()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .error_for_status()
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .json()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))
            })
            .await?;
        Ok(assets.payload.assets)
    }

    /// Attributes must be patched by id, so resolve names first. A name the
    /// account doesn't support is a configuration error, not an upstream one.
    pub async fn attribute_ids_for_names(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, String>, AppError> {
        let url = format!("{API_BASE}/attributes");
        let attributes: Payload<Vec<AttributeInfo>> =
            get_with_retry("list attributes", &RetryConfig::default(), || async {
                self.authed(self.http.get(&url))
                    .await?
                    .send()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .error_for_status()
                    .map_err(|e| AppError::external(SERVICE, e))?
                    .json()
                    .await
                    .map_err(|e| AppError::external(SERVICE, e))
            })
            .await?;

        let by_name: HashMap<String, String> = attributes
            .payload
            .into_iter()
            .map(|attr| (attr.name, attr.id))
            .collect();

        let mut resolved = HashMap::with_capacity(names.len());
        for name in names {
            let id = by_name.get(*name).ok_or_else(|| {
                AppError::configuration(format!("MediaValet has no attribute named '{name}'"))
            })?;
            resolved.insert((*name).to_string(), id.clone());
        }
        Ok(resolved)
    }

    /// JSON-patch one attribute on one asset. `patch_path` is either
    /// `/attributes/{id}` or the description's special-cased path.
    async fn patch_asset(&self, asset_id: &str, patch_path: &str, value: &str) -> Result<(), AppError> {
        self.authed(self.http.patch(format!("{API_BASE}/assets/{asset_id}")))
            .await?
            .json(&json!([{ "op": "replace", "path": patch_path, "value": value }]))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?;
        Ok(())
    }

    /// Tag every asset with every attribute pair. The description attribute
    /// can't be set through `/attributes/{id}` like the rest; it has its own
    /// patch path.
    pub async fn tag_attributes(
        &self,
        pairs: &[(String, String)],
        asset_ids: &[String],
        description_attribute: &str,
    ) -> Result<(), AppError> {
        let id_lookup_names: Vec<&str> = pairs
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| *name != description_attribute)
            .collect();
        let attribute_ids = self.attribute_ids_for_names(&id_lookup_names).await?;

        for asset_id in asset_ids {
            for (name, value) in pairs {
                let patch_path = if name == description_attribute {
                    format!("/{}", description_attribute.to_lowercase())
                } else {
                    format!("/attributes/{}", attribute_ids[name])
                };
                self.patch_asset(asset_id, &patch_path, value).await?;
            }
            tracing::info!(%asset_id, "tagged asset attributes");
        }
        Ok(())
    }

    /// Uploading is a multi-step dance: register the upload, PUT the bytes
    /// to the returned SAS URL, set the title, attach to the folder, then
    /// flip the upload status so the asset appears in the library.
    pub async fn upload_file(
        &self,
        file_bytes: Bytes,
        filename: &str,
        folder_id: &str,
    ) -> Result<String, AppError> {
        // filename could contain dots before the extension
        let file_title = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename);

        let ticket: Payload<UploadTicket> = self
            .authed(self.http.post(format!("{API_BASE}/uploads")))
            .await?
            .json(&json!({ "filename": filename }))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?
            .json()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;
        let new_asset_id = ticket.payload.id;

        // raw bytes go straight to blob storage, not through the API host
        self.http
            .put(&ticket.payload.upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .body(file_bytes)
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?;

        self.authed(self.http.put(format!("{API_BASE}/uploads/{new_asset_id}")))
            .await?
            .json(&json!({ "filename": filename, "title": file_title }))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?;

        self.authed(
            self.http
                .post(format!("{API_BASE}/uploads/{new_asset_id}/categories")),
        )
        .await?
        .json(&json!([folder_id]))
        .send()
        .await
        .map_err(|e| AppError::external(SERVICE, e))?
        .error_for_status()
        .map_err(|e| AppError::external(SERVICE, e))?;

        self.authed(self.http.patch(format!("{API_BASE}/uploads/{new_asset_id}")))
            .await?
            .json(&json!([{ "op": "replace", "path": "/status", "value": 1 }]))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?;

        tracing::info!(asset_id = %new_asset_id, filename, "uploaded file to MediaValet");
        Ok(new_asset_id)
    }

    /// Download one asset's bytes via a temporary SAS link.
    pub async fn download_asset(&self, asset_id: &str) -> Result<Bytes, AppError> {
        let validation: Payload<DownloadValidation> = self
            .authed(self.http.post(format!("{API_BASE}/downloads/validate")))
            .await?
            .json(&json!({ "isDirectDownload": "true" }))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?
            .json()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        let ticket: Payload<DownloadTicket> = self
            .authed(
                self.http
                    .post(format!("{API_BASE}/{}", validation.payload.download_link)),
            )
            .await?
            .json(&json!({ "attributeIdValues": {}, "assetId": asset_id }))
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?
            .json()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        self.http
            .get(&ticket.payload.sas_url)
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .error_for_status()
            .map_err(|e| AppError::external(SERVICE, e))?
            .bytes()
            .await
            .map_err(|e| AppError::external(SERVICE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::from_value;

    #[test]
    fn asset_payload_deserializes_from_api_shape() {
        let parsed: Payload<AssetList> = from_value(json!({
            "payload": {
                "assets": [
                    {
                        "id": "a-1",
                        "title": "IMG_0209",
                        "file": { "fileName": "IMG_0209.JPG", "sizeInBytes": 12345 }
                    }
                ]
            }
        }))
        .unwrap();
        assert_eq!(parsed.payload.assets[0].id, "a-1");
        assert_eq!(parsed.payload.assets[0].file.file_name, "IMG_0209.JPG");
    }

    #[test]
    fn subfolder_payload_keeps_name_for_matching() {
        let parsed: Payload<Vec<Subfolder>> = from_value(json!({
            "payload": [
                { "id": "f-1", "name": "CAMERA2_20220408", "treeName": "CAMERA2_20220408" }
            ]
        }))
        .unwrap();
        assert_eq!(parsed.payload[0].name, "CAMERA2_20220408");
        assert_eq!(parsed.payload[0].id, "f-1");
    }
}
