use std::sync::Arc;

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::clients::{get_with_retry, RetryConfig};
use crate::config::Config;
use crate::error::AppError;

const SERVICE: &str = "arcgis";

/// ArcGIS portal client: the survey submission source and the webmap
/// publishing target share one set of credentials.
///
/// Portal tokens are requested per operation (the portal tolerates this and
/// the two flows are rare compared to MediaValet/DocuSign traffic); only the
/// latter two services carry cached token slots.
pub struct ArcGisClient {
    http: Client,
    config: Arc<Config>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    attributes: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemResponse {
    id: String,
    #[serde(default)]
    success: bool,
}

/// A freshly created (still private) webmap item.
#[derive(Debug, Clone)]
pub struct CreatedWebmap {
    pub id: String,
    pub homepage_url: String,
}

impl ArcGisClient {
    pub fn new(config: Arc<Config>, http: Client) -> Self {
        Self { http, config }
    }

    /// Portal tokens come from the legacy generateToken endpoint; the
    /// referer here must match the one sent with token-authenticated calls.
    async fn generate_token(&self) -> Result<String, AppError> {
        let url = format!("{}/sharing/rest/generateToken", self.config.arcgis_portal_url);
        let body = self
            .http
            .post(&url)
            .form(&[
                ("username", self.config.arcgis_username.as_str()),
                ("password", self.config.arcgis_password.as_str()),
                ("referer", self.config.arcgis_portal_url.as_str()),
                ("expiration", "60"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .json::<Value>()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        let body = arcgis_result(body)?;
        let parsed: TokenResponse =
            serde_json::from_value(body).map_err(|e| AppError::external(SERVICE, e))?;
        Ok(parsed.token)
    }

    /// All submissions of the configured survey, one attribute map per
    /// feature. The caller does the camera-folder matching.
    pub async fn list_submissions(&self) -> Result<Vec<Map<String, Value>>, AppError> {
        let token = self.generate_token().await?;
        let url = format!("{}/query", self.config.arcgis_survey_feature_url);

        let response = get_with_retry("survey query", &RetryConfig::default(), || async {
            let body = self
                .http
                .get(&url)
                .query(&[
                    ("where", "1=1"),
                    ("outFields", "*"),
                    ("f", "json"),
                    ("token", token.as_str()),
                ])
                .send()
                .await
                .map_err(|e| AppError::external(SERVICE, e))?
                .json::<Value>()
                .await
                .map_err(|e| AppError::external(SERVICE, e))?;
            arcgis_result(body)
        })
        .await?;

        let parsed: QueryResponse =
            serde_json::from_value(response).map_err(|e| AppError::external(SERVICE, e))?;
        Ok(parsed.features.into_iter().map(|f| f.attributes).collect())
    }

    /// Create a webmap item from a rendered map document. The item stays
    /// private until the publish approval goes through.
    pub async fn create_webmap(
        &self,
        map_json: &Value,
        title: &str,
        tags: &[String],
        snippet: &str,
    ) -> Result<CreatedWebmap, AppError> {
        let token = self.generate_token().await?;
        let url = format!(
            "{}/sharing/rest/content/users/{}/addItem",
            self.config.arcgis_portal_url, self.config.arcgis_username
        );

        let body = self
            .http
            .post(&url)
            .form(&[
                ("f", "json"),
                ("token", token.as_str()),
                ("type", "Web Map"),
                ("title", title),
                ("tags", &tags.join(",")),
                ("snippet", snippet),
                ("text", &map_json.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .json::<Value>()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        let body = arcgis_result(body)?;
        let parsed: AddItemResponse =
            serde_json::from_value(body).map_err(|e| AppError::external(SERVICE, e))?;
        if !parsed.success {
            return Err(AppError::external(SERVICE, "addItem reported failure"));
        }

        let homepage_url = format!(
            "{}/home/item.html?id={}",
            self.config.arcgis_portal_url, parsed.id
        );
        Ok(CreatedWebmap {
            id: parsed.id,
            homepage_url,
        })
    }

    /// Share a webmap with everyone. This is the map-publish side effect;
    /// it only runs once, after the sign-off lands.
    pub async fn share_webmap_public(&self, webmap_id: &str) -> Result<(), AppError> {
        let token = self.generate_token().await?;
        let url = format!(
            "{}/sharing/rest/content/users/{}/items/{}/share",
            self.config.arcgis_portal_url, self.config.arcgis_username, webmap_id
        );

        let body = self
            .http
            .post(&url)
            .form(&[("f", "json"), ("token", token.as_str()), ("everyone", "true")])
            .send()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?
            .json::<Value>()
            .await
            .map_err(|e| AppError::external(SERVICE, e))?;

        arcgis_result(body)?;
        Ok(())
    }

    /// The shared item doesn't expose its public viewer URL directly, but it
    /// is deterministic: /apps/mapviewer/index.html?webmap=<id>.
    pub fn public_map_url(&self, webmap_id: &str) -> String {
        format!(
            "{}/apps/mapviewer/index.html?webmap={}",
            self.config.arcgis_portal_url, webmap_id
        )
    }

    /// Recover the item id from a stored homepage URL (?id=<webmap_id>).
    pub fn webmap_id_from_url(webmap_url: &str) -> Result<String, AppError> {
        let url = Url::parse(webmap_url)
            .map_err(|e| AppError::validation(format!("invalid webmap URL '{webmap_url}': {e}")))?;
        url.query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                AppError::validation(format!("webmap URL '{webmap_url}' has no id parameter"))
            })
    }
}

/// The portal answers HTTP 200 even for failures and reports them in an
/// `error` object instead.
fn arcgis_result(body: Value) -> Result<Value, AppError> {
    if let Some(error) = body.get("error") {
        return Err(AppError::external(SERVICE, error.to_string()));
    }
    Ok(body)
}
