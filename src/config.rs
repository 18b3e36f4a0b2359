use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::core::normalize::{rules_from_attribute_map, FieldRule};

/// ✅ Global Config stored in `OnceLock`
static CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,

    // Local photo intake. Photos only live here between upload and the push
    // to MediaValet, plus re-downloads for map popups.
    pub photo_storage_path: PathBuf,
    // Base URL this service is reachable under, used to compose public
    // image URLs for map popups (e.g. https://tagger.example.org).
    pub public_base_url: String,

    // Camera folder names look like CAMERA2_20220408; the date part is
    // parsed with this chrono format string (e.g. %Y%m%d).
    pub camera_setup_date_format: String,

    // Survey field holding the camera setup timestamp, compared date-only
    // against the date parsed out of the camera folder name.
    pub survey_setup_date_field: String,
    // Survey field used to pick the newest submission when several match.
    pub survey_creation_date_field: String,

    // Which submission fields become metadata attributes, mapped to their
    // display label. Parsed from METADATA_ATTRIBUTES
    // ("project_name=Project Name,SHAPE=x~y,..."), order preserved.
    pub metadata_attributes: Vec<(String, String)>,
    // Keys from the canonical set that MediaValet can store natively; the
    // rest is concatenated into the description attribute.
    pub metadata_attributes_direct: Vec<String>,
    pub metadata_description_attribute: String,

    // When false, tag requests skip the DocuSign sign-off and tag instantly.
    pub require_esign_for_asset_tagging: bool,

    // Canonical attribute whose value becomes the map popup description.
    pub map_description_field: String,

    // Per-request timeout for all outbound HTTP (seconds).
    pub http_timeout_secs: u64,

    // DocuSign
    pub docusign_api_account_id: String,
    pub docusign_user_id: String,
    pub docusign_integration_key: String,
    pub docusign_oauth_host_name: String,
    pub docusign_base_url: String,
    pub docusign_private_key: String,
    pub docusign_asset_tagging_powerform_url: String,
    pub docusign_map_publish_powerform_url: String,

    // ArcGIS (survey source + webmap publishing)
    pub arcgis_portal_url: String,
    pub arcgis_username: String,
    pub arcgis_password: String,
    pub arcgis_survey_feature_url: String,

    // MediaValet
    pub mediavalet_base_category: String,
    pub mediavalet_subscription_key: String,
    pub mediavalet_client_id: String,
    pub mediavalet_client_secret: String,
    pub mediavalet_username: String,
    pub mediavalet_password: String,
}

impl Config {
    /// ✅ Load environment variables and set defaults
    pub fn from_env() -> Self {
        dotenv().ok(); // Load .env only once

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            photo_storage_path: PathBuf::from(
                env::var("PHOTO_STORAGE_PATH").unwrap_or_else(|_| "media/photos".to_string()),
            ),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
            camera_setup_date_format: env::var("CAMERA_SETUP_DATE_FORMAT")
                .unwrap_or_else(|_| "%Y%m%d".to_string()),
            survey_setup_date_field: env::var("SURVEY_SETUP_DATE_FIELD")
                .unwrap_or_else(|_| "date_and_time_of_camera_setup_o".to_string()),
            survey_creation_date_field: env::var("SURVEY_CREATION_DATE_FIELD")
                .unwrap_or_else(|_| "CreationDate".to_string()),
            metadata_attributes: parse_env_dict(
                &env::var("METADATA_ATTRIBUTES").expect("METADATA_ATTRIBUTES must be set"),
            ),
            metadata_attributes_direct: parse_env_list(
                &env::var("METADATA_ATTRIBUTES_DIRECT")
                    .expect("METADATA_ATTRIBUTES_DIRECT must be set"),
            ),
            metadata_description_attribute: env::var("METADATA_DESCRIPTION_ATTRIBUTE")
                .unwrap_or_else(|_| "Description".to_string()),
            require_esign_for_asset_tagging: env::var("REQUIRE_ESIGN_FOR_ASSET_TAGGING")
                .unwrap_or_else(|_| "true".to_string())
                == "true",
            map_description_field: env::var("MAP_DESCRIPTION_FIELD")
                .unwrap_or_else(|_| "project_name".to_string()),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),

            docusign_api_account_id: env::var("DOCUSIGN_API_ACCOUNT_ID")
                .expect("DOCUSIGN_API_ACCOUNT_ID must be set"),
            docusign_user_id: env::var("DOCUSIGN_USER_ID").expect("DOCUSIGN_USER_ID must be set"),
            docusign_integration_key: env::var("DOCUSIGN_INTEGRATION_KEY")
                .expect("DOCUSIGN_INTEGRATION_KEY must be set"),
            docusign_oauth_host_name: env::var("DOCUSIGN_OAUTH_HOST_NAME")
                .unwrap_or_else(|_| "account.docusign.com".to_string()),
            docusign_base_url: env::var("DOCUSIGN_BASE_URL")
                .expect("DOCUSIGN_BASE_URL must be set"),
            docusign_private_key: load_docusign_private_key(),
            docusign_asset_tagging_powerform_url: env::var("DOCUSIGN_ASSET_TAGGING_POWERFORM_URL")
                .expect("DOCUSIGN_ASSET_TAGGING_POWERFORM_URL must be set"),
            docusign_map_publish_powerform_url: env::var("DOCUSIGN_MAP_PUBLISH_POWERFORM_URL")
                .expect("DOCUSIGN_MAP_PUBLISH_POWERFORM_URL must be set"),

            arcgis_portal_url: env::var("ARCGIS_PORTAL_URL")
                .unwrap_or_else(|_| "https://www.arcgis.com".to_string()),
            arcgis_username: env::var("ARCGIS_USERNAME").expect("ARCGIS_USERNAME must be set"),
            arcgis_password: env::var("ARCGIS_PASSWORD").expect("ARCGIS_PASSWORD must be set"),
            arcgis_survey_feature_url: env::var("ARCGIS_SURVEY_FEATURE_URL")
                .expect("ARCGIS_SURVEY_FEATURE_URL must be set"),

            mediavalet_base_category: env::var("MEDIAVALET_BASE_CATEGORY")
                .expect("MEDIAVALET_BASE_CATEGORY must be set"),
            mediavalet_subscription_key: env::var("MEDIAVALET_SUBSCRIPTION_KEY")
                .expect("MEDIAVALET_SUBSCRIPTION_KEY must be set"),
            mediavalet_client_id: env::var("MEDIAVALET_CLIENT_ID")
                .expect("MEDIAVALET_CLIENT_ID must be set"),
            mediavalet_client_secret: env::var("MEDIAVALET_CLIENT_SECRET")
                .expect("MEDIAVALET_CLIENT_SECRET must be set"),
            mediavalet_username: env::var("MEDIAVALET_USERNAME")
                .expect("MEDIAVALET_USERNAME must be set"),
            mediavalet_password: env::var("MEDIAVALET_PASSWORD")
                .expect("MEDIAVALET_PASSWORD must be set"),
        }
    }

    /// ✅ Initialize the global config
    pub fn init() {
        CONFIG
            .set(Arc::new(Self::from_env()))
            .expect("Config already initialized");
    }

    /// ✅ Safe access to Config
    pub fn get() -> Arc<Config> {
        CONFIG.get().expect("Config not initialized").clone()
    }

    /// Field rules compiled from METADATA_ATTRIBUTES, in config order.
    pub fn metadata_rules(&self) -> Vec<FieldRule> {
        rules_from_attribute_map(&self.metadata_attributes)
    }
}

/// Parse a django-environ style dict: "key=value,key2=value2".
/// Order is preserved because the description field is built in rule order.
fn parse_env_dict(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Parse a comma-separated list: "x,y".
fn parse_env_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// The DocuSign JWT grant needs the integration key's RSA private key. Either
/// inline PEM (DOCUSIGN_PRIVATE_KEY) or a path to it (DOCUSIGN_PRIVATE_KEY_PATH).
fn load_docusign_private_key() -> String {
    if let Ok(pem) = env::var("DOCUSIGN_PRIVATE_KEY") {
        return pem;
    }
    let path = env::var("DOCUSIGN_PRIVATE_KEY_PATH").unwrap_or_else(|_| "private.key".to_string());
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read DocuSign private key from {path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_dict_preserves_order_and_trims() {
        let parsed = parse_env_dict("project_name=Project Name, SHAPE=x~y ,your_name=Monitor");
        assert_eq!(
            parsed,
            vec![
                ("project_name".to_string(), "Project Name".to_string()),
                ("SHAPE".to_string(), "x~y".to_string()),
                ("your_name".to_string(), "Monitor".to_string()),
            ]
        );
    }

    #[test]
    fn env_list_skips_empty_entries() {
        assert_eq!(
            parse_env_list("x, y,"),
            vec!["x".to_string(), "y".to_string()]
        );
    }
}
