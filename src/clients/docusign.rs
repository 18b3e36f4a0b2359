use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::clients::token_cache::TokenSlot;
use crate::clients::{get_with_retry, RetryConfig};
use crate::config::Config;
use crate::core::approval::{Envelope, EnvelopeSource};
use crate::error::AppError;

const SERVICE: &str = "docusign";
// DocuSign access tokens live 3600s no matter what expires_in asks for;
// refresh at 3540s so cached tokens never go stale mid-call.
const TOKEN_TTL: Duration = Duration::from_secs(3540);
const GRANT_LIFETIME_SECS: i64 = 3600;

/// DocuSign client. Auth is the JWT service-account grant (an RS256
/// assertion signed with the integration key's private key, exchanged for a
/// bearer token); envelope search and PowerForm form-data reads ride on it.
pub struct DocusignClient {
    http: Client,
    token: TokenSlot,
    config: Arc<Config>,
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    scope: &'a str,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeListing {
    #[serde(default)]
    envelopes: Vec<EnvelopeSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSummary {
    envelope_id: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerFormData {
    #[serde(default)]
    envelopes: Vec<PowerFormEnvelope>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerFormEnvelope {
    envelope_id: String,
    #[serde(default)]
    recipients: Vec<PowerFormRecipient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerFormRecipient {
    #[serde(default)]
    form_data: Vec<FormDataEntry>,
}

#[derive(Deserialize)]
struct FormDataEntry {
    name: String,
    value: String,
}

impl DocusignClient {
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
                let now = Utc::now().timestamp();
                let claims = GrantClaims {
                    iss: &config.docusign_integration_key,
                    sub: &config.docusign_user_id,
                    aud: &config.docusign_oauth_host_name,
                    iat: now,
                    exp: now + GRANT_LIFETIME_SECS,
                    scope: "signature impersonation",
                };
                let key = EncodingKey::from_rsa_pem(config.docusign_private_key.as_bytes())
                    .map_err(|e| {
                        AppError::configuration(format!("DocuSign private key is not valid PEM: {e}"))
                    })?;
                let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
                    .map_err(|e| AppError::external(SERVICE, e))?;

                let response: AccessToken = http
                    .post(format!(
                        "https://{}/oauth/token",
                        config.docusign_oauth_host_name
                    ))
                    .form(&[
                        (
                            "grant_type",
                            "urn:ietf:params:oauth:grant-type:jwt-bearer",
                        ),
                        ("assertion", assertion.as_str()),
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

    /// PowerForm ids aren't configured directly; they're parsed out of the
    /// configured PowerForm signing URL (?PowerFormId=...).
    pub fn powerform_id_from_url(powerform_url: &str) -> Result<String, AppError> {
        let url = Url::parse(powerform_url).map_err(|e| {
            AppError::configuration(format!("invalid PowerForm URL '{powerform_url}': {e}"))
        })?;
        url.query_pairs()
            .find(|(key, _)| key == "PowerFormId")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "PowerForm URL '{powerform_url}' has no PowerFormId parameter"
                ))
            })
    }
}

impl EnvelopeSource for DocusignClient {
    /// List envelopes whose custom field matches the correlation token.
    /// Exactly one envelope must match: zero means nobody opened the signing
    /// link yet, several means the token leaked into more than one envelope
    /// and guessing would tag assets off the wrong form.
    async fn find_envelope_by_custom_field(
        &self,
        field: &str,
        value: &str,
        since: NaiveDateTime,
    ) -> Result<Envelope, AppError> {
        let token = self.token().await?;
        let url = format!(
            "{}/restapi/v2.1/accounts/{}/envelopes",
            self.config.docusign_base_url, self.config.docusign_api_account_id
        );
        let custom_field = format!("{field}={value}");
        let from_date = since.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let listing: EnvelopeListing =
            get_with_retry("envelope search", &RetryConfig::default(), || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .query(&[
                        ("custom_field", custom_field.as_str()),
                        ("from_date", from_date.as_str()),
                    ])
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

        let mut envelopes = listing.envelopes;
        if envelopes.len() > 1 {
            return Err(AppError::external(
                SERVICE,
                format!(
                    "expected one envelope for {field}={value}, got {}",
                    envelopes.len()
                ),
            ));
        }
        match envelopes.pop() {
            Some(summary) => Ok(Envelope {
                envelope_id: summary.envelope_id,
                status: summary.status,
            }),
            None => Err(AppError::not_found(format!(
                "no envelope found for {field}={value}"
            ))),
        }
    }

    /// The completed envelope's form data, as the signer may have edited it.
    /// PowerForm data is only queryable per PowerForm, so fetch that form's
    /// submissions and pick the envelope out of them.
    async fn form_data(
        &self,
        powerform_id: &str,
        envelope_id: &str,
    ) -> Result<HashMap<String, String>, AppError> {
        let token = self.token().await?;
        let url = format!(
            "{}/restapi/v2.1/accounts/{}/powerforms/{}/form_data",
            self.config.docusign_base_url, self.config.docusign_api_account_id, powerform_id
        );

        let data: PowerFormData =
            get_with_retry("powerform form data", &RetryConfig::default(), || async {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
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

        let submission = data
            .envelopes
            .into_iter()
            .find(|envelope| envelope.envelope_id == envelope_id)
            .ok_or_else(|| {
                AppError::external(
                    SERVICE,
                    format!("PowerForm data has no envelope {envelope_id}"),
                )
            })?;

        // recipients come back in signing order; the first one filled the form
        let recipient = submission.recipients.into_iter().next().ok_or_else(|| {
            AppError::external(SERVICE, format!("envelope {envelope_id} has no recipients"))
        })?;

        Ok(recipient
            .form_data
            .into_iter()
            .map(|entry| (entry.name, entry.value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json};

    #[test]
    fn powerform_id_parses_out_of_signing_url() {
        let id = DocusignClient::powerform_id_from_url(
            "https://demo.docusign.net/Member/PowerFormSigning.aspx?PowerFormId=8a2b-cc&env=demo",
        )
        .unwrap();
        assert_eq!(id, "8a2b-cc");
    }

    #[test]
    fn powerform_url_without_id_is_a_configuration_error() {
        let err = DocusignClient::powerform_id_from_url(
            "https://demo.docusign.net/Member/PowerFormSigning.aspx",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn envelope_listing_deserializes_api_shape() {
        let listing: EnvelopeListing = from_value(json!({
            "resultSetSize": "1",
            "envelopes": [
                { "envelopeId": "env-1", "status": "completed", "emailSubject": "Tagging" }
            ]
        }))
        .unwrap();
        assert_eq!(listing.envelopes.len(), 1);
        assert_eq!(listing.envelopes[0].envelope_id, "env-1");
        assert_eq!(listing.envelopes[0].status, "completed");
    }

    #[test]
    fn form_data_flattens_first_recipient() {
        let data: PowerFormData = from_value(json!({
            "envelopes": [
                {
                    "envelopeId": "env-1",
                    "recipients": [
                        { "formData": [
                            { "name": "X", "value": "7.14" },
                            { "name": "Description", "value": "Project Name: zone 1" }
                        ]}
                    ]
                }
            ]
        }))
        .unwrap();
        let recipient = &data.envelopes[0].recipients[0];
        assert_eq!(recipient.form_data.len(), 2);
        assert_eq!(recipient.form_data[0].name, "X");
    }
}
