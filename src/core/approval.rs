use std::collections::HashMap;

use chrono::NaiveDateTime;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// Name of the envelope custom field carrying our correlation token. The
/// token is minted locally, embedded in the outbound PowerForm URL, and
/// matched against envelopes coming back from DocuSign.
pub const CORRELATION_FIELD: &str = "powerform_submission_id";

/// Request lifecycle. Strictly one-way: pending → approved | rejected,
/// nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Fixed lookup from DocuSign's envelope status vocabulary onto our 3-state
/// model. Everything that isn't completed/declined ("sent", "delivered", ...)
/// counts as still in flight.
pub fn status_for_envelope(envelope_status: &str) -> ApprovalStatus {
    match envelope_status {
        "completed" => ApprovalStatus::Approved,
        "declined" => ApprovalStatus::Rejected,
        _ => ApprovalStatus::Pending,
    }
}

/// The slice of an envelope this workflow cares about.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub envelope_id: String,
    pub status: String,
}

/// Where envelopes come from (DocuSign in production, fakes in tests).
pub trait EnvelopeSource {
    /// Exactly-one semantics: zero envelopes for the token is a NotFound
    /// error, more than one is an ExternalService error. `since` bounds the
    /// server-side search window (the request's creation time).
    fn find_envelope_by_custom_field(
        &self,
        field: &str,
        value: &str,
        since: NaiveDateTime,
    ) -> impl std::future::Future<Output = Result<Envelope, AppError>> + Send;

    /// The (possibly user-edited) form data of a completed envelope,
    /// looked up through the PowerForm it was signed on.
    fn form_data(
        &self,
        powerform_id: &str,
        envelope_id: &str,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, AppError>> + Send;
}

/// Persistence seam for one tracked request, bound to its correlation token.
pub trait ApprovalStore {
    /// Atomically move the request out of `pending`. Returns true iff THIS
    /// call performed the transition; false means the request was already
    /// terminal. The at-most-once side-effect guarantee hangs off this.
    fn try_transition(
        &self,
        next: ApprovalStatus,
    ) -> impl std::future::Future<Output = Result<bool, AppError>> + Send;

    /// Persist the edited payload extracted from the completed envelope.
    /// Only ever called by the poll that won the transition to approved.
    fn record_form_data(
        &self,
        form_data: &HashMap<String, String>,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// The downstream side effect bound to a request kind: tagging assets for
/// tag requests, publishing the webmap for map requests.
pub trait ApprovalAction {
    fn run(
        &self,
        form_data: &HashMap<String, String>,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send;
}

/// What one poll observed and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Envelope exists but nobody signed yet; nothing was written.
    Waiting { envelope_status: String },
    /// The signer declined; the request is now terminally rejected.
    Rejected,
    /// The envelope completed. `action_ran` is true only for the single
    /// poll that performed the pending → approved transition.
    Approved { action_ran: bool },
}

/// One poll of the external signature service for a tracked request.
///
/// Ordering is deliberate: the envelope lookup and the form-data fetch both
/// happen before any state is written, so an external failure leaves the
/// request untouched (`pending`). The compare-and-set decides which poll
/// runs the side effect; a repeat poll that finds the request already
/// terminal reports the status without re-firing anything.
pub async fn check_approval<Src, St, Act>(
    source: &Src,
    store: &St,
    action: &Act,
    token: Uuid,
    powerform_id: &str,
    requested_at: NaiveDateTime,
) -> Result<CheckOutcome, AppError>
where
    Src: EnvelopeSource + Sync,
    St: ApprovalStore + Sync,
    Act: ApprovalAction + Sync,
{
    let envelope = source
        .find_envelope_by_custom_field(CORRELATION_FIELD, &token.to_string(), requested_at)
        .await?;

    match status_for_envelope(&envelope.status) {
        ApprovalStatus::Pending => {
            // still waiting on the signer; the row already says pending, a
            // redundant write would buy nothing
            Ok(CheckOutcome::Waiting {
                envelope_status: envelope.status,
            })
        }
        ApprovalStatus::Rejected => {
            store.try_transition(ApprovalStatus::Rejected).await?;
            Ok(CheckOutcome::Rejected)
        }
        ApprovalStatus::Approved => {
            let form_data = source.form_data(powerform_id, &envelope.envelope_id).await?;
            let transitioned = store.try_transition(ApprovalStatus::Approved).await?;
            if !transitioned {
                // a previous poll already processed this approval
                return Ok(CheckOutcome::Approved { action_ran: false });
            }
            store.record_form_data(&form_data).await?;
            action.run(&form_data).await?;
            Ok(CheckOutcome::Approved { action_ran: true })
        }
    }
}

/// Compose the outbound PowerForm URL for a new approval request: the base
/// PowerForm link plus the correlation token as an envelope custom field and
/// all the attribute values the signer should see (and may edit).
pub fn compose_powerform_url(
    base_url: &str,
    token: Uuid,
    extra_pairs: &[(String, String)],
) -> Result<String, AppError> {
    let mut url = Url::parse(base_url).map_err(|e| {
        AppError::configuration(format!("invalid PowerForm base URL '{base_url}': {e}"))
    })?;
    url.query_pairs_mut().append_pair(
        &format!("EnvelopeField_{CORRELATION_FIELD}"),
        &token.to_string(),
    );
    for (key, value) in extra_pairs {
        url.query_pairs_mut().append_pair(key, value);
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        envelope_status: Mutex<String>,
        form_data_fetches: AtomicUsize,
    }

    impl FakeSource {
        fn with_status(status: &str) -> Self {
            Self {
                envelope_status: Mutex::new(status.to_string()),
                form_data_fetches: AtomicUsize::new(0),
            }
        }

        fn set_status(&self, status: &str) {
            *self.envelope_status.lock().unwrap() = status.to_string();
        }
    }

    impl EnvelopeSource for FakeSource {
        async fn find_envelope_by_custom_field(
            &self,
            _field: &str,
            _value: &str,
            _since: NaiveDateTime,
        ) -> Result<Envelope, AppError> {
            Ok(Envelope {
                envelope_id: "env-1".to_string(),
                status: self.envelope_status.lock().unwrap().clone(),
            })
        }

        async fn form_data(
            &self,
            _powerform_id: &str,
            _envelope_id: &str,
        ) -> Result<HashMap<String, String>, AppError> {
            self.form_data_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::from([("X".to_string(), "7.14".to_string())]))
        }
    }

    struct FakeStore {
        status: Mutex<ApprovalStatus>,
        transitions: AtomicUsize,
        recorded: Mutex<Option<HashMap<String, String>>>,
    }

    impl Default for FakeStore {
        fn default() -> Self {
            Self {
                status: Mutex::new(ApprovalStatus::Pending),
                transitions: AtomicUsize::new(0),
                recorded: Mutex::new(None),
            }
        }
    }

    impl ApprovalStore for FakeStore {
        async fn try_transition(&self, next: ApprovalStatus) -> Result<bool, AppError> {
            let mut status = self.status.lock().unwrap();
            if status.is_terminal() {
                return Ok(false);
            }
            *status = next;
            self.transitions.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn record_form_data(
            &self,
            form_data: &HashMap<String, String>,
        ) -> Result<(), AppError> {
            *self.recorded.lock().unwrap() = Some(form_data.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAction {
        runs: AtomicUsize,
        last_form_data: Mutex<Option<HashMap<String, String>>>,
    }

    impl ApprovalAction for FakeAction {
        async fn run(&self, form_data: &HashMap<String, String>) -> Result<(), AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            *self.last_form_data.lock().unwrap() = Some(form_data.clone());
            Ok(())
        }
    }

    fn requested_at() -> NaiveDateTime {
        chrono::DateTime::from_timestamp(1_649_419_200, 0)
            .unwrap()
            .naive_utc()
    }

    #[tokio::test]
    async fn waiting_envelope_writes_nothing() {
        let source = FakeSource::with_status("sent");
        let store = FakeStore::default();
        let action = FakeAction::default();

        for _ in 0..2 {
            let outcome =
                check_approval(&source, &store, &action, Uuid::new_v4(), "pf-1", requested_at())
                    .await
                    .unwrap();
            assert_eq!(
                outcome,
                CheckOutcome::Waiting {
                    envelope_status: "sent".to_string()
                }
            );
        }
        assert_eq!(store.transitions.load(Ordering::SeqCst), 0);
        assert_eq!(action.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_envelope_runs_action_exactly_once() {
        let source = FakeSource::with_status("completed");
        let store = FakeStore::default();
        let action = FakeAction::default();
        let token = Uuid::new_v4();

        let first = check_approval(&source, &store, &action, token, "pf-1", requested_at())
            .await
            .unwrap();
        assert_eq!(first, CheckOutcome::Approved { action_ran: true });

        // a second poll sees the terminal row and must not re-fire
        let second = check_approval(&source, &store, &action, token, "pf-1", requested_at())
            .await
            .unwrap();
        assert_eq!(second, CheckOutcome::Approved { action_ran: false });

        assert_eq!(action.runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.transitions.load(Ordering::SeqCst), 1);
        assert_eq!(*store.status.lock().unwrap(), ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn action_receives_the_envelope_form_data() {
        let source = FakeSource::with_status("completed");
        let store = FakeStore::default();
        let action = FakeAction::default();

        check_approval(&source, &store, &action, Uuid::new_v4(), "pf-1", requested_at())
            .await
            .unwrap();

        let seen = action.last_form_data.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get("X").unwrap(), "7.14");
        // and the edited payload landed in the store too
        let recorded = store.recorded.lock().unwrap().clone().unwrap();
        assert_eq!(recorded.get("X").unwrap(), "7.14");
    }

    #[tokio::test]
    async fn declined_envelope_is_terminal() {
        let source = FakeSource::with_status("declined");
        let store = FakeStore::default();
        let action = FakeAction::default();
        let token = Uuid::new_v4();

        let outcome = check_approval(&source, &store, &action, token, "pf-1", requested_at())
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Rejected);
        assert_eq!(*store.status.lock().unwrap(), ApprovalStatus::Rejected);

        // even if the envelope later reads completed, the rejected row wins
        source.set_status("completed");
        let outcome = check_approval(&source, &store, &action, token, "pf-1", requested_at())
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Approved { action_ran: false });
        assert_eq!(action.runs.load(Ordering::SeqCst), 0);
        assert_eq!(*store.status.lock().unwrap(), ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn source_failure_leaves_state_untouched() {
        struct FailingSource;
        impl EnvelopeSource for FailingSource {
            async fn find_envelope_by_custom_field(
                &self,
                _field: &str,
                _value: &str,
                _since: NaiveDateTime,
            ) -> Result<Envelope, AppError> {
                Err(AppError::external("docusign", "listing envelopes timed out"))
            }
            async fn form_data(
                &self,
                _powerform_id: &str,
                _envelope_id: &str,
            ) -> Result<HashMap<String, String>, AppError> {
                unreachable!()
            }
        }

        let store = FakeStore::default();
        let action = FakeAction::default();
        let result = check_approval(
            &FailingSource,
            &store,
            &action,
            Uuid::new_v4(),
            "pf-1",
            requested_at(),
        )
        .await;
        assert!(matches!(result, Err(AppError::ExternalService { .. })));
        assert_eq!(store.transitions.load(Ordering::SeqCst), 0);
        assert_eq!(*store.status.lock().unwrap(), ApprovalStatus::Pending);
    }

    #[test]
    fn envelope_status_vocabulary_maps_onto_three_states() {
        assert_eq!(status_for_envelope("completed"), ApprovalStatus::Approved);
        assert_eq!(status_for_envelope("declined"), ApprovalStatus::Rejected);
        for waiting in ["sent", "delivered", "created", "voided"] {
            assert_eq!(status_for_envelope(waiting), ApprovalStatus::Pending);
        }
    }

    #[test]
    fn powerform_url_embeds_token_and_attributes() {
        let token = Uuid::new_v4();
        let url = compose_powerform_url(
            "https://demo.docusign.net/Member/PowerFormSigning.aspx?PowerFormId=abc",
            token,
            &[
                ("X".to_string(), "7.14".to_string()),
                ("camera_folder".to_string(), "CAMERA2_20220408".to_string()),
            ],
        )
        .unwrap();

        assert!(url.starts_with("https://demo.docusign.net/Member/PowerFormSigning.aspx?PowerFormId=abc"));
        assert!(url.contains(&format!("EnvelopeField_powerform_submission_id={token}")));
        assert!(url.contains("X=7.14"));
        assert!(url.contains("camera_folder=CAMERA2_20220408"));
    }
}
