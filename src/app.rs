//! Workspace: the one owner of config, persisted session and backend client.
//!
//! Every authorized call made through the workspace goes through
//! [`Workspace::guard`], so an expired token logs the user out no matter
//! which request noticed it.

use tracing::{info, warn};

use crate::api::{BackendClient, UserInfo};
use crate::auth::{AuthFlow, Credential, CredentialKind};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::jobs::JobRegistry;
use crate::operation::JobOperation;
use crate::payment::{
    self, CryptoAsset, PaymentReconciler, PaymentReference, Provider, ProviderSource,
};
use crate::poller::{PollPhase, PollView};
use crate::session::{Session, SessionStore};
use crate::tier::Tier;

pub struct Workspace {
    config: ClientConfig,
    store: SessionStore,
    client: BackendClient,
    session: Option<Session>,
}

impl Workspace {
    /// Builds the client and restores a persisted session, if any.
    pub fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let store = SessionStore::in_dir(&config.state_dir());
        let client = BackendClient::new(&config.api_url, config.request_timeout())
            .map_err(|e| ClientError::Config(format!("cannot build HTTP client: {e}")))?;
        let session = store.load();
        if session.is_some() {
            info!(path = %store.path().display(), "restored session");
        }
        Ok(Self {
            config,
            store,
            client,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Full login state machine, including the two-step email flow.
    pub fn auth_flow(&self, kind: CredentialKind) -> AuthFlow<'_, BackendClient> {
        AuthFlow::new(&self.client, &self.store, kind)
    }

    /// Single-request login (invite code, with or without profile).
    pub async fn login(&mut self, credential: Credential) -> Result<JobRegistry, ClientError> {
        let session = {
            let mut flow = self.auth_flow(credential.kind());
            flow.submit(credential).await?
        };
        self.adopt(session).await
    }

    /// Makes `session` current and loads the job list once.
    ///
    /// Only a rejected token fails here; other refresh errors are logged and
    /// left to the next poll.
    pub async fn adopt(&mut self, session: Session) -> Result<JobRegistry, ClientError> {
        self.session = Some(session);
        let registry = self.job_registry()?;
        match registry.refresh().await {
            Ok(jobs) => info!(jobs = jobs.len(), "initial job list loaded"),
            Err(err) if err.is_unauthenticated() => {
                self.invalidate();
                return Err(err);
            }
            Err(err) => warn!(error = %err, "initial job refresh failed"),
        }
        Ok(registry)
    }

    pub fn job_registry(&self) -> Result<JobRegistry, ClientError> {
        let session = self.require_session()?;
        Ok(JobRegistry::new(
            self.client.clone(),
            session.token.clone(),
            self.config.job_poller(),
        ))
    }

    /// Follows the registry's poller until nothing is pending or the cycle
    /// ends, handing every update to `on_update`.
    ///
    /// A session rejected mid-poll is treated like any other 401: the user is
    /// logged out and polling stops.
    pub async fn watch_jobs(
        &mut self,
        registry: &mut JobRegistry,
        mut on_update: impl FnMut(&PollView<Vec<JobOperation>>),
    ) -> Result<PollPhase, ClientError> {
        let mut rx = registry.watch().subscribe();
        let phase = loop {
            let view = rx.borrow_and_update().clone();
            on_update(&view);
            if view.phase == PollPhase::Idle || view.phase.is_finished() {
                break view.phase;
            }
            if rx.changed().await.is_err() {
                break PollPhase::Stopped;
            }
        };

        if phase == PollPhase::Unauthenticated {
            registry.stop();
            return self.guard(Err(ClientError::Unauthenticated));
        }
        Ok(phase)
    }

    pub async fn user_info(&mut self) -> Result<UserInfo, ClientError> {
        let token = self.require_session()?.token.clone();
        let result = self
            .client
            .user_info(&token)
            .await
            .map_err(ClientError::from_authorized);
        self.guard(result)
    }

    pub fn payment_reconciler(&self) -> PaymentReconciler {
        PaymentReconciler::new(self.config.payment_poller())
    }

    pub fn payment_source(&self, reference: PaymentReference) -> ProviderSource {
        ProviderSource::new(self.client.clone(), reference)
    }

    /// Creates a checkout and returns the URL to open. No session needed.
    pub async fn create_checkout(
        &self,
        provider: Provider,
        tier: Tier,
        email: Option<String>,
        asset: Option<CryptoAsset>,
    ) -> Result<String, ClientError> {
        payment::create_checkout(&self.client, provider, tier, email, asset).await
    }

    /// Passes `result` through, logging out first if it is `Unauthenticated`.
    pub fn guard<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if matches!(&result, Err(err) if err.is_unauthenticated()) {
            self.invalidate();
        }
        result
    }

    /// Forced logout after the backend rejected the token.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            warn!("session rejected by the backend, logging out");
        }
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "could not clear persisted session");
        }
    }

    pub fn logout(&mut self) -> Result<(), ClientError> {
        self.session = None;
        self.store.clear()?;
        info!("logged out");
        Ok(())
    }

    fn require_session(&self) -> Result<&Session, ClientError> {
        self.session.as_ref().ok_or(ClientError::Unauthenticated)
    }
}

/// Word allowance for a user: the backend's figure, else the tier's.
pub fn quota_limit(user: &UserInfo) -> Option<u64> {
    user.quota_words.or_else(|| {
        user.tier
            .as_deref()
            .and_then(|t| t.parse::<Tier>().ok())
            .map(Tier::quota_words)
    })
}
