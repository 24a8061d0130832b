//! Login state machine.
//!
//! One [`AuthFlow`] handles all three credential kinds. It talks to the
//! backend through [`AuthBackend`] and saves the resulting [`Session`] before
//! reporting success.

use std::fmt;
use std::future::Future;

use tracing::{debug, info, warn};

use crate::api::types::{
    InviteLoginRequest, InviteRegisterRequest, LoginResponse, OtpRequest, OtpVerifyRequest,
};
use crate::api::BackendClient;
use crate::error::ClientError;
use crate::session::{Session, SessionStore};

/// The ways a user can prove access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    InviteOnly,
    InviteWithProfile,
    EmailOtp,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::InviteOnly => write!(f, "invite code"),
            CredentialKind::InviteWithProfile => write!(f, "invite code with profile"),
            CredentialKind::EmailOtp => write!(f, "email code"),
        }
    }
}

/// A credential ready to be exchanged for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Invite {
        code: String,
    },
    InviteWithProfile {
        code: String,
        name: String,
        email: String,
    },
    OtpCode {
        email: String,
        code: String,
    },
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Invite { .. } => CredentialKind::InviteOnly,
            Credential::InviteWithProfile { .. } => CredentialKind::InviteWithProfile,
            Credential::OtpCode { .. } => CredentialKind::EmailOtp,
        }
    }

    /// Trims every field and upper-cases invite codes.
    pub fn normalized(self) -> Self {
        match self {
            Credential::Invite { code } => Credential::Invite {
                code: normalize_invite(&code),
            },
            Credential::InviteWithProfile { code, name, email } => Credential::InviteWithProfile {
                code: normalize_invite(&code),
                name: name.trim().to_string(),
                email: email.trim().to_string(),
            },
            Credential::OtpCode { email, code } => Credential::OtpCode {
                email: email.trim().to_string(),
                code: code.trim().to_string(),
            },
        }
    }

    // Local checks; the backend still has the final word.
    fn validate(&self) -> Result<(), String> {
        match self {
            Credential::Invite { code } => require(code, "invite code"),
            Credential::InviteWithProfile { code, name, email } => {
                require(code, "invite code")?;
                require(name, "name")?;
                require_email(email)
            }
            Credential::OtpCode { email, code } => {
                require_email(email)?;
                require(code, "code")
            }
        }
    }
}

fn normalize_invite(code: &str) -> String {
    code.trim().to_uppercase()
}

fn require(value: &str, what: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{what} is required"));
    }
    Ok(())
}

fn require_email(email: &str) -> Result<(), String> {
    require(email, "email")?;
    if !email.contains('@') {
        return Err(format!("{email:?} is not an email address"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Retrying the same credential will fail again.
    Credential,
    /// Retrying later may succeed.
    Transient,
}

/// Why the last submission did not produce a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    fn from_error(err: &ClientError) -> Self {
        match err {
            ClientError::CredentialRejected { reason } => Self {
                kind: RejectionKind::Credential,
                reason: reason.clone(),
            },
            other => Self {
                kind: RejectionKind::Transient,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for input, with the reason the previous attempt failed.
    CollectingCredential { rejection: Option<Rejection> },
    Submitting,
    /// A one-time code was sent to `email`.
    AwaitingCode { email: String },
    SessionEstablished(Session),
}

/// The backend operations a login needs.
pub trait AuthBackend {
    /// Exchanges a credential for a token.
    fn exchange(
        &self,
        credential: &Credential,
        device_id: &str,
    ) -> impl Future<Output = Result<LoginResponse, ClientError>> + Send;

    /// Asks the backend to email a one-time code.
    fn request_code(&self, email: &str) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl AuthBackend for BackendClient {
    async fn exchange(
        &self,
        credential: &Credential,
        device_id: &str,
    ) -> Result<LoginResponse, ClientError> {
        let device_id = Some(device_id.to_string());
        let result = match credential {
            Credential::Invite { code } => {
                self.invite_login(&InviteLoginRequest {
                    invite_code: code.clone(),
                    device_id,
                })
                .await
            }
            Credential::InviteWithProfile { code, name, email } => {
                self.invite_register(&InviteRegisterRequest {
                    invite_code: code.clone(),
                    name: name.clone(),
                    email: email.clone(),
                    device_id,
                })
                .await
            }
            Credential::OtpCode { email, code } => {
                self.verify_otp(&OtpVerifyRequest {
                    email: email.clone(),
                    code: code.clone(),
                    device_id,
                })
                .await
            }
        };
        result.map_err(ClientError::from_auth)
    }

    async fn request_code(&self, email: &str) -> Result<(), ClientError> {
        self.request_otp(&OtpRequest {
            email: email.to_string(),
        })
        .await
        .map_err(ClientError::from_auth)
    }
}

/// Drives one login attempt sequence for a fixed [`CredentialKind`].
pub struct AuthFlow<'a, B> {
    backend: &'a B,
    store: &'a SessionStore,
    kind: CredentialKind,
    state: AuthState,
    // Survives a rejected code so the user can retype it.
    code_sent_to: Option<String>,
}

impl<'a, B: AuthBackend> AuthFlow<'a, B> {
    pub fn new(backend: &'a B, store: &'a SessionStore, kind: CredentialKind) -> Self {
        Self {
            backend,
            store,
            kind,
            state: AuthState::CollectingCredential { rejection: None },
            code_sent_to: None,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Email a code was sent to in this flow, if any.
    pub fn code_sent_to(&self) -> Option<&str> {
        self.code_sent_to.as_deref()
    }

    /// First step of the email flow. May be repeated to resend the code.
    pub async fn request_code(&mut self, email: &str) -> Result<(), ClientError> {
        if self.kind != CredentialKind::EmailOtp {
            return Err(ClientError::InvalidFlow(format!(
                "cannot request an email code in a {} login",
                self.kind
            )));
        }
        self.ensure_open()?;

        let email = email.trim().to_string();
        if let Err(reason) = require_email(&email) {
            return Err(self.reject(ClientError::CredentialRejected { reason }));
        }

        self.state = AuthState::Submitting;
        match self.backend.request_code(&email).await {
            Ok(()) => {
                info!(%email, "one-time code requested");
                self.code_sent_to = Some(email.clone());
                self.state = AuthState::AwaitingCode { email };
                Ok(())
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Exchanges `credential` for a session and persists it.
    ///
    /// A rejection leaves the flow collecting input again, so the same flow
    /// can be retried.
    pub async fn submit(&mut self, credential: Credential) -> Result<Session, ClientError> {
        if credential.kind() != self.kind {
            return Err(ClientError::InvalidFlow(format!(
                "expected {}, got {}",
                self.kind,
                credential.kind()
            )));
        }
        self.ensure_open()?;

        let credential = credential.normalized();
        if let Credential::OtpCode { email, .. } = &credential {
            let requested = self
                .code_sent_to
                .as_deref()
                .is_some_and(|sent| sent.eq_ignore_ascii_case(email));
            if !requested {
                return Err(ClientError::InvalidFlow(format!(
                    "no code was requested for {email}"
                )));
            }
        }
        if let Err(reason) = credential.validate() {
            return Err(self.reject(ClientError::CredentialRejected { reason }));
        }

        let device_id = match self.store.device_id() {
            Ok(id) => id,
            Err(err) => return Err(self.reject(err)),
        };
        self.state = AuthState::Submitting;
        debug!(kind = %self.kind, "submitting credential");

        let response = match self.backend.exchange(&credential, &device_id).await {
            Ok(response) => response,
            Err(err) => return Err(self.reject(err)),
        };
        if response.token.is_empty() {
            return Err(self.reject(ClientError::Transient(
                "login response carried no token".into(),
            )));
        }

        let session = Session::new(response.token, device_id);
        if let Err(err) = self.store.save(&session) {
            return Err(self.reject(err));
        }
        info!(kind = %self.kind, "session established");
        self.state = AuthState::SessionEstablished(session.clone());
        Ok(session)
    }

    /// Back to the initial state, forgetting any requested code.
    pub fn reset(&mut self) {
        self.state = AuthState::CollectingCredential { rejection: None };
        self.code_sent_to = None;
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if matches!(self.state, AuthState::SessionEstablished(_)) {
            return Err(ClientError::InvalidFlow(
                "a session is already established".into(),
            ));
        }
        Ok(())
    }

    fn reject(&mut self, err: ClientError) -> ClientError {
        let rejection = Rejection::from_error(&err);
        warn!(kind = %self.kind, reason = %rejection.reason, "login attempt rejected");
        self.state = AuthState::CollectingCredential {
            rejection: Some(rejection),
        };
        err
    }
}
