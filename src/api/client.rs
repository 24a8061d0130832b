use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ApiError;
use super::types::{
    CheckoutRequest, CheckoutResponse, DownloadLink, ErrorBody, InviteLoginRequest,
    InviteRegisterRequest, JobsResponse, LoginResponse, OtpRequest, OtpVerifyRequest,
    PaymentStatusResponse, UploadAck, UserInfo,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Result of `GET /api/jobs/{id}/download`, which depends on the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Bytes(Vec<u8>),
    Redirect(String),
}

/// Typed wrapper over the backend's REST endpoints.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn invite_login(&self, req: &InviteLoginRequest) -> Result<LoginResponse, ApiError> {
        self.post_json("/auth/invite-login", req).await
    }

    pub async fn invite_register(
        &self,
        req: &InviteRegisterRequest,
    ) -> Result<LoginResponse, ApiError> {
        self.post_json("/auth/invite-register", req).await
    }

    pub async fn request_otp(&self, req: &OtpRequest) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/auth/request-otp"))
            .json(req)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    pub async fn verify_otp(&self, req: &OtpVerifyRequest) -> Result<LoginResponse, ApiError> {
        self.post_json("/auth/verify-otp", req).await
    }

    pub async fn user_info(&self, token: &str) -> Result<UserInfo, ApiError> {
        self.get_json("/user/info", token).await
    }

    pub async fn list_jobs(&self, token: &str) -> Result<JobsResponse, ApiError> {
        self.get_json("/jobs", token).await
    }

    /// Multipart upload with field `file` and an optional `glossary` text field.
    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        bytes: Vec<u8>,
        glossary: Option<&str>,
    ) -> Result<UploadAck, ApiError> {
        let mut form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        if let Some(glossary) = glossary {
            form = form.text("glossary", glossary.to_string());
        }

        let response = self
            .client
            .post(self.url("/upload"))
            .query(&[("token", token)])
            .multipart(form)
            .send()
            .await?;
        let response = check(response).await?;

        // The acknowledgement body is optional.
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(UploadAck::default());
        }
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    pub async fn download(&self, token: &str, job_id: &str) -> Result<Download, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}/download")))
            .query(&[("token", token)])
            .send()
            .await?;
        let response = check(response).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let link = response
                .json::<DownloadLink>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            return Ok(Download::Redirect(link.url));
        }
        Ok(Download::Bytes(response.bytes().await?.to_vec()))
    }

    /// `POST /api{path}` for one of the provider `create-*` endpoints.
    pub async fn create_checkout(
        &self,
        path: &str,
        req: &CheckoutRequest,
    ) -> Result<CheckoutResponse, ApiError> {
        self.post_json(path, req).await
    }

    /// `GET /api{path}` for one of the provider status endpoints.
    pub async fn payment_status(&self, path: &str) -> Result<PaymentStatusResponse, ApiError> {
        let response = self.client.get(self.url(path)).send().await?;
        decode(check(response).await?).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        decode(check(response).await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .query(&[("token", token)])
            .send()
            .await?;
        decode(check(response).await?).await
    }
}

/// Turns non-2xx responses into [`ApiError`], reading `{detail}` when present.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
    debug!(%url, status = status.as_u16(), %detail, "backend returned an error");

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized { detail });
    }
    Err(ApiError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}
