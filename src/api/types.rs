//! Tipos de dados para requisições e respostas do backend de tradução.
//!
//! Todas as structs derivam `Serialize` ou `Deserialize` conforme o formato
//! JSON esperado pelos endpoints em `/api`. Campos opcionais usam
//! `#[serde(default)]` porque o backend omite chaves com frequência.

use serde::{Deserialize, Deserializer, Serialize};

use crate::operation::{JobOperation, JobStatus, PaymentStatus, RemoteOperation, parse_timestamp};

/// Corpo de `POST /api/auth/invite-login`.
#[derive(Debug, Clone, Serialize)]
pub struct InviteLoginRequest {
    pub invite_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Corpo de `POST /api/auth/invite-register`: convite mais dados de perfil.
#[derive(Debug, Clone, Serialize)]
pub struct InviteRegisterRequest {
    pub invite_code: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Corpo de `POST /api/auth/request-otp`.
#[derive(Debug, Clone, Serialize)]
pub struct OtpRequest {
    pub email: String,
}

/// Corpo de `POST /api/auth/verify-otp`.
#[derive(Debug, Clone, Serialize)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Resposta de sucesso de qualquer variante de login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Dados do usuário retornados no login e em `GET /api/user/info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Tarifa ativa ("S", "M" ou "L").
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub quota_words: Option<u64>,
}

/// Corpo de erro padrão do backend: `{ "detail": ... }`.
///
/// `detail` pode ser uma string ou uma estrutura de validação.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Texto legível do campo `detail`, se existir.
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Resposta de `GET /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsResponse {
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

/// Um job de tradução como o backend o descreve.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    pub status: JobStatus,
    #[serde(default)]
    pub word_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl From<JobRecord> for JobOperation {
    fn from(record: JobRecord) -> Self {
        let result_ref = (record.status == JobStatus::Completed).then(|| record.id.clone());
        RemoteOperation {
            id: record.id,
            status: record.status,
            label: record.filename,
            progress_hint: record.word_count,
            created_at: record.created_at.as_deref().and_then(parse_timestamp),
            result_ref,
        }
    }
}

/// Confirmação de `POST /api/upload`. O corpo pode ser vazio.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadAck {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Variante `{url}` da resposta de download.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadLink {
    pub url: String,
}

/// Corpo das requisições `create-*` de pagamento.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub tier: String,
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Resposta de criação de checkout. Stripe usa `checkout_url`; os demais,
/// `pay_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutResponse {
    #[serde(alias = "pay_url")]
    pub checkout_url: String,
}

/// Resposta de status de pagamento, comum a todos os provedores.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentStatusResponse {
    pub status: PaymentStatus,
    #[serde(default)]
    pub invite_code: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub quota_words: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

impl From<IdRepr> for String {
    fn from(value: IdRepr) -> Self {
        match value {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

// Ids chegam como string ou número dependendo da versão do backend.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    IdRepr::deserialize(deserializer).map(String::from)
}

fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<IdRepr>::deserialize(deserializer).map(|id| id.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_response_deserialize_from_api_format() {
        let json = r#"{
            "jobs": [
                {"id": 7, "filename": "book.pdf", "status": "processing", "created_at": "2025-03-01T10:00:00"},
                {"id": "j2", "filename": "paper.epub", "status": "completed", "word_count": 120}
            ]
        }"#;
        let resp: JobsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.jobs.len(), 2);
        assert_eq!(resp.jobs[0].id, "7");
        assert_eq!(resp.jobs[0].status, JobStatus::Processing);
        assert_eq!(resp.jobs[1].word_count, Some(120));
    }

    #[test]
    fn jobs_response_missing_list_is_empty() {
        let resp: JobsResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.jobs.is_empty());
    }

    #[test]
    fn job_record_into_operation() {
        let record = JobRecord {
            id: "j1".into(),
            filename: "book.pdf".into(),
            status: JobStatus::Completed,
            word_count: Some(120),
            created_at: Some("2025-03-01T10:00:00Z".into()),
        };
        let op = JobOperation::from(record);
        assert_eq!(op.result_ref.as_deref(), Some("j1"));
        assert_eq!(op.progress_hint, Some(120));
        assert!(op.created_at.is_some());

        let pending = JobOperation::from(JobRecord {
            id: "j2".into(),
            filename: "x.pdf".into(),
            status: JobStatus::Queued,
            word_count: None,
            created_at: None,
        });
        assert!(pending.result_ref.is_none());
    }

    #[test]
    fn error_body_message_variants() {
        let plain: ErrorBody = serde_json::from_str(r#"{"detail": "Invalid invite code"}"#).unwrap();
        assert_eq!(plain.message().as_deref(), Some("Invalid invite code"));

        let structured: ErrorBody =
            serde_json::from_str(r#"{"detail": [{"loc": ["body"], "msg": "field required"}]}"#)
                .unwrap();
        assert!(structured.message().unwrap().contains("field required"));

        let empty: ErrorBody = serde_json::from_str("{}").unwrap();
        assert!(empty.message().is_none());
    }

    #[test]
    fn checkout_response_accepts_pay_url() {
        let stripe: CheckoutResponse =
            serde_json::from_str(r#"{"checkout_url": "https://checkout.stripe.com/c/1"}"#).unwrap();
        assert_eq!(stripe.checkout_url, "https://checkout.stripe.com/c/1");
        let crypto: CheckoutResponse =
            serde_json::from_str(r#"{"pay_url": "https://t.me/CryptoBot?start=x"}"#).unwrap();
        assert_eq!(crypto.checkout_url, "https://t.me/CryptoBot?start=x");
    }

    #[test]
    fn checkout_request_omits_missing_asset() {
        let req = CheckoutRequest {
            tier: "M".into(),
            email: None,
            asset: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"tier":"M","email":null}"#);
    }

    #[test]
    fn payment_status_response_with_receipt() {
        let json = r#"{"status": "completed", "invite_code": "XYZ", "tier": "M", "quota_words": 500000}"#;
        let resp: PaymentStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, PaymentStatus::Completed);
        assert_eq!(resp.invite_code.as_deref(), Some("XYZ"));
        assert_eq!(resp.quota_words, Some(500_000));
    }

    #[test]
    fn upload_ack_tolerates_empty_body() {
        let ack: UploadAck = serde_json::from_str("{}").unwrap();
        assert!(ack.job_id.is_none());
        let ack: UploadAck = serde_json::from_str(r#"{"job_id": 42, "status": "queued"}"#).unwrap();
        assert_eq!(ack.job_id.as_deref(), Some("42"));
        assert_eq!(ack.status, Some(JobStatus::Queued));
    }
}
