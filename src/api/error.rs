//! Tipos de erro da camada HTTP do cliente do backend.
//!
//! Define [`ApiError`] com variantes para respostas 401, rejeições do
//! backend e falhas de rede. A classificação para o chamador
//! (credencial rejeitada, sessão inválida, falha transitória) acontece em
//! [`ClientError`](crate::error::ClientError), no ponto de chamada.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com o backend de tradução.
///
/// As variantes cobrem os cenários de falha observados:
/// - [`Unauthorized`](ApiError::Unauthorized): o servidor retornou HTTP 401
/// - [`Rejected`](ApiError::Rejected): qualquer outro status fora de 2xx
/// - [`Network`](ApiError::Network): falha na camada de rede ou timeout
/// - [`Decode`](ApiError::Decode): corpo 2xx que não tem o formato esperado
#[derive(Debug, Error)]
pub enum ApiError {
    /// O servidor retornou HTTP 401.
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },

    /// Status fora de 2xx. `detail` vem do corpo `{detail}` quando presente.
    #[error("backend rejected request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Resposta de sucesso com corpo inesperado.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Status HTTP da resposta, quando houve resposta.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }

    /// Mensagem legível enviada pelo servidor, se houver.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { detail } | ApiError::Rejected { detail, .. } => {
                Some(detail.as_str())
            }
            _ => None,
        }
    }
}
