//! Configuração do perevod carregada a partir de `perevod.toml`.
//!
//! A struct [`ClientConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PEREVOD_API_URL` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_API_URL;
use crate::error::ClientError;
use crate::poller::Poller;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "perevod.toml";

/// Variável de ambiente que sobrescreve `api_url`.
pub const API_URL_ENV: &str = "PEREVOD_API_URL";

/// Configuração de nível superior carregada de `perevod.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Origem do backend, sem o prefixo `/api`.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Intervalo entre consultas da lista de jobs enquanto algum está pendente.
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,

    /// Intervalo entre consultas de status de pagamento.
    #[serde(default = "default_payment_poll_interval_ms")]
    pub payment_poll_interval_ms: u64,

    /// Tempo máximo de cada requisição HTTP.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Tempo máximo que o reconciliador de pagamento espera um status final.
    #[serde(default = "default_payment_max_wait_secs")]
    pub payment_max_wait_secs: u64,

    /// Tamanho máximo aceito para upload, em bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Diretório do estado persistido (sessão e device id).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

// Valor padrão para a origem do backend.
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

// Valor padrão para o intervalo de jobs: 5s.
fn default_job_poll_interval_ms() -> u64 {
    5_000
}

// Valor padrão para o intervalo de pagamentos: 2s.
fn default_payment_poll_interval_ms() -> u64 {
    2_000
}

// Valor padrão para o timeout de requisição: 15s.
fn default_request_timeout_ms() -> u64 {
    15_000
}

// Valor padrão para a espera máxima de pagamento: 10 minutos.
fn default_payment_max_wait_secs() -> u64 {
    600
}

// Valor padrão para o tamanho de upload: 80 MiB.
fn default_max_upload_bytes() -> u64 {
    80 * 1024 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            job_poll_interval_ms: default_job_poll_interval_ms(),
            payment_poll_interval_ms: default_payment_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            payment_max_wait_secs: default_payment_max_wait_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            state_dir: None,
        }
    }
}

impl ClientConfig {
    /// Carrega a configuração de `perevod.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self, ClientError> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.apply_api_url(&url);
        }

        Ok(config)
    }

    /// Carrega a configuração de um caminho explícito.
    /// Arquivo ausente resulta nos valores padrão.
    pub fn load_from(path: &Path) -> Result<Self, ClientError> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ClientConfig>(&contents)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Sobrescreve a origem do backend se o valor não for vazio.
    pub fn apply_api_url(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            self.api_url = url.to_string();
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "api_url must be an http(s) URL, got {:?}",
                self.api_url
            )));
        }
        if self.job_poll_interval_ms == 0 || self.payment_poll_interval_ms == 0 {
            return Err(ClientError::Config(
                "poll intervals must be greater than zero".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ClientError::Config(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Diretório de estado: o configurado, ou `<data_local_dir>/perevod`.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("perevod"))
                .unwrap_or_else(|| PathBuf::from(".perevod"))
        })
    }

    /// Poller para a lista de jobs.
    pub fn job_poller(&self) -> Poller {
        Poller::new(Duration::from_millis(self.job_poll_interval_ms))
            .with_request_timeout(self.request_timeout())
    }

    /// Poller para um único pagamento, com espera máxima.
    pub fn payment_poller(&self) -> Poller {
        Poller::new(Duration::from_millis(self.payment_poll_interval_ms))
            .with_request_timeout(self.request_timeout())
            .with_max_wait(Duration::from_secs(self.payment_max_wait_secs))
    }
}
