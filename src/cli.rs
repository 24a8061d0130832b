//! Interface de linha de comando do perevod baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (login, jobs, upload,
//! buy, payment...) e flags globais (--config, --api-url, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::payment::{CryptoAsset, Provider};
use crate::tier::Tier;

/// perevod — cliente de tradução de documentos PDF e EPUB.
#[derive(Debug, Parser)]
#[command(name = "perevod", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração (padrão: ./perevod.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Origem do backend, sobrescreve config e variável de ambiente.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Entra com um código de convite.
    Login {
        /// Código de convite.
        code: String,

        /// Nome para o cadastro junto com o convite.
        #[arg(long, requires = "email")]
        name: Option<String>,

        /// Email para o cadastro junto com o convite.
        #[arg(long, requires = "name")]
        email: Option<String>,
    },

    /// Entra com um código enviado por email.
    LoginOtp {
        email: String,
    },

    /// Sai e apaga o token salvo.
    Logout,

    /// Mostra o usuário atual e o consumo da cota.
    Status,

    /// Lista os jobs de tradução.
    Jobs {
        /// Continua acompanhando até que nenhum job esteja pendente.
        #[arg(long)]
        watch: bool,
    },

    /// Envia um PDF ou EPUB para tradução.
    Upload {
        file: PathBuf,

        /// Arquivo de glossário enviado junto com o documento.
        #[arg(long)]
        glossary: Option<PathBuf>,

        /// Não acompanha o job depois do envio.
        #[arg(long)]
        no_watch: bool,
    },

    /// Baixa a tradução de um job concluído.
    Download {
        job_id: String,

        /// Destino (padrão: translated_<arquivo>.txt).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Compra cota e mostra o link de pagamento.
    Buy {
        #[arg(long, ignore_case = true)]
        tier: TierArg,

        #[arg(long, default_value = "stripe")]
        provider: ProviderArg,

        /// Moeda da fatura CryptoBot.
        #[arg(long, ignore_case = true)]
        asset: Option<AssetArg>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Confirma um pagamento a partir da URL de retorno do provedor.
    Payment {
        /// URL de retorno ou query string (`?session_id=...`).
        return_url: String,
    },
}

/// Tarifa aceita pela CLI, mapeada para [`Tier`].
#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum TierArg {
    S,
    M,
    L,
}

impl From<TierArg> for Tier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::S => Tier::S,
            TierArg::M => Tier::M,
            TierArg::L => Tier::L,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    Stripe,
    WalletPay,
    Cryptobot,
}

impl From<ProviderArg> for Provider {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Stripe => Provider::Stripe,
            ProviderArg::WalletPay => Provider::WalletPay,
            ProviderArg::Cryptobot => Provider::CryptoBot,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum AssetArg {
    Usdt,
    Ton,
}

impl From<AssetArg> for CryptoAsset {
    fn from(value: AssetArg) -> Self {
        match value {
            AssetArg::Usdt => CryptoAsset::Usdt,
            AssetArg::Ton => CryptoAsset::Ton,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_login_subcommand() {
        let cli = Cli::parse_from(["perevod", "login", "abcd1234"]);
        match cli.command {
            Command::Login { code, name, email } => {
                assert_eq!(code, "abcd1234");
                assert!(name.is_none() && email.is_none());
            }
            _ => panic!("expected Login command"),
        }
    }

    #[test]
    fn profile_login_needs_both_fields() {
        assert!(Cli::try_parse_from(["perevod", "login", "X", "--name", "Ada"]).is_err());
        let cli = Cli::try_parse_from([
            "perevod", "login", "X", "--name", "Ada", "--email", "ada@example.com",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Login { name: Some(_), email: Some(_), .. }));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "perevod",
            "--api-url",
            "https://api.example.com",
            "--config",
            "/tmp/p.toml",
            "--verbose",
            "status",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.api_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn cli_parses_upload() {
        let cli = Cli::parse_from(["perevod", "upload", "book.epub", "--glossary", "g.txt", "--no-watch"]);
        match cli.command {
            Command::Upload {
                file,
                glossary,
                no_watch,
            } => {
                assert_eq!(file, PathBuf::from("book.epub"));
                assert_eq!(glossary, Some(PathBuf::from("g.txt")));
                assert!(no_watch);
            }
            _ => panic!("expected Upload command"),
        }
    }

    #[test]
    fn cli_parses_buy() {
        let cli = Cli::parse_from([
            "perevod", "buy", "--tier", "M", "--provider", "cryptobot", "--asset", "TON",
        ]);
        match cli.command {
            Command::Buy {
                tier,
                provider,
                asset,
                email,
            } => {
                assert_eq!(Tier::from(tier), Tier::M);
                assert_eq!(Provider::from(provider), Provider::CryptoBot);
                assert_eq!(asset.map(CryptoAsset::from), Some(CryptoAsset::Ton));
                assert!(email.is_none());
            }
            _ => panic!("expected Buy command"),
        }

        let cli = Cli::parse_from(["perevod", "buy", "--tier", "S", "--provider", "wallet-pay"]);
        assert!(matches!(
            cli.command,
            Command::Buy {
                provider: ProviderArg::WalletPay,
                ..
            }
        ));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
