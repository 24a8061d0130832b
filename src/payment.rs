//! Payment checkout and reconciliation.
//!
//! A checkout is created through one of the providers, the user pays in the
//! browser, and the provider's return URL carries the reference the
//! [`PaymentReconciler`] polls until the payment is terminal.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use reqwest::Url;
use tracing::{debug, info};

use crate::api::types::{CheckoutRequest, PaymentStatusResponse};
use crate::api::{ApiError, BackendClient};
use crate::error::ClientError;
use crate::operation::{PaymentOperation, PaymentStatus, reconcile_operation};
use crate::poller::{PollHandle, PollPhase, PollView, Poller};
use crate::tier::Tier;

/// Payment providers the backend integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Stripe,
    WalletPay,
    CryptoBot,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Stripe, Provider::WalletPay, Provider::CryptoBot];

    /// Query parameter that carries this provider's reference on return.
    pub fn query_key(self) -> &'static str {
        match self {
            Provider::Stripe => "session_id",
            Provider::WalletPay => "order_id",
            Provider::CryptoBot => "invoice_id",
        }
    }

    pub fn create_path(self) -> &'static str {
        match self {
            Provider::Stripe => "/stripe/create-checkout",
            Provider::WalletPay => "/wallet-pay/create-order",
            Provider::CryptoBot => "/cryptobot/create-invoice",
        }
    }

    pub fn status_path(self, id: &str) -> String {
        match self {
            Provider::Stripe => format!("/stripe/session/{id}"),
            Provider::WalletPay => format!("/wallet-pay/order/{id}"),
            Provider::CryptoBot => format!("/cryptobot/invoice/{id}"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Stripe => write!(f, "stripe"),
            Provider::WalletPay => write!(f, "wallet-pay"),
            Provider::CryptoBot => write!(f, "cryptobot"),
        }
    }
}

impl FromStr for Provider {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Provider::Stripe),
            "wallet-pay" | "walletpay" | "wallet" => Ok(Provider::WalletPay),
            "cryptobot" | "crypto" => Ok(Provider::CryptoBot),
            other => Err(ClientError::InvalidFlow(format!(
                "unknown payment provider {other:?}"
            ))),
        }
    }
}

/// Crypto assets accepted by CryptoBot invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoAsset {
    #[default]
    Usdt,
    Ton,
}

impl CryptoAsset {
    pub fn as_str(self) -> &'static str {
        match self {
            CryptoAsset::Usdt => "USDT",
            CryptoAsset::Ton => "TON",
        }
    }
}

/// Starts a checkout and returns the URL the user has to open.
pub async fn create_checkout(
    client: &BackendClient,
    provider: Provider,
    tier: Tier,
    email: Option<String>,
    asset: Option<CryptoAsset>,
) -> Result<String, ClientError> {
    let asset = match provider {
        Provider::CryptoBot => Some(asset.unwrap_or_default().as_str().to_string()),
        _ => None,
    };
    let request = CheckoutRequest {
        tier: tier.as_str().to_string(),
        email: email.filter(|e| !e.trim().is_empty()),
        asset,
    };
    let response = client
        .create_checkout(provider.create_path(), &request)
        .await
        .map_err(ClientError::from_authorized)?;
    info!(%provider, %tier, "checkout created");
    Ok(response.checkout_url)
}

/// Identifies one payment at one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReference {
    pub provider: Provider,
    pub id: String,
}

impl PaymentReference {
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }

    /// Parses a full return URL or a bare query string such as
    /// `?order_id=o1`.
    ///
    /// `session_id` wins over `order_id`, which wins over `invoice_id`.
    pub fn from_return_url(input: &str) -> Result<Self, ClientError> {
        let input = input.trim();
        let url = Url::parse(input).or_else(|_| {
            let query = input.trim_start_matches('?');
            Url::parse(&format!("http://return.invalid/?{query}"))
        });
        let url = url.map_err(|_| no_payment_information())?;

        Provider::ALL
            .into_iter()
            .find_map(|provider| {
                url.query_pairs()
                    .find(|(key, value)| key == provider.query_key() && !value.trim().is_empty())
                    .map(|(_, value)| Self::new(provider, value.trim()))
            })
            .ok_or_else(no_payment_information)
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider, self.id)
    }
}

fn no_payment_information() -> ClientError {
    ClientError::InvalidFlow("no payment information found".into())
}

/// Where the status of one payment comes from.
pub trait PaymentStatusSource: Clone + Send + Sync + 'static {
    fn reference(&self) -> PaymentReference;

    fn fetch_status(
        &self,
    ) -> impl Future<Output = Result<PaymentStatusResponse, ClientError>> + Send;
}

// Status endpoints are public; a 401 there says nothing about the session.
fn status_error(err: ApiError) -> ClientError {
    match err {
        ApiError::Unauthorized { detail } => ClientError::Backend {
            status: 401,
            detail,
        },
        other => ClientError::from_authorized(other),
    }
}

async fn fetch_provider_status(
    client: &BackendClient,
    provider: Provider,
    id: &str,
) -> Result<PaymentStatusResponse, ClientError> {
    client
        .payment_status(&provider.status_path(id))
        .await
        .map_err(status_error)
}

/// Stripe checkout session.
#[derive(Debug, Clone)]
pub struct StripeCheckout {
    pub client: BackendClient,
    pub session_id: String,
}

impl PaymentStatusSource for StripeCheckout {
    fn reference(&self) -> PaymentReference {
        PaymentReference::new(Provider::Stripe, &self.session_id)
    }

    async fn fetch_status(&self) -> Result<PaymentStatusResponse, ClientError> {
        fetch_provider_status(&self.client, Provider::Stripe, &self.session_id).await
    }
}

/// Wallet Pay order.
#[derive(Debug, Clone)]
pub struct WalletPayOrder {
    pub client: BackendClient,
    pub order_id: String,
}

impl PaymentStatusSource for WalletPayOrder {
    fn reference(&self) -> PaymentReference {
        PaymentReference::new(Provider::WalletPay, &self.order_id)
    }

    async fn fetch_status(&self) -> Result<PaymentStatusResponse, ClientError> {
        fetch_provider_status(&self.client, Provider::WalletPay, &self.order_id).await
    }
}

/// CryptoBot invoice.
#[derive(Debug, Clone)]
pub struct CryptoBotInvoice {
    pub client: BackendClient,
    pub invoice_id: String,
}

impl PaymentStatusSource for CryptoBotInvoice {
    fn reference(&self) -> PaymentReference {
        PaymentReference::new(Provider::CryptoBot, &self.invoice_id)
    }

    async fn fetch_status(&self) -> Result<PaymentStatusResponse, ClientError> {
        fetch_provider_status(&self.client, Provider::CryptoBot, &self.invoice_id).await
    }
}

/// Picks the source matching a parsed reference.
#[derive(Debug, Clone)]
pub enum ProviderSource {
    Stripe(StripeCheckout),
    WalletPay(WalletPayOrder),
    CryptoBot(CryptoBotInvoice),
}

impl ProviderSource {
    pub fn new(client: BackendClient, reference: PaymentReference) -> Self {
        let PaymentReference { provider, id } = reference;
        match provider {
            Provider::Stripe => ProviderSource::Stripe(StripeCheckout {
                client,
                session_id: id,
            }),
            Provider::WalletPay => ProviderSource::WalletPay(WalletPayOrder {
                client,
                order_id: id,
            }),
            Provider::CryptoBot => ProviderSource::CryptoBot(CryptoBotInvoice {
                client,
                invoice_id: id,
            }),
        }
    }
}

impl PaymentStatusSource for ProviderSource {
    fn reference(&self) -> PaymentReference {
        match self {
            ProviderSource::Stripe(s) => s.reference(),
            ProviderSource::WalletPay(s) => s.reference(),
            ProviderSource::CryptoBot(s) => s.reference(),
        }
    }

    async fn fetch_status(&self) -> Result<PaymentStatusResponse, ClientError> {
        match self {
            ProviderSource::Stripe(s) => s.fetch_status().await,
            ProviderSource::WalletPay(s) => s.fetch_status().await,
            ProviderSource::CryptoBot(s) => s.fetch_status().await,
        }
    }
}

/// What the reconciler currently believes about a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentState {
    pub operation: PaymentOperation,
    pub tier: Option<Tier>,
    pub quota_words: Option<u64>,
}

impl PaymentState {
    fn from_response(reference: &PaymentReference, response: PaymentStatusResponse) -> Self {
        let mut operation =
            PaymentOperation::new(&reference.id, response.status, reference.provider.to_string());
        if operation.is_success() {
            operation.result_ref = response.invite_code;
        }
        Self {
            operation,
            tier: response.tier.as_deref().and_then(|t| t.parse().ok()),
            quota_words: response.quota_words,
        }
    }
}

/// A completed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub reference: PaymentReference,
    /// Activation code for the purchased quota.
    pub invite_code: Option<String>,
    pub tier: Option<Tier>,
    pub quota_words: Option<u64>,
}

/// Polls one payment until it is terminal or the maximum wait elapses.
///
/// Never creates or retries a payment.
#[derive(Debug, Clone, Copy)]
pub struct PaymentReconciler {
    poller: Poller,
}

impl PaymentReconciler {
    pub fn new(poller: Poller) -> Self {
        Self { poller }
    }

    pub fn start<T: PaymentStatusSource>(&self, source: T) -> PollHandle<PaymentState> {
        let reference = source.reference();
        debug!(payment = %reference, "starting payment reconciliation");
        self.poller.start_reconciling(
            move || {
                let source = source.clone();
                async move {
                    let reference = source.reference();
                    let response = source.fetch_status().await?;
                    Ok(PaymentState::from_response(&reference, response))
                }
            },
            |state: &PaymentState| state.operation.is_pending(),
            |previous: Option<&PaymentState>, next: PaymentState| match previous {
                Some(prev) if prev.operation.is_terminal() => PaymentState {
                    operation: reconcile_operation(&prev.operation, next.operation),
                    ..prev.clone()
                },
                _ => next,
            },
        )
    }

    /// Polls until a terminal outcome.
    pub async fn reconcile<T: PaymentStatusSource>(
        &self,
        source: T,
    ) -> Result<PaymentReceipt, ClientError> {
        let reference = source.reference();
        let handle = self.start(source);
        let view = handle.settled().await;
        let outcome = outcome(&reference, &view);
        match &outcome {
            Ok(_) => info!(payment = %reference, "payment completed"),
            Err(err) => info!(payment = %reference, error = %err, "payment not completed"),
        }
        outcome
    }
}

/// Maps a settled view to the caller-facing result.
pub fn outcome(
    reference: &PaymentReference,
    view: &PollView<PaymentState>,
) -> Result<PaymentReceipt, ClientError> {
    let id = reference.id.clone();
    match view.phase {
        PollPhase::Unauthenticated => return Err(ClientError::Unauthenticated),
        PollPhase::Idle => {}
        _ => return Err(ClientError::PaymentUnresolved { id }),
    }
    let Some(state) = &view.snapshot else {
        return Err(ClientError::PaymentUnresolved { id });
    };
    match &state.operation.status {
        PaymentStatus::Completed => Ok(PaymentReceipt {
            reference: reference.clone(),
            invite_code: state.operation.result_ref.clone(),
            tier: state.tier,
            quota_words: state.quota_words.or(state.tier.map(Tier::quota_words)),
        }),
        PaymentStatus::Failed => Err(ClientError::PaymentFailed { id }),
        PaymentStatus::Cancelled => Err(ClientError::PaymentCancelled { id }),
        PaymentStatus::Pending | PaymentStatus::Other(_) => {
            Err(ClientError::PaymentUnresolved { id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replays scripted responses; the last one repeats.
    #[derive(Clone)]
    struct ScriptedSource {
        reference: PaymentReference,
        responses: Arc<Mutex<VecDeque<Result<PaymentStatusResponse, ClientError>>>>,
    }

    impl ScriptedSource {
        fn new(statuses: &[&str]) -> Self {
            let responses = statuses
                .iter()
                .map(|s| {
                    Ok(PaymentStatusResponse {
                        status: PaymentStatus::from(s.to_string()),
                        invite_code: (*s == "completed").then(|| "XYZ".to_string()),
                        tier: Some("M".into()),
                        quota_words: None,
                    })
                })
                .collect();
            Self {
                reference: PaymentReference::new(Provider::WalletPay, "o1"),
                responses: Arc::new(Mutex::new(responses)),
            }
        }
    }

    impl PaymentStatusSource for ScriptedSource {
        fn reference(&self) -> PaymentReference {
            self.reference.clone()
        }

        async fn fetch_status(&self) -> Result<PaymentStatusResponse, ClientError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                return responses.pop_front().unwrap();
            }
            match responses.front() {
                Some(Ok(r)) => Ok(r.clone()),
                _ => Err(ClientError::Transient("script exhausted".into())),
            }
        }
    }

    fn reconciler(interval: Duration, max_wait: Duration) -> PaymentReconciler {
        PaymentReconciler::new(Poller::new(interval).with_max_wait(max_wait))
    }

    #[test]
    fn return_url_selects_provider() {
        let stripe =
            PaymentReference::from_return_url("https://app.example/payment/success?session_id=cs_1")
                .unwrap();
        assert_eq!(stripe, PaymentReference::new(Provider::Stripe, "cs_1"));

        let wallet = PaymentReference::from_return_url("?order_id=o1").unwrap();
        assert_eq!(wallet, PaymentReference::new(Provider::WalletPay, "o1"));

        let crypto = PaymentReference::from_return_url("invoice_id=42&foo=bar").unwrap();
        assert_eq!(crypto, PaymentReference::new(Provider::CryptoBot, "42"));

        let both = PaymentReference::from_return_url("?order_id=o1&session_id=cs_2").unwrap();
        assert_eq!(both.provider, Provider::Stripe);
    }

    #[test]
    fn return_url_without_reference_is_invalid() {
        for input in ["", "?foo=bar", "https://app.example/payment/success", "?order_id="] {
            let err = PaymentReference::from_return_url(input).unwrap_err();
            assert!(
                matches!(err, ClientError::InvalidFlow(ref m) if m == "no payment information found"),
                "{input:?}"
            );
        }
    }

    #[test]
    fn provider_paths() {
        assert_eq!(Provider::Stripe.status_path("cs_1"), "/stripe/session/cs_1");
        assert_eq!(Provider::CryptoBot.status_path("9"), "/cryptobot/invoice/9");
        assert_eq!(Provider::WalletPay.create_path(), "/wallet-pay/create-order");
        assert_eq!("Wallet-Pay".parse::<Provider>().unwrap(), Provider::WalletPay);
        assert!("paypal".parse::<Provider>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_completed_after_one_interval() {
        let source = ScriptedSource::new(&["pending", "completed"]);
        let started = Instant::now();
        let receipt = reconciler(Duration::from_secs(2), Duration::from_secs(600))
            .reconcile(source)
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(receipt.invite_code.as_deref(), Some("XYZ"));
        assert_eq!(receipt.tier, Some(Tier::M));
        // The tier constant fills in a quota the backend did not report.
        assert_eq!(receipt.quota_words, Some(500_000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_and_cancelled_outcomes() {
        let r = reconciler(Duration::from_secs(2), Duration::from_secs(600));

        let err = r.reconcile(ScriptedSource::new(&["failed"])).await.unwrap_err();
        assert!(matches!(err, ClientError::PaymentFailed { ref id } if id == "o1"));

        let err = r
            .reconcile(ScriptedSource::new(&["pending", "expired"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PaymentCancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stays_pending_until_max_wait() {
        let source = ScriptedSource::new(&["pending"]);
        let responses = Arc::clone(&source.responses);
        let err = reconciler(Duration::from_secs(2), Duration::from_secs(10))
            .reconcile(source)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PaymentUnresolved { .. }));
        assert_eq!(responses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wallet_pay_return_url_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/wallet-pay/order/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "pending"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/wallet-pay/order/o1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "invite_code": "XYZ",
                "tier": "M",
                "quota_words": 500000
            })))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let reference = PaymentReference::from_return_url("?order_id=o1").unwrap();
        let receipt = reconciler(Duration::from_millis(50), Duration::from_secs(10))
            .reconcile(ProviderSource::new(client, reference.clone()))
            .await
            .unwrap();

        assert_eq!(
            receipt,
            PaymentReceipt {
                reference,
                invite_code: Some("XYZ".into()),
                tier: Some(Tier::M),
                quota_words: Some(500_000),
            }
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cryptobot_checkout_defaults_to_usdt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cryptobot/create-invoice"))
            .and(body_json(serde_json::json!({"tier": "S", "email": null, "asset": "USDT"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"pay_url": "https://t.me/CryptoBot?start=iv1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/stripe/create-checkout"))
            .and(body_json(serde_json::json!({"tier": "L", "email": "a@b.c"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"checkout_url": "https://checkout.stripe.com/c/1"})),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let url = create_checkout(&client, Provider::CryptoBot, Tier::S, None, None)
            .await
            .unwrap();
        assert_eq!(url, "https://t.me/CryptoBot?start=iv1");

        let url = create_checkout(
            &client,
            Provider::Stripe,
            Tier::L,
            Some("a@b.c".into()),
            Some(CryptoAsset::Ton),
        )
        .await
        .unwrap();
        assert_eq!(url, "https://checkout.stripe.com/c/1");
    }
}
