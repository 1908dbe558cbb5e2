//! MTN Mobile Money Open API provider
//!
//! Deposits go through the **collection** product (`requesttopay`), withdrawals
//! through the **disbursement** product (`transfer`). Each product has its own
//! API user, API key and subscription key, and therefore its own bearer token.
//!
//! # Request flow
//!
//! ```text
//! request_deposit ──► POST {base}/collection/v1_0/requesttopay   (202 Accepted)
//! get_status      ──► GET  {base}/collection/v1_0/requesttopay/{reference}
//!
//! request_withdrawal ─► POST {base}/disbursement/v1_0/transfer   (202 Accepted)
//! get_status         ─► GET  {base}/disbursement/v1_0/transfer/{reference}
//!
//! token ──► POST {base}/{product}/token/  (Basic api_user:api_key)
//! ```
//!
//! # Response classification
//!
//! - transport error, client timeout, 5xx, 429, 401/403 after a token refresh → `Unavailable`
//! - 409 on a request → the reference is already known: treated as accepted
//! - any other 4xx → `Rejected` with the provider's error code

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::token_cache::TokenCache;
use super::{PaymentProvider, ProviderError, ProviderKind, ProviderRequest, ProviderStatus};
use crate::types::{ProviderReference, TransactionKind, WalletError};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const REFERENCE_HEADER: &str = "X-Reference-Id";
const TARGET_ENVIRONMENT_HEADER: &str = "X-Target-Environment";
const CALLBACK_HEADER: &str = "X-Callback-Url";

/// Credentials of one MoMo product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductCredentials {
    /// API user (UUID provisioned through the MoMo user provisioning API)
    pub api_user: String,
    /// API key of the API user
    pub api_key: String,
    /// Primary subscription key of the product
    pub subscription_key: String,
}

/// MoMo connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtnMomoConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Value of `X-Target-Environment` (`sandbox`, `mtnuganda`, ...)
    pub target_environment: String,
    /// Optional `X-Callback-Url` for provider notifications
    pub callback_url: Option<String>,
    /// Bound on every HTTP call
    pub request_timeout: Duration,
    /// Tokens are refreshed this long before they expire
    pub token_expiry_margin: Duration,
    /// Collection (deposit) credentials
    pub collection: ProductCredentials,
    /// Disbursement (withdrawal) credentials
    pub disbursement: ProductCredentials,
}

impl Default for MtnMomoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            target_environment: "sandbox".to_string(),
            callback_url: None,
            request_timeout: Duration::from_secs(30),
            token_expiry_margin: Duration::from_secs(60),
            collection: ProductCredentials::default(),
            disbursement: ProductCredentials::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Product {
    Collection,
    Disbursement,
}

impl Product {
    fn for_kind(kind: TransactionKind) -> Option<Self> {
        match kind {
            TransactionKind::Deposit => Some(Product::Collection),
            TransactionKind::Withdrawal => Some(Product::Disbursement),
            TransactionKind::Transfer => None,
        }
    }

    fn segment(self) -> &'static str {
        match self {
            Product::Collection => "collection",
            Product::Disbursement => "disbursement",
        }
    }

    fn resource(self) -> &'static str {
        match self {
            Product::Collection => "requesttopay",
            Product::Disbursement => "transfer",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Party<'a> {
    party_id_type: &'static str,
    party_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MoneyRequestBody<'a> {
    amount: String,
    currency: &'a str,
    external_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<Party<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payee: Option<Party<'a>>,
    payer_message: &'a str,
    payee_note: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    code: Option<String>,
    message: Option<String>,
}

/// MoMo Open API client implementing [`PaymentProvider`]
#[derive(Debug)]
pub struct MtnMomoProvider {
    config: MtnMomoConfig,
    client: Client,
    collection_token: TokenCache,
    disbursement_token: TokenCache,
}

impl MtnMomoProvider {
    /// Build the provider and its HTTP client
    ///
    /// Fails with `InvalidConfig` if the HTTP client cannot be constructed.
    pub fn new(config: MtnMomoConfig) -> Result<Self, WalletError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| WalletError::InvalidConfig {
                message: format!("failed to build MoMo HTTP client: {}", e),
            })?;

        Ok(Self {
            collection_token: TokenCache::new("collection", config.token_expiry_margin),
            disbursement_token: TokenCache::new("disbursement", config.token_expiry_margin),
            config,
            client,
        })
    }

    fn credentials(&self, product: Product) -> &ProductCredentials {
        match product {
            Product::Collection => &self.config.collection,
            Product::Disbursement => &self.config.disbursement,
        }
    }

    fn token_cache(&self, product: Product) -> &TokenCache {
        match product {
            Product::Collection => &self.collection_token,
            Product::Disbursement => &self.disbursement_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_token(&self, product: Product) -> Result<(String, Duration), ProviderError> {
        let credentials = self.credentials(product);
        let url = self.url(&format!("{}/token/", product.segment()));

        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.api_user, Some(&credentials.api_key))
            .header(SUBSCRIPTION_KEY_HEADER, &credentials.subscription_key)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(product = product.segment(), %status, "token request refused");
            return Err(ProviderError::unavailable(format!(
                "token request for {} failed with HTTP {}: {}",
                product.segment(),
                status,
                body
            )));
        }

        let token = response.json::<TokenResponse>().await.map_err(|e| {
            ProviderError::unavailable(format!("malformed token response: {}", e))
        })?;

        Ok((token.access_token, Duration::from_secs(token.expires_in)))
    }

    async fn access_token(&self, product: Product) -> Result<String, ProviderError> {
        self.token_cache(product)
            .get_or_fetch(|| self.fetch_token(product))
            .await
    }

    /// Send an authorized request, re-acquiring the token once on a 401
    async fn send_authorized<F>(&self, product: Product, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let mut refreshed = false;
        loop {
            let token = self.access_token(product).await?;
            let response = build(&token)
                .header(SUBSCRIPTION_KEY_HEADER, &self.credentials(product).subscription_key)
                .header(TARGET_ENVIRONMENT_HEADER, &self.config.target_environment)
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                debug!(product = product.segment(), "access token refused, refreshing");
                self.token_cache(product).invalidate(&token).await;
                refreshed = true;
                continue;
            }

            return Ok(response);
        }
    }

    async fn submit(&self, product: Product, request: &ProviderRequest) -> Result<(), ProviderError> {
        let party = Party {
            party_id_type: "MSISDN",
            party_id: &request.msisdn,
        };
        let (payer, payee) = match product {
            Product::Collection => (Some(party), None),
            Product::Disbursement => (None, Some(party)),
        };
        let body = MoneyRequestBody {
            amount: request.currency.format_amount(request.amount),
            currency: request.currency.code(),
            external_id: &request.external_id,
            payer,
            payee,
            payer_message: &request.payer_message,
            payee_note: &request.payee_note,
        };

        let url = self.url(&format!("{}/v1_0/{}", product.segment(), product.resource()));
        let reference = request.reference.to_string();

        let response = self
            .send_authorized(product, |token| {
                let builder = self
                    .client
                    .post(&url)
                    .bearer_auth(token)
                    .header(REFERENCE_HEADER, &reference)
                    .json(&body);
                match &self.config.callback_url {
                    Some(callback) => builder.header(CALLBACK_HEADER, callback),
                    None => builder,
                }
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(
                product = product.segment(),
                reference = %request.reference,
                "request accepted by MoMo"
            );
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            info!(
                product = product.segment(),
                reference = %request.reference,
                "reference already known to MoMo, treating as accepted"
            );
            return Ok(());
        }

        Err(classify_failure(status, response).await)
    }
}

#[async_trait]
impl PaymentProvider for MtnMomoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MtnMomo
    }

    async fn request_deposit(&self, request: &ProviderRequest) -> Result<(), ProviderError> {
        self.submit(Product::Collection, request).await
    }

    async fn request_withdrawal(&self, request: &ProviderRequest) -> Result<(), ProviderError> {
        self.submit(Product::Disbursement, request).await
    }

    async fn get_status(
        &self,
        reference: ProviderReference,
        kind: TransactionKind,
    ) -> Result<ProviderStatus, ProviderError> {
        let product = Product::for_kind(kind)
            .ok_or_else(|| ProviderError::rejected("transfers are settled internally"))?;
        let url = self.url(&format!(
            "{}/v1_0/{}/{}",
            product.segment(),
            product.resource(),
            reference
        ));

        let response = self
            .send_authorized(product, |token| self.client.get(&url).bearer_auth(token))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // Not visible yet (or lost); the reconciliation horizon decides
            warn!(%reference, "MoMo does not know the reference yet");
            return Ok(ProviderStatus::Pending);
        }
        if !status.is_success() {
            return Err(classify_failure(status, response).await);
        }

        let body = response.json::<StatusResponse>().await.map_err(|e| {
            ProviderError::unavailable(format!("malformed status response: {}", e))
        })?;
        let normalized = ProviderStatus::normalize(&body.status);
        debug!(%reference, raw = %body.status, status = %normalized, "MoMo status");

        Ok(normalized)
    }
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::unavailable(format!("request timed out: {}", error))
    } else {
        ProviderError::unavailable(format!("request failed: {}", error))
    }
}

async fn classify_failure(status: StatusCode, response: Response) -> ProviderError {
    let text = response.text().await.unwrap_or_default();

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        return ProviderError::unavailable(format!("HTTP {}: {}", status, text));
    }

    let parsed: ErrorResponse = serde_json::from_str(&text).unwrap_or_default();
    let reason = match (parsed.code, parsed.message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code,
        (None, Some(message)) => message,
        (None, None) if text.is_empty() => format!("HTTP {}", status),
        (None, None) => text,
    };

    ProviderError::rejected(reason)
}
