mod token;
mod types;

use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;

pub use token::*;
pub use types::*;

use crate::error::GatewayError;
use crate::helpers::{provider_timestamp, stk_password, whole_units};

/// Something that can put a payment prompt on a customer's phone.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Initiates one payment. The returned response is always an accepted one;
    /// provider-side refusals come back as [`GatewayError::Rejected`].
    async fn initiate(&self, payer: &str, amount: Decimal)
    -> Result<StkPushResponse, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => Err(anyhow::anyhow!(
                "Unknown M-Pesa environment `{}`, expected `sandbox` or `production`",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub pass_key: String,
    pub business_short_code: String,
    pub environment: Environment,
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
    pub timeout: Duration,
    pub cache_token: bool,
}

pub struct MpesaClient {
    config: MpesaConfig,
    http: reqwest::Client,
    tokens: TokenCache,
    base_url: String,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> anyhow::Result<Self> {
        let base_url = config.environment.base_url().to_string();
        Self::with_base_url(config, base_url)
    }

    /// Points the client at a different host, e.g. a local stub of the provider.
    pub fn with_base_url(config: MpesaConfig, base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build M-Pesa HTTP client")?;
        Ok(Self {
            tokens: TokenCache::new(config.cache_token),
            config,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn business_short_code(&self) -> &str {
        &self.config.business_short_code
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.tokens.get(Instant::now()).await {
            return Ok(token);
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url
        );
        let response = self
            .http
            .get(url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Credentials(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Credentials(format!(
                "token endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Credentials(format!("invalid token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(GatewayError::Credentials(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        self.tokens
            .store(&token.access_token, token.expires_in_secs(), Instant::now())
            .await;
        Ok(token.access_token)
    }

    fn build_request(&self, payer: &str, units: u64, timestamp: String) -> StkPushRequest {
        let shortcode = &self.config.business_short_code;
        StkPushRequest {
            business_short_code: shortcode.clone(),
            password: stk_password(shortcode, &self.config.pass_key, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount: units.to_string(),
            party_a: payer.to_string(),
            party_b: shortcode.clone(),
            phone_number: payer.to_string(),
            call_back_url: self.config.callback_url.clone(),
            account_reference: self.config.account_reference.clone(),
            transaction_desc: self.config.transaction_desc.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn initiate(
        &self,
        payer: &str,
        amount: Decimal,
    ) -> Result<StkPushResponse, GatewayError> {
        if payer.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "payer identifier is empty".to_string(),
            ));
        }
        let units = whole_units(amount);
        if units == 0 {
            return Err(GatewayError::InvalidInput(format!(
                "amount {} has no whole currency units",
                amount
            )));
        }

        let token = self.access_token().await?;
        let request = self.build_request(payer, units, provider_timestamp(chrono::Utc::now()));
        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.base_url);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }

        let accepted = interpret_response(status, &body)?;
        log::debug!(
            "STK push accepted payer={} amount={} checkout_request_id={} merchant_request_id={}",
            payer,
            units,
            accepted.checkout_request_id,
            accepted.merchant_request_id
        );
        Ok(accepted)
    }
}

/// Maps a provider reply onto success or a structured failure. A 200 with a
/// non-zero `ResponseCode` is still a failure.
pub fn interpret_response(status: StatusCode, body: &[u8]) -> Result<StkPushResponse, GatewayError> {
    if !status.is_success() {
        return Err(match serde_json::from_slice::<ProviderErrorResponse>(body) {
            Ok(err) => GatewayError::Rejected {
                code: err.error_code,
                description: if err.request_id.is_empty() {
                    err.error_message
                } else {
                    format!("{} (request {})", err.error_message, err.request_id)
                },
            },
            Err(_) => GatewayError::Rejected {
                code: status.as_u16().to_string(),
                description: String::from_utf8_lossy(body).trim().to_string(),
            },
        });
    }

    let response: StkPushResponse =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if !response.is_accepted() {
        return Err(GatewayError::Rejected {
            code: response.response_code,
            description: response.response_description,
        });
    }
    if response.checkout_request_id.is_empty() {
        return Err(GatewayError::Decode(
            "accepted response carries no CheckoutRequestID".to_string(),
        ));
    }
    Ok(response)
}
