//! HTTP mapping for the gate error taxonomy.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::Serialize;

use tollgate::error::{GateError, PaymentError, RateLimitError, ValidationError};
use tollgate::pricing::Quote;
use tollgate::timestamp::UnixTimestamp;

/// Payment instructions attached to `PAYMENT_REQUIRED` responses so an
/// agent can settle and resubmit without further round-trips.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInstructions {
    /// Amount due in token units.
    pub amount: Decimal,
    /// Settlement token symbol.
    pub currency: String,
    /// Settlement network.
    pub network: &'static str,
    /// The service's receiving wallet.
    pub recipient: String,
    /// Mint of the accepted token.
    pub mint: String,
    /// Human hint; agents keep sending the native token otherwise.
    pub note: &'static str,
}

/// An admission or lookup failure, ready to serialize.
#[derive(Debug)]
pub struct ApiError {
    /// The underlying gate failure.
    pub error: GateError,
    /// Set on `PAYMENT_REQUIRED` responses.
    pub payment_instructions: Option<PaymentInstructions>,
    /// Current quote, included when instructions are.
    pub quote: Option<Quote>,
}

impl ApiError {
    /// Wraps a gate error with no payment context.
    #[must_use]
    pub fn new(error: impl Into<GateError>) -> Self {
        Self {
            error: error.into(),
            payment_instructions: None,
            quote: None,
        }
    }

    /// Builds a `PAYMENT_REQUIRED` rejection with settlement instructions.
    #[must_use]
    pub fn payment_required(
        free_tier_used: u32,
        quote: Quote,
        recipient: String,
        mint: String,
    ) -> Self {
        let instructions = PaymentInstructions {
            amount: quote.amount,
            currency: quote.currency.clone(),
            network: "solana",
            recipient,
            mint,
            note: "send the SPL token above, not SOL",
        };
        Self {
            error: PaymentError::Required { free_tier_used }.into(),
            payment_instructions: Some(instructions),
            quote: Some(quote),
        }
    }

    const fn status(&self) -> StatusCode {
        match &self.error {
            GateError::Validation(_) => StatusCode::BAD_REQUEST,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            GateError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            GateError::Upstream(_) | GateError::Delivery(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        Self::new(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::new(e)
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        Self::new(e)
    }
}

impl From<RateLimitError> for ApiError {
    fn from(e: RateLimitError) -> Self {
        Self::new(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pricing: Option<Quote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_instructions: Option<PaymentInstructions>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let rate = match &self.error {
            GateError::RateLimit(e) => Some((e.retry_after.as_secs().max(1), e.limit)),
            _ => None,
        };
        let retry_after = rate.map(|(secs, _)| secs);
        let errors = match &self.error {
            GateError::Validation(e) => Some(e.errors.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.error.code(),
            message: self.error.to_string(),
            errors,
            retry_after_secs: retry_after,
            pricing: self.quote,
            payment_instructions: self.payment_instructions,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some((secs, limit)) = rate {
            let reset = UnixTimestamp::now().as_secs().saturating_add(secs);
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
            if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert("x-ratelimit-limit", value);
            }
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            if let Ok(value) = HeaderValue::from_str(&reset.to_string()) {
                headers.insert("x-ratelimit-reset", value);
            }
        }
        response
    }
}
