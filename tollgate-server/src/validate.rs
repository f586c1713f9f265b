//! Request body validation and callback-target screening.

use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;
use url::{Host, Url};

use tollgate::error::ValidationError;
use tollgate::types::{AgentId, ServiceKind, TxReference};

/// File extensions the processor accepts.
const MEDIA_EXTENSIONS: [&str; 5] = ["mp3", "wav", "m4a", "ogg", "webm"];

/// Hostnames that resolve to cloud instance metadata services.
const METADATA_HOSTS: [&str; 2] = ["169.254.169.254", "metadata.google.internal"];

/// Raw submission body, as deserialized from the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Caller-chosen identity the free tier and rate limits key on.
    pub agent_id: String,
    /// Where to fetch the media to process.
    pub resource_url: String,
    /// Where to push the result.
    pub callback_url: String,
    /// Present when the caller is paying rather than using the free tier.
    #[serde(default)]
    pub payment: Option<PaymentField>,
    /// Requests the priority operation at its higher price.
    #[serde(default)]
    pub priority: bool,
}

/// Payment reference attached to a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentField {
    /// Transaction signature of the settlement transfer.
    pub signature: String,
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub struct ValidRequest {
    /// Validated caller identity.
    pub agent: AgentId,
    /// Parsed media resource location.
    pub resource_url: Url,
    /// Parsed, screened callback target.
    pub callback_url: Url,
    /// Claimed payment reference, when one was supplied.
    pub reference: Option<TxReference>,
    /// The requested operation.
    pub kind: ServiceKind,
}

/// Validates submissions. All problems in a body are collected and
/// reported together, not one at a time.
#[derive(Debug, Clone, Copy)]
pub struct RequestValidator {
    allow_insecure_callbacks: bool,
}

impl RequestValidator {
    /// Creates a validator. `allow_insecure_callbacks` disables the
    /// HTTPS and private-network callback checks for local development.
    #[must_use]
    pub const fn new(allow_insecure_callbacks: bool) -> Self {
        Self {
            allow_insecure_callbacks,
        }
    }

    /// Validates a raw submission.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] listing every failed check.
    pub fn validate(&self, request: &JobRequest) -> Result<ValidRequest, ValidationError> {
        let mut errors = Vec::new();

        let agent = match AgentId::from_str(&request.agent_id) {
            Ok(agent) => Some(agent),
            Err(e) => {
                errors.push(format!("agent_id: {e}"));
                None
            }
        };

        let resource_url = match Url::parse(&request.resource_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if has_media_extension(&url) {
                    Some(url)
                } else {
                    errors.push(format!(
                        "resource_url: expected a media file ({})",
                        MEDIA_EXTENSIONS.join(", ")
                    ));
                    None
                }
            }
            Ok(_) => {
                errors.push("resource_url: must be http or https".to_owned());
                None
            }
            Err(e) => {
                errors.push(format!("resource_url: {e}"));
                None
            }
        };

        let callback_url = match Url::parse(&request.callback_url) {
            Ok(url) => {
                if let Some(problem) = self.screen_callback(&url) {
                    errors.push(format!("callback_url: {problem}"));
                    None
                } else {
                    Some(url)
                }
            }
            Err(e) => {
                errors.push(format!("callback_url: {e}"));
                None
            }
        };

        let reference = match &request.payment {
            Some(payment) if payment.signature.trim().is_empty() => {
                errors.push("payment.signature: must not be empty".to_owned());
                None
            }
            Some(payment) => Some(TxReference::new(payment.signature.trim())),
            None => None,
        };

        if !errors.is_empty() {
            return Err(ValidationError::from_errors(errors));
        }

        // Every None recorded an error above, so this arm is the only one.
        match (agent, resource_url, callback_url) {
            (Some(agent), Some(resource_url), Some(callback_url)) => Ok(ValidRequest {
                agent,
                resource_url,
                callback_url,
                reference,
                kind: if request.priority {
                    ServiceKind::Priority
                } else {
                    ServiceKind::Standard
                },
            }),
            _ => Err(ValidationError::new("invalid request")),
        }
    }

    /// Screens a callback target. Results are POSTed server-side, so a
    /// hostile callback URL is a request forgery vector: plain HTTP,
    /// loopback, private ranges and metadata endpoints are all refused.
    fn screen_callback(&self, url: &Url) -> Option<String> {
        if self.allow_insecure_callbacks {
            return match url.scheme() {
                "http" | "https" => None,
                other => Some(format!("unsupported scheme {other}")),
            };
        }

        if url.scheme() != "https" {
            return Some("must be https".to_owned());
        }

        match url.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.to_ascii_lowercase();
                if domain == "localhost"
                    || domain.ends_with(".localhost")
                    || domain.ends_with(".local")
                    || domain.ends_with(".internal")
                    || METADATA_HOSTS.contains(&domain.as_str())
                {
                    return Some("private or internal hosts are not allowed".to_owned());
                }
                None
            }
            Some(Host::Ipv4(ip)) => {
                if is_private_v4(ip) || METADATA_HOSTS.contains(&ip.to_string().as_str()) {
                    Some("private or internal addresses are not allowed".to_owned())
                } else {
                    None
                }
            }
            Some(Host::Ipv6(ip)) => {
                if ip.is_loopback() || ip.is_unspecified() || is_private_v6(ip) {
                    Some("private or internal addresses are not allowed".to_owned())
                } else {
                    None
                }
            }
            None => Some("missing host".to_owned()),
        }
    }
}

fn has_media_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}

fn is_private_v4(ip: std::net::Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: std::net::Ipv6Addr) -> bool {
    // Unique-local fc00::/7 and link-local fe80::/10.
    (ip.segments()[0] & 0xfe00) == 0xfc00 || (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Extracts the caller's network origin from proxy headers, preferring
/// the first hop recorded by the edge.
#[must_use]
pub fn client_origin(headers: &axum::http::HeaderMap) -> String {
    for name in ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() && IpAddr::from_str(first).is_ok() {
                    return first.to_owned();
                }
            }
        }
    }
    "unknown".to_owned()
}
