//! Solana chain access for tollgate.
//!
//! Two concerns live here, both behind seams the rest of the workspace can
//! mock:
//!
//! - [`rpc::RpcGateway`] — a healthy connection to the chain's read
//!   interface, with prioritized endpoints, health caching and
//!   retry/backoff over unreliable RPC providers.
//! - [`verify::PaymentVerifier`] — confirms that a claimed transaction
//!   contains a qualifying token transfer to the service's receiving
//!   account. Verification is side-effect free; replay consumption is the
//!   caller's responsibility.
//!
//! Raw RPC responses are normalized into [`record::TransactionRecord`], a
//! chain-view the verifier (and its tests) can work with directly.

pub mod error;
pub mod record;
pub mod rpc;
pub mod verify;

pub use error::ChainError;
pub use record::{TokenBalanceRow, TransactionRecord};
pub use rpc::{RpcGateway, RpcGatewayConfig};
pub use verify::{PaymentVerifier, TransactionSource, VerifierConfig};
