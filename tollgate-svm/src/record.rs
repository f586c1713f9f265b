//! Normalized view of a confirmed transaction.
//!
//! The verifier works on [`TransactionRecord`] rather than raw RPC response
//! types, so verification logic stays testable without a live endpoint and
//! the RPC decoding mess is contained to one conversion.

use rust_decimal::Decimal;
use solana_transaction_status_client_types::EncodedConfirmedTransactionWithStatusMeta;
use solana_transaction_status_client_types::UiTransactionTokenBalance;
use tollgate::timestamp::UnixTimestamp;

use crate::error::ChainError;

/// One owner's balance of one token mint, before or after the transaction.
#[derive(Debug, Clone)]
pub struct TokenBalanceRow {
    /// Owning wallet. Missing on some historical transactions.
    pub owner: Option<String>,
    /// Token mint address.
    pub mint: String,
    /// Balance in whole token units.
    pub amount: Decimal,
}

/// A confirmed transaction reduced to what payment verification needs.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Chain sequence number.
    pub slot: u64,
    /// Chain timestamp, when the node reported one.
    pub block_time: Option<UnixTimestamp>,
    /// Whether the transaction executed without error.
    pub succeeded: bool,
    /// Account addresses in balance-array order (static keys followed by
    /// any looked-up addresses).
    pub account_keys: Vec<String>,
    /// Native balances before execution, indexed like `account_keys`.
    pub pre_lamports: Vec<u64>,
    /// Native balances after execution, indexed like `account_keys`.
    pub post_lamports: Vec<u64>,
    /// Token balances before execution.
    pub pre_token: Vec<TokenBalanceRow>,
    /// Token balances after execution.
    pub post_token: Vec<TokenBalanceRow>,
}

impl TransactionRecord {
    /// Net change of `owner`'s balance in `mint` across the transaction.
    /// Positive means the owner received tokens.
    #[must_use]
    pub fn token_delta(&self, owner: &str, mint: &str) -> Decimal {
        let sum = |rows: &[TokenBalanceRow]| {
            rows.iter()
                .filter(|r| r.mint == mint && r.owner.as_deref() == Some(owner))
                .map(|r| r.amount)
                .sum::<Decimal>()
        };
        sum(&self.post_token) - sum(&self.pre_token)
    }

    /// Whether any balance row mentions `mint` at all, used to distinguish
    /// "wrong token" from "right token, wrong recipient" in diagnostics.
    #[must_use]
    pub fn mentions_mint(&self, mint: &str) -> bool {
        self.pre_token
            .iter()
            .chain(self.post_token.iter())
            .any(|r| r.mint == mint)
    }

    /// Best-effort payer identification: the account whose native (fee)
    /// balance decreased the most. Unreliable when a third party sponsors
    /// fees, so callers must treat this as informational only.
    #[must_use]
    pub fn infer_payer(&self) -> Option<String> {
        self.account_keys
            .iter()
            .zip(self.pre_lamports.iter().zip(self.post_lamports.iter()))
            .filter_map(|(key, (pre, post))| {
                let spent = pre.checked_sub(*post)?;
                (spent > 0).then_some((key, spent))
            })
            .max_by_key(|(_, spent)| *spent)
            .map(|(key, _)| key.clone())
    }
}

fn token_rows(balances: Vec<UiTransactionTokenBalance>) -> Result<Vec<TokenBalanceRow>, ChainError> {
    balances
        .into_iter()
        .map(|b| {
            let raw: i128 = b
                .ui_token_amount
                .amount
                .parse()
                .map_err(|_| ChainError::MalformedRecord("unparseable token amount".to_owned()))?;
            Ok(TokenBalanceRow {
                owner: Option::from(b.owner),
                mint: b.mint,
                amount: Decimal::from_i128_with_scale(raw, u32::from(b.ui_token_amount.decimals)),
            })
        })
        .collect()
}

impl TryFrom<EncodedConfirmedTransactionWithStatusMeta> for TransactionRecord {
    type Error = ChainError;

    fn try_from(tx: EncodedConfirmedTransactionWithStatusMeta) -> Result<Self, Self::Error> {
        let meta = tx
            .transaction
            .meta
            .ok_or_else(|| ChainError::MalformedRecord("transaction meta missing".to_owned()))?;
        let decoded = tx
            .transaction
            .transaction
            .decode()
            .ok_or_else(|| ChainError::MalformedRecord("undecodable transaction".to_owned()))?;

        let mut account_keys: Vec<String> = decoded
            .message
            .static_account_keys()
            .iter()
            .map(ToString::to_string)
            .collect();
        // Versioned transactions append looked-up addresses after the
        // static keys; balance arrays are indexed over the combined list.
        if let Some(loaded) = Option::from(meta.loaded_addresses) {
            let loaded: solana_transaction_status_client_types::UiLoadedAddresses = loaded;
            account_keys.extend(loaded.writable);
            account_keys.extend(loaded.readonly);
        }

        Ok(Self {
            slot: tx.slot,
            block_time: tx.block_time.map(UnixTimestamp::from_block_time),
            succeeded: meta.err.is_none(),
            account_keys,
            pre_lamports: meta.pre_balances,
            post_lamports: meta.post_balances,
            pre_token: token_rows(Option::from(meta.pre_token_balances).unwrap_or_default())?,
            post_token: token_rows(Option::from(meta.post_token_balances).unwrap_or_default())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(owner: &str, mint: &str, amount: Decimal) -> TokenBalanceRow {
        TokenBalanceRow {
            owner: Some(owner.to_owned()),
            mint: mint.to_owned(),
            amount,
        }
    }

    fn record() -> TransactionRecord {
        TransactionRecord {
            slot: 12345,
            block_time: Some(UnixTimestamp::from_secs(1_700_000_000)),
            succeeded: true,
            account_keys: vec!["payer".to_owned(), "service".to_owned(), "other".to_owned()],
            pre_lamports: vec![1_000_000, 500_000, 300_000],
            post_lamports: vec![995_000, 500_000, 299_000],
            pre_token: vec![
                row("payer", "USDC", Decimal::new(100, 2)),
                row("service", "USDC", Decimal::ZERO),
            ],
            post_token: vec![
                row("payer", "USDC", Decimal::new(75, 2)),
                row("service", "USDC", Decimal::new(25, 2)),
            ],
        }
    }

    #[test]
    fn token_delta_matches_transfer() {
        let r = record();
        assert_eq!(r.token_delta("service", "USDC"), Decimal::new(25, 2));
        assert_eq!(r.token_delta("payer", "USDC"), Decimal::new(-25, 2));
        assert_eq!(r.token_delta("service", "OTHER"), Decimal::ZERO);
        assert_eq!(r.token_delta("stranger", "USDC"), Decimal::ZERO);
    }

    #[test]
    fn infer_payer_picks_largest_fee_decrease() {
        // payer lost 5000 lamports, "other" lost 1000.
        assert_eq!(record().infer_payer().as_deref(), Some("payer"));
    }

    #[test]
    fn infer_payer_none_when_no_balance_dropped() {
        let mut r = record();
        r.post_lamports = r.pre_lamports.clone();
        assert_eq!(r.infer_payer(), None);
    }

    #[test]
    fn mentions_mint_sees_both_sides() {
        let r = record();
        assert!(r.mentions_mint("USDC"));
        assert!(!r.mentions_mint("BONK"));
    }
}
