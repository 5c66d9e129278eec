//! Ledger RPC collaborator
//!
//! Everything the probe engine needs from a cluster: submit a lightweight
//! transfer (with or without priority-fee instructions), poll a signature's
//! commitment, check whether a blockhash is still valid, and estimate a
//! recent priority fee. Transaction construction and signing live entirely
//! behind this boundary; the engine only orchestrates calls and timing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};

/// Amount moved by a probe transfer, in lamports. Kept minimal so the fee
/// payer balance lasts.
const PROBE_TRANSFER_LAMPORTS: u64 = 1;

/// Recent-fee lookup bounds.
const PRIORITY_FEE_FLOOR: u64 = 1;
const PRIORITY_FEE_CAP: u64 = 100_000_000;
const PRIORITY_FEE_SLOTS: usize = 100;

/// Raw error text from the RPC boundary. Classification happens in the
/// engine, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerError(pub String);

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for LedgerError {}

impl LedgerError {
    fn from_display(e: impl fmt::Display) -> Self {
        Self(e.to_string())
    }
}

/// Commitment level reported for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn is_confirmed(self) -> bool {
        self >= Commitment::Confirmed
    }
}

/// A submitted transaction plus the blockhash it was built against, so the
/// caller can treat blockhash expiry as a definitive outcome.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub signature: String,
    pub blockhash: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Estimate a compute-unit price from recently paid priority fees.
    async fn recent_priority_fee(&self) -> Result<u64, LedgerError>;

    /// Submit a plain transfer, bounded by `timeout`.
    async fn submit_transfer(&self, timeout: Duration) -> Result<String, LedgerError>;

    /// Submit a transfer carrying compute-budget instructions.
    async fn submit_priority_transfer(
        &self,
        compute_unit_price: u64,
        compute_unit_limit: u32,
        timeout: Duration,
    ) -> Result<SubmittedTx, LedgerError>;

    /// Current commitment of a signature, `None` when the node has no record.
    async fn signature_status(&self, signature: &str) -> Result<Option<Commitment>, LedgerError>;

    /// Whether the given blockhash is still usable for new transactions.
    async fn is_blockhash_valid(&self, blockhash: &str) -> Result<bool, LedgerError>;
}

/// `LedgerClient` over a Solana JSON-RPC endpoint.
pub struct SolanaLedgerClient {
    rpc: Arc<RpcClient>,
    keypair: Arc<Keypair>,
    receiver: Pubkey,
}

impl SolanaLedgerClient {
    /// `receiver` defaults to the fee payer itself (self-transfer) when the
    /// configuration names no receiver.
    pub fn new(rpc: Arc<RpcClient>, keypair: Arc<Keypair>, receiver: Option<Pubkey>) -> Self {
        let receiver = receiver.unwrap_or_else(|| keypair.pubkey());
        Self {
            rpc,
            keypair,
            receiver,
        }
    }

    pub fn url(&self) -> String {
        self.rpc.url()
    }

    async fn sign_and_send(
        &self,
        instructions: &[Instruction],
        timeout: Duration,
    ) -> Result<(Signature, Hash), LedgerError> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(LedgerError::from_display)?;
        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.keypair.pubkey()),
            &[self.keypair.as_ref()],
            blockhash,
        );
        let send = self.rpc.send_transaction(&tx);
        let signature = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| {
                LedgerError(format!(
                    "transaction submit timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(LedgerError::from_display)?;
        Ok((signature, blockhash))
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    async fn recent_priority_fee(&self) -> Result<u64, LedgerError> {
        let mut fees = self
            .rpc
            .get_recent_prioritization_fees(&[self.keypair.pubkey()])
            .await
            .map_err(LedgerError::from_display)?;
        // Newest slots first, max paid fee over the most recent window.
        fees.sort_by(|a, b| b.slot.cmp(&a.slot));
        let mut price = PRIORITY_FEE_FLOOR;
        for fee in fees.iter().take(PRIORITY_FEE_SLOTS) {
            if fee.prioritization_fee > price {
                price = fee.prioritization_fee;
            }
            if price > PRIORITY_FEE_CAP {
                price = PRIORITY_FEE_CAP;
                break;
            }
        }
        Ok(price)
    }

    async fn submit_transfer(&self, timeout: Duration) -> Result<String, LedgerError> {
        let transfer = system_instruction::transfer(
            &self.keypair.pubkey(),
            &self.receiver,
            PROBE_TRANSFER_LAMPORTS,
        );
        let (signature, _) = self.sign_and_send(&[transfer], timeout).await?;
        Ok(signature.to_string())
    }

    async fn submit_priority_transfer(
        &self,
        compute_unit_price: u64,
        compute_unit_limit: u32,
        timeout: Duration,
    ) -> Result<SubmittedTx, LedgerError> {
        let instructions = [
            ComputeBudgetInstruction::set_compute_unit_limit(compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(compute_unit_price),
            system_instruction::transfer(
                &self.keypair.pubkey(),
                &self.receiver,
                PROBE_TRANSFER_LAMPORTS,
            ),
        ];
        let (signature, blockhash) = self.sign_and_send(&instructions, timeout).await?;
        Ok(SubmittedTx {
            signature: signature.to_string(),
            blockhash: blockhash.to_string(),
        })
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<Commitment>, LedgerError> {
        let signature = Signature::from_str(signature).map_err(LedgerError::from_display)?;
        let response = self
            .rpc
            .get_signature_statuses(&[signature])
            .await
            .map_err(LedgerError::from_display)?;
        let status = response.value.into_iter().next().flatten();
        Ok(status.map(|s| {
            if s.satisfies_commitment(CommitmentConfig::finalized()) {
                Commitment::Finalized
            } else if s.satisfies_commitment(CommitmentConfig::confirmed()) {
                Commitment::Confirmed
            } else {
                Commitment::Processed
            }
        }))
    }

    async fn is_blockhash_valid(&self, blockhash: &str) -> Result<bool, LedgerError> {
        let hash = Hash::from_str(blockhash).map_err(LedgerError::from_display)?;
        self.rpc
            .is_blockhash_valid(&hash, CommitmentConfig::processed())
            .await
            .map_err(LedgerError::from_display)
    }
}
