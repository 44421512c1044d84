use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use solana_client::{
    client_error::ClientError, nonblocking::rpc_client::RpcClient, rpc_request::RpcRequest,
};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    instruction::{AccountMeta, Instruction, InstructionError},
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, TransactionError},
};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info, instrument, warn};

use crate::{
    chain::{
        throttle::RpcThrottle, EventDetail, EventRef, LedgerClient, SettlementReceipt,
        SettlementRequest,
    },
    error::{ChainError, SettlementError},
};

/// PDA seeds of the settlement program
pub const DAT_STATE_SEED: &[u8] = b"dat_v3";
pub const TOKEN_STATS_SEED: &[u8] = b"token_stats_v1";
pub const VALIDATOR_STATE_SEED: &[u8] = b"validator_v1";

/// Anchor custom error codes returned by `register_validated_fees` and
/// `sync_validator_slot`
pub const ERROR_STALE_VALIDATION: u32 = 6019;
pub const ERROR_SLOT_RANGE_TOO_LARGE: u32 = 6020;
pub const ERROR_VALIDATOR_NOT_STALE: u32 = 6021;

/// Commitment used for raw JSON-RPC reads, matches `CommitmentConfig::confirmed()`
const COMMITMENT: &str = "confirmed";

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub commitment: CommitmentConfig,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            program_id: Pubkey::from_str("ASDfNfUHwVGfrg3SV7SQYWhaVxnrCUZyWmMpWJAPu4MZ")
                .unwrap_or_default(),
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

/// On-chain validator state, minus the 8-byte account discriminator
#[derive(Debug, BorshDeserialize)]
struct ValidatorStateAccount {
    _mint: [u8; 32],
    _bonding_curve: [u8; 32],
    last_validated_slot: u64,
}

#[derive(BorshSerialize)]
struct RegisterValidatedFeesArgs {
    fee_amount: u64,
    end_slot: u64,
    tx_count: u32,
}

#[derive(Debug, Deserialize)]
struct SignatureInfo {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionJson {
    slot: u64,
    meta: Option<TransactionMetaJson>,
    transaction: TransactionBodyJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMetaJson {
    #[serde(default)]
    log_messages: Option<Vec<String>>,
    #[serde(default)]
    pre_balances: Vec<u64>,
    #[serde(default)]
    post_balances: Vec<u64>,
    #[serde(default)]
    loaded_addresses: Option<LoadedAddressesJson>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadedAddressesJson {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionBodyJson {
    message: MessageJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageJson {
    account_keys: Vec<String>,
}

/// Solana-backed ledger client for the fee settlement program
pub struct SolanaLedgerClient {
    config: SolanaConfig,
    client: RpcClient,
    throttle: RpcThrottle,
    signer: Option<Arc<Keypair>>,
}

impl SolanaLedgerClient {
    pub fn new(config: SolanaConfig, throttle: RpcThrottle, signer: Option<Keypair>) -> Self {
        let client = RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment);

        Self {
            config,
            client,
            throttle,
            signer: signer.map(Arc::new),
        }
    }

    fn parse_pubkey(value: &str) -> Result<Pubkey, ChainError> {
        Pubkey::from_str(value).map_err(|_| ChainError::InvalidAddress(value.to_string()))
    }

    fn validator_state_address(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[VALIDATOR_STATE_SEED, mint.as_ref()], &self.config.program_id)
            .0
    }

    fn token_stats_address(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[TOKEN_STATS_SEED, mint.as_ref()], &self.config.program_id).0
    }

    fn dat_state_address(&self) -> Pubkey {
        Pubkey::find_program_address(&[DAT_STATE_SEED], &self.config.program_id).0
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RpcRequest,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let method = request.to_string();
        self.throttle.acquire().await;
        self.client
            .send(request, params)
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))
    }

    fn register_fees_instruction(
        &self,
        payer: &Pubkey,
        request: &SettlementRequest,
    ) -> Result<Instruction, SettlementError> {
        let mint = Self::parse_pubkey(&request.entity_id)?;

        let args = RegisterValidatedFeesArgs {
            fee_amount: request.fee_amount,
            end_slot: request.end_marker,
            tx_count: request.event_count,
        };
        let mut data = instruction_discriminator("register_validated_fees").to_vec();
        data.extend(borsh::to_vec(&args).map_err(|e| ChainError::Decode {
            what: "instruction args".to_string(),
            message: e.to_string(),
        })?);

        Ok(Instruction {
            program_id: self.config.program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.dat_state_address(), false),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new(self.validator_state_address(&mint), false),
                AccountMeta::new(self.token_stats_address(&mint), false),
            ],
            data,
        })
    }

    fn sync_slot_instruction(
        &self,
        admin: &Pubkey,
        entity_id: &str,
    ) -> Result<Instruction, SettlementError> {
        let mint = Self::parse_pubkey(entity_id)?;

        Ok(Instruction {
            program_id: self.config.program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.dat_state_address(), false),
                AccountMeta::new(self.validator_state_address(&mint), false),
                AccountMeta::new_readonly(*admin, true),
            ],
            data: instruction_discriminator("sync_validator_slot").to_vec(),
        })
    }

    fn signer(&self) -> Result<&Arc<Keypair>, SettlementError> {
        self.signer.as_ref().ok_or_else(|| SettlementError::Rejected {
            code: None,
            message: "No signer keypair configured".to_string(),
        })
    }

    /// Sign `instruction` with the daemon keypair, send it and wait for
    /// confirmation. Preflight simulation runs as part of send, so program
    /// errors come back as structured transaction errors.
    async fn send_instruction(
        &self,
        signer: &Keypair,
        instruction: Instruction,
    ) -> Result<Signature, SettlementError> {
        self.throttle.acquire().await;
        let recent_blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to get blockhash: {}", e)))?;

        let message = Message::new(&[instruction], Some(&signer.pubkey()));
        let transaction = Transaction::new(&[signer], message, recent_blockhash);

        self.throttle.acquire().await;
        self.client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(classify_client_error)
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    async fn current_position(&self) -> Result<u64, ChainError> {
        self.throttle.acquire().await;
        self.client
            .get_slot()
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to get slot: {}", e)))
    }

    async fn last_settled_marker(&self, entity_id: &str) -> Result<u64, ChainError> {
        let mint = Self::parse_pubkey(entity_id)?;
        let address = self.validator_state_address(&mint);

        self.throttle.acquire().await;
        let account = self
            .client
            .get_account_with_commitment(&address, self.config.commitment)
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to read validator {}: {}", address, e)))?
            .value
            .ok_or_else(|| {
                ChainError::NotFound(format!("validator state {} for {}", address, entity_id))
            })?;

        decode_last_validated_slot(&account.data)
    }

    async fn list_recent_activity(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<EventRef>, ChainError> {
        Self::parse_pubkey(source)?;

        let signatures: Vec<SignatureInfo> = self
            .send(
                RpcRequest::GetSignaturesForAddress,
                json!([source, { "limit": limit, "commitment": COMMITMENT }]),
            )
            .await?;

        Ok(signatures
            .into_iter()
            .map(|info| EventRef {
                id: info.signature,
                marker: info.slot,
                failed: info.err.is_some_and(|e| !e.is_null()),
            })
            .collect())
    }

    async fn event_detail(&self, event: &EventRef) -> Result<Option<EventDetail>, ChainError> {
        let transaction: Option<TransactionJson> = self
            .send(
                RpcRequest::GetTransaction,
                json!([
                    event.id,
                    {
                        "encoding": "json",
                        "commitment": COMMITMENT,
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        Ok(transaction.map(|tx| into_event_detail(&event.id, tx)))
    }

    #[instrument(skip(self, request), fields(entity = %request.entity_id, end_marker = request.end_marker))]
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let signer = self.signer()?;
        let instruction = self.register_fees_instruction(&signer.pubkey(), request)?;

        debug!(
            "Submitting register_validated_fees: {} lamports, {} events",
            request.fee_amount, request.event_count
        );
        let signature = self.send_instruction(signer, instruction).await?;

        info!("✓ Settlement confirmed: {}", signature);
        Ok(SettlementReceipt {
            transaction_id: signature.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn sync_marker(&self, entity_id: &str) -> Result<bool, SettlementError> {
        let signer = self.signer()?;
        let instruction = self.sync_slot_instruction(&signer.pubkey(), entity_id)?;

        let synced = sync_outcome(self.send_instruction(signer, instruction).await)?;
        if synced {
            info!("✓ Validator slot synced for {}", entity_id);
        }
        Ok(synced)
    }
}

/// Anchor instruction discriminator: first 8 bytes of sha256("global:<name>")
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn decode_last_validated_slot(data: &[u8]) -> Result<u64, ChainError> {
    let body = data.get(8..).ok_or_else(|| ChainError::Decode {
        what: "validator state".to_string(),
        message: format!("account too short ({} bytes)", data.len()),
    })?;

    let state = ValidatorStateAccount::deserialize(&mut &body[..]).map_err(|e| {
        ChainError::Decode {
            what: "validator state".to_string(),
            message: e.to_string(),
        }
    })?;

    Ok(state.last_validated_slot)
}

fn into_event_detail(id: &str, tx: TransactionJson) -> EventDetail {
    let meta = tx.meta;
    let mut account_keys = tx.transaction.message.account_keys;

    let (log_lines, pre_balances, post_balances) = match meta {
        Some(meta) => {
            // Balance snapshots cover static keys, then loaded writable, then loaded readonly
            let loaded = meta.loaded_addresses.unwrap_or_default();
            account_keys.extend(loaded.writable);
            account_keys.extend(loaded.readonly);
            (
                meta.log_messages.unwrap_or_default(),
                meta.pre_balances,
                meta.post_balances,
            )
        }
        None => (Vec::new(), Vec::new(), Vec::new()),
    };

    EventDetail {
        id: id.to_string(),
        marker: tx.slot,
        log_lines,
        account_keys,
        pre_balances,
        post_balances,
    }
}

/// Map a send failure onto the settlement taxonomy by program error code
fn classify_client_error(error: ClientError) -> SettlementError {
    match error.get_transaction_error() {
        Some(tx_error) => classify_transaction_error(tx_error),
        None => {
            warn!("Settlement transport failure: {}", error);
            SettlementError::Transport(ChainError::Rpc(error.to_string()))
        }
    }
}

fn classify_transaction_error(error: TransactionError) -> SettlementError {
    match error {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
            classify_program_error(code)
        }
        other => SettlementError::Rejected {
            code: None,
            message: other.to_string(),
        },
    }
}

/// `ValidatorNotStale` means the marker is already recent; nothing to do
fn sync_outcome<T>(result: Result<T, SettlementError>) -> Result<bool, SettlementError> {
    match result {
        Ok(_) => Ok(true),
        Err(SettlementError::Rejected {
            code: Some(ERROR_VALIDATOR_NOT_STALE),
            ..
        }) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn classify_program_error(code: u32) -> SettlementError {
    match code {
        ERROR_STALE_VALIDATION => SettlementError::StaleSettlement,
        ERROR_SLOT_RANGE_TOO_LARGE => SettlementError::WindowExceeded,
        code => SettlementError::Rejected {
            code: Some(code),
            message: format!("custom program error: {:#x}", code),
        },
    }
}
