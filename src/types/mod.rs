use crate::crypto::{PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Height = u64;
pub type Slot = u64;
pub type Gas = u64;

/// 256-bit token amount (wei-like, 10^18 base units = 1 CPC).
pub type Amount = alloy_primitives::U256;

/// Number of base units per whole CPC.
pub const DECIMALS: u64 = 1_000_000_000_000_000_000;

/// Convenience constructor for whole-CPC amounts.
pub fn cpc(n: u64) -> Amount {
    Amount::from(n) * Amount::from(DECIMALS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn zero() -> Self { Self([0u8; 32]) }

    pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(b: &[u8]) -> Hash32 {
    let d = Sha256::digest(b);
    Hash32(d.into())
}

// ── Transactions ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    Stake,
    Unstake,
    UpdateValidator,
    Delegate,
    Undelegate,
    Unjail,
    SubmitResult,
}

impl TxType {
    /// Flat gas cost per transaction kind. There is no metered execution
    /// beyond the base cost.
    pub fn base_gas(&self) -> Gas {
        match self {
            TxType::Transfer => 21_000,
            TxType::Stake => 40_000,
            TxType::Unstake => 40_000,
            TxType::UpdateValidator => 30_000,
            TxType::Delegate => 35_000,
            TxType::Undelegate => 35_000,
            TxType::Unjail => 50_000,
            TxType::SubmitResult => 80_000,
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            TxType::Transfer => 0,
            TxType::Stake => 1,
            TxType::Unstake => 2,
            TxType::UpdateValidator => 3,
            TxType::Delegate => 4,
            TxType::Undelegate => 5,
            TxType::Unjail => 6,
            TxType::SubmitResult => 7,
        }
    }
}

/// Commitment to an off-chain compute result, delivered via SUBMIT_RESULT.
/// The worker subsystem that produces these is external; on-chain we only
/// record the commitment and use `weight` for miner-pool distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResult {
    pub task_id: String,
    pub worker: String,
    pub result_hash: Hash32,
    pub weight: u64,
}

/// Kind-specific transaction data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum TxPayload {
    #[default]
    None,
    /// STAKE / UNSTAKE / UNJAIL identify the validator by its consensus pubkey.
    ValidatorKey { pubkey: PublicKeyBytes },
    /// DELEGATE / UNDELEGATE name the validator consensus address directly.
    ValidatorTarget { validator: String },
    /// UPDATE_VALIDATOR metadata; absent fields are left unchanged.
    ValidatorUpdate {
        pubkey: PublicKeyBytes,
        name: Option<String>,
        website: Option<String>,
        description: Option<String>,
        commission_bps: Option<u32>,
    },
    ComputeResult(ComputeResult),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub tx_type: TxType,
    pub from: String,
    pub to: Option<String>,
    pub amount: Amount,
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: Gas,
    pub pubkey: PublicKeyBytes,
    pub signature: SignatureBytes,
    pub payload: TxPayload,
}

impl Tx {
    /// Canonical signing bytes over the unsigned fields, using a fixed binary
    /// format.
    ///
    /// Format: "CPC_TX" || type(1) || from_len(2 LE) || from ||
    ///         to_len(2 LE) || to || amount(32 BE) || nonce(8 LE) ||
    ///         gas_price(8 LE) || gas_limit(8 LE) ||
    ///         pubkey_len(2 LE) || pubkey || payload_len(4 LE) || payload
    ///
    /// The signature is intentionally excluded: the hash is over the content
    /// being signed and doubles as the transaction id.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let from = self.from.as_bytes();
        let to: &[u8] = self.to.as_deref().map(str::as_bytes).unwrap_or(b"");
        let payload = bincode::serialize(&self.payload).unwrap_or_default();
        let mut buf = Vec::with_capacity(
            6 + 1 + 2 + from.len() + 2 + to.len() + 32 + 8 * 3 + 2 + self.pubkey.0.len() + 4 + payload.len(),
        );
        buf.extend_from_slice(b"CPC_TX");
        buf.push(self.tx_type.discriminant());
        buf.extend_from_slice(&(from.len() as u16).to_le_bytes());
        buf.extend_from_slice(from);
        buf.extend_from_slice(&(to.len() as u16).to_le_bytes());
        buf.extend_from_slice(to);
        buf.extend_from_slice(&self.amount.to_be_bytes::<32>());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.gas_price.to_le_bytes());
        buf.extend_from_slice(&self.gas_limit.to_le_bytes());
        buf.extend_from_slice(&(self.pubkey.0.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.pubkey.0);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Transaction id: SHA-256 over the canonical signing bytes.
    pub fn hash(&self) -> Hash32 {
        hash_bytes(&self.sign_bytes())
    }
}

/// Merkle root over transaction ids.
pub fn tx_root(txs: &[Tx]) -> Hash32 {
    let leaves: Vec<Hash32> = txs.iter().map(Tx::hash).collect();
    crate::merkle::merkle_root(&leaves)
}

/// Merkle root over the compute-result commitments recorded in a block.
/// Zero when the block carries no SUBMIT_RESULT transactions.
pub fn compute_root(results: &[ComputeResult]) -> Hash32 {
    if results.is_empty() {
        return Hash32::zero();
    }
    let leaves: Vec<Hash32> = results
        .iter()
        .map(|r| hash_bytes(&bincode::serialize(r).unwrap_or_default()))
        .collect();
    crate::merkle::merkle_root(&leaves)
}

// ── Blocks ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    pub prev_hash: Hash32,
    /// Unix timestamp (seconds) of block proposal.
    pub timestamp: u64,
    /// Time slot this block was produced in, anchored to genesis time.
    pub slot: Slot,
    /// Consensus address (cpcvalcons…) of the proposer.
    pub proposer: String,
    pub tx_root: Hash32,
    pub state_root: Hash32,
    pub compute_root: Hash32,
    pub version: u32,
}

impl BlockHeader {
    /// Block hash: SHA-256 over the canonical header encoding.
    ///
    /// Format: "CPC_BLK" || height(8 LE) || prev(32) || timestamp(8 LE) ||
    ///         slot(8 LE) || proposer_len(2 LE) || proposer || tx_root(32) ||
    ///         state_root(32) || compute_root(32) || version(4 LE)
    pub fn hash(&self) -> Hash32 {
        let proposer = self.proposer.as_bytes();
        let mut buf = Vec::with_capacity(7 + 8 + 32 + 8 + 8 + 2 + proposer.len() + 32 * 3 + 4);
        buf.extend_from_slice(b"CPC_BLK");
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.prev_hash.0);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.slot.to_le_bytes());
        buf.extend_from_slice(&(proposer.len() as u16).to_le_bytes());
        buf.extend_from_slice(proposer);
        buf.extend_from_slice(&self.tx_root.0);
        buf.extend_from_slice(&self.state_root.0);
        buf.extend_from_slice(&self.compute_root.0);
        buf.extend_from_slice(&self.version.to_le_bytes());
        hash_bytes(&buf)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
    /// Proposer signature over the header hash.
    pub signature: SignatureBytes,
}

impl Block {
    pub fn id(&self) -> Hash32 {
        self.header.hash()
    }
}
