pub mod params;
pub mod rewards;
pub mod staking;
pub mod tracking;

pub use params::{ChainParams, BPS_DENOM, SCORE_SCALE, TREASURY_ADDRESS};
pub use staking::{Account, Delegation, RewardEntry, UnbondingEntry, Validator};
