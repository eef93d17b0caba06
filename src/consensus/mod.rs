pub mod block_validator;
pub mod proposer;
pub mod slots;

pub use block_validator::{apply_block, validate_block, BlockError, ChainTip};
pub use proposer::BlockProposer;
pub use slots::{proposer_index, slot_at, slot_start};
