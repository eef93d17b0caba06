pub mod p2p;
pub mod wire;

pub use p2p::{NetEvent, P2pConfig, P2pHandle, P2pService, PeerId};
pub use wire::{read_frame, write_frame, Hello, Message, NetError, MAX_FRAME_SIZE};
