//! Wire protocol.
//!
//! Length-prefixed binary frames over TCP: a u32 big-endian payload length,
//! then a single-byte message-kind discriminant, then the bincode-encoded
//! body. Frames above `MAX_FRAME_SIZE` are rejected before the body is read.

use crate::types::{Block, Hash32, Height, Tx};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame, discriminant byte included.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("malformed frame body: {0}")]
    Malformed(String),
    #[error("genesis hash mismatch")]
    GenesisMismatch,
    #[error("peer timed out")]
    Timeout,
}

/// Session opener; both sides send one before anything else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub genesis_hash: Hash32,
    pub tip_height: Height,
    pub node_id: String,
    pub validator_addr: Option<String>,
    pub listen_port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Hello(Hello),
    Block(Box<Block>),
    Tx(Box<Tx>),
    GetBlocks { from: Height, to: Height },
    Blocks(Vec<Block>),
    Ping,
    Pong,
}

impl Message {
    fn kind(&self) -> u8 {
        match self {
            Message::Hello(_) => 1,
            Message::Block(_) => 2,
            Message::Tx(_) => 3,
            Message::GetBlocks { .. } => 4,
            Message::Blocks(_) => 5,
            Message::Ping => 6,
            Message::Pong => 7,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, NetError> {
        let body = match self {
            Message::Hello(h) => bincode::serialize(h),
            Message::Block(b) => bincode::serialize(b),
            Message::Tx(t) => bincode::serialize(t),
            Message::GetBlocks { from, to } => bincode::serialize(&(*from, *to)),
            Message::Blocks(bs) => bincode::serialize(bs),
            Message::Ping | Message::Pong => Ok(Vec::new()),
        };
        body.map_err(|e| NetError::Malformed(format!("{e}")))
    }

    fn decode(kind: u8, body: &[u8]) -> Result<Self, NetError> {
        let err = |e: bincode::Error| NetError::Malformed(format!("{e}"));
        Ok(match kind {
            1 => Message::Hello(bincode::deserialize(body).map_err(err)?),
            2 => Message::Block(Box::new(bincode::deserialize(body).map_err(err)?)),
            3 => Message::Tx(Box::new(bincode::deserialize(body).map_err(err)?)),
            4 => {
                let (from, to) = bincode::deserialize(body).map_err(err)?;
                Message::GetBlocks { from, to }
            }
            5 => Message::Blocks(bincode::deserialize(body).map_err(err)?),
            6 => Message::Ping,
            7 => Message::Pong,
            k => return Err(NetError::UnknownKind(k)),
        })
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<(), NetError> {
    let body = msg.encode_body()?;
    let len = (body.len() + 1) as u32;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(&[msg.kind()]).await?;
    w.write_all(&body).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, NetError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(NetError::Malformed("empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut kind = [0u8; 1];
    r.read_exact(&mut kind).await?;
    let mut body = vec![0u8; (len - 1) as usize];
    r.read_exact(&mut body).await?;
    Message::decode(kind[0], &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(msg: Message) -> Message {
        let (mut a, mut b) = tokio::io::duplex(MAX_FRAME_SIZE as usize);
        write_frame(&mut a, &msg).await.unwrap();
        read_frame(&mut b).await.unwrap()
    }

    #[tokio::test]
    async fn frames_roundtrip() {
        let hello = Message::Hello(Hello {
            genesis_hash: Hash32([9; 32]),
            tip_height: 12,
            node_id: "node-a".into(),
            validator_addr: Some("cpcvalcons1a".into()),
            listen_port: 7001,
        });
        assert_eq!(roundtrip(hello.clone()).await, hello);

        let get = Message::GetBlocks { from: 5, to: 20 };
        assert_eq!(roundtrip(get.clone()).await, get);

        assert_eq!(roundtrip(Message::Ping).await, Message::Ping);
        assert_eq!(roundtrip(Message::Pong).await, Message::Pong);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, NetError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &1u32.to_be_bytes()).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0xEEu8]).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, NetError::UnknownKind(0xEE)));
    }
}
