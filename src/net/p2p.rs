//! Peer-to-peer networking over plain TCP.
//!
//! Persistent sessions exchange length-framed messages (`wire`). A session
//! starts with a `Hello` in each direction; a peer whose genesis hash
//! differs from ours is disconnected immediately and blacklisted for a
//! while. Validated blocks and admitted transactions are re-broadcast once
//! to every peer except the sender, with a short-term dedup cache breaking
//! gossip loops.

use crate::net::wire::{read_frame, write_frame, Hello, Message, NetError};
use crate::types::{Block, Hash32, Height, Tx};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type PeerId = u64;

const DEDUP_CAPACITY: usize = 4096;
const PEER_CHANNEL_DEPTH: usize = 256;

#[derive(Clone, Debug)]
pub struct P2pConfig {
    pub listen: SocketAddr,
    pub node_id: String,
    pub genesis_hash: Hash32,
    pub validator_addr: Option<String>,
    /// Seed peer addresses (`host:port`).
    pub peers: Vec<String>,
    pub max_peers: usize,
    pub peer_io_timeout: Duration,
    pub blacklist_secs: u64,
    pub reconnect_secs: u64,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7001".parse().expect("static addr"),
            node_id: "cpc-node".into(),
            genesis_hash: Hash32::zero(),
            validator_addr: None,
            peers: vec![],
            max_peers: 50,
            peer_io_timeout: Duration::from_secs(120),
            blacklist_secs: 300,
            reconnect_secs: 30,
        }
    }
}

/// Inbound network events surfaced to the node loop.
#[derive(Debug)]
pub enum NetEvent {
    PeerConnected { peer: PeerId, addr: SocketAddr, hello: Hello },
    PeerDisconnected { peer: PeerId },
    BlockReceived { peer: PeerId, block: Box<Block> },
    TxReceived { peer: PeerId, tx: Box<Tx> },
    GetBlocks { peer: PeerId, from: Height, to: Height },
    BlocksRange { peer: PeerId, blocks: Vec<Block> },
}

enum Cmd {
    BroadcastBlock(Box<Block>, Option<PeerId>),
    BroadcastTx(Box<Tx>, Option<PeerId>),
    Send(PeerId, Message),
    TipUpdate(Height),
    Shutdown,
}

#[derive(Clone)]
pub struct P2pHandle {
    cmd: mpsc::Sender<Cmd>,
}

impl P2pHandle {
    pub async fn broadcast_block(&self, block: Block, except: Option<PeerId>) {
        let _ = self.cmd.send(Cmd::BroadcastBlock(Box::new(block), except)).await;
    }

    pub async fn broadcast_tx(&self, tx: Tx, except: Option<PeerId>) {
        let _ = self.cmd.send(Cmd::BroadcastTx(Box::new(tx), except)).await;
    }

    pub async fn request_blocks(&self, peer: PeerId, from: Height, to: Height) {
        let _ = self.cmd.send(Cmd::Send(peer, Message::GetBlocks { from, to })).await;
    }

    pub async fn send_blocks(&self, peer: PeerId, blocks: Vec<Block>) {
        let _ = self.cmd.send(Cmd::Send(peer, Message::Blocks(blocks))).await;
    }

    pub async fn tip_update(&self, height: Height) {
        let _ = self.cmd.send(Cmd::TipUpdate(height)).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd.send(Cmd::Shutdown).await;
    }
}

struct PeerSession {
    addr: SocketAddr,
    hello: Hello,
    writer: mpsc::Sender<Message>,
}

/// Recently seen block/tx hashes; bounded FIFO set.
struct DedupCache {
    set: HashSet<Hash32>,
    order: VecDeque<Hash32>,
}

impl DedupCache {
    fn new() -> Self {
        Self { set: HashSet::new(), order: VecDeque::new() }
    }

    /// Returns true when the hash was not seen before.
    fn insert(&mut self, h: Hash32) -> bool {
        if !self.set.insert(h) {
            return false;
        }
        self.order.push_back(h);
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

pub struct P2pService {
    cfg: P2pConfig,
    tip_height: Height,
    peers: HashMap<PeerId, PeerSession>,
    blacklist: HashMap<std::net::IpAddr, Instant>,
    dedup: DedupCache,
    next_peer_id: PeerId,
    events: mpsc::Sender<NetEvent>,
}

enum SessionMsg {
    Connected {
        peer: PeerId,
        addr: SocketAddr,
        hello: Hello,
        writer: mpsc::Sender<Message>,
        accepted: tokio::sync::oneshot::Sender<bool>,
    },
    Inbound { peer: PeerId, msg: Message },
    Closed { peer: PeerId },
    Rejected { addr: SocketAddr, reason: NetError },
}

impl P2pService {
    /// Spawn the networking stack. Returns the command handle and the
    /// inbound event stream.
    pub async fn spawn(
        mut cfg: P2pConfig,
    ) -> std::io::Result<(P2pHandle, mpsc::Receiver<NetEvent>, SocketAddr)> {
        let listener = TcpListener::bind(cfg.listen).await?;
        // Rebind to the resolved address so Hello advertises the real port
        // even when configured with port 0.
        cfg.listen = listener.local_addr()?;
        let local_addr = cfg.listen;
        info!(listen = %cfg.listen, "p2p listening");

        let (cmd_tx, cmd_rx) = mpsc::channel(PEER_CHANNEL_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(PEER_CHANNEL_DEPTH);
        let service = P2pService {
            cfg,
            tip_height: 0,
            peers: HashMap::new(),
            blacklist: HashMap::new(),
            dedup: DedupCache::new(),
            next_peer_id: 1,
            events: event_tx,
        };
        tokio::spawn(service.run(listener, cmd_rx));
        Ok((P2pHandle { cmd: cmd_tx }, event_rx, local_addr))
    }

    fn our_hello(&self) -> Hello {
        Hello {
            genesis_hash: self.cfg.genesis_hash,
            tip_height: self.tip_height,
            node_id: self.cfg.node_id.clone(),
            validator_addr: self.cfg.validator_addr.clone(),
            listen_port: self.cfg.listen.port(),
        }
    }

    async fn run(mut self, listener: TcpListener, mut cmd_rx: mpsc::Receiver<Cmd>) {
        let (session_tx, mut session_rx) = mpsc::channel::<SessionMsg>(PEER_CHANNEL_DEPTH);
        let mut redial = tokio::time::interval(Duration::from_secs(self.cfg.reconnect_secs.max(1)));
        let mut keepalive = tokio::time::interval(self.cfg.peer_io_timeout / 3);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.start_session(stream, addr, &session_tx),
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                Some(msg) = session_rx.recv() => {
                    self.on_session_msg(msg).await;
                }
                Some(cmd) = cmd_rx.recv() => {
                    if !self.on_cmd(cmd).await {
                        break;
                    }
                }
                _ = redial.tick() => {
                    self.dial_missing_peers(&session_tx);
                }
                _ = keepalive.tick() => {
                    for session in self.peers.values() {
                        let _ = session.writer.try_send(Message::Ping);
                    }
                }
            }
        }
        info!("p2p shut down");
    }

    fn is_blacklisted(&mut self, addr: &SocketAddr) -> bool {
        match self.blacklist.get(&addr.ip()) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                self.blacklist.remove(&addr.ip());
                false
            }
            None => false,
        }
    }

    fn start_session(
        &mut self,
        stream: TcpStream,
        addr: SocketAddr,
        session_tx: &mpsc::Sender<SessionMsg>,
    ) {
        if self.is_blacklisted(&addr) {
            debug!(%addr, "rejecting blacklisted peer");
            return;
        }
        if self.peers.len() >= self.cfg.max_peers {
            warn!(%addr, "peer limit reached; dropping connection");
            return;
        }
        let peer = self.next_peer_id;
        self.next_peer_id += 1;
        let hello = self.our_hello();
        let timeout = self.cfg.peer_io_timeout;
        let tx = session_tx.clone();
        tokio::spawn(run_session(stream, addr, peer, hello, timeout, tx));
    }

    fn dial_missing_peers(&mut self, session_tx: &mpsc::Sender<SessionMsg>) {
        let connected: HashSet<SocketAddr> = self.peers.values().map(|p| p.addr).collect();
        for addr_s in self.cfg.peers.clone() {
            let Ok(addr) = addr_s.parse::<SocketAddr>() else {
                warn!(addr = %addr_s, "bad peer address");
                continue;
            };
            if connected.contains(&addr) || self.is_blacklisted(&addr) {
                continue;
            }
            if self.peers.len() >= self.cfg.max_peers {
                break;
            }
            let peer = self.next_peer_id;
            self.next_peer_id += 1;
            let hello = self.our_hello();
            let timeout = self.cfg.peer_io_timeout;
            let tx = session_tx.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(stream)) => run_session(stream, addr, peer, hello, timeout, tx).await,
                    Ok(Err(e)) => debug!(%addr, "dial failed: {e}"),
                    Err(_) => debug!(%addr, "dial timed out"),
                }
            });
        }
    }

    async fn on_session_msg(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Connected { peer, addr, hello, writer, accepted } => {
                if hello.genesis_hash != self.cfg.genesis_hash {
                    // Different network. Cut the session and keep the peer
                    // out for a while.
                    warn!(%addr, "genesis hash mismatch; blacklisting peer");
                    self.blacklist.insert(
                        addr.ip(),
                        Instant::now() + Duration::from_secs(self.cfg.blacklist_secs),
                    );
                    let _ = accepted.send(false);
                    return;
                }
                info!(%addr, peer, tip = hello.tip_height, "peer connected");
                self.peers.insert(peer, PeerSession { addr, hello: hello.clone(), writer });
                let _ = accepted.send(true);
                let _ = self.events.send(NetEvent::PeerConnected { peer, addr, hello }).await;
            }
            SessionMsg::Closed { peer } => {
                if self.peers.remove(&peer).is_some() {
                    debug!(peer, "peer disconnected");
                    let _ = self.events.send(NetEvent::PeerDisconnected { peer }).await;
                }
            }
            SessionMsg::Rejected { addr, reason } => {
                debug!(%addr, "session rejected: {reason}");
            }
            SessionMsg::Inbound { peer, msg } => self.on_inbound(peer, msg).await,
        }
    }

    async fn on_inbound(&mut self, peer: PeerId, msg: Message) {
        if !self.peers.contains_key(&peer) {
            return;
        }
        match msg {
            Message::Block(block) => {
                if !self.dedup.insert(block.id()) {
                    return;
                }
                let _ = self.events.send(NetEvent::BlockReceived { peer, block }).await;
            }
            Message::Tx(tx) => {
                if !self.dedup.insert(tx.hash()) {
                    return;
                }
                let _ = self.events.send(NetEvent::TxReceived { peer, tx }).await;
            }
            Message::GetBlocks { from, to } => {
                let _ = self.events.send(NetEvent::GetBlocks { peer, from, to }).await;
            }
            Message::Blocks(blocks) => {
                let _ = self.events.send(NetEvent::BlocksRange { peer, blocks }).await;
            }
            Message::Ping => {
                if let Some(session) = self.peers.get(&peer) {
                    let _ = session.writer.try_send(Message::Pong);
                }
            }
            Message::Pong => {}
            Message::Hello(_) => {
                // A second Hello mid-session is protocol noise; ignore it.
            }
        }
    }

    async fn on_cmd(&mut self, cmd: Cmd) -> bool {
        match cmd {
            Cmd::BroadcastBlock(block, except) => {
                self.dedup.insert(block.id());
                self.broadcast(Message::Block(block), except);
            }
            Cmd::BroadcastTx(tx, except) => {
                self.dedup.insert(tx.hash());
                self.broadcast(Message::Tx(tx), except);
            }
            Cmd::Send(peer, msg) => {
                if let Some(session) = self.peers.get(&peer) {
                    let _ = session.writer.try_send(msg);
                }
            }
            Cmd::TipUpdate(height) => {
                self.tip_height = height;
            }
            Cmd::Shutdown => {
                self.peers.clear();
                return false;
            }
        }
        true
    }

    fn broadcast(&self, msg: Message, except: Option<PeerId>) {
        for (id, session) in &self.peers {
            if Some(*id) == except {
                continue;
            }
            let _ = session.writer.try_send(msg.clone());
        }
    }
}

/// One TCP session: exchange Hellos, then pump frames in both directions
/// until either side drops or the read side idles past the timeout.
async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    our_hello: Hello,
    io_timeout: Duration,
    session_tx: mpsc::Sender<SessionMsg>,
) {
    let (mut reader, mut writer) = stream.into_split();

    if let Err(e) = write_frame(&mut writer, &Message::Hello(our_hello)).await {
        let _ = session_tx.send(SessionMsg::Rejected { addr, reason: e }).await;
        return;
    }
    let their_hello = match tokio::time::timeout(io_timeout, read_frame(&mut reader)).await {
        Ok(Ok(Message::Hello(h))) => h,
        Ok(Ok(_)) => {
            let reason = NetError::Malformed("expected Hello".into());
            let _ = session_tx.send(SessionMsg::Rejected { addr, reason }).await;
            return;
        }
        Ok(Err(e)) => {
            let _ = session_tx.send(SessionMsg::Rejected { addr, reason: e }).await;
            return;
        }
        Err(_) => {
            let _ = session_tx.send(SessionMsg::Rejected { addr, reason: NetError::Timeout }).await;
            return;
        }
    };

    let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(PEER_CHANNEL_DEPTH);
    let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
    if session_tx
        .send(SessionMsg::Connected {
            peer,
            addr,
            hello: their_hello,
            writer: writer_tx,
            accepted: accepted_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    // The service vetoes sessions from foreign networks; close right away.
    if !matches!(accepted_rx.await, Ok(true)) {
        return;
    }

    let write_task = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if write_frame(&mut writer, &msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        match tokio::time::timeout(io_timeout, read_frame(&mut reader)).await {
            Ok(Ok(msg)) => {
                if session_tx.send(SessionMsg::Inbound { peer, msg }).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                debug!(%addr, "session read error: {e}");
                break;
            }
            Err(_) => {
                debug!(%addr, "session idle timeout");
                break;
            }
        }
    }

    write_task.abort();
    let _ = session_tx.send(SessionMsg::Closed { peer }).await;
}
