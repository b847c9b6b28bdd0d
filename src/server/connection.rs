//! Per-client connection handling.
//!
//! Each connection runs on its own task: read a framed request, dispatch
//! it, batch the reply into the write buffer. The subscribe family
//! switches the loop into subscriber mode, where the task multiplexes
//! socket reads with pub/sub deliveries; dropping the receivers on
//! disconnect is the deterministic unsubscribe.

use crate::Result;
use crate::commands::{CommandExecutor, ParsedCommand, dispatch};
use crate::protocol::{Frame, RespParser};
use crate::server::ClientState;
use crate::server::pubsub::PubSubMessage;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Responses batched before a flush.
const WRITE_BATCH_SIZE: usize = 64;

/// Bytes buffered before a forced flush.
const WRITE_BUFFER_HIGH_WATER: usize = 64 * 1024;

/// Poll interval for pub/sub deliveries in subscriber mode.
const PUBSUB_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A connection to a single client.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    peer_addr: SocketAddr,
    parser: RespParser,
    state: Arc<ClientState>,
    executor: Arc<CommandExecutor>,
    /// Read deadline; zero disables it
    read_timeout: Duration,
    write_buffer: BytesMut,
    pending_writes: usize,
}

impl Connection {
    /// Create a new connection handler.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: u64,
        executor: Arc<CommandExecutor>,
        timeout_secs: u32,
    ) -> Self {
        debug!(peer = %peer_addr, id, "new connection");

        Self {
            stream: BufWriter::new(stream),
            peer_addr,
            parser: RespParser::new(),
            state: Arc::new(ClientState::new(id)),
            executor,
            read_timeout: Duration::from_secs(u64::from(timeout_secs)),
            write_buffer: BytesMut::with_capacity(4096),
            pending_writes: 0,
        }
    }

    /// Run the connection until the peer disconnects or QUIT.
    pub async fn run(&mut self) -> Result<()> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if self.state.is_closed() {
                break;
            }

            // The deadline is refreshed for every request by re-arming the
            // timeout around each read.
            let n = if self.read_timeout.is_zero() {
                self.stream.get_mut().read(&mut read_buf).await?
            } else {
                match tokio::time::timeout(
                    self.read_timeout,
                    self.stream.get_mut().read(&mut read_buf),
                )
                .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!(peer = %self.peer_addr, "read deadline exceeded, closing");
                        break;
                    }
                }
            };

            if n == 0 {
                debug!(peer = %self.peer_addr, "connection closed by peer");
                break;
            }

            trace!(peer = %self.peer_addr, bytes = n, "read");
            self.parser.extend(&read_buf[..n]);

            loop {
                if self.state.is_closed() {
                    break;
                }
                match self.parser.parse() {
                    Ok(Some(frame)) => {
                        self.handle_frame(frame).await?;

                        if self.pending_writes >= WRITE_BATCH_SIZE
                            || self.write_buffer.len() >= WRITE_BUFFER_HIGH_WATER
                        {
                            self.flush_writes().await?;
                        }
                    }
                    Ok(None) => {
                        if self.pending_writes > 0 {
                            self.flush_writes().await?;
                        }
                        break;
                    }
                    Err(e) => {
                        let error_frame = Frame::error(format!("ERR {e}"));
                        self.queue_frame(&error_frame);
                        self.flush_writes().await?;
                        self.parser.clear();
                        break;
                    }
                }
            }
        }

        self.flush_writes().await?;
        Ok(())
    }

    /// Dispatch one frame. A subscribe-family command runs the subscriber
    /// loop to completion before this returns.
    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                let error_frame = Frame::error(e.to_wire_error());
                self.queue_frame(&error_frame);
                return Ok(());
            }
        };

        let id = dispatch::lookup_command(cmd.name.as_bytes());
        if dispatch::is_subscribe_family(id) {
            return self.run_subscriber_mode(cmd).await;
        }

        let response = self.executor.execute(cmd, self.state.clone()).await;
        self.queue_frame(&response);
        Ok(())
    }

    /// Subscriber mode: own the registered receivers and multiplex socket
    /// commands with message delivery until the last unsubscribe.
    async fn run_subscriber_mode(&mut self, initial: ParsedCommand) -> Result<()> {
        let mut channels: Vec<(Bytes, broadcast::Receiver<PubSubMessage>)> = Vec::new();
        let mut patterns: Vec<(Bytes, broadcast::Receiver<PubSubMessage>)> = Vec::new();

        self.apply_subscribe_command(&initial, &mut channels, &mut patterns);
        self.flush_writes().await?;

        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        while !(channels.is_empty() && patterns.is_empty()) {
            if self.state.is_closed() {
                break;
            }

            tokio::select! {
                result = self.stream.get_mut().read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!(peer = %self.peer_addr, "subscriber disconnected");
                            self.state.close();
                            break;
                        }
                        Ok(n) => {
                            self.parser.extend(&read_buf[..n]);
                            while let Ok(Some(frame)) = self.parser.parse() {
                                self.handle_subscriber_command(
                                    frame,
                                    &mut channels,
                                    &mut patterns,
                                );
                            }
                            self.flush_writes().await?;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                msg = Self::recv_any(&mut channels, &mut patterns) => {
                    if let Some(msg) = msg {
                        self.queue_delivery(&msg);
                        self.flush_writes().await?;
                    }
                }
            }
        }

        // Dropping the receivers here unsubscribes; reclaim empty routes
        let pubsub = self.executor.db().pubsub().clone();
        for (channel, receiver) in channels {
            drop(receiver);
            pubsub.unsubscribe(&channel);
        }
        for (pattern, receiver) in patterns {
            drop(receiver);
            pubsub.punsubscribe(&pattern);
        }

        Ok(())
    }

    /// Try to receive from any subscription; sleeps briefly when idle so
    /// the select loop stays bounded.
    async fn recv_any(
        channels: &mut [(Bytes, broadcast::Receiver<PubSubMessage>)],
        patterns: &mut [(Bytes, broadcast::Receiver<PubSubMessage>)],
    ) -> Option<PubSubMessage> {
        for (_, receiver) in channels.iter_mut().chain(patterns.iter_mut()) {
            match receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, messages dropped");
                    continue;
                }
                Err(_) => continue,
            }
        }

        tokio::time::sleep(PUBSUB_POLL_INTERVAL).await;
        None
    }

    /// Handle a command arriving while in subscriber mode.
    fn handle_subscriber_command(
        &mut self,
        frame: Frame,
        channels: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
        patterns: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
    ) {
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                let error_frame = Frame::error(e.to_wire_error());
                self.queue_frame(&error_frame);
                return;
            }
        };

        let id = dispatch::lookup_command(cmd.name.as_bytes());
        match id {
            _ if dispatch::is_subscribe_family(id) => {
                self.apply_subscribe_command(&cmd, channels, patterns);
            }
            dispatch::CommandId::Ping => {
                let reply = match cmd.args.first() {
                    Some(msg) => Frame::Bulk(msg.clone()),
                    None => Frame::pong(),
                };
                self.queue_frame(&reply);
            }
            dispatch::CommandId::Quit => {
                self.queue_frame(&Frame::ok());
                self.state.close();
            }
            _ => {
                let error = Frame::error(format!(
                    "ERR Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT \
                     are allowed in this context",
                    cmd.name
                ));
                self.queue_frame(&error);
            }
        }
    }

    /// Apply SUBSCRIBE/UNSUBSCRIBE/PSUBSCRIBE/PUNSUBSCRIBE, queuing one
    /// confirmation frame per channel or pattern.
    fn apply_subscribe_command(
        &mut self,
        cmd: &ParsedCommand,
        channels: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
        patterns: &mut Vec<(Bytes, broadcast::Receiver<PubSubMessage>)>,
    ) {
        let pubsub = self.executor.db().pubsub().clone();
        let count = |channels: &Vec<_>, patterns: &Vec<_>| {
            (channels.len() + patterns.len()) as i64
        };

        match cmd.name.as_str() {
            "SUBSCRIBE" => {
                for channel_bytes in &cmd.args {
                    let channel = channel_bytes.clone();
                    if !channels.iter().any(|(c, _)| c == &channel) {
                        let receiver = pubsub.subscribe(channel.clone());
                        channels.push((channel.clone(), receiver));
                    }
                    let frame = Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"subscribe")),
                        Frame::Bulk(channel),
                        Frame::Integer(count(channels, patterns)),
                    ]);
                    self.queue_frame(&frame);
                }
            }
            "PSUBSCRIBE" => {
                for pattern_bytes in &cmd.args {
                    let pattern = pattern_bytes.clone();
                    if !patterns.iter().any(|(p, _)| p == &pattern) {
                        let receiver = pubsub.psubscribe(pattern.clone());
                        patterns.push((pattern.clone(), receiver));
                    }
                    let frame = Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"psubscribe")),
                        Frame::Bulk(pattern),
                        Frame::Integer(count(channels, patterns)),
                    ]);
                    self.queue_frame(&frame);
                }
            }
            "UNSUBSCRIBE" => {
                let targets: Vec<Bytes> = if cmd.args.is_empty() {
                    channels.iter().map(|(c, _)| c.clone()).collect()
                } else {
                    cmd.args.clone()
                };
                for channel in targets {
                    if let Some(pos) = channels.iter().position(|(c, _)| c == &channel) {
                        channels.remove(pos);
                        pubsub.unsubscribe(&channel);
                    }
                    let frame = Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"unsubscribe")),
                        Frame::Bulk(channel),
                        Frame::Integer(count(channels, patterns)),
                    ]);
                    self.queue_frame(&frame);
                }
            }
            "PUNSUBSCRIBE" => {
                let targets: Vec<Bytes> = if cmd.args.is_empty() {
                    patterns.iter().map(|(p, _)| p.clone()).collect()
                } else {
                    cmd.args.clone()
                };
                for pattern in targets {
                    if let Some(pos) = patterns.iter().position(|(p, _)| p == &pattern) {
                        patterns.remove(pos);
                        pubsub.punsubscribe(&pattern);
                    }
                    let frame = Frame::Array(vec![
                        Frame::Bulk(Bytes::from_static(b"punsubscribe")),
                        Frame::Bulk(pattern),
                        Frame::Integer(count(channels, patterns)),
                    ]);
                    self.queue_frame(&frame);
                }
            }
            _ => unreachable!("caller checked subscribe family"),
        }
    }

    /// Queue a pub/sub delivery frame.
    fn queue_delivery(&mut self, msg: &PubSubMessage) {
        let frame = match &msg.pattern {
            Some(pattern) => Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"pmessage")),
                Frame::Bulk(pattern.clone()),
                Frame::Bulk(msg.channel.clone()),
                Frame::Bulk(msg.payload.clone()),
            ]),
            None => Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"message")),
                Frame::Bulk(msg.channel.clone()),
                Frame::Bulk(msg.payload.clone()),
            ]),
        };
        self.queue_frame(&frame);
    }

    /// Queue a frame for writing (batched).
    fn queue_frame(&mut self, frame: &Frame) {
        frame.serialize(&mut self.write_buffer);
        self.pending_writes += 1;
    }

    /// Flush all pending writes to the socket.
    async fn flush_writes(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        self.write_buffer.clear();
        self.pending_writes = 0;

        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("id", &self.state.id())
            .finish()
    }
}
