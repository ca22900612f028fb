//! Echo server demonstrating the protocol core over plain TCP: one task
//! per accepted socket feeds inbound bytes and keepalive ticks into a
//! `Connection`, a writer task drains encoded frames back to the wire.

use std::time::Duration;

use anyhow::Result;
use futures::future::try_join;
use log::{error, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, timeout, Instant};
use uuid::Uuid;

use ws_tcptools::frame;
use ws_tcptools::{Config, Connection, Handler, Opcode, Transport};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const READ_BUFFER_SIZE: usize = 4096;

enum WriterEvent {
    Frame(Vec<u8>),
    Shutdown,
}

/// Bridges the connection's fire-and-forget writes onto the writer task.
struct ChannelTransport {
    sender: UnboundedSender<WriterEvent>,
}

impl Transport for ChannelTransport {
    fn write(&mut self, bytes: Vec<u8>) {
        // the writer task may already be gone during teardown
        let _ = self.sender.send(WriterEvent::Frame(bytes));
    }

    fn close(&mut self) {
        let _ = self.sender.send(WriterEvent::Shutdown);
    }
}

/// Echoes every decoded message back, re-framed as sent: text as a text
/// frame, binary as a binary frame.
struct EchoHandler {
    id: Uuid,
    sender: UnboundedSender<WriterEvent>,
}

impl EchoHandler {
    fn echo(&self, raw: Vec<u8>) {
        let _ = self.sender.send(WriterEvent::Frame(raw));
    }
}

impl Handler for EchoHandler {
    fn on_text(&mut self, message: &str) {
        info!("{} got a text message: {}", self.id, message);
        self.echo(frame::encode(message.as_bytes(), Opcode::Text, true, false));
    }

    fn on_bytes(&mut self, message: &[u8]) {
        info!("{} got a binary message of {} bytes", self.id, message.len());
        self.echo(frame::encode(message, Opcode::Binary, true, false));
    }
}

async fn write_frames<T>(mut writer: T, mut receiver: UnboundedReceiver<WriterEvent>) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    while let Some(event) = receiver.recv().await {
        match event {
            WriterEvent::Frame(bytes) => writer.write_all(&bytes).await?,
            WriterEvent::Shutdown => break,
        }
    }
    // bounded grace so the close frame can leave before the socket drops
    let _ = timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
    Ok(())
}

async fn read_stream<T>(
    mut reader: T,
    mut connection: Connection<ChannelTransport, EchoHandler>,
) -> Result<()>
where
    T: AsyncRead + Unpin,
{
    let mut ping_timer = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read? {
                0 => {
                    connection.peer_closed();
                    break;
                }
                n => connection.feed(&buf[..n]),
            },
            _ = ping_timer.tick() => connection.keepalive_tick(),
        }
        if connection.is_closed() {
            break;
        }
    }
    Ok(())
}

async fn handle_connection(stream: TcpStream) -> Result<()> {
    let id = Uuid::new_v4();
    info!("{} connected", id);

    let (reader, writer) = tokio::io::split(stream);
    let (sender, receiver) = unbounded_channel();

    let transport = ChannelTransport {
        sender: sender.clone(),
    };
    let handler = EchoHandler { id, sender };
    let config = Config {
        ping_interval: PING_INTERVAL,
        ..Config::default()
    };
    let connection = Connection::new(transport, handler, config);

    let write_future = write_frames(writer, receiver);
    let read_future = read_stream(reader, connection);
    try_join(write_future, read_future).await?;

    info!("{} disconnected", id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let addr = "127.0.0.1:8081";
    let listener = TcpListener::bind(addr).await?;
    info!("Listening at ws://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("new connection from {}", peer);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream).await {
                error!("error handling connection: {}", e);
            }
        });
    }
}
