//! Relay loops behind each bridge type

use super::endpoint::{SerialReader, SerialWriter};
use super::BridgeStats;
use crate::error::HubError;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Chunks buffered per TCP client before it starts missing data
const FANOUT_CAPACITY: usize = 256;

type Chunk = Arc<[u8]>;

/// Copy one direction until the reader closes
async fn pump(
    mut reader: SerialReader,
    mut writer: SerialWriter,
    buffer_size: usize,
    counter: &AtomicU64,
) -> Result<(), HubError> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        BridgeStats::add(counter, n);
    }
}

/// Serial <-> serial; ends when either direction stops
pub(crate) async fn run_serial_bridge(
    first: (SerialReader, SerialWriter),
    second: (SerialReader, SerialWriter),
    stats: Arc<BridgeStats>,
    buffer_size: usize,
) {
    let (first_rx, first_tx) = first;
    let (second_rx, second_tx) = second;

    let result = tokio::select! {
        r = pump(first_rx, second_tx, buffer_size, &stats.rx) => r,
        r = pump(second_rx, first_tx, buffer_size, &stats.tx) => r,
    };

    match result {
        Ok(()) => info!("Serial bridge closed"),
        Err(e) => error!("Serial bridge failed: {}", e),
    }
}

/// Accept clients until the task is aborted; finished clients are reaped
async fn accept_loop<F>(listener: TcpListener, mut on_client: F)
where
    F: FnMut(&mut JoinSet<()>, TcpStream, SocketAddr),
{
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("Client connected from {}", addr);
                    on_client(&mut clients, stream, addr);
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
}

/// TCP loopback: whatever one client sends goes to every other client
pub(crate) async fn run_loopback(listener: TcpListener, stats: Arc<BridgeStats>, buffer_size: usize) {
    let (fanout, _) = broadcast::channel::<(u64, Chunk)>(FANOUT_CAPACITY);
    let mut next_client = 0u64;

    accept_loop(listener, move |clients, stream, addr| {
        next_client += 1;
        clients.spawn(loopback_client(
            next_client,
            addr,
            stream,
            fanout.clone(),
            Arc::clone(&stats),
            buffer_size,
        ));
    })
    .await;
}

async fn loopback_client(
    id: u64,
    addr: SocketAddr,
    stream: TcpStream,
    fanout: broadcast::Sender<(u64, Chunk)>,
    stats: Arc<BridgeStats>,
    buffer_size: usize,
) {
    let mut inbox = fanout.subscribe();
    let (mut rd, mut wr) = stream.into_split();
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            read = rd.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    BridgeStats::add(&stats.rx, n);
                    // No other clients is not an error; the data is dropped.
                    let _ = fanout.send((id, Arc::from(&buf[..n])));
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", addr, e);
                    break;
                }
            },
            message = inbox.recv() => match message {
                Ok((from, _)) if from == id => {}
                Ok((_, chunk)) => {
                    if let Err(e) = wr.write_all(&chunk).await {
                        warn!("Write to {} failed: {}", addr, e);
                        break;
                    }
                    BridgeStats::add(&stats.tx, chunk.len());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} fell behind, dropped {} chunks", addr, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Client {} disconnected", addr);
}

/// Serial <-> TCP: serial data fans out to all clients, client data goes
/// to the serial side
pub(crate) async fn run_tcp_serial(
    listener: TcpListener,
    endpoint: (SerialReader, SerialWriter),
    stats: Arc<BridgeStats>,
    buffer_size: usize,
) {
    let (reader, writer) = endpoint;
    let (fanout, _) = broadcast::channel::<Chunk>(FANOUT_CAPACITY);
    let writer = Arc::new(Mutex::new(writer));

    let serial = serial_to_clients(reader, fanout.clone(), Arc::clone(&stats), buffer_size);
    let clients = accept_loop(listener, move |clients, stream, addr| {
        clients.spawn(tcp_serial_client(
            addr,
            stream,
            fanout.subscribe(),
            Arc::clone(&writer),
            Arc::clone(&stats),
            buffer_size,
        ));
    });

    tokio::select! {
        result = serial => match result {
            Ok(()) => info!("Serial side closed, stopping TCP bridge"),
            Err(e) => error!("Serial side failed: {}", e),
        },
        _ = clients => {}
    }
}

async fn serial_to_clients(
    mut reader: SerialReader,
    fanout: broadcast::Sender<Chunk>,
    stats: Arc<BridgeStats>,
    buffer_size: usize,
) -> Result<(), HubError> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        BridgeStats::add(&stats.rx, n);
        if fanout.send(Arc::from(&buf[..n])).is_err() {
            debug!("No TCP clients, dropped {} bytes", n);
        }
    }
}

async fn tcp_serial_client(
    addr: SocketAddr,
    stream: TcpStream,
    mut inbox: broadcast::Receiver<Chunk>,
    writer: Arc<Mutex<SerialWriter>>,
    stats: Arc<BridgeStats>,
    buffer_size: usize,
) {
    let (mut rd, mut wr) = stream.into_split();
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            read = rd.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = writer.lock().await.write_all(&buf[..n]).await {
                        error!("Serial write for {} failed: {}", addr, e);
                        break;
                    }
                    BridgeStats::add(&stats.tx, n);
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", addr, e);
                    break;
                }
            },
            message = inbox.recv() => match message {
                Ok(chunk) => {
                    if let Err(e) = wr.write_all(&chunk).await {
                        warn!("Write to {} failed: {}", addr, e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} fell behind, dropped {} chunks", addr, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Client {} disconnected", addr);
}
