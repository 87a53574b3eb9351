//! Plaintext TCP listener

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::parser::{parse_line, ParsedMetric};
use super::FilterStats;
use crate::runtime::Shutdown;
use crate::store::Clock;

/// Accept connections until shutdown, forwarding parsed points
pub async fn serve(
    listener: TcpListener,
    points: mpsc::Sender<ParsedMetric>,
    clock: Arc<dyn Clock>,
    stats: Arc<FilterStats>,
    mut shutdown: Shutdown,
) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "Filter listening"),
        Err(e) => tracing::warn!(error = %e, "Filter listening on unknown address"),
    }

    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let points = points.clone();
                        let clock = clock.clone();
                        let stats = stats.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, points, clock, stats, shutdown).await;
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Accept failed"),
                }
            }
            _ = shutdown.wait() => {
                tracing::info!("Filter listener shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    points: mpsc::Sender<ParsedMetric>,
    clock: Arc<dyn Clock>,
    stats: Arc<FilterStats>,
    mut shutdown: Shutdown,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.wait() => return,
        };
        match line {
            Ok(Some(line)) => {
                stats.received.fetch_add(1, Ordering::Relaxed);
                match parse_line(&line, clock.now_secs()) {
                    Ok(point) => {
                        if points.send(point).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        stats.invalid.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(peer = %peer, error = %e, "Dropping invalid line");
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Connection read failed");
                return;
            }
        }
    }
}
