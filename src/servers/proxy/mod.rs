pub mod packet;

use anyhow::Result;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::LimiterConfig;
use crate::network::bucket::now_millis;
use crate::network::read_framed_packet;
use crate::network::tracker::{Decision, RateTracker};
use crate::LimiterError;
use packet::build_kick_message;

/// How long a kicked client gets to drain its kick notice.
const KICK_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProxyState {
    /// session id → packet counter
    pub tracker: RateTracker<u32>,
    config: RwLock<LimiterConfig>,
    next_session: AtomicU32,
}

impl ProxyState {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            tracker: RateTracker::new(),
            config: RwLock::new(config),
            next_session: AtomicU32::new(1),
        }
    }

    /// Snapshot of the live config.
    pub fn config(&self) -> LimiterConfig {
        self.config.read().clone()
    }

    /// Allocate a session id and start counting its packets.
    pub fn open_session(&self) -> Result<u32, LimiterError> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        // Held across register so a concurrent reload either sees this
        // session or has already published its config.
        let config = self.config.read();
        self.tracker
            .register(id, config.interval_millis(), config.bucket_count)?;
        Ok(id)
    }

    pub fn close_session(&self, id: u32) {
        self.tracker.unregister(&id);
    }

    /// Count one packet from `id` and decide whether it may pass.
    pub fn check_packet(&self, id: u32) -> Decision {
        let max_rate = self.config.read().max_packet_rate;
        self.tracker.record_event(&id, now_millis(), 1, max_rate)
    }

    /// Swap in a new config and restart counting for every live session.
    pub fn reload(&self, config: LimiterConfig) -> Result<()> {
        config.validate()?;
        let (interval_ms, buckets) = (config.interval_millis(), config.bucket_count);

        let mut guard = self.config.write();
        *guard = config;
        // Keep readers of the new config blocked out of open_session until
        // the snapshot below is taken.
        let _config = RwLockWriteGuard::downgrade(guard);

        let mut reset = 0;
        for id in self.tracker.ids() {
            // Sessions closed since the snapshot stay closed.
            if self.tracker.reset(&id, interval_ms, buckets)? {
                reset += 1;
            }
        }
        tracing::info!(
            "[proxy] [reload] sessions={} interval={}ms buckets={}",
            reset,
            interval_ms,
            buckets
        );
        Ok(())
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        tracing::info!("[proxy] [ready] addr={}", bind_addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            let s = Arc::clone(&state);
            tokio::spawn(async move {
                ProxyState::handle_new_connection(s, stream, peer).await;
            });
        }
    }

    pub async fn handle_new_connection(state: Arc<Self>, client: TcpStream, peer: SocketAddr) {
        let upstream_addr = state.config.read().upstream_addr.clone();
        let upstream = match TcpStream::connect(&upstream_addr).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("[proxy] [upstream_failed] addr={} error={}", upstream_addr, e);
                return;
            }
        };

        let session_id = match state.open_session() {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("[proxy] [session_failed] addr={} error={}", peer, e);
                return;
            }
        };
        tracing::info!("[proxy] [connect] session={} addr={}", session_id, peer);

        let (mut client_read, mut client_write) = client.into_split();
        let (mut upstream_read, mut upstream_write) = upstream.into_split();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

        // Writer: everything bound for the client goes through here
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if client_write.write_all(&msg).await.is_err() {
                    break;
                }
            }
            let _ = client_write.shutdown().await;
        });

        // Upstream → client, unfiltered
        let down_tx = tx.clone();
        let mut downstream = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match upstream_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if down_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Client → upstream, one framed packet at a time
        let upstream_loop = async {
            loop {
                let pkt = match read_framed_packet(&mut client_read).await {
                    Ok(p) => p,
                    Err(_) => return None,
                };

                let decision = state.check_packet(session_id);
                if let Decision::ViolationJustNow { packets, interval_ms } = decision {
                    tracing::warn!(
                        "[proxy] [kick] Session {} ({}) was kicked for sending too many packets! {} in the last {:.1} seconds",
                        session_id,
                        peer,
                        packets,
                        interval_ms / 1000.0
                    );
                    return Some(build_kick_message(&state.config.read().kick_message));
                }
                if decision.should_drop() {
                    continue;
                }
                if upstream_write.write_all(&pkt).await.is_err() {
                    return None;
                }
            }
        };

        let kick = tokio::select! {
            kick = upstream_loop => kick,
            _ = &mut downstream => None,
        };

        state.close_session(session_id);

        // Stop upstream traffic before the kick notice so it is the last
        // thing the client sees.
        downstream.abort();
        let _ = downstream.await;
        drop(upstream_write);

        let kicked = kick.is_some();
        if let Some(notice) = kick {
            let _ = tx.send(notice).await;
        }
        drop(tx);
        if tokio::time::timeout(KICK_FLUSH_TIMEOUT, writer).await.is_err() {
            tracing::debug!("[proxy] [flush_timeout] session={}", session_id);
        }

        // Closing with unread input would reset the connection and could
        // discard the kick notice before the client reads it.
        if kicked {
            let _ = tokio::time::timeout(KICK_FLUSH_TIMEOUT, async {
                let mut sink = [0u8; 1024];
                while matches!(client_read.read(&mut sink).await, Ok(n) if n > 0) {}
            })
            .await;
        }

        tracing::info!("[proxy] [disconnect] session={}", session_id);
    }
}
