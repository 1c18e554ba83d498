use log::{debug, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GeneratorConfig;
use crate::traffic::probe::{self, ProbeHeader};
use crate::traffic::TrafficError;

/// Sends a fixed number of sequenced, timestamped UDP probes.
pub struct TrafficGenerator {
    config: GeneratorConfig,
    payload_len: usize,
    sent: Arc<AtomicU64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSummary {
    pub target: SocketAddr,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl TrafficGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, TrafficError> {
        config.validate()?;
        let payload_len = probe::payload_len(config.packet_size)?;

        Ok(Self {
            config,
            payload_len,
            sent: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub async fn resolve_target(&self) -> Result<SocketAddr, TrafficError> {
        let host = self.config.host.as_str();
        let mut addrs = lookup_host((host, self.config.port))
            .await
            .map_err(|source| TrafficError::Resolve {
                host: host.to_string(),
                source,
            })?;

        addrs.next().ok_or_else(|| TrafficError::HostNotFound(host.to_string()))
    }

    /// Runs to completion or until a shutdown message arrives.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<GeneratorSummary, TrafficError> {
        let target = self.resolve_target().await?;
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TrafficError::Bind { addr: local, source })?;

        let interval = self.config.send_interval();
        let mut buffer = vec![0u8; self.payload_len];
        let mut bytes_sent = 0u64;
        let mut cancelled = false;
        let started = Instant::now();

        info!(
            "[Generator] Sending {} packets of {} bytes to {} ({} pps)",
            self.config.packet_count, self.payload_len, target, self.config.frequency
        );

        for seq in 1..=self.config.packet_count {
            if shutdown_rx.try_recv().is_ok() {
                cancelled = true;
                break;
            }

            ProbeHeader::new(probe::unix_millis(), seq).encode_into(&mut buffer)?;
            let len = socket.send_to(&buffer, target).await.map_err(TrafficError::Send)?;

            bytes_sent += len as u64;
            self.sent.store(seq, Ordering::Relaxed);
            info!("[Generator] Packet {} sent", seq);

            if let Some(pause) = interval {
                // A closed channel is not a cancel: the arm disables itself on `None`.
                tokio::select! {
                    Some(()) = shutdown_rx.recv() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        let summary = GeneratorSummary {
            target,
            packets_sent: self.packets_sent(),
            bytes_sent,
            elapsed: started.elapsed(),
            cancelled,
        };

        if cancelled {
            warn!("[Generator] Cancelled after {} packets", summary.packets_sent);
        } else {
            debug!("[Generator] Done: {:?}", summary);
        }

        Ok(summary)
    }

    pub fn spawn(self) -> GeneratorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let sent = self.sent.clone();
        let total = self.config.packet_count;

        let join_handle = tokio::spawn(async move { self.run(shutdown_rx).await });

        GeneratorHandle {
            shutdown_tx,
            join_handle,
            sent,
            total,
        }
    }
}

/// Handle for a generator running as a background task.
pub struct GeneratorHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<Result<GeneratorSummary, TrafficError>>,
    sent: Arc<AtomicU64>,
    total: u64,
}

impl GeneratorHandle {
    /// Asks the generator to stop after the packet in flight.
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// (sent, total)
    pub fn progress(&self) -> (u64, u64) {
        (self.sent.load(Ordering::Relaxed), self.total)
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub async fn join(self) -> Result<GeneratorSummary, TrafficError> {
        match self.join_handle.await {
            Ok(result) => result,
            Err(e) => Err(TrafficError::TaskFailed(e.to_string())),
        }
    }
}
