use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analysis::{DelayRecorder, TrafficStatistics};
use crate::config::ReceiverConfig;
use crate::traffic::probe::{self, ProbeHeader};
use crate::traffic::TrafficError;

/// Listens for probes and measures loss, delay and throughput.
pub struct TrafficReceiver;

/// Live counters shown while the receiver runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverProgress {
    pub datagrams: u64,
    pub probes: u64,
    pub total_bytes: u64,
    pub last_sequence: Option<u64>,
    pub last_delay_ms: Option<i64>,
}

impl TrafficReceiver {
    /// Binds the socket and spawns the receive loop. Bind errors surface
    /// here rather than from the background task.
    pub async fn start(config: &ReceiverConfig) -> Result<ReceiverHandle, TrafficError> {
        let ip: IpAddr = config.bind_addr.parse().map_err(|_| {
            TrafficError::InvalidConfig(format!("bind address '{}' is not an IP address", config.bind_addr))
        })?;
        let addr = SocketAddr::new(ip, config.port);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TrafficError::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(TrafficError::Receive)?;

        // Total time is measured from here, not from the first probe.
        let recorder = Arc::new(Mutex::new(DelayRecorder::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        info!("[Receiver] Waiting for packets on {}...", local_addr);

        let loop_recorder = recorder.clone();
        let join_handle = tokio::spawn(async move { receive_loop(socket, loop_recorder, shutdown_rx).await });

        Ok(ReceiverHandle {
            local_addr,
            shutdown_tx,
            join_handle,
            recorder,
        })
    }
}

async fn receive_loop(
    socket: UdpSocket,
    recorder: Arc<Mutex<DelayRecorder>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<(), TrafficError> {
    let mut buf = vec![0u8; probe::MAX_DATAGRAM_LEN];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        error!("[Receiver] Error: {}", e);
                        return Err(TrafficError::Receive(e));
                    }
                };
                let receive_time_ms = probe::unix_millis();

                let mut rec = lock(&recorder);
                rec.record_datagram(len);

                match ProbeHeader::decode(&buf[..len]) {
                    Some(header) => {
                        let delay = header.delay_ms(receive_time_ms);
                        rec.record_probe(header.sequence, delay);
                        drop(rec);
                        info!("[Receiver] Packet #{}, delay: {} ms", header.sequence, delay);
                    }
                    None => debug!("[Receiver] Ignoring {} byte datagram from {}", len, peer),
                }
            }
        }
    }

    info!("[Receiver] Stopped.");
    Ok(())
}

fn lock(recorder: &Mutex<DelayRecorder>) -> MutexGuard<'_, DelayRecorder> {
    recorder.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for a running receive loop.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<Result<(), TrafficError>>,
    recorder: Arc<Mutex<DelayRecorder>>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the loop has exited, either stopped or failed.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub fn progress(&self) -> ReceiverProgress {
        let rec = lock(&self.recorder);
        ReceiverProgress {
            datagrams: rec.datagrams(),
            probes: rec.probes(),
            total_bytes: rec.total_bytes(),
            last_sequence: rec.last_sequence(),
            last_delay_ms: rec.last_delay_ms(),
        }
    }

    /// Kills the receive loop as a socket failure would.
    #[cfg(test)]
    pub(crate) fn abort_loop(&self) {
        self.join_handle.abort();
    }

    /// Statistics so far, without stopping.
    pub fn snapshot(&self) -> Option<TrafficStatistics> {
        lock(&self.recorder).statistics()
    }

    /// Signals the loop, waits up to `grace` for it to exit and returns the
    /// final statistics. `None` means no probe was received.
    pub async fn stop(self, grace: Duration) -> Option<TrafficStatistics> {
        let ReceiverHandle {
            shutdown_tx,
            mut join_handle,
            recorder,
            ..
        } = self;

        let _ = shutdown_tx.send(()).await;

        match tokio::time::timeout(grace, &mut join_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("[Receiver] Loop ended with error: {}", e),
            Ok(Err(e)) => warn!("[Receiver] Task failed: {}", e),
            Err(_) => {
                warn!("[Receiver] Did not stop within {:?}, aborting", grace);
                join_handle.abort();
            }
        }

        let stats = lock(&recorder).statistics();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::traffic::TrafficGenerator;

    fn loopback(port: u16) -> ReceiverConfig {
        ReceiverConfig {
            bind_addr: "127.0.0.1".to_string(),
            port,
            stop_grace_ms: 3000,
        }
    }

    #[tokio::test]
    async fn test_rejects_hostname_bind_address() {
        let config = ReceiverConfig {
            bind_addr: "localhost".to_string(),
            ..loopback(0)
        };
        assert!(matches!(
            TrafficReceiver::start(&config).await,
            Err(TrafficError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_port_in_use_fails_at_start() {
        let first = TrafficReceiver::start(&loopback(0)).await.unwrap();
        let port = first.local_addr().port();

        let second = TrafficReceiver::start(&loopback(port)).await;
        assert!(matches!(second, Err(TrafficError::Bind { .. })));

        first.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_without_traffic_reports_nothing() {
        let handle = TrafficReceiver::start(&loopback(0)).await.unwrap();
        assert!(handle.snapshot().is_none());
        assert!(handle.stop(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_measures_generated_traffic() {
        let handle = TrafficReceiver::start(&loopback(0)).await.unwrap();
        let port = handle.local_addr().port();

        let generator = TrafficGenerator::new(GeneratorConfig {
            host: "127.0.0.1".to_string(),
            port,
            packet_count: 5,
            packet_size: 100,
            frequency: 0,
        })
        .unwrap();
        let (_tx, rx) = mpsc::channel(1);
        generator.run(rx).await.unwrap();

        // let the loop drain the socket
        for _ in 0..50 {
            if handle.progress().probes == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let stats = handle.stop(Duration::from_secs(3)).await.unwrap();
        assert_eq!(stats.expected_packets, 5);
        assert_eq!(stats.received_packets, 5);
        assert_eq!(stats.lost_packets, 0);
        assert_eq!(stats.total_bytes, 500);
        assert!(stats.avg_delay_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_extreme_send_times_do_not_break_statistics() {
        let handle = TrafficReceiver::start(&loopback(0)).await.unwrap();
        let target = handle.local_addr();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        for (seq, send_time) in [(1u64, i64::MIN), (2, i64::MAX)] {
            let mut buf = [0u8; 16];
            ProbeHeader::new(send_time, seq).encode_into(&mut buf).unwrap();
            sender.send_to(&buf, target).await.unwrap();
        }

        for _ in 0..50 {
            if handle.progress().probes == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let stats = handle.snapshot().unwrap();
        assert_eq!(stats.received_packets, 2);
        assert!(stats.jitter_ms.is_finite());

        handle.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_short_datagrams_count_bytes_only() {
        let handle = TrafficReceiver::start(&loopback(0)).await.unwrap();
        let target = handle.local_addr();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&[1u8; 10], target).await.unwrap();

        let mut probe_buf = [0u8; 16];
        ProbeHeader::new(probe::unix_millis(), 4).encode_into(&mut probe_buf).unwrap();
        sender.send_to(&probe_buf, target).await.unwrap();

        for _ in 0..50 {
            if handle.progress().datagrams == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let progress = handle.progress();
        assert_eq!(progress.datagrams, 2);
        assert_eq!(progress.probes, 1);
        assert_eq!(progress.total_bytes, 26);
        assert_eq!(progress.last_sequence, Some(4));

        let stats = handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats.expected_packets, 4);
        assert_eq!(stats.lost_packets, 3);
        assert!((stats.loss_percent - 75.0).abs() < 0.001);
    }
}
