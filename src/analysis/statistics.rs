use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Raw observations gathered by a receiver while it listens.
#[derive(Debug, Clone)]
pub struct DelayRecorder {
    started: Instant,
    delays_by_seq: HashMap<u64, i64>,
    delays: Vec<i64>,
    total_bytes: u64,
    datagrams: u64,
    last_sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficStatistics {
    pub expected_packets: u64,
    pub received_packets: u64,
    pub lost_packets: u64,
    pub loss_percent: f64,
    pub duplicate_packets: u64,
    pub avg_delay_ms: f64,
    pub min_delay_ms: i64,
    pub max_delay_ms: i64,
    pub jitter_ms: f64,
    pub total_bytes: u64,
    pub throughput_bps: f64,
    pub throughput_kbps: f64,
    pub total_time_ms: u64,
}

impl DelayRecorder {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started: Instant) -> Self {
        Self {
            started,
            delays_by_seq: HashMap::new(),
            delays: Vec::new(),
            total_bytes: 0,
            datagrams: 0,
            last_sequence: None,
        }
    }

    /// Counts every datagram towards throughput, probe or not.
    pub fn record_datagram(&mut self, len: usize) {
        self.total_bytes += len as u64;
        self.datagrams += 1;
    }

    pub fn record_probe(&mut self, sequence: u64, delay_ms: i64) {
        self.delays_by_seq.insert(sequence, delay_ms);
        self.delays.push(delay_ms);
        self.last_sequence = Some(sequence);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn datagrams(&self) -> u64 {
        self.datagrams
    }

    pub fn probes(&self) -> u64 {
        self.delays.len() as u64
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn last_delay_ms(&self) -> Option<i64> {
        self.delays.last().copied()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn statistics(&self) -> Option<TrafficStatistics> {
        self.statistics_over(self.elapsed())
    }

    /// `None` when no probe has arrived yet.
    pub fn statistics_over(&self, elapsed: Duration) -> Option<TrafficStatistics> {
        if self.delays_by_seq.is_empty() {
            return None;
        }

        let total_time_ms = elapsed.as_millis() as u64;
        let total_time_sec = (total_time_ms / 1000).max(1);

        let expected_packets = self.delays_by_seq.keys().copied().max().unwrap_or(0);
        let received_packets = self.delays_by_seq.len() as u64;
        let lost_packets = expected_packets.saturating_sub(received_packets);
        let loss_percent = if expected_packets > 0 {
            lost_packets as f64 * 100.0 / expected_packets as f64
        } else {
            0.0
        };

        let avg_delay_ms = self.delays.iter().map(|&d| d as f64).sum::<f64>() / self.delays.len() as f64;
        let min_delay_ms = self.delays.iter().copied().min().unwrap_or(0);
        let max_delay_ms = self.delays.iter().copied().max().unwrap_or(0);

        let throughput_bps = (self.total_bytes as f64 * 8.0) / total_time_sec as f64;

        Some(TrafficStatistics {
            expected_packets,
            received_packets,
            lost_packets,
            loss_percent,
            duplicate_packets: self.delays.len() as u64 - received_packets,
            avg_delay_ms,
            min_delay_ms,
            max_delay_ms,
            jitter_ms: jitter(&self.delays),
            total_bytes: self.total_bytes,
            throughput_bps,
            throughput_kbps: throughput_bps / 1000.0,
            total_time_ms,
        })
    }
}

impl Default for DelayRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean absolute difference between consecutive delays, in arrival order.
fn jitter(delays: &[i64]) -> f64 {
    if delays.len() < 2 {
        return 0.0;
    }

    // Delays come off the wire, so differences can span the whole i64 range.
    let total: u128 = delays
        .windows(2)
        .map(|pair| pair[1].abs_diff(pair[0]) as u128)
        .sum();
    total as f64 / (delays.len() - 1) as f64
}

impl TrafficStatistics {
    pub fn report_lines(&self) -> Vec<String> {
        vec![
            "========== NETWORK TRAFFIC STATISTICS ==========".to_string(),
            format!("Expected packets: {}", self.expected_packets),
            format!("Received packets: {}", self.received_packets),
            format!("Lost packets:     {} ({:.2} %)", self.lost_packets, self.loss_percent),
            format!("Avg delay:        {:.2} ms", self.avg_delay_ms),
            format!(
                "Throughput:       {:.2} bps ({:.2} Kbps)",
                self.throughput_bps, self.throughput_kbps
            ),
            format!("Total time:       {} ms", self.total_time_ms),
            "================================================".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder_with(probes: &[(u64, i64)], bytes_per_datagram: usize) -> DelayRecorder {
        let mut recorder = DelayRecorder::new();
        for &(seq, delay) in probes {
            recorder.record_datagram(bytes_per_datagram);
            recorder.record_probe(seq, delay);
        }
        recorder
    }

    #[test]
    fn test_no_probes_means_no_statistics() {
        let mut recorder = DelayRecorder::new();
        // short datagrams count as bytes but never as packets
        recorder.record_datagram(8);
        assert_eq!(recorder.total_bytes(), 8);
        assert!(recorder.statistics_over(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_average_delay() {
        let recorder = recorder_with(&[(1, 10), (2, 20), (3, 30)], 100);
        let stats = recorder.statistics_over(Duration::from_secs(1)).unwrap();

        assert!((stats.avg_delay_ms - 20.0).abs() < 0.001);
        assert_eq!(stats.min_delay_ms, 10);
        assert_eq!(stats.max_delay_ms, 30);
    }

    #[test]
    fn test_packet_loss() {
        // 8 of 10 arrive: seq 4 and 7 dropped
        let probes: Vec<(u64, i64)> = (1..=10).filter(|s| *s != 4 && *s != 7).map(|s| (s, 1)).collect();
        let stats = recorder_with(&probes, 64).statistics_over(Duration::from_secs(2)).unwrap();

        assert_eq!(stats.expected_packets, 10);
        assert_eq!(stats.received_packets, 8);
        assert_eq!(stats.lost_packets, 2);
        assert!((stats.loss_percent - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_duplicates_count_towards_delay_but_not_received() {
        let stats = recorder_with(&[(1, 10), (2, 20), (2, 60)], 16)
            .statistics_over(Duration::from_secs(1))
            .unwrap();

        assert_eq!(stats.received_packets, 2);
        assert_eq!(stats.duplicate_packets, 1);
        assert_eq!(stats.lost_packets, 0);
        assert!((stats.avg_delay_ms - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_sequence_zero_does_not_underflow_loss() {
        let stats = recorder_with(&[(0, 5)], 16).statistics_over(Duration::from_secs(1)).unwrap();
        assert_eq!(stats.expected_packets, 0);
        assert_eq!(stats.lost_packets, 0);
        assert_eq!(stats.loss_percent, 0.0);
    }

    #[test]
    fn test_throughput_uses_whole_seconds_with_floor_of_one() {
        let recorder = recorder_with(&[(1, 1), (2, 1)], 500);

        // under a second counts as one second
        let stats = recorder.statistics_over(Duration::from_millis(400)).unwrap();
        assert!((stats.throughput_bps - 8000.0).abs() < 0.001);
        assert!((stats.throughput_kbps - 8.0).abs() < 0.001);
        assert_eq!(stats.total_time_ms, 400);

        // 2.9s truncates to 2s
        let stats = recorder.statistics_over(Duration::from_millis(2900)).unwrap();
        assert!((stats.throughput_bps - 4000.0).abs() < 0.001);
    }

    #[test]
    fn test_jitter() {
        assert_eq!(jitter(&[]), 0.0);
        assert_eq!(jitter(&[7]), 0.0);
        assert!((jitter(&[10, 20, 15, 15]) - 5.0).abs() < 0.001);
        assert!((jitter(&[-5, 5]) - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_extreme_delays_do_not_overflow() {
        let delays = [i64::MAX, i64::MIN + 1, i64::MAX];
        let expected = i64::MAX.abs_diff(i64::MIN + 1) as f64;
        assert!((jitter(&delays) - expected).abs() / expected < 1e-9);

        let probes: Vec<(u64, i64)> = delays.iter().enumerate().map(|(i, d)| (i as u64 + 1, *d)).collect();
        let stats = recorder_with(&probes, 16).statistics_over(Duration::from_secs(1)).unwrap();
        assert!(stats.jitter_ms.is_finite());
        assert!(stats.avg_delay_ms.is_finite());
        assert_eq!(stats.min_delay_ms, i64::MIN + 1);
        assert_eq!(stats.max_delay_ms, i64::MAX);
    }

    #[test]
    fn test_report_lines() {
        let stats = recorder_with(&[(1, 10), (3, 20)], 1000)
            .statistics_over(Duration::from_millis(1500))
            .unwrap();
        let lines = stats.report_lines();

        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "========== NETWORK TRAFFIC STATISTICS ==========");
        assert_eq!(lines[1], "Expected packets: 3");
        assert_eq!(lines[2], "Received packets: 2");
        assert_eq!(lines[3], "Lost packets:     1 (33.33 %)");
        assert_eq!(lines[4], "Avg delay:        15.00 ms");
        assert_eq!(lines[5], "Throughput:       16000.00 bps (16.00 Kbps)");
        assert_eq!(lines[6], "Total time:       1500 ms");
    }
}
