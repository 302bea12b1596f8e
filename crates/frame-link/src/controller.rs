//! Run controller
//!
//! ```text
//! Init ──► Running ──► Completed
//!             │ ├────► Halted       (halt policy fired)
//!             │ ├────► Interrupted  (shutdown flag raised)
//!             │ └────► Failed       (transport error)
//! ```
//!
//! Burst size is fixed at `Init`: the packet size and transaction ceiling
//! do not change during a run. Only the final burst of a finite run may be
//! smaller. Buffers are sized to that burst, never to the raw ceiling.

use crate::burst::{burst_capacity, execute_burst, next_burst, PacketBuffer};
use crate::packet::{Packet, PACKET_BYTES};
use crate::report::{EventSink, LinkEvent, RunParameters, RunSummary};
use crate::transport::{LinkInfo, Transport};
use crate::verify::{BurstOutcome, HaltPolicy, PacketVerdict, SessionCounters, Verifier};
use crate::{LinkError, Result, DEFAULT_MAX_TRANSFER_BYTES, MAX_TRANSFER_CEILING};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Init,
    Running,
    Halted,
    Completed,
    Interrupted,
    Failed,
}

/// Run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Packets to read; 0 runs until interrupted or halted
    pub packet_count: u64,
    pub halt: HaltPolicy,
    /// Transaction ceiling in bytes, further capped by the transport
    pub max_transfer_bytes: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            packet_count: 1,
            halt: HaltPolicy::Continue,
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_count(mut self, n: u64) -> Self {
        self.packet_count = n;
        self
    }

    pub fn halt_on_error(mut self, halt: bool) -> Self {
        self.halt = HaltPolicy::from_flag(halt);
        self
    }

    pub fn max_transfer_bytes(mut self, bytes: usize) -> Self {
        self.max_transfer_bytes = bytes;
        self
    }

    /// `None` when running forever
    pub fn target(&self) -> Option<u64> {
        (self.packet_count > 0).then_some(self.packet_count)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Interrupted(RunSummary),
    Halted {
        summary: RunSummary,
        packet: Packet,
        verdict: PacketVerdict,
    },
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Interrupted(summary) => summary,
            RunOutcome::Halted { summary, .. } => summary,
        }
    }

    /// Exit with success status
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Halted { .. })
    }
}

/// Loops plan → transfer → verify until the target is reached
pub struct RunController<T: Transport> {
    transport: T,
    config: RunConfig,
    verifier: Verifier,
    counters: SessionCounters,
    buffer: PacketBuffer,
    max_transfer_bytes: usize,
    state: RunState,
    shutdown: Option<Arc<AtomicBool>>,
    link: Option<LinkInfo>,
}

impl<T: Transport> RunController<T> {
    /// Validate the configuration and size the burst buffer
    pub fn new(transport: T, config: RunConfig) -> Result<Self> {
        let max_transfer_bytes = config.max_transfer_bytes.min(transport.max_transfer_bytes());
        if max_transfer_bytes > MAX_TRANSFER_CEILING {
            return Err(LinkError::InvalidConfig(format!(
                "transfer ceiling of {} bytes exceeds the {} byte limit",
                max_transfer_bytes, MAX_TRANSFER_CEILING
            )));
        }
        let capacity = next_burst(
            config.target(),
            burst_capacity(PACKET_BYTES, max_transfer_bytes)?,
        );
        debug!(
            "Burst capacity {} packets ({} of {} bytes)",
            capacity,
            capacity * PACKET_BYTES,
            max_transfer_bytes
        );

        Ok(Self {
            transport,
            verifier: Verifier::new(config.halt),
            config,
            counters: SessionCounters::new(),
            buffer: PacketBuffer::new(capacity)?,
            max_transfer_bytes,
            state: RunState::Init,
            shutdown: None,
            link: None,
        })
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Flag checked between bursts; raising it ends the run as interrupted
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Device and SPI settings to record in the summary
    pub fn with_link(mut self, link: LinkInfo) -> Self {
        self.link = Some(link);
        self
    }

    /// Packets per burst for this run
    pub fn burst_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Give back the transport so the caller can close it
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Settings as recorded in the run summary
    pub fn parameters(&self) -> RunParameters {
        RunParameters {
            packets_requested: self.config.target(),
            halt: self.config.halt,
            max_transfer_bytes: self.max_transfer_bytes,
            burst_capacity: self.buffer.capacity(),
            link: self.link.clone(),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Drive the run to a terminal state
    ///
    /// Transport errors are returned as `Err` and leave the controller
    /// `Failed`. Verification faults never produce `Err`.
    pub fn run<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunOutcome> {
        if self.state != RunState::Init {
            return Err(LinkError::InvalidConfig(format!(
                "run already started (state {:?})",
                self.state
            )));
        }

        let target = self.config.target();
        let capacity = self.buffer.capacity();
        sink.emit(&LinkEvent::RunStarted {
            burst_capacity: capacity,
            max_transfer_bytes: self.max_transfer_bytes,
            packets_requested: target,
        });

        self.state = RunState::Running;
        let mut remaining = target;
        let mut halted_on = None;
        let start = Instant::now();

        while remaining != Some(0) {
            if self.shutdown_requested() {
                self.state = RunState::Interrupted;
                break;
            }

            let count = next_burst(remaining, capacity);
            sink.emit(&LinkEvent::BurstStarted {
                packets_left: remaining,
                next_expected: self.counters.next_expected_sequence,
                packets: count,
            });

            if let Err(e) = execute_burst(&mut self.transport, &mut self.buffer, count) {
                error!(
                    "Transfer failed after {} packets: {}",
                    self.counters.packets_read, e
                );
                self.state = RunState::Failed;
                return Err(e);
            }

            let outcome = self
                .verifier
                .verify_burst(&mut self.counters, self.buffer.packets(), sink);
            if let BurstOutcome::Halted { packet, verdict } = outcome {
                warn!(
                    "Halted at packet #{} (SEQ {})",
                    self.counters.packets_read, packet.sequence
                );
                halted_on = Some((packet, verdict));
                self.state = RunState::Halted;
                break;
            }

            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(count as u64);
            }
        }

        let elapsed = start.elapsed();
        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }

        let summary = RunSummary::new(self.state, &self.counters, self.parameters(), elapsed);
        info!(
            "Run {:?}: {} packets in {} us",
            self.state, summary.packets_read, summary.elapsed_us
        );

        if self.state == RunState::Interrupted {
            sink.emit(&LinkEvent::Interrupted {
                packets_read: self.counters.packets_read,
            });
        }
        sink.emit(&LinkEvent::Summary(summary.clone()));

        Ok(match halted_on {
            Some((packet, verdict)) => RunOutcome::Halted {
                summary,
                packet,
                verdict,
            },
            None if self.state == RunState::Interrupted => RunOutcome::Interrupted(summary),
            None => RunOutcome::Completed(summary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::EventLog;
    use crate::sim::{FaultPlan, SimulatedStreamer};
    use crate::packet::Payload;
    use crate::transport::SpiSettings;
    use crate::verify::SequenceCheck;
    use crate::REFERENCE_PAYLOAD;

    fn run_script(sequences: &[u32], count: u64) -> (RunOutcome, SessionCounters) {
        let sim = SimulatedStreamer::from_sequences(4096, sequences);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(count)).unwrap();
        let outcome = controller.run(&mut EventLog::default()).unwrap();
        (outcome, *controller.counters())
    }

    #[test]
    fn test_clean_run_completes() {
        let seqs: Vec<u32> = (1..=10).collect();
        let (outcome, counters) = run_script(&seqs, 10);

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert!(outcome.is_success());
        let summary = outcome.summary();
        assert_eq!(summary.sequence_errors, 0);
        assert_eq!(summary.sequence_resets, 0);
        assert_eq!(summary.corruption_errors, 0);
        assert_eq!(summary.packets_read, 10);
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(counters.next_expected_sequence, 11);
    }

    #[test]
    fn test_missing_packet_counted_once() {
        let (outcome, counters) = run_script(&[1, 2, 3, 5, 6], 5);
        assert!(outcome.is_success());
        assert_eq!(counters.sequence_errors, 1);
        assert_eq!(counters.sequence_resets, 0);
        assert_eq!(counters.corruption_errors, 0);
        assert_eq!(counters.next_expected_sequence, 7);
    }

    #[test]
    fn test_mid_stream_restart_is_reset() {
        let (_, counters) = run_script(&[1, 2, 3, 4, 5, 6, 1], 7);
        assert_eq!(counters.sequence_resets, 1);
        assert_eq!(counters.sequence_errors, 0);
        assert_eq!(counters.next_expected_sequence, 2);
    }

    #[test]
    fn test_single_word_corruption() {
        let mut bad = Packet::new(2, REFERENCE_PAYLOAD);
        bad.payload.0[11] ^= 0x0000_0100;
        let packets = vec![Packet::new(1, REFERENCE_PAYLOAD), bad];

        let sim = SimulatedStreamer::from_packets(4096, packets);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(2)).unwrap();
        let outcome = controller.run(&mut EventLog::default()).unwrap();

        assert_eq!(outcome.summary().corruption_errors, 1);
        assert_eq!(outcome.summary().sequence_errors, 0);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_halt_on_third_packet() {
        let mut seqs: Vec<u32> = (1..=100).collect();
        seqs[2] = 50;
        let sim = SimulatedStreamer::from_sequences(4096, &seqs);
        let config = RunConfig::new().packet_count(100).halt_on_error(true);
        let mut controller = RunController::new(sim, config).unwrap();
        let mut log = EventLog::default();

        let outcome = controller.run(&mut log).unwrap();
        match &outcome {
            RunOutcome::Halted {
                summary,
                packet,
                verdict,
            } => {
                assert_eq!(summary.packets_read, 3);
                assert_eq!(summary.state, RunState::Halted);
                assert_eq!(packet.sequence, 50);
                assert_eq!(verdict.sequence, SequenceCheck::Gap { expected: 3 });
            }
            other => panic!("expected halt, got {:?}", other),
        }
        assert!(!outcome.is_success());
        assert_eq!(controller.state(), RunState::Halted);
        // summary is still reported on halt
        assert!(matches!(log.events.last(), Some(LinkEvent::Summary(_))));
        // only the first burst was transferred
        assert_eq!(controller.into_transport().transfers(), 1);
    }

    #[test]
    fn test_bursts_pack_whole_packets() {
        let sim = SimulatedStreamer::new(4096);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(100)).unwrap();
        assert_eq!(controller.burst_capacity(), 42);

        let mut log = EventLog::default();
        controller.run(&mut log).unwrap();

        let sizes: Vec<usize> = log
            .events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::BurstStarted { packets, .. } => Some(*packets),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![42, 42, 16]);
        assert_eq!(controller.counters().packets_read, 100);
        assert_eq!(controller.into_transport().emitted(), 100);
    }

    #[test]
    fn test_transport_ceiling_caps_config() {
        let sim = SimulatedStreamer::new(PACKET_BYTES * 3);
        let config = RunConfig::new().packet_count(10).max_transfer_bytes(65_536);
        let controller = RunController::new(sim, config).unwrap();
        assert_eq!(controller.burst_capacity(), 3);
        assert_eq!(controller.config().max_transfer_bytes, 65_536);
        assert_eq!(controller.parameters().max_transfer_bytes, PACKET_BYTES * 3);
    }

    #[test]
    fn test_buffer_sized_to_requested_packets() {
        let sim = SimulatedStreamer::new(MAX_TRANSFER_CEILING);
        let config = RunConfig::new()
            .packet_count(1)
            .max_transfer_bytes(MAX_TRANSFER_CEILING);
        let mut controller = RunController::new(sim, config).unwrap();
        assert_eq!(controller.burst_capacity(), 1);

        let outcome = controller.run(&mut EventLog::default()).unwrap();
        assert_eq!(outcome.summary().packets_read, 1);
        assert_eq!(outcome.summary().config.burst_capacity, 1);
    }

    #[test]
    fn test_huge_ceiling_is_config_error() {
        for ceiling in [MAX_TRANSFER_CEILING + 1, 1 << 30, usize::MAX] {
            let sim = SimulatedStreamer::new(ceiling);
            let config = RunConfig::new().packet_count(1).max_transfer_bytes(ceiling);
            assert!(matches!(
                RunController::new(sim, config),
                Err(LinkError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_summary_records_link_and_reference() {
        let mut words = REFERENCE_PAYLOAD.0;
        words[22] = 0;
        let reference = Payload::new(words);
        let sim = SimulatedStreamer::from_packets(4096, vec![Packet::new(1, reference)]);
        let link = LinkInfo {
            device: "simulator".to_string(),
            settings: SpiSettings::new(),
        };
        let mut controller = RunController::new(sim, RunConfig::new().halt_on_error(true))
            .unwrap()
            .with_verifier(Verifier::new(HaltPolicy::HaltOnError).with_reference(reference))
            .with_link(link.clone());

        let outcome = controller.run(&mut EventLog::default()).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        let config = &outcome.summary().config;
        assert_eq!(config.link, Some(link));
        assert_eq!(config.halt, HaltPolicy::HaltOnError);
        assert_eq!(config.packets_requested, Some(1));
    }

    #[test]
    fn test_ceiling_below_packet_size_fails_fast() {
        let sim = SimulatedStreamer::new(4096);
        let result = RunController::new(sim, RunConfig::new().max_transfer_bytes(PACKET_BYTES - 1));
        assert!(matches!(result, Err(LinkError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_transport_error_is_fatal() {
        let sim = SimulatedStreamer::from_sequences(PACKET_BYTES * 2, &[1, 2, 3, 4, 5]);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(10)).unwrap();

        let result = controller.run(&mut EventLog::default());
        assert!(matches!(result, Err(LinkError::Transport(_))));
        assert_eq!(controller.state(), RunState::Failed);
        assert_eq!(controller.counters().packets_read, 4);
    }

    #[test]
    fn test_run_twice_rejected() {
        let sim = SimulatedStreamer::new(4096);
        let mut controller = RunController::new(sim, RunConfig::new()).unwrap();
        controller.run(&mut EventLog::default()).unwrap();
        assert!(controller.run(&mut EventLog::default()).is_err());
    }

    #[test]
    fn test_reset_per_transfer_counts_resets_not_errors() {
        let faults = FaultPlan::new().reset_per_transfer(true);
        let sim = SimulatedStreamer::with_faults(4096, faults);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(100)).unwrap();
        let outcome = controller.run(&mut EventLog::default()).unwrap();

        assert_eq!(outcome.summary().sequence_resets, 2);
        assert_eq!(outcome.summary().sequence_errors, 0);
    }

    /// Raises the shutdown flag once a number of bursts have started
    struct StopAfter {
        bursts: usize,
        flag: Arc<AtomicBool>,
    }

    impl EventSink for StopAfter {
        fn emit(&mut self, event: &LinkEvent) {
            if let LinkEvent::BurstStarted { .. } = event {
                self.bursts -= 1;
                if self.bursts == 0 {
                    self.flag.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    #[test]
    fn test_forever_runs_until_interrupted() {
        let flag = Arc::new(AtomicBool::new(false));
        let sim = SimulatedStreamer::new(PACKET_BYTES * 10);
        let mut controller = RunController::new(sim, RunConfig::new().packet_count(0))
            .unwrap()
            .with_shutdown(flag.clone());

        let mut sink = StopAfter { bursts: 5, flag };
        let outcome = controller.run(&mut sink).unwrap();

        assert!(matches!(outcome, RunOutcome::Interrupted(_)));
        assert!(outcome.is_success());
        assert_eq!(outcome.summary().packets_read, 50);
        assert_eq!(outcome.summary().config.packets_requested, None);
        assert_eq!(outcome.summary().sequence_errors, 0);
    }

    #[test]
    fn test_forever_halts_on_fault() {
        let faults = FaultPlan::new().corrupt_every(25);
        let sim = SimulatedStreamer::with_faults(4096, faults);
        let config = RunConfig::new().packet_count(0).halt_on_error(true);
        let mut controller = RunController::new(sim, config).unwrap();

        let outcome = controller.run(&mut EventLog::default()).unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.summary().packets_read, 25);
        assert_eq!(outcome.summary().corruption_errors, 1);
    }
}
