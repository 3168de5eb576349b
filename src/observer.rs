//! Timer-driven polling loops for the observer and lock monitor
//!
//! Each subsystem runs one long-lived cooperative loop: run a pass, sleep,
//! repeat. A failing pass is logged and emitted as an event, never allowed
//! to stop the loop. Stopping a loop means stop rescheduling; an in-flight
//! pass always completes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::event::{EventSink, ServiceEvent};
use crate::lock_monitor::LockMonitor;
use crate::processor::BitcoinProcessor;

/// Handle to a running polling loop.
pub struct PollingHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Stop rescheduling. An in-flight pass completes normally.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop and wait for the loop to finish its in-flight pass.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

fn spawn_polling_loop<F, Fut>(interval: Duration, pass: F) -> PollingHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let task = tokio::spawn(async move {
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            pass().await;
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    });
    PollingHandle { stop, task }
}

/// Periodically runs the processor's observation pass.
pub struct Observer {
    processor: Arc<BitcoinProcessor>,
    event_sink: Arc<dyn EventSink>,
    polling_interval: Duration,
}

impl Observer {
    pub fn new(
        processor: Arc<BitcoinProcessor>,
        event_sink: Arc<dyn EventSink>,
        polling_interval: Duration,
    ) -> Self {
        Self {
            processor,
            event_sink,
            polling_interval,
        }
    }

    /// Spawn the observation loop on the current runtime.
    pub fn start(&self) -> PollingHandle {
        let processor = self.processor.clone();
        let event_sink = self.event_sink.clone();
        spawn_polling_loop(self.polling_interval, move || {
            let processor = processor.clone();
            let event_sink = event_sink.clone();
            async move {
                match processor.process_transactions().await {
                    Ok(()) => event_sink.emit(ServiceEvent::ObserverPassCompleted),
                    Err(e) => {
                        error!(error = %e, "observation pass failed");
                        event_sink.emit(ServiceEvent::ObserverPassFailed);
                    }
                }
            }
        })
    }
}

/// Periodically runs the lock monitor's poll.
///
/// Must not be started until the observer's initial catch-up completes:
/// lock resolution depends on normalized-fee data the observer produces.
pub struct LockMonitorScheduler {
    monitor: Arc<LockMonitor>,
    event_sink: Arc<dyn EventSink>,
    polling_interval: Duration,
}

impl LockMonitorScheduler {
    pub fn new(
        monitor: Arc<LockMonitor>,
        event_sink: Arc<dyn EventSink>,
        polling_interval: Duration,
    ) -> Self {
        Self {
            monitor,
            event_sink,
            polling_interval,
        }
    }

    /// Spawn the lock monitoring loop on the current runtime.
    pub fn start(&self) -> PollingHandle {
        let monitor = self.monitor.clone();
        let event_sink = self.event_sink.clone();
        spawn_polling_loop(self.polling_interval, move || {
            let monitor = monitor.clone();
            let event_sink = event_sink.clone();
            async move {
                if let Err(e) = monitor.handle_periodic_poll().await {
                    error!(error = %e, "lock monitor pass failed");
                    event_sink.emit(ServiceEvent::LockMonitorPassFailed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullEventSink;
    use crate::fee::{FeeCalculatorConfig, NormalizedFeeCalculator};
    use crate::mock::{
        CollectingEventSink, MockBitcoinClient, MockBlockMetadataStore, MockServiceStateStore,
        MockTransactionParser, MockTransactionStore,
    };
    use crate::processor::ProcessorConfig;
    use crate::spending_monitor::SpendingMonitor;
    use crate::types::BitcoinBlockModel;

    fn processor(client: Arc<MockBitcoinClient>) -> Arc<BitcoinProcessor> {
        let transaction_store = Arc::new(MockTransactionStore::new());
        let block_store = Arc::new(MockBlockMetadataStore::new());
        let fee_calculator = Arc::new(NormalizedFeeCalculator::new(
            FeeCalculatorConfig {
                genesis_block_height: 0,
                initial_normalized_fee_in_satoshis: 1000,
                fee_look_back_window_in_blocks: 100,
                fee_max_fluctuation_multiplier_per_block: 0.000002,
            },
            block_store.clone(),
        ));
        let spending_monitor =
            Arc::new(SpendingMonitor::new(100, 1_000_000, transaction_store.clone()).unwrap());
        Arc::new(BitcoinProcessor::new(
            ProcessorConfig {
                genesis_block_height: 0,
                block_data_directory: None,
                block_file_magic: crate::constants::REGTEST_BLOCK_FILE_MAGIC,
            },
            client,
            transaction_store,
            block_store,
            Arc::new(MockServiceStateStore::new()),
            Arc::new(MockTransactionParser::new()),
            fee_calculator,
            spending_monitor,
            Arc::new(NullEventSink),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_loop_emits_pass_events_and_stops() {
        let client = Arc::new(MockBitcoinClient::new());
        client.add_block(BitcoinBlockModel {
            height: 0,
            hash: "hash0".to_string(),
            previous_hash: "genesis-parent".to_string(),
            transactions: vec![],
        });

        let events = Arc::new(CollectingEventSink::new());
        let observer = Observer::new(
            processor(client),
            events.clone(),
            Duration::from_secs(60),
        );

        let handle = observer.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;

        let completed = events
            .events()
            .iter()
            .filter(|e| **e == ServiceEvent::ObserverPassCompleted)
            .count();
        assert!(completed >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_loop_survives_failing_passes() {
        // No blocks seeded: every pass fails at the tip-height RPC.
        let client = Arc::new(MockBitcoinClient::new());
        let events = Arc::new(CollectingEventSink::new());
        let observer = Observer::new(
            processor(client),
            events.clone(),
            Duration::from_secs(60),
        );

        let handle = observer.start();
        tokio::time::sleep(Duration::from_secs(121)).await;
        handle.shutdown().await;

        let failed = events
            .events()
            .iter()
            .filter(|e| **e == ServiceEvent::ObserverPassFailed)
            .count();
        assert!(failed >= 2);
    }
}
