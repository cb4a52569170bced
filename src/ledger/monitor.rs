/// Periodic account activity polling
use super::{AccountActivity, Ledger};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Snapshots buffered for a slow consumer before new ones are dropped
pub const CHANNEL_CAPACITY: usize = 16;

/// Poll `address` every `period` and push snapshots into the returned
/// channel. The task stops as soon as the receiver is dropped, even while a
/// ledger call is in flight; failed polls are logged and skipped.
pub fn spawn_activity_monitor(
    ledger: Arc<dyn Ledger>,
    address: String,
    period: Duration,
) -> (mpsc::Receiver<AccountActivity>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = tx.closed() => break,
                result = ledger.account_transactions(&address) => result,
            };

            match result {
                Ok(activity) => match tx.try_send(activity) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(%address, "activity consumer lagging, snapshot dropped");
                    }
                    Err(TrySendError::Closed(_)) => break,
                },
                Err(e) => {
                    tracing::error!(error = %e, %address, "failed to get account activity");
                }
            }
        }
        tracing::debug!(%address, "account monitor stopped");
    });

    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{AgentError, AgentResult},
        ledger::{Account, AlgoTransaction},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingLedger {
        round: AtomicU64,
        fail: bool,
        stall: bool,
    }

    impl CountingLedger {
        fn new() -> Self {
            Self { round: AtomicU64::new(0), fail: false, stall: false }
        }
    }

    #[async_trait]
    impl Ledger for CountingLedger {
        async fn account_information(&self, _address: &str) -> AgentResult<Account> {
            Ok(Account::default())
        }
        async fn pending_transactions(&self, _address: &str) -> AgentResult<Vec<AlgoTransaction>> {
            Ok(vec![])
        }
        async fn suggested_params(&self) -> AgentResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
        async fn send_raw_transaction(&self, _stx: &[u8]) -> AgentResult<String> {
            Ok("TX".to_string())
        }
        async fn account_transactions(&self, _address: &str) -> AgentResult<AccountActivity> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(AgentError::Ledger("down".to_string()));
            }
            Ok(AccountActivity {
                current_round: self.round.fetch_add(1, Ordering::SeqCst) + 1,
                next_token: String::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_arrive_in_order() {
        let ledger = Arc::new(CountingLedger::new());
        let (mut rx, _task) = spawn_activity_monitor(ledger, "ADDR".into(), Duration::from_secs(5));

        assert_eq!(rx.recv().await.unwrap().current_round, 1);
        assert_eq!(rx.recv().await.unwrap().current_round, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_receiver_dropped() {
        let ledger = Arc::new(CountingLedger::new());
        let (rx, task) = spawn_activity_monitor(ledger, "ADDR".into(), Duration::from_secs(5));
        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_during_stalled_call() {
        let ledger = Arc::new(CountingLedger { stall: true, ..CountingLedger::new() });
        let (rx, task) = spawn_activity_monitor(ledger, "ADDR".into(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_skipped() {
        let ledger = Arc::new(CountingLedger { fail: true, ..CountingLedger::new() });
        let (mut rx, task) = spawn_activity_monitor(ledger, "ADDR".into(), Duration::from_secs(1));

        let waited = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(waited.is_err());
        assert!(!task.is_finished());
        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_channel_drops_snapshots() {
        let ledger = Arc::new(CountingLedger::new());
        let (mut rx, _task) = spawn_activity_monitor(ledger, "ADDR".into(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(CHANNEL_CAPACITY as u64 + 10)).await;

        let mut received = Vec::new();
        while let Ok(activity) = rx.try_recv() {
            received.push(activity.current_round);
        }
        assert_eq!(received.len(), CHANNEL_CAPACITY);
        assert_eq!(received[0], 1);
    }
}
