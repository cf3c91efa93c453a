use chrono::{DateTime, Utc};
use rocket::tokio::{self, task::JoinHandle, time::Duration};

use crate::model::{election::ElectionPhase, service::SharedService};

/// A pending change of election phase at a fixed point in time.
///
/// The change happens automatically when the time arrives, unless the
/// schedule is cancelled first. A time in the past applies immediately.
pub struct PhaseSchedule {
    handle: JoinHandle<()>,
    phase: ElectionPhase,
    run_at: DateTime<Utc>,
}

impl PhaseSchedule {
    pub fn new(service: SharedService, phase: ElectionPhase, run_at: DateTime<Utc>) -> Self {
        info!("Election phase will change to {phase} at {run_at}");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(datetime_to_duration(run_at)).await;
            service.set_phase(phase);
        });
        Self {
            handle,
            phase,
            run_at,
        }
    }

    pub fn phase(&self) -> ElectionPhase {
        self.phase
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Cancel the change. Returns true iff it had already been applied.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }
}

/// Convert a `DateTime` into a duration from the current instant.
/// A `DateTime` in the past will produce a duration of zero.
fn datetime_to_duration(datetime: DateTime<Utc>) -> Duration {
    let target_timestamp = datetime.timestamp_millis();
    let now_timestamp = Utc::now().timestamp_millis();
    let time_diff = u64::try_from(target_timestamp - now_timestamp).unwrap_or(0);
    Duration::from_millis(time_diff)
}
