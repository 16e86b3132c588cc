use formpilot_core::{JobId, ProgressEvent};
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

/// Per-job fan-out of [`ProgressEvent`]s.
///
/// Publishing never waits on subscribers: a subscriber that falls more than
/// `capacity` events behind skips ahead (`RecvError::Lagged`) and can always
/// fall back to polling the job status.
pub struct ProgressBus {
    channels: Mutex<HashMap<JobId, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn open(&self, job_id: &str) {
        let mut channels = self.channels.lock().await;
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Returns the number of subscribers reached.
    pub async fn publish(&self, event: ProgressEvent) -> usize {
        let channels = self.channels.lock().await;
        match channels.get(&event.job_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// `None` once the job's channel has been closed.
    pub async fn subscribe(&self, job_id: &str) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.channels
            .lock()
            .await
            .get(job_id)
            .map(broadcast::Sender::subscribe)
    }

    /// Drop the sender; receivers drain what is buffered, then see `Closed`.
    pub async fn close(&self, job_id: &str) {
        self.channels.lock().await.remove(job_id);
    }
}
