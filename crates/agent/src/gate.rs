use formpilot_core::{Decision, Error, JobId, Result};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

/// Single-slot decision cells, one per job parked for review.
#[derive(Default)]
pub struct ConfirmationGate {
    slots: Mutex<HashMap<JobId, oneshot::Sender<Decision>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot. The lifecycle awaits the returned receiver.
    pub async fn open(&self, job_id: &str) -> Result<oneshot::Receiver<Decision>> {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(job_id) {
            return Err(Error::InvalidState(format!(
                "job {} already has a pending decision",
                job_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(job_id.to_string(), tx);
        Ok(rx)
    }

    /// Fill the slot. Succeeds at most once per `open`.
    pub async fn decide(&self, job_id: &str, decision: Decision) -> Result<()> {
        let tx = self.slots.lock().await.remove(job_id).ok_or_else(|| {
            Error::InvalidState(format!("job {} has no pending decision", job_id))
        })?;
        tx.send(decision).map_err(|_| {
            Error::InvalidState(format!("job {} stopped waiting for a decision", job_id))
        })
    }

    /// Remove the slot without deciding; the waiter sees a closed channel.
    pub async fn discard(&self, job_id: &str) {
        self.slots.lock().await.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decide_once() {
        let gate = ConfirmationGate::new();
        let rx = gate.open("j1").await.unwrap();
        gate.decide("j1", Decision::Submit).await.unwrap();
        assert_eq!(rx.await.unwrap(), Decision::Submit);

        let err = gate.decide("j1", Decision::Cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_decide_without_slot() {
        let gate = ConfirmationGate::new();
        assert!(matches!(
            gate.decide("nope", Decision::Submit).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_double_open_rejected() {
        let gate = ConfirmationGate::new();
        let _rx = gate.open("j1").await.unwrap();
        assert!(gate.open("j1").await.is_err());
    }

    #[tokio::test]
    async fn test_discard_wakes_waiter() {
        let gate = ConfirmationGate::new();
        let rx = gate.open("j1").await.unwrap();
        gate.discard("j1").await;
        assert!(rx.await.is_err());
        // The slot is gone, so the job may park again.
        assert!(gate.open("j1").await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gone() {
        let gate = ConfirmationGate::new();
        drop(gate.open("j1").await.unwrap());
        assert!(matches!(
            gate.decide("j1", Decision::Submit).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_decisions_single_winner() {
        let gate = std::sync::Arc::new(ConfirmationGate::new());
        let rx = gate.open("j1").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let gate = gate.clone();
            let decision = if i % 2 == 0 { Decision::Submit } else { Decision::Cancel };
            handles.push(tokio::spawn(async move { gate.decide("j1", decision).await.is_ok() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(rx.await.is_ok());
    }
}
