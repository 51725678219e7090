use std::time::Duration;

use tokio::sync::watch;

/// Sending half, fired once on interrupt.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Interrupt flag observed between attempts and while sleeping.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`. Returns `true` if interrupted first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = triggered(&mut self.rx) => true,
        }
    }
}

async fn triggered(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Trigger dropped without firing: never interrupted.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cuts_sleep_short() {
        let (trigger, mut shutdown) = channel();
        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3600)).await });
        trigger.trigger();

        let interrupted = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn untriggered_sleep_completes() {
        let (_trigger, mut shutdown) = channel();
        assert!(!shutdown.sleep(Duration::from_millis(5)).await);
        assert!(!shutdown.is_triggered());
    }
}
