//! Helpers shared by the loopback integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for anything that should happen "promptly" on loopback.
pub const STEP: Duration = Duration::from_secs(5);

/// How long to watch for events that must *not* arrive.
pub const QUIET: Duration = Duration::from_millis(200);

/// Next event, failing the test if none arrives within [`STEP`].
pub async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(STEP, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for<T>(rx: &mut UnboundedReceiver<T>, mut pred: impl FnMut(&T) -> bool) -> T {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Every event delivered within [`QUIET`].
pub async fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(QUIET, rx.recv()).await {
        events.push(event);
    }
    events
}
