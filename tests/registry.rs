//! Behavior of the mock connection registry itself. These tests share the
//! process-wide registry and `reset` wipes it, so they serialize on a lock.

use std::sync::{Mutex, PoisonError};

use h2mux::mock;

static SERIAL: Mutex<()> = Mutex::new(());

#[tokio::test]
#[should_panic(expected = "already expecting a connection")]
async fn duplicate_expectation_panics() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let _first = mock::expect_connect("registry-dup.test", 443).await;
    let _second = mock::expect_connect("registry-dup.test", 443).await;
}

#[tokio::test]
#[should_panic(expected = "no expected connection")]
async fn connect_without_expectation_panics() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = mock::connect("registry-missing.test", 443).await;
}

#[tokio::test]
async fn reset_clears_expectations() {
    let _guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    let _server = mock::expect_connect("registry-reset.test", 443).await;
    mock::reset();
    // A second expectation for the same endpoint is fine after a reset.
    let _server = mock::expect_connect("registry-reset.test", 443).await;
    mock::reset();
}
