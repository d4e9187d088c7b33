use std::time::{Duration, Instant};

use codejudge::VerdictStatus;
use tokio_util::sync::CancellationToken;

use super::{request, test_engine};

#[tokio::test]
#[ignore = "requires root"]
async fn test_busy_loop_is_time_limit_exceeded() {
    let engine = test_engine(30, 1);
    let request = request("busy_loop.py", "python3", &[("", "")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    let verdict = &result.test_verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::TimeLimitExceeded);
    assert!(verdict.elapsed_ms >= 1900, "elapsed {} ms", verdict.elapsed_ms);
    assert!(verdict.elapsed_ms < 5000, "elapsed {} ms", verdict.elapsed_ms);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_sleep_hits_the_wall_clock() {
    let engine = test_engine(31, 1);
    let request = request("sleep.py", "python3", &[("", "")]);

    let started = Instant::now();
    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::TimeLimitExceeded);
    // the slot is back well before the program's own 60 s
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(engine.pool().stats().available, 1);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_allocation_is_memory_limit_exceeded() {
    let engine = test_engine(32, 1);
    let request = request("memory_hog.py", "python3", &[("", "")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    assert_eq!(result.overall_status, VerdictStatus::MemoryLimitExceeded);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_output_flood_never_passes() {
    let engine = test_engine(33, 1);
    let request = request("flood.py", "python3", &[("", "y")]);

    let result = engine
        .judge(request, CancellationToken::new())
        .await
        .expect("judging failed");

    let verdict = &result.test_verdicts[0];
    assert_ne!(verdict.status, VerdictStatus::Passed);
    assert!(verdict.actual_output.len() <= engine.config().judge.report_output_bytes);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_cancellation_kills_the_program() {
    let engine = test_engine(34, 1);
    let request = request("sleep.py", "python3", &[("", "")]);
    let cancel = CancellationToken::new();

    let judging = tokio::spawn({
        let engine = engine.clone();
        let cancel = cancel.clone();
        async move { engine.judge(request, cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    let started = Instant::now();
    cancel.cancel();

    let result = judging.await.unwrap();
    assert!(matches!(result, Err(codejudge::JudgeError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.pool().stats().available, 1);
}
