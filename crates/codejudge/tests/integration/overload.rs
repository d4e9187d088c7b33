use codejudge::config::Config;
use codejudge::{Engine, JudgeError, PoolError, VerdictStatus};
use tokio_util::sync::CancellationToken;

use super::{request, test_config};

fn engine(first_box_id: u32, workers: usize, queue_length: usize) -> Engine {
    let mut config: Config = test_config();
    config.pool.first_box_id = first_box_id;
    config.pool.workers = Some(workers);
    config.pool.queue_length = queue_length;
    Engine::new(config)
}

#[tokio::test]
async fn test_full_pool_rejects_without_running() {
    let engine = engine(50, 1, 0);
    let _held = engine.pool().acquire().await.unwrap();

    let err = engine
        .judge(
            request("echo.py", "python3", &[("1", "1")]),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JudgeError::Overloaded(PoolError::QueueFull { .. })));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_excess_submissions_are_overloaded() {
    let engine = engine(51, 2, 1);

    let submissions: Vec<_> = (0..5)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let request = request("sleep.py", "python3", &[("", "")]);
                engine.judge(request, CancellationToken::new()).await
            })
        })
        .collect();

    let mut judged = 0;
    let mut overloaded = 0;
    for submission in submissions {
        match submission.await.unwrap() {
            Ok(result) => {
                assert_eq!(result.overall_status, VerdictStatus::TimeLimitExceeded);
                judged += 1;
            }
            Err(JudgeError::Overloaded(_)) => overloaded += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // two running and one queued at most
    assert_eq!(judged, 3);
    assert_eq!(overloaded, 2);
    assert_eq!(engine.pool().stats().available, 2);
}
