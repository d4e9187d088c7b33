use codejudge::isolate::IsolateBox;
use codejudge::{Artifact, WorkerPool};

use super::test_config;

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_init_and_cleanup() {
    let config = test_config();
    let mut sandbox = IsolateBox::init(0, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    assert!(sandbox.box_dir().exists());
    assert!(sandbox.is_initialized());

    sandbox.cleanup().await.expect("Failed to cleanup sandbox");
    assert!(!sandbox.is_initialized());
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_write_and_read_file() {
    let config = test_config();
    let mut sandbox = IsolateBox::init(1, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    sandbox
        .write_file("test.txt", b"Hello, World!")
        .await
        .expect("Failed to write file");

    let (content, truncated) = sandbox
        .read_capped("test.txt", 5)
        .await
        .expect("Failed to read file");
    assert_eq!(content, b"Hello");
    assert!(truncated);

    sandbox.cleanup().await.expect("Failed to cleanup");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_reset_and_restore() {
    let config = test_config();
    let mut sandbox = IsolateBox::init(2, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    sandbox
        .write_file("stale.txt", b"from an earlier case")
        .await
        .expect("Failed to write file");
    sandbox.reset().await.expect("Failed to reset box");
    assert!(!sandbox.file_exists("stale.txt").await.unwrap());

    let artifact = Artifact::from_source("main.py", "print(1)");
    sandbox.restore(&artifact).await.expect("Failed to restore");
    assert!(sandbox.file_exists("main.py").await.unwrap());

    sandbox.cleanup().await.expect("Failed to cleanup");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_slot_returns_after_cleanup() {
    let config = test_config();
    let pool = WorkerPool::new(1, 3, 0, std::time::Duration::from_secs(1));

    let slot = pool.acquire().await.expect("Failed to acquire slot");
    let mut sandbox = IsolateBox::init(slot.box_id(), config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox")
        .with_slot(slot);
    assert_eq!(pool.stats().available, 0);

    sandbox.cleanup().await.expect("Failed to cleanup");
    drop(sandbox);
    assert_eq!(pool.stats().available, 1);
}
