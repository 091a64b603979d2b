//! 挖矿端到端测试
//!
//! 使用本地模拟矿池验证完整流程：
//! - 连接、版本和 MOTD
//! - 任务预取、求解、提交和反馈统计
//! - 畸形任务不会终止工作单元

use ducominer_core::candidate_digest;
use ducominer_rs::config::{BackendChoice, MinerConfig};
use ducominer_rs::mining::{MiningManager, MiningState, StatusSnapshot};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// 模拟矿池行为
#[derive(Clone)]
struct MockPool {
    /// 前 N 个任务请求返回错误行
    malformed_jobs: usize,
    feedback: &'static str,
}

/// 启动模拟矿池，返回地址和收到的份额提交
async fn spawn_mock_pool(pool: MockPool) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (submissions_tx, submissions_rx) = mpsc::unbounded_channel();
    let job_line = format!("ABC123,{},1\n", hex::encode(candidate_digest("ABC123", 0)));

    tokio::spawn(async move {
        let mut jobs_served = 0usize;
        while let Ok((mut socket, _)) = listener.accept().await {
            if socket.write_all(b"4.3\n").await.is_err() {
                continue;
            }
            loop {
                let mut buf = [0u8; 512];
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let request = String::from_utf8_lossy(&buf[..n]).to_string();

                let response = if request.starts_with("MOTD") {
                    "Welcome to the mock pool\n".to_string()
                } else if request.starts_with("JOB,") {
                    jobs_served += 1;
                    if jobs_served <= pool.malformed_jobs {
                        "BAD,Too many workers\n".to_string()
                    } else {
                        job_line.clone()
                    }
                } else {
                    let _ = submissions_tx.send(request);
                    pool.feedback.to_string()
                };

                if socket.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    (address, submissions_rx)
}

fn test_config(pool_address: String) -> MinerConfig {
    let mut config = MinerConfig {
        username: "alice".to_string(),
        backend: BackendChoice::Cpu,
        threads: 1,
        intensity: 100,
        ..Default::default()
    };
    config.pool.static_endpoint = Some(pool_address);
    config.pool.socket_timeout_secs = 5;
    config.tuning.enabled = false;
    config.switching.enabled = false;
    config
}

/// 等待汇总计数满足条件
async fn wait_for_snapshot(manager: &MiningManager, done: impl Fn(&StatusSnapshot) -> bool) -> StatusSnapshot {
    for _ in 0..100 {
        let snapshot = manager.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("status never reached the expected state: {:?}", manager.snapshot());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mines_and_submits_against_mock_pool() {
    let (address, mut submissions) = spawn_mock_pool(MockPool {
        malformed_jobs: 0,
        feedback: "GOOD\n",
    })
    .await;

    let manager = MiningManager::new(test_config(address));
    manager.start().await.unwrap();
    assert_eq!(manager.state().await, MiningState::Running);

    let submission = tokio::time::timeout(Duration::from_secs(10), submissions.recv())
        .await
        .expect("no share submitted")
        .unwrap();
    let fields: Vec<&str> = submission.split(',').collect();
    assert_eq!(fields[0], "0");
    assert!(fields[1].parse::<f64>().unwrap() > 0.0, "算力字段必须为正: {}", submission);
    assert_eq!(fields[2], "Official PC Miner 4.3");
    assert_eq!(fields[3], "None");

    let snapshot = wait_for_snapshot(&manager, |s| s.accepted >= 1).await;
    assert_eq!(snapshot.rejected, 0);
    assert!(snapshot.hashes >= 1);

    manager.stop().await;
    assert_eq!(manager.state().await, MiningState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_jobs_are_not_fatal() {
    let (address, mut submissions) = spawn_mock_pool(MockPool {
        malformed_jobs: 2,
        feedback: "GOOD\n",
    })
    .await;

    let manager = MiningManager::new(test_config(address));
    manager.start().await.unwrap();

    // 两次错误行之后仍能拿到正常任务并提交
    let submission = tokio::time::timeout(Duration::from_secs(10), submissions.recv())
        .await
        .expect("no share after malformed jobs")
        .unwrap();
    assert!(submission.starts_with("0,"));
    assert_eq!(manager.state().await, MiningState::Running);

    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_shares_are_counted() {
    let (address, _submissions) = spawn_mock_pool(MockPool {
        malformed_jobs: 0,
        feedback: "BAD,Incorrect result\n",
    })
    .await;

    let manager = MiningManager::new(test_config(address));
    manager.start().await.unwrap();

    let snapshot = wait_for_snapshot(&manager, |s| s.rejected >= 1).await;
    assert_eq!(snapshot.accepted, 0);
    assert!(snapshot.accepted_pct() < 1.0);

    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocks_count_as_accepted() {
    let (address, _submissions) = spawn_mock_pool(MockPool {
        malformed_jobs: 0,
        feedback: "BLOCK\n",
    })
    .await;

    let manager = MiningManager::new(test_config(address));
    manager.start().await.unwrap();

    let snapshot = wait_for_snapshot(&manager, |s| s.blocks >= 1).await;
    assert!(snapshot.accepted >= snapshot.blocks);

    manager.stop().await;
}
