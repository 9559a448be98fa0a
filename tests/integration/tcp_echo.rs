//! End-to-end over TCP: listener, pool and echo handler.

use std::sync::Arc;
use std::time::Duration;

use blaze_pool::adaptive::BufferPool;
use blaze_pool::config::{Config, LaneMode, LoggingConfig, ServerConfig, WorkerPoolConfig};
use blaze_pool::server::{EchoHandler, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::helpers::{wait_until, within};

fn config(max_workers: usize) -> Config {
    Config {
        server: ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            runtime_threads: 0,
            backlog: 128,
        },
        pool: WorkerPoolConfig::new(max_workers).with_lane_mode(LaneMode::Auto),
        logging: LoggingConfig::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_clients() {
    let buffers = Arc::new(BufferPool::new(64));
    let server = Arc::new(Server::bind(&config(64), EchoHandler::new(Arc::clone(&buffers))).unwrap());
    let addr = server.local_addr().unwrap();
    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let clients: Vec<_> = (0..16)
        .map(|i| {
            tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                for round in 0..5 {
                    let msg = format!("client-{i}-round-{round}");
                    stream.write_all(msg.as_bytes()).await.unwrap();
                    let mut reply = vec![0u8; msg.len()];
                    stream.read_exact(&mut reply).await.unwrap();
                    assert_eq!(reply, msg.as_bytes());
                }
            })
        })
        .collect();

    for client in clients {
        within(Duration::from_secs(10), client).await.unwrap();
    }

    let pool = server.pool();
    assert!(wait_until(Duration::from_secs(5), || pool.idle_count() == pool.workers_count()).await);
    assert!(pool.workers_count() <= 16);
    assert!(buffers.count() > 0);

    let stats = server.shutdown();
    assert_eq!(stats.served, 16);
    assert!(wait_until(Duration::from_secs(5), || server.pool().workers_count() == 0).await);
    runner.abort();
}

/// With one worker busy, a second client is shed and sees EOF.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overflow_client_is_closed() {
    let buffers = Arc::new(BufferPool::new(4));
    let server = Arc::new(Server::bind(&config(1), EchoHandler::new(buffers)).unwrap());
    let addr = server.local_addr().unwrap();
    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"hold").await.unwrap();
    let mut reply = [0u8; 4];
    first.read_exact(&mut reply).await.unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    let read = within(Duration::from_secs(5), second.read(&mut buf)).await;
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(wait_until(Duration::from_secs(5), || server.pool().stats().rejected == 1).await);

    drop(first);
    server.shutdown();
    runner.abort();
}
