//! Connection churn load test.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_churn() {
    let (server, addr, serving) = common::start_echo_server().await;

    let concurrency = 20;
    let connections_per_task = 25;
    let total = concurrency * connections_per_task;

    let start = Instant::now();
    let mut tasks = Vec::new();
    for task in 0..concurrency {
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for i in 0..connections_per_task {
                let req_start = Instant::now();
                let msg = format!("task {} message {}", task, i);
                let Ok(mut stream) = TcpStream::connect(addr).await else {
                    continue;
                };
                if stream.write_all(msg.as_bytes()).await.is_err() {
                    continue;
                }
                let mut reply = vec![0u8; msg.len()];
                if stream.read_exact(&mut reply).await.is_ok() && reply == msg.as_bytes() {
                    latencies.push(req_start.elapsed());
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }
    let duration = start.elapsed();

    assert_eq!(all_latencies.len(), total, "every connection must echo");
    assert_eq!(server.accepted_connections(), total as u64);
    assert!(common::wait_until(Duration::from_secs(5), || server.active_connections() == 0).await);
    // Objects are recycled rather than built per connection.
    assert!(server.pool().created_count() < total as u64);
    assert!(server.pool().reused_count() > 0);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Churn Test Results ---");
    println!("Connections:    {}", total);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Conns/sec:      {:.2}", total as f64 / duration.as_secs_f64());
    println!("P50 Latency:    {:?}", p50);
    println!("P99 Latency:    {:?}", p99);
    println!("Pool objects:   {}", server.pool().created_count());
    println!("--------------------------\n");

    server.shutdown(Duration::from_secs(5)).await.unwrap();
    serving.await.unwrap().unwrap();
}
