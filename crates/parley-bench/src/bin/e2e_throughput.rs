//! End-to-end throughput benchmark for Parley.
//!
//! Connects N WebSocket clients to a running server, joins them all to one
//! conversation and has every client send messages as fast as the server
//! accepts them. Clients that fall behind are purged by the hub; the number
//! purged is reported alongside throughput.

use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, kinds, Envelope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const CONVERSATION: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Parley end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin parley");
    println!();

    run_conversation_benchmark(num_clients).await;
}

async fn run_conversation_benchmark(num_clients: usize) {
    println!("Conversation benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let dropped = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let dropped = Arc::clone(&dropped);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, received, dropped, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("All {} clients joined '{}'", num_clients, CONVERSATION);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  Clients:          {:>10}", num_clients);
    println!("  Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  Delivered:        {:>10}", total);
    println!("  Throughput:       {:>10.0} msg/s", per_sec);
    println!("  Per client:       {:>10.0} msg/s", per_sec / num_clients as f64);
    println!("  Purged clients:   {:>10}", dropped.load(Ordering::SeqCst));

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let url = format!("{}?user_id=bench-{}", SERVER_URL, client_id);
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Conversation list snapshot
    let _ = receiver.next().await;

    let join = codec::encode(&Envelope::new(kinds::JOIN_CONVERSATION, CONVERSATION))?;
    sender.send(Message::Text(String::from_utf8(join.to_vec())?)).await?;

    barrier.wait().await;

    let message = codec::encode(
        &Envelope::new(kinds::MESSAGE, format!("hello from {}", client_id))
            .with_conversation(CONVERSATION),
    )?;
    let message = Message::Text(String::from_utf8(message.to_vec())?);

    // Full-duplex: count deliveries on a separate task
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(_)) => {
                    received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        dropped.fetch_add(1, Ordering::Relaxed);
    });

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
