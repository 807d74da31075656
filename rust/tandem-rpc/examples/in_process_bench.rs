//! In-process RPC benchmark: two complete nodes over a loopback link.
//!
//! Measures synchronous echo round-trips and fire-and-forget throughput.
//!
//! Usage:
//! - `cargo run -p tandem-rpc --release --example in_process_bench`
//! - `cargo run -p tandem-rpc --release --example in_process_bench -- 100000`

use std::env;
use std::time::{Duration, Instant};

use tandem_link::{LinkConfig, loopback_pair};
use tandem_rpc::{DispatchConfig, NodeConfig, ProgramDef, RpcNode};

const ECHO: u32 = 0x2000_0001;

fn main() {
    let iterations: u32 = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(50_000);

    let (a, b) = loopback_pair(LinkConfig {
        ring_capacity: 256,
        ..LinkConfig::default()
    })
    .expect("loopback link");
    let config = NodeConfig {
        dispatch: DispatchConfig {
            workers: 2,
            capacity: 512,
            ..DispatchConfig::default()
        },
        call_timeout: Duration::from_secs(10),
    };
    let client = RpcNode::new(a, config.clone()).expect("client node");
    let server = RpcNode::new(b, config).expect("server node");

    server
        .register(ProgramDef::new("echo", ECHO, 1).procedure(1, |args| Ok(args.to_vec())))
        .expect("register echo");

    let payload = vec![0xA5u8; 64];

    // Synchronous round-trips.
    let started = Instant::now();
    for _ in 0..iterations {
        let reply = client.call(ECHO, 1, 1, &payload).expect("echo call");
        assert_eq!(reply.len(), payload.len());
    }
    let elapsed = started.elapsed();
    println!(
        "sync: {iterations} round-trips in {elapsed:?} ({:.0}/s, {:?}/call)",
        iterations as f64 / elapsed.as_secs_f64(),
        elapsed / iterations
    );

    // Fire-and-forget.
    let started = Instant::now();
    let mut sent = 0u32;
    while sent < iterations {
        match client.call_oneway(ECHO, 1, 1, &payload) {
            Ok(()) => sent += 1,
            Err(_) => std::thread::yield_now(),
        }
    }
    let elapsed = started.elapsed();
    println!(
        "oneway: {iterations} sends in {elapsed:?} ({:.0}/s)",
        iterations as f64 / elapsed.as_secs_f64()
    );

    let counts = server.worker_counts();
    println!("server worker serviced counts: {counts:?}");
}
