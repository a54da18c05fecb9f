//! Graceful shutdown demo: a signal-bridged root with a small worker tree.
//!
//! Run with `cargo run --example graceful`, then press Ctrl-C.

use std::time::Duration;

use proc_graph::Process;

#[tokio::main]
async fn main() -> proc_graph::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let root = Process::with_ctrl_c();

    for worker in 0..4 {
        root.go(move |p| async move {
            let mut ticks = 0u64;
            let closing = p.closing();
            loop {
                tokio::select! {
                    () = closing.wait() => {
                        println!("worker {worker} draining after {ticks} ticks");
                        break;
                    }
                    () = tokio::time::sleep(Duration::from_millis(500)) => {
                        ticks += 1;
                        println!("worker {worker} tick {ticks}");
                    }
                }
            }
        });
    }

    println!("running; press Ctrl-C to shut down");
    root.closed().wait().await;
    println!("all workers drained");
    Ok(())
}
