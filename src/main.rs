//! Walkthrough of the engine: a leaderboard sorted set, then the keyspace
//! with TTLs and off-thread release of a large set.
//!
//! Set `RUST_LOG=debug` to see rehash and expiry events.

use kvcore::{Keyspace, KeyspaceConfig, SortedSet, Ttl, WorkerPool};
use std::collections::hash_map::RandomState;
use std::error::Error;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn leaderboard() {
    println!("\n1. Sorted set");
    let mut board = SortedSet::new();
    for (name, score) in [
        (&b"alice"[..], 100.5),
        (b"bob", 85.0),
        (b"charlie", 92.3),
        (b"diana", 110.2),
    ] {
        board.insert(name, score);
    }
    println!("   alice: {:?}", board.score(b"alice"));
    println!("   bob:   {:?}", board.score(b"bob"));

    println!("   rescoring alice to 95.0");
    board.insert(b"alice", 95.0);
    println!("   alice: {:?}", board.score(b"alice"));

    println!("   players with score >= 90.0:");
    for (id, m) in board.range(90.0, b"", 0, 10) {
        println!(
            "     #{} {} ({})",
            board.rank(id).unwrap_or_default(),
            String::from_utf8_lossy(m.name()),
            m.score()
        );
    }

    println!("\n2. Hash index");
    println!("   members: {}", board.len());

    println!("\n3. Order tree");
    let first = board.seek_ge(f64::NEG_INFINITY, b"");
    let last = first.and_then(|id| board.offset(id, board.len() as i64 - 1));
    if let Some(m) = last.and_then(|id| board.get(id)) {
        println!("   top player: {}", String::from_utf8_lossy(m.name()));
    }
}

fn keyspace(pool: Arc<WorkerPool>) -> Result<(), Box<dyn Error>> {
    println!("\n4. Keyspace");
    let config = KeyspaceConfig {
        large_container_size: 100,
        ..KeyspaceConfig::default()
    };
    let mut ks = Keyspace::with_config(config, RandomState::new())?.with_pool(pool);
    let now = now_ms();

    ks.set(b"greeting", b"hello");
    ks.pexpire(b"greeting", 50, now);
    for i in 0..1_000u32 {
        ks.zadd(b"scores", f64::from(i), format!("p{i}").as_bytes())?;
    }
    println!("   keys: {}", ks.len());
    if let Ttl::Remaining(ms) = ks.pttl(b"greeting", now) {
        println!("   greeting expires in {ms} ms");
    }

    let expired = ks.expire_due(now + 50);
    println!("   expired {expired} key(s); greeting = {:?}", ks.get(b"greeting")?);

    ks.del(b"scores");
    info!(keys = ks.len(), "large sorted set handed to the worker pool");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("=== kvcore demo ===");
    leaderboard();

    let pool = Arc::new(WorkerPool::new(4)?);
    keyspace(Arc::clone(&pool))?;
    println!("\n=== done ===");
    Ok(())
}
