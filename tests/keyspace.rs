// Keyspace integration suite: command-level behavior over strings, sorted
// sets and TTLs, driven with explicit millisecond timestamps.
use kvcore::{Keyspace, KeyspaceError, Ttl, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

// Test: the command sequence of a small leaderboard session.
// Verifies: zadd/zscore/zquery/zrem map onto nil, integers and pairs.
#[test]
fn leaderboard_session() {
    let mut ks = Keyspace::new();
    assert_eq!(ks.zscore(b"board", b"n1"), Ok(None));
    assert_eq!(ks.zquery(b"board", 1.0, b"", 0, 10), Ok(vec![]));
    assert_eq!(ks.zadd(b"board", 1.0, b"n1"), Ok(true));
    assert_eq!(ks.zadd(b"board", 2.0, b"n2"), Ok(true));
    assert_eq!(ks.zadd(b"board", 1.1, b"n1"), Ok(false));
    assert_eq!(ks.zscore(b"board", b"n1"), Ok(Some(1.1)));
    assert_eq!(ks.zscore(b"board", b"n2"), Ok(Some(2.0)));
    assert_eq!(
        ks.zquery(b"board", 1.0, b"", 0, 10),
        Ok(vec![(b"n1".to_vec(), 1.1), (b"n2".to_vec(), 2.0)])
    );
    assert_eq!(ks.zquery(b"board", 1.0, b"", 1, 10).map(|v| v.len()), Ok(1));
    assert_eq!(ks.zquery(b"board", 1.0, b"", 2, 10), Ok(vec![]));
    assert_eq!(ks.zquery(b"board", 1.0, b"", -1, 10).map(|v| v.len()), Ok(0));
    assert_eq!(ks.zquery(b"board", 1.0, b"", 0, 1).map(|v| v.len()), Ok(1));
    assert_eq!(ks.zrem(b"board", b"adsf"), Ok(false));
    assert_eq!(ks.zrem(b"board", b"n1"), Ok(true));
    assert_eq!(
        ks.zquery(b"board", 1.0, b"", 0, 10),
        Ok(vec![(b"n2".to_vec(), 2.0)])
    );
}

// Test: type checking across commands.
// Verifies: string reads on a sorted set and sorted-set commands on a
// string fail with WrongType and leave the key untouched.
#[test]
fn wrong_type_leaves_key_untouched() {
    let mut ks = Keyspace::new();
    ks.set(b"s", b"v");
    assert_eq!(ks.zrem(b"s", b"x"), Err(KeyspaceError::WrongType));
    assert_eq!(ks.zrank(b"s", b"x"), Err(KeyspaceError::WrongType));
    assert_eq!(
        ks.zquery(b"s", 0.0, b"", 0, 1),
        Err(KeyspaceError::WrongType)
    );
    assert_eq!(ks.get(b"s"), Ok(Some(&b"v"[..])));
    let msg = KeyspaceError::WrongType.to_string();
    assert!(msg.starts_with("WRONGTYPE"));
}

// Test: many keys with staggered TTLs.
// Verifies: sweeps at increasing timestamps remove exactly the due keys
// and next_deadline tracks the earliest survivor.
#[test]
fn staggered_expiry() {
    let mut ks = Keyspace::new();
    for i in 0..100u64 {
        let k = format!("k{i}");
        ks.set(k.as_bytes(), b"v");
        assert!(ks.pexpire(k.as_bytes(), (i * 10) as i64, 1_000));
    }
    ks.set(b"forever", b"v");
    assert_eq!(ks.next_deadline(), Some(1_000));
    assert_eq!(ks.expire_due(1_000), 1);
    assert_eq!(ks.expire_due(1_495), 49);
    assert_eq!(ks.next_deadline(), Some(1_500));
    assert_eq!(ks.pttl(b"k60", 1_495), Ttl::Remaining(105));
    assert_eq!(ks.pttl(b"k10", 1_495), Ttl::Missing);
    assert_eq!(ks.expire_due(10_000), 50);
    assert_eq!(ks.keys(), vec![b"forever".to_vec()]);
    assert_eq!(ks.pttl(b"forever", 0), Ttl::Persistent);
}

// Test: large values with a pool attached, its single worker held busy.
// Verifies: deleting a sorted set above the default threshold queues one
// release job, a set at the threshold queues none, and the pool drains the
// queued release when it shuts down.
#[test]
fn large_sorted_set_delete_with_pool() {
    let pool = Arc::new(WorkerPool::new(1).expect("pool starts"));
    let mut ks = Keyspace::new().with_pool(Arc::clone(&pool));
    let limit = ks.config().large_container_size as u32;
    for i in 0..5_000u32 {
        ks.zadd(b"big", f64::from(i), format!("m{i}").as_bytes())
            .unwrap();
    }
    for i in 0..limit {
        ks.zadd(b"edge", f64::from(i), format!("m{i}").as_bytes())
            .unwrap();
    }

    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let ran = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&ran);
    pool.execute(move || {
        started_tx.send(()).unwrap();
        let _ = gate_rx.recv_timeout(Duration::from_secs(30));
        seen.fetch_add(1, Ordering::SeqCst);
    });
    started_rx.recv().unwrap();

    assert!(ks.del(b"edge"));
    assert_eq!(pool.queued(), 0);
    assert!(ks.del(b"big"));
    assert_eq!(pool.queued(), 1);
    assert!(ks.is_empty());

    drop(gate_tx);
    drop(ks);
    let pool = Arc::try_unwrap(pool).expect("keyspace released its handle");
    drop(pool);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
