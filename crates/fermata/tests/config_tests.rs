use fermata::{Pool, PoolBuilder, PoolConfig, PoolError, ReusePolicy};
use std::env;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

// Environment variables are process-wide; tests touching them take this lock.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 5] = [
    "FERMATA_INITIAL_CAP",
    "FERMATA_MAX_CAP",
    "FERMATA_REUSE",
    "FERMATA_EVENT_BATCH",
    "FERMATA_THREAD_NAME",
];

fn clear_env() {
    for var in VARS {
        unsafe { env::remove_var(var) };
    }
}

#[test]
fn test_config_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let config = PoolConfig::from_env().expect("Failed to load config");

    assert_eq!(config, PoolConfig::default());
    assert_eq!(config.initial_cap, 0);
    assert_eq!(config.max_cap, 8);
    assert_eq!(config.reuse, ReusePolicy::Fifo);
    assert_eq!(config.event_batch, 128);
    assert_eq!(config.thread_name, "fermata-monitor");
}

#[test]
fn test_config_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        env::set_var("FERMATA_INITIAL_CAP", "2");
        env::set_var("FERMATA_MAX_CAP", "32");
        env::set_var("FERMATA_REUSE", "LIFO");
        env::set_var("FERMATA_EVENT_BATCH", "64");
        env::set_var("FERMATA_THREAD_NAME", "redis-liveness");
    }

    let config = PoolConfig::from_env().expect("Failed to load config");
    clear_env();

    assert_eq!(config.initial_cap, 2);
    assert_eq!(config.max_cap, 32);
    assert_eq!(config.reuse, ReusePolicy::Lifo);
    assert_eq!(config.event_batch, 64);
    assert_eq!(config.thread_name, "redis-liveness");
}

#[test]
fn test_config_unparsable_values_fall_back() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    unsafe {
        env::set_var("FERMATA_MAX_CAP", "many");
        env::set_var("FERMATA_REUSE", "random");
    }

    let config = PoolConfig::from_env().expect("Failed to load config");
    clear_env();

    assert_eq!(config.max_cap, 8);
    assert_eq!(config.reuse, ReusePolicy::Fifo);
}

#[test]
fn test_config_from_env_validates_capacities() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    unsafe {
        env::set_var("FERMATA_INITIAL_CAP", "10");
        env::set_var("FERMATA_MAX_CAP", "4");
    }

    let result = PoolConfig::from_env();
    clear_env();

    assert!(matches!(
        result,
        Err(PoolError::InvalidCapacity { initial_cap: 10, max_cap: 4 })
    ));
}

#[test]
fn test_builder_from_config() {
    let config = PoolConfig {
        initial_cap: 1,
        max_cap: 2,
        thread_name: "builder-monitor".to_string(),
        ..PoolConfig::default()
    };

    let peers = Arc::new(Mutex::new(Vec::new()));
    let held = Arc::clone(&peers);
    let pool: Pool<UnixStream> = PoolBuilder::from_config(config)
        .event_batch(4)
        .build(move || -> std::io::Result<UnixStream> {
            let (local, peer) = UnixStream::pair()?;
            held.lock().unwrap().push(peer);
            Ok(local)
        })
        .expect("Failed to build pool");

    assert_eq!(pool.size(), 1);
    assert_eq!(pool.max_cap(), 2);
    assert!(pool.is_monitoring());
    assert_eq!(peers.lock().unwrap().len(), 1);
}

#[test]
fn test_builder_rejects_invalid_capacity() {
    let result: fermata::PoolResult<Pool<UnixStream>> = PoolBuilder::new()
        .initial_cap(3)
        .max_cap(1)
        .build(|| UnixStream::pair().map(|(local, _peer)| local));
    assert!(matches!(result, Err(PoolError::InvalidCapacity { .. })));
}
