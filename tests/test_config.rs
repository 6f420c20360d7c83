use std::time::Duration;

use vessel::config::{Config, CONFIG_ENV, LISTEN_ENV};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.mount_prefix, "");
    assert_eq!(cfg.server.accept_timeout(), Duration::from_millis(500));
    assert_eq!(cfg.server.keep_alive_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.server.server_name, "vessel");
    assert_eq!(cfg.pool.max_handlers, 64);
    assert_eq!(cfg.pool.min_idle_handlers, 4);
    assert_eq!(cfg.pool.idle_timeout(), Duration::from_secs(60));
    assert_eq!(cfg.sessions.timeout_secs, 1800);
}

#[test]
fn test_config_partial_yaml_keeps_defaults() {
    let cfg = Config::from_yaml_str(
        "server:\n  listen_addr: 0.0.0.0:3000\n  mount_prefix: /app\npool:\n  max_handlers: 8\n",
    )
    .unwrap();

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.server.mount_prefix, "/app");
    assert_eq!(cfg.server.read_timeout_ms, 30_000);
    assert_eq!(cfg.pool.max_handlers, 8);
    assert_eq!(cfg.pool.max_requests, 128);
    assert_eq!(cfg.sessions.purge_interval_secs, 60);
}

#[test]
fn test_config_invalid_yaml_is_an_error() {
    assert!(Config::from_yaml_str("server: [not, a, map]").is_err());
}

#[test]
fn test_config_missing_file_is_an_error() {
    let err = Config::from_file("/nonexistent/vessel.yaml").unwrap_err();
    assert!(err.to_string().contains("reading config file"));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}

// Environment variables are process-wide, so every env-driven case runs
// in this one test.
#[test]
fn test_config_environment_overrides() {
    let path = std::env::temp_dir().join(format!("vessel-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "sessions:\n  timeout_secs: 60\n").unwrap();

    unsafe {
        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var(LISTEN_ENV);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");

    unsafe {
        std::env::set_var(LISTEN_ENV, "0.0.0.0:5000");
    }
    let cfg = Config::load().unwrap();
    assert!(cfg.server.listen_addr.starts_with("0.0.0.0"));
    assert!(cfg.server.listen_addr.contains("5000"));

    unsafe {
        std::env::set_var(CONFIG_ENV, &path);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.sessions.timeout_secs, 60);
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:5000");

    unsafe {
        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var(LISTEN_ENV);
    }
    let _ = std::fs::remove_file(&path);
}
