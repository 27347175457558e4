use lumen::comp::Context;
use lumen::core::config::EngineConfig;
use lumen::core::errors::ErrorKind;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lumen.yaml");
    std::fs::write(
        &path,
        format!(
            "dist:\n  sync_timeout_ms: 1500\n  compress_sync: false\nplugins:\n  directories: [\"{}\"]\n",
            dir.path().join("plugins").display()
        ),
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.dist.sync_timeout(), Duration::from_millis(1500));
    assert!(!config.dist.compress_sync);
    assert_eq!(config.log.level, "info");

    // Missing plugin directories only produce a warning
    let ctx = Context::from_plugin_config(&config.plugins).unwrap();
    assert!(ctx.registry().contains("group"));
    assert!(ctx.modules().loaded().is_empty());
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "dist:\n  compression_level: 99\n").unwrap();
    assert_eq!(EngineConfig::from_file(&path).unwrap_err().kind(), ErrorKind::Configuration);

    std::fs::write(&path, "dist: [not, a, map]\n").unwrap();
    assert_eq!(EngineConfig::from_file(&path).unwrap_err().kind(), ErrorKind::Serialization);

    let err = EngineConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_missing_module_is_load_error() {
    let mut config = EngineConfig::default();
    config.plugins.modules.push("/nonexistent/lumen_missing".into());
    match Context::from_plugin_config(&config.plugins) {
        Ok(_) => panic!("loading a missing module should fail"),
        Err(e) => assert_eq!(e.kind(), ErrorKind::LoadError),
    }
}

#[test]
fn test_worker_reaches_default_bind_address() {
    let config = EngineConfig::default();
    let port = config.dist.bind_address.rsplit_once(':').unwrap().1;
    assert_eq!(config.dist.connect_address(), format!("127.0.0.1:{}", port));

    let mut config = EngineConfig::default();
    config.dist.bind_address = "[::]:6000".into();
    assert_eq!(config.dist.connect_address(), "[::1]:6000");

    config.dist.bind_address = "10.0.0.7:6000".into();
    assert_eq!(config.dist.connect_address(), "10.0.0.7:6000");
}
