use autobind::config::{EngineConfig, RunnerKind, StoreKind};
use autobind::error::AutobindError;
use autobind::services::Services;

#[test]
fn defaults_are_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.runner, RunnerKind::Pool);
    assert_eq!(config.store, StoreKind::Memory);
    assert_eq!(config.history_capacity, 10);
}

#[test]
fn a_missing_file_falls_back_to_defaults() {
    let config = EngineConfig::load("no_such_autobind_config").expect("config");
    assert!(config.pool_parallelism >= 1);
}

#[test]
fn invalid_settings_are_rejected() {
    for config in [
        EngineConfig { pool_parallelism: 0, ..Default::default() },
        EngineConfig { history_capacity: 0, ..Default::default() },
        EngineConfig { history_renumber_factor: 0, ..Default::default() },
    ] {
        assert!(matches!(config.validate(), Err(AutobindError::Config(_))));
        assert!(matches!(Services::new(config), Err(AutobindError::Config(_))));
    }
}

#[test]
fn the_error_hook_can_be_replaced() {
    let services = Services::new(EngineConfig::default()).expect("services");
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    services.set_error_hook(move |context, e| sink.lock().unwrap().push(format!("{}: {}", context, e)));
    services.report("count", &AutobindError::invocation("getCount", "offline"));
    assert_eq!(*seen.lock().unwrap(), vec!["count: Invocation of 'getCount' failed: offline"]);
}
