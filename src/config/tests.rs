use super::*;
use std::path::Path;

#[test]
fn defaults_pass_validation() {
    let cfg = GatewayConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.port, 3000);
    assert_eq!(cfg.rate_limit.max_requests, 100);
    assert!(cfg.trust_proxy);
    assert!(cfg.stealth_mode);
}

#[test]
fn load_missing_file_falls_back_to_defaults() {
    let cfg = GatewayConfig::load(Path::new("/nonexistent/path/config.toml")).unwrap();
    assert_eq!(cfg.host, "0.0.0.0");
}

#[test]
fn rejects_zero_max_requests() {
    let mut cfg = GatewayConfig::default();
    cfg.rate_limit.max_requests = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_short_window() {
    let mut cfg = GatewayConfig::default();
    cfg.rate_limit.window_ms = 500;
    assert!(cfg.validate().is_err());
}

#[test]
fn reputation_check_mode_defaults_async() {
    let cfg = ReputationConfig::default();
    assert!(cfg.check_async());
}

#[test]
fn split_csv_trims_and_drops_empty() {
    assert_eq!(
        split_csv(" a, b ,,c"),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[test]
fn parse_bool_accepts_numeric_and_word_forms() {
    assert!(parse_bool("true", false));
    assert!(parse_bool("1", false));
    assert!(!parse_bool("false", true));
    assert!(!parse_bool("0", true));
    assert!(parse_bool("garbage", true));
}
