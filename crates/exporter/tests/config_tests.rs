//! Integration tests for configuration parsing
//!
//! Tests exporter configuration parsing, including:
//! - Minimal and full config files
//! - Defaults for missing sections
//! - Invalid configuration handling
//! - Save and reload

use exporter::{ExporterConfig, FailurePolicy};
use std::time::Duration;

mod parsing {
    use super::*;

    const MINIMAL_CONFIG: &str = r#"
[server]
listen_addr = "127.0.0.1:9120"
"#;

    const FULL_CONFIG: &str = r#"
[server]
listen_addr = "192.168.1.100:9200"
metrics_path = "/probe/temper"
log_level = "debug"

[polling]
interval_ms = 5000
calibration_offset = -64
calibration_offsets = [128, -32]
on_failure = "abort"
"#;

    #[test]
    fn test_minimal_config() {
        let config = ExporterConfig::parse(MINIMAL_CONFIG).unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9120");
        assert_eq!(config.server.metrics_path, "/metrics");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.polling.interval(), Duration::from_secs(1));
        assert_eq!(config.polling.calibration_offset, 0);
        assert!(config.polling.calibration_offsets.is_empty());
        assert_eq!(config.polling.on_failure, FailurePolicy::Retire);
    }

    #[test]
    fn test_full_config() {
        let config = ExporterConfig::parse(FULL_CONFIG).unwrap();

        let addr = config.server.socket_addr().unwrap();
        assert_eq!(addr.port(), 9200);
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(config.server.metrics_path, "/probe/temper");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.polling.interval(), Duration::from_secs(5));
        assert_eq!(config.polling.on_failure, FailurePolicy::Abort);

        assert_eq!(config.polling.offset_for(0), 128);
        assert_eq!(config.polling.offset_for(1), -32);
        assert_eq!(config.polling.offset_for(2), -64);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ExporterConfig::parse("").unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9120");
        assert_eq!(config.polling.interval_ms, 1000);
    }
}

mod invalid {
    use super::*;

    #[test]
    fn test_malformed_toml() {
        assert!(ExporterConfig::parse("[server\nlisten_addr = ").is_err());
    }

    #[test]
    fn test_unknown_failure_policy() {
        let content = r#"
[polling]
on_failure = "ignore"
"#;
        assert!(ExporterConfig::parse(content).is_err());
    }

    #[test]
    fn test_bad_listen_addr() {
        let content = r#"
[server]
listen_addr = "localhost"
"#;
        assert!(ExporterConfig::parse(content).is_err());
    }

    #[test]
    fn test_zero_interval() {
        let content = r#"
[polling]
interval_ms = 0
"#;
        assert!(ExporterConfig::parse(content).is_err());
    }

    #[test]
    fn test_reserved_metrics_path() {
        let content = r#"
[server]
metrics_path = "/health"
"#;
        assert!(ExporterConfig::parse(content).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ExporterConfig::load(Some(dir.path().join("missing.toml")));
        assert!(result.is_err());
    }
}

mod persistence {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("exporter.toml");

        let mut config = ExporterConfig::default();
        config.server.set_port(9300).unwrap();
        config.polling.calibration_offsets = vec![7, -7];
        config.polling.on_failure = FailurePolicy::Abort;
        config.save(&path).unwrap();

        let loaded = ExporterConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.server.listen_addr, "0.0.0.0:9300");
        assert_eq!(loaded.polling.calibration_offsets, vec![7, -7]);
        assert_eq!(loaded.polling.on_failure, FailurePolicy::Abort);
    }
}
