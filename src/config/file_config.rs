use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional TOML configuration. Every value present here overrides the
/// matching CLI argument.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    pub export: Option<ExportConfig>,
    pub cleanup: Option<CleanupConfig>,
    pub lease: Option<LeaseConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub endpoint_url: Option<String>,
    pub destination: Option<String>,
    pub format: Option<String>,
    pub period_sec: Option<u64>,
    pub timeout_sec: Option<u64>,
    pub run_on_leadership_gained: Option<bool>,
    // TOML only
    pub anonymous: Option<bool>,
    pub namespace: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: Option<bool>,
    pub on_failure: Option<bool>,
    pub root: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LeaseConfig {
    /// "sqlite" or "memory"
    pub backend: Option<String>,
    pub db_path: Option<String>,
    pub name: Option<String>,
    pub identity: Option<String>,
    pub duration_sec: Option<u64>,
    pub renew_deadline_sec: Option<u64>,
    pub retry_period_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_all_sections() {
        let raw = r#"
            port = 9000
            logging_level = "headers"

            [export]
            endpoint_url = "http://dgraph:8080/admin"
            destination = "s3:///backups/dgraph"
            period_sec = 600
            anonymous = true
            namespace = 2

            [cleanup]
            enabled = true
            pattern = "dump[0-9]+"

            [lease]
            backend = "memory"
            duration_sec = 30
        "#;
        let config: FileConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.port, Some(9000));
        assert_eq!(config.metrics_port, None);
        let export = config.export.unwrap();
        assert_eq!(export.destination.as_deref(), Some("s3:///backups/dgraph"));
        assert_eq!(export.period_sec, Some(600));
        assert_eq!(export.namespace, Some(2));
        assert_eq!(export.format, None);
        let cleanup = config.cleanup.unwrap();
        assert_eq!(cleanup.enabled, Some(true));
        assert_eq!(cleanup.root, None);
        assert_eq!(config.lease.unwrap().backend.as_deref(), Some("memory"));
    }

    #[test]
    fn empty_file_is_valid() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.export.is_none());
        assert!(config.lease.is_none());
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
