use crate::config::schema::ConfigSnapshot;
use std::path::Path;

/// Result of parsing and validating a config document.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parses a TOML document into a `ConfigSnapshot`. Unknown fields are kept
/// in each section's overflow map rather than rejected.
pub fn parse(text: &str) -> Result<ConfigSnapshot, String> {
    toml::from_str(text).map_err(|e| e.to_string())
}

pub async fn load_from_path(path: &Path) -> Result<ConfigSnapshot, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read config file {}: {e}", path.display()))?;
    parse(&text)
}

/// Runs structural validation beyond what `serde` enforces: referential
/// sanity checks the schema's `Deserialize` impl cannot express.
pub fn validate(config: &ConfigSnapshot) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.tools.exec.enabled && config.tools.exec.allowed_commands.is_empty() {
        report
            .warnings
            .push("tools.exec is enabled with an empty allow-list; exec will deny every command".to_string());
    }
    if config.tools.file.enabled && config.tools.file.workspace.trim().is_empty() {
        report
            .errors
            .push("tools.file is enabled but tools.file.workspace is empty".to_string());
    }
    if config.agent.provider.trim().is_empty() {
        report
            .warnings
            .push("agent.provider is empty; the router will not be configured".to_string());
    }
    for (name, channel) in &config.channels {
        if channel.enabled && channel.token.trim().is_empty() {
            report
                .errors
                .push(format!("channels.{name} is enabled but has no token"));
        }
    }
    if let Some(limit) = config.rate_limit_per_minute {
        if limit == 0 {
            report
                .warnings
                .push("rate_limit_per_minute is 0; rate limiting is disabled".to_string());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let config = parse("").unwrap();
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn unknown_top_level_sections_are_ignored() {
        let config = parse("[totally_unknown]\nfoo = 1\n").unwrap();
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn unknown_fields_within_known_sections_flow_to_overflow() {
        let config = parse("[agent]\nprovider = \"anthropic\"\nsome_future_field = true\n").unwrap();
        assert_eq!(config.agent.provider, "anthropic");
        assert_eq!(config.agent.overflow.get("some_future_field"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn validate_flags_exec_enabled_without_allow_list() {
        let config = parse("[tools.exec]\nenabled = true\n").unwrap();
        let report = validate(&config);
        assert!(report.is_valid());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn validate_errors_on_enabled_channel_without_token() {
        let config = parse("[channels.telegram]\nenabled = true\n").unwrap();
        let report = validate(&config);
        assert!(!report.is_valid());
    }
}
