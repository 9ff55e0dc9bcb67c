use crate::config::types::AgentConfig;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(AgentConfig)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AgentConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Overrides config fields from `TRAWLER_*` environment variables
///
/// Any field of [`AgentConfig`] can be overridden by exporting its name
/// upper-cased with the `TRAWLER_` prefix, e.g. `TRAWLER_API_PORT=9999`.
/// Boolean fields accept the same literals the control plane does.
pub fn apply_env(config: &mut AgentConfig) -> Result<(), ConfigError> {
    let var = |name: &str| std::env::var(format!("TRAWLER_{name}")).ok();

    if let Some(v) = var("ID") {
        config.id = v;
    }
    if let Some(v) = var("RUN_DIR") {
        config.run_dir = Some(v.into());
    }
    if let Some(v) = var("DB_PATH") {
        config.db_path = v.into();
    }
    if let Some(v) = var("API_ADDR") {
        config.api_addr = v;
    }
    if let Some(v) = var("API_PORT") {
        config.api_port = parse_num(&v, "api_port")?;
    }
    if let Some(v) = var("FORCE") {
        config.force = coerce_bool(&v);
    }
    if let Some(v) = var("WAIT") {
        config.wait = parse_num(&v, "wait")?;
    }
    if let Some(v) = var("DOMAIN_WAIT") {
        config.domain_wait = parse_num(&v, "domain_wait")?;
    }
    if let Some(v) = var("RANDOM_WAIT") {
        config.random_wait = coerce_bool(&v);
    }
    if let Some(v) = var("NO_CACHE") {
        config.no_cache = coerce_bool(&v);
    }
    if let Some(v) = var("USER_AGENT") {
        config.user_agent = Some(v);
    }
    if let Some(v) = var("VERIFY") {
        config.verify = coerce_bool(&v);
    }
    if let Some(v) = var("LEVEL") {
        config.level = parse_num(&v, "level")?;
    }
    if let Some(v) = var("SPAN_HOSTS") {
        config.span_hosts = coerce_bool(&v);
    }
    if let Some(v) = var("SAVE_PATH") {
        config.save_path = Some(v.into());
    }
    Ok(())
}

/// Resolves derived fields after all layers have been merged
///
/// Mirrors `user_agent` into the `User-Agent` header and picks the
/// built-in agent string when none was configured.
pub fn finalize(config: &mut AgentConfig) {
    let agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| format!("trawler {}", env!("CARGO_PKG_VERSION")));
    config
        .headers
        .insert("User-Agent".to_string(), agent.clone());
    config.user_agent = Some(agent);
}

/// Parses a `Name: value` header line
pub fn parse_header_line(line: &str) -> Result<(String, String), ConfigError> {
    match line.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidHeader(line.to_string())),
    }
}

/// Interprets the boolean literals accepted over the wire
///
/// `"True"` (any case) and `"1"` are true; `"False"`, `"None"`, and
/// anything else are false.
pub fn coerce_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn parse_num<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{field}: not a number: {value}")))
}

fn validate(config: &AgentConfig) -> Result<(), ConfigError> {
    if config.id.trim().is_empty() {
        return Err(ConfigError::Validation("id must not be empty".to_string()));
    }
    if config.api_addr.trim().is_empty() {
        return Err(ConfigError::Validation(
            "api_addr must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
id = "archive-1"
api_port = 9999
wait = 5
domain_wait = 30
save_html = false

[headers]
"X-Requested-With" = "trawler"
"#;
        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.id, "archive-1");
        assert_eq!(config.api_port, 9999);
        assert_eq!(config.wait, 5);
        assert!(!config.save_html);
        assert_eq!(
            config.headers.get("X-Requested-With").map(String::as_str),
            Some("trawler")
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(std::path::Path::new("/nonexistent/trawler.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_empty_id_rejected() {
        let file = create_temp_config("id = \"\"");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = parse_header_line("Accept: text/html").unwrap();
        assert_eq!(name, "Accept");
        assert_eq!(value, "text/html");

        // Values may themselves contain colons
        let (name, value) = parse_header_line("Referer: http://example.com/a").unwrap();
        assert_eq!(name, "Referer");
        assert_eq!(value, "http://example.com/a");

        assert!(parse_header_line("no-colon-here").is_err());
    }

    #[test]
    fn test_coerce_bool_literals() {
        assert!(coerce_bool("True"));
        assert!(coerce_bool("true"));
        assert!(coerce_bool("1"));
        assert!(!coerce_bool("False"));
        assert!(!coerce_bool("None"));
        assert!(!coerce_bool("yes"));
    }

    #[test]
    fn test_finalize_mirrors_user_agent() {
        let mut config = AgentConfig {
            user_agent: Some("archive-bot/2".to_string()),
            ..Default::default()
        };
        finalize(&mut config);
        assert_eq!(
            config.headers.get("User-Agent").map(String::as_str),
            Some("archive-bot/2")
        );

        let mut config = AgentConfig::default();
        finalize(&mut config);
        assert!(config
            .headers
            .get("User-Agent")
            .unwrap()
            .starts_with("trawler "));
    }
}
