use healthbot_core::session_state::{Level, SessionSettings, read_question_count};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level as LogLevel;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backends for the completion port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub tavily_api_key: Option<String>,
    pub log_level: LogLevel,
    pub prompts_path: PathBuf,
    /// Settings given to sessions created without explicit ones.
    pub default_settings: SessionSettings,
    /// Deadline for each completion or search call. `None` disables it.
    pub port_timeout: Option<Duration>,
}

fn parse_level(var: &str, default: Level) -> Result<Level, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<Level>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{other}' is not one of: openai, gemini"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let tavily_api_key = std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<LogLevel>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let difficulty = parse_level("DEFAULT_DIFFICULTY", Level::Medium)?;
        let detail_level = parse_level("DEFAULT_DETAIL_LEVEL", Level::Medium)?;
        let question_count = match std::env::var("DEFAULT_QUESTION_COUNT") {
            Ok(value) => read_question_count(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DEFAULT_QUESTION_COUNT".to_string(),
                    format!("'{value}' is not a number"),
                )
            })?,
            Err(_) => 1,
        };

        let port_timeout = match std::env::var("PORT_TIMEOUT_SECS") {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(ConfigError::InvalidValue(
                        "PORT_TIMEOUT_SECS".to_string(),
                        format!("'{value}' is not a whole number of seconds"),
                    ));
                }
            },
            Err(_) => Some(Duration::from_secs(60)),
        };

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            tavily_api_key,
            log_level,
            prompts_path,
            default_settings: SessionSettings {
                difficulty,
                detail_level,
                question_count,
                pause_between_questions: false,
            },
            port_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("LLM_PROVIDER");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("TAVILY_API_KEY");
            env::remove_var("CHAT_MODEL");
            env::remove_var("RUST_LOG");
            env::remove_var("PROMPTS_PATH");
            env::remove_var("DEFAULT_DIFFICULTY");
            env::remove_var("DEFAULT_DETAIL_LEVEL");
            env::remove_var("DEFAULT_QUESTION_COUNT");
            env::remove_var("PORT_TIMEOUT_SECS");
        }
    }

    fn set_minimal_env_openai() {
        unsafe {
            env::set_var("LLM_PROVIDER", "openai");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal_openai() {
        clear_env_vars();
        set_minimal_env_openai();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.openai_api_key, Some("test-openai-key".to_string()));
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.tavily_api_key, None);
        assert_eq!(config.chat_model, "gpt-4.1");
        assert_eq!(config.log_level, LogLevel::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
        assert_eq!(config.default_settings, SessionSettings::default());
        assert_eq!(config.port_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    #[serial]
    fn test_config_from_env_gemini_provider() {
        clear_env_vars();
        unsafe {
            env::set_var("LLM_PROVIDER", "Gemini");
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.gemini_api_key, Some("test-gemini-key".to_string()));
        assert_eq!(config.openai_api_key, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("TAVILY_API_KEY", "tvly-key");
            env::set_var("CHAT_MODEL", "gpt-4o-mini");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
            env::set_var("DEFAULT_DIFFICULTY", "high");
            env::set_var("DEFAULT_DETAIL_LEVEL", "easy");
            env::set_var("DEFAULT_QUESTION_COUNT", "9");
            env::set_var("PORT_TIMEOUT_SECS", "0");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.tavily_api_key, Some("tvly-key".to_string()));
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.log_level, LogLevel::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
        assert_eq!(config.default_settings.difficulty, Level::Hard);
        assert_eq!(config.default_settings.detail_level, Level::Easy);
        assert_eq!(config.default_settings.question_count, 5);
        assert_eq!(config.port_timeout, None);
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_provider_and_levels() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("LLM_PROVIDER", "anthropic");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "LLM_PROVIDER"),
            _ => panic!("Expected InvalidValue for LLM_PROVIDER"),
        }

        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("DEFAULT_DIFFICULTY", "extreme");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "DEFAULT_DIFFICULTY"),
            _ => panic!("Expected InvalidValue for DEFAULT_DIFFICULTY"),
        }

        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("PORT_TIMEOUT_SECS", "soon");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PORT_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for PORT_TIMEOUT_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();
        unsafe {
            env::set_var("LLM_PROVIDER", "openai");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => {
                assert!(msg.contains("OPENAI_API_KEY"));
            }
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();
        unsafe {
            env::set_var("LLM_PROVIDER", "gemini");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => {
                assert!(msg.contains("GEMINI_API_KEY"));
            }
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }
}
