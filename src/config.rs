use crate::gateway::{ApiFlavor, CallOptions, GatewayConfig};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LANGS: &str = "it,pt-br,tr,es-es,sv,nl";

#[derive(Debug, Clone)]
pub struct Config {
    // OpenAI
    pub openai_api_key: String,
    pub openai_api_url: String,
    pub openai_model: String,
    pub use_responses_api: bool,

    // Model calls
    pub batch_size: usize,
    pub llm_timeout_secs: u64,
    pub temperature: f32,
    pub max_retries: u32,
    pub trace_prompts: bool,

    // Paths
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub prompt_template_path: Option<PathBuf>,

    pub default_langs: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let batch_size: usize = parse_var("BATCH_SIZE", 10)?;
        if batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        let max_retries: u32 = parse_var("MAX_RETRIES", 4)?;
        if max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }

        let llm_timeout_secs: u64 = parse_var("LLM_TIMEOUT", 120)?;
        if llm_timeout_secs == 0 {
            bail!("LLM_TIMEOUT must be at least 1 second");
        }

        Ok(Self {
            // OpenAI
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .map(|k| k.trim().to_string())
                .unwrap_or_default(),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            use_responses_api: flag_var("USE_RESPONSES_API"),

            // Model calls
            batch_size,
            llm_timeout_secs,
            temperature: parse_var("TEMPERATURE", 0.0)?,
            max_retries,
            trace_prompts: flag_var("TRACE_PROMPTS"),

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("outputs")),
            prompt_template_path: std::env::var("PROMPT_TEMPLATE_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),

            default_langs: parse_langs(
                &std::env::var("DEFAULT_LANGS").unwrap_or_else(|_| DEFAULT_LANGS.to_string()),
            ),
        })
    }

    /// The API key, which every run that reaches the model needs.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.openai_api_key.is_empty() {
            bail!("OPENAI_API_KEY not set");
        }
        Ok(&self.openai_api_key)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("tmp_cache.jsonl")
    }

    pub fn canned_path(&self) -> PathBuf {
        self.data_dir.join("canned_translations.json")
    }

    pub fn translated_dir(&self) -> PathBuf {
        self.output_dir.join("translated_csv")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            model: self.openai_model.clone(),
            timeout: Duration::from_secs(self.llm_timeout_secs),
            max_retries: self.max_retries,
            temperature: self.temperature,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(
            self.openai_api_key.clone(),
            self.openai_api_url.clone(),
            self.log_dir(),
        )
        .with_flavor(ApiFlavor::select(
            self.use_responses_api,
            &self.openai_api_key,
        ))
        .with_trace_prompts(self.trace_prompts)
    }
}

/// Split a comma-separated language list, dropping blanks.
pub fn parse_langs(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, value)),
        _ => Ok(default),
    }
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 13] = [
        "OPENAI_API_KEY",
        "OPENAI_API_URL",
        "OPENAI_MODEL",
        "USE_RESPONSES_API",
        "BATCH_SIZE",
        "LLM_TIMEOUT",
        "TEMPERATURE",
        "MAX_RETRIES",
        "TRACE_PROMPTS",
        "DATA_DIR",
        "OUTPUT_DIR",
        "PROMPT_TEMPLATE_PATH",
        "DEFAULT_LANGS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.openai_api_url, "https://api.openai.com/v1");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.llm_timeout_secs, 120);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_retries, 4);
        assert!(!config.use_responses_api);
        assert!(!config.trace_prompts);
        assert!(config.prompt_template_path.is_none());
        assert_eq!(
            config.default_langs,
            vec!["it", "pt-br", "tr", "es-es", "sv", "nl"]
        );
        assert_eq!(config.cache_path(), PathBuf::from("data/tmp_cache.jsonl"));
        assert_eq!(config.canned_path(), PathBuf::from("data/canned_translations.json"));
        assert_eq!(config.translated_dir(), PathBuf::from("outputs/translated_csv"));
        assert_eq!(config.log_dir(), PathBuf::from("outputs/logs"));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "  sk-test \n");
        std::env::set_var("OPENAI_MODEL", "gpt-4o-mini");
        std::env::set_var("BATCH_SIZE", "25");
        std::env::set_var("LLM_TIMEOUT", "30");
        std::env::set_var("TEMPERATURE", "0.3");
        std::env::set_var("USE_RESPONSES_API", "true");
        std::env::set_var("DATA_DIR", "/tmp/st-data");
        std::env::set_var("DEFAULT_LANGS", " de , fr ,,");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.default_langs, vec!["de", "fr"]);
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/st-data/tmp_cache.jsonl"));

        let options = config.call_options();
        assert_eq!(options.model, "gpt-4o-mini");
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!((options.temperature - 0.3).abs() < f32::EPSILON);

        assert_eq!(config.gateway_config().flavor, ApiFlavor::Responses);
    }

    #[test]
    #[serial]
    fn test_project_key_selects_responses_api() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-proj-abc");
        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.gateway_config().flavor, ApiFlavor::Responses);
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_are_errors() {
        clear_env();
        std::env::set_var("BATCH_SIZE", "ten");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));

        std::env::set_var("BATCH_SIZE", "0");
        assert!(Config::from_env().is_err());
        clear_env();

        std::env::set_var("LLM_TIMEOUT", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("LLM_TIMEOUT"));
        clear_env();
    }

    #[test]
    fn test_parse_langs() {
        assert_eq!(parse_langs("it, sv ,nl"), vec!["it", "sv", "nl"]);
        assert!(parse_langs(" , ").is_empty());
    }
}
