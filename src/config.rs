use std::env;
use std::time::Duration;

/// Placeholder credential used when `GROQ_API_KEY` is unset. Upstream calls
/// made with it are rejected, so production deployments must override it.
pub const FALLBACK_GROQ_API_KEY: &str = "gsk-unset-set-GROQ_API_KEY";

pub const DEFAULT_GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";

#[derive(Debug, Clone)]
pub struct Config {
    pub groq_api_key: String,
    pub groq_model: String,
    pub groq_endpoint: String,
    pub bind_address: String,
    pub max_upload_bytes: usize,
    pub session_ttl: Option<Duration>,
    pub parse_timeout: Duration,
    pub llm_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groq_api_key: FALLBACK_GROQ_API_KEY.to_string(),
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            groq_endpoint: DEFAULT_GROQ_ENDPOINT.to_string(),
            bind_address: "127.0.0.1:5000".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            session_ttl: Some(Duration::from_secs(2 * 60 * 60)),
            parse_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if present (silently ignored if missing)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let groq_api_key =
            env::var("GROQ_API_KEY").unwrap_or_else(|_| FALLBACK_GROQ_API_KEY.to_string());
        let groq_model = env::var("GROQ_MODEL").unwrap_or(defaults.groq_model);
        let groq_endpoint = env::var("GROQ_ENDPOINT").unwrap_or(defaults.groq_endpoint);
        let bind_address = env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);
        let session_ttl = match parse_var::<u64>("SESSION_TTL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.session_ttl,
        };
        let parse_timeout = parse_var("PARSE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.parse_timeout);
        let llm_timeout = parse_var("LLM_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.llm_timeout);

        Ok(Self {
            groq_api_key,
            groq_model,
            groq_endpoint,
            bind_address,
            max_upload_bytes,
            session_ttl,
            parse_timeout,
            llm_timeout,
        })
    }

    pub fn uses_fallback_key(&self) -> bool {
        self.groq_api_key == FALLBACK_GROQ_API_KEY
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}
