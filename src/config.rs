use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    // LLM configuration
    pub llm_provider: String, // e.g., "groq", "openai", "ollama"
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_secs: u64,

    // Ollama configuration (optional)
    pub ollama_endpoint: Option<String>, // e.g., "http://localhost:11434"

    // Embedding classifier artifacts
    pub embedding_model_dir: String,
    pub classifier_head_path: String,

    // Ingest working directory for transient artifacts
    pub work_dir: String,

    // HTTP
    pub allowed_origin: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let llm_timeout_secs = match env::var("LLM_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| format!("LLM_TIMEOUT_SECS is not a number: {}", raw))?,
            Err(_) => 10,
        };

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| format!("PORT is not a valid port number: {}", raw))?,
            Err(_) => 8000,
        };

        Ok(Config {
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".to_string()),

            // Absence is not an error: the LLM stage degrades to a fixed
            // error string instead of taking the process down.
            llm_api_key: env::var("LLM_API_KEY").ok(),

            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "deepseek-r1-distill-llama-70b".to_string()),

            llm_timeout_secs,

            ollama_endpoint: env::var("OLLAMA_ENDPOINT").ok(),

            embedding_model_dir: env::var("EMBEDDING_MODEL_DIR")
                .unwrap_or_else(|_| "models/all-MiniLM-L6-v2".to_string()),

            classifier_head_path: env::var("CLASSIFIER_HEAD_PATH")
                .unwrap_or_else(|_| "models/log_classifier.json".to_string()),

            work_dir: env::var("WORK_DIR").unwrap_or_else(|_| "resources".to_string()),

            allowed_origin: env::var("ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            port,
        })
    }

    pub fn log_config(&self) {
        tracing::info!("Configuration:");
        tracing::info!("   LLM Provider: {}", self.llm_provider);
        tracing::info!("   LLM Model: {}", self.llm_model);
        match &self.llm_api_key {
            Some(key) => tracing::info!(
                "   LLM API Key: {}***",
                &key.chars().take(4).collect::<String>()
            ),
            None => tracing::warn!("   LLM API Key: not set (LLM stage will degrade)"),
        }
        tracing::info!("   LLM Timeout: {}s", self.llm_timeout_secs);
        if let Some(ref endpoint) = self.ollama_endpoint {
            tracing::info!("   Ollama Endpoint: {}", endpoint);
        }
        tracing::info!("   Embedding Model Dir: {}", self.embedding_model_dir);
        tracing::info!("   Classifier Head: {}", self.classifier_head_path);
        tracing::info!("   Work Dir: {}", self.work_dir);
        tracing::info!("   Allowed Origin: {}", self.allowed_origin);
    }
}
