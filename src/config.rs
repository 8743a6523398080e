use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,

    // Instagram / Meta webhook
    pub ig_access_token: String,
    pub ig_verify_token: String,
    pub ig_app_secret: String,
    pub allowed_sender_ids: Vec<String>,
    pub reaction_bot_sender_id: String,

    // OpenAI-compatible model service
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model_default: String,
    pub model_vision: String,
    pub model_classify: String,
    pub embedding_model: String,

    // Vector index
    pub qdrant_url: String,
    pub conversations_collection: String,
    pub pricing_collection: String,

    // Calendar service
    pub calendar_base_url: String,
    pub calendar_token: String,
    pub calendar_id: String,
    pub studio_timezone: String,

    // Timers and retention
    pub max_history_length: usize,
    pub grace_window_secs: u64,
    pub hold_ttl_secs: i64,
    pub conversation_ttl_secs: i64,
    pub queue_ttl_secs: i64,
    pub mute_secs: i64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 3000),
            database_url: env_or("DATABASE_URL", "inkgram.db"),

            ig_access_token: env_or("IG_USER_ACCESS_TOKEN", ""),
            ig_verify_token: env_or("IG_VERIFY_TOKEN", ""),
            ig_app_secret: env_or("IG_APP_SECRET", ""),
            allowed_sender_ids: env_or("ALLOWED_SENDER_IDS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            reaction_bot_sender_id: env_or("REACTION_BOT_SENDER_ID", ""),

            openai_api_key: env_or("OPENAI_API_KEY", ""),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model_default: env_or("OPENAI_MODEL_DEFAULT", "gpt-4o"),
            model_vision: env_or("OPENAI_MODEL_VISION", "gpt-4o-mini"),
            model_classify: env_or("OPENAI_MODEL_CLASSIFY", "gpt-4o-mini"),
            embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),

            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            conversations_collection: env_or(
                "QDRANT_CONVERSATIONS_COLLECTION",
                "tattoo-conversations",
            ),
            pricing_collection: env_or("QDRANT_PRICING_COLLECTION", "tattoo-pricing"),

            calendar_base_url: env_or(
                "CALENDAR_BASE_URL",
                "https://www.googleapis.com/calendar/v3",
            ),
            calendar_token: env_or("CALENDAR_TOKEN", ""),
            calendar_id: env_or("CALENDAR_ID", "primary"),
            studio_timezone: env_or("STUDIO_TIMEZONE", "Europe/Athens"),

            max_history_length: env_parse("MAX_HISTORY_LENGTH", 20),
            grace_window_secs: env_parse("GRACE_WINDOW_SECONDS", 20),
            hold_ttl_secs: env_parse("HOLD_TTL_SECONDS", 30 * 60),
            conversation_ttl_secs: env_parse("CONVERSATION_TTL_SECONDS", 60 * 60 * 24 * 7),
            queue_ttl_secs: env_parse("QUEUE_TTL_SECONDS", 60 * 10),
            mute_secs: env_parse("MUTE_DURATION_SECONDS", 60 * 60 * 2),
        }
    }
}
