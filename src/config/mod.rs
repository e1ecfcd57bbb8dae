use std::env;

fn get_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub routing: RoutingConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u32,
    pub database: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// Routing policy constants. Both knobs shape which ticket absorbs an
/// incoming message, so they are configuration, not hard-coded
/// constants: the reopen window defines the boundary between reopening
/// a recently closed ticket and opening a new one, and the recency
/// order picks which ticket counts as "most recent" within a status
/// class.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub reopen_window_hours: i64,
    pub recency: RecencyOrder,
}

impl RoutingConfig {
    pub fn reopen_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reopen_window_hours)
    }
}

/// Column the router sorts by when several tickets share a status
/// class. `updated_at` follows the latest activity; `created_at` pins
/// threading to conversation start order instead. Row id breaks exact
/// timestamp ties either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyOrder {
    UpdatedAt,
    CreatedAt,
}

impl RecencyOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "updated_at" => Some(Self::UpdatedAt),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: get_str("SERVER_HOST", "0.0.0.0"),
                port: get_u16("SERVER_PORT", 8080),
            },
            database: DatabaseConfig {
                username: get_str("DB_USER", "deskserver"),
                password: get_str("DB_PASSWORD", "deskserver"),
                server: get_str("DB_HOST", "localhost"),
                port: get_u32("DB_PORT", 5432),
                database: get_str("DB_NAME", "deskserver"),
            },
            routing: RoutingConfig {
                reopen_window_hours: get_i64("ROUTING_REOPEN_WINDOW_HOURS", 24),
                recency: RecencyOrder::parse(&get_str("ROUTING_RECENCY_ORDER", "updated_at"))
                    .unwrap_or(RecencyOrder::UpdatedAt),
            },
            llm: LlmConfig {
                api_key: get_str("LLM_API_KEY", ""),
                base_url: get_str("LLM_BASE_URL", "https://api.openai.com/v1"),
                model: get_str("LLM_MODEL", "gpt-4o-mini"),
                timeout_secs: get_i64("LLM_TIMEOUT_SECS", 20) as u64,
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.server,
            self.database.port,
            self.database.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_is_assembled_from_parts() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 1234,
            },
            database: DatabaseConfig {
                username: "u".into(),
                password: "p".into(),
                server: "db".into(),
                port: 5433,
                database: "desk".into(),
            },
            routing: RoutingConfig {
                reopen_window_hours: 24,
                recency: RecencyOrder::UpdatedAt,
            },
            llm: LlmConfig {
                api_key: String::new(),
                base_url: "http://localhost".into(),
                model: "test".into(),
                timeout_secs: 5,
            },
        };
        assert_eq!(config.database_url(), "postgres://u:p@db:5433/desk");
    }

    #[test]
    fn reopen_window_is_a_duration() {
        let routing = RoutingConfig {
            reopen_window_hours: 24,
            recency: RecencyOrder::UpdatedAt,
        };
        assert_eq!(routing.reopen_window(), chrono::Duration::hours(24));
    }

    #[test]
    fn recency_order_parses_known_columns() {
        assert_eq!(
            RecencyOrder::parse("updated_at"),
            Some(RecencyOrder::UpdatedAt)
        );
        assert_eq!(
            RecencyOrder::parse("created_at"),
            Some(RecencyOrder::CreatedAt)
        );
        assert_eq!(RecencyOrder::parse("priority"), None);
    }
}
