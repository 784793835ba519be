use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::authority::http::HaciendaConfig;
use crate::contingency::{LocalZone, MAX_DOCUMENTS_PER_EVENT, PipelineSettings};
use crate::worker::Schedule;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub encryption_key: String,
    pub admin_token: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub hacienda: HaciendaConfig,
    pub firmador: FirmadorConfig,
    pub schedule: Schedule,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct FirmadorConfig {
    pub url: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let encryption_key = env_required("CONTINGENCY_ENCRYPTION_KEY")?;
        let admin_token = env_required("CONTINGENCY_ADMIN_TOKEN")?;
        if admin_token.len() < 16 {
            return Err("CONTINGENCY_ADMIN_TOKEN must be at least 16 characters".to_string());
        }

        let host: IpAddr = env_parse("CONTINGENCY_HOST", "0.0.0.0")?;
        let port: u16 = env_parse("CONTINGENCY_PORT", "3000")?;
        let log_level = env_or("CONTINGENCY_LOG_LEVEL", "info");

        let mut hacienda = HaciendaConfig::new(&env_or(
            "HACIENDA_BASE_URL",
            "https://apitest.dtes.mh.gob.sv",
        ));
        if let Ok(auth_url) = std::env::var("HACIENDA_AUTH_URL") {
            hacienda.auth_url = auth_url;
        }
        hacienda.timeout = env_secs("HACIENDA_TIMEOUT_SECS", 60)?;
        hacienda.retry_max = env_parse("HACIENDA_RETRY_MAX", "3")?;
        hacienda.token_ttl = env_secs("HACIENDA_TOKEN_TTL_SECS", 43_200)?;

        let firmador = FirmadorConfig {
            url: env_or("FIRMADOR_URL", "http://localhost:8113"),
            timeout: env_secs("FIRMADOR_TIMEOUT_SECS", 30)?,
        };

        let schedule = Schedule {
            event_interval: env_secs("CONTINGENCY_EVENT_INTERVAL_SECS", 600)?,
            batch_delay: env_secs("CONTINGENCY_BATCH_DELAY_SECS", 30)?,
            batch_interval: env_secs("CONTINGENCY_BATCH_INTERVAL_SECS", 300)?,
            poll_delay: env_secs("CONTINGENCY_POLL_DELAY_SECS", 120)?,
            poll_interval: env_secs("CONTINGENCY_POLL_INTERVAL_SECS", 120)?,
        };

        let max_documents: usize = env_parse("CONTINGENCY_MAX_DOCUMENTS", "1000")?;
        if max_documents == 0 || max_documents > MAX_DOCUMENTS_PER_EVENT {
            return Err(format!(
                "CONTINGENCY_MAX_DOCUMENTS must be between 1 and {MAX_DOCUMENTS_PER_EVENT}"
            ));
        }

        let pipeline = PipelineSettings {
            max_retries: env_parse("CONTINGENCY_MAX_RETRIES", "5")?,
            max_documents,
            max_batch_attempts: env_parse("CONTINGENCY_MAX_BATCH_ATTEMPTS", "3")?,
            zone: LocalZone::from_name(&env_or("CONTINGENCY_TIMEZONE", "America/El_Salvador")),
            complete_on_partial: env_parse("CONTINGENCY_COMPLETE_ON_PARTIAL", "false")?,
        };

        Ok(Config {
            database_url,
            encryption_key,
            admin_token,
            host,
            port,
            log_level,
            hacienda,
            firmador,
            schedule,
            pipeline,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}

fn env_secs(key: &str, default: u64) -> Result<Duration, String> {
    env_parse::<u64>(key, &default.to_string()).map(Duration::from_secs)
}
