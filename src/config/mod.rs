use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub razorpay: RazorpayConfig,
    pub service_name: String,
    pub log_level: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub api_base_url: String,
    /// Upper bound on any single gateway call.
    pub timeout_seconds: u64,
    pub currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("SUBSCRIPTION_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SUBSCRIPTION_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url =
            env::var("SUBSCRIPTION_DATABASE_URL").expect("SUBSCRIPTION_DATABASE_URL must be set");
        let max_connections = env::var("SUBSCRIPTION_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("SUBSCRIPTION_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let key_id = env::var("RAZORPAY_KEY_ID").unwrap_or_default();
        let key_secret = env::var("RAZORPAY_KEY_SECRET").unwrap_or_default();
        let api_base_url = env::var("RAZORPAY_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string());
        let timeout_seconds = env::var("RAZORPAY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let currency = env::var("RAZORPAY_CURRENCY").unwrap_or_else(|_| "INR".to_string());

        let log_level = env::var("SUBSCRIPTION_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            razorpay: RazorpayConfig {
                key_id,
                key_secret: Secret::new(key_secret),
                api_base_url,
                timeout_seconds,
                currency,
            },
            service_name: "subscription-service".to_string(),
            log_level,
        })
    }
}
