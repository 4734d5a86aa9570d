use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub secure: bool,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
    pub speed_budget_secs: u64,
    pub geoip_url: String,
    pub speed_download_url: String,
    pub speed_upload_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Server-wide secret mixed into every OTP hash. Rotating it invalidates
    /// all outstanding codes, nothing else.
    pub otp_pepper: String,
    pub cookie: CookieConfig,
    pub smtp: Option<SmtpConfig>,
    pub admin_email: Option<String>,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub probe: ProbeConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let otp_pepper = std::env::var("OTP_PEPPER")
            .map_err(|_| anyhow::anyhow!("OTP_PEPPER environment variable is not set"))?;

        let cookie = CookieConfig {
            secure: env_parse("COOKIE_SECURE", false),
            domain: std::env::var("COOKIE_DOMAIN").ok(),
        };

        // SMTP is optional: without a relay the mailer degrades to log-only.
        let smtp = std::env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env_parse("SMTP_PORT", 587),
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from_address: std::env::var("SMTP_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@hostlens.local".into()),
        });

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_default();

        let rate_limit = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 30),
            window_seconds: env_parse("RATE_LIMIT_WINDOW_SECONDS", 60),
        };

        let probe = ProbeConfig {
            timeout_secs: env_parse("PROBE_TIMEOUT_SECS", 5),
            speed_budget_secs: env_parse("SPEED_BUDGET_SECS", 30),
            geoip_url: std::env::var("GEOIP_URL")
                .unwrap_or_else(|_| "http://ip-api.com/json".into()),
            speed_download_url: std::env::var("SPEED_DOWNLOAD_URL")
                .unwrap_or_else(|_| "https://speed.cloudflare.com/__down?bytes=10000000".into()),
            speed_upload_url: std::env::var("SPEED_UPLOAD_URL")
                .unwrap_or_else(|_| "https://speed.cloudflare.com/__up".into()),
        };

        Ok(Self {
            database_url,
            otp_pepper,
            cookie,
            smtp,
            admin_email: std::env::var("ADMIN_EMAIL").ok(),
            cors_origins,
            rate_limit,
            probe,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_split_and_trim() {
        let origins = parse_origins("https://a.example, http://127.0.0.1:8080 ,,");
        assert_eq!(origins, vec!["https://a.example", "http://127.0.0.1:8080"]);
    }

    #[test]
    fn empty_origin_list() {
        assert!(parse_origins("").is_empty());
    }
}
