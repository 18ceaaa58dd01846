use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOG_DIR: &str = "./logs";

/// Process configuration resolved once at startup. File logging is opt-in:
/// `log_dir` is `None` unless `ENABLE_FILE_LOGS` is set.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_parsed("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: env_parsed("PORT", DEFAULT_PORT),
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_dir: file_log_dir(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn file_log_dir() -> Option<PathBuf> {
    let enabled = std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    let dir = std::env::var("LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
    Some(PathBuf::from(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_combines_host_and_port() {
        let config = Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            log_filter: "info".to_string(),
            log_dir: None,
        };
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8080");
    }
}
