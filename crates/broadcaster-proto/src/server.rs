use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_PORT: u16 = 12121;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerConfigError {
    #[error("Please enter a server IP address")]
    EmptyHost,
    #[error("Please enter a valid port number (1-65535)")]
    InvalidPort,
}

/// Address of a broadcaster server.  `host` is either a bare host/IP or a
/// full `http(s)://` URL; in the latter case `port` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build from setup-form input.  The port arrives as a wider integer so
    /// out-of-range entries can be rejected rather than truncated.
    pub fn from_input(host: &str, port: i64) -> Result<Self, ServerConfigError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ServerConfigError::EmptyHost);
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ServerConfigError::InvalidPort)?;
        Ok(Self::new(host, port))
    }

    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host
                .strip_suffix('/')
                .unwrap_or(&self.host)
                .to_string()
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    pub fn manifest_url(&self) -> Option<Url> {
        self.endpoint("manifest.json")
    }

    pub fn guide_url(&self) -> Option<Url> {
        self.endpoint("api/guide")
    }

    /// `{base}/{slug}.m3u8`.  `None` only when the server address itself
    /// does not form a URL.
    pub fn stream_url(&self, slug: &str) -> Option<Url> {
        self.endpoint(&format!("{}.m3u8", slug))
    }

    /// The always-available placeholder stream.
    pub fn static_stream_url(&self) -> Option<Url> {
        self.endpoint("channels/static/_.m3u8")
    }

    fn endpoint(&self, path: &str) -> Option<Url> {
        let url = Url::parse(&format!("{}/{}", self.base_url(), path)).ok()?;
        url.has_host().then_some(url)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("192.168.1.100", DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_composes_base_url() {
        let config = ServerConfig::new("192.168.1.100", 12121);
        assert_eq!(config.base_url(), "http://192.168.1.100:12121");
        assert_eq!(
            config.manifest_url().unwrap().as_str(),
            "http://192.168.1.100:12121/manifest.json"
        );
        assert_eq!(
            config.guide_url().unwrap().as_str(),
            "http://192.168.1.100:12121/api/guide"
        );
    }

    #[test]
    fn test_scheme_host_is_used_verbatim() {
        let config = ServerConfig::new("https://example.com/", 443);
        assert_eq!(config.base_url(), "https://example.com");

        let config = ServerConfig::new("http://tv.local:8000", 12121);
        assert_eq!(config.base_url(), "http://tv.local:8000");
        assert_eq!(
            config.stream_url("news").unwrap().as_str(),
            "http://tv.local:8000/news.m3u8"
        );
    }

    #[test]
    fn test_stream_urls() {
        let config = ServerConfig::new("10.0.0.2", 9000);
        assert_eq!(
            config.stream_url("sports").unwrap().as_str(),
            "http://10.0.0.2:9000/sports.m3u8"
        );
        assert_eq!(
            config.static_stream_url().unwrap().as_str(),
            "http://10.0.0.2:9000/channels/static/_.m3u8"
        );
        assert_eq!(
            config.stream_url("").unwrap().as_str(),
            "http://10.0.0.2:9000/.m3u8"
        );
    }

    #[test]
    fn test_unbuildable_endpoints() {
        let config = ServerConfig::new("", 12121);
        assert!(config.manifest_url().is_none());
        assert!(config.stream_url("news").is_none());
        assert!(config.static_stream_url().is_none());

        let config = ServerConfig::new("tv box", 12121);
        assert!(config.stream_url("news").is_none());
    }

    #[test]
    fn test_from_input_validation() {
        assert_eq!(
            ServerConfig::from_input("  ", 12121),
            Err(ServerConfigError::EmptyHost)
        );
        assert_eq!(
            ServerConfig::from_input("tv.local", 0),
            Err(ServerConfigError::InvalidPort)
        );
        assert_eq!(
            ServerConfig::from_input("tv.local", 70000),
            Err(ServerConfigError::InvalidPort)
        );
        assert_eq!(
            ServerConfig::from_input(" tv.local ", 8080),
            Ok(ServerConfig::new("tv.local", 8080))
        );
    }

    #[test]
    fn test_equality_by_value() {
        assert_eq!(ServerConfig::new("a", 1), ServerConfig::new("a", 1));
        assert_ne!(ServerConfig::new("a", 1), ServerConfig::new("a", 2));
    }
}
