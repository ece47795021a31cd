//! Application settings: configuration file merged with command-line overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cli::GlobalArgs;
use crate::mqtt::ClientConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: String,
    pub count: u32,
    pub delay_ms: u64,
    pub trace: bool,
    pub inplace: bool,
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:1883".to_string(),
            count: 1,
            delay_ms: 200,
            trace: false,
            inplace: false,
            client: ClientConfig::default(),
        }
    }
}

/// `<config dir>/mqttstat/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mqttstat").join("config.toml"))
}

impl AppConfig {
    /// Reads `explicit` if given, else the default location. A missing default file
    /// yields defaults; a missing explicit file is an error.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                info!("Loading configuration from {}", path.display());
                Self::parse(&content, &path)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies command-line values over the file values
    pub fn merge(mut self, args: &GlobalArgs) -> Self {
        if let Some(server) = &args.server {
            self.server = server.clone();
        }
        if let Some(username) = &args.username {
            self.client.username = username.clone();
        }
        if let Some(password) = &args.password {
            self.client.password = password.clone();
        }
        if let Some(client_id) = &args.client_id {
            self.client.client_id = client_id.clone();
        }
        if let Some(clean_session) = args.clean_session {
            self.client.clean_session = clean_session;
        }
        if let Some(keep_alive) = args.keep_alive {
            self.client.keep_alive_secs = keep_alive;
        }
        if let Some(count) = args.count {
            self.count = count;
        }
        if let Some(delay) = args.delay {
            self.delay_ms = delay;
        }
        self.trace |= args.trace;
        self.inplace |= args.inplace;

        let tcp = &mut self.client.tcp;
        if let Some(keepalive) = args.tcp_keepalive {
            tcp.keepalive = keepalive;
        }
        if let Some(nodelay) = args.tcp_nodelay {
            tcp.nodelay = nodelay;
        }
        if args.tcp_linger.is_some() {
            tcp.linger_secs = args.tcp_linger;
        }
        if let Some(size) = args.tcp_recv_buffer {
            tcp.recv_buffer = size;
        }
        if let Some(size) = args.tcp_send_buffer {
            tcp.send_buffer = size;
        }

        let tls = &mut self.client.tls;
        if let Some(skip) = args.tls_skip_verify {
            tls.skip_verify = skip;
        }
        tls.session_ticket |= args.tls_session_ticket;
        if args.tls_ca_file.is_some() {
            tls.ca_file = args.tls_ca_file.clone();
        }

        self.normalized()
    }

    /// Resumption needs a first handshake to resume from
    fn normalized(mut self) -> Self {
        self.count = self.count.max(1);
        if self.client.tls.session_ticket && self.count < 2 {
            debug!("Session tickets enabled, raising round count to 2");
            self.count = 2;
        }
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn reads_nested_tables() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server = "mqtts://broker.local:8883"
username = "bench"
count = 5

[tcp]
nodelay = false
linger_secs = 2

[tls]
skip_verify = false
ca_file = "/etc/ssl/ca.pem"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).await.unwrap();
        assert_eq!(config.server, "mqtts://broker.local:8883");
        assert_eq!(config.client.username, "bench");
        assert_eq!(config.client.client_id, "mqttstat");
        assert_eq!(config.count, 5);
        assert_eq!(config.delay_ms, 200);
        assert!(!config.client.tcp.nodelay);
        assert!(config.client.tcp.keepalive);
        assert_eq!(config.client.tcp.linger(), Some(Duration::from_secs(2)));
        assert!(!config.client.tls.skip_verify);
        assert_eq!(
            config.client.tls.ca_file.as_deref(),
            Some(Path::new("/etc/ssl/ca.pem"))
        );
    }

    #[tokio::test]
    async fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = AppConfig::load(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn malformed_file_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "count = \"many\"").unwrap();
        let err = AppConfig::load(Some(file.path())).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn flags_override_file_values() {
        let args = GlobalArgs {
            server: Some("tcp://10.0.0.1:1883".to_string()),
            password: Some("pw".to_string()),
            clean_session: Some(false),
            count: Some(3),
            tcp_nodelay: Some(false),
            ..GlobalArgs::default()
        };
        let config = AppConfig::default().merge(&args);

        assert_eq!(config.server, "tcp://10.0.0.1:1883");
        assert_eq!(config.client.password, "pw");
        assert!(!config.client.clean_session);
        assert_eq!(config.count, 3);
        assert!(!config.client.tcp.nodelay);
        assert!(config.client.tls.skip_verify);
    }

    #[test]
    fn session_ticket_forces_two_rounds() {
        let args = GlobalArgs {
            tls_session_ticket: true,
            ..GlobalArgs::default()
        };
        let config = AppConfig::default().merge(&args);
        assert_eq!(config.count, 2);

        let zero = GlobalArgs {
            count: Some(0),
            ..GlobalArgs::default()
        };
        assert_eq!(AppConfig::default().merge(&zero).count, 1);
    }
}
