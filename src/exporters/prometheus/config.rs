// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub const DEFAULT_USER_AGENT: &str = "keyword-exporter";
pub const DEFAULT_METRIC_NAME: &str = "keyword_appear_alert";
pub const DEFAULT_METRIC_HELP: &str = "some keyword appear alert";

#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    Basic { username: String, password: String },
    Bearer(String),
}

impl Authentication {
    pub fn header_value(&self) -> String {
        match self {
            Authentication::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Authentication::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

// Keep credentials out of debug logs.
impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: \"***\" }}")
            }
            Authentication::Bearer(_) => write!(f, "Bearer(\"***\")"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteWriteConfig {
    pub endpoint: String,
    /// Per attempt timeout. A send is abandoned once twice this has elapsed.
    pub timeout: Duration,
    pub retry_interval: Duration,
    pub user_agent: String,
    pub auth: Option<Authentication>,
    pub metric_name: String,
    pub help: String,
    /// PEM bundle used instead of the native root store.
    pub tls_ca_file: Option<PathBuf>,
}

impl Default for RemoteWriteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090/api/v1/write".to_string(),
            timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth: None,
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            help: DEFAULT_METRIC_HELP.to_string(),
            tls_ca_file: None,
        }
    }
}

impl RemoteWriteConfig {
    pub fn give_up_after(&self) -> Duration {
        self.timeout * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_headers() {
        let basic = Authentication::Basic {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!("Basic YWRtaW46c2VjcmV0", basic.header_value());
        assert!(!format!("{basic:?}").contains("secret"));
        assert_eq!(
            "Bearer abc",
            Authentication::Bearer("abc".to_string()).header_value()
        );
    }
}
