//! Connection target description.

use std::time::Duration;

use crate::error::DriverError;

/// Where and how to connect.
///
/// The raw connection string is kept verbatim and handed to the driver;
/// the parsed fields are used for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Raw connection string as supplied by the user.
    pub conninfo: String,

    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 5432).
    pub port: u16,

    /// Database name.
    pub dbname: Option<String>,

    /// User name.
    pub user: Option<String>,

    /// Application name reported to the server.
    pub application_name: Option<String>,

    /// Connect timeout from the string. Pools cap every handshake with it;
    /// zero means no cap.
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            conninfo: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            dbname: None,
            user: None,
            application_name: None,
            connect_timeout: None,
        }
    }
}

impl ConnectionInfo {
    /// Parse a whitespace-separated `key=value` connection string.
    ///
    /// ```text
    /// host=localhost port=5432 dbname=test user=app
    /// ```
    pub fn from_connection_string(conninfo: &str) -> Result<Self, DriverError> {
        let mut info = Self {
            conninfo: conninfo.to_string(),
            ..Self::default()
        };

        for part in conninfo.split_whitespace() {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                DriverError::InvalidConnectionString(format!("invalid key-value: {part}"))
            })?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "hostaddr" => {
                    if value.is_empty() {
                        return Err(DriverError::InvalidConnectionString(
                            "host cannot be empty".into(),
                        ));
                    }
                    info.host = value.to_string();
                }
                "port" => {
                    info.port = value.parse().map_err(|_| {
                        DriverError::InvalidConnectionString(format!("invalid port: {value}"))
                    })?;
                }
                "dbname" | "database" => {
                    info.dbname = Some(value.to_string());
                }
                "user" => {
                    info.user = Some(value.to_string());
                }
                "application_name" => {
                    info.application_name = Some(value.to_string());
                }
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        DriverError::InvalidConnectionString(format!("invalid timeout: {value}"))
                    })?;
                    info.connect_timeout = Some(Duration::from_secs(secs));
                }
                _ => {
                    // Passwords, sslmode and friends are the driver's business.
                    tracing::debug!(key = key, "passing connection string option to driver");
                }
            }
        }

        Ok(info)
    }

    /// `host:port` pair for log fields.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
