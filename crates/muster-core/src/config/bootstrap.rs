//! Environment-driven startup mode
//!
//! The environment is read once when a node starts. `MUSTER_SERVER=true`
//! runs a host, `MUSTER_CLIENT=true` joins one; neither means the operator
//! picks interactively.

use crate::error::ConfigError;

const SERVER: &str = "MUSTER_SERVER";
const CLIENT: &str = "MUSTER_CLIENT";
const NAME: &str = "MUSTER_NAME";
const PORT: &str = "MUSTER_PORT";
const HOST: &str = "MUSTER_HOST";
const PASSWORD: &str = "MUSTER_SERVER_PASSWORD";
const LOBBY_URI: &str = "MUSTER_LOBBY_URI";

/// Host settings taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBootstrap {
    pub name: String,
    pub port: u16,
    pub password: Option<String>,
    pub lobby_uri: Option<String>,
}

/// Client settings taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBootstrap {
    pub host: String,
    pub name: String,
    pub port: u16,
}

/// Startup mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    Host(HostBootstrap),
    Client(ClientBootstrap),
    Interactive,
}

impl Bootstrap {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingField(key.to_string()))
        };
        let port = || {
            let raw = required(PORT)?;
            raw.trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ConfigError::Invalid(format!("{} is not a valid port: {}", PORT, raw)))
        };

        if flag(SERVER) {
            return Ok(Bootstrap::Host(HostBootstrap {
                name: required(NAME)?,
                port: port()?,
                password: lookup(PASSWORD).filter(|p| !p.is_empty()),
                lobby_uri: lookup(LOBBY_URI).filter(|u| !u.is_empty()),
            }));
        }

        if flag(CLIENT) {
            return Ok(Bootstrap::Client(ClientBootstrap {
                host: required(HOST)?,
                name: required(NAME)?,
                port: port()?,
            }));
        }

        Ok(Bootstrap::Interactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_host_mode() {
        let bootstrap = Bootstrap::from_lookup(lookup(&[
            ("MUSTER_SERVER", "true"),
            ("MUSTER_NAME", "bot-7"),
            ("MUSTER_PORT", "4000"),
            ("MUSTER_LOBBY_URI", "http://lobby.local"),
        ]))
        .unwrap();

        let expected = HostBootstrap {
            name: "bot-7".to_string(),
            port: 4000,
            password: None,
            lobby_uri: Some("http://lobby.local".to_string()),
        };
        assert_eq!(bootstrap, Bootstrap::Host(expected));
    }

    #[test]
    fn test_client_mode() {
        let bootstrap = Bootstrap::from_lookup(lookup(&[
            ("MUSTER_CLIENT", "TRUE"),
            ("MUSTER_HOST", "10.0.0.2"),
            ("MUSTER_NAME", "alice"),
            ("MUSTER_PORT", "3300"),
        ]))
        .unwrap();

        assert_eq!(
            bootstrap,
            Bootstrap::Client(ClientBootstrap {
                host: "10.0.0.2".to_string(),
                name: "alice".to_string(),
                port: 3300,
            })
        );
    }

    #[test]
    fn test_interactive_when_unset() {
        let bootstrap = Bootstrap::from_lookup(lookup(&[("MUSTER_NAME", "x")])).unwrap();
        assert_eq!(bootstrap, Bootstrap::Interactive);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let missing = Bootstrap::from_lookup(lookup(&[("MUSTER_SERVER", "true")]));
        assert!(matches!(missing, Err(ConfigError::MissingField(f)) if f == "MUSTER_NAME"));

        let bad_port = Bootstrap::from_lookup(lookup(&[
            ("MUSTER_SERVER", "true"),
            ("MUSTER_NAME", "h"),
            ("MUSTER_PORT", "70000"),
        ]));
        assert!(matches!(bad_port, Err(ConfigError::Invalid(_))));
    }
}
