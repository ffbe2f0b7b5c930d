use std::net::{SocketAddr, ToSocketAddrs};

use crate::method::{MethodPreference, UnknownMethod};

pub const LISTEN_VAR: &str = "WFD_SOURCE_LISTEN";
pub const METHOD_VAR: &str = "WFD_SOURCE_METHOD";
pub const DEFAULT_LISTEN: &str = "[::1]:50051";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot resolve listen address {value:?}: {source}")]
    Listen {
        var: &'static str,
        value: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{var}: {source}")]
    Method {
        var: &'static str,
        #[source]
        source: UnknownMethod,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub method: MethodPreference,
}

impl Config {
    /// Reads the process environment. Call `dotenv()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_value = lookup(LISTEN_VAR).unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = resolve(&listen_value).map_err(|source| ConfigError::Listen {
            var: LISTEN_VAR,
            value: listen_value.clone(),
            source,
        })?;

        let method = match lookup(METHOD_VAR) {
            Some(value) => value.parse().map_err(|source| ConfigError::Method {
                var: METHOD_VAR,
                source,
            })?,
            None => MethodPreference::Auto,
        };

        Ok(Config { listen, method })
    }
}

fn resolve(addr: &str) -> std::io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
    })
}
