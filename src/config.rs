//! Node launch configuration (§6.4). Loaded from environment variables, the
//! same way the teacher's bin targets read `LIS_BIND_ADDR`/`LIS_MDS_PEERS`.

use std::env;

use crate::{Error, Result, ServerId};

const DEFAULT_GRPC_PORT: u16 = 50051;
const DEFAULT_DB_PATH: &str = "data.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_id: ServerId,
    pub grpc_port: u16,
    pub peer_addresses: Vec<ServerId>,
    pub db_path: String,
    /// §9 open question 3: the "all peers down" liveness shortcut trades
    /// safety for liveness. Defaults to `true` to match the source's
    /// unconditional behavior; a deployment can turn it off.
    pub allow_liveness_shortcut: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server_id = env::var("SERVER_ID")
            .map_err(|_| Error::Validation("SERVER_ID must be provided".to_string()))?;
        if server_id.trim().is_empty() {
            return Err(Error::Validation("SERVER_ID must be provided".to_string()));
        }

        let grpc_port = env::var("GRPC_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_GRPC_PORT);

        let peer_addresses = env::var("PEER_ADDRESSES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let db_path = env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let allow_liveness_shortcut = env::var("ALLOW_LIVENESS_SHORTCUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        Ok(Self {
            server_id,
            grpc_port,
            peer_addresses,
            db_path,
            allow_liveness_shortcut,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_server_id_is_validation_error() {
        env::remove_var("SERVER_ID");
        match Config::from_env() {
            Err(Error::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn parses_peer_addresses() {
        env::set_var("SERVER_ID", "node-a");
        env::set_var("PEER_ADDRESSES", "node-b, node-c ,node-d");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.peer_addresses, vec!["node-b", "node-c", "node-d"]);
        env::remove_var("PEER_ADDRESSES");
        env::remove_var("SERVER_ID");
    }
}
