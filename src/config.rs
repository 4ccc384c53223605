use std::path::PathBuf;

/// Runtime configuration, read entirely from the environment per the
/// service's small configuration surface (host, port, scratch data dir).
#[derive(Debug, Clone)]
pub struct MicrostackConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

fn parse_port(raw: &str) -> anyhow::Result<u16> {
    let port = raw
        .parse::<u16>()
        .map_err(|_| anyhow::anyhow!("MICROSTACK_PORT must be an integer in [1, 65535], got {raw:?}"))?;
    if port == 0 {
        return Err(anyhow::anyhow!("MICROSTACK_PORT must be an integer in [1, 65535], got 0"));
    }
    Ok(port)
}

impl MicrostackConfig {
    /// Reads `MICROSTACK_HOST` / `MICROSTACK_PORT` / `MICROSTACK_DATA_DIR`.
    /// An invalid port is a fatal startup error, not a silently-ignored default.
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("MICROSTACK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = match std::env::var("MICROSTACK_PORT") {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => 1337,
        };

        let data_dir = std::env::var("MICROSTACK_DATA_DIR")
            .unwrap_or_else(|_| "/tmp/microstack".to_string())
            .into();

        tracing::info!(host = %host, port, data_dir = ?data_dir, "microstack config loaded");

        Ok(Self { host, port, data_dir })
    }

    pub fn runtime_scratch_root(&self) -> PathBuf {
        self.data_dir.join("runtime")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_non_numeric_port() {
        assert!(parse_port("0").is_err());
        assert!(parse_port("not-a-number").is_err());
        assert!(parse_port("8080").is_ok());
    }

    #[test]
    fn default_data_dir() {
        let cfg = MicrostackConfig {
            host: "0.0.0.0".into(),
            port: 1337,
            data_dir: "/tmp/microstack".into(),
        };
        assert_eq!(cfg.runtime_scratch_root(), PathBuf::from("/tmp/microstack/runtime"));
    }
}
