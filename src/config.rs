use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub output_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let raw = std::env::var("JSON_RPC_URLS")
            .context("JSON_RPC_URLS must be set in .env (comma-separated endpoint URLs)")?;

        let json_rpc_urls: Vec<String> = raw
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS must contain at least one URL");
        }

        let output_path = std::env::var("OUTPUT_PATH").ok();

        Ok(Config {
            json_rpc_urls,
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_reads_urls_and_optional_output_path() {
        unsafe {
            std::env::set_var("JSON_RPC_URLS", "http://one:8545, http://two:8545,");
            std::env::set_var("OUTPUT_PATH", "transfers.csv");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.json_rpc_urls,
            vec!["http://one:8545".to_string(), "http://two:8545".to_string()]
        );
        assert_eq!(config.output_path.as_deref(), Some("transfers.csv"));
    }
}
