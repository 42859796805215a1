use anyhow::{anyhow, Result};
use clap::ArgMatches;
use k8s_openapi::api::core::v1::{Container, Volume};
use lazy_static::lazy_static;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

lazy_static! {
    pub(crate) static ref HOSTNAME: String =
        std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));
}

pub struct Config {
    pub addr: SocketAddr,
    pub tls_config: Option<TlsConfig>,
    pub injection_config_file: PathBuf,
    pub log_level: String,
    pub log_fmt: String,
    pub log_no_color: bool,
}

pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let addr = api_bind_address(matches)?;

        let (cert_file, key_file) = tls_files(matches)?;
        let tls_config = if cert_file.is_empty() {
            None
        } else {
            Some(TlsConfig {
                cert_file,
                key_file,
            })
        };

        let injection_config_file = matches
            .get_one::<String>("init-container-config")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("missing init container configuration file"))?;

        let log_level = matches
            .get_one::<String>("log-level")
            .cloned()
            .unwrap_or_else(|| "info".to_owned());
        let log_fmt = matches
            .get_one::<String>("log-fmt")
            .cloned()
            .unwrap_or_else(|| "text".to_owned());
        let log_no_color = matches.get_flag("log-no-color");

        Ok(Self {
            addr,
            tls_config,
            injection_config_file,
            log_level,
            log_fmt,
            log_no_color,
        })
    }
}

fn api_bind_address(matches: &ArgMatches) -> Result<SocketAddr> {
    let address = matches
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("missing bind address"))?;
    let port = matches
        .get_one::<String>("port")
        .ok_or_else(|| anyhow!("missing port"))?;

    format!("{address}:{port}")
        .parse()
        .map_err(|e| anyhow!("error parsing arguments: {}", e))
}

fn tls_files(matches: &ArgMatches) -> Result<(String, String)> {
    let cert_file = matches
        .get_one::<String>("cert-file")
        .cloned()
        .unwrap_or_default();
    let key_file = matches
        .get_one::<String>("key-file")
        .cloned()
        .unwrap_or_default();
    if cert_file.is_empty() != key_file.is_empty() {
        Err(anyhow!("error parsing arguments: either both --cert-file and --key-file must be provided, or neither"))
    } else {
        Ok((cert_file, key_file))
    }
}

/// The init containers and volumes injected into opted-in Deployments.
///
/// Loaded once at startup and then shared read-only by every request.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InjectionConfig {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl InjectionConfig {
    /// Reads the YAML configuration file holding the containers and volumes
    /// to inject.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            anyhow!(
                "cannot read init container configuration {}: {}",
                path.display(),
                e
            )
        })?;

        info!(
            path = %path.display(),
            sha256sum = %format!("{:x}", Sha256::digest(&data)),
            "loading init container configuration"
        );

        let config: InjectionConfig = serde_yaml::from_slice(&data).map_err(|e| {
            anyhow!(
                "cannot parse init container configuration {}: {}",
                path.display(),
                e
            )
        })?;

        if config.containers.is_empty() {
            warn!("no init containers configured, only annotations are going to be patched");
        }
        info!(
            containers = config.containers.len(),
            volumes = config.volumes.len(),
            "init container configuration loaded"
        );

        Ok(config)
    }
}
