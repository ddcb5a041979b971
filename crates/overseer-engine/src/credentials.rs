//! Grid credentials and the preconditions checked before the loop starts.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{OverseerError, Result};
use crate::process::run_captured;

/// Minimum remaining proxy lifetime, in hours.
pub const MIN_PROXY_HOURS: f64 = 1.0;

/// State of the grid proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyInfo {
    /// Remaining validity, in hours.
    pub time_left_hours: f64,
    /// Location of the proxy file.
    pub path: Option<PathBuf>,
}

/// Source of grid credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current proxy, or `None` if no proxy is initialised.
    async fn proxy_info(&self) -> Result<Option<ProxyInfo>>;
}

/// Reads the proxy state from `voms-proxy-info --all`.
#[derive(Debug, Clone)]
pub struct VomsProxy {
    program: String,
}

impl VomsProxy {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for VomsProxy {
    async fn proxy_info(&self) -> Result<Option<ProxyInfo>> {
        match run_captured(&self.program, &["--all"]).await {
            Ok(output) => Ok(parse_voms_proxy_info(&output)),
            Err(e) => {
                debug!(error = %e, "voms-proxy-info failed, assuming no proxy");
                Ok(None)
            }
        }
    }
}

/// Parse `key : value` lines of `voms-proxy-info --all`.
///
/// Returns `None` when the output has no `timeleft` entry.
pub fn parse_voms_proxy_info(output: &str) -> Option<ProxyInfo> {
    let mut time_left = None;
    let mut path = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            // The first entry is the proxy itself; later ones are attributes.
            "timeleft" if time_left.is_none() => time_left = parse_hms_hours(value),
            "path" if path.is_none() => path = Some(PathBuf::from(value)),
            _ => {}
        }
    }
    time_left.map(|time_left_hours| ProxyInfo {
        time_left_hours,
        path,
    })
}

fn parse_hms_hours(value: &str) -> Option<f64> {
    let mut parts = value.split(':').map(|p| p.trim().parse::<u64>());
    let h = parts.next()?.ok()?;
    let m = parts.next().unwrap_or(Ok(0)).ok()?;
    let s = parts.next().unwrap_or(Ok(0)).ok()?;
    Some(h as f64 + m as f64 / 60.0 + s as f64 / 3600.0)
}

/// Check the preconditions of an overseer run and return the proxy.
pub async fn check_prerequisites(
    config: &Config,
    credentials: &dyn CredentialProvider,
    law_home: Option<&str>,
) -> Result<ProxyInfo> {
    let proxy = match credentials.proxy_info().await? {
        Some(proxy) if proxy.time_left_hours >= MIN_PROXY_HOURS => proxy,
        _ => {
            return Err(OverseerError::Precondition(
                "Voms proxy is not initalised or is going to expire soon. \
                 Please run \"voms-proxy-init -voms cms -rfc -valid 192:00\"."
                    .to_string(),
            ))
        }
    };

    if config.local_processing.is_none() || law_home.map_or(true, |h| h.trim().is_empty()) {
        return Err(OverseerError::Precondition(
            "Law environment is not setup. It is needed to run the local processing step."
                .to_string(),
        ));
    }

    info!(hours_left = proxy.time_left_hours, "Grid proxy is valid");
    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOMS_OUTPUT: &str = "\
subject   : /DC=ch/DC=cern/OU=Users/CN=someone/CN=123456789
issuer    : /DC=ch/DC=cern/OU=Users/CN=someone
type      : RFC3820 compliant impersonation proxy
strength  : 2048
path      : /tmp/x509up_u1000
timeleft  : 191:59:24
key usage : Digital Signature, Key Encipherment
=== VO cms extension information ===
VO        : cms
timeleft  : 23:59:24
";

    struct FixedProxy(Option<ProxyInfo>);

    #[async_trait]
    impl CredentialProvider for FixedProxy {
        async fn proxy_info(&self) -> Result<Option<ProxyInfo>> {
            Ok(self.0.clone())
        }
    }

    fn config_with_local_processing() -> Config {
        serde_yaml::from_str(
            "localProcessing:\n  lawTask: T\n  workflow: local\n  bootstrap: b.sh\n",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_voms_output() {
        let info = parse_voms_proxy_info(VOMS_OUTPUT).unwrap();
        assert!((info.time_left_hours - 191.99).abs() < 0.01);
        assert_eq!(info.path, Some(PathBuf::from("/tmp/x509up_u1000")));
    }

    #[test]
    fn test_parse_without_timeleft() {
        assert_eq!(parse_voms_proxy_info("path : /tmp/x509up_u1000\n"), None);
        assert_eq!(parse_voms_proxy_info(""), None);
    }

    #[tokio::test]
    async fn test_short_proxy_is_rejected() {
        let provider = FixedProxy(Some(ProxyInfo {
            time_left_hours: 0.5,
            path: None,
        }));
        let err = check_prerequisites(&config_with_local_processing(), &provider, Some("/law"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Voms proxy"));

        let config = config_with_local_processing();
        let err = check_prerequisites(&config, &FixedProxy(None), Some("/law"))
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_law_environment_required() {
        let provider = FixedProxy(Some(ProxyInfo {
            time_left_hours: 100.0,
            path: None,
        }));

        let err = check_prerequisites(&Config::default(), &provider, Some("/law"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Law environment"));

        let err = check_prerequisites(&config_with_local_processing(), &provider, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Law environment"));

        let proxy = check_prerequisites(&config_with_local_processing(), &provider, Some("/law"))
            .await
            .unwrap();
        assert_eq!(proxy.time_left_hours, 100.0);
    }
}
