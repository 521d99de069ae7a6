//! Vendored SDK configuration inside the worker
//!
//! When INIT names an SDK directory the worker loads it before the handler
//! module and records the region it should talk to. The result is a
//! process-wide setting, as an SDK's global config would be.

use lambdaspawn_core::{ErrorCode, ErrorPayload};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static SDK_CONFIG: OnceCell<SdkConfig> = OnceCell::new();

/// Process-global SDK settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    pub path: PathBuf,
    pub region: Option<String>,
    pub version: Option<String>,
}

/// SDK configuration for this process, if INIT provided one
pub fn current() -> Option<&'static SdkConfig> {
    SDK_CONFIG.get()
}

/// Loads an SDK from a path and applies its global configuration
pub trait SdkConfigurator: Send + Sync {
    fn configure(&self, path: &Path, region: Option<&str>) -> Result<SdkConfig, ErrorPayload>;
}

#[derive(Deserialize)]
struct PackageManifest {
    version: Option<String>,
}

/// Reads the SDK's `package.json` and publishes the result through [`current`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSdkConfigurator;

impl GlobalSdkConfigurator {
    fn load(path: &Path, region: Option<&str>) -> Result<SdkConfig, ErrorPayload> {
        if !path.is_dir() {
            return Err(ErrorPayload::new(
                ErrorCode::DependencyConfig,
                format!("Cannot find module '{}'", path.display()),
            ));
        }

        let manifest_path = path.join("package.json");
        let version = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => {
                let manifest: PackageManifest = serde_json::from_str(&raw).map_err(|e| {
                    ErrorPayload::from_error(ErrorCode::DependencyConfig, &e).with_stack(format!(
                        "{}: invalid manifest {}: {}",
                        ErrorCode::DependencyConfig,
                        manifest_path.display(),
                        e
                    ))
                })?;
                manifest.version
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ErrorPayload::from_error(ErrorCode::DependencyConfig, &e)),
        };

        Ok(SdkConfig {
            path: path.to_path_buf(),
            region: region.map(str::to_string),
            version,
        })
    }
}

impl SdkConfigurator for GlobalSdkConfigurator {
    fn configure(&self, path: &Path, region: Option<&str>) -> Result<SdkConfig, ErrorPayload> {
        let config = Self::load(path, region)?;

        if let Err(rejected) = SDK_CONFIG.set(config.clone()) {
            // A worker handles a single INIT, so this only happens when
            // several workers share one process (tests).
            debug!(path = %rejected.path.display(), "SDK already configured for this process");
        }

        info!(
            path = %config.path.display(),
            region = ?config.region,
            version = ?config.version,
            "aws-sdk configured"
        );
        Ok(config)
    }
}
