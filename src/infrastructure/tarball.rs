//! Deploy config extraction from the uploaded app tarball
//!
//! The tarball is a gzip'd tar with the app sources. Only a handful of files
//! at its root matter before the build starts: the Procfile, an optional
//! nginx.conf and the `teresa.yaml` family.

use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

use crate::domain::spec::deploy::TeresaYamlV2;
use crate::domain::spec::sidecar::NGINX_CONF_FILE;
use crate::domain::spec::TeresaYaml;
use crate::error::DeployError;

pub const PROCFILE_NAME: &str = "Procfile";

/// Procfile entry that triggers the release step
pub const RELEASE_PROCESS: &str = "release";

/// process type -> command line
pub type Procfile = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployConfigFiles {
    pub teresa_yaml: Option<TeresaYaml>,
    pub procfile: Option<Procfile>,
    pub nginx_conf: Option<String>,
}

impl DeployConfigFiles {
    pub fn procfile_entry(&self, process_type: &str) -> Option<&str> {
        self.procfile
            .as_ref()
            .and_then(|p| p.get(process_type))
            .map(String::as_str)
    }

    pub fn has_release_command(&self) -> bool {
        self.procfile_entry(RELEASE_PROCESS).is_some()
    }
}

fn config_file_names(process_type: &str) -> Vec<String> {
    let mut names = vec![PROCFILE_NAME.to_string(), NGINX_CONF_FILE.to_string()];
    for ext in ["yaml", "yml"] {
        names.push(format!("teresa.{}", ext));
        if !process_type.is_empty() {
            names.push(format!("teresa-{}.{}", process_type, ext));
        }
    }
    names
}

fn invalid(message: impl Into<String>) -> DeployError {
    DeployError::InvalidConfigFile {
        message: message.into(),
    }
}

/// Scan `tarball` for deploy config files.
///
/// A process-specific `teresa-{process_type}.yaml` wins over the generic one
/// regardless of archive order. The reader is rewound before and after.
pub fn deploy_config_files<R: Read + Seek>(
    tarball: &mut R,
    app_name: &str,
    process_type: &str,
) -> Result<DeployConfigFiles, DeployError> {
    tarball
        .seek(SeekFrom::Start(0))
        .map_err(|e| invalid(format!("rewind tarball: {}", e)))?;

    let names = config_file_names(process_type);
    let mut files = DeployConfigFiles::default();
    let mut process_specific = false;

    {
        let mut archive = tar::Archive::new(GzDecoder::new(&mut *tarball));
        let entries = archive
            .entries()
            .map_err(|e| invalid(format!("read tarball: {}", e)))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| invalid(format!("read tarball: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| invalid(format!("read tarball: {}", e)))?
                .to_string_lossy()
                .into_owned();
            let name = path.strip_prefix("./").unwrap_or(&path).to_string();
            if !names.contains(&name) {
                continue;
            }

            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| invalid(format!("read {}: {}", name, e)))?;
            debug!(file = %name, "found deploy config file");

            if name == NGINX_CONF_FILE {
                files.nginx_conf = Some(content);
            } else if name == PROCFILE_NAME {
                let procfile: Option<Procfile> = serde_yaml::from_str(&content)
                    .map_err(|e| invalid(format!("{}: {}", PROCFILE_NAME, e)))?;
                files.procfile = Some(procfile.unwrap_or_default());
            } else {
                let is_specific = name.starts_with("teresa-");
                if files.teresa_yaml.is_none() || (is_specific && !process_specific) {
                    files.teresa_yaml = Some(parse_teresa_yaml(&content, app_name)?);
                    process_specific = is_specific;
                }
            }
        }
    }

    tarball
        .seek(SeekFrom::Start(0))
        .map_err(|e| invalid(format!("rewind tarball: {}", e)))?;
    Ok(files)
}

/// Parse a `teresa.yaml`, following `version: v2` to the app's own section
pub fn parse_teresa_yaml(content: &str, app_name: &str) -> Result<TeresaYaml, DeployError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| invalid(format!("teresa.yaml: {}", e)))?;
    if value.is_null() {
        return Ok(TeresaYaml::default());
    }

    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let teresa_yaml = if version == "v2" {
        let v2: TeresaYamlV2 = serde_yaml::from_value(value)
            .map_err(|e| invalid(format!("teresa.yaml: {}", e)))?;
        v2.applications.get(app_name).cloned().unwrap_or_default()
    } else {
        serde_yaml::from_value(value).map_err(|e| invalid(format!("teresa.yaml: {}", e)))?
    };

    teresa_yaml.validate().map_err(invalid)?;
    Ok(teresa_yaml)
}
