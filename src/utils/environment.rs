// xtrabackup-assistant/src/utils/environment.rs
use regex::Regex;
use std::path::PathBuf;
use tokio::process::Command;

use crate::catalog::ToolVersion;
use crate::errors::{AppError, Result};
use crate::utils::echo::Echo;
use crate::utils::find_executable;

const MYSQL_VERSION_PATTERN: &str = r"Ver (\S+) for Linux";
const XTRABACKUP_VERSION_PATTERN: &str = r"xtrabackup version (\S+) based on MySQL server";

/// Versions of the Percona tools installed on this host.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Server version, stamped into the name of every new artifact.
    pub mysql_version: String,
    /// Restores are limited to artifacts this tool can read.
    pub xtrabackup_version: ToolVersion,
}

impl Environment {
    pub async fn detect() -> Result<Self> {
        let mysql_about = version_output("mysql").await?;
        let mysql_version = extract_version(&mysql_about, MYSQL_VERSION_PATTERN)
            .ok_or_else(|| AppError::ToolVersion("Percona MySQL Server version is not recognized!".to_string()))?;

        let xtrabackup_about = version_output("xtrabackup").await?;
        let xtrabackup_version = extract_version(&xtrabackup_about, XTRABACKUP_VERSION_PATTERN)
            .ok_or_else(|| AppError::ToolVersion("XtraBackup tool version is not recognized!".to_string()))?
            .parse::<ToolVersion>()
            .map_err(|e| AppError::ToolVersion(format!("XtraBackup tool version is not recognized: {}", e)))?;

        Ok(Environment {
            mysql_version,
            xtrabackup_version,
        })
    }

    pub fn print_versions(&self, echo: &Echo) {
        echo.info(
            "Environment",
            format!(
                "Percona MySQL Server {} | Percona XtraBackup {}",
                self.mysql_version, self.xtrabackup_version
            ),
        );
    }
}

/// Executables the sagas invoke.
#[derive(Debug, Clone)]
pub struct Toolset {
    pub xtrabackup: PathBuf,
    pub xbstream: PathBuf,
}

impl Toolset {
    pub fn locate() -> Result<Self> {
        Ok(Toolset {
            xtrabackup: find_executable("xtrabackup")?,
            xbstream: find_executable("xbstream")?,
        })
    }
}

/// `<tool> --version`, stdout and stderr combined.
async fn version_output(tool: &str) -> Result<String> {
    let executable = find_executable(tool)?;
    let output = Command::new(&executable).arg("--version").output().await?;

    let mut about = String::from_utf8_lossy(&output.stdout).to_string();
    about.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(about)
}

fn extract_version(about: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(about)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
