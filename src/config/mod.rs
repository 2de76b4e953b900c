// xtrabackup-assistant/src/config/mod.rs
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};
use crate::rotate::RetentionPolicy;

pub const CONFIG_PATH_ENV: &str = "XTRABACKUP_ASSISTANT_CONFIG";
pub const SECRETS_CONFIG_PATH: &str = "/run/secrets/xtrabackup_config.json";
pub const LOCAL_CONFIG_PATH: &str = "config.json";
pub const PRIMARY_LOG_NAME: &str = "xtrabackup-assistant.log";

const KNOWN_NODES: [&str; 6] = ["project_name", "xtrabackup", "sftp", "slack", "rotation", "directories"];

// Structs for deserializing the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonXtrabackupConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub parallel: Option<u32>,
    pub compress_threads: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSftpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSlackConfig {
    pub token: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRotationConfig {
    pub max_store_time_years: Option<u32>,
    pub keep_for_last_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDirectoriesConfig {
    pub backups: Option<PathBuf>,
    pub temp: Option<PathBuf>,
    pub restore: Option<PathBuf>,
    pub error_logs: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub project_name: Option<String>,
    pub xtrabackup: Option<JsonXtrabackupConfig>,
    pub sftp: Option<JsonSftpConfig>,
    pub slack: Option<JsonSlackConfig>,
    pub rotation: Option<JsonRotationConfig>,
    pub directories: Option<JsonDirectoriesConfig>,
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, serde_json::Value>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct XtrabackupConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub parallel: u32,
    pub compress_threads: u32,
}

#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Remote backups root.
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub token: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct Directories {
    pub backups: PathBuf,
    pub temp: PathBuf,
    pub restore: PathBuf,
    pub error_logs: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Directories {
            backups: PathBuf::from("data/backups"),
            temp: PathBuf::from("data/tmp"),
            restore: PathBuf::from("data/restore"),
            error_logs: PathBuf::from("logs"),
        }
    }
}

impl Directories {
    pub fn primary_log(&self) -> PathBuf {
        self.error_logs.join(PRIMARY_LOG_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_name: String,
    pub xtrabackup: XtrabackupConfig,
    pub sftp: Option<SftpConfig>,
    pub slack: Option<SlackConfig>,
    pub rotation: Option<RetentionPolicy>,
    pub directories: Directories,
    /// Top-level nodes present in the file but not understood.
    pub ignored_nodes: Vec<String>,
}

/// Env override, then the secrets mount, then `./config.json`.
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let secrets = PathBuf::from(SECRETS_CONFIG_PATH);
    if secrets.exists() {
        return secrets;
    }
    PathBuf::from(LOCAL_CONFIG_PATH)
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config file at {}: {}", config_path.display(), e))
        })?;
        Self::from_json_str(&config_content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawJsonConfig = serde_json::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config JSON: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let mut missing = Vec::new();

        let project_name = required(&raw.project_name, "project_name", &mut missing);

        let xtrabackup = match &raw.xtrabackup {
            Some(node) => Some(XtrabackupConfig {
                user: required(&node.user, "xtrabackup.user", &mut missing),
                password: required(&node.password, "xtrabackup.password", &mut missing),
                host: non_empty(&node.host).unwrap_or_else(|| "127.0.0.1".to_string()),
                parallel: node.parallel.unwrap_or(10),
                compress_threads: node.compress_threads.unwrap_or(5),
            }),
            None => {
                missing.push("xtrabackup".to_string());
                None
            }
        };

        let sftp = raw.sftp.as_ref().map(|node| SftpConfig {
            host: required(&node.host, "sftp.host", &mut missing),
            port: node.port.unwrap_or(22),
            user: required(&node.user, "sftp.user", &mut missing),
            password: required(&node.password, "sftp.password", &mut missing),
            path: PathBuf::from(non_empty(&node.path).unwrap_or_else(|| "/".to_string())),
        });

        let slack = raw.slack.as_ref().map(|node| SlackConfig {
            token: required(&node.token, "slack.token", &mut missing),
            channel: required(&node.channel, "slack.channel", &mut missing),
        });

        let rotation = raw.rotation.as_ref().map(|node| {
            let max_store_time_years = node.max_store_time_years.unwrap_or_else(|| {
                missing.push("rotation.max_store_time_years".to_string());
                0
            });
            let keep_for_last_days = node.keep_for_last_days.unwrap_or_else(|| {
                missing.push("rotation.keep_for_last_days".to_string());
                0
            });
            RetentionPolicy {
                max_store_time_years,
                keep_for_last_days,
            }
        });

        let defaults = Directories::default();
        let directories = match &raw.directories {
            Some(node) => Directories {
                backups: node.backups.clone().unwrap_or(defaults.backups),
                temp: node.temp.clone().unwrap_or(defaults.temp),
                restore: node.restore.clone().unwrap_or(defaults.restore),
                error_logs: node.error_logs.clone().unwrap_or(defaults.error_logs),
            },
            None => defaults,
        };

        let mut ignored_nodes: Vec<String> = raw
            .unknown
            .keys()
            .filter(|k| !KNOWN_NODES.contains(&k.as_str()))
            .cloned()
            .collect();
        ignored_nodes.sort();

        match xtrabackup {
            Some(xtrabackup) if missing.is_empty() => Ok(AppConfig {
                project_name,
                xtrabackup,
                sftp,
                slack,
                rotation,
                directories,
                ignored_nodes,
            }),
            _ => Err(AppError::Config(format!(
                "Missing required config options: {}",
                missing.join(", ")
            ))),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

fn required(value: &Option<String>, name: &str, missing: &mut Vec<String>) -> String {
    non_empty(value).unwrap_or_else(|| {
        missing.push(name.to_string());
        String::new()
    })
}
