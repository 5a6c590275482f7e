use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const CONFIG_FILE: &str = "config.json";
pub const DATA_DIR_ENV: &str = "TIDEMARK_DATA_DIR";
pub const DEFAULT_USER: &str = "Default";
pub const LOG_FILE: &str = "tidemark.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    /// Selects `user_progress_<uid>.json`.
    pub uid: String,
}

impl UserProfile {
    pub fn new(name: &str, uid: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.unwrap_or(name).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_user")]
    pub current_user: String,
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default = "default_true")]
    pub auto_backup: bool,
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create data dir")?;
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.data_dir = data_dir.to_path_buf();
            if config.normalize() {
                config.save()?;
            }
            return Ok(config);
        }

        let config = AppConfig {
            current_user: DEFAULT_USER.to_string(),
            users: vec![UserProfile::new(DEFAULT_USER, None)],
            auto_backup: true,
            backup_keep: default_backup_keep(),
            data_dir: data_dir.to_path_buf(),
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create data dir")?;
        let path = self.data_dir.join(CONFIG_FILE);
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn user(&self, name: &str) -> Option<&UserProfile> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn current(&self) -> Result<&UserProfile> {
        match self.user(&self.current_user) {
            Some(user) => Ok(user),
            None => bail!("current user {:?} is not configured", self.current_user),
        }
    }

    /// Guarantees at least one user and a current user that exists.
    fn normalize(&mut self) -> bool {
        let mut changed = false;
        if self.users.is_empty() {
            self.users.push(UserProfile::new(DEFAULT_USER, None));
            changed = true;
        }
        if self.user(&self.current_user).is_none() {
            self.current_user = self.users[0].name.clone();
            changed = true;
        }
        changed
    }
}

/// `--data-dir`, then `TIDEMARK_DATA_DIR`, then the platform data dir.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    base_data_dir()
}

fn default_true() -> bool {
    true
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_backup_keep() -> usize {
    5
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("tidemark"))
}
