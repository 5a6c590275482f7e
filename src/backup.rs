use crate::store::Store;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMeta {
    pub timestamp: u64,
    pub time: String,
    pub reason: Option<String>,
    pub user: String,
    /// file name -> blake3 hex digest
    pub documents: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastBackup {
    path: PathBuf,
    timestamp: u64,
}

/// Copies the documents currently on disk into `backups/backup-<unix>/`.
pub fn create_backup(store: &Store, user: &str, reason: Option<&str>, keep: usize) -> Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let backup_root = store.root().join("backups");
    fs::create_dir_all(&backup_root).context("create backups dir")?;
    let backup_dir = unique_dir(&backup_root, stamp);
    fs::create_dir_all(&backup_dir).context("create backup dir")?;

    let mut documents = BTreeMap::new();
    for path in document_paths(store)? {
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            continue;
        };
        let bytes = fs::read(&path).with_context(|| format!("read {name} for backup"))?;
        fs::write(backup_dir.join(&name), &bytes).with_context(|| format!("write {name} backup"))?;
        documents.insert(name, blake3::hash(&bytes).to_hex().to_string());
    }

    let time = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format backup time")?;
    let meta = BackupMeta {
        timestamp: stamp,
        time,
        reason: reason.map(|value| value.to_string()),
        user: user.to_string(),
        documents,
    };
    let meta_json = serde_json::to_string_pretty(&meta).context("serialize backup meta")?;
    fs::write(backup_dir.join("meta.json"), meta_json).context("write backup meta")?;

    let last = LastBackup {
        path: backup_dir.clone(),
        timestamp: stamp,
    };
    let last_json = serde_json::to_string_pretty(&last).context("serialize last backup")?;
    fs::write(backup_root.join("last.json"), last_json).context("write last backup")?;

    info!(path = %backup_dir.display(), files = meta.documents.len(), "backup created");
    prune_backups(&backup_root, keep)?;
    Ok(backup_dir)
}

pub fn load_last_backup(data_dir: &Path) -> Result<Option<PathBuf>> {
    let path = data_dir.join("backups").join("last.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).context("read last backup")?;
    let last: LastBackup = serde_json::from_str(&raw).context("parse last backup")?;
    if last.path.exists() {
        Ok(Some(last.path))
    } else {
        Ok(None)
    }
}

pub fn load_backup_meta(backup_dir: &Path) -> Result<BackupMeta> {
    let raw = fs::read_to_string(backup_dir.join("meta.json")).context("read backup meta")?;
    let meta = serde_json::from_str(&raw).context("parse backup meta")?;
    Ok(meta)
}

/// Copies the last snapshot back over the data dir. Every digest is checked
/// before any document is replaced.
pub fn restore_last(store: &Store) -> Result<BackupMeta> {
    let Some(backup_dir) = load_last_backup(store.root())? else {
        bail!("no backup to restore");
    };
    let meta = load_backup_meta(&backup_dir)?;

    let mut verified = Vec::new();
    for (name, digest) in &meta.documents {
        let bytes = fs::read(backup_dir.join(name)).with_context(|| format!("read backup of {name}"))?;
        let actual = blake3::hash(&bytes).to_hex().to_string();
        if actual != *digest {
            bail!("backup of {name} is damaged (digest mismatch)");
        }
        verified.push((name.clone(), bytes));
    }

    for (name, bytes) in verified {
        let target = store.root().join(&name);
        let tmp = store.root().join(format!("{name}.tmp"));
        fs::write(&tmp, bytes).with_context(|| format!("write restored {name}"))?;
        fs::rename(&tmp, &target).with_context(|| format!("replace {name}"))?;
    }
    info!(path = %backup_dir.display(), files = meta.documents.len(), "backup restored");
    Ok(meta)
}

fn document_paths(store: &Store) -> Result<Vec<PathBuf>> {
    let mut paths = vec![store.catalog_path(), store.registry_path()];
    for uid in store.ledger_uids().context("list ledgers")? {
        paths.push(store.ledger_path(&uid));
    }
    Ok(paths)
}

fn unique_dir(root: &Path, stamp: u64) -> PathBuf {
    let base = root.join(format!("backup-{stamp}"));
    if !base.exists() {
        return base;
    }
    let mut seq = 1;
    loop {
        let candidate = root.join(format!("backup-{stamp}-{seq}"));
        if !candidate.exists() {
            return candidate;
        }
        seq += 1;
    }
}

/// `backup-<unix>[-<seq>]` -> (unix, seq)
fn backup_order(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix("backup-")?;
    match rest.split_once('-') {
        Some((stamp, seq)) => Some((stamp.parse().ok()?, seq.parse().ok()?)),
        None => Some((rest.parse().ok()?, 0)),
    }
}

fn prune_backups(backup_root: &Path, keep: usize) -> Result<()> {
    let mut backups: Vec<((u64, u64), PathBuf)> = fs::read_dir(backup_root)
        .context("list backups")?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let order = backup_order(&entry.file_name().to_string_lossy())?;
            Some((order, entry.path()))
        })
        .collect();
    if backups.len() <= keep.max(1) {
        return Ok(());
    }
    backups.sort();
    let excess = backups.len() - keep.max(1);
    for (_, path) in backups.into_iter().take(excess) {
        if let Err(err) = fs::remove_dir_all(&path) {
            warn!(path = %path.display(), error = %err, "could not prune backup");
        }
    }
    Ok(())
}
