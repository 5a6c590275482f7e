//! On-disk documents and the all-or-nothing commit.
//!
//! Every document is serialised before anything touches the disk. Each one is
//! then written beside its target as `*.tmp` and only renamed into place once
//! every temp write succeeded. A rename that fails puts back the documents
//! already replaced.

use crate::{
    catalog::Catalog,
    categories::CategoryRegistry,
    error::{EngineError, Result},
    progress::UserProgress,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const CATALOG_FILE: &str = "base_achievements.json";
pub const REGISTRY_FILE: &str = "category_config.json";
const LEDGER_PREFIX: &str = "user_progress_";
const LEDGER_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// Documents of one transaction. `None` leaves that document untouched.
#[derive(Debug, Default)]
pub struct Commit<'a> {
    pub catalog: Option<&'a Catalog>,
    pub registry: Option<&'a CategoryRegistry>,
    /// uid -> ledger
    pub ledgers: Vec<(&'a str, &'a UserProgress)>,
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

struct Pending {
    path: PathBuf,
    tmp: PathBuf,
    bytes: Vec<u8>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn ledger_path(&self, uid: &str) -> PathBuf {
        self.root.join(format!("{LEDGER_PREFIX}{uid}{LEDGER_SUFFIX}"))
    }

    /// A missing catalog reads as empty.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let path = self.catalog_path();
        let Some(raw) = read_optional(&path)? else {
            return Ok(Catalog::default());
        };
        if raw.trim().is_empty() {
            return Ok(Catalog::default());
        }
        let mut catalog: Catalog = serde_json::from_str(&raw)?;
        catalog.sort_by_ordinal();
        debug!(entries = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// A missing registry is created with the default taxonomy.
    pub fn load_registry(&self) -> Result<CategoryRegistry> {
        let path = self.registry_path();
        match read_optional(&path)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => {
                let registry = CategoryRegistry::default();
                self.commit(&Commit {
                    registry: Some(&registry),
                    ..Commit::default()
                })?;
                info!(path = %path.display(), "default category registry written");
                Ok(registry)
            }
        }
    }

    /// Loads one ledger, coercing malformed entries. A missing ledger is empty.
    pub fn load_ledger(&self, uid: &str) -> Result<(UserProgress, Vec<EngineError>)> {
        let path = self.ledger_path(uid);
        let Some(raw) = read_optional(&path)? else {
            return Ok((UserProgress::default(), Vec::new()));
        };
        if raw.trim().is_empty() {
            return Ok((UserProgress::default(), Vec::new()));
        }
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                let repair = EngineError::CorruptLedgerEntry {
                    user: uid.to_string(),
                    code: "*".to_string(),
                    detail: format!("unreadable ledger: {err}"),
                };
                warn!(uid, error = %repair, "ledger replaced with an empty one");
                return Ok((UserProgress::default(), vec![repair]));
            }
        };
        Ok(UserProgress::from_value(uid, value))
    }

    /// Uids of every ledger file present in the data dir.
    pub fn ledger_uids(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut uids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                EngineError::persistence(self.root.display().to_string(), source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(uid) = name
                .strip_prefix(LEDGER_PREFIX)
                .and_then(|rest| rest.strip_suffix(LEDGER_SUFFIX))
            {
                if !uid.is_empty() {
                    uids.push(uid.to_string());
                }
            }
        }
        uids.sort();
        Ok(uids)
    }

    pub fn load_ledgers(&self, uids: &[String]) -> Result<(BTreeMap<String, UserProgress>, Vec<EngineError>)> {
        let mut ledgers = BTreeMap::new();
        let mut repairs = Vec::new();
        for uid in uids {
            let (ledger, mut found) = self.load_ledger(uid)?;
            repairs.append(&mut found);
            ledgers.insert(uid.clone(), ledger);
        }
        Ok((ledgers, repairs))
    }

    /// Writes every document in `commit`, or none of them.
    pub fn commit(&self, commit: &Commit<'_>) -> Result<()> {
        let mut pending = Vec::new();
        if let Some(catalog) = commit.catalog {
            pending.push(self.prepare(self.catalog_path(), catalog)?);
        }
        if let Some(registry) = commit.registry {
            pending.push(self.prepare(self.registry_path(), registry)?);
        }
        for (uid, ledger) in &commit.ledgers {
            pending.push(self.prepare(self.ledger_path(uid), ledger)?);
        }
        if pending.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.root)
            .map_err(|err| EngineError::persistence(self.root.display().to_string(), err))?;

        for (index, item) in pending.iter().enumerate() {
            if let Err(err) = fs::write(&item.tmp, &item.bytes) {
                error!(path = %item.tmp.display(), error = %err, "temp write failed; commit abandoned");
                discard_temps(&pending[..=index]);
                return Err(EngineError::persistence(document_name(&item.path), err));
            }
        }

        let mut previous = Vec::with_capacity(pending.len());
        for item in &pending {
            match read_previous(&item.path) {
                Ok(bytes) => previous.push(bytes),
                Err(err) => {
                    error!(path = %item.path.display(), error = %err, "cannot read current document; commit abandoned");
                    discard_temps(&pending);
                    return Err(err);
                }
            }
        }
        for (index, item) in pending.iter().enumerate() {
            if let Err(err) = fs::rename(&item.tmp, &item.path) {
                error!(path = %item.path.display(), error = %err, "rename failed; restoring documents");
                restore(&pending[..index], &previous[..index]);
                discard_temps(&pending[index..]);
                return Err(EngineError::persistence(document_name(&item.path), err));
            }
        }

        info!(documents = pending.len(), "documents committed");
        Ok(())
    }

    pub fn commit_ledger(&self, uid: &str, ledger: &UserProgress) -> Result<()> {
        self.commit(&Commit {
            ledgers: vec![(uid, ledger)],
            ..Commit::default()
        })
    }

    pub fn remove_ledger(&self, uid: &str) -> Result<()> {
        let path = self.ledger_path(uid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::persistence(document_name(&path), err)),
        }
    }

    fn prepare<T: Serialize>(&self, path: PathBuf, document: &T) -> Result<Pending> {
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        Ok(Pending {
            path,
            tmp: PathBuf::from(tmp),
            bytes,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::persistence(document_name(path), err)),
    }
}

/// `None` only when the document does not exist yet.
fn read_previous(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::persistence(document_name(path), err)),
    }
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn discard_temps(pending: &[Pending]) {
    for item in pending {
        if item.tmp.is_file() {
            let _ = fs::remove_file(&item.tmp);
        }
    }
}

fn restore(replaced: &[Pending], previous: &[Option<Vec<u8>>]) {
    for (item, bytes) in replaced.iter().zip(previous) {
        let outcome = match bytes {
            Some(bytes) => fs::write(&item.path, bytes),
            None => fs::remove_file(&item.path),
        };
        if let Err(err) = outcome {
            error!(path = %item.path.display(), error = %err, "could not restore document");
        }
    }
}
