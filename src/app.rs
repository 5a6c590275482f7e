use crate::{
    backup::{self, BackupMeta},
    catalog::{Achievement, Catalog, IdentityKey},
    categories::{Allocation, CategoryRegistry},
    config::{AppConfig, UserProfile},
    encode::reencode,
    error::EngineError,
    groups::{self, StatusChange, StatusIntent},
    importer::{self, ImportMode, ImportPayload},
    progress::UserProgress,
    remap::{remap_all_users, UserRemapStats},
    stats::{self, Filter, Report, Row},
    store::{Commit, Store},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};
use tracing::{error, info, warn};

/// Outcome of one reencode, remap and commit cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionReport {
    pub total: usize,
    pub changed: usize,
    pub allocations: Vec<Allocation>,
    pub renamed: usize,
    pub users: BTreeMap<String, UserRemapStats>,
    pub ambiguities: Vec<String>,
    pub repaired: usize,
    pub dissolved_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub statuses_applied: usize,
    pub transaction: Option<TransactionReport>,
}

/// Catalog, registry and ledgers of a transaction that has not been written.
struct Staged {
    catalog: Catalog,
    registry: CategoryRegistry,
    ledgers: BTreeMap<String, UserProgress>,
    report: TransactionReport,
}

pub struct App {
    pub config: AppConfig,
    store: Store,
    catalog: Catalog,
    registry: CategoryRegistry,
    /// uid -> ledger, for every configured user and every ledger on disk.
    ledgers: BTreeMap<String, UserProgress>,
    /// Soft errors found while loading.
    pub repairs: Vec<EngineError>,
}

impl App {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let config = AppConfig::load_or_create(data_dir)?;
        let store = Store::new(data_dir);
        let registry = store.load_registry().context("load category registry")?;
        let catalog = store.load_catalog().context("load achievement catalog")?;

        let mut uids: Vec<String> = config.users.iter().map(|user| user.uid.clone()).collect();
        for uid in store.ledger_uids().context("list progress files")? {
            if !uids.contains(&uid) {
                uids.push(uid);
            }
        }
        let (mut ledgers, repairs) = store.load_ledgers(&uids).context("load progress")?;

        let codes = catalog.codes();
        for ledger in ledgers.values_mut() {
            ledger.reconcile(&codes);
            groups::repair_ledger(&catalog.achievements, ledger);
        }

        info!(
            data_dir = %data_dir.display(),
            achievements = catalog.len(),
            users = ledgers.len(),
            repairs = repairs.len(),
            "data loaded"
        );
        Ok(Self {
            config,
            store,
            catalog,
            registry,
            ledgers,
            repairs,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    pub fn data_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn current_user(&self) -> Result<&UserProfile> {
        self.config.current()
    }

    pub fn ledger(&self) -> Result<&UserProgress> {
        let user = self.current_user()?;
        self.ledgers
            .get(&user.uid)
            .ok_or_else(|| EngineError::UnknownUser(user.name.clone()).into())
    }

    /// Points queries and status changes at `name` for this session only.
    pub fn use_user(&mut self, name: &str) -> Result<()> {
        if self.config.user(name).is_none() {
            return Err(EngineError::UnknownUser(name.to_string()).into());
        }
        self.config.current_user = name.to_string();
        Ok(())
    }

    pub fn list(&self, filter: &Filter) -> Result<Vec<Row<'_>>> {
        Ok(stats::filter(&self.catalog.achievements, self.ledger()?, filter))
    }

    pub fn report(&self, filter: &Filter) -> Result<Report> {
        let ledger = self.ledger()?;
        let rows = stats::filter(&self.catalog.achievements, ledger, filter);
        let entries: Vec<&Achievement> = rows.iter().map(|row| row.achievement).collect();
        Ok(stats::report(&entries, ledger))
    }

    pub fn set_status(&mut self, code: &str, intent: StatusIntent) -> Result<Vec<StatusChange>> {
        let uid = self.current_user()?.uid.clone();
        let mut ledger = self.ledgers.get(&uid).cloned().unwrap_or_default();
        let changes = groups::apply_transition(&self.catalog.achievements, &mut ledger, code, intent)?;
        if changes.is_empty() {
            return Ok(changes);
        }
        self.store
            .commit_ledger(&uid, &ledger)
            .with_context(|| format!("save progress of {uid}"))?;
        self.ledgers.insert(uid, ledger);
        Ok(changes)
    }

    pub fn reencode(&mut self) -> Result<TransactionReport> {
        let ((), staged) = self.stage(|_, _| Ok(()))?;
        self.commit(staged, "reencode")
    }

    pub fn set_group(&mut self, group_id: &str, codes: &[String]) -> Result<TransactionReport> {
        let ((), staged) = self.stage(|achievements, _| {
            groups::set_group_membership(group_id, codes, achievements)?;
            Ok(())
        })?;
        self.commit(staged, "set group")
    }

    pub fn new_group(&mut self, codes: &[String]) -> Result<String> {
        if codes.len() < 2 {
            bail!("a group needs at least two achievements");
        }
        let group_id = groups::next_group_id(&self.catalog.achievements);
        self.set_group(&group_id, codes)?;
        Ok(group_id)
    }

    pub fn clear_group(&mut self, group_id: &str) -> Result<TransactionReport> {
        let (cleared, staged) =
            self.stage(|achievements, _| Ok(groups::dissolve_group(group_id, achievements)))?;
        if cleared == 0 {
            bail!("no group named {group_id}");
        }
        self.commit(staged, "clear group")
    }

    pub fn set_rank(&mut self, first: &str, rank: i64) -> Result<TransactionReport> {
        let ((), staged) = self.stage(|_, registry| registry.set_rank(first, rank))?;
        self.commit(staged, "set category rank")
    }

    pub fn move_category(&mut self, first: &str, up: bool) -> Result<TransactionReport> {
        let ((), staged) = self.stage(|_, registry| {
            if up {
                registry.move_up(first)
            } else {
                registry.move_down(first)
            }
        })?;
        self.commit(staged, "move category")
    }

    pub fn add_first_category(&mut self, name: &str, rank: Option<i64>) -> Result<TransactionReport> {
        let (_, staged) = self.stage(|_, registry| Ok(registry.add_first(name, rank)))?;
        self.commit(staged, "add category")
    }

    pub fn add_second_category(
        &mut self,
        first: &str,
        name: &str,
        suffix: Option<u32>,
    ) -> Result<TransactionReport> {
        let (_, staged) = self.stage(|_, registry| registry.add_second(first, name, suffix))?;
        self.commit(staged, "add second category")
    }

    pub fn set_suffix(&mut self, first: &str, second: &str, suffix: u32) -> Result<TransactionReport> {
        let ((), staged) = self.stage(|_, registry| registry.set_suffix(first, second, suffix))?;
        self.commit(staged, "set category suffix")
    }

    pub fn remove_first_category(&mut self, first: &str) -> Result<TransactionReport> {
        let count = self.catalog.category_usage(first, None);
        if count > 0 {
            return Err(EngineError::CategoryInUse {
                name: first.to_string(),
                count,
            }
            .into());
        }
        let ((), staged) = self.stage(|_, registry| registry.remove_first(first))?;
        self.commit(staged, "remove category")
    }

    pub fn remove_second_category(&mut self, first: &str, second: &str) -> Result<TransactionReport> {
        let count = self.catalog.category_usage(first, Some(second));
        if count > 0 {
            return Err(EngineError::CategoryInUse {
                name: format!("{first}/{second}"),
                count,
            }
            .into());
        }
        let ((), staged) = self.stage(|_, registry| registry.remove_second(first, second))?;
        self.commit(staged, "remove second category")
    }

    /// Imports a catalog document, or a bare progress document for the
    /// current user.
    pub fn import_file(&mut self, path: &Path, mode: ImportMode) -> Result<ImportOutcome> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read import file {}", path.display()))?;
        let value = serde_json::from_str(&raw).context("parse import file")?;
        match importer::parse_document(value)? {
            ImportPayload::Progress(progress) => self.apply_progress(progress),
            ImportPayload::Records(records) => {
                let plan = importer::plan_import(&self.catalog.achievements, records, mode, &self.registry)?;
                if plan.imported == 0 {
                    info!(skipped = plan.skipped, "nothing new to import");
                    return Ok(ImportOutcome {
                        imported: 0,
                        skipped: plan.skipped,
                        statuses_applied: 0,
                        transaction: None,
                    });
                }
                let uid = self.current_user()?.uid.clone();
                let achievements = plan.achievements;
                let ((), mut staged) = self.stage(move |current, _| {
                    *current = achievements;
                    Ok(())
                })?;
                let applied = overlay_statuses(&mut staged, &uid, &plan.statuses);
                let reason = match mode {
                    ImportMode::Replace => "import",
                    ImportMode::Merge => "merge",
                };
                let report = self.commit(staged, reason)?;
                Ok(ImportOutcome {
                    imported: plan.imported,
                    skipped: plan.skipped,
                    statuses_applied: applied,
                    transaction: Some(report),
                })
            }
        }
    }

    /// Imports a progress-only document into the current user's ledger.
    pub fn import_progress(&mut self, path: &Path) -> Result<ImportOutcome> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read progress file {}", path.display()))?;
        let value = serde_json::from_str(&raw).context("parse progress file")?;
        match importer::parse_document(value)? {
            ImportPayload::Progress(progress) => self.apply_progress(progress),
            ImportPayload::Records(_) => bail!("{} is a catalog, not a progress file", path.display()),
        }
    }

    fn apply_progress(
        &mut self,
        progress: BTreeMap<String, crate::status::AchievementStatus>,
    ) -> Result<ImportOutcome> {
        let uid = self.current_user()?.uid.clone();
        let mut ledger = self.ledgers.get(&uid).cloned().unwrap_or_default();
        let mut applied = 0;
        let mut skipped = 0;
        for (code, status) in progress {
            if self.catalog.contains(&code) {
                ledger.set(&code, status);
                applied += 1;
            } else {
                skipped += 1;
            }
        }
        groups::repair_ledger(&self.catalog.achievements, &mut ledger);
        self.store
            .commit_ledger(&uid, &ledger)
            .with_context(|| format!("save progress of {uid}"))?;
        self.ledgers.insert(uid, ledger);
        info!(applied, skipped, "progress imported");
        Ok(ImportOutcome {
            imported: applied,
            skipped,
            statuses_applied: applied,
            transaction: None,
        })
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.config.users
    }

    pub fn add_user(&mut self, name: &str, uid: Option<&str>) -> Result<()> {
        let profile = UserProfile::new(name, uid);
        if self.config.user(name).is_some()
            || self.config.users.iter().any(|user| user.uid == profile.uid)
        {
            return Err(EngineError::DuplicateUser(name.to_string()).into());
        }
        let mut ledger = self.ledgers.get(&profile.uid).cloned().unwrap_or_default();
        ledger.reconcile(&self.catalog.codes());
        self.store
            .commit_ledger(&profile.uid, &ledger)
            .with_context(|| format!("create progress of {name}"))?;
        self.ledgers.insert(profile.uid.clone(), ledger);
        self.config.users.push(profile);
        self.config.save()?;
        info!(user = name, "user added");
        Ok(())
    }

    pub fn switch_user(&mut self, name: &str) -> Result<()> {
        self.use_user(name)?;
        self.config.save()?;
        info!(user = name, "switched user");
        Ok(())
    }

    pub fn remove_user(&mut self, name: &str) -> Result<()> {
        let Some(index) = self.config.users.iter().position(|user| user.name == name) else {
            return Err(EngineError::UnknownUser(name.to_string()).into());
        };
        if self.config.users.len() == 1 {
            bail!("cannot remove the last user");
        }
        let profile = self.config.users.remove(index);
        if self.config.current_user == profile.name {
            self.config.current_user = self.config.users[0].name.clone();
        }
        self.config.save()?;
        self.store.remove_ledger(&profile.uid)?;
        self.ledgers.remove(&profile.uid);
        info!(user = name, "user removed");
        Ok(())
    }

    pub fn backup_now(&self, reason: Option<&str>) -> Result<std::path::PathBuf> {
        let user = self.config.current_user.clone();
        backup::create_backup(&self.store, &user, reason, self.config.backup_keep)
    }

    /// Restores the last snapshot and reloads every document from disk.
    pub fn restore_backup(&mut self) -> Result<BackupMeta> {
        let meta = backup::restore_last(&self.store)?;
        let reloaded = App::open(self.store.root())?;
        let current = self.config.current_user.clone();
        *self = reloaded;
        if self.config.user(&current).is_some() {
            self.config.current_user = current;
        }
        Ok(meta)
    }

    /// Applies `mutate` to copies of the catalog and registry, then reencodes,
    /// remaps every ledger and repairs group invariants. Nothing is written.
    fn stage<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<Achievement>, &mut CategoryRegistry) -> crate::error::Result<T>,
    ) -> Result<(T, Staged)> {
        let old = &self.catalog.achievements;
        let mut achievements = old.clone();
        let mut registry = self.registry.clone();
        let value = mutate(&mut achievements, &mut registry)?;

        let reencoded = reencode(achievements, &mut registry);
        let mut achievements = reencoded.achievements;
        let dissolved_groups = groups::normalize_groups(&mut achievements);
        let (mut ledgers, remap) = remap_all_users(old, &achievements, self.ledgers.clone());
        let mut repaired = 0;
        for ledger in ledgers.values_mut() {
            repaired += groups::repair_ledger(&achievements, ledger).len();
        }

        let report = TransactionReport {
            total: achievements.len(),
            changed: reencoded.changed,
            allocations: reencoded.allocations,
            renamed: remap.renamed.len(),
            users: remap.users,
            ambiguities: remap.ambiguities.iter().map(ToString::to_string).collect(),
            repaired,
            dissolved_groups,
        };
        let staged = Staged {
            catalog: Catalog::new(achievements),
            registry,
            ledgers,
            report,
        };
        Ok((value, staged))
    }

    /// Writes a staged transaction. In-memory state changes only after every
    /// document is on disk.
    fn commit(&mut self, staged: Staged, reason: &str) -> Result<TransactionReport> {
        if self.config.auto_backup {
            if let Err(err) = self.backup_now(Some(reason)) {
                warn!(error = %err, "automatic backup failed");
            }
        }

        let ledgers: Vec<(&str, &UserProgress)> = staged
            .ledgers
            .iter()
            .map(|(uid, ledger)| (uid.as_str(), ledger))
            .collect();
        let outcome = self.store.commit(&Commit {
            catalog: Some(&staged.catalog),
            registry: Some(&staged.registry),
            ledgers,
        });
        if let Err(err) = outcome {
            error!(reason, error = %err, "transaction rolled back");
            return Err(err).context(format!("{reason} failed; nothing was changed"));
        }

        info!(
            reason,
            total = staged.report.total,
            changed = staged.report.changed,
            renamed = staged.report.renamed,
            "transaction committed"
        );
        self.catalog = staged.catalog;
        self.registry = staged.registry;
        self.ledgers = staged.ledgers;
        Ok(staged.report)
    }
}

/// Writes imported statuses into `uid`'s staged ledger by identity.
fn overlay_statuses(
    staged: &mut Staged,
    uid: &str,
    statuses: &[(IdentityKey, crate::status::AchievementStatus)],
) -> usize {
    if statuses.is_empty() {
        return 0;
    }
    let codes: HashMap<IdentityKey, &str> = staged
        .catalog
        .achievements
        .iter()
        .filter(|entry| entry.has_code())
        .map(|entry| (entry.identity(), entry.code.as_str()))
        .collect();
    let ledger = staged.ledgers.entry(uid.to_string()).or_default();
    let mut applied = 0;
    for (identity, status) in statuses {
        if let Some(code) = codes.get(identity) {
            ledger.set(code, *status);
            applied += 1;
        }
    }
    ledger.reconcile(&staged.catalog.codes());
    groups::repair_ledger(&staged.catalog.achievements, ledger);
    applied
}
