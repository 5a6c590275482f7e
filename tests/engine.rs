use std::{fs, path::Path};
use tempfile::TempDir;
use tidemark::{
    app::App,
    groups::StatusIntent,
    importer::ImportMode,
    stats::Filter,
    status::AchievementStatus,
    store::{CATALOG_FILE, REGISTRY_FILE},
    EngineError,
};

const REGISTRY: &str = r#"{
    "firstCategories": {"A": "1", "B": "2"},
    "secondCategories": {"A": {"X": "10"}, "B": {"X": "10"}}
}"#;

const CATALOG: &str = r#"[
    {"name": "a1", "description": "first", "firstCategory": "A", "secondCategory": "X", "version": "1.0"},
    {"name": "a2", "description": "second", "firstCategory": "A", "secondCategory": "X", "version": "1.1"},
    {"name": "b1", "description": "third", "firstCategory": "B", "secondCategory": "X", "version": "1.0"}
]"#;

fn setup() -> (TempDir, App) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(REGISTRY_FILE), REGISTRY).expect("registry");
    let mut app = App::open(dir.path()).expect("open");
    let source = dir.path().join("import.json");
    fs::write(&source, CATALOG).expect("source");
    app.import_file(&source, ImportMode::Replace).expect("import");
    (dir, app)
}

fn code_of(app: &App, name: &str) -> String {
    app.catalog()
        .achievements
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.code.clone())
        .expect("achievement")
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .expect("list")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".json"))
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).expect("read"),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn import_assigns_bucket_codes() {
    let (_dir, app) = setup();
    assert_eq!(code_of(&app, "a1"), "10100001");
    assert_eq!(code_of(&app, "a2"), "10100002");
    assert_eq!(code_of(&app, "b1"), "20100001");
    let ordinals: Vec<u32> = app
        .catalog()
        .achievements
        .iter()
        .map(|entry| entry.absolute_ordinal)
        .collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
}

#[test]
fn swapping_ranks_keeps_every_users_progress() {
    let (dir, mut app) = setup();
    app.set_status("10100001", StatusIntent::Complete).expect("a1");
    app.set_status("20100001", StatusIntent::MarkUnavailable).expect("b1");
    app.add_user("Ann", Some("1001")).expect("add");
    app.switch_user("Ann").expect("switch");
    app.set_status("10100002", StatusIntent::Complete).expect("a2");

    let report = app.move_category("A", false).expect("move");
    assert_eq!(report.renamed, 3);
    assert_eq!(code_of(&app, "b1"), "10100001");
    assert_eq!(code_of(&app, "a1"), "20100001");
    assert_eq!(code_of(&app, "a2"), "20100002");

    drop(app);
    let mut app = App::open(dir.path()).expect("reopen");
    assert_eq!(app.config.current_user, "Ann");
    let ann = app.ledger().expect("ann");
    assert_eq!(ann.status("20100002"), AchievementStatus::Completed);
    assert_eq!(ann.count(AchievementStatus::Completed), 1);

    app.use_user("Default").expect("default");
    let default = app.ledger().expect("default");
    assert_eq!(default.status("20100001"), AchievementStatus::Completed);
    assert_eq!(default.status("10100001"), AchievementStatus::Unavailable);
    assert_eq!(default.status("20100002"), AchievementStatus::NotStarted);
}

#[test]
fn unmapped_category_aborts_import_without_writes() {
    let (dir, mut app) = setup();
    app.set_status("10100001", StatusIntent::Complete).expect("a1");
    let before = snapshot(dir.path());

    let source = dir.path().join("bad.json");
    fs::write(&source, r#"[{"name": "z", "secondCategory": "未知分类"}]"#).expect("source");
    let before = before
        .into_iter()
        .filter(|(name, _)| name != "bad.json")
        .collect::<Vec<_>>();

    let err = app.import_file(&source, ImportMode::Merge).expect_err("missing");
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::MissingCategory { names }) => {
            assert_eq!(names, &vec!["未知分类".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let after: Vec<_> = snapshot(dir.path())
        .into_iter()
        .filter(|(name, _)| name != "bad.json")
        .collect();
    assert_eq!(before, after);
    assert_eq!(app.catalog().len(), 3);
}

#[test]
fn failed_commit_leaves_disk_and_memory_untouched() {
    let (dir, mut app) = setup();
    app.set_status("10100001", StatusIntent::Complete).expect("a1");
    let catalog_before = fs::read(dir.path().join(CATALOG_FILE)).expect("catalog");
    let blocker = dir.path().join("user_progress_Default.json.tmp");
    fs::create_dir_all(&blocker).expect("blocker");

    let err = app.move_category("A", false).expect_err("blocked");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Persistence { .. })
    ));
    assert_eq!(fs::read(dir.path().join(CATALOG_FILE)).expect("catalog"), catalog_before);
    assert_eq!(code_of(&app, "a1"), "10100001");
    assert_eq!(app.registry().rank_of("A"), 1);

    fs::remove_dir_all(&blocker).expect("unblock");
    app.move_category("A", false).expect("retry");
    assert_eq!(code_of(&app, "a1"), "20100001");
    assert_eq!(
        app.ledger().expect("ledger").status("20100001"),
        AchievementStatus::Completed
    );
}

#[test]
fn groups_lock_reset_and_follow_reencodes() {
    let (_dir, mut app) = setup();
    let members = vec!["10100001".to_string(), "10100002".to_string()];
    let group = app.new_group(&members).expect("group");
    assert_eq!(group, "group_001");

    app.set_status("10100002", StatusIntent::Complete).expect("complete");
    let ledger = app.ledger().expect("ledger");
    assert_eq!(ledger.status("10100001"), AchievementStatus::Locked);

    let report = app.report(&Filter::default()).expect("stats");
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.completed, 1);
    assert_eq!(report.summary.completion_rate, 50);

    app.move_category("A", false).expect("move");
    let ledger = app.ledger().expect("ledger");
    assert_eq!(ledger.status("20100002"), AchievementStatus::Completed);
    assert_eq!(ledger.status("20100001"), AchievementStatus::Locked);
    let first = app
        .catalog()
        .achievements
        .iter()
        .find(|entry| entry.name == "a1")
        .expect("a1");
    assert_eq!(first.mutex_codes.as_deref(), Some(&["20100002".to_string()][..]));

    app.set_status("20100001", StatusIntent::Reset).expect("reset");
    let ledger = app.ledger().expect("ledger");
    assert_eq!(ledger.status("20100001"), AchievementStatus::NotStarted);
    assert_eq!(ledger.status("20100002"), AchievementStatus::NotStarted);
}

#[test]
fn merge_adds_only_new_achievements_and_allocates_categories() {
    let (dir, mut app) = setup();
    let source = dir.path().join("merge.json");
    fs::write(
        &source,
        r#"[
            {"名称": "a1", "描述": "first。", "第一分类": "A", "第二分类": "X", "版本": "1.0"},
            {"名称": "c1", "描述": "new", "第一分类": "C", "第二分类": "Y", "版本": "2", "获取状态": "已完成"}
        ]"#,
    )
    .expect("source");

    let outcome = app.import_file(&source, ImportMode::Merge).expect("merge");
    assert_eq!(outcome.imported, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.statuses_applied, 1);
    assert_eq!(app.catalog().len(), 4);
    assert_eq!(app.registry().rank_of("C"), 3);
    assert_eq!(code_of(&app, "c1"), "30100001");
    assert_eq!(
        app.ledger().expect("ledger").status("30100001"),
        AchievementStatus::Completed
    );
}

#[test]
fn progress_file_updates_current_user_only() {
    let (dir, mut app) = setup();
    app.add_user("Ann", None).expect("ann");
    let source = dir.path().join("progress.json");
    fs::write(
        &source,
        r#"{"10100002": {"获取状态": "已完成"}, "99999999": {"获取状态": "已完成"}}"#,
    )
    .expect("source");

    let outcome = app.import_progress(&source).expect("progress");
    assert_eq!(outcome.imported, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(
        app.ledger().expect("ledger").status("10100002"),
        AchievementStatus::Completed
    );
    app.use_user("Ann").expect("ann");
    assert_eq!(
        app.ledger().expect("ledger").status("10100002"),
        AchievementStatus::NotStarted
    );
}

#[test]
fn categories_in_use_cannot_be_removed() {
    let (_dir, mut app) = setup();
    let err = app.remove_first_category("B").expect_err("in use");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::CategoryInUse { count: 1, .. })
    ));
    app.add_first_category("Spare", None).expect("add");
    app.remove_first_category("Spare").expect("remove");
    assert!(!app.registry().contains_first("Spare"));
}

#[test]
fn corrupt_ledger_entries_are_repaired_on_load() {
    let (dir, app) = setup();
    drop(app);
    fs::write(
        dir.path().join("user_progress_Default.json"),
        r#"{"10100001": ["已完成"], "10100002": {"获取状态": "已完成"}}"#,
    )
    .expect("ledger");

    let app = App::open(dir.path()).expect("open");
    assert_eq!(app.repairs.len(), 1);
    let ledger = app.ledger().expect("ledger");
    assert_eq!(ledger.status("10100001"), AchievementStatus::NotStarted);
    assert_eq!(ledger.status("10100002"), AchievementStatus::Completed);
    assert_eq!(ledger.len(), 3);
}

#[test]
fn restore_brings_back_the_previous_catalog() {
    let (_dir, mut app) = setup();
    app.move_category("A", false).expect("move");
    assert_eq!(code_of(&app, "a1"), "20100001");
    app.restore_backup().expect("restore");
    assert_eq!(code_of(&app, "a1"), "10100001");
}

#[test]
fn shared_identities_keep_progress_through_unrelated_edits() {
    let (dir, mut app) = setup();
    let source = dir.path().join("twins.json");
    fs::write(
        &source,
        r#"[
            {"name": "twin", "description": "one", "firstCategory": "A", "secondCategory": "X", "version": "1.0"},
            {"name": "twin", "description": "two", "firstCategory": "A", "secondCategory": "X", "version": "1.1"}
        ]"#,
    )
    .expect("source");
    app.import_file(&source, ImportMode::Replace).expect("import");
    app.set_status("10100001", StatusIntent::Complete).expect("first twin");
    app.set_status("10100002", StatusIntent::MarkUnavailable).expect("second twin");

    let report = app.add_first_category("Spare", None).expect("spare");
    assert_eq!(report.ambiguities.len(), 1);
    let codes: Vec<&str> = app
        .catalog()
        .achievements
        .iter()
        .map(|entry| entry.code.as_str())
        .collect();
    assert_eq!(codes, vec!["10100001", "10100002"]);
    let ledger = app.ledger().expect("ledger");
    assert_eq!(ledger.status("10100001"), AchievementStatus::Completed);
    assert_eq!(ledger.status("10100002"), AchievementStatus::Unavailable);
}
