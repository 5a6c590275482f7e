use crate::{
    app::{App, ImportOutcome, TransactionReport},
    categories::Allocation,
    config::resolve_data_dir,
    groups::{StatusChange, StatusIntent},
    importer::ImportMode,
    stats::{Availability, Filter, HiddenFilter, ListOrder, Report},
};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct GlobalOptions {
    format: Option<OutputFormat>,
    user: Option<String>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug)]
enum CliCommand {
    List(Filter),
    Stats(Filter),
    Status { code: String, intent: StatusIntent },
    GroupSet { id: String, codes: Vec<String> },
    GroupNew(Vec<String>),
    GroupClear(String),
    Categories(CategoryCommand),
    Import { path: PathBuf, mode: ImportMode },
    ProgressImport(PathBuf),
    Reencode,
    Users(UserCommand),
    BackupCreate(Option<String>),
    BackupRestore,
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
enum CategoryCommand {
    List,
    Rank { first: String, rank: i64 },
    Up(String),
    Down(String),
    Add { name: String, rank: Option<i64> },
    AddSecond { first: String, name: String, suffix: Option<u32> },
    Suffix { first: String, second: String, suffix: u32 },
    Remove(String),
    RemoveSecond { first: String, second: String },
}

#[derive(Debug, PartialEq, Eq)]
enum UserCommand {
    List,
    Add { name: String, uid: Option<String> },
    Switch(String),
    Remove(String),
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("tidemark v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let data_dir = resolve_data_dir(global.data_dir.clone())?;
            let mut app = App::open(&data_dir)?;
            for repair in &app.repairs {
                eprintln!("repaired: {repair}");
            }
            if let Some(user) = global.user.as_deref() {
                app.use_user(user)?;
            }
            run_command(&mut app, command, global.format.unwrap_or(OutputFormat::Text))
        }
    }
}

/// Tidemark's data dir, for the binary's log file.
pub fn data_dir_from_args() -> Result<PathBuf> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, _) = parse_global_options(&args)?;
    resolve_data_dir(global.data_dir)
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args)?;
    let command = parse_subcommand(&tokens)?;
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            global.format = Some(parse_format(value)?);
            continue;
        }
        if arg == "--format" {
            let value = iter.next().ok_or_else(|| anyhow!("--format requires a value"))?;
            global.format = Some(parse_format(value)?);
            continue;
        }
        if let Some(value) = arg.strip_prefix("--user=") {
            global.user = Some(value.to_string());
            continue;
        }
        if arg == "--user" {
            let value = iter.next().ok_or_else(|| anyhow!("--user requires a name"))?;
            global.user = Some(value.to_string());
            continue;
        }
        if let Some(value) = arg.strip_prefix("--data-dir=") {
            global.data_dir = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--data-dir" {
            let value = iter.next().ok_or_else(|| anyhow!("--data-dir requires a path"))?;
            global.data_dir = Some(PathBuf::from(value));
            continue;
        }
        tokens.push(arg.to_string());
    }
    Ok((global, tokens))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).ok_or_else(|| anyhow!("Unknown format: {value} (use 'text' or 'json')"))
}

fn parse_subcommand(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        "list" => CliCommand::List(parse_filter(rest)?),
        "stats" => CliCommand::Stats(parse_filter(rest)?),
        "complete" | "reset" | "unavailable" | "available" | "toggle" => {
            let intent = StatusIntent::parse(head)
                .ok_or_else(|| anyhow!("Unknown status command: {head}"))?;
            let code = required(rest, 0, "achievement code")?;
            CliCommand::Status { code, intent }
        }
        "group" => parse_group(rest)?,
        "categories" => CliCommand::Categories(parse_categories(rest)?),
        "import" => CliCommand::Import {
            path: PathBuf::from(required(rest, 0, "file")?),
            mode: ImportMode::Replace,
        },
        "merge" => CliCommand::Import {
            path: PathBuf::from(required(rest, 0, "file")?),
            mode: ImportMode::Merge,
        },
        "progress" => match rest.first().map(String::as_str) {
            Some("import") => CliCommand::ProgressImport(PathBuf::from(required(rest, 1, "file")?)),
            _ => bail!("Unknown progress command (use 'progress import <file>')"),
        },
        "reencode" => CliCommand::Reencode,
        "users" => CliCommand::Users(parse_users(rest)?),
        "backup" => match rest.first().map(String::as_str).unwrap_or("create") {
            "create" => CliCommand::BackupCreate(rest.get(1).cloned()),
            "restore" => CliCommand::BackupRestore,
            other => bail!("Unknown backup command: {other} (use 'create' or 'restore')"),
        },
        other => bail!("Unknown command: {other} (see 'tidemark help')"),
    };
    Ok(command)
}

fn required(args: &[String], index: usize, what: &str) -> Result<String> {
    args.get(index)
        .cloned()
        .ok_or_else(|| anyhow!("missing {what}"))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow!("{what} must be a number, got {value}"))
}

fn parse_filter(args: &[String]) -> Result<Filter> {
    let mut filter = Filter::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone() {
                Some(value) => Ok(value),
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| anyhow!("{name} requires a value")),
            }
        };
        match flag {
            "--search" | "-s" => filter.search = Some(value(flag)?),
            "--version" => filter.version = Some(value(flag)?),
            "--major" => filter.major = Some(value(flag)?),
            "--first" => filter.first_category = Some(value(flag)?),
            "--second" => filter.second_category = Some(value(flag)?),
            "--hidden" => {
                filter.hidden = match value(flag)?.as_str() {
                    "all" => HiddenFilter::All,
                    "only" => HiddenFilter::Only,
                    "exclude" => HiddenFilter::Exclude,
                    other => bail!("Unknown hidden filter: {other} (use all, only or exclude)"),
                }
            }
            "--only" => {
                filter.availability = match value(flag)?.as_str() {
                    "all" => Availability::All,
                    "obtainable" => Availability::Obtainable,
                    "unavailable" => Availability::Unavailable,
                    "groups" => Availability::GroupsOnly,
                    other => bail!("Unknown availability: {other}"),
                }
            }
            "--incomplete-first" => filter.order = ListOrder::IncompleteFirst,
            other => bail!("Unknown option: {other}"),
        }
    }
    Ok(filter)
}

fn parse_group(args: &[String]) -> Result<CliCommand> {
    match args.first().map(String::as_str) {
        Some("set") => {
            let id = required(args, 1, "group id")?;
            let codes = args.get(2..).unwrap_or(&[]).to_vec();
            Ok(CliCommand::GroupSet { id, codes })
        }
        Some("new") => Ok(CliCommand::GroupNew(args.get(1..).unwrap_or(&[]).to_vec())),
        Some("clear") => Ok(CliCommand::GroupClear(required(args, 1, "group id")?)),
        _ => bail!("Unknown group command (use 'set', 'new', or 'clear')"),
    }
}

fn parse_categories(args: &[String]) -> Result<CategoryCommand> {
    let sub = args.first().map(String::as_str).unwrap_or("list");
    let command = match sub {
        "list" => CategoryCommand::List,
        "rank" => CategoryCommand::Rank {
            first: required(args, 1, "category")?,
            rank: parse_number(&required(args, 2, "rank")?, "rank")?,
        },
        "up" => CategoryCommand::Up(required(args, 1, "category")?),
        "down" => CategoryCommand::Down(required(args, 1, "category")?),
        "add" => CategoryCommand::Add {
            name: required(args, 1, "category")?,
            rank: args.get(2).map(|value| parse_number(value, "rank")).transpose()?,
        },
        "add-second" => CategoryCommand::AddSecond {
            first: required(args, 1, "first category")?,
            name: required(args, 2, "second category")?,
            suffix: args.get(3).map(|value| parse_number(value, "suffix")).transpose()?,
        },
        "suffix" => CategoryCommand::Suffix {
            first: required(args, 1, "first category")?,
            second: required(args, 2, "second category")?,
            suffix: parse_number(&required(args, 3, "suffix")?, "suffix")?,
        },
        "remove" => CategoryCommand::Remove(required(args, 1, "category")?),
        "remove-second" => CategoryCommand::RemoveSecond {
            first: required(args, 1, "first category")?,
            second: required(args, 2, "second category")?,
        },
        other => bail!("Unknown categories command: {other}"),
    };
    Ok(command)
}

fn parse_users(args: &[String]) -> Result<UserCommand> {
    let sub = args.first().map(String::as_str).unwrap_or("list");
    let command = match sub {
        "list" => UserCommand::List,
        "add" => UserCommand::Add {
            name: required(args, 1, "user name")?,
            uid: args.get(2).cloned(),
        },
        "switch" => UserCommand::Switch(required(args, 1, "user name")?),
        "remove" => UserCommand::Remove(required(args, 1, "user name")?),
        other => bail!("Unknown users command: {other} (use list, add, switch or remove)"),
    };
    Ok(command)
}

fn run_command(app: &mut App, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::List(filter) => list_achievements(app, &filter, format),
        CliCommand::Stats(filter) => print_stats(&app.report(&filter)?, format),
        CliCommand::Status { code, intent } => {
            let changes = app.set_status(&code, intent)?;
            print_changes(&changes, format)
        }
        CliCommand::GroupSet { id, codes } => {
            let report = app.set_group(&id, &codes)?;
            print_transaction(&report, format)
        }
        CliCommand::GroupNew(codes) => {
            let id = app.new_group(&codes)?;
            emit(format, &id, || println!("Created {id}"))
        }
        CliCommand::GroupClear(id) => {
            let report = app.clear_group(&id)?;
            print_transaction(&report, format)
        }
        CliCommand::Categories(command) => run_categories(app, command, format),
        CliCommand::Import { path, mode } => {
            let outcome = app.import_file(&path, mode)?;
            print_import(&outcome, format)
        }
        CliCommand::ProgressImport(path) => {
            let outcome = app.import_progress(&path)?;
            print_import(&outcome, format)
        }
        CliCommand::Reencode => {
            let report = app.reencode()?;
            print_transaction(&report, format)
        }
        CliCommand::Users(command) => run_users(app, command, format),
        CliCommand::BackupCreate(reason) => {
            let path = app.backup_now(reason.as_deref())?;
            emit(format, &path, || println!("Backup written to {}", path.display()))
        }
        CliCommand::BackupRestore => {
            let meta = app.restore_backup()?;
            emit(format, &meta, || {
                println!("Restored backup from {} ({} files)", meta.time, meta.documents.len())
            })
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

#[derive(Serialize)]
struct AchievementListItem {
    ordinal: u32,
    code: String,
    name: String,
    first_category: String,
    second_category: String,
    version: String,
    status: String,
    hidden: bool,
    group_id: Option<String>,
}

fn list_achievements(app: &App, filter: &Filter, format: OutputFormat) -> Result<()> {
    let items: Vec<AchievementListItem> = app
        .list(filter)?
        .into_iter()
        .map(|row| AchievementListItem {
            ordinal: row.achievement.absolute_ordinal,
            code: row.achievement.code.clone(),
            name: row.achievement.name.clone(),
            first_category: row.achievement.first_category.clone(),
            second_category: row.achievement.second_category.clone(),
            version: row.achievement.version.clone(),
            status: row.status.label().to_string(),
            hidden: row.achievement.hidden,
            group_id: row.achievement.group().map(str::to_string),
        })
        .collect();

    emit(format, &items, || {
        for item in &items {
            let hidden = if item.hidden { "H" } else { " " };
            let group = item.group_id.as_deref().unwrap_or("-");
            println!(
                "{ordinal:>5} {code:<9} {status:<6} {hidden} {version:<5} {group:<10} {name}",
                ordinal = item.ordinal,
                code = item.code,
                status = item.status,
                version = item.version,
                name = item.name
            );
        }
    })
}

fn print_stats(report: &Report, format: OutputFormat) -> Result<()> {
    emit(format, report, || {
        let summary = &report.summary;
        println!("Total:        {}", summary.total);
        println!("Completed:    {}", summary.completed);
        println!("Not started:  {}", summary.not_started);
        println!("Unavailable:  {}", summary.unavailable);
        println!("Hidden:       {}", summary.hidden);
        println!("Groups:       {}", summary.groups);
        println!("Completion:   {}%", summary.completion_rate);
        println!();
        println!("By category:");
        for row in &report.by_category {
            println!(
                "  {:<24} {:>4}/{:<4} {:>3}%",
                row.label, row.completed, row.total, row.completion_rate
            );
        }
        println!("By version:");
        for row in &report.by_version {
            println!(
                "  {:<24} {:>4}/{:<4} {:>3}%",
                row.label, row.completed, row.total, row.completion_rate
            );
        }
    })
}

fn print_changes(changes: &[StatusChange], format: OutputFormat) -> Result<()> {
    emit(format, &changes, || {
        if changes.is_empty() {
            println!("No change");
        }
        for change in changes {
            println!("{}: {} -> {}", change.code, change.from.label(), change.to.label());
        }
    })
}

fn print_transaction(report: &TransactionReport, format: OutputFormat) -> Result<()> {
    emit(format, report, || {
        println!(
            "{} achievements, {} re-coded, {} codes renamed",
            report.total, report.changed, report.renamed
        );
        for allocation in &report.allocations {
            match allocation {
                Allocation::First { name, rank } => println!("  new category {name} (rank {rank})"),
                Allocation::Second { first, name, suffix } => {
                    println!("  new category {first}/{name} (suffix {suffix:03})")
                }
            }
        }
        for (user, stats) in &report.users {
            println!(
                "  {user}: {} renamed, {} retired, {} added, {} dropped",
                stats.renamed, stats.retired, stats.added, stats.dropped
            );
        }
        for group in &report.dissolved_groups {
            println!("  group {group} dissolved");
        }
        if report.repaired > 0 {
            println!("  {} ledger entries repaired", report.repaired);
        }
        for ambiguity in &report.ambiguities {
            println!("  warning: {ambiguity}");
        }
    })
}

fn print_import(outcome: &ImportOutcome, format: OutputFormat) -> Result<()> {
    emit(format, outcome, || {
        println!(
            "Imported {} (skipped {}, statuses applied {})",
            outcome.imported, outcome.skipped, outcome.statuses_applied
        );
    })?;
    if format == OutputFormat::Text {
        if let Some(report) = &outcome.transaction {
            print_transaction(report, format)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CategoryListItem {
    name: String,
    rank: i64,
    usage: usize,
    seconds: Vec<SecondListItem>,
}

#[derive(Serialize)]
struct SecondListItem {
    name: String,
    suffix: u32,
    usage: usize,
}

fn run_categories(app: &mut App, command: CategoryCommand, format: OutputFormat) -> Result<()> {
    let report = match command {
        CategoryCommand::List => return list_categories(app, format),
        CategoryCommand::Rank { first, rank } => app.set_rank(&first, rank)?,
        CategoryCommand::Up(first) => app.move_category(&first, true)?,
        CategoryCommand::Down(first) => app.move_category(&first, false)?,
        CategoryCommand::Add { name, rank } => app.add_first_category(&name, rank)?,
        CategoryCommand::AddSecond { first, name, suffix } => {
            app.add_second_category(&first, &name, suffix)?
        }
        CategoryCommand::Suffix {
            first,
            second,
            suffix,
        } => app.set_suffix(&first, &second, suffix)?,
        CategoryCommand::Remove(first) => app.remove_first_category(&first)?,
        CategoryCommand::RemoveSecond { first, second } => {
            app.remove_second_category(&first, &second)?
        }
    };
    print_transaction(&report, format)
}

fn list_categories(app: &App, format: OutputFormat) -> Result<()> {
    let registry = app.registry();
    let catalog = app.catalog();
    let items: Vec<CategoryListItem> = registry
        .first_categories()
        .into_iter()
        .map(|first| CategoryListItem {
            name: first.name.clone(),
            rank: first.rank,
            usage: catalog.category_usage(&first.name, None),
            seconds: registry
                .second_categories(&first.name)
                .into_iter()
                .map(|second| SecondListItem {
                    name: second.name.clone(),
                    suffix: second.suffix,
                    usage: catalog.category_usage(&first.name, Some(&second.name)),
                })
                .collect(),
        })
        .collect();

    emit(format, &items, || {
        for item in &items {
            println!("{:>3} {} ({})", item.rank, item.name, item.usage);
            for second in &item.seconds {
                println!("    {:03} {} ({})", second.suffix, second.name, second.usage);
            }
        }
    })
}

#[derive(Serialize)]
struct UserListItem {
    name: String,
    uid: String,
    active: bool,
}

fn run_users(app: &mut App, command: UserCommand, format: OutputFormat) -> Result<()> {
    match command {
        UserCommand::List => {}
        UserCommand::Add { name, uid } => app.add_user(&name, uid.as_deref())?,
        UserCommand::Switch(name) => app.switch_user(&name)?,
        UserCommand::Remove(name) => app.remove_user(&name)?,
    }
    let current = app.config.current_user.clone();
    let items: Vec<UserListItem> = app
        .users()
        .iter()
        .map(|user| UserListItem {
            name: user.name.clone(),
            uid: user.uid.clone(),
            active: user.name == current,
        })
        .collect();

    emit(format, &items, || {
        for item in &items {
            let marker = if item.active { "*" } else { " " };
            println!("{marker} {} ({})", item.name, item.uid);
        }
    })
}

fn print_help() {
    println!("tidemark v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  tidemark list [filters]                  List achievements");
    println!("  tidemark stats [filters]                 Completion statistics (groups count once)");
    println!("  tidemark complete <code>                 Mark completed (locks the rest of its group)");
    println!("  tidemark reset <code>                    Reset (resets its whole group)");
    println!("  tidemark unavailable <code>              Mark temporarily unavailable");
    println!("  tidemark available <code>                Clear the unavailable mark");
    println!("  tidemark toggle <code>                   Complete if not started, otherwise reset");
    println!("  tidemark group set <id> <codes...>       Set the members of a group");
    println!("  tidemark group new <codes...>            Create a group from codes");
    println!("  tidemark group clear <id>                Dissolve a group");
    println!("  tidemark categories [list]               Show the category taxonomy");
    println!("  tidemark categories rank <first> <n>     Set a category's rank");
    println!("  tidemark categories up|down <first>      Swap rank with the neighbour");
    println!("  tidemark categories add <first> [rank]   Add a first category");
    println!("  tidemark categories add-second <first> <second> [suffix]");
    println!("  tidemark categories suffix <first> <second> <suffix>");
    println!("  tidemark categories remove <first>");
    println!("  tidemark categories remove-second <first> <second>");
    println!("  tidemark import <file>                   Replace the catalog from a JSON file");
    println!("  tidemark merge <file>                    Add new achievements from a JSON file");
    println!("  tidemark progress import <file>          Load statuses for the current user");
    println!("  tidemark reencode                        Recompute codes and ordinals");
    println!("  tidemark users [list|add|switch|remove]  Manage local users");
    println!("  tidemark backup [create [reason]|restore]");
    println!();
    println!("Filters:");
    println!("  --search <text>  --version <v>  --major <n>  --first <name>  --second <name>");
    println!("  --hidden <all|only|exclude>  --only <all|obtainable|unavailable|groups>");
    println!("  --incomplete-first");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                     Output format");
    println!("  --user <name>                            Act as this user for one command");
    println!("  --data-dir <path>                        Data directory (or TIDEMARK_DATA_DIR)");
    println!("  -h, --help                               Show help");
    println!("  -V, --version                            Show version");
}
