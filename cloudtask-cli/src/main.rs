use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;

use cloudtask_core::{Extracted, Task, TaskStatus, TaskWaiter, WaitSpec, reconcile};
use cloudtask_provider::resources::resource_types;
use cloudtask_provider::{HttpClient, ProviderConfig};

#[derive(Parser)]
#[command(name = "cloudtask")]
#[command(about = "Wait on cloud tasks and preview collection changes", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a task to finish and print the resources it created
    Wait {
        task_id: String,

        /// Path to provider config file
        #[arg(long, default_value = "cloudtask.json")]
        config: PathBuf,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 1200)]
        timeout: u64,

        /// Keep polling when the task reports an error
        #[arg(long)]
        tolerate_errors: bool,
    },
    /// Show which items of a JSON array would be removed and added
    Reconcile {
        old: PathBuf,
        new: PathBuf,

        /// Compare items by this field instead of by their whole content
        #[arg(long)]
        key: Option<String>,
    },
    /// Validate a provider config file
    CheckConfig { file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Commands::Wait {
            task_id,
            config,
            timeout,
            tolerate_errors,
        } => run_wait(&task_id, &config, timeout, tolerate_errors).await,
        Commands::Reconcile { old, new, key } => run_reconcile(&old, &new, key.as_deref()),
        Commands::CheckConfig { file } => run_check_config(&file),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_wait(
    task_id: &str,
    config: &Path,
    timeout: u64,
    tolerate_errors: bool,
) -> Result<(), String> {
    let config = ProviderConfig::load(config).map_err(|e| e.to_string())?;
    let client = HttpClient::new(&config).map_err(|e| e.to_string())?;

    let mut spec = WaitSpec::new(task_id, timeout);
    if tolerate_errors {
        spec = spec.tolerate_errors();
    }

    println!("{}", format!("Waiting for task {}...", task_id).cyan());
    let task = TaskWaiter::new(&client)
        .with_poll_interval(config.poll_interval())
        .wait_and_extract(&spec, |task: &Task| {
            if task.state == TaskStatus::Finished {
                Extracted::Ready(task.clone())
            } else {
                Extracted::NotReady(format!("task is {}", task.state))
            }
        })
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", format!("✓ Task {} finished.", task_id).green().bold());
    let created = task.created_resources.unwrap_or_default();
    let json = serde_json::to_string_pretty(&created).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn load_items(path: &Path) -> Result<Vec<serde_json::Value>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("Parse error in {}: {}", path.display(), e))?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(format!("{} must contain a JSON array", path.display())),
    }
}

/// Identity of an item: one field when `key` is given, otherwise the whole
/// item in its canonical (sorted-key) JSON form
fn item_key(item: &serde_json::Value, key: Option<&str>) -> String {
    match key.and_then(|k| item.get(k)) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => item.to_string(),
    }
}

/// Every item must carry `key`, otherwise keyless items would collapse
fn check_key(items: &[serde_json::Value], key: &str, path: &Path) -> Result<(), String> {
    match items.iter().find(|item| item.get(key).is_none()) {
        Some(item) => Err(format!(
            "item {} in {} has no field '{}'",
            item,
            path.display(),
            key
        )),
        None => Ok(()),
    }
}

fn summary(removed: usize, added: usize) -> String {
    if removed == 0 && added == 0 {
        "No changes.".to_string()
    } else {
        format!("{} to remove, {} to add.", removed, added)
    }
}

fn run_reconcile(old: &Path, new: &Path, key: Option<&str>) -> Result<(), String> {
    let old_items = load_items(old)?;
    let new_items = load_items(new)?;
    if let Some(key) = key {
        check_key(&old_items, key, old)?;
        check_key(&new_items, key, new)?;
    }
    debug!(
        "reconciling {} old against {} new item(s)",
        old_items.len(),
        new_items.len()
    );

    let (to_remove, to_add) = reconcile(&old_items, &new_items, |item| item_key(item, key));

    for item in &to_remove {
        println!("{}", format!("- {}", item).red());
    }
    for item in &to_add {
        println!("{}", format!("+ {}", item).green());
    }

    let line = summary(to_remove.len(), to_add.len());
    if to_remove.is_empty() && to_add.is_empty() {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.bold());
    }
    Ok(())
}

fn run_check_config(file: &Path) -> Result<(), String> {
    let config = ProviderConfig::load(file).map_err(|e| e.to_string())?;

    println!(
        "{}",
        format!("✓ {} is valid.", file.display()).green().bold()
    );
    println!("  endpoint: {}", config.endpoint);
    println!("  poll interval: {}s", config.poll_interval_secs);
    for resource_type in resource_types() {
        let t = config.timeouts_for(resource_type.name(), resource_type.timeouts());
        println!(
            "  • {}: create {}s, update {}s, delete {}s",
            resource_type.name(),
            t.create,
            t.update,
            t.delete
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn item_key_by_field_or_content() {
        let item = json!({"address": "10.0.0.5", "port": 80});
        assert_eq!(item_key(&item, Some("address")), "10.0.0.5");
        assert_eq!(item_key(&item, Some("port")), "80");
        assert_eq!(item_key(&item, Some("weight")), item.to_string());

        let reordered: serde_json::Value =
            serde_json::from_str(r#"{"port": 80, "address": "10.0.0.5"}"#).unwrap();
        assert_eq!(item_key(&item, None), item_key(&reordered, None));
    }

    #[test]
    fn reconcile_by_key() {
        let old = vec![json!({"name": "a", "v": 1}), json!({"name": "b", "v": 1})];
        let new = vec![json!({"name": "b", "v": 2}), json!({"name": "c", "v": 1})];

        let (to_remove, to_add) = reconcile(&old, &new, |i| item_key(i, Some("name")));
        assert_eq!(to_remove, vec![json!({"name": "a", "v": 1})]);
        assert_eq!(to_add, vec![json!({"name": "c", "v": 1})]);

        let (to_remove, to_add) = reconcile(&old, &new, |i| item_key(i, None));
        assert_eq!(to_remove.len(), 2);
        assert_eq!(to_add.len(), 2);
    }

    #[test]
    fn items_without_the_key_field_are_rejected() {
        let items = vec![
            json!({"name": "a"}),
            json!({"other": 1}),
            json!({"other": 2}),
        ];
        let err = check_key(&items, "name", Path::new("old.json")).unwrap_err();
        assert_eq!(err, r#"item {"other":1} in old.json has no field 'name'"#);

        assert!(check_key(&items[..1], "name", Path::new("old.json")).is_ok());
    }

    #[test]
    fn run_reconcile_reports_missing_key() {
        let mut old = tempfile::NamedTempFile::new().unwrap();
        old.write_all(br#"[{"name": "a"}, {"v": 1}]"#).unwrap();
        let mut new = tempfile::NamedTempFile::new().unwrap();
        new.write_all(br#"[{"name": "a"}]"#).unwrap();

        let err = run_reconcile(old.path(), new.path(), Some("name")).unwrap_err();
        assert!(err.contains("has no field 'name'"), "{}", err);
        assert!(run_reconcile(old.path(), new.path(), None).is_ok());
    }

    #[test]
    fn load_items_requires_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"not": "a list"}"#).unwrap();
        let err = load_items(file.path()).unwrap_err();
        assert!(err.contains("must contain a JSON array"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[1, 2, 3]"#).unwrap();
        assert_eq!(load_items(file.path()).unwrap().len(), 3);
    }

    #[test]
    fn summary_line() {
        assert_eq!(summary(0, 0), "No changes.");
        assert_eq!(summary(1, 2), "1 to remove, 2 to add.");
    }

    #[test]
    fn cli_parses_wait_flags() {
        let cli = Cli::try_parse_from([
            "cloudtask",
            "wait",
            "abc-123",
            "--timeout",
            "5",
            "--tolerate-errors",
        ])
        .unwrap();
        match cli.command {
            Commands::Wait {
                task_id,
                timeout,
                tolerate_errors,
                config,
            } => {
                assert_eq!(task_id, "abc-123");
                assert_eq!(timeout, 5);
                assert!(tolerate_errors);
                assert_eq!(config, PathBuf::from("cloudtask.json"));
            }
            _ => panic!("expected wait"),
        }
    }
}
