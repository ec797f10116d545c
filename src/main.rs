use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use svcache::config::Config;
use svcache::logging::{self, LogTarget};
use svcache::paginate::{filter_items, page_numbers, paginate, PageMarker};
use svcache::services::{self, decode_services, CachedServicesClient, Service};
use svcache::session::SessionContext;

#[derive(Parser, Debug)]
#[command(name = "svcache")]
#[command(about = "Local cache for the CRM services catalogue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/svcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Auth token sent to the backend (default: $SVCACHE_TOKEN)
  #[arg(long, global = true)]
  token: Option<String>,

  /// Print JSON instead of a table
  #[arg(long, global = true)]
  json: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List enabled services, revalidating the cache in the background
  List {
    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = 20)]
    per_page: usize,

    /// Case-insensitive match on label or slug
    #[arg(short, long)]
    search: Option<String>,
  },
  /// Fetch now and replace the cache
  Refresh,
  /// Apply only the remote changes to the cache
  Sync,
  /// Show cache freshness and size
  Status,
  /// Delete cached services
  Clear,
  /// Compare two service lists saved as JSON arrays
  Diff { local: PathBuf, remote: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let Args {
    config,
    token,
    json,
    log_stderr,
    command,
  } = Args::parse();

  let target = if log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::default_for_platform()
  };
  let _guard = logging::init(target);

  match command {
    Command::Diff { local, remote } => run_diff(&local, &remote, json),
    command => {
      let config = Config::load(config.as_deref())?;
      let session = SessionContext::new(config.session.max_age());
      if let Some(token) = token.or_else(Config::get_api_token) {
        session.login_with_token(token);
      }
      let client = CachedServicesClient::from_config(&config)?;
      run(command, &client, &session, json).await
    }
  }
}

async fn run<S>(
  command: Command,
  client: &CachedServicesClient<S>,
  session: &SessionContext,
  json: bool,
) -> Result<()>
where
  S: svcache::cache::CacheStorage + 'static,
{
  let token = session.token();

  match command {
    Command::List {
      page,
      per_page,
      search,
    } => {
      let services = client.get_services_for(session).await;
      let matching = filter_items(&services, search.as_deref().unwrap_or(""), |s| {
        vec![s.label.as_str(), s.slug.as_str()]
      });
      let page = paginate(&matching, page, per_page);

      if json {
        print_json(&page.items)?;
      } else {
        print_table(&page.items);
        println!();
        println!("{}", page.summary("services"));
        if page.total_pages > 1 {
          println!("{}", render_pages(page.current_page, page.total_pages));
        }
      }

      // the revalidation would be cut off by process exit
      client.settle().await;
    }
    Command::Refresh => {
      let services = client.refresh(token.as_deref()).await;
      if json {
        print_json(&services)?;
      } else {
        print_table(&services);
      }
    }
    Command::Sync => {
      let report = client.sync(token.as_deref()).await?;
      if json {
        print_json(&json!({
          "added": report.added,
          "updated": report.updated,
          "removed": report.removed,
        }))?;
      } else {
        println!(
          "Synced: {} added, {} updated, {} removed",
          report.added, report.updated, report.removed
        );
      }
    }
    Command::Status => {
      let status = client.status()?;
      if json {
        print_json(&json!({
          "freshness": status.freshness.to_string(),
          "entities": status.entities,
          "saved_at": status.saved_at.map(|t| t.to_rfc3339()),
          "age_hours": status.age.map(|age| age.num_hours()),
        }))?;
      } else {
        println!("Freshness: {}", status.freshness);
        println!("Entities:  {}", status.entities);
        match (status.saved_at, status.age) {
          (Some(saved_at), Some(age)) => println!(
            "Saved at:  {} ({} hours ago)",
            saved_at.to_rfc3339(),
            age.num_hours()
          ),
          _ => println!("Saved at:  never"),
        }
      }
    }
    Command::Clear => {
      client.clear()?;
      println!("Cache cleared");
    }
    Command::Diff { local, remote } => run_diff(&local, &remote, json)?,
  }

  Ok(())
}

fn run_diff(local: &Path, remote: &Path, json: bool) -> Result<()> {
  let local = decode_services(read_json_array(local)?);
  let remote = decode_services(read_json_array(remote)?);
  let diff = services::diff(&local, &remote);

  let new: Vec<&str> = diff.new.iter().map(|s| s.id.as_str()).collect();
  let updated: Vec<&str> = diff.updated.iter().map(|s| s.id.as_str()).collect();

  if json {
    return print_json(&json!({
      "new": new,
      "updated": updated,
      "removed": diff.removed,
    }));
  }

  if diff.is_empty() {
    println!("No differences");
    return Ok(());
  }
  for id in new {
    println!("+ {}", id);
  }
  for id in updated {
    println!("~ {}", id);
  }
  for id in &diff.removed {
    println!("- {}", id);
  }
  Ok(())
}

fn read_json_array(path: &Path) -> Result<Vec<Value>> {
  let content = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&content)
    .map_err(|e| eyre!("Failed to parse {} as a JSON array: {}", path.display(), e))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render JSON: {}", e))?;
  println!("{}", rendered);
  Ok(())
}

fn print_table(services: &[Service]) {
  if services.is_empty() {
    println!("No services");
    return;
  }

  let id_width = services.iter().map(|s| s.id.len()).max().unwrap_or(0).max(2);
  let label_width = services
    .iter()
    .map(|s| s.label.chars().count())
    .max()
    .unwrap_or(0)
    .max(5);

  println!("{:<id_width$}  {:<label_width$}  SLUG", "ID", "LABEL");
  for service in services {
    println!(
      "{:<id_width$}  {:<label_width$}  {}",
      service.id, service.label, service.slug
    );
  }
}

fn render_pages(current: usize, total: usize) -> String {
  page_numbers(current, total)
    .into_iter()
    .map(|marker| match marker {
      PageMarker::Page(page) if page == current => format!("[{}]", page),
      PageMarker::Page(page) => page.to_string(),
      PageMarker::Gap => "...".to_string(),
    })
    .collect::<Vec<_>>()
    .join(" ")
}
