//! `itemstore` command-line entry point.
//!
//! # Responsibility
//! - Open a repository from flags or a JSON config file.
//! - Expose browse, create, query and search operations for local use.

use clap::{Parser, Subcommand};
use itemstore_core::schema::pim::{pim_schema, NOTE};
use itemstore_core::schema::registry::ITEM_KIND_PATH;
use itemstore_core::schema::SchemaDocument;
use itemstore_core::{
    core_version, ItemId, LoggingConfig, RepoError, RepoResult, Repository, RepositoryConfig,
    RepositoryView, SearchQuery, Value,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "itemstore")]
#[command(version, about = "Schema-driven personal item repository", long_about = None)]
struct Cli {
    /// Repository config file (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file; in-memory when omitted
    #[arg(long)]
    db: Option<PathBuf>,

    /// Schema document (JSON); the built-in PIM schema when omitted
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate and repository versions
    Version,

    /// List the children of an item path (roots when omitted)
    Ls { path: Option<String> },

    /// Create a plain container item
    Mkdir {
        name: String,
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Create a note
    AddNote {
        name: String,
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        body: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Run a query, e.g. `for i in "pim/Note" where i.title == $1`
    Query {
        text: String,
        /// Positional parameters bound to $1, $2, ...
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Print access paths instead of running
        #[arg(long)]
        explain: bool,
    },

    /// Full-text search over committed items
    Search {
        text: String,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
        /// Only items of exactly this kind path
        #[arg(short, long)]
        kind: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> RepoResult<()> {
    let mut config = match &cli.config {
        Some(path) => RepositoryConfig::from_file(path)?,
        None => RepositoryConfig::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    if let Some(log_dir) = cli.log_dir {
        config.logging = Some(LoggingConfig::with_default_level(log_dir));
    }
    let schema = match &cli.schema {
        Some(path) => SchemaDocument::from_file(path)?.build()?,
        None => pim_schema()?,
    };

    let repo = Repository::open(&config, schema)?;
    let mut view = repo.create_view("cli")?;
    match cli.command {
        Commands::Version => {
            println!("itemstore_core version={}", core_version());
            println!("repository {} version={}", repo.location(), repo.current_version()?);
        }
        Commands::Ls { path } => {
            let parent = resolve(&mut view, path.as_deref())?;
            for id in view.children(parent)? {
                let (kind, name) = {
                    let item = view.item(id)?;
                    (item.kind(), item.name().to_string())
                };
                let kind = view.schema().kind(kind).path();
                println!("{id}  {kind:<20} {name}");
            }
        }
        Commands::Mkdir { name, parent } => {
            let parent = resolve(&mut view, parent.as_deref())?;
            let id = view.create_item(ITEM_KIND_PATH, parent, &name)?;
            commit(&mut view, id)?;
        }
        Commands::AddNote {
            name,
            title,
            body,
            tags,
            parent,
        } => {
            let parent = resolve(&mut view, parent.as_deref())?;
            let id = view.create_item(NOTE, parent, &name)?;
            view.set_value(id, "title", title)?;
            if let Some(body) = body {
                view.set_value(id, "body", body)?;
            }
            for tag in tags {
                view.add_value(id, "tags", tag)?;
            }
            commit(&mut view, id)?;
        }
        Commands::Query {
            text,
            params,
            explain,
        } => {
            let plan = itemstore_core::parse_query(&text)?;
            let params: Vec<Value> = params.iter().map(|raw| parse_param(raw)).collect();
            if explain {
                for path in view.explain(&plan, &params)? {
                    println!("{path}");
                }
            } else {
                for id in view.run_query(&plan, &params)? {
                    println!("{id}  {}", view.item_path(id)?);
                }
            }
        }
        Commands::Search { text, limit, kind } => {
            let mut query = SearchQuery::new(text).with_limit(limit);
            if let Some(kind) = kind {
                query = query.with_kind(kind);
            }
            for hit in view.search(&query)? {
                println!("{}  {:<20} {}", hit.item_id, hit.kind, hit.snippet);
            }
        }
    }
    view.close();
    log_shutdown(&repo);
    Ok(())
}

fn resolve(view: &mut RepositoryView, path: Option<&str>) -> RepoResult<Option<ItemId>> {
    let Some(path) = path else {
        return Ok(None);
    };
    match view.find_path(path)? {
        Some(id) => Ok(Some(id)),
        None => Err(RepoError::InvalidData(format!("no item at path `{path}`"))),
    }
}

fn commit(view: &mut RepositoryView, id: ItemId) -> RepoResult<()> {
    let version = view.commit()?;
    println!("{id}  {}  version={version}", view.item_path(id)?);
    Ok(())
}

/// Uuids and integers are typed; anything else binds as a string.
fn parse_param(raw: &str) -> Value {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Value::Uuid(id);
    }
    if let Ok(number) = raw.parse::<i64>() {
        return Value::Integer(number);
    }
    match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::from(raw),
    }
}

fn log_shutdown(repo: &Arc<Repository>) {
    log::debug!(
        "event=cli_exit module=cli status=ok location={}",
        repo.location()
    );
}
