use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tree_menu_api::{load_routes, RenderRequest, TreeMenuApi};
use tree_menu_core::{MenuItemId, NewMenuItem};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "tmenu")]
#[command(about = "Tree menu CLI")]
struct Cli {
    #[arg(long, default_value = "./tree_menu.sqlite3")]
    db: PathBuf,

    /// YAML file mapping route names to URL paths.
    #[arg(long)]
    routes: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Item {
        #[command(subcommand)]
        command: Box<ItemCommand>,
    },
    Menu {
        #[command(subcommand)]
        command: Box<MenuCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    Add(ItemAddArgs),
    List,
    Move(ItemMoveArgs),
    Remove(ItemRemoveArgs),
}

#[derive(Debug, Args)]
struct ItemAddArgs {
    #[arg(long)]
    name: String,
    /// Absolute URL path, route name, or empty for a label.
    #[arg(long, default_value = "")]
    path: String,
    #[arg(long, default_value_t = 0)]
    position: u32,
    #[arg(long)]
    parent_id: Option<MenuItemId>,
}

#[derive(Debug, Args)]
struct ItemMoveArgs {
    #[arg(long)]
    id: MenuItemId,
    #[arg(long)]
    position: u32,
}

#[derive(Debug, Args)]
struct ItemRemoveArgs {
    #[arg(long)]
    id: MenuItemId,
}

#[derive(Debug, Subcommand)]
enum MenuCommand {
    Rows(MenuRowsArgs),
    Tree(MenuPageArgs),
    Render(MenuRenderArgs),
}

#[derive(Debug, Args)]
struct MenuRowsArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct MenuPageArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    current_path: Option<String>,
    #[arg(long)]
    current_route: Option<String>,
}

#[derive(Debug, Args)]
struct MenuRenderArgs {
    #[command(flatten)]
    page: MenuPageArgs,
    #[arg(long, value_enum, default_value_t = RenderFormat::Json)]
    format: RenderFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RenderFormat {
    Json,
    Html,
}

impl MenuPageArgs {
    fn request(&self) -> RenderRequest {
        RenderRequest {
            menu_name: self.name.clone(),
            current_path: self.current_path.clone(),
            current_route: self.current_route.clone(),
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let routes = load_routes(cli.routes.as_deref())?;
    let api = TreeMenuApi::new(cli.db, routes);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Item { command } => run_item(*command, &api),
        Command::Menu { command } => run_menu(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &TreeMenuApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(serde_json::json!({
                "ok": report.quick_check_ok && report.foreign_key_violations.is_empty(),
                "report": report
            }))
        }
    }
}

fn run_item(command: ItemCommand, api: &TreeMenuApi) -> Result<()> {
    match command {
        ItemCommand::Add(args) => {
            let item = api.add_item(NewMenuItem {
                parent_id: args.parent_id,
                name: args.name,
                path: args.path,
                position: args.position,
            })?;
            emit_json(serde_json::to_value(item)?)
        }
        ItemCommand::List => {
            let items = api.list_items()?;
            emit_json(serde_json::json!({ "items": items }))
        }
        ItemCommand::Move(args) => {
            emit_json(serde_json::to_value(api.move_item(args.id, args.position)?)?)
        }
        ItemCommand::Remove(args) => emit_json(serde_json::to_value(api.remove_item(args.id)?)?),
    }
}

fn run_menu(command: MenuCommand, api: &TreeMenuApi) -> Result<()> {
    match command {
        MenuCommand::Rows(args) => {
            let rows = api.load_menu(&args.name)?;
            emit_json(serde_json::json!({ "menu_name": args.name, "rows": rows }))
        }
        MenuCommand::Tree(args) => {
            emit_json(serde_json::to_value(api.menu_tree(&args.request())?)?)
        }
        MenuCommand::Render(args) => {
            let rendered = api.render_menu(&args.page.request())?;
            match args.format {
                RenderFormat::Json => emit_json(serde_json::to_value(rendered)?),
                RenderFormat::Html => {
                    print!("{}", rendered.html);
                    Ok(())
                }
            }
        }
    }
}
