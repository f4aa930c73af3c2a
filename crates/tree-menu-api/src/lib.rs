use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tree_menu_core::{
    annotate, assemble, normalize_links, validate_path, CurrentPage, HierarchyRow, MenuItem,
    MenuItemId, NewMenuItem, RouteResolver, RouteTable, TreeNode,
};
use tree_menu_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};

mod html;

pub use html::render_html;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveItemResult {
    pub id: MenuItemId,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderRequest {
    pub menu_name: String,
    #[serde(default)]
    pub current_path: Option<String>,
    #[serde(default)]
    pub current_route: Option<String>,
}

impl RenderRequest {
    #[must_use]
    pub fn new(menu_name: &str) -> Self {
        Self { menu_name: menu_name.to_string(), ..Self::default() }
    }

    /// The page being rendered; without an explicit route name, the route
    /// serving the current path is looked up.
    fn current_page<R: RouteResolver + ?Sized>(&self, resolver: &R) -> CurrentPage {
        let path = self.current_path.as_deref().unwrap_or_default();
        let route_name = match self.current_route.as_deref() {
            Some(route_name) => Some(route_name.to_string()),
            None if path.is_empty() => None,
            None => resolver.resolve(path),
        };
        CurrentPage::new(path, route_name.as_deref())
    }
}

/// An annotated menu tree ready for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuTree {
    pub menu_name: String,
    pub snapshot_id: String,
    pub current_item: Option<MenuItemId>,
    pub downgraded_links: Vec<MenuItemId>,
    pub root: Option<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMenu {
    #[serde(flatten)]
    pub tree: MenuTree,
    pub html: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RoutesConfig {
    #[serde(default)]
    routes: RouteTable,
}

/// Load the route table from a YAML file of the form `routes: {name: path}`.
///
/// Without a file the table is empty.
///
/// # Errors
/// Returns an error when the file cannot be read or is not valid YAML.
pub fn load_routes(path: Option<&Path>) -> Result<RouteTable> {
    let Some(path) = path else {
        return Ok(RouteTable::new());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read routes file {}", path.display()))?;
    let config: RoutesConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse routes file {}", path.display()))?;
    tracing::debug!(path = %path.display(), routes = config.routes.len(), "loaded route table");
    Ok(config.routes)
}

#[derive(Debug, Clone)]
pub struct TreeMenuApi {
    db_path: PathBuf,
    routes: RouteTable,
}

impl TreeMenuApi {
    #[must_use]
    pub fn new(db_path: PathBuf, routes: RouteTable) -> Self {
        Self { db_path, routes }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run the store health checks.
    ///
    /// # Errors
    /// Returns an error when any health check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Add one menu item after checking its path against the route table.
    ///
    /// # Errors
    /// Returns an error when the path does not resolve, validation fails, or
    /// persistence fails.
    pub fn add_item(&self, input: NewMenuItem) -> Result<MenuItem> {
        validate_path(&input.path, &self.routes).map_err(|err| anyhow!("{err}"))?;

        let mut store = self.open_store()?;
        store.migrate()?;
        store.insert_item(&input)
    }

    /// Change the sibling position of one item.
    ///
    /// # Errors
    /// Returns an error when the item does not exist or persistence fails.
    pub fn move_item(&self, id: MenuItemId, position: u32) -> Result<MenuItem> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.update_position(id, position)
    }

    /// Remove an item together with its descendants.
    ///
    /// # Errors
    /// Returns an error when the item does not exist or persistence fails.
    pub fn remove_item(&self, id: MenuItemId) -> Result<RemoveItemResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let removed = store.delete_item(id)?;
        Ok(RemoveItemResult { id, removed })
    }

    /// List every stored menu item.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_items(&self) -> Result<Vec<MenuItem>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_items()
    }

    /// Load the raw depth-first rows of one menu.
    ///
    /// # Errors
    /// Returns an error when the menu query fails.
    pub fn load_menu(&self, menu_name: &str) -> Result<Vec<HierarchyRow>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.load_menu(menu_name)
    }

    /// Load, annotate, normalize, and assemble one menu for the given page.
    ///
    /// # Errors
    /// Returns an error when loading fails or the loaded rows do not form a
    /// single connected tree.
    pub fn menu_tree(&self, request: &RenderRequest) -> Result<MenuTree> {
        let mut rows = self.load_menu(&request.menu_name)?;
        let snapshot_id = compute_snapshot_id(&request.menu_name, &rows, &self.routes);

        let current_item = annotate(&mut rows, &request.current_page(&self.routes));
        let downgraded_links = normalize_links(&mut rows, &self.routes);
        for id in &downgraded_links {
            tracing::debug!(
                menu = %request.menu_name,
                %id,
                "menu link does not resolve; rendering label"
            );
        }

        let root = assemble(&rows)
            .map_err(|err| anyhow!("menu {} cannot be assembled: {err}", request.menu_name))?;

        Ok(MenuTree {
            menu_name: request.menu_name.clone(),
            snapshot_id,
            current_item,
            downgraded_links,
            root,
        })
    }

    /// Build the menu tree and its HTML fragment.
    ///
    /// # Errors
    /// Returns an error under the same conditions as [`TreeMenuApi::menu_tree`].
    pub fn render_menu(&self, request: &RenderRequest) -> Result<RenderedMenu> {
        let tree = self.menu_tree(request)?;
        let html = render_html(tree.root.as_ref());
        tracing::info!(
            menu = %tree.menu_name,
            current_item = ?tree.current_item,
            nodes = tree.root.as_ref().map_or(0, TreeNode::node_count),
            "rendered menu"
        );
        Ok(RenderedMenu { tree, html })
    }
}

fn compute_snapshot_id(menu_name: &str, rows: &[HierarchyRow], routes: &RouteTable) -> String {
    let mut hasher = Sha256::new();
    hasher.update(menu_name.as_bytes());
    for row in rows {
        hasher.update(
            format!(
                "\n{}|{}|{}|{}",
                row.hierarchy,
                row.position,
                row.name,
                row.path.as_deref().unwrap_or_default()
            )
            .as_bytes(),
        );
    }
    for (name, path) in routes.iter() {
        hasher.update(format!("\nroute {name}={path}").as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("menu_{}", &digest_hex[..16])
}
