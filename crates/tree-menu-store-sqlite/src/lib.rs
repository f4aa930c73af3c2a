use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tree_menu_core::{HierarchyPath, HierarchyRow, MenuItem, MenuItemId, NewMenuItem};

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS menu_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  parent_id INTEGER REFERENCES menu_items(id) ON DELETE CASCADE,
  name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 50),
  path TEXT NOT NULL DEFAULT '' CHECK (length(path) <= 100),
  position INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0)
);

CREATE INDEX IF NOT EXISTS idx_menu_items_parent ON menu_items(parent_id, position, id);
";

const MIGRATION_002_DUPLICATE_ROOTS_SQL: &str = r"
SELECT name
  FROM menu_items
 WHERE parent_id IS NULL
 GROUP BY name
HAVING COUNT(*) > 1
 ORDER BY name
";

const MIGRATION_002_SQL: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_menu_items_top_level_name
  ON menu_items(name)
  WHERE parent_id IS NULL;
";

// The ORDER BY on the recursive step turns the CTE queue into a priority
// queue: the deepest pending row is always extracted next, so rows come out
// depth-first with siblings by (position, id).
const LOAD_MENU_SQL: &str = r"
WITH RECURSIVE menu_tree(id, parent_id, name, path, position, level, hierarchy) AS (
    SELECT id, parent_id, name, path, position, 0, CAST(id AS TEXT)
      FROM menu_items
     WHERE parent_id IS NULL
       AND name = ?1
    UNION ALL
    SELECT child.id, child.parent_id, child.name, child.path, child.position,
           menu_tree.level + 1,
           menu_tree.hierarchy || '_' || CAST(child.id AS TEXT)
      FROM menu_items AS child
      JOIN menu_tree ON child.parent_id = menu_tree.id
     ORDER BY 6 DESC, 5 ASC, 1 ASC
)
SELECT id, parent_id, name, path, position, level, hierarchy
  FROM menu_tree
";

const SUBTREE_SIZE_SQL: &str = r"
WITH RECURSIVE subtree(id) AS (
    SELECT id FROM menu_items WHERE id = ?1
    UNION ALL
    SELECT child.id
      FROM menu_items AS child
      JOIN subtree ON child.parent_id = subtree.id
)
SELECT COUNT(*) FROM subtree
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed menu store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to create menu_items table")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        tracing::info!(version = 1, "applied schema migration");
        Ok(())
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        let mut duplicates = Vec::new();
        {
            let mut stmt = tx.prepare(MIGRATION_002_DUPLICATE_ROOTS_SQL)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                duplicates.push(row?);
            }
        }
        if !duplicates.is_empty() {
            return Err(anyhow!(
                "cannot apply migration v2: duplicate top level menu names: {}",
                duplicates.join(", ")
            ));
        }

        tx.execute_batch(MIGRATION_002_SQL)
            .context("failed to create top level name uniqueness index")?;
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration v2")?;
        tracing::info!(version = 2, "applied schema migration");
        Ok(())
    }

    /// Persist one validated menu item and return it with its assigned id.
    ///
    /// # Errors
    /// Returns an error when validation fails, the parent does not exist, a
    /// top-level item with the same name exists, or the write fails.
    pub fn insert_item(&mut self, item: &NewMenuItem) -> Result<MenuItem> {
        item.validate().map_err(|err| anyhow!("menu item validation failed: {err}"))?;

        // Immediate: the existence checks below must see the state the insert commits into.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start transaction")?;

        match item.parent_id {
            Some(parent_id) => {
                if !item_exists(&tx, parent_id)? {
                    return Err(anyhow!("parent menu item {parent_id} does not exist"));
                }
            }
            None => {
                if top_level_name_exists(&tx, &item.name)? {
                    return Err(anyhow!(
                        "a top level menu item with the given name already exists: {}",
                        item.name
                    ));
                }
            }
        }

        tx.execute(
            "INSERT INTO menu_items(parent_id, name, path, position) VALUES (?1, ?2, ?3, ?4)",
            params![item.parent_id.map(|id| id.0), item.name, item.path, item.position],
        )
        .context("failed to insert menu item")?;
        let stored = item.clone().into_item(MenuItemId(tx.last_insert_rowid()));
        stored.validate().map_err(|err| anyhow!("stored menu item is invalid: {err}"))?;

        tx.commit().context("failed to commit menu item transaction")?;
        tracing::debug!(id = %stored.id, name = %stored.name, "inserted menu item");
        Ok(stored)
    }

    /// Move an item among its siblings by changing its sort key.
    ///
    /// # Errors
    /// Returns an error when the item does not exist or the update fails.
    pub fn update_position(&mut self, id: MenuItemId, position: u32) -> Result<MenuItem> {
        let changed = self
            .conn
            .execute(
                "UPDATE menu_items SET position = ?1 WHERE id = ?2",
                params![position, id.0],
            )
            .context("failed to update menu item position")?;
        if changed == 0 {
            return Err(anyhow!("menu item {id} does not exist"));
        }

        self.get_item(id)?.ok_or_else(|| anyhow!("menu item {id} vanished after update"))
    }

    /// Delete an item and, through the cascading foreign key, its whole subtree.
    ///
    /// Returns the number of removed rows.
    ///
    /// # Errors
    /// Returns an error when the item does not exist or the delete fails.
    pub fn delete_item(&mut self, id: MenuItemId) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start transaction")?;

        let removed = tx
            .query_row(SUBTREE_SIZE_SQL, params![id.0], |row| row.get::<_, i64>(0))
            .context("failed to count menu item subtree")?;
        if removed == 0 {
            return Err(anyhow!("menu item {id} does not exist"));
        }

        tx.execute("DELETE FROM menu_items WHERE id = ?1", params![id.0])
            .context("failed to delete menu item")?;
        tx.commit().context("failed to commit delete transaction")?;

        let removed = usize::try_from(removed).context("subtree size out of range")?;
        tracing::debug!(%id, removed, "deleted menu item subtree");
        Ok(removed)
    }

    /// Fetch one menu item by id.
    ///
    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_item(&self, id: MenuItemId) -> Result<Option<MenuItem>> {
        self.conn
            .query_row(
                "SELECT id, parent_id, name, path, position FROM menu_items WHERE id = ?1",
                params![id.0],
                item_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load menu item {id}"))
    }

    /// Load every stored menu item, top-level items first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_items(&self) -> Result<Vec<MenuItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, name, path, position
               FROM menu_items
              ORDER BY parent_id IS NOT NULL, parent_id, position, id",
        )?;
        let rows = stmt.query_map([], item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Load the menu rooted at the top-level item `menu_name` in depth-first order.
    ///
    /// An unknown name yields an empty vector.
    ///
    /// # Errors
    /// Returns an error when the recursive query fails or a row cannot be decoded.
    pub fn load_menu(&self, menu_name: &str) -> Result<Vec<HierarchyRow>> {
        let mut stmt = self.conn.prepare(LOAD_MENU_SQL).context("failed to prepare menu query")?;
        let mut rows = stmt.query(params![menu_name])?;

        let mut menu = Vec::new();
        while let Some(row) = rows.next()? {
            let item = item_from_row(row)?;
            let level: u32 = row.get(5)?;
            let hierarchy_raw: String = row.get(6)?;
            let hierarchy = hierarchy_raw
                .parse::<HierarchyPath>()
                .map_err(|err| anyhow!("menu item {} has a malformed hierarchy: {err}", item.id))?;

            let menu_row = HierarchyRow::from_item(&item, level, hierarchy);
            menu_row.check_hierarchy().map_err(|err| anyhow!("menu {menu_name}: {err}"))?;
            menu.push(menu_row);
        }

        tracing::debug!(menu = menu_name, rows = menu.len(), "loaded menu hierarchy");
        Ok(menu)
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MenuItem> {
    Ok(MenuItem {
        id: MenuItemId(row.get(0)?),
        parent_id: row.get::<_, Option<i64>>(1)?.map(MenuItemId),
        name: row.get(2)?,
        path: row.get(3)?,
        position: row.get(4)?,
    })
}

fn item_exists(conn: &Connection, id: MenuItemId) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM menu_items WHERE id = ?1)",
            params![id.0],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if menu item exists: {id}"))?;
    Ok(exists == 1)
}

fn top_level_name_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM menu_items WHERE parent_id IS NULL AND name = ?1)",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check top level menu name: {name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
