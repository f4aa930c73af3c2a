use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const NAME_MAX_LEN: usize = 50;
pub const PATH_MAX_LEN: usize = 100;
pub const HIERARCHY_SEPARATOR: char = '_';

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MenuError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("integrity error: {0}")]
    Integrity(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct MenuItemId(pub i64);

impl Display for MenuItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MenuItemId {
    type Err = MenuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|err| MenuError::Validation(format!("invalid menu item id `{value}`: {err}")))
    }
}

/// How a stored `path` value is interpreted when a menu is rendered.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PathKind<'a> {
    Empty,
    Absolute(&'a str),
    RouteName(&'a str),
}

impl<'a> PathKind<'a> {
    #[must_use]
    pub fn classify(path: &'a str) -> Self {
        if path.is_empty() {
            Self::Empty
        } else if path.starts_with('/') {
            Self::Absolute(path)
        } else {
            Self::RouteName(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub parent_id: Option<MenuItemId>,
    pub name: String,
    pub path: String,
    pub position: u32,
}

impl MenuItem {
    /// Validate one stored menu item against field-level invariants.
    ///
    /// # Errors
    /// Returns [`MenuError::Validation`] when the name or path is malformed, or
    /// when the item names itself as its own parent.
    pub fn validate(&self) -> Result<(), MenuError> {
        validate_item_fields(&self.name, &self.path)?;

        if self.parent_id == Some(self.id) {
            return Err(MenuError::Validation(format!(
                "menu item {} MUST NOT be its own parent",
                self.id
            )));
        }

        Ok(())
    }
}

/// A menu item that has not been written yet; storage assigns its id.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewMenuItem {
    pub parent_id: Option<MenuItemId>,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub position: u32,
}

impl NewMenuItem {
    /// # Errors
    /// Returns [`MenuError::Validation`] when the name or path is malformed.
    pub fn validate(&self) -> Result<(), MenuError> {
        validate_item_fields(&self.name, &self.path)
    }

    #[must_use]
    pub fn into_item(self, id: MenuItemId) -> MenuItem {
        MenuItem {
            id,
            parent_id: self.parent_id,
            name: self.name,
            path: self.path,
            position: self.position,
        }
    }
}

/// Check the `name` and `path` columns of a menu item before it is written.
///
/// # Errors
/// Returns [`MenuError::Validation`] when the name is blank or too long, or the
/// path is too long or contains whitespace.
pub fn validate_item_fields(name: &str, path: &str) -> Result<(), MenuError> {
    if name.trim().is_empty() {
        return Err(MenuError::Validation("name MUST be provided".to_string()));
    }

    if name.chars().count() > NAME_MAX_LEN {
        return Err(MenuError::Validation(format!(
            "name MUST be at most {NAME_MAX_LEN} characters"
        )));
    }

    if path.chars().count() > PATH_MAX_LEN {
        return Err(MenuError::Validation(format!(
            "path MUST be at most {PATH_MAX_LEN} characters"
        )));
    }

    if path.chars().any(char::is_whitespace) {
        return Err(MenuError::Validation("path MUST NOT contain whitespace".to_string()));
    }

    Ok(())
}

/// Bidirectional lookup between concrete URL paths and named routes.
pub trait RouteResolver {
    /// Route name serving `path`, if any.
    fn resolve(&self, path: &str) -> Option<String>;

    /// Concrete URL path for `route_name`, if the route exists.
    fn reverse(&self, route_name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_route(mut self, name: &str, path: &str) -> Self {
        self.insert(name, path);
        self
    }

    pub fn insert(&mut self, name: &str, path: &str) {
        self.routes.insert(name.to_string(), path.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(name, path)| (name.as_str(), path.as_str()))
    }
}

impl FromIterator<(String, String)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { routes: iter.into_iter().collect() }
    }
}

impl RouteResolver for RouteTable {
    fn resolve(&self, path: &str) -> Option<String> {
        self.routes
            .iter()
            .find(|(_, route_path)| route_path.as_str() == path)
            .map(|(name, _)| name.clone())
    }

    fn reverse(&self, route_name: &str) -> Option<String> {
        self.routes.get(route_name).cloned()
    }
}

/// Check that a stored path value points at an existing route.
///
/// # Errors
/// Returns [`MenuError::Validation`] when an absolute path does not resolve, or
/// a route name cannot be reversed.
pub fn validate_path<R: RouteResolver + ?Sized>(path: &str, resolver: &R) -> Result<(), MenuError> {
    match PathKind::classify(path) {
        PathKind::Empty => Ok(()),
        PathKind::Absolute(value) => resolver
            .resolve(value)
            .map(|_| ())
            .ok_or_else(|| {
                MenuError::Validation(format!("the given path does not exist: {value}"))
            }),
        PathKind::RouteName(name) => resolver.reverse(name).map(|_| ()).ok_or_else(|| {
            MenuError::Validation(format!("a path with the given name does not exist: {name}"))
        }),
    }
}

/// Turn a stored path into the URL written into the menu, or `None` for a label.
#[must_use]
pub fn normalize_path<R: RouteResolver + ?Sized>(path: &str, resolver: &R) -> Option<String> {
    match PathKind::classify(path) {
        PathKind::Empty => None,
        PathKind::Absolute(value) => resolver.resolve(value).map(|_| value.to_string()),
        PathKind::RouteName(name) => resolver.reverse(name),
    }
}

/// Ancestor chain of a row, root first and the row itself last.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct HierarchyPath(Vec<MenuItemId>);

impl HierarchyPath {
    #[must_use]
    pub fn root(id: MenuItemId) -> Self {
        Self(vec![id])
    }

    #[must_use]
    pub fn child(&self, id: MenuItemId) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0);
        ids.push(id);
        Self(ids)
    }

    #[must_use]
    pub fn ids(&self) -> &[MenuItemId] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, id: MenuItemId) -> bool {
        self.0.contains(&id)
    }

    #[must_use]
    pub fn leaf(&self) -> Option<MenuItemId> {
        self.0.last().copied()
    }

    #[must_use]
    pub fn parent(&self) -> Option<MenuItemId> {
        self.0.len().checked_sub(2).and_then(|index| self.0.get(index).copied())
    }
}

impl Display for HierarchyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, id) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "{HIERARCHY_SEPARATOR}")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for HierarchyPath {
    type Err = MenuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(MenuError::Validation("hierarchy MUST NOT be empty".to_string()));
        }

        value
            .split(HIERARCHY_SEPARATOR)
            .map(|segment| {
                segment.parse::<i64>().map(MenuItemId).map_err(|_| {
                    MenuError::Validation(format!(
                        "invalid hierarchy segment `{segment}` in `{value}`"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Serialize for HierarchyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HierarchyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One item of a loaded menu, in depth-first order, with render state.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HierarchyRow {
    pub id: MenuItemId,
    pub parent_id: Option<MenuItemId>,
    pub name: String,
    pub path: Option<String>,
    pub position: u32,
    pub level: u32,
    pub hierarchy: HierarchyPath,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub open: bool,
}

impl HierarchyRow {
    #[must_use]
    pub fn from_item(item: &MenuItem, level: u32, hierarchy: HierarchyPath) -> Self {
        Self {
            id: item.id,
            parent_id: item.parent_id,
            name: item.name.clone(),
            path: (!item.path.is_empty()).then(|| item.path.clone()),
            position: item.position,
            level,
            hierarchy,
            current: false,
            open: false,
        }
    }

    #[must_use]
    pub fn is_child_of(&self, id: MenuItemId) -> bool {
        self.parent_id == Some(id)
    }

    /// Check that the hierarchy ends in this row and passes through its parent.
    ///
    /// # Errors
    /// Returns [`MenuError::Integrity`] when the chain disagrees with `id`,
    /// `parent_id`, or `level`.
    pub fn check_hierarchy(&self) -> Result<(), MenuError> {
        let depth = usize::try_from(self.level).map_or(usize::MAX, |level| level + 1);
        if self.hierarchy.leaf() != Some(self.id)
            || self.hierarchy.parent() != self.parent_id
            || self.hierarchy.ids().len() != depth
        {
            return Err(MenuError::Integrity(format!(
                "menu item {} at level {} has an inconsistent hierarchy {}",
                self.id, self.level, self.hierarchy
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TreeNode {
    pub id: MenuItemId,
    pub parent_id: Option<MenuItemId>,
    pub name: String,
    pub path: Option<String>,
    pub position: u32,
    pub level: u32,
    pub current: bool,
    pub open: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn from_row(row: &HierarchyRow) -> Self {
        Self {
            id: row.id,
            parent_id: row.parent_id,
            name: row.name.clone(),
            path: row.path.clone(),
            position: row.position,
            level: row.level,
            current: row.current,
            open: row.open,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Nodes of this subtree in depth-first pre-order.
    #[must_use]
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.walk().len()
    }

    #[must_use]
    pub fn find(&self, id: MenuItemId) -> Option<&TreeNode> {
        self.walk().into_iter().find(|node| node.id == id)
    }
}

/// The page a menu is being rendered for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CurrentPage {
    pub path: String,
    pub route_name: Option<String>,
}

impl CurrentPage {
    #[must_use]
    pub fn new(path: &str, route_name: Option<&str>) -> Self {
        Self { path: path.to_string(), route_name: route_name.map(str::to_string) }
    }

    #[must_use]
    pub fn matches(&self, stored_path: &str) -> bool {
        stored_path == self.path || self.route_name.as_deref() == Some(stored_path)
    }
}

/// Expand the menu rooted at the top-level item `menu_name` without a
/// recursive query.
///
/// Produces the same order and hierarchy encoding as the SQL loader: depth-first
/// pre-order, siblings by `(position, id)`. Returns an empty vector when no
/// top-level item carries that name.
#[must_use]
pub fn expand_hierarchy(items: &[MenuItem], menu_name: &str) -> Vec<HierarchyRow> {
    let Some(root) = items
        .iter()
        .filter(|item| item.parent_id.is_none() && item.name == menu_name)
        .min_by_key(|item| (item.position, item.id))
    else {
        return Vec::new();
    };

    let mut children: BTreeMap<MenuItemId, Vec<&MenuItem>> = BTreeMap::new();
    for item in items {
        if let Some(parent_id) = item.parent_id {
            children.entry(parent_id).or_default().push(item);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|item| (item.position, item.id));
    }

    let mut rows = Vec::new();
    let mut stack = vec![HierarchyRow::from_item(root, 0, HierarchyPath::root(root.id))];
    while let Some(row) = stack.pop() {
        if let Some(siblings) = children.get(&row.id) {
            for child in siblings.iter().rev() {
                stack.push(HierarchyRow::from_item(
                    child,
                    row.level + 1,
                    row.hierarchy.child(child.id),
                ));
            }
        }
        rows.push(row);
    }
    rows
}

/// Rebuild the menu tree from depth-first ordered rows.
///
/// The first row becomes the root. Every other row must be reachable from it
/// in order; a row whose parent is not an open ancestor at that point is an
/// orphan.
///
/// # Errors
/// Returns [`MenuError::Integrity`] when rows remain after the root's subtree is
/// closed.
pub fn assemble(rows: &[HierarchyRow]) -> Result<Option<TreeNode>, MenuError> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let mut root = TreeNode::from_row(first);
    let mut cursor = 1;
    if rows.get(cursor).is_some_and(|next| next.is_child_of(root.id)) {
        attach_children(rows, &mut cursor, &mut root);
    }

    if let Some(orphan) = rows.get(cursor) {
        let parent = orphan.parent_id.map_or_else(|| "none".to_string(), |id| id.to_string());
        return Err(MenuError::Integrity(format!(
            "menu item {} (parent {parent}) is not reachable from root {} at position {cursor}",
            orphan.id, root.id
        )));
    }

    Ok(Some(root))
}

fn attach_children(rows: &[HierarchyRow], cursor: &mut usize, parent: &mut TreeNode) {
    while let Some(row) = rows.get(*cursor) {
        *cursor += 1;
        let mut node = TreeNode::from_row(row);

        if rows.get(*cursor).is_some_and(|next| next.is_child_of(node.id)) {
            attach_children(rows, cursor, &mut node);
        }
        parent.children.push(node);

        match rows.get(*cursor) {
            Some(next) if next.is_child_of(parent.id) => {}
            _ => return,
        }
    }
}

/// Mark the row for the current page and open its ancestor chain.
///
/// Returns the id of the current row, or `None` when no row matches the page;
/// in that case the rows are left untouched.
pub fn annotate(rows: &mut [HierarchyRow], page: &CurrentPage) -> Option<MenuItemId> {
    let current_index =
        rows.iter().position(|row| row.path.as_deref().is_some_and(|path| page.matches(path)))?;
    let current = rows.get(current_index)?;
    let current_id = current.id;
    let opened = current.hierarchy.clone();

    for (index, row) in rows.iter_mut().enumerate() {
        row.current = index == current_index;
        row.open = opened.contains(row.id);
    }

    Some(current_id)
}

/// Rewrite every stored path into a URL, downgrading unknown targets to labels.
///
/// Returns the ids of rows whose configured path could not be resolved.
pub fn normalize_links<R: RouteResolver + ?Sized>(
    rows: &mut [HierarchyRow],
    resolver: &R,
) -> Vec<MenuItemId> {
    let mut downgraded = Vec::new();
    for row in rows.iter_mut() {
        let Some(path) = row.path.take() else {
            continue;
        };
        row.path = normalize_path(&path, resolver);
        if row.path.is_none() {
            downgraded.push(row.id);
        }
    }
    downgraded
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn item(id: i64, parent_id: Option<i64>, name: &str, path: &str, position: u32) -> MenuItem {
        MenuItem {
            id: MenuItemId(id),
            parent_id: parent_id.map(MenuItemId),
            name: name.to_string(),
            path: path.to_string(),
            position,
        }
    }

    fn home_fixture() -> Vec<MenuItem> {
        vec![
            item(1, None, "Home", "", 0),
            item(3, Some(1), "Contact", "/contact/", 1),
            item(2, Some(1), "About", "about", 0),
        ]
    }

    fn ids(rows: &[HierarchyRow]) -> Vec<i64> {
        rows.iter().map(|row| row.id.0).collect()
    }

    fn child_ids(node: &TreeNode) -> Vec<i64> {
        node.children.iter().map(|child| child.id.0).collect()
    }

    fn assembled(rows: &[HierarchyRow]) -> TreeNode {
        match assemble(rows) {
            Ok(Some(root)) => root,
            Ok(None) => panic!("expected a root for {} rows", rows.len()),
            Err(err) => panic!("assembly should succeed: {err}"),
        }
    }

    #[test]
    fn expand_orders_children_by_position_with_levels() {
        let rows = expand_hierarchy(&home_fixture(), "Home");

        assert_eq!(ids(&rows), vec![1, 2, 3]);
        assert_eq!(rows.iter().map(|row| row.level).collect::<Vec<_>>(), vec![0, 1, 1]);
        assert_eq!(rows[2].hierarchy.to_string(), "1_3");
    }

    #[test]
    fn expand_returns_empty_for_unknown_menu() {
        assert!(expand_hierarchy(&home_fixture(), "Footer").is_empty());
        assert!(expand_hierarchy(&home_fixture(), "About").is_empty());
    }

    #[test]
    fn expand_is_depth_first_across_levels() {
        let items = vec![
            item(1, None, "main", "", 0),
            item(2, Some(1), "a", "", 0),
            item(3, Some(1), "b", "", 1),
            item(4, Some(2), "a1", "", 1),
            item(5, Some(2), "a0", "", 0),
            item(6, Some(5), "a0x", "", 0),
            item(7, Some(3), "b0", "", 0),
            item(8, None, "other", "", 0),
            item(9, Some(8), "other-child", "", 0),
        ];

        let rows = expand_hierarchy(&items, "main");
        assert_eq!(ids(&rows), vec![1, 2, 5, 6, 4, 3, 7]);
        assert_eq!(rows[3].hierarchy.to_string(), "1_2_5_6");
        assert_eq!(rows[3].level, 3);
    }

    #[test]
    fn sibling_ties_fall_back_to_id() {
        let items = vec![
            item(1, None, "main", "", 0),
            item(7, Some(1), "late", "", 0),
            item(4, Some(1), "early", "", 0),
        ];

        assert_eq!(ids(&expand_hierarchy(&items, "main")), vec![1, 4, 7]);
    }

    #[test]
    fn assemble_rebuilds_home_menu() {
        let rows = expand_hierarchy(&home_fixture(), "Home");
        let root = assembled(&rows);

        assert_eq!(root.id, MenuItemId(1));
        assert_eq!(child_ids(&root), vec![2, 3]);
        assert!(root.children.iter().all(TreeNode::is_leaf));
        assert_eq!(root.node_count(), 3);
    }

    #[test]
    fn assemble_empty_rows_yields_no_root() {
        assert_eq!(assemble(&[]), Ok(None));
    }

    #[test]
    fn assemble_single_root_is_a_leaf() {
        let rows = expand_hierarchy(&[item(1, None, "solo", "", 0)], "solo");
        let root = assembled(&rows);
        assert!(root.is_leaf());
    }

    #[test]
    fn assemble_climbs_several_levels_at_once() {
        let items = vec![
            item(1, None, "main", "", 0),
            item(2, Some(1), "a", "", 0),
            item(3, Some(2), "a0", "", 0),
            item(4, Some(3), "a00", "", 0),
            item(5, Some(1), "b", "", 1),
        ];
        let root = assembled(&expand_hierarchy(&items, "main"));

        assert_eq!(child_ids(&root), vec![2, 5]);
        let a = root.find(MenuItemId(2)).unwrap_or_else(|| panic!("node 2 missing"));
        assert_eq!(child_ids(a), vec![3]);
        let a0 = root.find(MenuItemId(3)).unwrap_or_else(|| panic!("node 3 missing"));
        assert_eq!(child_ids(a0), vec![4]);
    }

    #[test]
    fn assemble_rejects_orphaned_rows() {
        let mut rows = expand_hierarchy(&home_fixture(), "Home");
        let stray = item(42, Some(99), "Stray", "", 0);
        let stray_hierarchy = HierarchyPath::root(MenuItemId(99)).child(stray.id);
        rows.push(HierarchyRow::from_item(&stray, 1, stray_hierarchy));

        let err = match assemble(&rows) {
            Err(err) => err,
            Ok(root) => panic!("expected integrity error, got {root:?}"),
        };
        assert!(matches!(err, MenuError::Integrity(_)));
        assert!(err.to_string().contains("menu item 42"));
    }

    #[test]
    fn assemble_rejects_rows_after_a_closed_subtree() {
        let items = vec![
            item(1, None, "main", "", 0),
            item(2, Some(1), "a", "", 0),
            item(3, Some(1), "b", "", 1),
            item(4, Some(2), "a0", "", 0),
        ];
        let mut rows = expand_hierarchy(&items, "main");
        // Move a0 behind its uncle b, which closes a before a0 is seen.
        let a0 = rows.remove(2);
        rows.push(a0);

        assert!(matches!(assemble(&rows), Err(MenuError::Integrity(_))));
    }

    #[test]
    fn annotate_marks_current_and_opens_ancestors() {
        let mut rows = expand_hierarchy(&home_fixture(), "Home");
        let current = annotate(&mut rows, &CurrentPage::new("/contact/", None));

        assert_eq!(current, Some(MenuItemId(3)));
        let flags = rows.iter().map(|row| (row.id.0, row.current, row.open)).collect::<Vec<_>>();
        assert_eq!(flags, vec![(1, false, true), (2, false, false), (3, true, true)]);

        let root = assembled(&rows);
        assert!(root.open);
        assert!(root.children[1].current && root.children[1].open);
        assert!(!root.children[0].current && !root.children[0].open);
    }

    #[test]
    fn annotate_matches_route_name() {
        let mut rows = expand_hierarchy(&home_fixture(), "Home");
        let current = annotate(&mut rows, &CurrentPage::new("/about-us/", Some("about")));
        assert_eq!(current, Some(MenuItemId(2)));
    }

    #[test]
    fn annotate_without_match_leaves_rows_closed() {
        let mut rows = expand_hierarchy(&home_fixture(), "Home");
        assert_eq!(annotate(&mut rows, &CurrentPage::new("/missing/", None)), None);
        assert!(rows.iter().all(|row| !row.current && !row.open));
    }

    #[test]
    fn annotate_ignores_empty_paths() {
        let mut rows = expand_hierarchy(&home_fixture(), "Home");
        assert_eq!(annotate(&mut rows, &CurrentPage::new("", None)), None);
    }

    #[test]
    fn normalize_links_rewrites_route_names_and_drops_unknown() {
        let routes = RouteTable::new().with_route("about", "/about/");
        let mut rows = expand_hierarchy(&home_fixture(), "Home");

        let downgraded = normalize_links(&mut rows, &routes);

        assert_eq!(downgraded, vec![MenuItemId(3)]);
        assert_eq!(rows[0].path, None);
        assert_eq!(rows[1].path.as_deref(), Some("/about/"));
        assert_eq!(rows[2].path, None);
    }

    #[test]
    fn validate_path_reports_missing_targets() {
        let routes = RouteTable::new().with_route("home", "/");

        assert_eq!(validate_path("", &routes), Ok(()));
        assert_eq!(validate_path("/", &routes), Ok(()));
        assert_eq!(validate_path("home", &routes), Ok(()));
        assert!(validate_path("/nowhere/", &routes)
            .is_err_and(|err| err.to_string().contains("the given path does not exist")));
        assert!(validate_path("nowhere", &routes)
            .is_err_and(|err| err.to_string().contains("a path with the given name")));
    }

    #[test]
    fn validate_rejects_blank_and_oversized_fields() {
        let mut record = item(1, None, " ", "", 0);
        assert!(record.validate().is_err_and(|err| err.to_string().contains("name MUST")));

        record.name = "x".repeat(NAME_MAX_LEN + 1);
        assert!(record.validate().is_err());

        record.name = "Docs".to_string();
        record.path = format!("/{}", "p".repeat(PATH_MAX_LEN));
        assert!(record.validate().is_err_and(|err| err.to_string().contains("path MUST")));

        record.path = "/a b/".to_string();
        assert!(record.validate().is_err());

        record.path = "/docs/".to_string();
        record.parent_id = Some(record.id);
        assert!(record.validate().is_err_and(|err| err.to_string().contains("own parent")));
    }

    #[test]
    fn hierarchy_path_parses_and_displays() {
        let parsed = "1_12_7".parse::<HierarchyPath>();
        assert_eq!(
            parsed,
            Ok(HierarchyPath(vec![MenuItemId(1), MenuItemId(12), MenuItemId(7)]))
        );
        let parsed = parsed.unwrap_or_default();
        assert_eq!(parsed.to_string(), "1_12_7");
        assert_eq!(parsed.leaf(), Some(MenuItemId(7)));
        assert_eq!(parsed.parent(), Some(MenuItemId(12)));
        assert_eq!(HierarchyPath::root(MenuItemId(1)).parent(), None);

        assert!("".parse::<HierarchyPath>().is_err());
        assert!("1__2".parse::<HierarchyPath>().is_err());
        assert!("1_x".parse::<HierarchyPath>().is_err());
    }

    #[test]
    fn check_hierarchy_rejects_chains_that_disagree_with_the_row() {
        let rows = expand_hierarchy(&home_fixture(), "Home");
        assert!(rows.iter().all(|row| row.check_hierarchy().is_ok()));

        let mut wrong_leaf = rows[2].clone();
        wrong_leaf.hierarchy = HierarchyPath::root(MenuItemId(1)).child(MenuItemId(2));
        assert!(matches!(wrong_leaf.check_hierarchy(), Err(MenuError::Integrity(_))));

        let mut wrong_parent = rows[2].clone();
        wrong_parent.parent_id = Some(MenuItemId(2));
        assert!(matches!(wrong_parent.check_hierarchy(), Err(MenuError::Integrity(_))));

        let mut wrong_level = rows[2].clone();
        wrong_level.level = 2;
        assert!(wrong_level
            .check_hierarchy()
            .is_err_and(|err| err.to_string().contains("inconsistent hierarchy 1_3")));
    }

    #[test]
    fn hierarchy_row_serializes_hierarchy_as_string() {
        let rows = expand_hierarchy(&home_fixture(), "Home");
        let value = serde_json::to_value(&rows[1]).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(value.get("hierarchy").and_then(serde_json::Value::as_str), Some("1_2"));

        let back: HierarchyRow =
            serde_json::from_value(value).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(back, rows[1]);
    }

    #[test]
    fn route_table_resolves_both_directions() {
        let routes = [
            ("home".to_string(), "/".to_string()),
            ("docs".to_string(), "/docs/".to_string()),
        ]
            .into_iter()
            .collect::<RouteTable>();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes.resolve("/docs/").as_deref(), Some("docs"));
        assert_eq!(routes.reverse("home").as_deref(), Some("/"));
        assert_eq!(routes.resolve("/docs"), None);
    }

    /// Random forest: item `i + 1` hangs off an earlier item, or is an extra
    /// top-level menu when `detach` is set. Item 1 is always the `main` root.
    fn arb_items() -> impl Strategy<Value = Vec<MenuItem>> {
        prop::collection::vec((any::<u16>(), 0_u32..4, prop::bool::weighted(0.1)), 1..48)
            .prop_map(|specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(index, (choice, position, detach))| {
                        let id = i64::try_from(index).unwrap_or(i64::MAX) + 1;
                        if index == 0 {
                            return item(id, None, "main", "", position);
                        }
                        if detach {
                            return item(id, None, &format!("extra-{id}"), "", position);
                        }
                        let parent = i64::from(choice) % (id - 1) + 1;
                        let path = format!("/p/{id}/");
                        item(id, Some(parent), &format!("item-{id}"), &path, position)
                    })
                    .collect()
            })
    }

    fn reference_order(items: &[MenuItem], id: MenuItemId, out: &mut Vec<MenuItemId>) {
        out.push(id);
        let mut children =
            items.iter().filter(|item| item.parent_id == Some(id)).collect::<Vec<_>>();
        children.sort_by_key(|item| (item.position, item.id));
        for child in children {
            reference_order(items, child.id, out);
        }
    }

    proptest! {
        #[test]
        fn property_assembled_tree_mirrors_rows(items in arb_items()) {
            let rows = expand_hierarchy(&items, "main");
            let root = assemble(&rows);
            prop_assert!(root.is_ok());
            let root = root.unwrap_or_else(|_| unreachable!());
            prop_assert!(root.is_some());
            let root = root.unwrap_or_else(|| unreachable!());

            prop_assert_eq!(root.node_count(), rows.len());
            let walked = root.walk().into_iter().map(|node| node.id).collect::<Vec<_>>();
            prop_assert_eq!(walked, rows.iter().map(|row| row.id).collect::<Vec<_>>());
            for node in root.walk() {
                for child in &node.children {
                    prop_assert_eq!(child.parent_id, Some(node.id));
                    prop_assert_eq!(child.level, node.level + 1);
                }
            }
        }

        #[test]
        fn property_expansion_is_depth_first_by_position(items in arb_items()) {
            let rows = expand_hierarchy(&items, "main");
            let mut expected = Vec::new();
            reference_order(&items, MenuItemId(1), &mut expected);

            prop_assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), expected);
            for row in &rows {
                prop_assert_eq!(row.hierarchy.leaf(), Some(row.id));
                prop_assert_eq!(row.hierarchy.parent(), row.parent_id);
                prop_assert_eq!(row.hierarchy.ids().len(), usize::try_from(row.level).unwrap_or(usize::MAX) + 1);
            }
        }

        #[test]
        fn property_open_set_is_the_current_ancestry(items in arb_items(), pick in any::<prop::sample::Index>()) {
            let mut rows = expand_hierarchy(&items, "main");
            let target = pick.get(&rows).clone();
            let Some(path) = target.path.clone() else {
                return Ok(());
            };

            let current = annotate(&mut rows, &CurrentPage::new(&path, None));
            prop_assert_eq!(current, Some(target.id));

            let by_id = items.iter().map(|item| (item.id, item)).collect::<BTreeMap<_, _>>();
            let mut ancestry = BTreeSet::from([target.id]);
            let mut cursor = target.parent_id;
            while let Some(id) = cursor {
                ancestry.insert(id);
                cursor = by_id.get(&id).and_then(|item| item.parent_id);
            }

            let opened = rows.iter().filter(|row| row.open).map(|row| row.id).collect::<BTreeSet<_>>();
            prop_assert_eq!(&opened, &ancestry);
            prop_assert_eq!(opened, target.hierarchy.ids().iter().copied().collect::<BTreeSet<_>>());
        }
    }
}
