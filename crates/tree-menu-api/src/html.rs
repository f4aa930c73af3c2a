//! Nested `<ul>` rendering of an assembled menu tree.

use tree_menu_core::TreeNode;

/// Render the children of `root` as a nested list fragment.
///
/// The root item itself names the menu and is not rendered. A node's children
/// are only emitted while the node is open. A missing root renders as an empty
/// string.
#[must_use]
pub fn render_html(root: Option<&TreeNode>) -> String {
    let Some(root) = root else {
        return String::new();
    };

    let mut out = String::new();
    render_list(&root.children, 1, &mut out);
    out
}

fn render_list(nodes: &[TreeNode], depth: u32, out: &mut String) {
    out.push_str(&format!("<ul class=\"menu menu-level-{depth}\">\n"));
    for node in nodes {
        render_node(node, depth, out);
    }
    out.push_str("</ul>\n");
}

fn render_node(node: &TreeNode, depth: u32, out: &mut String) {
    let mut classes = Vec::new();
    if node.current {
        classes.push("current");
    }
    if node.open {
        classes.push("open");
    }

    if classes.is_empty() {
        out.push_str("<li>");
    } else {
        out.push_str(&format!("<li class=\"{}\">", classes.join(" ")));
    }

    let label = escape(&node.name);
    match node.path.as_deref() {
        Some(href) => out.push_str(&format!("<a href=\"{}\">{label}</a>", escape(href))),
        None => out.push_str(&format!("<span>{label}</span>")),
    }

    if node.open && !node.is_leaf() {
        out.push('\n');
        render_list(&node.children, depth + 1, out);
    }
    out.push_str("</li>\n");
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
