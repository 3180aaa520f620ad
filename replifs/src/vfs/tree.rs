//! Text rendering of a namespace snapshot.

use crate::meta::index::TreeNode;
use crate::meta::inode::FileType;
use std::fmt;

/// Snapshot of the namespace taken by a depth-first walk from the root.
///
/// Rendering is deferred to `Display`: the root prints as `/`, directories as
/// `/name`, files as `name`, each indented one tab per level. Sibling order is
/// unspecified.
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Lazily yields one rendered line per entry.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.nodes.iter().map(render)
    }
}

fn render(node: &TreeNode) -> String {
    let indent = "\t".repeat(node.depth);
    match node.kind {
        FileType::Dir if node.depth == 0 => format!("{indent}/"),
        FileType::Dir => format!("{indent}/{}", node.name),
        FileType::File => format!("{indent}{}", node.name),
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            f.write_str(&line)?;
        }
        Ok(())
    }
}
