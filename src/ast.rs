//! Typed abstract syntax tree.
//!
//! Nodes live in an arena owned by the [`Ast`]; a [`NodeId`] is the unique
//! 32-bit id assigned at node creation (ids are never reused within one
//! compilation). Child edges own the subtree conceptually; every node also
//! carries a non-owning parent back-edge so the optimizer can rewrite
//! bottom-up and splice replacements into the parent's child slot. Rewrites
//! must repair the back-edge of every node they move.

use smallvec::SmallVec;

use crate::context::{FuncBinding, VarSlot};

/// Binary and assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Unary transforms applied by [`NodeKind::Transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Negate,
}

/// Identifier of a node within one [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Argument list of a call node. Arity is capped at 8.
pub type ArgList = SmallVec<[NodeId; 4]>;

/// Tagged node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Ordered top-level statements; the block's value is the last one's.
    Block(Vec<NodeId>),
    /// Literal value.
    Constant(f32),
    /// Reference to a variable slot in the caller's buffer.
    Variable(VarSlot),
    /// Binary operator with exactly two children.
    Operator {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    /// Native function call.
    Call { func: FuncBinding, args: ArgList },
    /// Unary transform with exactly one child.
    Transform { kind: Transform, child: NodeId },
    /// Tombstone left behind when a rewrite detaches a node.
    Removed,
}

/// One arena slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

/// Arena-allocated expression tree.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    /// Allocate a node, assigning it the next id.
    pub(crate) fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { parent: None, kind });
        id
    }

    pub(crate) fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub(crate) fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.index()].parent = parent;
    }

    /// Mark a node detached. Its subtree stays in the arena but is no longer
    /// reachable from the root.
    pub(crate) fn remove(&mut self, id: NodeId) {
        self.nodes[id.index()].parent = None;
        self.nodes[id.index()].kind = NodeKind::Removed;
    }

    /// Attach `child` under `parent`, repairing the back-edge.
    pub(crate) fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.set_parent(child, Some(parent));
    }

    /// Replace `old` by `new` in the child slot of `parent`.
    ///
    /// Repairs `new`'s parent back-edge. Panics if `old` is not a child of
    /// `parent`; rewrites update exactly one owning slot.
    pub(crate) fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let mut replaced = false;
        match &mut self.nodes[parent.index()].kind {
            NodeKind::Block(stmts) => {
                if let Some(slot) = stmts.iter_mut().find(|s| **s == old) {
                    *slot = new;
                    replaced = true;
                }
            }
            NodeKind::Operator { left, right, .. } => {
                if *left == old {
                    *left = new;
                    replaced = true;
                } else if *right == old {
                    *right = new;
                    replaced = true;
                }
            }
            NodeKind::Call { args, .. } => {
                if let Some(slot) = args.iter_mut().find(|a| **a == old) {
                    *slot = new;
                    replaced = true;
                }
            }
            NodeKind::Transform { child, .. } => {
                if *child == old {
                    *child = new;
                    replaced = true;
                }
            }
            NodeKind::Constant(_) | NodeKind::Variable(_) | NodeKind::Removed => {}
        }
        assert!(replaced, "replace_child: node is not a child of its parent");
        self.set_parent(new, Some(parent));
    }

    /// Children of a node, in evaluation order.
    pub(crate) fn children(&self, id: NodeId) -> ArgList {
        match self.kind(id) {
            NodeKind::Block(stmts) => stmts.iter().copied().collect(),
            NodeKind::Operator { left, right, .. } => {
                let mut v = ArgList::new();
                v.push(*left);
                v.push(*right);
                v
            }
            NodeKind::Call { args, .. } => args.clone(),
            NodeKind::Transform { child, .. } => {
                let mut v = ArgList::new();
                v.push(*child);
                v
            }
            NodeKind::Constant(_) | NodeKind::Variable(_) | NodeKind::Removed => ArgList::new(),
        }
    }

    /// Whether the subtree at `id` evaluates to a value independent of the
    /// variables buffer.
    ///
    /// Blocks and assignments are never constant; calls are constant when
    /// every argument is and the function is marked foldable.
    pub(crate) fn is_constant(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Constant(_) => true,
            NodeKind::Variable(_) | NodeKind::Block(_) | NodeKind::Removed => false,
            NodeKind::Operator { op, left, right } => {
                *op != BinaryOp::Assign && self.is_constant(*left) && self.is_constant(*right)
            }
            NodeKind::Call { func, args } => {
                func.prototype.is_foldable() && args.iter().all(|a| self.is_constant(*a))
            }
            NodeKind::Transform { child, .. } => self.is_constant(*child),
        }
    }

    /// Structural equality of two subtrees (ignores ids and parents).
    #[cfg(test)]
    pub(crate) fn structurally_eq(&self, a: NodeId, other: &Ast, b: NodeId) -> bool {
        match (self.kind(a), other.kind(b)) {
            (NodeKind::Constant(x), NodeKind::Constant(y)) => x.to_bits() == y.to_bits(),
            (NodeKind::Variable(x), NodeKind::Variable(y)) => x == y,
            (
                NodeKind::Operator {
                    op: op_a,
                    left: la,
                    right: ra,
                },
                NodeKind::Operator {
                    op: op_b,
                    left: lb,
                    right: rb,
                },
            ) => {
                op_a == op_b
                    && self.structurally_eq(*la, other, *lb)
                    && self.structurally_eq(*ra, other, *rb)
            }
            (NodeKind::Call { func: fa, args: aa }, NodeKind::Call { func: fb, args: ab }) => {
                fa == fb
                    && aa.len() == ab.len()
                    && aa
                        .iter()
                        .zip(ab.iter())
                        .all(|(x, y)| self.structurally_eq(*x, other, *y))
            }
            (
                NodeKind::Transform { kind: ka, child: ca },
                NodeKind::Transform { kind: kb, child: cb },
            ) => ka == kb && self.structurally_eq(*ca, other, *cb),
            (NodeKind::Block(sa), NodeKind::Block(sb)) => {
                sa.len() == sb.len()
                    && sa
                        .iter()
                        .zip(sb.iter())
                        .all(|(x, y)| self.structurally_eq(*x, other, *y))
            }
            _ => false,
        }
    }

    /// Smallest variables-buffer length (in bytes) the tree can be evaluated
    /// against, derived from the variable slots it references.
    pub(crate) fn required_bytes(&self, root: NodeId) -> usize {
        let mut max = 0usize;
        self.visit_required(root, &mut max);
        max
    }

    fn visit_required(&self, id: NodeId, max: &mut usize) {
        if let NodeKind::Variable(slot) = self.kind(id) {
            let end = slot.offset.max(0) as usize + std::mem::size_of::<f32>();
            if end > *max {
                *max = end;
            }
        }
        for child in self.children(id) {
            self.visit_required(child, max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Prototype;

    fn leaf_const(ast: &mut Ast, v: f32) -> NodeId {
        ast.push(NodeKind::Constant(v))
    }

    #[test]
    fn ids_are_creation_ordered_and_unique() {
        let mut ast = Ast::new();
        let a = leaf_const(&mut ast, 1.0);
        let b = leaf_const(&mut ast, 2.0);
        let op = ast.push(NodeKind::Operator {
            op: BinaryOp::Add,
            left: a,
            right: b,
        });
        assert_eq!(a.0, 0);
        assert_eq!(b.0, 1);
        assert_eq!(op.0, 2);
    }

    #[test]
    fn replace_child_repairs_parent_edge() {
        let mut ast = Ast::new();
        let a = leaf_const(&mut ast, 1.0);
        let b = leaf_const(&mut ast, 2.0);
        let op = ast.push(NodeKind::Operator {
            op: BinaryOp::Add,
            left: a,
            right: b,
        });
        ast.adopt(op, a);
        ast.adopt(op, b);

        let c = leaf_const(&mut ast, 3.0);
        ast.replace_child(op, b, c);

        assert_eq!(ast.parent(c), Some(op));
        match ast.kind(op) {
            NodeKind::Operator { right, .. } => assert_eq!(*right, c),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn assignment_is_never_constant() {
        let mut ast = Ast::new();
        let var = ast.push(NodeKind::Variable(crate::context::VarSlot {
            offset: 0,
            flags: 0,
        }));
        let val = leaf_const(&mut ast, 1.0);
        let assign = ast.push(NodeKind::Operator {
            op: BinaryOp::Assign,
            left: var,
            right: val,
        });
        assert!(!ast.is_constant(assign));
    }

    #[test]
    fn call_constness_needs_foldable_flag() {
        let mut ast = Ast::new();
        let arg = leaf_const(&mut ast, 1.0);
        let foldable = FuncBinding {
            ptr: 0,
            prototype: Prototype::with_arity(1).foldable(),
            id: crate::context::FunctionId::Custom,
        };
        let call = ast.push(NodeKind::Call {
            func: foldable,
            args: std::iter::once(arg).collect(),
        });
        assert!(ast.is_constant(call));

        let arg2 = leaf_const(&mut ast, 1.0);
        let opaque = FuncBinding {
            ptr: 0,
            prototype: Prototype::with_arity(1),
            id: crate::context::FunctionId::Custom,
        };
        let call2 = ast.push(NodeKind::Call {
            func: opaque,
            args: std::iter::once(arg2).collect(),
        });
        assert!(!ast.is_constant(call2));
    }

    #[test]
    fn required_bytes_covers_highest_slot() {
        let mut ast = Ast::new();
        let v = ast.push(NodeKind::Variable(crate::context::VarSlot {
            offset: 8,
            flags: 0,
        }));
        assert_eq!(ast.required_bytes(v), 12);
    }
}
