//! Algebraic simplifier.
//!
//! Bottom-up rewrite over the AST returning a (possibly new) root. Rules:
//!
//! | Pattern | Replacement |
//! |---------|-------------|
//! | const `op` const, op ≠ `=` | folded constant |
//! | `x+0`, `x-0`, `x*1`, `x/1`, `x^1` | `x` |
//! | `x*0`, `0/x`, `0%x` | `0` |
//! | `0-x` | `-x` |
//! | `1^x` | `1` |
//! | `x*(-1)`, `x/(-1)` | `-x` |
//! | const beside a same-op `+`/`*` chain holding another const | constants folded, chain respliced |
//! | call with constant args, foldable function | folded constant |
//! | `-(-x)` | `x` |
//! | `-const` | folded constant |
//!
//! `x/0` is deliberately left alone; runtime IEEE semantics produce inf/NaN.
//! Constant reassociation over `+`/`*` is associative only up to f32
//! rounding; cross-backend tests use a loose tolerance for this reason.
//!
//! Every replacement inherits the replaced node's position: the caller
//! updates its owning child slot and the parent back-edge of the
//! replacement. The pass is structurally idempotent.

use std::ptr;

use tracing::trace;

use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, Transform};
use crate::interp;

pub(crate) struct Optimizer<'a> {
    ast: &'a mut Ast,
}

impl<'a> Optimizer<'a> {
    pub(crate) fn new(ast: &'a mut Ast) -> Self {
        Optimizer { ast }
    }

    /// Rewrite the tree rooted at `root`, returning the new root.
    pub(crate) fn run(&mut self, root: NodeId) -> NodeId {
        let new_root = self.do_node(root);
        self.ast.set_parent(new_root, None);
        trace!(
            root = new_root.index(),
            changed = new_root != root,
            "optimizer pass done"
        );
        new_root
    }

    fn do_node(&mut self, id: NodeId) -> NodeId {
        match self.ast.kind(id) {
            NodeKind::Block(_) => self.do_block(id),
            NodeKind::Operator { .. } => self.do_operator(id),
            NodeKind::Call { .. } => self.do_call(id),
            NodeKind::Transform { .. } => self.do_transform(id),
            NodeKind::Constant(_) | NodeKind::Variable(_) => id,
            NodeKind::Removed => unreachable!("optimizing a detached node"),
        }
    }

    fn do_block(&mut self, id: NodeId) -> NodeId {
        let stmts = match self.ast.kind(id) {
            NodeKind::Block(stmts) => stmts.clone(),
            _ => unreachable!(),
        };
        for (i, stmt) in stmts.iter().enumerate() {
            let new = self.do_node(*stmt);
            if new != *stmt {
                if let NodeKind::Block(slots) = self.ast.kind_mut(id) {
                    slots[i] = new;
                }
            }
            self.ast.set_parent(new, Some(id));
        }
        id
    }

    fn do_operator(&mut self, id: NodeId) -> NodeId {
        let (op, old_left, old_right) = match self.ast.kind(id) {
            NodeKind::Operator { op, left, right } => (*op, *left, *right),
            _ => unreachable!(),
        };

        let left = self.do_node(old_left);
        let right = self.do_node(old_right);
        if let NodeKind::Operator {
            left: l, right: r, ..
        } = self.ast.kind_mut(id)
        {
            *l = left;
            *r = right;
        }
        self.ast.set_parent(left, Some(id));
        self.ast.set_parent(right, Some(id));

        let left_const = self.ast.is_constant(left);
        let right_const = self.ast.is_constant(right);

        if left_const && right_const {
            // Assignment never reaches here: its left side is a variable.
            return self.fold_to_constant(id);
        }

        if !(left_const || right_const) {
            return id;
        }

        let (c, x) = if left_const {
            (left, right)
        } else {
            (right, left)
        };

        if let Some(replacement) = self.apply_identity(id, op, c, x) {
            return replacement;
        }

        if matches!(op, BinaryOp::Add | BinaryOp::Mul) {
            let (mut c, mut x) = (c, x);
            let mut spliced = false;
            // Drain the chain: each splice may expose the next constant.
            while let Some(deep) = self.find_const_node(x, op) {
                (c, x) = self.reassociate(id, c, deep, op);
                spliced = true;
            }
            // Folding may have landed the constant on an identity value.
            if spliced {
                if let Some(replacement) = self.apply_identity(id, op, c, x) {
                    return replacement;
                }
            }
        }

        id
    }

    /// Apply the 0/1/-1 identities to `(op, c, x)` where `c` is the constant
    /// side. Returns the replacement node, or `None` when nothing applies.
    fn apply_identity(&mut self, id: NodeId, op: BinaryOp, c: NodeId, x: NodeId) -> Option<NodeId> {
        let x_is_left = match self.ast.kind(id) {
            NodeKind::Operator { left, .. } => *left == x,
            _ => unreachable!(),
        };
        let cvalue = self.const_value(c);

        if cvalue == 0.0 {
            match op {
                // x + 0
                BinaryOp::Add => Some(self.hoist(id, x)),
                // x * 0
                BinaryOp::Mul => Some(self.hoist(id, c)),
                BinaryOp::Sub => {
                    if x_is_left {
                        // x - 0
                        Some(self.hoist(id, x))
                    } else {
                        // 0 - x
                        Some(self.replace_with_negate(id, x))
                    }
                }
                BinaryOp::Div | BinaryOp::Mod => {
                    if x_is_left {
                        // x / 0: leave it; the backends produce the IEEE
                        // result.
                        None
                    } else {
                        // 0 / x, 0 % x
                        Some(self.hoist(id, c))
                    }
                }
                _ => None,
            }
        } else if cvalue == 1.0 {
            match op {
                BinaryOp::Mul => Some(self.hoist(id, x)),
                BinaryOp::Div if x_is_left => Some(self.hoist(id, x)),
                BinaryOp::Pow => {
                    if x_is_left {
                        // x ^ 1
                        Some(self.hoist(id, x))
                    } else {
                        // 1 ^ x
                        Some(self.replace_with_constant(id, 1.0))
                    }
                }
                _ => None,
            }
        } else if cvalue == -1.0 {
            match op {
                BinaryOp::Mul => Some(self.replace_with_negate(id, x)),
                BinaryOp::Div if x_is_left => Some(self.replace_with_negate(id, x)),
                _ => None,
            }
        } else {
            None
        }
    }

    fn do_call(&mut self, id: NodeId) -> NodeId {
        let args = match self.ast.kind(id) {
            NodeKind::Call { args, .. } => args.clone(),
            _ => unreachable!(),
        };
        for (i, arg) in args.iter().enumerate() {
            let new = self.do_node(*arg);
            if new != *arg {
                if let NodeKind::Call { args: slots, .. } = self.ast.kind_mut(id) {
                    slots[i] = new;
                }
            }
            self.ast.set_parent(new, Some(id));
        }

        if self.ast.is_constant(id) {
            return self.fold_to_constant(id);
        }
        id
    }

    fn do_transform(&mut self, id: NodeId) -> NodeId {
        let old_child = match self.ast.kind(id) {
            NodeKind::Transform { child, .. } => *child,
            _ => unreachable!(),
        };
        let child = self.do_node(old_child);
        if let NodeKind::Transform { child: slot, .. } = self.ast.kind_mut(id) {
            *slot = child;
        }
        self.ast.set_parent(child, Some(id));

        // The child may have become constant during its own rewrite.
        if self.ast.is_constant(id) {
            return self.fold_to_constant(id);
        }

        // -(-x) collapses to x.
        if let NodeKind::Transform {
            kind: Transform::Negate,
            child: inner,
        } = *self.ast.kind(child)
        {
            self.ast.remove(child);
            return self.hoist(id, inner);
        }

        id
    }

    // =========================================================================
    // Rewrite helpers
    // =========================================================================

    fn const_value(&self, id: NodeId) -> f32 {
        // The subtree is constant; a null variables pointer is never read.
        unsafe { interp::evaluate(self.ast, id, ptr::null_mut()) }
    }

    /// Evaluate a constant subtree and replace it by a Constant node.
    fn fold_to_constant(&mut self, id: NodeId) -> NodeId {
        let value = self.const_value(id);
        self.replace_with_constant(id, value)
    }

    fn replace_with_constant(&mut self, id: NodeId, value: f32) -> NodeId {
        let parent = self.ast.parent(id);
        let replacement = self.ast.push(NodeKind::Constant(value));
        self.ast.set_parent(replacement, parent);
        self.ast.remove(id);
        replacement
    }

    /// Detach `child` from `id` and let it take `id`'s place.
    fn hoist(&mut self, id: NodeId, child: NodeId) -> NodeId {
        let parent = self.ast.parent(id);
        self.ast.set_parent(child, parent);
        self.ast.remove(id);
        child
    }

    /// Replace `id` by `Transform(negate, x)`; an `x` that is already a
    /// negate collapses instead of double-wrapping.
    fn replace_with_negate(&mut self, id: NodeId, x: NodeId) -> NodeId {
        if let NodeKind::Transform {
            kind: Transform::Negate,
            child: inner,
        } = *self.ast.kind(x)
        {
            self.ast.remove(x);
            return self.hoist(id, inner);
        }

        let parent = self.ast.parent(id);
        let transform = self.ast.push(NodeKind::Transform {
            kind: Transform::Negate,
            child: x,
        });
        self.ast.adopt(transform, x);
        self.ast.set_parent(transform, parent);
        self.ast.remove(id);
        transform
    }

    /// Search `id`'s subtree for a Constant reachable only through operator
    /// nodes of the same associative `op`.
    fn find_const_node(&self, id: NodeId, op: BinaryOp) -> Option<NodeId> {
        match self.ast.kind(id) {
            NodeKind::Operator {
                op: node_op,
                left,
                right,
            } if *node_op == op => {
                if self.ast.is_constant(*left) {
                    return Some(*left);
                }
                if self.ast.is_constant(*right) {
                    return Some(*right);
                }
                self.find_const_node(*left, op)
                    .or_else(|| self.find_const_node(*right, op))
            }
            _ => None,
        }
    }

    /// Fold `c` and `deep` (two constants joined by the associative `op`)
    /// into one, splicing `deep`'s operator out of the chain.
    ///
    /// `id` keeps its shape `(op, folded-const, chain-without-deep)`; the
    /// spliced sibling inherits the slot of `deep`'s parent. Returns the new
    /// constant node and `id`'s non-constant side after the splice.
    fn reassociate(&mut self, id: NodeId, c: NodeId, deep: NodeId, op: BinaryOp) -> (NodeId, NodeId) {
        let folded = match op {
            BinaryOp::Add => self.const_value(c) + self.const_value(deep),
            BinaryOp::Mul => self.const_value(c) * self.const_value(deep),
            _ => unreachable!("reassociation over a non-associative operator"),
        };

        let p = self
            .ast
            .parent(deep)
            .expect("deep constant has an operator parent");
        let keep = match self.ast.kind(p) {
            NodeKind::Operator { left, right, .. } => {
                if *right == deep {
                    *left
                } else {
                    *right
                }
            }
            _ => unreachable!("const chain nodes are operators"),
        };
        let pp = self
            .ast
            .parent(p)
            .expect("chain operator has a parent inside the expression");

        self.ast.replace_child(pp, p, keep);
        self.ast.remove(p);
        self.ast.remove(deep);

        let new_c = self.ast.push(NodeKind::Constant(folded));
        self.ast.replace_child(id, c, new_c);
        self.ast.remove(c);

        let rest = match self.ast.kind(id) {
            NodeKind::Operator { left, right, .. } => {
                if *left == new_c {
                    *right
                } else {
                    *left
                }
            }
            _ => unreachable!(),
        };
        (new_c, rest)
    }
}
