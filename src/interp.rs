//! Recursive tree interpreter.
//!
//! The fallback back end and the correctness reference for the native one.
//! Also invoked by the optimizer to fold constant subtrees (with a null
//! variables pointer, which a constant subtree never dereferences).

use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, Transform};
use crate::context::FuncBinding;

/// Evaluate the subtree at `id` against a variables buffer.
///
/// # Safety
///
/// `vars` must be valid for reads and writes at every byte offset referenced
/// by variable nodes in the subtree. A fully constant subtree never touches
/// the pointer, so null is acceptable for it.
pub(crate) unsafe fn evaluate(ast: &Ast, id: NodeId, vars: *mut f32) -> f32 {
    match ast.kind(id) {
        NodeKind::Constant(value) => *value,

        NodeKind::Variable(slot) => *slot_ptr(vars, slot.offset),

        NodeKind::Block(stmts) => {
            let mut result = 0.0;
            for &stmt in stmts {
                result = evaluate(ast, stmt, vars);
            }
            result
        }

        NodeKind::Operator { op, left, right } => match op {
            BinaryOp::Assign => {
                let value = evaluate(ast, *right, vars);
                match ast.kind(*left) {
                    NodeKind::Variable(slot) => *slot_ptr(vars, slot.offset) = value,
                    other => unreachable!("assignment to non-variable node {:?}", other),
                }
                value
            }
            BinaryOp::Add => evaluate(ast, *left, vars) + evaluate(ast, *right, vars),
            BinaryOp::Sub => evaluate(ast, *left, vars) - evaluate(ast, *right, vars),
            BinaryOp::Mul => evaluate(ast, *left, vars) * evaluate(ast, *right, vars),
            BinaryOp::Div => evaluate(ast, *left, vars) / evaluate(ast, *right, vars),
            BinaryOp::Mod => evaluate(ast, *left, vars) % evaluate(ast, *right, vars),
            BinaryOp::Pow => {
                let l = evaluate(ast, *left, vars);
                let r = evaluate(ast, *right, vars);
                l.powf(r)
            }
        },

        NodeKind::Call { func, args } => {
            let mut staged = [0.0f32; 8];
            for (slot, &arg) in staged.iter_mut().zip(args.iter()) {
                *slot = evaluate(ast, arg, vars);
            }
            dispatch(func, &staged[..args.len()])
        }

        NodeKind::Transform { kind, child } => match kind {
            Transform::Negate => -evaluate(ast, *child, vars),
        },

        NodeKind::Removed => unreachable!("evaluating a detached node"),
    }
}

unsafe fn slot_ptr(vars: *mut f32, offset: i32) -> *mut f32 {
    (vars as *mut u8).offset(offset as isize) as *mut f32
}

/// Call a native function binding with already-evaluated arguments.
///
/// # Safety
///
/// The binding's pointer must be an `extern "C"` function of `args.len()`
/// `f32` parameters returning `f32` (promised when it was registered).
pub(crate) unsafe fn dispatch(func: &FuncBinding, args: &[f32]) -> f32 {
    use std::mem::transmute;

    debug_assert_eq!(args.len(), func.arity() as usize);
    let ptr = func.ptr as *const ();
    let t = args;

    match t.len() {
        0 => transmute::<*const (), extern "C" fn() -> f32>(ptr)(),
        1 => transmute::<*const (), extern "C" fn(f32) -> f32>(ptr)(t[0]),
        2 => transmute::<*const (), extern "C" fn(f32, f32) -> f32>(ptr)(t[0], t[1]),
        3 => transmute::<*const (), extern "C" fn(f32, f32, f32) -> f32>(ptr)(t[0], t[1], t[2]),
        4 => transmute::<*const (), extern "C" fn(f32, f32, f32, f32) -> f32>(ptr)(
            t[0], t[1], t[2], t[3],
        ),
        5 => transmute::<*const (), extern "C" fn(f32, f32, f32, f32, f32) -> f32>(ptr)(
            t[0], t[1], t[2], t[3], t[4],
        ),
        6 => transmute::<*const (), extern "C" fn(f32, f32, f32, f32, f32, f32) -> f32>(ptr)(
            t[0], t[1], t[2], t[3], t[4], t[5],
        ),
        7 => transmute::<*const (), extern "C" fn(f32, f32, f32, f32, f32, f32, f32) -> f32>(ptr)(
            t[0], t[1], t[2], t[3], t[4], t[5], t[6],
        ),
        8 => transmute::<*const (), extern "C" fn(f32, f32, f32, f32, f32, f32, f32, f32) -> f32>(
            ptr,
        )(t[0], t[1], t[2], t[3], t[4], t[5], t[6], t[7]),
        n => unreachable!("arity {} out of range", n),
    }
}
