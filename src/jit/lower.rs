//! AST to Cranelift IR lowering.
//!
//! Single pass over the optimized tree. Every sub-expression lowers to one
//! SSA `f32` value; SSA immutability supplies what a register allocator
//! would need explicit read-only/writable tracking for. Literals are
//! deduplicated by bit pattern in a per-function table, and an operator
//! whose two operands name the same variable slot loads the slot once.

use std::collections::HashMap;

use cranelift::prelude::*;
use cranelift_frontend::FunctionBuilder;

use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, Transform};
use crate::context::{FuncBinding, FunctionId, VarSlot};

use super::error::{JitError, JitResult};

/// Lowering context for one function body.
pub(super) struct Lowering<'a, 'b> {
    pub builder: &'a mut FunctionBuilder<'b>,
    pub ast: &'a Ast,

    /// Base pointer of the caller's variables buffer (third ABI argument).
    pub vars_ptr: Value,

    /// Imported runtime helpers.
    pub pow_ref: codegen::ir::FuncRef,
    pub fmod_ref: codegen::ir::FuncRef,

    /// Pointer-sized integer type of the target.
    pub ptr_type: Type,

    /// f32 literals already materialized, keyed by bit pattern.
    constants: HashMap<u32, Value>,

    /// Imported signatures for external calls, keyed by arity.
    call_sigs: HashMap<u8, codegen::ir::SigRef>,
}

impl<'a, 'b> Lowering<'a, 'b> {
    pub(super) fn new(
        builder: &'a mut FunctionBuilder<'b>,
        ast: &'a Ast,
        vars_ptr: Value,
        pow_ref: codegen::ir::FuncRef,
        fmod_ref: codegen::ir::FuncRef,
        ptr_type: Type,
    ) -> Self {
        Lowering {
            builder,
            ast,
            vars_ptr,
            pow_ref,
            fmod_ref,
            ptr_type,
            constants: HashMap::new(),
            call_sigs: HashMap::new(),
        }
    }

    pub(super) fn lower(&mut self, id: NodeId) -> JitResult<Value> {
        match self.ast.kind(id) {
            NodeKind::Constant(value) => Ok(self.constant(*value)),
            NodeKind::Variable(slot) => Ok(self.load_slot(slot)),
            NodeKind::Block(stmts) => self.lower_block(stmts),
            NodeKind::Operator { op, left, right } => self.lower_operator(*op, *left, *right),
            NodeKind::Call { func, args } => self.lower_call(func, args),
            NodeKind::Transform { kind, child } => self.lower_transform(*kind, *child),
            NodeKind::Removed => Err(JitError::CompilationError(
                "detached node reached lowering".to_string(),
            )),
        }
    }

    fn lower_block(&mut self, stmts: &[NodeId]) -> JitResult<Value> {
        let mut result = None;
        for &stmt in stmts {
            result = Some(self.lower(stmt)?);
        }
        Ok(match result {
            Some(value) => value,
            None => self.constant(0.0),
        })
    }

    fn lower_operator(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> JitResult<Value> {
        if op == BinaryOp::Assign {
            let slot = match self.ast.kind(left) {
                NodeKind::Variable(slot) => *slot,
                other => {
                    return Err(JitError::CompilationError(format!(
                        "assignment to non-variable node {:?}",
                        other
                    )))
                }
            };
            let value = self.lower(right)?;
            self.store_slot(&slot, value);
            return Ok(value);
        }

        // Both sides naming the same slot: load once, use twice.
        let (lhs, rhs) = match (self.ast.kind(left), self.ast.kind(right)) {
            (NodeKind::Variable(a), NodeKind::Variable(b)) if a.offset == b.offset => {
                let shared = self.load_slot(a);
                (shared, shared)
            }
            _ => {
                let lhs = self.lower(left)?;
                let rhs = self.lower(right)?;
                (lhs, rhs)
            }
        };

        Ok(match op {
            BinaryOp::Add => self.builder.ins().fadd(lhs, rhs),
            BinaryOp::Sub => self.builder.ins().fsub(lhs, rhs),
            BinaryOp::Mul => self.builder.ins().fmul(lhs, rhs),
            BinaryOp::Div => self.builder.ins().fdiv(lhs, rhs),
            BinaryOp::Mod => self.call_runtime(self.fmod_ref, lhs, rhs),
            BinaryOp::Pow => self.call_runtime(self.pow_ref, lhs, rhs),
            BinaryOp::Assign => unreachable!(),
        })
    }

    fn lower_call(&mut self, func: &FuncBinding, args: &[NodeId]) -> JitResult<Value> {
        match func.id {
            FunctionId::Min | FunctionId::Max => {
                debug_assert_eq!(args.len(), 2);
                let a = self.lower(args[0])?;
                let b = self.lower(args[1])?;
                // Scalar min/max as compare+select: the second operand wins
                // on an unordered compare, like MINSS/MAXSS.
                let cc = if func.id == FunctionId::Min {
                    FloatCC::LessThan
                } else {
                    FloatCC::GreaterThan
                };
                let pick_a = self.builder.ins().fcmp(cc, a, b);
                Ok(self.builder.ins().select(pick_a, a, b))
            }

            FunctionId::Avg => {
                debug_assert_eq!(args.len(), 2);
                let a = self.lower(args[0])?;
                let b = self.lower(args[1])?;
                let sum = self.builder.ins().fadd(a, b);
                let half = self.constant(0.5);
                Ok(self.builder.ins().fmul(sum, half))
            }

            FunctionId::Abs => {
                debug_assert_eq!(args.len(), 1);
                let a = self.lower(args[0])?;
                Ok(self.builder.ins().fabs(a))
            }

            FunctionId::Reciprocal => {
                debug_assert_eq!(args.len(), 1);
                let a = self.lower(args[0])?;
                let one = self.constant(1.0);
                Ok(self.builder.ins().fdiv(one, a))
            }

            FunctionId::Sqrt => {
                debug_assert_eq!(args.len(), 1);
                let a = self.lower(args[0])?;
                Ok(self.builder.ins().sqrt(a))
            }

            _ => self.lower_external_call(func, args),
        }
    }

    /// Call through the binding's raw address with an imported signature of
    /// N f32 arguments and an f32 return.
    fn lower_external_call(&mut self, func: &FuncBinding, args: &[NodeId]) -> JitResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for &arg in args {
            values.push(self.lower(arg)?);
        }

        let arity = func.arity();
        let sig_ref = if let Some(sig_ref) = self.call_sigs.get(&arity).copied() {
            sig_ref
        } else {
            let mut sig = Signature::new(self.builder.func.signature.call_conv);
            for _ in 0..arity {
                sig.params.push(AbiParam::new(types::F32));
            }
            sig.returns.push(AbiParam::new(types::F32));
            let sig_ref = self.builder.import_signature(sig);
            self.call_sigs.insert(arity, sig_ref);
            sig_ref
        };

        let callee = self
            .builder
            .ins()
            .iconst(self.ptr_type, func.ptr as i64);
        let call = self.builder.ins().call_indirect(sig_ref, callee, &values);
        Ok(self.builder.inst_results(call)[0])
    }

    fn lower_transform(&mut self, kind: Transform, child: NodeId) -> JitResult<Value> {
        let value = self.lower(child)?;
        Ok(match kind {
            Transform::Negate => self.builder.ins().fneg(value),
        })
    }

    /// Materialize an f32 literal, deduplicated by bit pattern.
    fn constant(&mut self, value: f32) -> Value {
        let bits = value.to_bits();
        if let Some(&existing) = self.constants.get(&bits) {
            return existing;
        }
        let materialized = self.builder.ins().f32const(value);
        self.constants.insert(bits, materialized);
        materialized
    }

    fn load_slot(&mut self, slot: &VarSlot) -> Value {
        self.builder
            .ins()
            .load(types::F32, MemFlags::trusted(), self.vars_ptr, slot.offset)
    }

    fn store_slot(&mut self, slot: &VarSlot, value: Value) {
        self.builder
            .ins()
            .store(MemFlags::trusted(), value, self.vars_ptr, slot.offset);
    }

    fn call_runtime(
        &mut self,
        func_ref: codegen::ir::FuncRef,
        a: Value,
        b: Value,
    ) -> Value {
        let call = self.builder.ins().call(func_ref, &[a, b]);
        self.builder.inst_results(call)[0]
    }
}
