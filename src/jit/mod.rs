//! Native code generation through Cranelift.
//!
//! Each compiled expression owns its own [`JITModule`]: the module is built,
//! one function is defined and finalized, and the executable pages live until
//! the [`JitFunction`] is dropped. The generated function conforms to the
//! evaluator ABI:
//!
//! ```text
//! extern "C" fn(user: *const u8, result_out: *mut f32, variables_base: *mut f32)
//! ```
//!
//! Any error in here makes the compile pipeline fall back to the tree
//! interpreter; callers never observe a JIT failure directly.

mod error;
mod lower;
pub(crate) mod runtime;

pub use error::{JitError, JitResult};

use std::fmt;

use cranelift::prelude::*;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, FuncId, Linkage, Module};
use tracing::trace;

use crate::ast::{Ast, NodeId};

use lower::Lowering;

/// Evaluator ABI entry: `(user, result_out, variables_base)`.
pub type RawEvalFn = unsafe extern "C" fn(*const u8, *mut f32, *mut f32);

// =============================================================================
// JitFunction
// =============================================================================

/// A finalized native evaluator and the module that owns its code pages.
pub struct JitFunction {
    /// Kept alive for the executable memory; taken on drop to free it.
    module: Option<JITModule>,
    entry: RawEvalFn,
    ir: Option<String>,
}

impl JitFunction {
    /// Invoke the generated code.
    ///
    /// # Safety
    ///
    /// `vars` must be valid for reads and writes at every byte offset the
    /// compiled expression references.
    pub(crate) unsafe fn call(&self, vars: *mut f32) -> f32 {
        let mut result = 0.0f32;
        (self.entry)(std::ptr::null(), &mut result, vars);
        result
    }

    /// Cranelift IR of the generated function, captured when the expression
    /// was compiled with the `VERBOSE` option.
    pub fn ir(&self) -> Option<&str> {
        self.ir.as_deref()
    }
}

impl Drop for JitFunction {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // Safety: the entry pointer is dropped along with self, so no
            // call can outlive the pages being returned.
            unsafe { module.free_memory() };
        }
    }
}

impl fmt::Debug for JitFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitFunction")
            .field("entry", &(self.entry as *const ()))
            .field("ir", &self.ir.is_some())
            .finish()
    }
}

// =============================================================================
// JitCompiler
// =============================================================================

/// One-shot compiler: builds a module, lowers the AST into a single function
/// and finalizes it to executable memory.
pub struct JitCompiler {
    module: JITModule,
    ptr_type: Type,
    pow_id: FuncId,
    fmod_id: FuncId,
}

impl JitCompiler {
    pub fn new() -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| JitError::Backend(format!("failed to set opt_level: {}", e)))?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| JitError::Backend(format!("host ISA unavailable: {}", e)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Backend(format!("failed to create ISA: {}", e)))?;

        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        Self::register_runtime_symbols(&mut builder);

        let mut module = JITModule::new(builder);
        let ptr_type = module.isa().pointer_type();

        let mut binary_sig = module.make_signature();
        binary_sig.params.push(AbiParam::new(types::F32));
        binary_sig.params.push(AbiParam::new(types::F32));
        binary_sig.returns.push(AbiParam::new(types::F32));

        let pow_id = module
            .declare_function("jit_runtime_pow", Linkage::Import, &binary_sig)
            .map_err(|e| {
                JitError::CompilationError(format!("failed to declare jit_runtime_pow: {}", e))
            })?;
        let fmod_id = module
            .declare_function("jit_runtime_fmod", Linkage::Import, &binary_sig)
            .map_err(|e| {
                JitError::CompilationError(format!("failed to declare jit_runtime_fmod: {}", e))
            })?;

        Ok(JitCompiler {
            module,
            ptr_type,
            pow_id,
            fmod_id,
        })
    }

    fn register_runtime_symbols(builder: &mut JITBuilder) {
        builder.symbol("jit_runtime_pow", runtime::jit_runtime_pow as *const u8);
        builder.symbol("jit_runtime_fmod", runtime::jit_runtime_fmod as *const u8);
    }

    /// Lower `root` and finalize the module to executable memory.
    ///
    /// With `capture_ir` the generated Cranelift IR text is retained on the
    /// returned function.
    pub fn compile(mut self, ast: &Ast, root: NodeId, capture_ir: bool) -> JitResult<JitFunction> {
        // Evaluator ABI: (user, result_out, variables_base) -> ().
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(self.ptr_type));

        let func_id = self
            .module
            .declare_function("expr_eval", Linkage::Local, &sig)
            .map_err(|e| JitError::CompilationError(format!("failed to declare function: {}", e)))?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        self.build_function(&mut ctx, ast, root)?;

        trace!(ir = %ctx.func.display(), "generated IR");
        let ir = capture_ir.then(|| ctx.func.display().to_string());

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| JitError::CompilationError(format!("failed to define function: {}", e)))?;
        self.module.clear_context(&mut ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| JitError::CompilationError(format!("failed to finalize: {}", e)))?;

        let code = self.module.get_finalized_function(func_id);
        // Safety: the function was declared with the RawEvalFn signature.
        let entry = unsafe { std::mem::transmute::<*const u8, RawEvalFn>(code) };

        Ok(JitFunction {
            module: Some(self.module),
            entry,
            ir,
        })
    }

    fn build_function(
        &mut self,
        ctx: &mut codegen::Context,
        ast: &Ast,
        root: NodeId,
    ) -> JitResult<()> {
        let mut func_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let result_ptr = builder.block_params(entry_block)[1];
        let vars_ptr = builder.block_params(entry_block)[2];

        let pow_ref = self.module.declare_func_in_func(self.pow_id, builder.func);
        let fmod_ref = self.module.declare_func_in_func(self.fmod_id, builder.func);

        let value = {
            let mut lowering = Lowering::new(
                &mut builder,
                ast,
                vars_ptr,
                pow_ref,
                fmod_ref,
                self.ptr_type,
            );
            lowering.lower(root)?
        };

        builder
            .ins()
            .store(MemFlags::trusted(), value, result_ptr, 0);
        builder.ins().return_(&[]);
        builder.finalize();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Bundle, Context};
    use crate::parser::Parser;

    fn jit_eval(input: &str, vars: &mut [f32]) -> f32 {
        let mut ctx = Context::new();
        ctx.add_bundle(Bundle::Math).unwrap();
        ctx.add_variable("x", 0, 0).unwrap();
        ctx.add_variable("y", 4, 0).unwrap();
        ctx.add_variable("z", 8, 0).unwrap();

        let (ast, root) = Parser::new(&ctx, input).parse().unwrap();
        let function = JitCompiler::new()
            .unwrap()
            .compile(&ast, root, false)
            .unwrap();
        unsafe { function.call(vars.as_mut_ptr()) }
    }

    #[test]
    fn arithmetic_operators() {
        let mut v = [5.0, 2.0, 0.0];
        assert_eq!(jit_eval("x + y", &mut v), 7.0);
        assert_eq!(jit_eval("x - y", &mut v), 3.0);
        assert_eq!(jit_eval("x * y", &mut v), 10.0);
        assert_eq!(jit_eval("x / y", &mut v), 2.5);
    }

    #[test]
    fn modulo_and_pow_via_runtime_calls() {
        let mut v = [5.0, 2.0, 0.0];
        assert_eq!(jit_eval("x % y", &mut v), 1.0);
        assert_eq!(jit_eval("x ^ y", &mut v), 25.0);
    }

    #[test]
    fn same_slot_operands_share_one_load() {
        let mut v = [3.0, 0.0, 0.0];
        assert_eq!(jit_eval("x * x", &mut v), 9.0);
        assert_eq!(jit_eval("x - x", &mut v), 0.0);
    }

    #[test]
    fn intrinsics() {
        let mut v = [3.0, 4.0, -2.5];
        assert_eq!(jit_eval("min(x, y)", &mut v), 3.0);
        assert_eq!(jit_eval("max(x, y)", &mut v), 4.0);
        assert_eq!(jit_eval("avg(x, y)", &mut v), 3.5);
        assert_eq!(jit_eval("abs(z)", &mut v), 2.5);
        assert_eq!(jit_eval("sqrt(x * x + y * y)", &mut v), 5.0);
        assert!((jit_eval("reciprocal(y)", &mut v) - 0.25).abs() < 1e-6);
    }

    // The original SSE lowering cleared the sign with a truncated mask
    // constant; make sure negative inputs keep their magnitude here.
    #[test]
    fn abs_clears_only_the_sign_bit() {
        let mut v = [-5.1, 0.0, 0.0];
        assert_eq!(jit_eval("abs(x)", &mut v), 5.1);
        let mut v = [-1.0e-30, 0.0, 0.0];
        assert_eq!(jit_eval("abs(x)", &mut v), 1.0e-30);
    }

    #[test]
    fn external_calls_through_bindings() {
        let mut v = [0.5, 0.25, 0.0];
        assert!((jit_eval("sin(x)", &mut v) - 0.5f32.sin()).abs() < 1e-6);
        assert!((jit_eval("atan2(x, y)", &mut v) - 0.5f32.atan2(0.25)).abs() < 1e-6);
        assert!((jit_eval("pow(x, y)", &mut v) - 0.5f32.powf(0.25)).abs() < 1e-6);
    }

    #[test]
    fn assignment_stores_and_yields() {
        let mut v = [1.0, 2.0, 3.0];
        assert_eq!(jit_eval("x = y + z", &mut v), 5.0);
        assert_eq!(v[0], 5.0);
    }

    #[test]
    fn blocks_evaluate_left_to_right() {
        let mut v = [5.1, 6.7, 9.9];
        let result = jit_eval("z = x; x = 3*x + y; y = x - 3*z", &mut v);
        assert!((result - 6.7).abs() < 1e-3);
        assert!((v[1] - 6.7).abs() < 1e-3);
    }

    #[test]
    fn ir_capture_is_opt_in() {
        let ctx = {
            let mut c = Context::new();
            c.add_variable("x", 0, 0).unwrap();
            c
        };
        let (ast, root) = Parser::new(&ctx, "x + 1").parse().unwrap();

        let plain = JitCompiler::new()
            .unwrap()
            .compile(&ast, root, false)
            .unwrap();
        assert!(plain.ir().is_none());

        let verbose = JitCompiler::new()
            .unwrap()
            .compile(&ast, root, true)
            .unwrap();
        let ir = verbose.ir().unwrap();
        assert!(ir.contains("fadd"), "unexpected IR: {}", ir);
    }
}
