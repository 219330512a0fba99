//! Compiled expression handle and the compile pipeline.
//!
//! `create` runs parse → optimize → native lowering, strictly in sequence;
//! the first error aborts the compilation. A JIT failure is not an error:
//! the expression silently keeps its AST and evaluates through the tree
//! interpreter instead.

use std::ops::BitOr;

use tracing::debug;

use crate::ast::{Ast, NodeId};
use crate::context::Context;
use crate::error::Result;
use crate::interp;
use crate::optimizer::Optimizer;
use crate::parser::Parser;

#[cfg(feature = "jit")]
use crate::jit::JitCompiler;
#[cfg(feature = "jit")]
use crate::jit::JitFunction;

/// Compile options for [`Expression::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options(u32);

impl Options {
    /// Default pipeline: optimize, then JIT with interpreter fallback.
    pub const NONE: Options = Options(0);

    /// Skip native code generation; always evaluate through the interpreter.
    pub const NO_JIT: Options = Options(0x1);

    /// Skip the algebraic optimizer.
    pub const NO_OPTIMIZE: Options = Options(0x2);

    /// Capture the generated Cranelift IR, retrievable via
    /// [`Expression::jit_log`].
    pub const VERBOSE: Options = Options(0x4);

    pub fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

#[derive(Debug)]
enum Backend {
    Interp { ast: Ast, root: NodeId },
    #[cfg(feature = "jit")]
    Jit(JitFunction),
}

/// A compiled expression bound to the [`Context`] snapshot it was created
/// against.
///
/// ```
/// use mathjit::{Bundle, Context, Expression, Options};
///
/// let mut ctx = Context::new();
/// ctx.add_bundle(Bundle::Math).unwrap();
/// ctx.add_variable("x", 0, 0).unwrap();
///
/// let expr = Expression::create(&ctx, "sqrt(x) + 1", Options::NONE).unwrap();
/// let mut vars = [9.0f32];
/// assert_eq!(expr.evaluate(&mut vars), 4.0);
/// ```
#[derive(Debug)]
pub struct Expression {
    // Dropped before `ctx`: code pages are returned while the context
    // snapshot the code was compiled against is still alive.
    backend: Backend,
    ctx: Context,
    required_bytes: usize,
}

impl Expression {
    /// Compile `source` against a snapshot of `ctx`.
    pub fn create(ctx: &Context, source: &str, options: Options) -> Result<Expression> {
        let (mut ast, mut root) = Parser::new(ctx, source).parse()?;

        if !options.contains(Options::NO_OPTIMIZE) {
            root = Optimizer::new(&mut ast).run(root);
        }

        let required_bytes = ast.required_bytes(root);

        #[cfg(feature = "jit")]
        if !options.contains(Options::NO_JIT) {
            let capture_ir = options.contains(Options::VERBOSE);
            match JitCompiler::new().and_then(|c| c.compile(&ast, root, capture_ir)) {
                Ok(function) => {
                    debug!(source, "expression compiled to native code");
                    return Ok(Expression {
                        backend: Backend::Jit(function),
                        ctx: ctx.clone(),
                        required_bytes,
                    });
                }
                Err(err) => {
                    // Observable only as a slower evaluator.
                    debug!(%err, "jit unavailable, falling back to the interpreter");
                }
            }
        }

        debug!(source, "expression compiled for the interpreter");
        Ok(Expression {
            backend: Backend::Interp { ast, root },
            ctx: ctx.clone(),
            required_bytes,
        })
    }

    /// Evaluate against a variables buffer.
    ///
    /// Panics when the buffer is too short for the highest variable offset
    /// the expression references (offsets are byte-based; the buffer is
    /// `f32`-indexed).
    pub fn evaluate(&self, variables: &mut [f32]) -> f32 {
        assert!(
            variables.len() * std::mem::size_of::<f32>() >= self.required_bytes,
            "variables buffer too short: {} bytes needed, {} provided",
            self.required_bytes,
            variables.len() * std::mem::size_of::<f32>(),
        );
        // Safety: the length check above covers every referenced offset.
        unsafe { self.evaluate_raw(variables.as_mut_ptr()) }
    }

    /// Evaluate through the raw ABI pointer.
    ///
    /// # Safety
    ///
    /// `variables_base` must be valid for reads and writes at every byte
    /// offset of the variable bindings this expression references.
    pub unsafe fn evaluate_raw(&self, variables_base: *mut f32) -> f32 {
        match &self.backend {
            Backend::Interp { ast, root } => interp::evaluate(ast, *root, variables_base),
            #[cfg(feature = "jit")]
            Backend::Jit(function) => function.call(variables_base),
        }
    }

    /// Whether evaluation goes through generated native code.
    pub fn is_jit(&self) -> bool {
        match &self.backend {
            Backend::Interp { .. } => false,
            #[cfg(feature = "jit")]
            Backend::Jit(_) => true,
        }
    }

    /// Captured JIT log text (Cranelift IR), present when compiled with
    /// [`Options::VERBOSE`] and the native back end was used.
    pub fn jit_log(&self) -> Option<&str> {
        match &self.backend {
            Backend::Interp { .. } => None,
            #[cfg(feature = "jit")]
            Backend::Jit(function) => function.ir(),
        }
    }

    /// The context snapshot this expression was compiled against.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Smallest variables-buffer size (in bytes) accepted by
    /// [`Expression::evaluate`].
    pub fn required_buffer_bytes(&self) -> usize {
        self.required_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Bundle;
    use crate::error::Error;

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.add_bundle(Bundle::Math).unwrap();
        ctx.add_variable("x", 0, 0).unwrap();
        ctx.add_variable("y", 4, 0).unwrap();
        ctx
    }

    #[test]
    fn no_jit_forces_the_interpreter() {
        let expr = Expression::create(&context(), "x + y", Options::NO_JIT).unwrap();
        assert!(!expr.is_jit());
        let mut vars = [1.0f32, 2.0];
        assert_eq!(expr.evaluate(&mut vars), 3.0);
    }

    #[cfg(feature = "jit")]
    #[test]
    fn default_pipeline_uses_the_jit() {
        let expr = Expression::create(&context(), "x + y", Options::NONE).unwrap();
        assert!(expr.is_jit());
    }

    #[cfg(feature = "jit")]
    #[test]
    fn verbose_captures_the_jit_log() {
        let expr = Expression::create(&context(), "x * y", Options::VERBOSE).unwrap();
        let log = expr.jit_log().unwrap();
        assert!(log.contains("fmul"), "unexpected log: {}", log);

        let silent = Expression::create(&context(), "x * y", Options::NONE).unwrap();
        assert!(silent.jit_log().is_none());
    }

    #[test]
    fn no_optimize_skips_folding() {
        // Observable indirectly: both settings still evaluate identically.
        let plain = Expression::create(&context(), "1 + 2 + x", Options::NO_OPTIMIZE).unwrap();
        let folded = Expression::create(&context(), "1 + 2 + x", Options::NONE).unwrap();
        let mut vars = [5.0f32, 0.0];
        assert_eq!(plain.evaluate(&mut vars), folded.evaluate(&mut vars));
    }

    #[test]
    fn compile_errors_propagate() {
        assert_eq!(
            Expression::create(&context(), "", Options::NONE).unwrap_err(),
            Error::NoExpression
        );
        assert_eq!(
            Expression::create(&context(), "nope", Options::NONE).unwrap_err(),
            Error::NoSymbol
        );
    }

    #[test]
    #[should_panic(expected = "variables buffer too short")]
    fn short_buffer_panics() {
        let expr = Expression::create(&context(), "y", Options::NO_JIT).unwrap();
        let mut vars = [0.0f32];
        expr.evaluate(&mut vars);
    }

    #[test]
    fn expression_outlives_context_mutation() {
        let mut ctx = context();
        let expr = Expression::create(&ctx, "x + 1", Options::NO_JIT).unwrap();
        // Mutating the context detaches it; the expression keeps evaluating
        // against its own snapshot.
        ctx.clear();
        let mut vars = [2.0f32, 0.0];
        assert_eq!(expr.evaluate(&mut vars), 3.0);
    }

    #[test]
    fn runtime_division_by_zero_is_ieee() {
        let expr = Expression::create(&context(), "x / y", Options::NO_JIT).unwrap();
        let mut vars = [1.0f32, 0.0];
        assert!(expr.evaluate(&mut vars).is_infinite());
    }
}
