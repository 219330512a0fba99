//! mathjit - Arithmetic Expression Compiler
//!
//! This library compiles small arithmetic expression strings into callable
//! single-precision evaluators bound to a caller-supplied variable layout.
//!
//! # Architecture
//!
//! The compile pipeline runs in four strictly sequential phases:
//!
//! 1. **Tokenizing** (`tokenizer` module)
//!    - Lexes the input bytes into a lazy token stream
//!    - Single-token lookahead with position-based backup
//!
//! 2. **Parsing** (`parser` module)
//!    - Precedence-climbing parser over the token stream
//!    - Resolves symbols against a [`Context`] snapshot
//!    - Produces the arena-allocated AST (`ast` module)
//!
//! 3. **Optimizing** (`optimizer` module)
//!    - Constant folding, algebraic identities
//!    - Reassociation of constants across `+`/`*` chains
//!
//! 4. **Code generation** (`jit` module, `jit` feature)
//!    - Single-pass lowering into native code through Cranelift
//!    - Transparent fallback to the tree interpreter (`interp` module)
//!
//! # Example
//!
//! ```rust
//! use mathjit::{Bundle, Context, Expression, Options};
//!
//! let mut ctx = Context::new();
//! ctx.add_bundle(Bundle::Math).unwrap();
//! ctx.add_variable("x", 0, 0).unwrap();
//! ctx.add_variable("y", 4, 0).unwrap();
//!
//! let expr = Expression::create(&ctx, "x * sin(y) + 3.14", Options::NONE).unwrap();
//!
//! let mut vars = [2.0f32, 0.5];
//! let value = expr.evaluate(&mut vars);
//! assert!((value - (2.0 * 0.5f32.sin() + 3.14)).abs() < 1e-3);
//! ```
//!
//! # Semantics
//!
//! - All arithmetic is `f32`; `%` is the floating-point remainder and `^`
//!   is `powf`
//! - Assignment (`x = expr`) writes through the variable's byte offset and
//!   yields the assigned value; statements separated by `;` evaluate left to
//!   right and the last one's value is the result
//! - Division by zero and out-of-domain math produce the IEEE result
//!   (inf/NaN); evaluation never fails
//! - Contexts are copy-on-write: cloning is cheap and mutating a clone never
//!   affects expressions compiled against the original

pub mod ast;
pub mod context;
pub mod error;
pub mod expression;
pub mod parser;
pub mod tokenizer;

mod interp;
mod optimizer;

#[cfg(feature = "jit")]
pub mod jit;

pub use context::{Bundle, Context, FunctionId, Prototype, VAR_READ_ONLY};
pub use error::{Error, Result};
pub use expression::{Expression, Options};
