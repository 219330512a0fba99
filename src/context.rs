//! Copy-on-write symbol environment.
//!
//! A [`Context`] maps names to constants, variable slots and native
//! functions. Cloning a context is cheap: clones share the underlying
//! storage through an atomic reference count, and the first mutating call on
//! a shared context detaches by deep-copying the symbol table. A live
//! compilation therefore never observes a torn environment.
//!
//! Names are unique across all binding kinds: registering a name replaces
//! any previous binding of that name, and deletion removes it whatever kind
//! it was. Name comparison is byte-exact on the UTF-8 octets.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

/// Variable flag: the slot may be read but not assigned.
///
/// The flag is carried on the binding and visible to embedders; the compiler
/// itself does not reject assignments to read-only slots.
pub const VAR_READ_ONLY: u32 = 0x0000_0001;

// =============================================================================
// Prototype
// =============================================================================

/// Prototype descriptor of a native function binding.
///
/// Encodes the arity (0..=8) in the low byte and a foldable bit above it.
/// All arguments and the return value are `f32`. A foldable function is a
/// pure function of its arguments; the optimizer may invoke it at compile
/// time on constant inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prototype(u32);

impl Prototype {
    const ARITY_MASK: u32 = 0x0000_00ff;
    const FOLDABLE: u32 = 0x0000_0100;

    /// Prototype of a function taking `arity` `f32` arguments.
    pub fn with_arity(arity: u8) -> Self {
        Prototype(arity as u32)
    }

    /// Mark the function as safe to evaluate at compile time.
    pub fn foldable(self) -> Self {
        Prototype(self.0 | Self::FOLDABLE)
    }

    /// Declared argument count.
    pub fn arity(self) -> u8 {
        (self.0 & Self::ARITY_MASK) as u8
    }

    /// Whether the optimizer may evaluate the function on constant inputs.
    pub fn is_foldable(self) -> bool {
        self.0 & Self::FOLDABLE != 0
    }
}

// =============================================================================
// FunctionId
// =============================================================================

/// Numeric tag identifying functions the native back end recognizes and
/// lowers inline instead of calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// Not an intrinsic; always lowered as an external call.
    Custom,

    Min,
    Max,
    Avg,

    Ceil,
    Floor,
    Round,

    Abs,
    Reciprocal,

    Sqrt,
    Pow,

    Log,
    Log10,

    Sin,
    Cos,
    Tan,

    Sinh,
    Cosh,
    Tanh,

    Asin,
    Acos,
    Atan,
    Atan2,
}

// =============================================================================
// Bindings
// =============================================================================

/// Variable binding: a byte offset into the caller-supplied `f32` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSlot {
    pub(crate) offset: i32,
    pub(crate) flags: u32,
}

impl VarSlot {
    /// Byte offset of the slot in the variables buffer.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Whether the slot was registered read-only.
    pub fn is_read_only(&self) -> bool {
        self.flags & VAR_READ_ONLY != 0
    }
}

/// Native function binding.
///
/// `ptr` is the address of an `extern "C"` function whose signature matches
/// the prototype (N `f32` arguments, `f32` return).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncBinding {
    pub(crate) ptr: usize,
    pub(crate) prototype: Prototype,
    pub(crate) id: FunctionId,
}

impl FuncBinding {
    /// Declared argument count.
    pub fn arity(&self) -> u8 {
        self.prototype.arity()
    }
}

/// A single named binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Symbol {
    Constant(f32),
    Variable(VarSlot),
    Function(FuncBinding),
}

// =============================================================================
// Context
// =============================================================================

#[derive(Debug, Default, Clone)]
struct ContextData {
    symbols: HashMap<String, Symbol>,
}

/// Pre-registered symbol bundles for [`Context::add_bundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bundle {
    /// `E`, `PI` and the standard unary/binary math functions.
    Math,
    /// Every bundle.
    All,
}

/// Symbol environment used to compile expressions.
///
/// ```
/// use mathjit::{Bundle, Context};
///
/// let mut ctx = Context::new();
/// ctx.add_bundle(Bundle::Math).unwrap();
/// ctx.add_variable("x", 0, 0).unwrap();
///
/// let snapshot = ctx.clone();
/// ctx.add_constant("k", 2.5).unwrap(); // detaches; `snapshot` is unchanged
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: Arc<ContextData>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Context::default()
    }

    fn detach(&mut self) -> &mut ContextData {
        // Deep-copies when the storage is shared with another clone.
        Arc::make_mut(&mut self.data)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Symbol> {
        self.data.symbols.get(name)
    }

    #[cfg(test)]
    pub(crate) fn snapshot_ptr(&self) -> *const () {
        Arc::as_ptr(&self.data) as *const ()
    }

    /// Bind `name` to a constant value.
    ///
    /// Replaces any previous binding of `name`. A no-op (no detach) when the
    /// identical constant is already bound.
    pub fn add_constant(&mut self, name: &str, value: f32) -> Result<()> {
        if self.get(name) == Some(&Symbol::Constant(value)) {
            return Ok(());
        }
        self.detach()
            .symbols
            .insert(name.to_owned(), Symbol::Constant(value));
        Ok(())
    }

    /// Bind `name` to a variable slot at `offset` bytes into the variables
    /// buffer.
    ///
    /// Replaces any previous binding of `name`. A no-op when the identical
    /// slot is already bound.
    pub fn add_variable(&mut self, name: &str, offset: i32, flags: u32) -> Result<()> {
        let slot = VarSlot { offset, flags };
        if self.get(name) == Some(&Symbol::Variable(slot)) {
            return Ok(());
        }
        self.detach()
            .symbols
            .insert(name.to_owned(), Symbol::Variable(slot));
        Ok(())
    }

    /// Bind `name` to a native function.
    ///
    /// Replaces any previous binding of `name`. A no-op when the identical
    /// binding already exists. Fails with [`Error::InvalidArgument`] when the
    /// prototype's arity exceeds 8.
    ///
    /// # Safety
    ///
    /// `ptr` must be the address of an `extern "C"` function taking exactly
    /// `prototype.arity()` `f32` arguments and returning `f32`, and it must
    /// remain valid for as long as any expression compiled against this
    /// context (or a clone of it) is alive.
    pub unsafe fn add_function(
        &mut self,
        name: &str,
        ptr: *const (),
        prototype: Prototype,
        id: FunctionId,
    ) -> Result<()> {
        if prototype.arity() > 8 {
            return Err(Error::InvalidArgument);
        }
        let binding = FuncBinding {
            ptr: ptr as usize,
            prototype,
            id,
        };
        if self.get(name) == Some(&Symbol::Function(binding)) {
            return Ok(());
        }
        self.detach()
            .symbols
            .insert(name.to_owned(), Symbol::Function(binding));
        Ok(())
    }

    /// Remove the binding of `name`, whatever its kind.
    ///
    /// A no-op when the name is not bound.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if !self.data.symbols.contains_key(name) {
            return Ok(());
        }
        self.detach().symbols.remove(name);
        Ok(())
    }

    /// Remove every binding.
    pub fn clear(&mut self) {
        if Arc::strong_count(&self.data) > 1 {
            self.data = Arc::default();
        } else {
            self.detach().symbols.clear();
        }
    }

    /// Register a bundle of pre-defined symbols.
    pub fn add_bundle(&mut self, bundle: Bundle) -> Result<()> {
        match bundle {
            Bundle::Math => self.add_math_bundle(),
            Bundle::All => self.add_math_bundle(),
        }
    }

    fn add_math_bundle(&mut self) -> Result<()> {
        use std::f32::consts;
        use FunctionId::*;

        self.add_constant("E", consts::E)?;
        self.add_constant("PI", consts::PI)?;

        let unary = Prototype::with_arity(1).foldable();
        let binary = Prototype::with_arity(2).foldable();

        type F1 = extern "C" fn(f32) -> f32;
        type F2 = extern "C" fn(f32, f32) -> f32;

        let table: &[(&str, *const (), Prototype, FunctionId)] = &[
            ("min", shims::min as F2 as *const (), binary, Min),
            ("max", shims::max as F2 as *const (), binary, Max),
            ("avg", shims::avg as F2 as *const (), binary, Avg),
            ("ceil", shims::ceil as F1 as *const (), unary, Ceil),
            ("floor", shims::floor as F1 as *const (), unary, Floor),
            ("round", shims::round as F1 as *const (), unary, Round),
            ("abs", shims::abs as F1 as *const (), unary, Abs),
            ("reciprocal", shims::recip as F1 as *const (), unary, Reciprocal),
            ("sqrt", shims::sqrt as F1 as *const (), unary, Sqrt),
            ("pow", shims::pow as F2 as *const (), binary, Pow),
            ("log", shims::log as F1 as *const (), unary, Log),
            ("log10", shims::log10 as F1 as *const (), unary, Log10),
            ("sin", shims::sin as F1 as *const (), unary, Sin),
            ("cos", shims::cos as F1 as *const (), unary, Cos),
            ("tan", shims::tan as F1 as *const (), unary, Tan),
            ("sinh", shims::sinh as F1 as *const (), unary, Sinh),
            ("cosh", shims::cosh as F1 as *const (), unary, Cosh),
            ("tanh", shims::tanh as F1 as *const (), unary, Tanh),
            ("asin", shims::asin as F1 as *const (), unary, Asin),
            ("acos", shims::acos as F1 as *const (), unary, Acos),
            ("atan", shims::atan as F1 as *const (), unary, Atan),
            ("atan2", shims::atan2 as F2 as *const (), binary, Atan2),
        ];

        for &(name, ptr, prototype, id) in table {
            // Safety: every shim in the table is extern "C" with the
            // matching f32 arity, and shims are 'static.
            unsafe { self.add_function(name, ptr, prototype, id)? };
        }

        debug!(symbols = self.data.symbols.len(), "registered math bundle");
        Ok(())
    }
}

/// `extern "C"` shims over `f32` std math, callable from both back ends.
mod shims {
    pub extern "C" fn min(x: f32, y: f32) -> f32 {
        if x < y {
            x
        } else {
            y
        }
    }

    pub extern "C" fn max(x: f32, y: f32) -> f32 {
        if x > y {
            x
        } else {
            y
        }
    }

    pub extern "C" fn avg(x: f32, y: f32) -> f32 {
        (x + y) * 0.5
    }

    pub extern "C" fn ceil(x: f32) -> f32 {
        x.ceil()
    }

    pub extern "C" fn floor(x: f32) -> f32 {
        x.floor()
    }

    // Round-half-away-from-zero through an int cast, not half-to-even.
    pub extern "C" fn round(x: f32) -> f32 {
        (if x < 0.0 { x - 0.5 } else { x + 0.5 }) as i32 as f32
    }

    pub extern "C" fn abs(x: f32) -> f32 {
        x.abs()
    }

    pub extern "C" fn recip(x: f32) -> f32 {
        1.0 / x
    }

    pub extern "C" fn sqrt(x: f32) -> f32 {
        x.sqrt()
    }

    pub extern "C" fn pow(x: f32, y: f32) -> f32 {
        x.powf(y)
    }

    pub extern "C" fn log(x: f32) -> f32 {
        x.ln()
    }

    pub extern "C" fn log10(x: f32) -> f32 {
        x.log10()
    }

    pub extern "C" fn sin(x: f32) -> f32 {
        x.sin()
    }

    pub extern "C" fn cos(x: f32) -> f32 {
        x.cos()
    }

    pub extern "C" fn tan(x: f32) -> f32 {
        x.tan()
    }

    pub extern "C" fn sinh(x: f32) -> f32 {
        x.sinh()
    }

    pub extern "C" fn cosh(x: f32) -> f32 {
        x.cosh()
    }

    pub extern "C" fn tanh(x: f32) -> f32 {
        x.tanh()
    }

    pub extern "C" fn asin(x: f32) -> f32 {
        x.asin()
    }

    pub extern "C" fn acos(x: f32) -> f32 {
        x.acos()
    }

    pub extern "C" fn atan(x: f32) -> f32 {
        x.atan()
    }

    pub extern "C" fn atan2(x: f32, y: f32) -> f32 {
        x.atan2(y)
    }
}

// =============================================================================
// Tests
// =============================================================================
