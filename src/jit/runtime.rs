//! Runtime helper functions callable from generated code.
//!
//! Registered on the [`JITBuilder`](cranelift_jit::JITBuilder) by symbol name
//! and declared as imports; generated code calls them for the operators that
//! have no single-instruction lowering.

/// `^` operator.
pub extern "C" fn jit_runtime_pow(base: f32, exp: f32) -> f32 {
    base.powf(exp)
}

/// `%` operator (IEEE remainder with the sign of the dividend, like fmodf).
pub extern "C" fn jit_runtime_fmod(a: f32, b: f32) -> f32 {
    a % b
}
