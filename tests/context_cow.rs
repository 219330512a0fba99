//! Copy-on-write isolation of the symbol environment.

use mathjit::{Bundle, Context, Error, Expression, Options};

#[test]
fn mutating_a_clone_is_invisible_to_the_original() {
    let mut original = Context::new();
    original.add_variable("x", 0, 0).unwrap();
    original.add_constant("k", 10.0).unwrap();

    let mut clone = original.clone();
    clone.add_constant("k", 99.0).unwrap();
    clone.delete("x").unwrap();

    // The original still compiles and sees the old bindings.
    let expr = Expression::create(&original, "x + k", Options::NO_JIT).unwrap();
    let mut vars = [1.0f32];
    assert_eq!(expr.evaluate(&mut vars), 11.0);

    // The clone sees its own.
    assert_eq!(
        Expression::create(&clone, "x", Options::NO_JIT).unwrap_err(),
        Error::NoSymbol
    );
    let expr = Expression::create(&clone, "k", Options::NO_JIT).unwrap();
    assert_eq!(expr.evaluate(&mut vars), 99.0);
}

#[test]
fn expressions_hold_their_snapshot() {
    let mut ctx = Context::new();
    ctx.add_bundle(Bundle::Math).unwrap();
    ctx.add_variable("x", 0, 0).unwrap();

    let expr = Expression::create(&ctx, "sin(x) + PI", Options::NO_JIT).unwrap();

    // Rebinding and clearing after compilation must not disturb the
    // compiled expression.
    ctx.add_variable("x", 4, 0).unwrap();
    ctx.clear();

    let mut vars = [0.5f32];
    let expected = 0.5f32.sin() + std::f32::consts::PI;
    assert!((expr.evaluate(&mut vars) - expected).abs() < 1e-6);
}

#[test]
fn rebinding_changes_later_compiles_only() {
    let mut ctx = Context::new();
    ctx.add_constant("c", 1.0).unwrap();

    let one = Expression::create(&ctx, "c", Options::NO_JIT).unwrap();
    ctx.add_constant("c", 2.0).unwrap();
    let two = Expression::create(&ctx, "c", Options::NO_JIT).unwrap();

    let mut vars = [0.0f32; 0];
    assert_eq!(one.evaluate(&mut vars), 1.0);
    assert_eq!(two.evaluate(&mut vars), 2.0);
}

#[test]
fn delete_then_reregister_as_other_kind() {
    let mut ctx = Context::new();
    ctx.add_bundle(Bundle::Math).unwrap();

    // "sin" becomes a variable; calling it is now a symbol error, reading
    // it works.
    ctx.add_variable("sin", 0, 0).unwrap();
    assert_eq!(
        Expression::create(&ctx, "sin(1)", Options::NO_JIT).unwrap_err(),
        Error::NoSymbol
    );
    let expr = Expression::create(&ctx, "sin", Options::NO_JIT).unwrap();
    let mut vars = [7.0f32];
    assert_eq!(expr.evaluate(&mut vars), 7.0);
}
