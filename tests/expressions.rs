//! End-to-end scenarios through the public API.
//!
//! Every expression is compiled twice, once per back end, and both results
//! are checked against the expected value within 1e-3. The loose tolerance
//! covers f32 rounding differences introduced by constant reassociation;
//! the two back ends are not bit-exact by design.

use mathjit::{Bundle, Context, Expression, Options};

const X: f32 = 5.1;
const Y: f32 = 6.7;
const Z: f32 = 9.9;
const PI: f32 = std::f32::consts::PI;

fn context() -> Context {
    let mut ctx = Context::new();
    ctx.add_bundle(Bundle::All).unwrap();
    ctx.add_variable("x", 0, 0).unwrap();
    ctx.add_variable("y", 4, 0).unwrap();
    ctx.add_variable("z", 8, 0).unwrap();
    ctx
}

fn eval_both(source: &str) -> (f32, f32) {
    let ctx = context();
    let interp = Expression::create(&ctx, source, Options::NO_JIT).unwrap();
    let jit = Expression::create(&ctx, source, Options::NONE).unwrap();

    let mut vars = [X, Y, Z];
    let a = interp.evaluate(&mut vars);
    let mut vars = [X, Y, Z];
    let b = jit.evaluate(&mut vars);
    (a, b)
}

fn check(source: &str, expected: f32) {
    let (interp, jit) = eval_both(source);
    assert!(
        (interp - expected).abs() < 1e-3,
        "{}: interpreter gave {}, expected {}",
        source,
        interp,
        expected
    );
    assert!(
        (jit - expected).abs() < 1e-3,
        "{}: jit gave {}, expected {}",
        source,
        jit,
        expected
    );
}

#[test]
fn simple_addition() {
    check("(x+y)", X + Y);
}

#[test]
fn nested_negation() {
    check("-(-(-x))", -X);
}

#[test]
fn product_of_sums() {
    check("(x+y)*(1.19+z)", (X + Y) * (1.19 + Z));
}

#[test]
fn vector_length() {
    check(
        "sqrt(x*x + y*y + z*z)",
        (X * X + Y * Y + Z * Z).sqrt(),
    );
}

#[test]
fn constant_reassociation_across_add() {
    check("1 + (x+2) + 3", 1.0 + (X + 2.0) + 3.0);
}

#[test]
fn statement_sequence() {
    // Block semantics are left-to-right; the final value is the last
    // statement's.
    check("z = x; x = 3*x + y; y = x - 3*z", Y);
}

// The expression battery from the reference test harness.
#[test]
fn reference_battery() {
    check("-x", -X);
    check("-(x+y)", -(X + Y));
    check("-1 + x", -1.0 + X);
    check("-(-(-1))", -1.0);
    check("(x+y)*x", (X + Y) * X);
    check("(x+y)*y", (X + Y) * Y);
    check("((x+(x+2.13))*y)", (X + (X + 2.13)) * Y);
    check("(x+y+z*2+(x*z+z*1.5))", X + Y + Z * 2.0 + (X * Z + Z * 1.5));
    check(
        "(((((((x-0.28)+y)+x)+x)*x)/1.12)*y)",
        (((((X - 0.28) + Y) + X) + X) * X / 1.12) * Y,
    );
    check(
        "((((x*((((y-1.50)+1.82)-x)/PI))/x)*x)+z)",
        (X * ((((Y - 1.50) + 1.82) - X) / PI) / X) * X + Z,
    );
    check(
        "(((((((((x+1.35)+PI)/PI)-y)+z)-z)+y)/x)+0.81)",
        ((((((((X + 1.35) + PI) / PI) - Y) + Z) - Z) + Y) / X) + 0.81,
    );
}

#[test]
fn interpreter_matches_jit_across_inputs() {
    let sources = [
        "x % y",
        "x ^ 2",
        "y ^ -1",
        "min(x, y) + max(y, z)",
        "avg(x, z)",
        "abs(x - z)",
        "reciprocal(y)",
        "ceil(x) + floor(y) + round(z)",
        "sin(x) * cos(y) + tan(z)",
        "atan2(y, x)",
        "log(z) + log10(z)",
        "pow(x, 0.5) - sqrt(x)",
        "x = y % 3; x * 2",
        "-x ^ 2",
    ];
    for source in sources {
        for vars in [[5.1f32, 6.7, 9.9], [0.25, 1.0, 2.0], [3.0, 0.5, 100.0]] {
            let ctx = context();
            let interp = Expression::create(&ctx, source, Options::NO_JIT).unwrap();
            let jit = Expression::create(&ctx, source, Options::NONE).unwrap();

            let mut a_vars = vars;
            let mut b_vars = vars;
            let a = interp.evaluate(&mut a_vars);
            let b = jit.evaluate(&mut b_vars);
            assert!(
                (a - b).abs() <= 1e-3,
                "{} with {:?}: interpreter {} vs jit {}",
                source,
                vars,
                a,
                b
            );
            // Side effects on the buffer agree too.
            for (slot, (av, bv)) in a_vars.iter().zip(b_vars.iter()).enumerate() {
                assert!(
                    (av - bv).abs() <= 1e-3,
                    "{} with {:?}: slot {} diverged ({} vs {})",
                    source,
                    vars,
                    slot,
                    av,
                    bv
                );
            }
        }
    }
}

#[test]
fn optimizer_preserves_values() {
    let sources = [
        "1 + (x+2) + 3",
        "2 * (x * 4) + 0",
        "x * 1 + y * 0",
        "0 - x + (y - 0)",
        "min(1 + 2, x) ^ 1",
        "-(-x) + 1 ^ y",
        "x % 1 + 0 % y",
    ];
    for source in sources {
        let ctx = context();
        let plain = Expression::create(&ctx, source, Options::NO_JIT | Options::NO_OPTIMIZE).unwrap();
        let folded = Expression::create(&ctx, source, Options::NO_JIT).unwrap();

        let mut vars = [X, Y, Z];
        let a = plain.evaluate(&mut vars);
        let mut vars = [X, Y, Z];
        let b = folded.evaluate(&mut vars);
        assert!(
            (a - b).abs() <= 1e-6,
            "{}: unoptimized {} vs optimized {}",
            source,
            a,
            b
        );
    }
}

#[test]
fn parse_is_deterministic() {
    let ctx = context();
    let source = "x + y * sin(z) - 4.5 ^ 0.5";
    let mut results = Vec::new();
    for _ in 0..3 {
        let expr = Expression::create(&ctx, source, Options::NO_JIT).unwrap();
        let mut vars = [X, Y, Z];
        results.push(expr.evaluate(&mut vars).to_bits());
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[test]
fn unary_minus_binds_below_pow() {
    // -x^2 negates the square.
    check("-x ^ 2", -(X * X));
}

#[test]
fn modulo_agrees_between_backends() {
    check("x % y", X % Y);
    check("z % y % x", Z % Y % X);
}

#[test]
fn abs_regression_on_negative_inputs() {
    let ctx = context();
    let expr = Expression::create(&ctx, "abs(x)", Options::NONE).unwrap();
    for value in [-5.1f32, -0.0, -1.0e-30, -3.4e38] {
        let mut vars = [value, 0.0, 0.0];
        assert_eq!(expr.evaluate(&mut vars), value.abs(), "abs({})", value);
    }
}

#[test]
fn reciprocal_is_exact_division() {
    check("reciprocal(y)", 1.0 / Y);
}

#[test]
fn assignments_commit_to_the_buffer() {
    let ctx = context();
    for options in [Options::NONE, Options::NO_JIT] {
        let expr = Expression::create(&ctx, "x = x + 1; y = x * 2", options).unwrap();
        let mut vars = [1.0f32, 0.0, 0.0];
        let value = expr.evaluate(&mut vars);
        assert_eq!(vars[0], 2.0);
        assert_eq!(vars[1], 4.0);
        assert_eq!(value, 4.0);
    }
}

#[test]
fn compile_error_codes() {
    use mathjit::Error;

    let ctx = context();
    let cases: &[(&str, Error)] = &[
        ("", Error::NoExpression),
        (";", Error::NoExpression),
        ("2 +", Error::ExpectedExpression),
        ("(x", Error::UnexpectedToken),
        ("x 3", Error::UnexpectedToken),
        ("x $ 3", Error::InvalidToken),
        ("12q", Error::InvalidToken),
        ("unknown + 1", Error::NoSymbol),
        ("nofunc(1)", Error::NoSymbol),
        ("min(x)", Error::NotEnoughArguments),
        ("abs(x, y)", Error::TooManyArguments),
        ("3 = x", Error::AssignmentToNonVariable),
        ("PI = 1", Error::AssignmentToNonVariable),
    ];
    for (source, expected) in cases {
        let got = Expression::create(&ctx, source, Options::NONE).unwrap_err();
        assert_eq!(got, *expected, "source {:?}", source);
    }
}
