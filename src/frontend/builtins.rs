//! Built-in function table.
//!
//! Maps each built-in name to its arity. All built-ins propagate their
//! argument types like ordinary arithmetic, defaulting to `float`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Name → arity of the recognized built-in functions.
pub static BUILTIN_FUNCTIONS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    let unary = [
        "acos", "acosh", "asin", "asinh", "atan", "atanh", "cbrt", "ceil", "cos", "cosh", "erf",
        "erfc", "exp", "expm1", "fabs", "floor", "lgamma", "log", "log10", "log1p", "log2",
        "round", "rsqrt", "sigmoid", "sin", "sinh", "sqrt", "tan", "tanh", "tgamma", "trunc",
    ];
    let binary = ["atan2", "fmod", "pow"];

    let mut m = HashMap::new();
    for name in unary {
        m.insert(name, 1);
    }
    for name in binary {
        m.insert(name, 2);
    }
    m
});

/// Check whether `name` is a built-in function.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains_key(name)
}
