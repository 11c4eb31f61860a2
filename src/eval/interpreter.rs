//! Thin layer over `pyisheval` giving xacro's Python-flavoured expression
//! semantics: literal coercion, math builtins, number formatting and strict
//! boolean conversion.

use pyisheval::{Interpreter, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Constants preloaded into every interpreter. `inf` and `nan` cannot be
/// written as pyisheval literals and are injected into the context instead.
pub const BUILTIN_CONSTANTS: &[(&str, f64)] = &[
    ("pi", core::f64::consts::PI),
    ("e", core::f64::consts::E),
    ("tau", core::f64::consts::TAU),
    ("M_PI", core::f64::consts::PI),
];

const MAX_MATH_REWRITES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Failed to evaluate expression '{expr}': {source}")]
    PyishEval {
        expr: String,
        #[source]
        source: pyisheval::EvalError,
    },

    #[error("Xacro conditional \"{condition}\" evaluated to \"{evaluated}\", which is not a boolean expression.")]
    InvalidBoolean {
        condition: String,
        evaluated: String,
    },

    #[error("{func}() expects numeric arguments, got '{args}'")]
    MathArgument { func: String, args: String },

    #[error("math domain error in {func}({args})")]
    MathDomain { func: String, args: String },

    #[error("Unbalanced parentheses in '{0}'")]
    UnbalancedParens(String),
}

pub(crate) fn init_interpreter() -> Interpreter {
    let mut interp = Interpreter::new();

    for (name, value) in BUILTIN_CONSTANTS {
        if let Err(e) = interp.eval(&format!("{} = {}", name, value)) {
            log::warn!("Could not initialize built-in constant '{}': {}", name, e);
        }
    }

    for definition in [
        "radians = lambda x: x * pi / 180",
        "degrees = lambda x: x * 180 / pi",
    ] {
        if let Err(e) = interp.eval(definition) {
            log::warn!("Could not define built-in '{}': {}", definition, e);
        }
    }

    interp
}

/// Coerce a raw property string the way xacro does before evaluation:
/// quoted strings lose their quotes, numbers become numbers and
/// `true`/`false` become 1 and 0. Strings containing underscores stay strings
/// so identifiers like `base_link` are never mistaken for numbers.
pub(crate) fn eval_literal(value: &str) -> Value {
    let value = value.trim();

    if let Some(unquoted) = value
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Value::StringLit(unquoted.to_string());
    }

    if value.contains('_') {
        return Value::StringLit(value.to_string());
    }

    if let Ok(n) = value.parse::<f64>() {
        // Rust accepts "inf"/"NaN" spellings Python's int()/float() literals would not
        if n.is_finite() || matches!(value, "inf" | "-inf" | "nan") {
            return Value::Number(n);
        }
    }

    if value.eq_ignore_ascii_case("true") {
        Value::Number(1.0)
    } else if value.eq_ignore_ascii_case("false") {
        Value::Number(0.0)
    } else {
        Value::StringLit(value.to_string())
    }
}

fn is_lambda(value: &str) -> bool {
    value.trim_start().starts_with("lambda ")
}

fn escape_python_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
}

/// Convert resolved property strings into pyisheval values.
///
/// Plain values are also assigned inside `interp` so that lambda properties
/// can close over them.
pub(crate) fn build_pyisheval_context(
    properties: &HashMap<String, String>,
    interp: &mut Interpreter,
) -> Result<HashMap<String, Value>, EvalError> {
    let mut context = HashMap::new();

    for (name, raw) in properties.iter().filter(|(_, v)| !is_lambda(v)) {
        let trimmed = raw.trim();
        let value = if trimmed.starts_with('[') || trimmed.starts_with('{') || trimmed.starts_with('(')
        {
            match interp.eval(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    log::debug!("Property '{}' is not a Python literal ({}); using string", name, e);
                    Value::StringLit(raw.clone())
                }
            }
        } else {
            eval_literal(raw)
        };

        let assignment = match &value {
            Value::Number(n) if n.is_finite() => Some(format!("{} = {}", name, n)),
            Value::StringLit(s) if !s.is_empty() => {
                Some(format!("{} = '{}'", name, escape_python_string(s)))
            }
            _ => None,
        };
        if let Some(assignment) = assignment {
            if let Err(e) = interp.eval(&assignment) {
                log::debug!("Could not preload '{}' for lambdas: {}", name, e);
            }
        }

        context.insert(name.clone(), value);
    }

    for (name, raw) in properties.iter().filter(|(_, v)| is_lambda(v)) {
        let assignment = format!("{} = {}", name, raw.trim());
        interp
            .eval(&assignment)
            .map_err(|e| EvalError::PyishEval {
                expr: assignment.clone(),
                source: e,
            })?;
        let lambda = interp.eval(name).map_err(|e| EvalError::PyishEval {
            expr: name.clone(),
            source: e,
        })?;
        context.insert(name.clone(), lambda);
    }

    context.insert("inf".to_string(), Value::Number(f64::INFINITY));
    context.insert("nan".to_string(), Value::Number(f64::NAN));
    context.insert("True".to_string(), Value::Number(1.0));
    context.insert("False".to_string(), Value::Number(0.0));

    Ok(context)
}

/// Byte index of the `)` closing the `(` at `start`, skipping quoted sections.
pub fn find_matching_paren(
    text: &str,
    start: usize,
) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &ch) in bytes.iter().enumerate().skip(start) {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                b'\'' | b'"' => quote = Some(ch),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Whether byte offset `pos` falls inside a quoted string literal.
pub(crate) fn in_string_literal(
    expr: &str,
    pos: usize,
) -> bool {
    let mut quote: Option<u8> = None;
    for &ch in &expr.as_bytes()[..pos.min(expr.len())] {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == b'\'' || ch == b'"' => quote = Some(ch),
            None => {}
        }
    }
    quote.is_some()
}

/// Split on commas at nesting depth zero.
fn split_top_level_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    for (i, &ch) in args.as_bytes().iter().enumerate() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                b'\'' | b'"' => quote = Some(ch),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                b',' if depth == 0 => {
                    parts.push(&args[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    if !args[start..].trim().is_empty() {
        parts.push(&args[start..]);
    }
    parts
}

static MATH_CALL_REGEX: OnceLock<Regex> = OnceLock::new();
static FLOAT_HINT_REGEX: OnceLock<Regex> = OnceLock::new();
static FLOAT_LITERAL_REGEX: OnceLock<Regex> = OnceLock::new();

fn math_call_regex() -> &'static Regex {
    MATH_CALL_REGEX.get_or_init(|| {
        Regex::new(
            r"\b(?:math\.)?(atan2|floor|acos|asin|atan|ceil|sqrt|cos|sin|tan|pow|log|abs)\s*\(",
        )
        .unwrap()
    })
}

fn float_hint_regex() -> &'static Regex {
    FLOAT_HINT_REGEX.get_or_init(|| {
        Regex::new(
            r"\b(?:(?:math\.)?(?:atan2|acos|asin|atan|sqrt|cos|sin|tan|pow|log)\s*\(|radians\s*\(|degrees\s*\(|pi\b|tau\b|M_PI\b|inf\b|nan\b)",
        )
        .unwrap()
    })
}

fn float_literal_regex() -> &'static Regex {
    FLOAT_LITERAL_REGEX.get_or_init(|| {
        Regex::new(r"(?:^|[^\w.])(?:\d+\.\d*|\.\d+|\d+[eE][-+]?\d+)").unwrap()
    })
}

fn apply_math_function(
    func: &str,
    args: &[f64],
) -> Option<f64> {
    let value = match (func, args) {
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("abs", [x]) => x.abs(),
        ("sqrt", [x]) => x.sqrt(),
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("asin", [x]) => x.asin(),
        ("acos", [x]) => x.acos(),
        ("atan", [x]) => x.atan(),
        ("atan2", [y, x]) => y.atan2(*x),
        ("pow", [x, y]) => x.powf(*y),
        ("log", [x]) => x.ln(),
        ("log", [x, base]) => x.log(*base),
        _ => return None,
    };
    Some(value)
}

fn number_literal(value: f64) -> String {
    if value < 0.0 {
        format!("({})", value)
    } else {
        value.to_string()
    }
}

/// Replace calls to math builtins (`sin(x)`, `math.sqrt(x)`, ...) with their
/// numeric results, innermost call first, since pyisheval has no native
/// function support.
pub(crate) fn preprocess_math_functions(
    expr: &str,
    interp: &mut Interpreter,
    context: &HashMap<String, Value>,
) -> Result<String, EvalError> {
    let mut result = expr.replace("math.pi", "pi");

    for _ in 0..MAX_MATH_REWRITES {
        let call = math_call_regex()
            .captures_iter(&result)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let preceded_by_dot = !whole.as_str().starts_with("math.")
                    && result[..whole.start()].ends_with('.');
                if preceded_by_dot || in_string_literal(&result, whole.start()) {
                    None
                } else {
                    Some((whole.start(), whole.end() - 1, caps[1].to_string()))
                }
            })
            .last();

        let Some((start, paren, func)) = call else {
            return Ok(result);
        };

        let close = find_matching_paren(&result, paren)
            .ok_or_else(|| EvalError::UnbalancedParens(expr.to_string()))?;
        let args_text = result[paren + 1..close].to_string();

        let mut args = Vec::new();
        for arg in split_top_level_args(&args_text) {
            match interp.eval_with_context(arg.trim(), context) {
                Ok(Value::Number(n)) => args.push(n),
                Ok(_) => {
                    return Err(EvalError::MathArgument {
                        func,
                        args: args_text,
                    })
                }
                Err(e) => {
                    return Err(EvalError::PyishEval {
                        expr: format!("{}({})", func, args_text),
                        source: e,
                    })
                }
            }
        }

        let value = apply_math_function(&func, &args).ok_or_else(|| EvalError::MathArgument {
            func: func.clone(),
            args: args_text.clone(),
        })?;
        if value.is_nan() {
            return Err(EvalError::MathDomain {
                func,
                args: args_text,
            });
        }

        result.replace_range(start..=close, &number_literal(value));
    }

    Err(EvalError::PyishEval {
        expr: expr.to_string(),
        source: pyisheval::EvalError::ParseError(
            "Too many nested math function calls".to_string(),
        ),
    })
}

static INT_CALL_REGEX: OnceLock<Regex> = OnceLock::new();
static FLOAT_CALL_REGEX: OnceLock<Regex> = OnceLock::new();

fn int_call_regex() -> &'static Regex {
    INT_CALL_REGEX.get_or_init(|| Regex::new(r"\b(?:math\.)?(?:int|floor|ceil)\s*\(").unwrap())
}

fn float_call_regex() -> &'static Regex {
    FLOAT_CALL_REGEX.get_or_init(|| Regex::new(r"\bfloat\s*\(").unwrap())
}

/// Replace every `int(...)`, `floor(...)` and `ceil(...)` call with `0`,
/// since their results are integers whatever their arguments are.
fn strip_int_calls(expr: &str) -> String {
    let mut result = expr.to_string();
    for _ in 0..MAX_MATH_REWRITES {
        let call = int_call_regex()
            .find_iter(&result)
            .filter(|m| !in_string_literal(&result, m.start()))
            .last()
            .map(|m| (m.start(), m.end() - 1));
        let Some((start, paren)) = call else {
            break;
        };
        let Some(close) = find_matching_paren(&result, paren) else {
            break;
        };
        result.replace_range(start..=close, "0");
    }
    result
}

/// Whether Python would produce a float for `expr`: outside integer-valued
/// calls it calls `float()` or mentions a float literal, true division, a
/// float-valued builtin, or a float variable.
pub(crate) fn is_float_expression<F>(
    expr: &str,
    is_float_var: F,
) -> bool
where
    F: Fn(&str) -> bool,
{
    let expr = strip_int_calls(expr);
    let expr = expr.as_str();
    if float_call_regex().is_match(expr) {
        return true;
    }
    let without_floor_div = expr.replace("//", "");
    if without_floor_div.contains('/') {
        return true;
    }
    if float_literal_regex().is_match(expr) || float_hint_regex().is_match(expr) {
        return true;
    }
    identifiers(expr).iter().any(|name| is_float_var(name))
}

/// Whether a resolved property value reads as a Python float.
pub(crate) fn looks_like_float(value: &str) -> bool {
    let v = value.trim();
    v.parse::<f64>().is_ok()
        && (v.contains('.') || v.contains('e') || v.contains('E') || v == "inf" || v == "nan")
}

static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Identifiers referenced by an expression, ignoring string literals,
/// attribute accesses (`x.y` yields only `x`) and Python keywords.
pub(crate) fn identifiers(expr: &str) -> Vec<String> {
    let regex = IDENTIFIER_REGEX
        .get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());
    let mut names: Vec<String> = Vec::new();
    for m in regex.find_iter(expr) {
        let before = &expr[..m.start()];
        if before.ends_with('.')
            || before.ends_with(|c: char| c.is_ascii_digit())
            || in_string_literal(expr, m.start())
            || is_python_keyword(m.as_str())
        {
            continue;
        }
        if !names.iter().any(|n| n == m.as_str()) {
            names.push(m.as_str().to_string());
        }
    }
    names
}

fn is_python_keyword(name: &str) -> bool {
    matches!(
        name,
        "and" | "or" | "not" | "in" | "is" | "if" | "else" | "for" | "lambda" | "None"
    )
}

/// Python `str()` rendering of a value. Whole numbers drop the fractional
/// part unless the expression was float-typed.
pub(crate) fn format_value_python_style(
    value: &Value,
    force_float: bool,
) -> String {
    const PYTHON_SCIENTIFIC_THRESHOLD: f64 = 1e16;
    const PYTHON_SMALL_THRESHOLD: f64 = 1e-4;

    match value {
        Value::Number(n) if n.is_nan() => "nan".to_string(),
        Value::Number(n) if n.is_infinite() => {
            if *n > 0.0 {
                "inf".to_string()
            } else {
                "-inf".to_string()
            }
        }
        Value::Number(n) if n.fract() == 0.0 && !force_float => format!("{:.0}", n),
        Value::Number(n) => {
            let magnitude = n.abs();
            if magnitude != 0.0
                && !(PYTHON_SMALL_THRESHOLD..PYTHON_SCIENTIFIC_THRESHOLD).contains(&magnitude)
            {
                python_exponent_notation(*n)
            } else if n.fract() == 0.0 {
                format!("{:.1}", n)
            } else {
                n.to_string()
            }
        }
        other => remove_quotes(&other.to_string()).to_string(),
    }
}

/// `1e+16`, `1.5e-05`: a signed exponent of at least two digits.
fn python_exponent_notation(n: f64) -> String {
    let formatted = format!("{:e}", n);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => formatted,
    }
}

/// Strip one layer of matching single or double quotes.
pub fn remove_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// xacro's strict string truthiness: `true`/`false` in either case or a
/// number; anything else is an error.
pub(crate) fn apply_string_truthiness(
    s: &str,
    original: &str,
) -> Result<bool, EvalError> {
    let trimmed = s.trim();
    match trimmed {
        "true" | "True" => return Ok(true),
        "false" | "False" => return Ok(false),
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i != 0);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(f != 0.0);
    }
    Err(EvalError::InvalidBoolean {
        condition: original.to_string(),
        evaluated: s.to_string(),
    })
}

pub(crate) fn value_truthiness(
    value: &Value,
    original: &str,
) -> Result<bool, EvalError> {
    match value {
        Value::Number(n) => Ok(*n != 0.0),
        Value::StringLit(s) => apply_string_truthiness(s, original),
        other => Err(EvalError::InvalidBoolean {
            condition: original.to_string(),
            evaluated: other.to_string(),
        }),
    }
}
