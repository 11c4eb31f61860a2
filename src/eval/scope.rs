//! Property storage, scoping and `${...}` / `$(...)` substitution.
//!
//! Properties are stored as raw strings and evaluated on first use, so a
//! property may refer to one defined later in the document. Macro calls push
//! a scope whose bindings shadow the global table until the call returns.

use super::interpreter::{
    apply_string_truthiness, build_pyisheval_context, format_value_python_style, identifiers,
    init_interpreter, is_float_expression, looks_like_float, preprocess_math_functions,
    value_truthiness, EvalError,
};
use super::lexer::{Lexer, TokenType};
use crate::error::XacroError;
use crate::extensions::{ArgRegistry, ExtensionHandler};
use core::cell::RefCell;
use pyisheval::Value;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use xmltree::XMLNode;

/// Where `<xacro:property scope="...">` places a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyScope {
    /// Innermost macro scope, or the global table outside macros
    Local,
    /// One level above the innermost macro scope
    Parent,
    Global,
}

pub(crate) struct EvalContext {
    raw_properties: RefCell<HashMap<String, String>>,
    // Only consulted outside macro scopes; parameters would otherwise leak
    evaluated_cache: RefCell<HashMap<String, String>>,
    resolution_stack: RefCell<Vec<String>>,
    scope_stack: RefCell<Vec<HashMap<String, String>>>,
    // Index 0 is global; one extra level per pushed scope
    block_properties: RefCell<Vec<HashMap<String, Vec<XMLNode>>>>,
    args: ArgRegistry,
    extensions: Rc<Vec<Box<dyn ExtensionHandler>>>,
}

struct StackGuard<'a> {
    stack: &'a RefCell<Vec<String>>,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

impl EvalContext {
    pub fn new(
        args: ArgRegistry,
        extensions: Rc<Vec<Box<dyn ExtensionHandler>>>,
    ) -> Self {
        Self {
            raw_properties: RefCell::new(HashMap::new()),
            evaluated_cache: RefCell::new(HashMap::new()),
            resolution_stack: RefCell::new(Vec::new()),
            scope_stack: RefCell::new(Vec::new()),
            block_properties: RefCell::new(vec![HashMap::new()]),
            args,
            extensions,
        }
    }

    pub fn extensions(&self) -> &[Box<dyn ExtensionHandler>] {
        &self.extensions
    }

    /// Store a raw property value in the requested scope.
    pub fn define_property(
        &self,
        name: String,
        value: String,
        scope: PropertyScope,
    ) {
        let mut stack = self.scope_stack.borrow_mut();
        let depth = stack.len();
        let target = match scope {
            PropertyScope::Local => depth,
            PropertyScope::Parent => {
                if depth == 0 {
                    log::warn!(
                        "Property '{}' uses scope=\"parent\" at global scope; defining globally",
                        name
                    );
                }
                depth.saturating_sub(1)
            }
            PropertyScope::Global => 0,
        };

        if target == 0 {
            self.evaluated_cache.borrow_mut().remove(&name);
            self.raw_properties.borrow_mut().insert(name, value);
        } else {
            stack[target - 1].insert(name, value);
        }
    }

    /// Store a block-valued property (a property whose body is XML).
    pub fn define_block_property(
        &self,
        name: String,
        nodes: Vec<XMLNode>,
        scope: PropertyScope,
    ) {
        let mut levels = self.block_properties.borrow_mut();
        let top = levels.len() - 1;
        let target = match scope {
            PropertyScope::Local => top,
            PropertyScope::Parent => top.saturating_sub(1),
            PropertyScope::Global => 0,
        };
        levels[target].insert(name, nodes);
    }

    pub fn lookup_block_property(
        &self,
        name: &str,
    ) -> Option<Vec<XMLNode>> {
        self.block_properties
            .borrow()
            .iter()
            .rev()
            .find_map(|level| level.get(name).cloned())
    }

    /// Raw (unevaluated) value, innermost scope first.
    pub fn lookup_raw_value(
        &self,
        name: &str,
    ) -> Option<String> {
        let found = self
            .scope_stack
            .borrow()
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned());
        found.or_else(|| self.raw_properties.borrow().get(name).cloned())
    }

    pub fn has_property_in_scope(
        &self,
        name: &str,
        scope: PropertyScope,
    ) -> bool {
        let stack = self.scope_stack.borrow();
        let depth = match scope {
            PropertyScope::Local => stack.len(),
            PropertyScope::Parent => stack.len().saturating_sub(1),
            PropertyScope::Global => 0,
        };
        if depth == 0 {
            self.raw_properties.borrow().contains_key(name)
        } else {
            stack[depth - 1].contains_key(name)
        }
    }

    pub fn push_scope(
        &self,
        bindings: HashMap<String, String>,
    ) {
        self.scope_stack.borrow_mut().push(bindings);
        self.block_properties.borrow_mut().push(HashMap::new());
    }

    pub fn pop_scope(&self) {
        if let Some(scope) = self.scope_stack.borrow_mut().pop() {
            let mut cache = self.evaluated_cache.borrow_mut();
            for name in scope.keys() {
                cache.remove(name);
            }
        }
        let mut levels = self.block_properties.borrow_mut();
        if levels.len() > 1 {
            levels.pop();
        }
    }

    pub fn add_to_current_scope(
        &self,
        name: String,
        value: String,
    ) {
        match self.scope_stack.borrow_mut().last_mut() {
            Some(scope) => {
                scope.insert(name, value);
            }
            None => {
                self.evaluated_cache.borrow_mut().remove(&name);
                self.raw_properties.borrow_mut().insert(name, value);
            }
        }
    }

    /// Number of active macro scopes; 0 means global only.
    pub fn scope_depth(&self) -> usize {
        self.scope_stack.borrow().len()
    }

    /// Look `key` up starting at scope `depth` and moving outwards to the
    /// global table. Used by `^` parameter forwarding.
    pub fn lookup_at_depth(
        &self,
        key: &str,
        depth: usize,
    ) -> Option<String> {
        let stack = self.scope_stack.borrow();
        let start = depth.min(stack.len());
        let found = stack[..start]
            .iter()
            .rev()
            .find_map(|scope| scope.get(key).cloned());
        found.or_else(|| self.raw_properties.borrow().get(key).cloned())
    }

    /// Evaluate a property on demand, detecting reference cycles.
    pub(crate) fn resolve_property(
        &self,
        name: &str,
    ) -> Result<String, XacroError> {
        let in_macro_scope = !self.scope_stack.borrow().is_empty();
        if !in_macro_scope {
            if let Some(cached) = self.evaluated_cache.borrow().get(name) {
                return Ok(cached.clone());
            }
        }

        if self.resolution_stack.borrow().iter().any(|n| n == name) {
            let chain = self.resolution_stack.borrow().join(" -> ");
            return Err(XacroError::CircularPropertyDependency {
                chain: format!("{} -> {}", chain, name),
            });
        }

        let raw_value = self
            .lookup_raw_value(name)
            .ok_or_else(|| XacroError::UndefinedProperty(name.to_string()))?;

        self.resolution_stack.borrow_mut().push(name.to_string());
        let _guard = StackGuard {
            stack: &self.resolution_stack,
        };

        let evaluated = self.substitute_text(&raw_value)?;

        if !in_macro_scope {
            self.evaluated_cache
                .borrow_mut()
                .insert(name.to_string(), evaluated.clone());
        }
        Ok(evaluated)
    }

    /// Resolve every defined property an expression refers to, following
    /// references made from inside lambda bodies. Names that are not
    /// properties (builtins, lambda parameters, typos) are left out and
    /// reported by the interpreter if actually used.
    pub(crate) fn build_eval_context(
        &self,
        expr: &str,
    ) -> Result<HashMap<String, String>, XacroError> {
        let mut context = HashMap::new();
        let mut to_process = identifiers(expr);
        let mut processed = HashSet::new();

        while let Some(name) = to_process.pop() {
            if !processed.insert(name.clone()) {
                continue;
            }
            match self.resolve_property(&name) {
                Ok(resolved) => {
                    if let Some(body_refs) = lambda_free_identifiers(&resolved) {
                        to_process.extend(body_refs.into_iter().filter(|r| !processed.contains(r)));
                    }
                    context.insert(name, resolved);
                }
                Err(XacroError::UndefinedProperty(ref missing)) if *missing == name => {}
                Err(e) => return Err(e),
            }
        }

        Ok(context)
    }

    /// Evaluate the body of a `${...}` block.
    fn evaluate_expression(
        &self,
        expr: &str,
    ) -> Result<(Value, bool), XacroError> {
        let expr = self.substitute_extensions_only(expr)?;
        let properties = self.build_eval_context(&expr)?;

        let wrap = |source: EvalError| match source {
            EvalError::PyishEval {
                source: pyisheval::EvalError::UndefinedVar(name),
                ..
            } => XacroError::UndefinedProperty(name),
            source => XacroError::EvalError {
                expr: expr.clone(),
                source,
            },
        };

        let mut interp = init_interpreter();
        let context = build_pyisheval_context(&properties, &mut interp).map_err(wrap)?;
        let prepared = preprocess_math_functions(&expr, &mut interp, &context).map_err(wrap)?;
        let value = interp
            .eval_with_context(prepared.trim(), &context)
            .map_err(|e| {
                wrap(EvalError::PyishEval {
                    expr: expr.clone(),
                    source: e,
                })
            })?;

        let force_float = is_float_expression(&expr, |name| {
            properties
                .get(name)
                .is_some_and(|resolved| looks_like_float(resolved))
        });
        Ok((value, force_float))
    }

    /// Replace every `${...}` and `$(...)` in `text`.
    ///
    /// Results are not rescanned, so a property whose value is the literal
    /// text `$${x}` yields `${x}` rather than evaluating `x`.
    pub fn substitute_text(
        &self,
        text: &str,
    ) -> Result<String, XacroError> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }

        let mut result = String::new();
        for (token_type, token_value) in Lexer::new(text) {
            match token_type {
                TokenType::Text => result.push_str(&token_value),
                TokenType::Expr => {
                    let (value, force_float) = self.evaluate_expression(&token_value)?;
                    result.push_str(&format_value_python_style(&value, force_float));
                }
                TokenType::Extension => {
                    let content = self.substitute_text(&token_value)?;
                    result.push_str(&self.resolve_extension(&content)?);
                }
                TokenType::DollarDollarBrace => {
                    result.push('$');
                    result.push_str(&token_value);
                }
            }
        }
        Ok(result)
    }

    /// Resolve `$(...)` only, leaving `${...}` blocks in place.
    pub(crate) fn substitute_extensions_only(
        &self,
        text: &str,
    ) -> Result<String, XacroError> {
        if !text.contains("$(") {
            return Ok(text.to_string());
        }

        let mut result = String::new();
        for (token_type, token_value) in Lexer::new(text) {
            match token_type {
                TokenType::Text => result.push_str(&token_value),
                TokenType::Extension => {
                    let content = self.substitute_text(&token_value)?;
                    result.push_str(&self.resolve_extension(&content)?);
                }
                TokenType::Expr => {
                    result.push_str("${");
                    result.push_str(&self.substitute_extensions_only(&token_value)?);
                    result.push('}');
                }
                TokenType::DollarDollarBrace => {
                    result.push_str("$$");
                    result.push_str(&token_value);
                }
            }
        }
        Ok(result)
    }

    /// Truth value of an `if`/`unless` condition.
    ///
    /// A condition that is exactly one `${...}` block keeps the value's type;
    /// anything else is substituted to text first and must read as a boolean
    /// or a number.
    pub fn eval_boolean(
        &self,
        condition: &str,
    ) -> Result<bool, XacroError> {
        let tokens: Vec<_> = Lexer::new(condition.trim()).collect();
        let to_xacro = |source: EvalError| XacroError::EvalError {
            expr: condition.to_string(),
            source,
        };

        if let [(TokenType::Expr, inner)] = tokens.as_slice() {
            let (value, _) = self.evaluate_expression(inner)?;
            return value_truthiness(&value, condition).map_err(to_xacro);
        }

        let text = self.substitute_text(condition)?;
        apply_string_truthiness(&text, condition).map_err(to_xacro)
    }

    /// Dispatch `$(command args)`. `content` must already be substituted.
    pub(crate) fn resolve_extension(
        &self,
        content: &str,
    ) -> Result<String, XacroError> {
        let mut parts = content.split_whitespace();
        let command = parts
            .next()
            .ok_or_else(|| XacroError::InvalidExtension(content.to_string()))?;
        let args_raw = parts.collect::<Vec<_>>().join(" ");

        match command {
            "arg" => {
                let name = args_raw.trim();
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(XacroError::Extension {
                        command: command.to_string(),
                        message: format!("$(arg) expects 1 argument(s), got '{}'", args_raw),
                    });
                }
                return self
                    .args
                    .get(name)
                    .ok_or_else(|| XacroError::UndefinedArgument(name.to_string()));
            }
            "eval" => return Err(XacroError::UnimplementedFeature("$(eval ...)".to_string())),
            _ => {}
        }

        for handler in self.extensions.iter() {
            match handler.resolve(command, &args_raw) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => continue,
                Err(e) => {
                    return Err(match e.downcast::<XacroError>() {
                        Ok(inner) => *inner,
                        Err(other) => XacroError::Extension {
                            command: command.to_string(),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }

        Err(XacroError::UnknownExtension(command.to_string()))
    }
}

/// Free identifiers of a `lambda params: body` value, or `None` if the
/// value is not a lambda.
fn lambda_free_identifiers(value: &str) -> Option<Vec<String>> {
    let rest = value.trim().strip_prefix("lambda ")?;
    let (params, body) = rest.split_once(':')?;
    let params: Vec<&str> = params.split(',').map(str::trim).collect();
    Some(
        identifiers(body)
            .into_iter()
            .filter(|name| !params.contains(&name.as_str()))
            .collect(),
    )
}
