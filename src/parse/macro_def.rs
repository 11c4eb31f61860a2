use crate::error::XacroError;
use std::collections::{HashMap, HashSet};
use xmltree::{Element, XMLNode};

/// How a parameter is filled when the call site does not supply it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    /// Required
    None,
    /// `name:=expr`, evaluated inside the macro scope
    Value(String),
    /// `name:=^`: copy `name` from the caller's scope, which must define it
    ForwardRequired(String),
    /// `name:=^|expr`: copy from the caller's scope, else evaluate `expr`
    ForwardWithDefault(String, Option<String>),
}

pub type ParamsMap = HashMap<String, ParamDefault>;
pub type ParamOrder = Vec<String>;
pub type BlockParamsSet = HashSet<String>;
pub type ParsedParams = (ParamsMap, ParamOrder, BlockParamsSet, BlockParamsSet);

pub type MacroArgs = HashMap<String, String>;
pub type MacroBlocks = HashMap<String, Element>;

#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub params: ParamsMap,
    /// Declaration order; block arguments are matched to child elements in
    /// this order
    pub param_order: ParamOrder,
    /// `*name` and `**name` parameters
    pub block_params: BlockParamsSet,
    /// `**name` parameters, which insert only the children of the block
    pub lazy_block_params: BlockParamsSet,
    pub content: Element,
}

pub struct MacroProcessor;

impl MacroProcessor {
    /// Whitespace split that keeps quoted sections together, so
    /// `xyz:='0 0 0' *origin` yields two tokens.
    fn split_params_respecting_quotes(params_str: &str) -> Result<Vec<String>, XacroError> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;

        for ch in params_str.chars() {
            match quote {
                Some(q) => {
                    current.push(ch);
                    if ch == q {
                        quote = None;
                    }
                }
                None if ch == '\'' || ch == '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                None if ch.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(core::mem::take(&mut current));
                    }
                }
                None => current.push(ch),
            }
        }

        if let Some(quote_char) = quote {
            return Err(XacroError::UnbalancedQuote {
                quote_char,
                params_str: params_str.to_string(),
            });
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        Ok(tokens)
    }

    fn strip_matching_quotes(value: &str) -> &str {
        value
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| value.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(value)
    }

    fn parse_default(
        name: &str,
        value: &str,
    ) -> ParamDefault {
        let value = Self::strip_matching_quotes(value);
        match value.strip_prefix('^') {
            Some("") => ParamDefault::ForwardRequired(name.to_string()),
            Some(rest) => match rest.strip_prefix('|') {
                Some(default) => ParamDefault::ForwardWithDefault(
                    name.to_string(),
                    Some(default.to_string()).filter(|d| !d.is_empty()),
                ),
                None => ParamDefault::Value(value.to_string()),
            },
            None => ParamDefault::Value(value.to_string()),
        }
    }

    /// Parse a `params="..."` attribute.
    pub fn parse_params(params_str: &str) -> Result<ParsedParams, XacroError> {
        let mut params = HashMap::new();
        let mut param_order = Vec::new();
        let mut block_params = HashSet::new();
        let mut lazy_block_params = HashSet::new();

        for token in Self::split_params_respecting_quotes(params_str)? {
            let (name, default, block) = if let Some(stripped) = token.strip_prefix('*') {
                if token.contains('=') {
                    return Err(XacroError::BlockParameterWithDefault { param: token });
                }
                let (name, lazy) = match stripped.strip_prefix('*') {
                    Some(rest) => (rest, true),
                    None => (stripped, false),
                };
                if name.starts_with('*') {
                    return Err(XacroError::InvalidParameterName { param: token });
                }
                (name.to_string(), ParamDefault::None, Some(lazy))
            } else if let Some((name, value)) =
                token.split_once(":=").or_else(|| token.split_once('='))
            {
                (name.to_string(), Self::parse_default(name, value), None)
            } else {
                (token.clone(), ParamDefault::None, None)
            };

            if name.is_empty() {
                return Err(XacroError::InvalidParameterName { param: token });
            }
            if params.contains_key(&name) {
                return Err(XacroError::DuplicateParamDeclaration { param: name });
            }

            param_order.push(name.clone());
            if let Some(lazy) = block {
                block_params.insert(name.clone());
                if lazy {
                    lazy_block_params.insert(name.clone());
                }
            }
            params.insert(name, default);
        }

        Ok((params, param_order, block_params, lazy_block_params))
    }

    /// Split a call site into attribute arguments and block arguments.
    ///
    /// Block parameters consume the call's child elements in declaration
    /// order; leftover children are an error.
    pub fn collect_macro_args(
        element: &Element,
        macro_def: &MacroDefinition,
    ) -> Result<(MacroArgs, MacroBlocks), XacroError> {
        let mut args = HashMap::new();
        for (name, value) in &element.attributes {
            if macro_def.block_params.contains(name) {
                return Err(XacroError::BlockParameterAttributeCollision {
                    param: name.clone(),
                });
            }
            if !macro_def.params.contains_key(name) {
                return Err(XacroError::InvalidParameter {
                    macro_name: macro_def.name.clone(),
                    param: name.clone(),
                });
            }
            args.insert(name.clone(), value.clone());
        }

        let mut children = element.children.iter().filter_map(XMLNode::as_element);
        let mut blocks = HashMap::new();
        for param in macro_def
            .param_order
            .iter()
            .filter(|p| macro_def.block_params.contains(*p))
        {
            let child = children
                .next()
                .ok_or_else(|| XacroError::MissingBlockParameter {
                    macro_name: macro_def.name.clone(),
                    param: param.clone(),
                })?;
            log::trace!("Macro '{}' block '{}' <- <{}>", macro_def.name, param, child.name);
            blocks.insert(param.clone(), child.clone());
        }

        let extra_count = children.count();
        if extra_count > 0 {
            return Err(XacroError::UnusedBlock {
                macro_name: macro_def.name.clone(),
                extra_count,
            });
        }

        Ok((args, blocks))
    }
}
