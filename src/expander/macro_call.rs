//! Macro invocation.
//!
//! Arguments and block arguments are evaluated in the caller's scope before
//! the macro's own scope is pushed. The body is expanded once; its output is
//! not rescanned.

use crate::{
    error::XacroError,
    parse::{MacroProcessor, ParamDefault},
};
use std::collections::HashMap;
use xmltree::{Element, XMLNode};

use super::{
    expand_children_list, expand_node,
    guards::{BlockGuard, ScopeGuard},
    substitute_attributes, XacroContext,
};

pub(super) fn expand_macro_call(
    mut call: Element,
    name: &str,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    let macro_def = ctx
        .macros
        .borrow()
        .get(name)
        .cloned()
        .ok_or_else(|| XacroError::UndefinedMacro(name.to_string()))?;

    substitute_attributes(&mut call, ctx)?;
    let parent_depth = ctx.properties.scope_depth();

    // Conditionals among the children decide which elements become blocks
    call.children = expand_children_list(core::mem::take(&mut call.children), ctx)?;
    let (args, mut blocks) = MacroProcessor::collect_macro_args(&call, &macro_def)?;

    let mut expanded_blocks = HashMap::new();
    for param in macro_def
        .param_order
        .iter()
        .filter(|p| macro_def.block_params.contains(*p))
    {
        let Some(block) = blocks.remove(param) else {
            continue;
        };
        let expanded = if macro_def.lazy_block_params.contains(param) {
            expand_children_list(block.children, ctx)?
        } else {
            expand_node(XMLNode::Element(block), ctx)?
        };
        expanded_blocks.insert(param.clone(), expanded);
    }

    log::trace!(
        "Calling macro '{}' with {} args and {} blocks",
        name,
        args.len(),
        expanded_blocks.len()
    );

    ctx.properties.push_scope(HashMap::new());
    let _scope_guard = ScopeGuard {
        properties: &ctx.properties,
    };

    // Declaration order, so later defaults can see earlier parameters
    for param in &macro_def.param_order {
        if macro_def.block_params.contains(param) {
            continue;
        }
        let value = match (args.get(param), macro_def.params.get(param)) {
            (Some(value), _) => value.clone(),
            (None, Some(ParamDefault::Value(default))) => ctx.properties.substitute_text(default)?,
            (None, Some(ParamDefault::ForwardRequired(forward))) => ctx
                .properties
                .lookup_at_depth(forward, parent_depth)
                .ok_or_else(|| XacroError::UndefinedPropertyToForward {
                    macro_name: macro_def.name.clone(),
                    param: param.clone(),
                    forward_name: forward.clone(),
                })?,
            (None, Some(ParamDefault::ForwardWithDefault(forward, default))) => {
                match ctx.properties.lookup_at_depth(forward, parent_depth) {
                    Some(value) => value,
                    None => match default {
                        Some(default) => ctx.properties.substitute_text(default)?,
                        None => String::new(),
                    },
                }
            }
            (None, Some(ParamDefault::None) | None) => {
                return Err(XacroError::MissingParameter {
                    macro_name: macro_def.name.clone(),
                    param: param.clone(),
                })
            }
        };
        ctx.properties.add_to_current_scope(param.clone(), value);
    }

    ctx.block_stack.borrow_mut().push(expanded_blocks);
    let _block_guard = BlockGuard {
        blocks: &ctx.block_stack,
    };

    expand_children_list(macro_def.content.children.clone(), ctx)
}
