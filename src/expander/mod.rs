//! Single-pass recursive expander.
//!
//! Nodes are processed in document order, so a definition is visible to
//! everything after it and a false conditional never evaluates its body.

use crate::{
    error::{XacroError, UNIMPLEMENTED_DIRECTIVES},
    parse::{is_xacro, is_xacro_element},
};
use xmltree::{Element, XMLNode};

mod directives;
mod guards;
mod include;
mod macro_call;

use directives::get_directive_registry;
use guards::DepthGuard;
use macro_call::expand_macro_call;

pub use crate::expand::XacroContext;

pub(crate) fn expand_node(
    node: XMLNode,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    if *ctx.recursion_depth.borrow() >= ctx.max_recursion_depth {
        return Err(XacroError::MacroRecursionLimit {
            depth: *ctx.recursion_depth.borrow(),
            limit: ctx.max_recursion_depth,
        });
    }
    let _depth_guard = DepthGuard::new(&ctx.recursion_depth);

    match node {
        XMLNode::Element(elem) => expand_element(elem, ctx),
        XMLNode::Text(text) => Ok(vec![XMLNode::Text(ctx.properties.substitute_text(&text)?)]),
        other => Ok(vec![other]),
    }
}

pub(crate) fn expand_children_list(
    children: Vec<XMLNode>,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    children.into_iter().try_fold(Vec::new(), |mut acc, child| {
        acc.extend(expand_node(child, ctx)?);
        Ok::<Vec<XMLNode>, XacroError>(acc)
    })
}

/// Collapse runs of whitespace the way XML attribute normalization does.
fn normalize_attribute_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn substitute_attributes(
    elem: &mut Element,
    ctx: &XacroContext,
) -> Result<(), XacroError> {
    for value in elem.attributes.values_mut() {
        let substituted = ctx.properties.substitute_text(value)?;
        *value = normalize_attribute_whitespace(&substituted);
    }
    Ok(())
}

/// Attach already-expanded children to `elem`, turning `<xacro:attribute>`
/// results into attributes of `elem`.
pub(crate) fn adopt_children(
    elem: &mut Element,
    children: Vec<XMLNode>,
) {
    for child in children {
        match child {
            XMLNode::Element(attr) if is_xacro_element(&attr, "attribute") => {
                if let (Some(name), Some(value)) =
                    (attr.attributes.get("name"), attr.attributes.get("value"))
                {
                    elem.attributes.insert(name.clone(), value.clone());
                }
            }
            other => elem.children.push(other),
        }
    }
}

fn expand_element(
    mut elem: Element,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    if is_xacro(&elem) {
        if let Some(handler) = get_directive_registry().get(elem.name.as_str()) {
            return handler.handle(elem, ctx);
        }

        if UNIMPLEMENTED_DIRECTIVES.contains(&elem.name.as_str()) {
            return Err(XacroError::UnimplementedFeature(format!("<xacro:{}>", elem.name)));
        }

        let name = elem.name.clone();
        return expand_macro_call(elem, &name, ctx);
    }

    substitute_attributes(&mut elem, ctx)?;
    let children = expand_children_list(core::mem::take(&mut elem.children), ctx)?;
    adopt_children(&mut elem, children);
    Ok(vec![XMLNode::Element(elem)])
}
