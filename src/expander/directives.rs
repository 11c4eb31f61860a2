//! Handlers for the xacro directives.

use crate::{
    error::XacroError,
    eval::PropertyScope,
    parse::{has_structural_content, MacroDefinition, MacroProcessor, XACRO_NAMESPACE},
};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;
use xmltree::{Element, XMLNode};

use super::{
    adopt_children, expand_children_list, include::handle_include_directive,
    macro_call::expand_macro_call, substitute_attributes, XacroContext,
};

pub(super) trait DirectiveHandler: Send + Sync {
    /// Expand `elem`; definitions return no nodes.
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError>;
}

static DIRECTIVE_REGISTRY: OnceLock<HashMap<&'static str, Box<dyn DirectiveHandler>>> =
    OnceLock::new();

pub(super) fn get_directive_registry() -> &'static HashMap<&'static str, Box<dyn DirectiveHandler>>
{
    DIRECTIVE_REGISTRY.get_or_init(|| {
        let mut registry: HashMap<&'static str, Box<dyn DirectiveHandler>> = HashMap::new();
        registry.insert("property", Box::new(PropertyDirective));
        registry.insert("arg", Box::new(ArgDirective));
        registry.insert("macro", Box::new(MacroDirective));
        registry.insert("if", Box::new(ConditionalDirective { expand_when: true }));
        registry.insert("unless", Box::new(ConditionalDirective { expand_when: false }));
        registry.insert("insert_block", Box::new(InsertBlockDirective));
        registry.insert("include", Box::new(IncludeDirective));
        registry.insert("element", Box::new(ElementDirective));
        registry.insert("attribute", Box::new(AttributeDirective));
        registry.insert("call", Box::new(CallDirective));
        registry
    })
}

fn required_attribute<'a>(
    elem: &'a Element,
    attribute: &str,
) -> Result<&'a String, XacroError> {
    elem.attributes
        .get(attribute)
        .ok_or_else(|| XacroError::MissingAttribute {
            element: format!("xacro:{}", elem.name),
            attribute: attribute.to_string(),
        })
}

struct PropertyDirective;

impl DirectiveHandler for PropertyDirective {
    /// `value` always (re)defines, `default` only defines when the target
    /// scope lacks the name, and a body defines a block property. A text-only
    /// body defines nothing.
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "name")?)?;

        let scope = match elem.attributes.get("scope").map(String::as_str) {
            None | Some("local") => PropertyScope::Local,
            Some("parent") => PropertyScope::Parent,
            Some("global") => PropertyScope::Global,
            Some(other) => {
                return Err(XacroError::InvalidScopeAttribute {
                    property: name,
                    scope: other.to_string(),
                })
            }
        };

        let define = |raw: &str| -> Result<(), XacroError> {
            // Non-local definitions outlive the scope they are written in
            let value = if scope == PropertyScope::Local {
                raw.to_string()
            } else {
                ctx.properties.substitute_text(raw)?
            };
            ctx.properties.define_property(name.clone(), value, scope);
            Ok(())
        };

        match (elem.attributes.get("value"), elem.attributes.get("default")) {
            (Some(value), _) => define(value)?,
            (None, Some(default)) => {
                if !ctx.properties.has_property_in_scope(&name, scope) {
                    define(default)?;
                }
            }
            (None, None) => {
                if !elem.children.is_empty() && !has_structural_content(&elem.children) {
                    log::debug!("Ignoring text-only body of property '{}'", name);
                    return Ok(vec![]);
                }
                ctx.properties
                    .define_block_property(name, elem.children, scope);
            }
        }
        Ok(vec![])
    }
}

struct ArgDirective;

impl DirectiveHandler for ArgDirective {
    /// Values supplied by the caller win over `default`, which is only
    /// evaluated when needed.
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "name")?)?;

        if !ctx.args.contains(&name) {
            if let Some(default) = elem.attributes.get("default") {
                let value = ctx.properties.substitute_text(default)?;
                let mut args = ctx.args.clone();
                args.set(name, value);
            }
        }
        Ok(vec![])
    }
}

struct MacroDirective;

impl DirectiveHandler for MacroDirective {
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        // Names are taken verbatim; they are not evaluated
        let name = required_attribute(&elem, "name")?.clone();
        let params_str = elem.attributes.get("params").map_or("", String::as_str);
        let (params, param_order, block_params, lazy_block_params) =
            MacroProcessor::parse_params(params_str)?;

        log::trace!("Defining macro '{}' ({} params)", name, param_order.len());
        let definition = MacroDefinition {
            name: name.clone(),
            params,
            param_order,
            block_params,
            lazy_block_params,
            content: elem,
        };
        ctx.macros.borrow_mut().insert(name, Rc::new(definition));
        Ok(vec![])
    }
}

struct ConditionalDirective {
    expand_when: bool,
}

impl DirectiveHandler for ConditionalDirective {
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let condition = ctx
            .properties
            .eval_boolean(required_attribute(&elem, "value")?)?;
        if condition == self.expand_when {
            expand_children_list(elem.children, ctx)
        } else {
            Ok(vec![])
        }
    }
}

struct InsertBlockDirective;

impl DirectiveHandler for InsertBlockDirective {
    /// Block properties take precedence over block arguments.
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "name")?)?;

        if let Some(nodes) = ctx.properties.lookup_block_property(&name) {
            return expand_children_list(nodes, ctx);
        }
        ctx.get_block(&name)
    }
}

struct IncludeDirective;

impl DirectiveHandler for IncludeDirective {
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        handle_include_directive(elem, ctx)
    }
}

struct ElementDirective;

impl DirectiveHandler for ElementDirective {
    /// `<xacro:element xacro:name="...">` builds an element whose tag is
    /// computed; the remaining attributes and the body carry over.
    fn handle(
        &self,
        mut elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "name")?)?;
        elem.attributes.shift_remove("name");
        substitute_attributes(&mut elem, ctx)?;

        let mut built = Element::new(name.trim());
        built.attributes = core::mem::take(&mut elem.attributes);
        let children = expand_children_list(elem.children, ctx)?;
        adopt_children(&mut built, children);
        Ok(vec![XMLNode::Element(built)])
    }
}

struct AttributeDirective;

impl DirectiveHandler for AttributeDirective {
    /// Produces a marker the enclosing element turns into an attribute.
    fn handle(
        &self,
        elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "name")?)?;
        let value = ctx
            .properties
            .substitute_text(required_attribute(&elem, "value")?)?;

        let mut marker = Element::new("attribute");
        marker.namespace = Some(XACRO_NAMESPACE.to_string());
        marker.prefix = Some("xacro".to_string());
        marker.attributes.insert("name".to_string(), name.trim().to_string());
        marker.attributes.insert("value".to_string(), value);
        Ok(vec![XMLNode::Element(marker)])
    }
}

struct CallDirective;

impl DirectiveHandler for CallDirective {
    /// `<xacro:call macro="...">` calls a macro chosen at expansion time.
    fn handle(
        &self,
        mut elem: Element,
        ctx: &XacroContext,
    ) -> Result<Vec<XMLNode>, XacroError> {
        let name = ctx
            .properties
            .substitute_text(required_attribute(&elem, "macro")?)?;
        elem.attributes.shift_remove("macro");
        let name = name.trim().strip_prefix("xacro:").unwrap_or(name.trim()).to_string();
        expand_macro_call(elem, &name, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::expand_node;
    use super::*;
    use crate::extensions::ArgRegistry;
    use std::path::PathBuf;

    const NS: &str = "http://www.ros.org/wiki/xacro";

    fn expand(
        ctx: &XacroContext,
        body: &str,
    ) -> Result<Element, XacroError> {
        let xml = format!(r#"<robot xmlns:xacro="{}">{}</robot>"#, NS, body);
        let root = Element::parse(xml.as_bytes()).unwrap();
        let mut nodes = expand_node(XMLNode::Element(root), ctx)?;
        match nodes.pop() {
            Some(XMLNode::Element(e)) => Ok(e),
            other => panic!("expected element, got {:?}", other),
        }
    }

    fn context() -> XacroContext {
        XacroContext::new(PathBuf::from("."), ArgRegistry::new(), Rc::new(Vec::new()))
    }

    #[test]
    fn test_property_default_does_not_override() {
        let ctx = context();
        let out = expand(
            &ctx,
            r#"<xacro:property name="a" value="1"/>
               <xacro:property name="a" default="2"/>
               <xacro:property name="b" default="3"/>
               <v a="${a}" b="${b}"/>"#,
        )
        .unwrap();
        let v = out.get_child("v").unwrap();
        assert_eq!(v.attributes["a"], "1");
        assert_eq!(v.attributes["b"], "3");
    }

    #[test]
    fn test_invalid_scope() {
        let ctx = context();
        let err = expand(&ctx, r#"<xacro:property name="a" value="1" scope="nowhere"/>"#)
            .unwrap_err();
        assert!(matches!(err, XacroError::InvalidScopeAttribute { .. }));
    }

    #[test]
    fn test_missing_attribute() {
        let ctx = context();
        let err = expand(&ctx, r#"<xacro:property value="1"/>"#).unwrap_err();
        assert!(matches!(
            err,
            XacroError::MissingAttribute { ref element, ref attribute }
                if element == "xacro:property" && attribute == "name"
        ));
    }

    #[test]
    fn test_arg_caller_value_wins() {
        let mut args = ArgRegistry::new();
        args.set("mass", "5");
        let ctx = XacroContext::new(PathBuf::from("."), args, Rc::new(Vec::new()));
        let out = expand(
            &ctx,
            r#"<xacro:arg name="mass" default="${undefined_name}"/>
               <xacro:arg name="length" default="2"/>
               <v m="$(arg mass)" l="$(arg length)"/>"#,
        )
        .unwrap();
        let v = out.get_child("v").unwrap();
        assert_eq!(v.attributes["m"], "5");
        assert_eq!(v.attributes["l"], "2");
    }

    #[test]
    fn test_conditionals() {
        let ctx = context();
        let out = expand(
            &ctx,
            r#"<xacro:property name="n" value="2"/>
               <xacro:if value="${n == 2}"><yes/></xacro:if>
               <xacro:unless value="${n == 2}"><no/></xacro:unless>
               <xacro:if value="false"><never a="${undefined}"/></xacro:if>"#,
        )
        .unwrap();
        assert!(out.get_child("yes").is_some());
        assert!(out.get_child("no").is_none());
        assert!(out.get_child("never").is_none());
    }

    #[test]
    fn test_block_property_insert() {
        let ctx = context();
        let out = expand(
            &ctx,
            r#"<xacro:property name="geom"><box size="${s} ${s} ${s}"/></xacro:property>
               <xacro:property name="s" value="2"/>
               <geometry><xacro:insert_block name="geom"/></geometry>"#,
        )
        .unwrap();
        let b = out.get_child("geometry").unwrap().get_child("box").unwrap();
        assert_eq!(b.attributes["size"], "2 2 2");
    }

    #[test]
    fn test_element_and_attribute() {
        let ctx = context();
        let out = expand(
            &ctx,
            r#"<xacro:property name="tag" value="link"/>
               <xacro:element xacro:name="${tag}" type="fixed">
                 <xacro:attribute name="name" value="base"/>
                 <inner/>
               </xacro:element>"#,
        )
        .unwrap();
        let link = out.get_child("link").unwrap();
        assert_eq!(link.attributes["name"], "base");
        assert_eq!(link.attributes["type"], "fixed");
        assert!(link.get_child("inner").is_some());
    }

    #[test]
    fn test_call_directive() {
        let ctx = context();
        let out = expand(
            &ctx,
            r#"<xacro:macro name="wheel" params="side"><link name="${side}_wheel"/></xacro:macro>
               <xacro:property name="which" value="wheel"/>
               <xacro:call macro="${which}" side="left"/>"#,
        )
        .unwrap();
        assert_eq!(out.get_child("link").unwrap().attributes["name"], "left_wheel");
    }
}
