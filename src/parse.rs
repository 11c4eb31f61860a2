pub mod macro_def;

pub use macro_def::*;

use xmltree::{Element, XMLNode};

/// Namespace URIs that mark xacro elements.
pub const KNOWN_XACRO_URIS: &[&str] = &[
    "http://www.ros.org/wiki/xacro",
    "http://ros.org/wiki/xacro",
    "http://wiki.ros.org/xacro",
    "http://www.ros.org/xacro",
    "http://playerstage.sourceforge.net/gazebo/xmlschema/#xacro",
];

/// Namespace written by documents this crate synthesizes.
pub const XACRO_NAMESPACE: &str = "http://www.ros.org/wiki/xacro";

pub fn is_known_xacro_uri(uri: &str) -> bool {
    KNOWN_XACRO_URIS.contains(&uri)
}

/// Whether `element` lives in any xacro namespace.
pub fn is_xacro(element: &Element) -> bool {
    element.namespace.as_deref().is_some_and(is_known_xacro_uri)
}

pub fn is_xacro_element(
    element: &Element,
    tag_name: &str,
) -> bool {
    element.name == tag_name && is_xacro(element)
}

/// True when any node is more than text (an element, comment, CDATA or
/// processing instruction).
pub fn has_structural_content(nodes: &[XMLNode]) -> bool {
    nodes.iter().any(|node| !matches!(node, XMLNode::Text(_)))
}

/// Remove every prefix bound to a xacro namespace from `element` and its
/// descendants. Each element carries its full in-scope namespace map, so
/// this must recurse.
pub fn strip_xacro_namespaces(element: &mut Element) {
    if let Some(ns) = element.namespaces.as_mut() {
        ns.0.retain(|_, uri| !is_known_xacro_uri(uri));
    }
    for child in element.children.iter_mut().filter_map(XMLNode::as_mut_element) {
        strip_xacro_namespaces(child);
    }
}

/// First xacro element left anywhere below (or at) `element`.
pub fn find_xacro_element(element: &Element) -> Option<&Element> {
    if is_xacro(element) {
        return Some(element);
    }
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .find_map(find_xacro_element)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<robot xmlns:xacro="http://wiki.ros.org/xacro" name="r">
        <link name="a"/>
        <xacro:property name="x" value="1"/>
    </robot>"#;

    #[test]
    fn test_detects_xacro_elements_by_uri() {
        let root = Element::parse(DOC.as_bytes()).unwrap();
        let link = root.get_child("link").unwrap();
        let property = root.get_child("property").unwrap();
        assert!(!is_xacro(link));
        assert!(is_xacro_element(property, "property"));
        assert_eq!(find_xacro_element(&root).map(|e| e.name.as_str()), Some("property"));
    }

    #[test]
    fn test_strip_namespaces_recursively() {
        let mut root = Element::parse(DOC.as_bytes()).unwrap();
        strip_xacro_namespaces(&mut root);
        let still_declared = |e: &Element| {
            e.namespaces
                .as_ref()
                .is_some_and(|ns| ns.0.values().any(|uri| is_known_xacro_uri(uri)))
        };
        assert!(!still_declared(&root));
        assert!(!still_declared(root.get_child("link").unwrap()));
    }

    #[test]
    fn test_structural_content() {
        assert!(!has_structural_content(&[XMLNode::Text("x".to_string())]));
        assert!(has_structural_content(&[XMLNode::Comment("c".to_string())]));
        assert!(!has_structural_content(&[]));
    }
}
