//! `<xacro:include>`: plain, optional and glob includes.

use crate::error::XacroError;
use std::path::{Path, PathBuf};
use xmltree::{Element, XMLNode};

use super::{expand_children_list, guards::IncludeGuard, XacroContext};

/// Same wildcard test xacro applies to `filename`.
fn is_glob_pattern(filename: &str) -> bool {
    filename.contains(['*', '[', '?'])
}

fn process_single_include(
    file_path: PathBuf,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    let file_path = crate::packages::absolute_path(&file_path);
    if ctx.include_stack.borrow().contains(&file_path) {
        return Err(XacroError::Include(format!(
            "Circular include detected: {}",
            file_path.display()
        )));
    }

    let content =
        std::fs::read_to_string(&file_path).map_err(|e| XacroError::file_io(&file_path, e))?;
    let included_root = Element::parse(content.as_bytes()).map_err(|e| {
        XacroError::Include(format!(
            "Failed to parse XML in file '{}': {}",
            file_path.display(),
            e
        ))
    })?;

    log::debug!("Including {}", file_path.display());
    ctx.all_includes.borrow_mut().push(file_path.clone());
    let _include_guard = IncludeGuard::enter(ctx, file_path);
    expand_children_list(included_root.children, ctx)
}

pub(super) fn handle_include_directive(
    elem: Element,
    ctx: &XacroContext,
) -> Result<Vec<XMLNode>, XacroError> {
    let raw = elem
        .attributes
        .get("filename")
        .ok_or_else(|| XacroError::MissingAttribute {
            element: "xacro:include".to_string(),
            attribute: "filename".to_string(),
        })?;
    let filename = ctx.properties.substitute_text(raw)?;
    let filename = filename.trim();

    let optional = match elem.attributes.get("optional") {
        Some(value) => ctx.properties.eval_boolean(value)?,
        None => false,
    };

    let file_path = if Path::new(filename).is_absolute() {
        PathBuf::from(filename)
    } else {
        ctx.base_path.borrow().join(filename)
    };

    if is_glob_pattern(filename) {
        let pattern = file_path.to_str().ok_or_else(|| {
            XacroError::Include(format!("Invalid UTF-8 in glob pattern: {}", filename))
        })?;
        let mut matches: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|e| XacroError::Include(format!("Invalid glob pattern '{}': {}", filename, e)))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("Error reading glob match: {}", e);
                    None
                }
            })
            .collect();

        if matches.is_empty() {
            if !optional {
                log::warn!("Include tag's filename spec \"{}\" matched no files.", filename);
            }
            return Ok(vec![]);
        }

        matches.sort();
        return matches.into_iter().try_fold(Vec::new(), |mut acc, path| {
            acc.extend(process_single_include(path, ctx)?);
            Ok(acc)
        });
    }

    if optional && !file_path.exists() {
        log::debug!("Skipping missing optional include {}", file_path.display());
        return Ok(vec![]);
    }
    process_single_include(file_path, ctx)
}

#[cfg(test)]
mod tests {
    use super::super::expand_node;
    use super::*;
    use crate::extensions::ArgRegistry;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    const NS: &str = "http://www.ros.org/wiki/xacro";

    fn run(
        dir: &Path,
        body: &str,
    ) -> Result<(Element, XacroContext), XacroError> {
        let ctx = XacroContext::new(dir.to_path_buf(), ArgRegistry::new(), Rc::new(Vec::new()));
        let xml = format!(r#"<robot xmlns:xacro="{}">{}</robot>"#, NS, body);
        let root = Element::parse(xml.as_bytes()).unwrap();
        let mut nodes = expand_node(XMLNode::Element(root), &ctx)?;
        let elem = match nodes.pop() {
            Some(XMLNode::Element(e)) => e,
            other => panic!("expected element, got {:?}", other),
        };
        Ok((elem, ctx))
    }

    fn write_part(
        dir: &Path,
        name: &str,
        body: &str,
    ) {
        let xml = format!(r#"<robot xmlns:xacro="{}">{}</robot>"#, NS, body);
        fs::write(dir.join(name), xml).unwrap();
    }

    #[test]
    fn test_include_defines_properties_and_restores_base() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        write_part(
            &tmp.path().join("sub"),
            "part.xacro",
            r#"<xacro:property name="w" value="3"/><link name="inc"/>"#,
        );

        let (out, ctx) = run(
            tmp.path(),
            r#"<xacro:include filename="sub/part.xacro"/><v w="${w}"/>"#,
        )
        .unwrap();
        assert!(out.get_child("link").is_some());
        assert_eq!(out.get_child("v").unwrap().attributes["w"], "3");
        assert_eq!(*ctx.base_path.borrow(), tmp.path().to_path_buf());
        assert_eq!(ctx.all_includes.borrow().len(), 1);
    }

    #[test]
    fn test_optional_and_glob_without_matches() {
        let tmp = TempDir::new().unwrap();
        let (out, _) = run(
            tmp.path(),
            r#"<xacro:include filename="missing.xacro" optional="true"/>
               <xacro:include filename="parts/*.xacro"/>"#,
        )
        .unwrap();
        assert!(out.children.iter().all(|c| c.as_element().is_none()));
    }

    #[test]
    fn test_glob_includes_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        write_part(tmp.path(), "b.xacro", r#"<link name="b"/>"#);
        write_part(tmp.path(), "a.xacro", r#"<link name="a"/>"#);
        let (out, _) = run(tmp.path(), r#"<xacro:include filename="*.xacro"/>"#).unwrap();
        let names: Vec<_> = out
            .children
            .iter()
            .filter_map(XMLNode::as_element)
            .map(|e| e.attributes["name"].clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_include_is_error() {
        let tmp = TempDir::new().unwrap();
        let Err(err) = run(tmp.path(), r#"<xacro:include filename="missing.xacro"/>"#) else {
            panic!("missing include was accepted");
        };
        assert!(matches!(err, XacroError::FileIo { .. }));
    }

    #[test]
    fn test_circular_include() {
        let tmp = TempDir::new().unwrap();
        write_part(tmp.path(), "loop.xacro", r#"<xacro:include filename="loop.xacro"/>"#);
        let Err(err) = run(tmp.path(), r#"<xacro:include filename="loop.xacro"/>"#) else {
            panic!("circular include was accepted");
        };
        assert!(matches!(err, XacroError::Include(ref msg) if msg.contains("Circular")));
    }
}
