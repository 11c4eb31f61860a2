//! Rewriting of `$(find pkg)` and `package://pkg` references into
//! filesystem paths.

use crate::{error::XacroError, packages::PackageFinder};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use xmltree::{Element, XMLNode};

/// Elements whose `filename` attribute names an asset.
pub const FILENAME_ELEMENTS: &[&str] = &["mesh", "material"];

pub const PACKAGE_PROTOCOL: &str = "package://";
pub const FILE_PROTOCOL: &str = "file://";

static PACKAGE_URI_REGEX: OnceLock<Regex> = OnceLock::new();
static FIND_REGEX: OnceLock<Regex> = OnceLock::new();

fn package_uri_regex() -> &'static Regex {
    PACKAGE_URI_REGEX.get_or_init(|| Regex::new(r"package://([\w-]+)").unwrap())
}

fn find_regex() -> &'static Regex {
    FIND_REGEX.get_or_init(|| Regex::new(r"\$\(find\s+([\w-]+)\s*\)").unwrap())
}

/// Forward slashes regardless of platform, as written into URDF.
pub(crate) fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `Regex::replace_all` with a fallible replacement.
fn try_replace_all(
    re: &Regex,
    text: &str,
    mut replacement: impl FnMut(&Captures) -> Result<String, XacroError>,
) -> Result<String, XacroError> {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        result.push_str(&text[last..whole.start]);
        result.push_str(&replacement(&caps)?);
        last = whole.end;
    }
    result.push_str(&text[last..]);
    Ok(result)
}

/// Replace every `package://NAME` with the package's absolute directory.
pub fn resolve_package_protocol(
    text: &str,
    finder: &PackageFinder,
) -> Result<String, XacroError> {
    try_replace_all(package_uri_regex(), text, |caps| {
        Ok(posix(&finder.get_path(&caps[1])?))
    })
}

/// Replace every `$(find NAME)` with the package's absolute directory.
pub fn resolve_find_directives(
    text: &str,
    finder: &PackageFinder,
) -> Result<String, XacroError> {
    try_replace_all(find_regex(), text, |caps| Ok(posix(&finder.get_path(&caps[1])?)))
}

/// `mesh` and `material` elements with a `filename`, in document order.
pub fn elements_with_filenames(root: &Element) -> Vec<&Element> {
    let mut found = Vec::new();
    collect_filename_elements(root, &mut found);
    found
}

fn collect_filename_elements<'a>(
    elem: &'a Element,
    found: &mut Vec<&'a Element>,
) {
    if FILENAME_ELEMENTS.contains(&elem.name.as_str()) && elem.attributes.contains_key("filename") {
        found.push(elem);
    }
    for child in elem.children.iter().filter_map(XMLNode::as_element) {
        collect_filename_elements(child, found);
    }
}

/// Apply `f` to every asset `filename` attribute, in document order.
pub(crate) fn for_each_filename_mut<F>(
    elem: &mut Element,
    f: &mut F,
) -> Result<(), XacroError>
where
    F: FnMut(&mut String) -> Result<(), XacroError>,
{
    if FILENAME_ELEMENTS.contains(&elem.name.as_str()) {
        if let Some(filename) = elem.attributes.get_mut("filename") {
            f(filename)?;
        }
    }
    for child in elem.children.iter_mut().filter_map(XMLNode::as_mut_element) {
        for_each_filename_mut(child, f)?;
    }
    Ok(())
}

/// Turn `package://NAME/...` asset filenames into `file:///abs/...`.
pub fn resolve_package_uris(
    root: &mut Element,
    finder: &PackageFinder,
) -> Result<(), XacroError> {
    for_each_filename_mut(root, &mut |filename| {
        if !filename.starts_with(PACKAGE_PROTOCOL) {
            return Ok(());
        }
        let Some(pkg) = package_uri_regex()
            .captures(filename)
            .map(|caps| caps[1].to_string())
        else {
            return Ok(());
        };
        let abs = posix(&finder.get_path(&pkg)?);
        *filename = filename.replace(
            &format!("{}{}", PACKAGE_PROTOCOL, pkg),
            &format!("{}{}", FILE_PROTOCOL, abs),
        );
        Ok(())
    })
}

/// Strip a leading `file://` from asset filenames.
pub fn remove_file_protocols(root: &mut Element) {
    // The closure never fails
    let _ = for_each_filename_mut(root, &mut |filename| {
        if let Some(stripped) = filename.strip_prefix(FILE_PROTOCOL) {
            *filename = stripped.to_string();
        }
        Ok(())
    });
}
