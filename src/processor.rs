//! The xacro engine's public entry point.

use crate::{
    error::XacroError,
    expander::{expand_node, XacroContext},
    extensions::{default_extensions, ArgRegistry, ExtensionHandler},
    packages::PackageFinder,
    parse::{find_xacro_element, strip_xacro_namespaces},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use xmltree::{Element, EmitterConfig, XMLNode};

/// Result of one expansion run.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub root: Element,
    /// Every file pulled in through `<xacro:include>`, in inclusion order
    pub includes: Vec<PathBuf>,
}

/// Expands xacro documents into plain XML.
///
/// Each run starts from a clean set of properties and macros; only the
/// configured arguments, extensions and package finder carry over.
pub struct XacroProcessor {
    args: HashMap<String, String>,
    extensions: Vec<Rc<dyn ExtensionHandler>>,
    finder: PackageFinder,
    max_recursion_depth: usize,
}

pub struct XacroBuilder {
    args: HashMap<String, String>,
    extensions: Vec<Rc<dyn ExtensionHandler>>,
    finder: Option<PackageFinder>,
    max_recursion_depth: usize,
}

impl XacroBuilder {
    fn new() -> Self {
        Self {
            args: HashMap::new(),
            extensions: Vec::new(),
            finder: None,
            max_recursion_depth: XacroContext::DEFAULT_MAX_DEPTH,
        }
    }

    /// Value for `<xacro:arg name="name">`, as if given as `name:=value`.
    pub fn with_arg(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args<I, K, V>(
        mut self,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Register a `$(...)` handler. Custom handlers are consulted before the
    /// built-in ones, in registration order.
    pub fn with_extension(
        mut self,
        extension: Box<dyn ExtensionHandler>,
    ) -> Self {
        self.extensions.push(Rc::from(extension));
        self
    }

    /// Finder behind `$(find ...)`; defaults to the global finder.
    pub fn with_package_finder(
        mut self,
        finder: PackageFinder,
    ) -> Self {
        self.finder = Some(finder);
        self
    }

    pub fn with_max_recursion_depth(
        mut self,
        depth: usize,
    ) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn build(self) -> XacroProcessor {
        XacroProcessor {
            args: self.args,
            extensions: self.extensions,
            finder: self.finder.unwrap_or_else(PackageFinder::global),
            max_recursion_depth: self.max_recursion_depth,
        }
    }
}

impl Default for XacroProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl XacroProcessor {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> XacroBuilder {
        XacroBuilder::new()
    }

    /// Process the xacro file at `path` into an indented XML string.
    pub fn run<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<String, XacroError> {
        write_element(&self.process(path)?.root, true)
    }

    /// Process xacro text. Relative includes resolve against the current
    /// working directory.
    pub fn run_from_string(
        &self,
        content: &str,
    ) -> Result<String, XacroError> {
        write_element(&self.process_from_string(content)?.root, true)
    }

    /// Process xacro text whose relative includes resolve against `base_dir`.
    pub fn run_from_string_in(
        &self,
        content: &str,
        base_dir: impl AsRef<Path>,
    ) -> Result<String, XacroError> {
        write_element(&self.process_from_string_in(content, base_dir)?.root, true)
    }

    pub fn process<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<ProcessedDocument, XacroError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| XacroError::file_io(path, e))?;
        let root = Element::parse(content.as_bytes())?;
        let file = crate::packages::absolute_path(path);
        let base_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        self.process_element(root, base_dir, Some(file))
    }

    pub fn process_from_string(
        &self,
        content: &str,
    ) -> Result<ProcessedDocument, XacroError> {
        self.process_from_string_in(content, ".")
    }

    pub fn process_from_string_in(
        &self,
        content: &str,
        base_dir: impl AsRef<Path>,
    ) -> Result<ProcessedDocument, XacroError> {
        let root = Element::parse(content.as_bytes())?;
        self.process_element(root, base_dir.as_ref().to_path_buf(), None)
    }

    /// Expand an already parsed document. `file` is the document's own path,
    /// when it has one; it feeds `$(dirname)` and include cycle detection.
    pub fn process_element(
        &self,
        root: Element,
        base_dir: PathBuf,
        file: Option<PathBuf>,
    ) -> Result<ProcessedDocument, XacroError> {
        let mut args = ArgRegistry::new();
        args.extend(self.args.clone());

        let mut handlers: Vec<Box<dyn ExtensionHandler>> = self
            .extensions
            .iter()
            .map(|ext| Box::new(Rc::clone(ext)) as Box<dyn ExtensionHandler>)
            .collect();
        handlers.extend(default_extensions(self.finder.clone()));

        let mut ctx = XacroContext::new(base_dir, args, Rc::new(handlers));
        ctx.set_max_recursion_depth(self.max_recursion_depth);

        if let Some(file) = &file {
            log::debug!("Processing {}", file.display());
            ctx.include_stack.borrow_mut().push(file.clone());
            *ctx.current_file.borrow_mut() = Some(file.clone());
            ctx.notify_file_change(file);
        }

        let mut expanded = expand_node(XMLNode::Element(root), &ctx)?;
        let mut root = match (expanded.pop(), expanded.is_empty()) {
            (Some(XMLNode::Element(root)), true) => root,
            _ => return Err(XacroError::InvalidRoot),
        };

        Self::finalize_tree(&mut root)?;
        let includes = ctx.all_includes.take();
        Ok(ProcessedDocument { root, includes })
    }

    /// Reject leftover xacro elements and drop the xacro namespace
    /// declarations.
    fn finalize_tree(root: &mut Element) -> Result<(), XacroError> {
        if let Some(elem) = find_xacro_element(root) {
            return Err(XacroError::UnprocessedElement(elem.name.clone()));
        }
        strip_xacro_namespaces(root);
        Ok(())
    }
}

/// Serialize `root` as an XML document, indented with two spaces when
/// `pretty`.
pub fn write_element(
    root: &Element,
    pretty: bool,
) -> Result<String, XacroError> {
    let config = EmitterConfig::new()
        .perform_indent(pretty)
        .indent_string("  ")
        .pad_self_closing(false)
        .write_document_declaration(true);

    let mut writer = Vec::new();
    root.write_with_config(&mut writer, config)?;
    let mut xml = String::from_utf8(writer)?;
    if pretty && !xml.ends_with('\n') {
        xml.push('\n');
    }
    Ok(xml)
}
