//! [`XacroDoc`]: compile xacro into a URDF document and write it out as
//! URDF or MJCF.

use crate::{
    error::XacroError,
    mjcf::{mjcf_string, set_compile_options, write_mjcf, MjcfConverter, MjcfOptions, MujocoCompile},
    packages::{absolute_path, PackageFinder},
    parse::XACRO_NAMESPACE,
    processor::{write_element, XacroProcessor},
    resolve::{
        for_each_filename_mut, posix, remove_file_protocols, resolve_find_directives,
        resolve_package_uris, FILE_PROTOCOL,
    },
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use xmltree::Element;

pub const DEFAULT_MAX_RUNS: usize = 10;

/// Attempts at a numbered variant of a clashing asset name.
const MAX_UNIQUE_NAME_ATTEMPTS: usize = 100;

/// Options for compiling a [`XacroDoc`].
#[derive(Debug, Clone)]
pub struct XacroDocBuilder {
    subargs: HashMap<String, String>,
    max_runs: usize,
    resolve_packages: bool,
    remove_protocols: bool,
    walk_up: bool,
    finder: Option<PackageFinder>,
}

impl Default for XacroDocBuilder {
    fn default() -> Self {
        Self {
            subargs: HashMap::new(),
            max_runs: DEFAULT_MAX_RUNS,
            resolve_packages: true,
            remove_protocols: false,
            walk_up: true,
            finder: None,
        }
    }
}

impl XacroDocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `<xacro:arg name="name">`, like `name:=value` on the
    /// command line. `$(find pkg)` inside `value` is resolved.
    pub fn subarg(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.subargs.insert(name.into(), value.into());
        self
    }

    pub fn subargs<I, K, V>(
        mut self,
        subargs: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.subargs
            .extend(subargs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Upper bound on the number of compilation passes.
    pub fn max_runs(
        mut self,
        max_runs: usize,
    ) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// Rewrite `package://` asset filenames as `file://` paths (default on).
    pub fn resolve_packages(
        mut self,
        resolve: bool,
    ) -> Self {
        self.resolve_packages = resolve;
        self
    }

    /// Strip `file://` from asset filenames after compiling (default off).
    pub fn remove_protocols(
        mut self,
        remove: bool,
    ) -> Self {
        self.remove_protocols = remove;
        self
    }

    /// Let file input register a package search through its ancestor
    /// directories (default on).
    pub fn walk_up(
        mut self,
        walk_up: bool,
    ) -> Self {
        self.walk_up = walk_up;
        self
    }

    /// Finder for `$(find)` and `package://`; defaults to the global one.
    pub fn package_finder(
        mut self,
        finder: PackageFinder,
    ) -> Self {
        self.finder = Some(finder);
        self
    }

    /// Compile xacro text. Relative includes resolve against the current
    /// directory.
    pub fn compile_text(
        &self,
        text: &str,
    ) -> Result<XacroDoc, XacroError> {
        self.compile(text, PathBuf::from("."), None)
    }

    pub fn compile_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<XacroDoc, XacroError> {
        let path = path.as_ref();
        if self.walk_up {
            self.finder().walk_up_from(path, 0);
        }
        let text = fs::read_to_string(path).map_err(|e| XacroError::file_io(path, e))?;
        let file = absolute_path(path);
        let base_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        self.compile(&text, base_dir, Some(file))
    }

    /// Compile the file at `relative_path` inside package `package`.
    pub fn compile_package_file(
        &self,
        package: &str,
        relative_path: impl AsRef<Path>,
    ) -> Result<XacroDoc, XacroError> {
        let path = self.finder().get_file_path(package, relative_path)?;
        self.compile_file(path)
    }

    /// Compile a document made of nothing but `<xacro:include>` directives,
    /// one per entry of `includes`, under `<robot name="name">`. Entries may
    /// use substitutions such as `$(find pkg)`.
    pub fn compile_includes<I, S>(
        &self,
        includes: I,
        name: &str,
    ) -> Result<XacroDoc, XacroError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><robot name="{}" xmlns:xacro="{}">"#,
            escape_attribute(name),
            XACRO_NAMESPACE
        );
        for include in includes {
            text.push_str(&format!(
                r#"<xacro:include filename="{}"/>"#,
                escape_attribute(include.as_ref())
            ));
        }
        text.push_str("</robot>");
        self.compile_text(&text)
    }

    fn finder(&self) -> PackageFinder {
        self.finder.clone().unwrap_or_else(PackageFinder::global)
    }

    fn compile(
        &self,
        text: &str,
        base_dir: PathBuf,
        file: Option<PathBuf>,
    ) -> Result<XacroDoc, XacroError> {
        let finder = self.finder();

        let mut subargs = HashMap::with_capacity(self.subargs.len());
        for (name, value) in &self.subargs {
            subargs.insert(name.clone(), resolve_find_directives(value, &finder)?);
        }

        let processor = XacroProcessor::builder()
            .with_args(subargs)
            .with_package_finder(finder.clone())
            .build();

        let mut root =
            compile_to_fixed_point(&processor, text, &base_dir, file.as_deref(), self.max_runs)?;
        if self.resolve_packages {
            resolve_package_uris(&mut root, &finder)?;
        }
        if self.remove_protocols {
            remove_file_protocols(&mut root);
        }
        Ok(XacroDoc { root })
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Process `text` until a pass leaves the serialized document unchanged.
///
/// Passes stop once `max_runs` is reached; running out of passes is an error.
fn compile_to_fixed_point(
    processor: &XacroProcessor,
    text: &str,
    base_dir: &Path,
    file: Option<&Path>,
    max_runs: usize,
) -> Result<Element, XacroError> {
    let mut root = Element::parse(text.as_bytes())?;
    let mut previous = write_element(&root, false)?;

    let mut run = 1;
    while run < max_runs {
        log::debug!("Compilation pass {}", run);
        root = processor
            .process_element(root, base_dir.to_path_buf(), file.map(Path::to_path_buf))?
            .root;
        let current = write_element(&root, false)?;
        if current == previous {
            break;
        }
        previous = current;
        run += 1;
    }

    if run >= max_runs {
        return Err(XacroError::NotConverged { max_runs });
    }
    Ok(root)
}

/// `name`, or `stem_NNN.ext` with the first free counter when `name` is taken.
fn make_name_unique(
    name: &str,
    existing: &HashSet<String>,
) -> Result<String, XacroError> {
    if !existing.contains(name) {
        return Ok(name.to_string());
    }

    let path = Path::new(name);
    let stem = path.file_stem().map_or_else(|| name.into(), |s| s.to_string_lossy());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..=MAX_UNIQUE_NAME_ATTEMPTS)
        .map(|count| format!("{}_{:03}{}", stem, count, ext))
        .find(|candidate| !existing.contains(candidate))
        .ok_or_else(|| XacroError::AssetName(name.to_string()))
}

/// A compiled URDF document.
#[derive(Debug, Clone)]
pub struct XacroDoc {
    root: Element,
}

impl XacroDoc {
    pub fn builder() -> XacroDocBuilder {
        XacroDocBuilder::new()
    }

    pub fn from_text(text: &str) -> Result<Self, XacroError> {
        XacroDocBuilder::new().compile_text(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, XacroError> {
        XacroDocBuilder::new().compile_file(path)
    }

    pub fn from_package_file(
        package: &str,
        relative_path: impl AsRef<Path>,
    ) -> Result<Self, XacroError> {
        XacroDocBuilder::new().compile_package_file(package, relative_path)
    }

    pub fn from_includes<I, S>(
        includes: I,
        name: &str,
    ) -> Result<Self, XacroError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        XacroDocBuilder::new().compile_includes(includes, name)
    }

    /// The URDF document tree.
    pub fn dom(&self) -> &Element {
        &self.root
    }

    pub fn dom_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn to_urdf_string(
        &self,
        pretty: bool,
    ) -> Result<String, XacroError> {
        write_element(&self.root, pretty)
    }

    /// Write the pretty-printed URDF to `path` and report whether the file
    /// was written.
    ///
    /// With `compare_existing`, an existing file that already holds exactly
    /// this URDF is left alone, which keeps concurrent writers of the same
    /// document from racing.
    pub fn to_urdf_file(
        &self,
        path: impl AsRef<Path>,
        compare_existing: bool,
    ) -> Result<bool, XacroError> {
        let path = path.as_ref();
        let urdf = self.to_urdf_string(true)?;

        if compare_existing && path.exists() {
            let existing = fs::read_to_string(path).map_err(|e| XacroError::file_io(path, e))?;
            if existing == urdf {
                log::info!("URDF files are the same - not writing.");
                return Ok(false);
            }
            log::info!("URDF files are not the same - writing.");
        }

        fs::write(path, urdf).map_err(|e| XacroError::file_io(path, e))?;
        Ok(true)
    }

    /// Write the URDF to a new temporary file that the caller must delete.
    pub fn to_temp_urdf_file(&self) -> Result<PathBuf, XacroError> {
        let temp = self.temp_urdf_file_path()?;
        temp.path.keep().map_err(|e| XacroError::Io(e.error))
    }

    /// Write the URDF to a temporary file deleted when the guard drops.
    pub fn temp_urdf_file_path(&self) -> Result<TempUrdfFile, XacroError> {
        let path = tempfile::Builder::new()
            .suffix(".urdf")
            .tempfile()?
            .into_temp_path();
        self.to_urdf_file(&path, false)?;
        Ok(TempUrdfFile { path })
    }

    /// Copy every referenced asset into `asset_dir` and point the document
    /// at the copies.
    ///
    /// Copies keep their file names; clashing names from different sources
    /// get numbered variants.
    pub fn localize_assets(
        &mut self,
        asset_dir: impl AsRef<Path>,
    ) -> Result<(), XacroError> {
        let asset_dir = asset_dir.as_ref();
        fs::create_dir_all(asset_dir).map_err(|e| XacroError::file_io(asset_dir, e))?;
        let asset_dir = absolute_path(asset_dir);

        let mut basenames = HashSet::new();
        let mut path_map: HashMap<String, String> = HashMap::new();
        let mut copies = Vec::new();

        for_each_filename_mut(&mut self.root, &mut |filename| {
            let source = filename
                .strip_prefix(FILE_PROTOCOL)
                .unwrap_or(filename.as_str())
                .to_string();

            let basename = match path_map.get(&source) {
                Some(basename) => basename.clone(),
                None => {
                    let name = Path::new(&source)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| source.clone());
                    let basename = make_name_unique(&name, &basenames)?;
                    basenames.insert(basename.clone());
                    path_map.insert(source.clone(), basename.clone());
                    copies.push((source, basename.clone()));
                    basename
                }
            };

            *filename = format!("{}{}", FILE_PROTOCOL, posix(&asset_dir.join(basename)));
            Ok(())
        })?;

        for (source, basename) in copies {
            let target = asset_dir.join(&basename);
            log::debug!("Copying {} to {}", source, target.display());
            fs::copy(&source, &target).map_err(|e| XacroError::file_io(&source, e))?;
        }
        Ok(())
    }

    /// Strip `file://` from asset filenames.
    pub fn remove_protocols(&mut self) {
        remove_file_protocols(&mut self.root);
    }

    /// Set MuJoCo compiler options in the document's `<mujoco>` extension.
    pub fn add_mujoco_extension(
        &mut self,
        options: &MjcfOptions,
    ) -> Result<(), XacroError> {
        set_compile_options(&mut self.root, options)
    }

    /// Convert to MJCF with MuJoCo's `compile` program and write it to
    /// `path`. Relative asset paths resolve against the directory of `path`.
    pub fn to_mjcf_file(
        &self,
        path: impl AsRef<Path>,
        options: &MjcfOptions,
    ) -> Result<(), XacroError> {
        self.to_mjcf_file_with(path, options, &MujocoCompile::locate()?)
    }

    pub fn to_mjcf_file_with(
        &self,
        path: impl AsRef<Path>,
        options: &MjcfOptions,
        converter: &dyn MjcfConverter,
    ) -> Result<(), XacroError> {
        write_mjcf(&self.root, path.as_ref(), options, converter)?;
        log::info!("Wrote MJCF to {}", path.as_ref().display());
        Ok(())
    }

    pub fn to_mjcf_string(
        &self,
        options: &MjcfOptions,
    ) -> Result<String, XacroError> {
        self.to_mjcf_string_with(options, &MujocoCompile::locate()?)
    }

    pub fn to_mjcf_string_with(
        &self,
        options: &MjcfOptions,
        converter: &dyn MjcfConverter,
    ) -> Result<String, XacroError> {
        mjcf_string(&self.root, options, converter)
    }
}

/// A temporary URDF file, deleted on drop.
#[derive(Debug)]
pub struct TempUrdfFile {
    path: tempfile::TempPath,
}

impl TempUrdfFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TempUrdfFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl core::ops::Deref for TempUrdfFile {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = r#"<robot name="r" xmlns:xacro="http://www.ros.org/wiki/xacro">"#;

    fn isolated() -> XacroDocBuilder {
        XacroDocBuilder::new().package_finder(PackageFinder::new())
    }

    #[test]
    fn test_make_name_unique() {
        let mut existing = HashSet::new();
        assert_eq!(make_name_unique("a.stl", &existing).unwrap(), "a.stl");
        existing.insert("a.stl".to_string());
        existing.insert("a_001.stl".to_string());
        assert_eq!(make_name_unique("a.stl", &existing).unwrap(), "a_002.stl");

        let full: HashSet<String> = std::iter::once("b".to_string())
            .chain((1..=100).map(|i| format!("b_{:03}", i)))
            .collect();
        assert!(matches!(make_name_unique("b", &full), Err(XacroError::AssetName(_))));
    }

    #[test]
    fn test_max_runs_bounds_compilation() {
        let text = format!(r#"{}<link name="a"/></robot>"#, HEADER);
        assert!(isolated().max_runs(3).compile_text(&text).is_ok());
        assert!(matches!(
            isolated().max_runs(2).compile_text(&text),
            Err(XacroError::NotConverged { max_runs: 2 })
        ));
    }

    #[test]
    fn test_escaped_expression_is_evaluated_on_next_pass() {
        let text = format!(
            r#"{}<xacro:property name="x" value="2"/><link name="$${{x}}"/></robot>"#,
            HEADER
        );
        // The first pass turns $${x} into ${x} and drops the property
        assert!(matches!(
            isolated().compile_text(&text),
            Err(XacroError::UndefinedProperty(_))
        ));
    }

    #[test]
    fn test_urdf_file_compare_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("robot.urdf");
        let doc = isolated()
            .compile_text(&format!(r#"{}<link name="a"/></robot>"#, HEADER))
            .unwrap();

        assert!(doc.to_urdf_file(&path, true).unwrap());
        assert!(!doc.to_urdf_file(&path, true).unwrap());
        assert!(doc.to_urdf_file(&path, false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), doc.to_urdf_string(true).unwrap());
    }

    #[test]
    fn test_temp_urdf_files() {
        let doc = isolated()
            .compile_text(&format!(r#"{}<link name="a"/></robot>"#, HEADER))
            .unwrap();

        let kept = doc.to_temp_urdf_file().unwrap();
        assert!(kept.exists());
        fs::remove_file(&kept).unwrap();

        let guard_path = {
            let guard = doc.temp_urdf_file_path().unwrap();
            assert!(fs::read_to_string(guard.path()).unwrap().contains("<link"));
            guard.path().to_path_buf()
        };
        assert!(!guard_path.exists());
    }

    #[test]
    fn test_localize_assets_renames_collisions() {
        let tmp = TempDir::new().unwrap();
        for dir in ["a", "b"] {
            fs::create_dir(tmp.path().join(dir)).unwrap();
            fs::write(tmp.path().join(dir).join("mesh.stl"), dir).unwrap();
        }
        let a = posix(&tmp.path().join("a/mesh.stl"));
        let b = posix(&tmp.path().join("b/mesh.stl"));
        let text = format!(
            r#"{}<link><mesh filename="file://{a}"/><mesh filename="{b}"/><mesh filename="{a}"/></link></robot>"#,
            HEADER
        );
        let mut doc = isolated().compile_text(&text).unwrap();

        let assets = tmp.path().join("assets");
        doc.localize_assets(&assets).unwrap();

        let assets = absolute_path(&assets);
        let filenames: Vec<_> = crate::resolve::elements_with_filenames(doc.dom())
            .iter()
            .map(|e| e.attributes["filename"].clone())
            .collect();
        assert_eq!(
            filenames,
            vec![
                format!("file://{}", posix(&assets.join("mesh.stl"))),
                format!("file://{}", posix(&assets.join("mesh_001.stl"))),
                format!("file://{}", posix(&assets.join("mesh.stl"))),
            ]
        );
        assert_eq!(fs::read_to_string(assets.join("mesh.stl")).unwrap(), "a");
        assert_eq!(fs::read_to_string(assets.join("mesh_001.stl")).unwrap(), "b");
    }
}
