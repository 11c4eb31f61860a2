//! URDF to MJCF conversion through MuJoCo's `compile` program.
//!
//! MuJoCo reads compiler settings for URDF input from a `<mujoco><compiler/>`
//! extension element; see
//! <https://mujoco.readthedocs.io/en/stable/modeling.html#curdf>.

use crate::{error::XacroError, processor::write_element, resolve::remove_file_protocols};
use std::path::{Path, PathBuf};
use std::process::Command;
use xmltree::{Element, XMLNode};

/// Environment variable naming the converter program explicitly.
pub const COMPILE_PROGRAM_ENV: &str = "XACRODOC_MUJOCO_COMPILE";

/// Program looked up on `PATH` otherwise.
pub const COMPILE_PROGRAM: &str = "compile";

/// MuJoCo compiler options, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MjcfOptions {
    options: Vec<(String, String)>,
}

impl MjcfOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set compiler attribute `key`; setting it again replaces the value.
    pub fn option(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.options.push((key, value)),
        }
        self
    }

    pub fn strippath(
        self,
        strip: bool,
    ) -> Self {
        self.option("strippath", strip.to_string())
    }

    pub fn meshdir(
        self,
        dir: impl AsRef<Path>,
    ) -> Self {
        let dir = dir.as_ref().to_string_lossy().replace('\\', "/");
        self.option("meshdir", dir)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn count_descendants(
    elem: &Element,
    name: &str,
) -> usize {
    elem.children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|child| usize::from(child.name == name) + count_descendants(child, name))
        .sum()
}

fn find_descendant_mut<'a>(
    elem: &'a mut Element,
    name: &str,
) -> Option<&'a mut Element> {
    for child in elem.children.iter_mut().filter_map(XMLNode::as_mut_element) {
        if child.name == name {
            return Some(child);
        }
        if let Some(found) = find_descendant_mut(child, name) {
            return Some(found);
        }
    }
    None
}

/// The single `name` element below `parent`, created as its last child when
/// there is none.
fn single_descendant_mut<'a>(
    parent: &'a mut Element,
    name: &str,
) -> Result<&'a mut Element, XacroError> {
    match count_descendants(parent, name) {
        0 => parent.children.push(XMLNode::Element(Element::new(name))),
        1 => {}
        _ => return Err(XacroError::Mjcf(format!("Multiple <{}> elements found.", name))),
    }
    find_descendant_mut(parent, name)
        .ok_or_else(|| XacroError::Mjcf(format!("No <{}> element found.", name)))
}

/// Write `options` as attributes of the document's `<mujoco><compiler>`
/// element, creating either element as needed.
pub fn set_compile_options(
    root: &mut Element,
    options: &MjcfOptions,
) -> Result<(), XacroError> {
    let mujoco = single_descendant_mut(root, "mujoco")?;
    let compiler = single_descendant_mut(mujoco, "compiler")?;
    for (key, value) in options.iter() {
        compiler.attributes.insert(key.to_string(), value.to_string());
    }
    Ok(())
}

/// A URDF to MJCF converter.
pub trait MjcfConverter {
    /// Convert the URDF file `urdf` into the MJCF file `output`.
    fn convert(
        &self,
        urdf: &Path,
        output: &Path,
    ) -> Result<(), XacroError>;
}

/// MuJoCo's `compile` sample program: `compile input output`.
#[derive(Debug, Clone)]
pub struct MujocoCompile {
    program: PathBuf,
}

impl MujocoCompile {
    /// Use `$XACRODOC_MUJOCO_COMPILE`, else `compile` from `PATH`.
    pub fn locate() -> Result<Self, XacroError> {
        if let Some(program) = std::env::var_os(COMPILE_PROGRAM_ENV) {
            return Ok(Self::with_program(program));
        }
        which::which(COMPILE_PROGRAM)
            .map(Self::with_program)
            .map_err(|e| {
                XacroError::MjcfUnavailable(format!(
                    "MuJoCo's '{}' program was not found ({}). Install MuJoCo or set {}.",
                    COMPILE_PROGRAM, e, COMPILE_PROGRAM_ENV
                ))
            })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl MjcfConverter for MujocoCompile {
    fn convert(
        &self,
        urdf: &Path,
        output: &Path,
    ) -> Result<(), XacroError> {
        log::debug!(
            "Running {} {} {}",
            self.program.display(),
            urdf.display(),
            output.display()
        );
        let result = Command::new(&self.program)
            .arg(urdf)
            .arg(output)
            .output()
            .map_err(|e| {
                XacroError::MjcfUnavailable(format!(
                    "failed to run '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            return Err(XacroError::MjcfConversion {
                urdf: urdf.to_path_buf(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Prepare a copy of `root` for the converter and run it with the URDF
/// written to a temporary file in `urdf_dir`. The converter resolves
/// relative asset paths against the URDF's location.
fn convert_via_temp_urdf(
    root: &Element,
    urdf_dir: &Path,
    output: &Path,
    options: &MjcfOptions,
    converter: &dyn MjcfConverter,
) -> Result<(), XacroError> {
    let mut urdf = root.clone();
    remove_file_protocols(&mut urdf);
    set_compile_options(&mut urdf, options)?;

    let temp = tempfile::Builder::new()
        .suffix(".urdf")
        .tempfile_in(urdf_dir)
        .map_err(|e| XacroError::file_io(urdf_dir, e))?;
    std::fs::write(temp.path(), write_element(&urdf, false)?)
        .map_err(|e| XacroError::file_io(temp.path(), e))?;

    converter.convert(temp.path(), output)
}

/// Convert the URDF `root` into the MJCF file `output`. Relative asset paths
/// resolve against the directory of `output`.
pub fn write_mjcf(
    root: &Element,
    output: &Path,
    options: &MjcfOptions,
    converter: &dyn MjcfConverter,
) -> Result<(), XacroError> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    convert_via_temp_urdf(root, dir, output, options, converter)
}

/// Convert the URDF `root` into an MJCF string. Relative asset paths resolve
/// against the current directory.
pub fn mjcf_string(
    root: &Element,
    options: &MjcfOptions,
    converter: &dyn MjcfConverter,
) -> Result<String, XacroError> {
    let out_dir = tempfile::TempDir::new()?;
    let output = out_dir.path().join("model.xml");
    convert_via_temp_urdf(root, Path::new("."), &output, options, converter)?;
    std::fs::read_to_string(&output).map_err(|e| XacroError::file_io(&output, e))
}
