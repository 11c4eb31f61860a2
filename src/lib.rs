#![forbid(unsafe_code)]
// #![warn(clippy::pedantic)]
#![warn(clippy::alloc_instead_of_core)]
#![warn(clippy::std_instead_of_core)]

//! Compile xacro robot descriptions into URDF (and MJCF) without a ROS
//! installation.
//!
//! ```no_run
//! use xacrodoc::{packages, XacroDoc};
//!
//! # fn main() -> Result<(), xacrodoc::XacroError> {
//! packages::look_in(["/path/to/workspace/src"], 0);
//! let doc = XacroDoc::builder()
//!     .subarg("use_gripper", "true")
//!     .compile_file("robot.urdf.xacro")?;
//! doc.to_urdf_file("robot.urdf", true)?;
//! # Ok(())
//! # }
//! ```

pub mod doc;
pub mod error;
pub mod eval;
mod expand;
pub(crate) mod expander;
pub mod extensions;
pub mod mjcf;
pub mod packages;
pub mod parse;
pub mod processor;
pub mod resolve;

#[cfg(test)]
pub(crate) mod test_utils;

pub use doc::{TempUrdfFile, XacroDoc, XacroDocBuilder};
pub use error::XacroError;
pub use mjcf::{MjcfConverter, MjcfOptions, MujocoCompile};
pub use packages::PackageFinder;
pub use processor::{ProcessedDocument, XacroBuilder, XacroProcessor};

/// Process a xacro file with default settings.
pub fn process_file<P: AsRef<std::path::Path>>(path: P) -> Result<String, XacroError> {
    XacroProcessor::new().run(path)
}
