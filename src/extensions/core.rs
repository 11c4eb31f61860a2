//! Filesystem and environment substitutions.

use super::{extension_utils, ExtensionHandler};
use core::cell::RefCell;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};

/// `$(cwd)`: the process working directory.
pub struct CwdExtension;

impl ExtensionHandler for CwdExtension {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        if command != "cwd" {
            return Ok(None);
        }

        if !args_raw.trim().is_empty() {
            return Err("$(cwd) does not take arguments".into());
        }

        std::env::current_dir()
            .map(|p| Some(p.display().to_string()))
            .map_err(|e| Box::new(e) as Box<dyn StdError>)
    }
}

/// `$(env VAR)`: an environment variable that must be set.
pub struct EnvExtension;

impl ExtensionHandler for EnvExtension {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        if command != "env" {
            return Ok(None);
        }

        let args = extension_utils::expect_args(args_raw, "env", 1)?;
        std::env::var(&args[0])
            .map(Some)
            .map_err(|_| format!("environment variable '{}' is not set", args[0]).into())
    }
}

/// `$(optenv VAR [default...])`: an environment variable, falling back to
/// the remaining words joined by spaces (or the empty string).
#[derive(Default)]
pub struct OptEnvExtension;

impl ExtensionHandler for OptEnvExtension {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        if command != "optenv" {
            return Ok(None);
        }

        let args = extension_utils::expect_args_range(args_raw, "optenv", 1, usize::MAX)?;
        Ok(Some(
            std::env::var(&args[0]).unwrap_or_else(|_| args[1..].join(" ")),
        ))
    }
}

/// `$(dirname)`: absolute directory of the file currently being processed.
#[derive(Default)]
pub struct DirnameExtension {
    current_file: RefCell<Option<PathBuf>>,
}

impl DirnameExtension {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtensionHandler for DirnameExtension {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        if command != "dirname" {
            return Ok(None);
        }

        if !args_raw.trim().is_empty() {
            return Err("$(dirname) does not take arguments".into());
        }

        let current = self.current_file.borrow();
        let dir = current
            .as_deref()
            .and_then(Path::parent)
            .ok_or("$(dirname) is only available while processing a file")?;
        Ok(Some(crate::packages::absolute_path(dir).display().to_string()))
    }

    fn on_file_change(
        &self,
        current_file: &Path,
    ) {
        *self.current_file.borrow_mut() = Some(current_file.to_path_buf());
    }
}
