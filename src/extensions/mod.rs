//! `$(command args...)` substitutions.
//!
//! Handlers are tried in registration order; the first one that recognizes
//! the command answers. `$(arg ...)` never reaches the handlers since it reads
//! the processor's own argument registry.

pub(crate) mod core;
pub(crate) mod ros;

pub use self::core::{CwdExtension, DirnameExtension, EnvExtension, OptEnvExtension};
pub use self::ros::FindExtension;

use crate::packages::PackageFinder;
use ::core::cell::RefCell;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::rc::Rc;

/// Resolver for one or more `$(command ...)` verbs.
///
/// Processing is single-threaded, so handlers may keep `RefCell` state.
pub trait ExtensionHandler {
    /// Resolve `$(command args_raw)`.
    ///
    /// Returns `Ok(None)` when `command` belongs to some other handler and
    /// `Err` when the command is recognized but cannot be resolved. Returning
    /// a boxed [`crate::XacroError`] passes that error through unchanged.
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>>;

    /// Called whenever processing moves into another file, including the
    /// return from an include.
    fn on_file_change(
        &self,
        _current_file: &std::path::Path,
    ) {
    }
}

impl<T: ExtensionHandler + ?Sized> ExtensionHandler for Rc<T> {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        (**self).resolve(command, args_raw)
    }

    fn on_file_change(
        &self,
        current_file: &std::path::Path,
    ) {
        (**self).on_file_change(current_file);
    }
}

/// Handlers every processor starts with, after any custom ones.
pub(crate) fn default_extensions(finder: PackageFinder) -> Vec<Box<dyn ExtensionHandler>> {
    vec![
        Box::new(FindExtension::new(finder)),
        Box::new(EnvExtension),
        Box::new(OptEnvExtension),
        Box::new(CwdExtension),
        Box::new(DirnameExtension::new()),
    ]
}

/// Substitution arguments shared between the processor, `<xacro:arg>` and
/// `$(arg ...)`. Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct ArgRegistry(Rc<RefCell<HashMap<String, String>>>);

impl ArgRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn extend(
        &mut self,
        args: HashMap<String, String>,
    ) {
        self.0.borrow_mut().extend(args);
    }
}

pub(crate) mod extension_utils {
    use std::error::Error as StdError;

    /// Whitespace tokenization; quotes carry no meaning.
    pub(crate) fn tokenize_args(s: &str) -> Vec<String> {
        s.split_whitespace().map(|s| s.to_string()).collect()
    }

    pub(crate) fn expect_args(
        raw: &str,
        cmd: &str,
        expected: usize,
    ) -> Result<Vec<String>, Box<dyn StdError>> {
        let args = tokenize_args(raw);
        if args.len() != expected {
            Err(format!(
                "$({}) expects {} argument(s), got {}",
                cmd,
                expected,
                args.len()
            )
            .into())
        } else {
            Ok(args)
        }
    }

    pub(crate) fn expect_args_range(
        raw: &str,
        cmd: &str,
        min: usize,
        max: usize,
    ) -> Result<Vec<String>, Box<dyn StdError>> {
        let args = tokenize_args(raw);
        if args.len() < min || args.len() > max {
            Err(format!(
                "$({}) expects {}-{} arguments, got {}",
                cmd,
                min,
                max,
                args.len()
            )
            .into())
        } else {
            Ok(args)
        }
    }
}
