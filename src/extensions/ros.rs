//! `$(find pkg)` backed by a [`PackageFinder`].

use crate::extensions::{extension_utils, ExtensionHandler};
use crate::packages::PackageFinder;
use std::error::Error as StdError;

/// Resolves `$(find pkg)` to the absolute package directory.
///
/// Lookup failures surface as [`crate::XacroError::PackageNotFound`] so
/// callers can tell a missing package apart from other errors.
pub struct FindExtension {
    finder: PackageFinder,
}

impl FindExtension {
    pub fn new(finder: PackageFinder) -> Self {
        Self { finder }
    }
}

impl Default for FindExtension {
    fn default() -> Self {
        Self::new(PackageFinder::global())
    }
}

impl ExtensionHandler for FindExtension {
    fn resolve(
        &self,
        command: &str,
        args_raw: &str,
    ) -> Result<Option<String>, Box<dyn StdError>> {
        if command != "find" {
            return Ok(None);
        }

        let args = extension_utils::expect_args(args_raw, "find", 1)?;
        let path = self.finder.get_path(&args[0])?;
        Ok(Some(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XacroError;

    #[test]
    fn test_find_uses_finder_cache() {
        let tmp = tempfile::TempDir::new().unwrap();
        let finder = PackageFinder::new();
        finder.update_package_cache([("my_pkg", tmp.path())]);

        let ext = FindExtension::new(finder);
        let resolved = ext.resolve("find", "my_pkg").unwrap().unwrap();
        assert_eq!(
            std::path::PathBuf::from(resolved),
            std::fs::canonicalize(tmp.path()).unwrap()
        );
        assert!(ext.resolve("other", "my_pkg").unwrap().is_none());
    }

    #[test]
    fn test_find_missing_package_keeps_error_kind() {
        let ext = FindExtension::new(PackageFinder::new());
        let err = ext
            .resolve("find", "xacrodoc_no_such_package")
            .unwrap_err();
        let err = err.downcast::<XacroError>().unwrap();
        assert_eq!(err.missing_package(), Some("xacrodoc_no_such_package"));
    }

    #[test]
    fn test_find_requires_one_argument() {
        let ext = FindExtension::new(PackageFinder::new());
        assert!(ext.resolve("find", "").is_err());
        assert!(ext.resolve("find", "a b").is_err());
    }
}
