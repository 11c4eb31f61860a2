//! Locating ROS-style packages without a ROS installation.
//!
//! A package is a directory holding a `package.xml` (or the legacy
//! `manifest.xml`). A [`PackageFinder`] asks an ordered chain of sources for
//! a package and memoizes every hit. The default chain only consults the
//! environment (`ROS_PACKAGE_PATH`, `AMENT_PREFIX_PATH`); callers add search
//! roots with [`PackageFinder::look_in`] or ancestor walks with
//! [`PackageFinder::walk_up_from`].

use crate::error::XacroError;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use walkdir::WalkDir;
use xmltree::{Element, XMLNode};

pub const PACKAGE_FILE: &str = "package.xml";
pub const MANIFEST_FILE: &str = "manifest.xml";

/// Marker files that exclude a directory tree from package crawling.
const IGNORE_MARKERS: &[&str] = &["CATKIN_IGNORE", "COLCON_IGNORE", "AMENT_IGNORE"];

#[derive(Debug)]
enum PackageSource {
    /// Recursive crawl of search roots, indexed on first lookup
    Roots {
        dirs: Vec<PathBuf>,
        index: Option<HashMap<String, PathBuf>>,
    },
    /// Ancestors of a (canonical) start path
    WalkUp(PathBuf),
    /// `ROS_PACKAGE_PATH` roots plus ament install prefixes
    Environment {
        index: Option<HashMap<String, PathBuf>>,
    },
}

impl PackageSource {
    fn find(
        &mut self,
        pkg: &str,
    ) -> Result<Option<PathBuf>, XacroError> {
        match self {
            PackageSource::Roots { dirs, index } => {
                let index = index.get_or_insert_with(|| crawl_roots(dirs));
                Ok(index.get(pkg).cloned())
            }
            PackageSource::WalkUp(start) => walk_up(start, pkg),
            PackageSource::Environment { index } => {
                let index = index.get_or_insert_with(|| {
                    let roots = env::var_os("ROS_PACKAGE_PATH")
                        .map(|v| env::split_paths(&v).collect::<Vec<_>>())
                        .unwrap_or_default();
                    crawl_roots(&roots)
                });
                if let Some(path) = index.get(pkg) {
                    return Ok(Some(path.clone()));
                }
                Ok(find_in_ament_prefixes(pkg))
            }
        }
    }

    fn clear_index(&mut self) {
        match self {
            PackageSource::Roots { index, .. } | PackageSource::Environment { index } => {
                *index = None;
            }
            PackageSource::WalkUp(_) => {}
        }
    }
}

#[derive(Debug)]
struct FinderState {
    sources: Vec<PackageSource>,
    cache: HashMap<String, PathBuf>,
}

impl FinderState {
    fn with_defaults() -> Self {
        Self {
            sources: vec![PackageSource::Environment { index: None }],
            cache: HashMap::new(),
        }
    }

    fn insert_source(
        &mut self,
        priority: usize,
        source: PackageSource,
    ) {
        let at = priority.min(self.sources.len());
        self.sources.insert(at, source);
    }
}

/// Ordered chain of package lookups with a shared result cache.
///
/// Clones share state, so a finder handed to a processor sees search roots
/// added later through the original handle.
#[derive(Clone, Debug)]
pub struct PackageFinder {
    state: Arc<Mutex<FinderState>>,
}

static GLOBAL_FINDER: OnceLock<PackageFinder> = OnceLock::new();

impl PackageFinder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FinderState::with_defaults())),
        }
    }

    /// The process-wide finder used when no other finder is configured.
    pub fn global() -> PackageFinder {
        GLOBAL_FINDER.get_or_init(PackageFinder::new).clone()
    }

    fn lock(&self) -> MutexGuard<'_, FinderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Search `paths` recursively for packages. Lower `priority` values are
    /// consulted earlier; 0 puts this source in front of all others.
    pub fn look_in<I, P>(
        &self,
        paths: I,
        priority: usize,
    ) where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let dirs: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| absolute_path(p.as_ref()))
            .collect();
        log::debug!("Adding package search roots {:?} at priority {}", dirs, priority);
        self.lock()
            .insert_source(priority, PackageSource::Roots { dirs, index: None });
    }

    /// Look for packages in the ancestors of `path`.
    pub fn walk_up_from(
        &self,
        path: impl AsRef<Path>,
        priority: usize,
    ) {
        let start = absolute_path(path.as_ref());
        log::debug!("Walking up from {} for packages at priority {}", start.display(), priority);
        self.lock()
            .insert_source(priority, PackageSource::WalkUp(start));
    }

    /// Directory of package `pkg`.
    pub fn get_path(
        &self,
        pkg: &str,
    ) -> Result<PathBuf, XacroError> {
        let mut state = self.lock();
        if let Some(path) = state.cache.get(pkg) {
            return Ok(path.clone());
        }

        for source in state.sources.iter_mut() {
            if let Some(path) = source.find(pkg)? {
                log::debug!("Found package '{}' at {}", pkg, path.display());
                state.cache.insert(pkg.to_string(), path.clone());
                return Ok(path);
            }
        }

        Err(XacroError::PackageNotFound(pkg.to_string()))
    }

    /// Path of `relative` inside package `pkg`. The file need not exist.
    pub fn get_file_path(
        &self,
        pkg: &str,
        relative: impl AsRef<Path>,
    ) -> Result<PathBuf, XacroError> {
        Ok(self.get_path(pkg)?.join(relative))
    }

    /// Record package locations directly. The directories need not contain a
    /// package manifest.
    pub fn update_package_cache<I, S, P>(
        &self,
        entries: I,
    ) where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: AsRef<Path>,
    {
        let mut state = self.lock();
        for (name, path) in entries {
            state.cache.insert(name.into(), absolute_path(path.as_ref()));
        }
    }

    /// Forget every added source and cached location.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = FinderState::with_defaults();
    }

    /// Drop crawl indices so the next lookup rescans the filesystem.
    /// Cached hits are kept.
    pub fn rescan(&self) {
        for source in self.lock().sources.iter_mut() {
            source.clear_index();
        }
    }
}

impl Default for PackageFinder {
    fn default() -> Self {
        Self::new()
    }
}

/// Add search roots to the global finder.
pub fn look_in<I, P>(
    paths: I,
    priority: usize,
) where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    PackageFinder::global().look_in(paths, priority);
}

/// Add an ancestor walk to the global finder.
pub fn walk_up_from(
    path: impl AsRef<Path>,
    priority: usize,
) {
    PackageFinder::global().walk_up_from(path, priority);
}

pub fn get_path(pkg: &str) -> Result<PathBuf, XacroError> {
    PackageFinder::global().get_path(pkg)
}

pub fn get_file_path(
    pkg: &str,
    relative: impl AsRef<Path>,
) -> Result<PathBuf, XacroError> {
    PackageFinder::global().get_file_path(pkg, relative)
}

pub fn update_package_cache<I, S, P>(entries: I)
where
    I: IntoIterator<Item = (S, P)>,
    S: Into<String>,
    P: AsRef<Path>,
{
    PackageFinder::global().update_package_cache(entries);
}

/// Restore the global finder to its default sources.
pub fn reset() {
    PackageFinder::global().reset();
}

/// Absolute, canonical when the path exists.
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn collect_name_elements<'a>(
    element: &'a Element,
    out: &mut Vec<&'a Element>,
) {
    for child in element.children.iter().filter_map(XMLNode::as_element) {
        if child.name == "name" {
            out.push(child);
        }
        collect_name_elements(child, out);
    }
}

/// Package name declared by a `package.xml`, which must contain exactly one
/// `<name>` element.
pub fn read_package_name(manifest: &Path) -> Result<String, XacroError> {
    let invalid = |reason: String| XacroError::InvalidPackageManifest {
        path: manifest.to_path_buf(),
        reason,
    };

    let file = fs::File::open(manifest).map_err(|e| XacroError::file_io(manifest, e))?;
    let root = Element::parse(file).map_err(|e| invalid(e.to_string()))?;

    let mut names = Vec::new();
    if root.name == "name" {
        names.push(&root);
    }
    collect_name_elements(&root, &mut names);

    match names.as_slice() {
        [name] => Ok(name
            .get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default()),
        _ => Err(invalid(format!(
            "expected one <name> element, found {}",
            names.len()
        ))),
    }
}

/// Name of the package rooted at `dir`, if it is one.
fn package_name_of(dir: &Path) -> Option<String> {
    let manifest = dir.join(PACKAGE_FILE);
    if manifest.is_file() {
        return match read_package_name(&manifest) {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Skipping package at {}: {}", dir.display(), e);
                None
            }
        };
    }
    if dir.join(MANIFEST_FILE).is_file() {
        return dir.file_name().map(|n| n.to_string_lossy().into_owned());
    }
    None
}

fn is_ignored_dir(dir: &Path) -> bool {
    IGNORE_MARKERS.iter().any(|marker| dir.join(marker).exists())
}

/// Index every package below `roots`. Earlier roots take precedence.
fn crawl_roots(roots: &[PathBuf]) -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();

    for root in roots {
        if !root.is_dir() {
            log::debug!("Package search root {} is not a directory", root.display());
            continue;
        }

        let mut walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.file_type().is_dir()
                    && (e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
                    && !is_ignored_dir(e.path())
            });

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry while crawling: {}", e);
                    continue;
                }
            };

            if let Some(name) = package_name_of(entry.path()) {
                let path = absolute_path(entry.path());
                index.entry(name).or_insert(path);
                walker.skip_current_dir();
            }
        }
    }

    log::debug!("Indexed {} package(s) under {:?}", index.len(), roots);
    index
}

/// Check `start` and each of its ancestors (excluding the filesystem root)
/// for package `pkg`.
fn walk_up(
    start: &Path,
    pkg: &str,
) -> Result<Option<PathBuf>, XacroError> {
    for dir in start.ancestors().filter(|d| d.parent().is_some()) {
        let manifest = dir.join(PACKAGE_FILE);
        if manifest.is_file() && read_package_name(&manifest)? == pkg {
            return Ok(Some(dir.to_path_buf()));
        }

        let legacy = dir.join(MANIFEST_FILE);
        if legacy.is_file() && dir.file_name().is_some_and(|n| n == pkg) {
            return Ok(Some(dir.to_path_buf()));
        }
    }
    Ok(None)
}

fn find_in_ament_prefixes(pkg: &str) -> Option<PathBuf> {
    let prefixes = env::var_os("AMENT_PREFIX_PATH")?;
    env::split_paths(&prefixes).find_map(|prefix| {
        let registered = prefix
            .join("share/ament_index/resource_index/packages")
            .join(pkg)
            .exists();
        let share = prefix.join("share").join(pkg);
        if share.is_dir() && (registered || share.join(PACKAGE_FILE).is_file()) {
            Some(share)
        } else {
            None
        }
    })
}
