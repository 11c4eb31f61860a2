//! State threaded through one expansion run.

use crate::{
    error::XacroError,
    eval::EvalContext,
    extensions::{ArgRegistry, ExtensionHandler},
    parse::MacroDefinition,
};
use core::cell::RefCell;
use std::{collections::HashMap, path::PathBuf, rc::Rc};
use xmltree::XMLNode;

pub struct XacroContext {
    pub(crate) properties: EvalContext,

    pub macros: RefCell<HashMap<String, Rc<MacroDefinition>>>,

    /// Shared with `properties` for `$(arg ...)`
    pub args: ArgRegistry,

    /// Files currently being included, for cycle detection
    pub include_stack: RefCell<Vec<PathBuf>>,

    /// Every file included during the run, in order of first inclusion
    pub all_includes: RefCell<Vec<PathBuf>>,

    /// Pre-expanded block arguments of the active macro calls
    pub block_stack: RefCell<Vec<HashMap<String, Vec<XMLNode>>>>,

    /// Directory that relative includes resolve against
    pub base_path: RefCell<PathBuf>,

    /// File being processed; `None` for string input
    pub current_file: RefCell<Option<PathBuf>>,

    pub recursion_depth: RefCell<usize>,
    pub max_recursion_depth: usize,
}

impl XacroContext {
    pub const DEFAULT_MAX_DEPTH: usize = 50;

    pub fn new(
        base_path: PathBuf,
        args: ArgRegistry,
        extensions: Rc<Vec<Box<dyn ExtensionHandler>>>,
    ) -> Self {
        XacroContext {
            properties: EvalContext::new(args.clone(), extensions),
            macros: RefCell::new(HashMap::new()),
            args,
            include_stack: RefCell::new(Vec::new()),
            all_includes: RefCell::new(Vec::new()),
            block_stack: RefCell::new(Vec::new()),
            base_path: RefCell::new(base_path),
            current_file: RefCell::new(None),
            recursion_depth: RefCell::new(0),
            max_recursion_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    /// Innermost block argument called `name`.
    pub fn get_block(
        &self,
        name: &str,
    ) -> Result<Vec<XMLNode>, XacroError> {
        self.block_stack
            .borrow()
            .iter()
            .rev()
            .find_map(|blocks| blocks.get(name))
            .cloned()
            .ok_or_else(|| XacroError::UndefinedBlock {
                name: name.to_string(),
            })
    }

    pub fn set_max_recursion_depth(
        &mut self,
        depth: usize,
    ) {
        self.max_recursion_depth = depth;
    }

    /// Tell every extension that processing moved to `file`.
    pub(crate) fn notify_file_change(
        &self,
        file: &std::path::Path,
    ) {
        for handler in self.properties.extensions() {
            handler.on_file_change(file);
        }
    }
}
