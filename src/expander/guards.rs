//! Drop guards that undo pushed expansion state on every exit path.

use super::XacroContext;
use crate::eval::EvalContext;
use core::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use xmltree::XMLNode;

pub(crate) struct DepthGuard<'a> {
    depth: &'a RefCell<usize>,
}

impl<'a> DepthGuard<'a> {
    pub(crate) fn new(depth: &'a RefCell<usize>) -> Self {
        *depth.borrow_mut() += 1;
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let mut depth = self.depth.borrow_mut();
        *depth = depth.saturating_sub(1);
    }
}

/// Restores the including file's context once an include finishes.
pub(crate) struct IncludeGuard<'a> {
    ctx: &'a XacroContext,
    old_base_path: PathBuf,
    old_file: Option<PathBuf>,
}

impl<'a> IncludeGuard<'a> {
    /// Switch `ctx` into `file` and push it on the include stack.
    pub(crate) fn enter(
        ctx: &'a XacroContext,
        file: PathBuf,
    ) -> Self {
        let old_base_path = ctx.base_path.borrow().clone();
        let old_file = ctx.current_file.borrow().clone();

        if let Some(dir) = file.parent() {
            *ctx.base_path.borrow_mut() = dir.to_path_buf();
        }
        *ctx.current_file.borrow_mut() = Some(file.clone());
        ctx.include_stack.borrow_mut().push(file.clone());
        ctx.notify_file_change(&file);

        Self {
            ctx,
            old_base_path,
            old_file,
        }
    }
}

impl Drop for IncludeGuard<'_> {
    fn drop(&mut self) {
        *self.ctx.base_path.borrow_mut() = self.old_base_path.clone();
        self.ctx.include_stack.borrow_mut().pop();
        *self.ctx.current_file.borrow_mut() = self.old_file.clone();
        if let Some(previous) = &self.old_file {
            self.ctx.notify_file_change(previous);
        }
    }
}

pub(crate) struct ScopeGuard<'a> {
    pub(crate) properties: &'a EvalContext,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.properties.pop_scope();
    }
}

pub(crate) struct BlockGuard<'a> {
    pub(crate) blocks: &'a RefCell<Vec<HashMap<String, Vec<XMLNode>>>>,
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.blocks.borrow_mut().pop();
    }
}
