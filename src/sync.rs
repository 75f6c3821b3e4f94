//! Synchronize a local directory tree with the device filesystem.
//!
//! The walker visits the configured root in directory-listing order,
//! filters against the exclusion set and hands each included file to the
//! protocol engine: remove the old copy, push the new content (unless the
//! session is remove-only) and optionally compile Lua sources on the
//! device.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use console::style;
use log::error;

use crate::device::Interpreter;
use crate::error::Result;
use crate::settings::Settings;
use crate::utils::{compiled_counterpart, normalized_exclude_set, unix_relative_path};

// =============================================================================
// Public Interface
// =============================================================================

/// Walks a source tree and pushes every included file through a protocol
/// engine session.
pub struct FileSync {
    root: PathBuf,
    remove_only: bool,
    ignore_dirs: bool,
    text_mode: bool,
    compile: bool,
    exclude: HashSet<String>,
}

impl FileSync {
    pub fn new(settings: &Settings) -> Self {
        let root = PathBuf::from(settings.root_dir.clone().unwrap_or_else(|| ".".into()));
        let exclude = normalized_exclude_set(&root, &settings.exclude);
        FileSync {
            root,
            remove_only: settings.remove_only,
            ignore_dirs: settings.ignore_dirs,
            text_mode: settings.text_mode,
            compile: settings.compile,
            exclude,
        }
    }

    /// Push the whole tree under the root directory.
    pub fn run(&mut self, interpreter: &mut Interpreter) -> Result<()> {
        let root = self.root.clone();
        self.visit_dir(interpreter, &root)
    }

    /// Push a single file, still subject to the exclusion set.
    pub fn push_single(&mut self, interpreter: &mut Interpreter, file: &Path) -> Result<()> {
        self.push_file(interpreter, file)
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    fn visit_dir(&mut self, interpreter: &mut Interpreter, dir: &Path) -> Result<()> {
        // Files go out in directory-listing order, no sorting.
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if self.ignore_dirs {
                    continue;
                }
                self.visit_dir(interpreter, &path)?;
                continue;
            }
            if !path.is_file() {
                continue;
            }
            self.push_file(interpreter, &path)?;
        }
        Ok(())
    }

    fn push_file(&mut self, interpreter: &mut Interpreter, file: &Path) -> Result<()> {
        let relative = unix_relative_path(&self.root, file).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is not under the root directory", file.display()),
            )
        })?;

        if self.exclude.contains(&relative) {
            println!(
                "{}",
                style(format!("[NP] Excluding {}", file.display())).yellow()
            );
            return Ok(());
        }

        interpreter.delete_file(&relative)?;
        if self.remove_only {
            return Ok(());
        }

        let text_mode = self.text_mode;
        let result = (|| -> Result<()> {
            let source = File::open(file)?;
            if text_mode {
                interpreter.save_file_text(&relative, BufReader::new(source))
            } else {
                let mut source = source;
                interpreter.save_file(&relative, &mut source)
            }
        })();

        if let Err(e) = result {
            self.cleanup_partial(interpreter, &relative);
            return Err(e);
        }

        if self.compile && relative.ends_with(".lua") {
            interpreter.compile(&relative)?;
        }
        Ok(())
    }

    /// Best-effort removal of a partially written remote file and its
    /// compiled counterpart. Failures here are logged and never mask the
    /// original transfer error.
    fn cleanup_partial(&mut self, interpreter: &mut Interpreter, relative: &str) {
        if let Err(ref e) = interpreter.delete_file(relative) {
            error!("cleanup of `{}` failed: {}", relative, e);
        }
        if let Some(compiled) = compiled_counterpart(relative) {
            if let Err(ref e) = interpreter.delete_file(&compiled) {
                error!("cleanup of `{}` failed: {}", compiled, e);
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
