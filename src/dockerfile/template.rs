//! Dockerfile template loading.
//!
//! Templates are plain Dockerfile text. Every non-empty line becomes a
//! generic instruction; a marker line records where later appends should
//! land; `{{var}}` placeholders are substituted via tera when variables
//! are supplied.

use crate::dockerfile::instruction::Instruction;
use crate::error::DockerfileError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tera::{Context, Tera};

/// Marker line naming the insertion point for instructions appended after
/// the template is loaded. Matched on the trimmed line.
pub const INSTRUCTION_MARKER: &str = "# dockforge:instructions";

/// A template split into instructions, with the marker position if one
/// was present.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub instructions: Vec<Instruction>,
    pub marker: Option<usize>,
}

/// Load a template file verbatim.
pub fn load(path: &Path) -> Result<LoadedTemplate, DockerfileError> {
    let content = read_template(path)?;
    Ok(split_instructions(&content))
}

/// Load a template file, substituting `{{var}}` placeholders first.
/// Referencing a variable that is not supplied is an error.
pub fn load_with_vars(
    path: &Path,
    vars: &HashMap<String, String>,
) -> Result<LoadedTemplate, DockerfileError> {
    let content = read_template(path)?;
    let mut context = Context::new();
    for (key, value) in vars {
        context.insert(key, value);
    }
    let rendered = Tera::one_off(&content, &context, false).map_err(DockerfileError::Tera)?;
    Ok(split_instructions(&rendered))
}

fn read_template(path: &Path) -> Result<String, DockerfileError> {
    if !path.exists() {
        return Err(DockerfileError::TemplateNotFound(
            path.display().to_string(),
        ));
    }
    Ok(fs::read_to_string(path)?)
}

fn split_instructions(content: &str) -> LoadedTemplate {
    let mut instructions = Vec::new();
    let mut marker = None;
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        if line.trim() == INSTRUCTION_MARKER {
            marker = Some(instructions.len());
            continue;
        }
        instructions.push(Instruction::Generic(line.to_string()));
    }
    LoadedTemplate {
        instructions,
        marker,
    }
}
