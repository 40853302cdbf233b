//! Dockerfile construction and rendering.
//!
//! This module provides an ordered instruction sequence built
//! programmatically or loaded from a template file, validated and rendered
//! to standard Dockerfile text.
//!
//! # Example
//!
//! ```rust,ignore
//! use dockforge::dockerfile::Dockerfile;
//!
//! let mut dockerfile = Dockerfile::new();
//! dockerfile
//!     .from("eclipse-temurin:21-jre")
//!     .workdir("/app")
//!     .copy("build/libs", "libs")
//!     .expose(&[8080])
//!     .entrypoint(vec!["java".into(), "-jar".into(), "libs/app.jar".into()]);
//! dockerfile.write("docker/app/Dockerfile")?;
//! ```

pub mod instruction;
pub mod template;

pub use instruction::{BaseImage, CopySpec, FileSpec, Healthcheck, Instruction};

use crate::error::DockerfileError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// An ordered Dockerfile instruction sequence.
///
/// Insertion order is file order. List manipulation never validates
/// Dockerfile grammar; [`Dockerfile::validate`] runs at render/write time
/// and enforces that the first effective instruction is FROM (ARG
/// instructions and comments may precede it).
#[derive(Debug, Clone, Default)]
pub struct Dockerfile {
    instructions: Vec<Instruction>,
    insert_point: Option<usize>,
}

impl Dockerfile {
    /// Create an empty instruction sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions currently in the sequence.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// All instructions in insertion order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Append an instruction.
    ///
    /// When a template declared an insertion marker, appends land at the
    /// marker position instead of the end of the sequence.
    pub fn append(&mut self, instruction: Instruction) -> &mut Self {
        match self.insert_point {
            Some(position) => {
                self.instructions.insert(position, instruction);
                self.insert_point = Some(position + 1);
            }
            None => self.instructions.push(instruction),
        }
        self
    }

    /// Insert an instruction at an explicit index.
    pub fn insert(&mut self, index: usize, instruction: Instruction) -> Result<(), DockerfileError> {
        if index > self.instructions.len() {
            return Err(DockerfileError::IndexOutOfBounds {
                index,
                len: self.instructions.len(),
            });
        }
        self.instructions.insert(index, instruction);
        if let Some(position) = self.insert_point {
            if index <= position {
                self.insert_point = Some(position + 1);
            }
        }
        Ok(())
    }

    /// Remove every instruction matching the predicate, returning how many
    /// were removed. Used together with [`Dockerfile::insert`] to replace a
    /// FROM line.
    pub fn remove_matching<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Instruction) -> bool,
    {
        let mut removed = 0;
        let mut removed_before_marker = 0;
        let marker = self.insert_point;
        let mut index = 0;
        self.instructions.retain(|instruction| {
            let keep = !predicate(instruction);
            if !keep {
                removed += 1;
                if let Some(position) = marker {
                    if index < position {
                        removed_before_marker += 1;
                    }
                }
            }
            index += 1;
            keep
        });
        if let Some(position) = self.insert_point {
            self.insert_point = Some(position - removed_before_marker);
        }
        removed
    }

    /// Load instructions from a template file. Every non-empty line becomes
    /// a generic instruction; a marker line (see
    /// [`template::INSTRUCTION_MARKER`]) is removed and remembered as the
    /// insertion point for subsequent appends.
    pub fn instructions_from_template(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), DockerfileError> {
        let loaded = template::load(path.as_ref())?;
        self.extend_from_template(loaded);
        Ok(())
    }

    /// Like [`Dockerfile::instructions_from_template`], but substitutes
    /// `{{var}}` placeholders from the given variables before splitting
    /// into instructions. An undefined variable is an error.
    pub fn instructions_from_template_with_vars(
        &mut self,
        path: impl AsRef<Path>,
        vars: &HashMap<String, String>,
    ) -> Result<(), DockerfileError> {
        let loaded = template::load_with_vars(path.as_ref(), vars)?;
        self.extend_from_template(loaded);
        Ok(())
    }

    fn extend_from_template(&mut self, loaded: template::LoadedTemplate) {
        let start = self.instructions.len();
        self.instructions.extend(loaded.instructions);
        // A later template's marker replaces an earlier one.
        if let Some(offset) = loaded.marker {
            self.insert_point = Some(start + offset);
        }
    }

    /// Render all instructions in order, one line each, skipping
    /// instructions that render empty.
    pub fn render(&self) -> Vec<String> {
        self.instructions
            .iter()
            .map(|instruction| instruction.text())
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// Check that the sequence forms a valid Dockerfile skeleton: at least
    /// one effective instruction, FROM first (ARG and comments may come
    /// earlier), and no blank keys in ENV/LABEL pairs.
    pub fn validate(&self) -> Result<(), DockerfileError> {
        let effective: Vec<&Instruction> = self
            .instructions
            .iter()
            .filter(|instruction| {
                let text = instruction.text();
                !text.is_empty() && !text.starts_with('#')
            })
            .collect();

        if effective.is_empty() {
            return Err(DockerfileError::Empty);
        }

        let from_pos = effective
            .iter()
            .position(|instruction| instruction.keyword() == "FROM");
        let others_pos = effective
            .iter()
            .position(|instruction| instruction.keyword() != "FROM" && instruction.keyword() != "ARG");

        let misplaced = match (from_pos, others_pos) {
            (None, others) => Some(others.unwrap_or(0)),
            (Some(from), Some(others)) if from > others => Some(others),
            _ => None,
        };
        if let Some(position) = misplaced {
            return Err(DockerfileError::MissingFrom(
                effective[position].keyword().to_string(),
            ));
        }

        for instruction in &self.instructions {
            if let Instruction::Env(pairs) | Instruction::Label(pairs) = instruction {
                if pairs.iter().any(|(key, _)| key.trim().is_empty()) {
                    return Err(DockerfileError::BlankKey(instruction.keyword().to_string()));
                }
            }
        }

        Ok(())
    }

    /// Validate, then write the rendered instructions to `path`, one per
    /// line, creating parent directories as needed.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), DockerfileError> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut content = self.render().join("\n");
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }

    // Convenience appenders mirroring the instruction vocabulary.

    /// Append `FROM <image>`.
    pub fn from(&mut self, image: impl Into<String>) -> &mut Self {
        self.append(Instruction::From(BaseImage::new(image)))
    }

    /// Append a FROM instruction with platform and/or stage set.
    pub fn from_spec(&mut self, spec: BaseImage) -> &mut Self {
        self.append(Instruction::From(spec))
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.append(Instruction::Arg(arg.into()))
    }

    pub fn run(&mut self, command: impl Into<String>) -> &mut Self {
        self.append(Instruction::Run(command.into()))
    }

    /// Append an exec-form CMD.
    pub fn cmd(&mut self, command: Vec<String>) -> &mut Self {
        self.append(Instruction::Cmd(command))
    }

    pub fn expose(&mut self, ports: &[u16]) -> &mut Self {
        self.append(Instruction::Expose(ports.to_vec()))
    }

    /// Append a single-pair ENV instruction.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.append(Instruction::Env(vec![(key.into(), value.into())]))
    }

    pub fn add(&mut self, src: impl Into<String>, dest: impl Into<String>) -> &mut Self {
        self.append(Instruction::Add(FileSpec::new(src, dest)))
    }

    pub fn copy(&mut self, src: impl Into<String>, dest: impl Into<String>) -> &mut Self {
        self.append(Instruction::Copy(CopySpec::new(src, dest)))
    }

    /// Append a COPY instruction with chown and/or stage set.
    pub fn copy_spec(&mut self, spec: CopySpec) -> &mut Self {
        self.append(Instruction::Copy(spec))
    }

    pub fn entrypoint(&mut self, command: Vec<String>) -> &mut Self {
        self.append(Instruction::Entrypoint(command))
    }

    pub fn volume(&mut self, volumes: Vec<String>) -> &mut Self {
        self.append(Instruction::Volume(volumes))
    }

    pub fn user(&mut self, user: impl Into<String>) -> &mut Self {
        self.append(Instruction::User(user.into()))
    }

    pub fn workdir(&mut self, dir: impl Into<String>) -> &mut Self {
        self.append(Instruction::Workdir(dir.into()))
    }

    pub fn on_build(&mut self, inner: impl Into<String>) -> &mut Self {
        self.append(Instruction::OnBuild(inner.into()))
    }

    pub fn label(&mut self, pairs: Vec<(String, String)>) -> &mut Self {
        self.append(Instruction::Label(pairs))
    }

    pub fn healthcheck(&mut self, check: Healthcheck) -> &mut Self {
        self.append(Instruction::Healthcheck(check))
    }

    pub fn comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.append(Instruction::Comment(comment.into()))
    }

    /// Append a raw instruction line verbatim.
    pub fn instruction(&mut self, raw: impl Into<String>) -> &mut Self {
        self.append(Instruction::Generic(raw.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rendered(dockerfile: &Dockerfile) -> Vec<String> {
        dockerfile.render()
    }

    #[test]
    fn test_render_preserves_insertion_order() {
        let mut dockerfile = Dockerfile::new();
        dockerfile
            .from("ubuntu:24.04")
            .run("apt-get update")
            .workdir("/app")
            .cmd(vec!["/bin/bash".to_string()]);

        assert_eq!(
            rendered(&dockerfile),
            vec![
                "FROM ubuntu:24.04",
                "RUN apt-get update",
                "WORKDIR /app",
                "CMD [\"/bin/bash\"]",
            ]
        );
    }

    #[test]
    fn test_insert_at_zero_reverses_head_order() {
        let mut dockerfile = Dockerfile::new();
        dockerfile
            .insert(0, Instruction::Comment("first".to_string()))
            .unwrap();
        dockerfile
            .insert(0, Instruction::Comment("second".to_string()))
            .unwrap();
        dockerfile
            .insert(0, Instruction::Comment("third".to_string()))
            .unwrap();

        assert_eq!(rendered(&dockerfile), vec!["# third", "# second", "# first"]);
    }

    #[test]
    fn test_insert_past_end_is_rejected() {
        let mut dockerfile = Dockerfile::new();
        let result = dockerfile.insert(3, Instruction::Run("true".to_string()));
        assert!(matches!(
            result,
            Err(DockerfileError::IndexOutOfBounds { index: 3, len: 0 })
        ));
    }

    #[test]
    fn test_replace_from_line() {
        let mut dockerfile = Dockerfile::new();
        dockerfile.from("ubuntu:22.04").run("make").workdir("/src");

        let removed = dockerfile.remove_matching(|i| i.keyword() == "FROM");
        assert_eq!(removed, 1);

        dockerfile
            .insert(0, Instruction::From(BaseImage::new("ubuntu:24.04")))
            .unwrap();

        let lines = rendered(&dockerfile);
        assert_eq!(lines[0], "FROM ubuntu:24.04");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_validate_rejects_empty_sequence() {
        let dockerfile = Dockerfile::new();
        assert!(matches!(dockerfile.validate(), Err(DockerfileError::Empty)));

        let mut comments_only = Dockerfile::new();
        comments_only.comment("nothing to build");
        assert!(matches!(
            comments_only.validate(),
            Err(DockerfileError::Empty)
        ));
    }

    #[test]
    fn test_validate_requires_from_first() {
        let mut dockerfile = Dockerfile::new();
        dockerfile.run("apt-get update").from("ubuntu:24.04");

        match dockerfile.validate() {
            Err(DockerfileError::MissingFrom(keyword)) => assert_eq!(keyword, "RUN"),
            other => panic!("expected MissingFrom, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_allows_arg_and_comments_before_from() {
        let mut dockerfile = Dockerfile::new();
        dockerfile
            .comment("build arguments first")
            .arg("BASE=ubuntu:24.04")
            .from("ubuntu:24.04")
            .run("true");

        assert!(dockerfile.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_label_keys() {
        let mut dockerfile = Dockerfile::new();
        dockerfile
            .from("ubuntu:24.04")
            .label(vec![("  ".to_string(), "value".to_string())]);

        assert!(matches!(
            dockerfile.validate(),
            Err(DockerfileError::BlankKey(keyword)) if keyword == "LABEL"
        ));
    }

    #[test]
    fn test_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("Dockerfile");

        let mut dockerfile = Dockerfile::new();
        dockerfile
            .from("ubuntu:24.04")
            .env("LANG", "C.UTF-8")
            .expose(&[8080, 9090])
            .entrypoint(vec!["sleep".to_string(), "infinity".to_string()]);

        dockerfile.write(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let read_back: Vec<&str> = content.lines().collect();
        assert_eq!(read_back, dockerfile.render());
    }

    #[test]
    fn test_write_rejects_invalid_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");

        let mut dockerfile = Dockerfile::new();
        dockerfile.run("apt-get update");

        assert!(dockerfile.write(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_template_lines_load_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "FROM ubuntu:24.04").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "RUN apt-get update").unwrap();

        let mut dockerfile = Dockerfile::new();
        dockerfile.instructions_from_template(&path).unwrap();

        assert_eq!(
            rendered(&dockerfile),
            vec!["FROM ubuntu:24.04", "RUN apt-get update"]
        );
    }

    #[test]
    fn test_append_after_template_lands_at_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "FROM ubuntu:24.04").unwrap();
        writeln!(file, "{}", template::INSTRUCTION_MARKER).unwrap();
        writeln!(file, "CMD [\"/bin/bash\"]").unwrap();

        let mut dockerfile = Dockerfile::new();
        dockerfile.instructions_from_template(&path).unwrap();
        dockerfile.run("apt-get update");
        dockerfile.run("apt-get install -y curl");

        assert_eq!(
            rendered(&dockerfile),
            vec![
                "FROM ubuntu:24.04",
                "RUN apt-get update",
                "RUN apt-get install -y curl",
                "CMD [\"/bin/bash\"]",
            ]
        );
    }

    #[test]
    fn test_append_after_trailing_marker_goes_after_template_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "FROM ubuntu:24.04").unwrap();
        writeln!(file, "WORKDIR /app").unwrap();
        writeln!(file, "{}", template::INSTRUCTION_MARKER).unwrap();

        let mut dockerfile = Dockerfile::new();
        dockerfile.instructions_from_template(&path).unwrap();
        dockerfile.cmd(vec!["/bin/bash".to_string()]);

        assert_eq!(
            rendered(&dockerfile),
            vec!["FROM ubuntu:24.04", "WORKDIR /app", "CMD [\"/bin/bash\"]"]
        );
    }

    #[test]
    fn test_remove_before_marker_keeps_insert_point_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "FROM ubuntu:22.04").unwrap();
        writeln!(file, "{}", template::INSTRUCTION_MARKER).unwrap();
        writeln!(file, "CMD [\"/bin/bash\"]").unwrap();

        let mut dockerfile = Dockerfile::new();
        dockerfile.instructions_from_template(&path).unwrap();

        dockerfile.remove_matching(|i| i.keyword() == "FROM");
        dockerfile
            .insert(0, Instruction::From(BaseImage::new("ubuntu:24.04")))
            .unwrap();
        dockerfile.run("apt-get update");

        assert_eq!(
            rendered(&dockerfile),
            vec![
                "FROM ubuntu:24.04",
                "RUN apt-get update",
                "CMD [\"/bin/bash\"]",
            ]
        );
    }
}
