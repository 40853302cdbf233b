//! Typed Dockerfile instructions.
//!
//! Each variant knows its keyword and renders to exactly one line of
//! Dockerfile text. Rendering never validates instruction order; that is
//! the sequence's job at write time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Source image reference for a `FROM` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    pub image: String,
    pub platform: Option<String>,
    pub stage: Option<String>,
}

impl BaseImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            platform: None,
            stage: None,
        }
    }

    /// Target platform, rendered as `--platform=<value>`.
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Build stage alias, rendered as `AS <name>`.
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Source/destination pair for an `ADD` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub src: String,
    pub dest: String,
    pub chown: Option<String>,
}

impl FileSpec {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            chown: None,
        }
    }

    pub fn chown(mut self, chown: impl Into<String>) -> Self {
        self.chown = Some(chown.into());
        self
    }
}

/// Source/destination pair for a `COPY` instruction, optionally reading
/// from an earlier build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    pub src: String,
    pub dest: String,
    pub chown: Option<String>,
    pub from_stage: Option<String>,
}

impl CopySpec {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            chown: None,
            from_stage: None,
        }
    }

    pub fn chown(mut self, chown: impl Into<String>) -> Self {
        self.chown = Some(chown.into());
        self
    }

    /// Copy from a named build stage, rendered as `--from=<stage>`.
    pub fn from_stage(mut self, stage: impl Into<String>) -> Self {
        self.from_stage = Some(stage.into());
        self
    }
}

/// `HEALTHCHECK` parameters; only the command is mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub cmd: String,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub start_period: Option<Duration>,
    pub retries: Option<u32>,
}

impl Healthcheck {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            interval: None,
            timeout: None,
            start_period: None,
            retries: None,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn start_period(mut self, start_period: Duration) -> Self {
        self.start_period = Some(start_period);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// One line of a Dockerfile.
///
/// Shell-form instructions carry a single string, exec-form instructions a
/// list rendered as a JSON-style array, and key/value instructions an
/// ordered pair list rendered as `k=v` tokens with whitespace-aware
/// quoting. `Generic` carries a raw line verbatim for anything without a
/// dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    From(BaseImage),
    Arg(String),
    Run(String),
    Cmd(Vec<String>),
    Expose(Vec<u16>),
    Env(Vec<(String, String)>),
    Add(FileSpec),
    Copy(CopySpec),
    Entrypoint(Vec<String>),
    Volume(Vec<String>),
    User(String),
    Workdir(String),
    OnBuild(String),
    Label(Vec<(String, String)>),
    Healthcheck(Healthcheck),
    Comment(String),
    Generic(String),
}

impl Instruction {
    /// The Dockerfile keyword, e.g. `FROM` for a `From` instruction.
    /// Generic instructions report the first word of their raw text.
    pub fn keyword(&self) -> &str {
        match self {
            Instruction::From(_) => "FROM",
            Instruction::Arg(_) => "ARG",
            Instruction::Run(_) => "RUN",
            Instruction::Cmd(_) => "CMD",
            Instruction::Expose(_) => "EXPOSE",
            Instruction::Env(_) => "ENV",
            Instruction::Add(_) => "ADD",
            Instruction::Copy(_) => "COPY",
            Instruction::Entrypoint(_) => "ENTRYPOINT",
            Instruction::Volume(_) => "VOLUME",
            Instruction::User(_) => "USER",
            Instruction::Workdir(_) => "WORKDIR",
            Instruction::OnBuild(_) => "ONBUILD",
            Instruction::Label(_) => "LABEL",
            Instruction::Healthcheck(_) => "HEALTHCHECK",
            Instruction::Comment(_) => "#",
            Instruction::Generic(raw) => raw.split_whitespace().next().unwrap_or(""),
        }
    }

    /// The full rendered line. Empty for exec-form and key/value
    /// instructions with no items; the writer skips empty lines.
    pub fn text(&self) -> String {
        match self {
            Instruction::From(from) => {
                let mut text = String::from("FROM");
                if let Some(platform) = &from.platform {
                    text.push_str(&format!(" --platform={}", platform));
                }
                text.push(' ');
                text.push_str(&from.image);
                if let Some(stage) = &from.stage {
                    text.push_str(&format!(" AS {}", stage));
                }
                text
            }
            Instruction::Arg(arg) => format!("ARG {}", arg),
            Instruction::Run(command) => format!("RUN {}", command),
            Instruction::Cmd(command) => render_exec_form("CMD", command),
            Instruction::Expose(ports) => {
                if ports.is_empty() {
                    String::new()
                } else {
                    let rendered: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                    format!("EXPOSE {}", rendered.join(" "))
                }
            }
            Instruction::Env(pairs) => render_pairs("ENV", pairs),
            Instruction::Add(file) => {
                let mut text = String::from("ADD");
                if let Some(chown) = &file.chown {
                    text.push_str(&format!(" --chown={}", chown));
                }
                text.push_str(&format!(" {} {}", file.src, file.dest));
                text
            }
            Instruction::Copy(copy) => {
                let mut text = String::from("COPY");
                if let Some(stage) = &copy.from_stage {
                    text.push_str(&format!(" --from={}", stage));
                }
                if let Some(chown) = &copy.chown {
                    text.push_str(&format!(" --chown={}", chown));
                }
                text.push_str(&format!(" {} {}", copy.src, copy.dest));
                text
            }
            Instruction::Entrypoint(command) => render_exec_form("ENTRYPOINT", command),
            Instruction::Volume(volumes) => render_exec_form("VOLUME", volumes),
            Instruction::User(user) => format!("USER {}", user),
            Instruction::Workdir(dir) => format!("WORKDIR {}", dir),
            Instruction::OnBuild(inner) => format!("ONBUILD {}", inner),
            Instruction::Label(pairs) => render_pairs("LABEL", pairs),
            Instruction::Healthcheck(check) => {
                let mut text = String::from("HEALTHCHECK");
                if let Some(interval) = check.interval {
                    text.push_str(&format!(" --interval={}s", interval.as_secs()));
                }
                if let Some(timeout) = check.timeout {
                    text.push_str(&format!(" --timeout={}s", timeout.as_secs()));
                }
                if let Some(start_period) = check.start_period {
                    text.push_str(&format!(" --start-period={}s", start_period.as_secs()));
                }
                if let Some(retries) = check.retries {
                    text.push_str(&format!(" --retries={}", retries));
                }
                text.push_str(&format!(" CMD {}", check.cmd));
                text
            }
            Instruction::Comment(comment) => format!("# {}", comment),
            Instruction::Generic(raw) => raw.clone(),
        }
    }
}

/// Render `KEYWORD ["a", "b"]`; empty input renders empty.
fn render_exec_form(keyword: &str, items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!("{} [\"{}\"]", keyword, items.join("\", \""))
    }
}

/// Render `KEYWORD k1=v1 k2=v2` in pair order. Keys and values containing
/// whitespace are double-quoted unless already quoted; embedded newlines
/// in values become backslash continuations.
fn render_pairs(keyword: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = pairs
        .iter()
        .map(|(k, v)| {
            let key = if is_unquoted_with_whitespace(k) {
                to_quoted(k)
            } else {
                k.clone()
            };
            let value = if is_unquoted_with_whitespace(v) {
                to_quoted(v)
            } else {
                v.clone()
            };
            format!("{}={}", key, continue_newlines(&value))
        })
        .collect();
    format!("{} {}", keyword, joined.join(" "))
}

fn is_unquoted_with_whitespace(s: &str) -> bool {
    let already_quoted = s.len() >= 2 && s.starts_with('"') && s.ends_with('"');
    !already_quoted && s.chars().any(|c| c == ' ' || c == '\n')
}

fn to_quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

fn continue_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\n', "\\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_renders_image() {
        let instruction = Instruction::From(BaseImage::new("ubuntu:24.04"));
        assert_eq!(instruction.keyword(), "FROM");
        assert_eq!(instruction.text(), "FROM ubuntu:24.04");
    }

    #[test]
    fn test_from_renders_platform_and_stage() {
        let instruction = Instruction::From(
            BaseImage::new("golang:1.22")
                .platform("linux/amd64")
                .stage("builder"),
        );
        assert_eq!(
            instruction.text(),
            "FROM --platform=linux/amd64 golang:1.22 AS builder"
        );
    }

    #[test]
    fn test_shell_form_instructions() {
        assert_eq!(
            Instruction::Run("apt-get update".to_string()).text(),
            "RUN apt-get update"
        );
        assert_eq!(
            Instruction::Workdir("/app".to_string()).text(),
            "WORKDIR /app"
        );
        assert_eq!(Instruction::User("nobody".to_string()).text(), "USER nobody");
        assert_eq!(
            Instruction::Arg("VERSION=1.0".to_string()).text(),
            "ARG VERSION=1.0"
        );
        assert_eq!(
            Instruction::OnBuild("RUN make".to_string()).text(),
            "ONBUILD RUN make"
        );
    }

    #[test]
    fn test_exec_form_renders_json_array() {
        let instruction = Instruction::Entrypoint(vec![
            "java".to_string(),
            "-jar".to_string(),
            "app.jar".to_string(),
        ]);
        assert_eq!(instruction.text(), "ENTRYPOINT [\"java\", \"-jar\", \"app.jar\"]");
    }

    #[test]
    fn test_empty_exec_form_renders_empty() {
        assert_eq!(Instruction::Cmd(Vec::new()).text(), "");
        assert_eq!(Instruction::Volume(Vec::new()).text(), "");
    }

    #[test]
    fn test_expose_joins_ports() {
        let instruction = Instruction::Expose(vec![8080, 9090]);
        assert_eq!(instruction.text(), "EXPOSE 8080 9090");
    }

    #[test]
    fn test_env_pairs_keep_order() {
        let instruction = Instruction::Env(vec![
            ("PATH".to_string(), "/usr/local/bin".to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
        ]);
        assert_eq!(instruction.text(), "ENV PATH=/usr/local/bin LANG=C.UTF-8");
    }

    #[test]
    fn test_label_value_with_spaces_is_quoted() {
        let instruction = Instruction::Label(vec![(
            "maintainer".to_string(),
            "Jane Doe".to_string(),
        )]);
        assert_eq!(instruction.text(), "LABEL maintainer=\"Jane Doe\"");
    }

    #[test]
    fn test_label_inner_quotes_escaped() {
        let instruction = Instruction::Label(vec![(
            "description".to_string(),
            "a \"quoted\" value".to_string(),
        )]);
        assert_eq!(
            instruction.text(),
            "LABEL description=\"a \\\"quoted\\\" value\""
        );
    }

    #[test]
    fn test_label_already_quoted_value_untouched() {
        let instruction = Instruction::Label(vec![(
            "note".to_string(),
            "\"already quoted\"".to_string(),
        )]);
        assert_eq!(instruction.text(), "LABEL note=\"already quoted\"");
    }

    #[test]
    fn test_label_newlines_become_continuations() {
        let instruction = Instruction::Label(vec![(
            "multi".to_string(),
            "line one\r\nline two".to_string(),
        )]);
        assert_eq!(instruction.text(), "LABEL multi=\"line one\\\nline two\"");
    }

    #[test]
    fn test_copy_with_stage_and_chown() {
        let instruction = Instruction::Copy(
            CopySpec::new("target/app.jar", "/app/app.jar")
                .from_stage("builder")
                .chown("app:app"),
        );
        assert_eq!(
            instruction.text(),
            "COPY --from=builder --chown=app:app target/app.jar /app/app.jar"
        );
    }

    #[test]
    fn test_add_with_chown() {
        let instruction =
            Instruction::Add(FileSpec::new("dist.tar.gz", "/opt").chown("1000:1000"));
        assert_eq!(instruction.text(), "ADD --chown=1000:1000 dist.tar.gz /opt");
    }

    #[test]
    fn test_healthcheck_renders_options_before_cmd() {
        let instruction = Instruction::Healthcheck(
            Healthcheck::new("curl -f http://localhost/ || exit 1")
                .interval(Duration::from_secs(30))
                .timeout(Duration::from_secs(3))
                .retries(5),
        );
        assert_eq!(
            instruction.text(),
            "HEALTHCHECK --interval=30s --timeout=3s --retries=5 CMD curl -f http://localhost/ || exit 1"
        );
    }

    #[test]
    fn test_comment_renders_with_hash() {
        let instruction = Instruction::Comment("syntax=docker/dockerfile:1".to_string());
        assert_eq!(instruction.keyword(), "#");
        assert_eq!(instruction.text(), "# syntax=docker/dockerfile:1");
    }

    #[test]
    fn test_generic_keyword_is_first_word() {
        let instruction = Instruction::Generic("STOPSIGNAL SIGTERM".to_string());
        assert_eq!(instruction.keyword(), "STOPSIGNAL");
        assert_eq!(instruction.text(), "STOPSIGNAL SIGTERM");
    }
}
