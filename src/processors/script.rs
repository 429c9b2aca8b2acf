//! Builder for the shell scripts external services run.

use std::fmt::Write as _;

const SAFE_PUNCTUATION: &str = "_-./=:,+@%";

/// Quote `arg` for `sh` unless it only holds safe characters
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Line oriented `sh` script
#[derive(Debug, Clone)]
pub struct ScriptWriter {
    lines: Vec<String>,
}

impl Default for ScriptWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptWriter {
    pub fn new() -> Self {
        Self {
            lines: vec!["#!/bin/sh".to_string()],
        }
    }

    /// Append a raw line
    pub fn add(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn set_var(&mut self, name: &str, value: &str) -> &mut Self {
        self.add(format!("{name}={}", quote_arg(value)))
    }

    pub fn export_var(&mut self, name: &str, value: &str) -> &mut Self {
        self.add(format!("export {name}={}", quote_arg(value)))
    }

    /// Start a command line; arguments are quoted as they are added
    pub fn add_with_args(&mut self, command: impl Into<String>) -> ExternalCodeBlock<'_> {
        ExternalCodeBlock {
            writer: self,
            parts: vec![command.into()],
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Script text with a trailing newline
    pub fn finish(&self) -> String {
        let mut script = String::new();
        for line in &self.lines {
            let _ = writeln!(script, "{line}");
        }
        script
    }
}

/// One command being assembled by [`ScriptWriter::add_with_args`]
#[derive(Debug)]
pub struct ExternalCodeBlock<'a> {
    writer: &'a mut ScriptWriter,
    parts: Vec<String>,
}

impl<'a> ExternalCodeBlock<'a> {
    pub fn add_arg(mut self, arg: impl AsRef<str>) -> Self {
        self.parts.push(quote_arg(arg.as_ref()));
        self
    }

    pub fn add_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parts
            .extend(args.into_iter().map(|arg| quote_arg(arg.as_ref())));
        self
    }

    /// `flag` followed by `value`, skipped entirely when `value` is `None`
    pub fn add_opt_arg(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.add_arg(flag).add_arg(value),
            None => self,
        }
    }

    /// `flag` only when `enabled`
    pub fn add_arg_flag(self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.add_arg(flag)
        } else {
            self
        }
    }

    /// Write the command line and return to the script
    pub fn end_args(self) -> &'a mut ScriptWriter {
        let line = self.parts.join(" ");
        self.writer.add(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain-arg_1.txt"), "plain-arg_1.txt");
        assert_eq!(quote_arg("-i=/data/x:y"), "-i=/data/x:y");
        assert_eq!(quote_arg(""), "''");
        assert_eq!(quote_arg("two words"), "'two words'");
        assert_eq!(quote_arg("it's"), r"'it'\''s'");
        assert_eq!(quote_arg("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_script_building() {
        let mut script = ScriptWriter::new();
        script
            .export_var("LD_LIBRARY_PATH", "/opt/lib")
            .set_var("OUT", "my dir")
            .add_with_args("/opt/bin/flirt")
            .add_arg("-in")
            .add_arg("brain.nii")
            .add_arg_flag("-v", true)
            .add_arg_flag("-debug", false)
            .add_opt_arg("-ref", None)
            .add_opt_arg("-omat", Some("out.mat"))
            .end_args()
            .add("echo done");

        assert_eq!(
            script.finish(),
            "#!/bin/sh\n\
             export LD_LIBRARY_PATH=/opt/lib\n\
             OUT='my dir'\n\
             /opt/bin/flirt -in brain.nii -v -omat out.mat\n\
             echo done\n"
        );
    }
}
