//! Line-oriented editing
//!
//! Files are split into lines once; the dominant line ending and the
//! presence of a final newline are remembered and restored on render, so a
//! line edit never rewrites untouched bytes.

use regex::Regex;

use crate::error::ApplyError;

/// Line ending style detected in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// A file held as lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    lines: Vec<String>,
    ending: LineEnding,
    trailing_newline: bool,
}

impl LineBuffer {
    /// Split text into lines
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let ending = if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        let trailing_newline = text.ends_with('\n');
        let body = text
            .strip_suffix(ending.as_str())
            .or_else(|| text.strip_suffix('\n'))
            .unwrap_or(text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };
        Self {
            lines,
            ending,
            trailing_newline,
        }
    }

    /// Join lines back with the original ending
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.lines.join(self.ending.as_str());
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.ending.as_str());
        }
        out
    }

    #[inline]
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[inline]
    #[must_use]
    pub fn ending(&self) -> LineEnding {
        self.ending
    }

    /// Indices of lines matching `pattern`
    #[must_use]
    pub fn matching(&self, pattern: &Regex) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| pattern.is_match(line))
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the single line matching `pattern`
    ///
    /// # Errors
    /// `NoMatch` for zero matches, `AmbiguousMatch` for more than one
    pub fn single_match(&self, file: &str, pattern: &Regex) -> Result<usize, ApplyError> {
        let hits = self.matching(pattern);
        match hits.as_slice() {
            [index] => Ok(*index),
            [] => Err(ApplyError::NoMatch {
                file: file.to_string(),
                pattern: pattern.as_str().to_string(),
            }),
            _ => Err(ApplyError::AmbiguousMatch {
                file: file.to_string(),
                pattern: pattern.as_str().to_string(),
                count: hits.len(),
            }),
        }
    }

    /// Replace the single matching line, expanding `$n` capture references
    ///
    /// Returns `(old_line, new_line)`.
    ///
    /// # Errors
    /// Same as [`single_match`](Self::single_match)
    pub fn replace_line(
        &mut self,
        file: &str,
        pattern: &Regex,
        replacement: &str,
    ) -> Result<(String, String), ApplyError> {
        let index = self.single_match(file, pattern)?;
        let old = self.lines[index].clone();
        let mut new = String::new();
        if let Some(caps) = pattern.captures(&old) {
            caps.expand(replacement, &mut new);
        }
        self.lines[index].clone_from(&new);
        Ok((old, new))
    }

    /// Insert after the first line matching `anchor`, or append when `None`
    ///
    /// # Errors
    /// `NoMatch` when an anchor is given and nothing matches it
    pub fn add_line(
        &mut self,
        file: &str,
        content: &str,
        anchor: Option<&Regex>,
    ) -> Result<(), ApplyError> {
        let at = match anchor {
            None => self.lines.len(),
            Some(pattern) => {
                let index = self
                    .lines
                    .iter()
                    .position(|line| pattern.is_match(line))
                    .ok_or_else(|| ApplyError::NoMatch {
                        file: file.to_string(),
                        pattern: pattern.as_str().to_string(),
                    })?;
                index + 1
            }
        };
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        self.lines.insert(at, content.to_string());
        Ok(())
    }

    /// Remove every matching line; returns the removed lines
    ///
    /// # Errors
    /// `NoMatch` when nothing matches
    pub fn delete_lines(&mut self, file: &str, pattern: &Regex) -> Result<Vec<String>, ApplyError> {
        let (removed, kept): (Vec<String>, Vec<String>) = std::mem::take(&mut self.lines)
            .into_iter()
            .partition(|line| pattern.is_match(line));
        self.lines = kept;
        if removed.is_empty() {
            return Err(ApplyError::NoMatch {
                file: file.to_string(),
                pattern: pattern.as_str().to_string(),
            });
        }
        Ok(removed)
    }

    /// Overwrite line `index`
    pub fn set_line(&mut self, index: usize, text: String) {
        if let Some(line) = self.lines.get_mut(index) {
            *line = text;
        }
    }

    /// Remove line `index`
    pub fn remove_line(&mut self, index: usize) {
        if index < self.lines.len() {
            self.lines.remove(index);
        }
    }

    /// Append a line
    pub fn push_line(&mut self, text: String) {
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        self.lines.push(text);
    }
}

/// Compile a line pattern
///
/// # Errors
/// `InvalidPattern` if the regex does not compile
pub fn compile(pattern: &str) -> Result<Regex, ApplyError> {
    Regex::new(pattern).map_err(|e| ApplyError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn re(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[test]
    fn preserves_crlf_and_trailing_newline() {
        let text = "a\r\nb\r\n";
        let buf = LineBuffer::parse(text);
        assert_eq!(buf.ending(), LineEnding::CrLf);
        assert_eq!(buf.lines(), ["a", "b"]);
        assert_eq!(buf.render(), text);

        let no_trailing = "a\nb";
        assert_eq!(LineBuffer::parse(no_trailing).render(), no_trailing);
    }

    #[test]
    fn blank_lines_survive() {
        let text = "a\n\n\nb\n";
        assert_eq!(LineBuffer::parse(text).render(), text);
        assert_eq!(LineBuffer::parse("\n").render(), "\n");
    }

    #[test]
    fn replace_requires_exactly_one() {
        let mut buf = LineBuffer::parse("max-players=20\nmotd=hi\n");
        let (old, new) = buf
            .replace_line("server.properties", &re(r"^max-players=(\d+)$"), "max-players=50")
            .unwrap();
        assert_eq!(old, "max-players=20");
        assert_eq!(new, "max-players=50");
        assert_eq!(buf.render(), "max-players=50\nmotd=hi\n");

        let err = buf.replace_line("f", &re("^nothing"), "x").unwrap_err();
        assert!(matches!(err, ApplyError::NoMatch { .. }));
        let err = buf.replace_line("f", &re("="), "x").unwrap_err();
        assert!(matches!(err, ApplyError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn replace_expands_captures() {
        let mut buf = LineBuffer::parse("spawn-protection=16\n");
        buf.replace_line("f", &re(r"^(spawn-protection)=\d+$"), "$1=0").unwrap();
        assert_eq!(buf.render(), "spawn-protection=0\n");
    }

    #[test]
    fn add_after_anchor_or_append() {
        let mut buf = LineBuffer::parse("[a]\nx=1\n[b]\n");
        buf.add_line("f", "y=2", Some(&re(r"^\[a\]$"))).unwrap();
        buf.add_line("f", "z=3", None).unwrap();
        assert_eq!(buf.render(), "[a]\ny=2\nx=1\n[b]\nz=3\n");
        assert!(buf.add_line("f", "q", Some(&re("^missing"))).is_err());
    }

    #[test]
    fn add_to_empty_file() {
        let mut buf = LineBuffer::parse("");
        buf.add_line("f", "first", None).unwrap();
        assert_eq!(buf.render(), "first\n");
    }

    #[test]
    fn delete_all_matches() {
        let mut buf = LineBuffer::parse("keep\n# ad 1\nkeep2\n# ad 2\n");
        let removed = buf.delete_lines("f", &re("^# ad")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(buf.render(), "keep\nkeep2\n");
        assert!(matches!(
            buf.delete_lines("f", &re("^# ad")),
            Err(ApplyError::NoMatch { .. })
        ));
    }
}
