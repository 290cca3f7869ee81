//! File annotations: structured, non-fatal build errors.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use protoimage_dsl::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Coarse category of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationKind {
    /// Malformed source text.
    Syntax,
    /// Missing, failed, duplicate or cyclic imports.
    Import,
    /// Name resolution and descriptor validation.
    Compile,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Syntax => "SYNTAX",
            AnnotationKind::Import => "IMPORT",
            AnnotationKind::Compile => "COMPILE",
        }
    }
}

/// A problem tied to a file and (optionally) a position in it.
///
/// Lines and columns are one-based; zero means the annotation applies to the
/// whole file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub kind: AnnotationKind,
    pub message: String,
    pub severity: Severity,
}

impl Annotation {
    pub fn error(path: impl Into<String>, kind: AnnotationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
            kind,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Attach a zero-based source span.
    pub fn at(mut self, span: Span) -> Self {
        self.start_line = span.start_line + 1;
        self.start_column = span.start_col + 1;
        self.end_line = span.end_line + 1;
        self.end_column = span.end_col + 1;
        self
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == 0 {
            write!(f, "{}:{}", self.path, self.message)
        } else {
            write!(
                f,
                "{}:{}:{}:{}",
                self.path, self.start_line, self.start_column, self.message
            )
        }
    }
}

/// Sort by path, then start position, then message, and drop exact repeats.
pub fn sort_and_dedup(annotations: &mut Vec<Annotation>) {
    annotations.sort_by(|a, b| {
        (&a.path, a.start_line, a.start_column, &a.message, a.end_line, a.end_column, a.kind)
            .cmp(&(&b.path, b.start_line, b.start_column, &b.message, b.end_line, b.end_column, b.kind))
    });
    annotations.dedup();
}

// ============================================================================
// Reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ErrorFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ErrorFormat::Text),
            "json" => Ok(ErrorFormat::Json),
            other => Err(format!("unknown error format {other:?} (expected \"text\" or \"json\")")),
        }
    }
}

impl fmt::Display for ErrorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorFormat::Text => "text",
            ErrorFormat::Json => "json",
        })
    }
}

/// Write one line per annotation.
pub fn print_annotations<W: Write>(
    writer: &mut W,
    annotations: &[Annotation],
    format: ErrorFormat,
) -> std::io::Result<()> {
    for annotation in annotations {
        match format {
            ErrorFormat::Text => writeln!(writer, "{annotation}")?,
            ErrorFormat::Json => {
                let line = serde_json::to_string(annotation)?;
                writeln!(writer, "{line}")?;
            }
        }
    }
    Ok(())
}
