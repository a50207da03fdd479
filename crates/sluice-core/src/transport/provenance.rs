//! Query-source provenance attached to nodes.
//!
//! A node records the call stack of the query expression that created it.
//! The stack is only consulted to prefix captured errors, so a failure can
//! be traced back to the expression that produced it.

use std::fmt;

/// A line/column position in a query source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A span of a query source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Source file name. Empty for inline queries.
    pub file: String,
    /// Start of the span.
    pub start: Position,
    /// End of the span.
    pub end: Position,
}

impl SourceLocation {
    /// Creates a source location.
    #[must_use]
    pub fn new(file: impl Into<String>, start: Position, end: Position) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.file.is_empty() {
            write!(f, "{}|", self.file)?;
        }
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// One frame of a query call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    /// Where the call appears.
    pub location: SourceLocation,
    /// Name of the called function.
    pub function_name: String,
}

impl StackEntry {
    /// Creates a stack entry.
    #[must_use]
    pub fn new(location: SourceLocation, function_name: impl Into<String>) -> Self {
        Self {
            location,
            function_name: function_name.into(),
        }
    }
}

/// Call stack of a node, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallStack {
    entries: Vec<StackEntry>,
}

impl CallStack {
    /// Creates a stack from frames ordered innermost first.
    #[must_use]
    pub fn new(entries: Vec<StackEntry>) -> Self {
        Self { entries }
    }

    /// Frames, innermost first.
    #[must_use]
    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    /// Returns true if no frames were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Formats the frame that best identifies the node's expression.
    ///
    /// The file of the outermost frame is the primary query file. The
    /// innermost frame from that file is reported as `@<location>: <name>`.
    /// If no frame matches, the innermost frame is used.
    #[must_use]
    pub fn source_info(&self) -> Option<String> {
        let primary = &self.entries.last()?.location.file;
        let entry = self
            .entries
            .iter()
            .find(|e| &e.location.file == primary)
            .or_else(|| self.entries.first())?;
        Some(format!("@{}: {}", entry.location, entry.function_name))
    }
}

impl FromIterator<StackEntry> for CallStack {
    fn from_iter<I: IntoIterator<Item = StackEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Identity of a node in the operator graph.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// Node label, unique within a plan.
    pub id: String,
    /// Call stack of the expression that created the node.
    pub call_stack: CallStack,
}

impl NodeInfo {
    /// Creates node info with an empty call stack.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_stack: CallStack::default(),
        }
    }

    /// Sets the call stack.
    #[must_use]
    pub fn with_call_stack(mut self, call_stack: CallStack) -> Self {
        self.call_stack = call_stack;
        self
    }

    /// Context prefix for errors captured by this node.
    #[must_use]
    pub fn error_context(&self) -> String {
        match self.call_stack.source_info() {
            Some(info) => format!("runtime error {info}"),
            None => "runtime error".to_string(),
        }
    }
}
