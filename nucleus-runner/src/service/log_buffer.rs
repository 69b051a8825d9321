//! Command log buffers
//!
//! Output of user commands is collected into a [`LogBuffer`] owned by whoever runs
//! the commands. Concurrent submodule tasks each own a private buffer; the
//! coordinator appends them to the shared buffer after the barrier, in declaration
//! order.

/// Append-only text buffer for captured command output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    contents: String,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer that starts with a header line
    pub fn with_header(header: impl AsRef<str>) -> Self {
        let mut buffer = Self::new();
        buffer.write_line(header);
        buffer
    }

    /// Appends a line, adding the trailing newline
    pub fn write_line(&mut self, line: impl AsRef<str>) {
        self.contents.push_str(line.as_ref());
        self.contents.push('\n');
    }

    /// Appends raw output as-is
    pub fn write(&mut self, chunk: impl AsRef<str>) {
        self.contents.push_str(chunk.as_ref());
    }

    /// Moves another buffer's contents onto the end of this one
    pub fn append(&mut self, other: LogBuffer) {
        self.contents.push_str(&other.contents);
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.contents
    }
}
