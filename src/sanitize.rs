//! Incremental code-fence sanitizer for streamed model output
//!
//! Models like to wrap commit messages in Markdown code fences. The
//! sanitizer strips those wrappers from text that arrives in arbitrary
//! chunks, buffering the trailing incomplete line until a newline (or the
//! end of the stream) decides whether it is a fence marker.

const FENCE: &str = "```";

/// How a single line relates to code fences.
#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    /// A line that opens and closes a fence around content, e.g. `` ```feat: x``` ``
    Fenced(&'a str),
    /// A bare fence marker that opens or closes a block
    Marker,
    /// Anything else
    Plain,
}

/// Inside an open fence only a bare marker counts; everything else is plain.
fn classify(line: &str, in_code_fence: bool) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed == FENCE {
        return LineKind::Marker;
    }
    if in_code_fence {
        return LineKind::Plain;
    }
    if trimmed.len() > FENCE.len() * 2 && trimmed.starts_with(FENCE) && trimmed.ends_with(FENCE)
    {
        let inner = &trimmed[FENCE.len()..trimmed.len() - FENCE.len()];
        return LineKind::Fenced(inner.trim());
    }
    LineKind::Plain
}

/// Output of a single [`StreamSanitizer::push`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedChunk {
    /// Sanitized text that is final; callers append it to what they already have
    pub text: String,
    /// Best-effort rendering of the incomplete trailing line.
    ///
    /// Not append-only: the next call may replace it with something shorter
    /// or different once more text arrives.
    pub preview: String,
}

/// Stateful sanitizer fed with arbitrary-sized chunks.
#[derive(Debug, Default)]
pub struct StreamSanitizer {
    pending_line: String,
    in_code_fence: bool,
}

impl StreamSanitizer {
    /// Create a sanitizer with an empty buffer, outside any fence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fence opened earlier is still unclosed.
    #[must_use]
    pub const fn in_code_fence(&self) -> bool {
        self.in_code_fence
    }

    /// Feed the next chunk and return the text that is safe to show now.
    pub fn push(&mut self, chunk: &str) -> SanitizedChunk {
        self.pending_line.push_str(chunk);

        let mut text = String::new();
        while let Some(newline) = self.pending_line.find('\n') {
            let line: String = self.pending_line.drain(..=newline).collect();
            self.process_line(&line[..line.len() - 1], &mut text);
        }

        let preview = self.resolve_pending(&mut text);
        SanitizedChunk { text, preview }
    }

    /// Flush the buffered trailing line through the same rules, once.
    ///
    /// Calling `finish` again returns an empty string.
    pub fn finish(&mut self) -> String {
        let line = std::mem::take(&mut self.pending_line);
        if line.is_empty() {
            return String::new();
        }
        match classify(&line, self.in_code_fence) {
            LineKind::Fenced(inner) => inner.to_string(),
            LineKind::Marker => {
                self.in_code_fence = !self.in_code_fence;
                String::new()
            }
            LineKind::Plain if self.in_code_fence => String::new(),
            LineKind::Plain => line,
        }
    }

    fn process_line(&mut self, line: &str, out: &mut String) {
        match classify(line, self.in_code_fence) {
            LineKind::Fenced(inner) => {
                out.push_str(inner);
                out.push('\n');
            }
            LineKind::Marker => self.in_code_fence = !self.in_code_fence,
            LineKind::Plain if self.in_code_fence => {}
            LineKind::Plain => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    fn resolve_pending(&mut self, text: &mut String) -> String {
        if self.pending_line.is_empty() {
            return String::new();
        }
        match classify(&self.pending_line, self.in_code_fence) {
            LineKind::Fenced(inner) => {
                text.push_str(inner);
                self.pending_line.clear();
                String::new()
            }
            _ if self.in_code_fence => String::new(),
            _ => self.pending_line.clone(),
        }
    }
}

/// Sanitize a complete text in one go.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let mut sanitizer = StreamSanitizer::new();
    let mut out = sanitizer.push(text).text;
    out.push_str(&sanitizer.finish());
    out
}

/// Sanitizer for sources that send complete-so-far snapshots instead of deltas.
///
/// When a snapshot extends the previous one only the new suffix is pushed;
/// anything else restarts from scratch.
#[derive(Debug, Default)]
pub struct SnapshotSanitizer {
    raw: String,
    committed: String,
    sanitizer: StreamSanitizer,
}

impl SnapshotSanitizer {
    /// Create an empty snapshot sanitizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next snapshot and return the displayable text for it.
    pub fn update(&mut self, snapshot: &str) -> String {
        let chunk = if let Some(suffix) = snapshot.strip_prefix(self.raw.as_str()) {
            self.sanitizer.push(suffix)
        } else {
            self.committed.clear();
            self.sanitizer = StreamSanitizer::new();
            self.sanitizer.push(snapshot)
        };
        self.raw = snapshot.to_string();
        self.committed.push_str(&chunk.text);

        let mut display = self.committed.clone();
        display.push_str(&chunk.preview);
        display
    }
}
