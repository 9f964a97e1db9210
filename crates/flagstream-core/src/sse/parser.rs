use std::collections::BTreeMap;

const ID: &str = "id";
const EVENT: &str = "event";
const DATA: &str = "data";
const ERROR_EVENT: &str = "error";

/// One complete server-sent event: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    fields: BTreeMap<String, String>,
    comment: bool,
}

impl SseFrame {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID)
    }

    pub fn event(&self) -> Option<&str> {
        self.get(EVENT)
    }

    pub fn data(&self) -> Option<&str> {
        self.get(DATA)
    }

    /// A frame consisting only of comment lines.
    pub fn is_keep_alive(&self) -> bool {
        self.comment && self.fields.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.event() == Some(ERROR_EVENT)
    }

    /// Build a frame from field pairs, as if each had been read on its
    /// own line.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut frame = Self::default();
        for (name, value) in fields {
            frame.set(name, value);
        }
        frame
    }

    fn set(&mut self, name: &str, value: &str) {
        if name == DATA {
            if let Some(existing) = self.fields.get_mut(DATA) {
                existing.push('\n');
                existing.push_str(value);
                return;
            }
        }
        self.fields.insert(name.to_owned(), value.to_owned());
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.comment
    }
}

/// Incremental line-to-frame assembler.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    pending: SseFrame,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without terminator). Returns a frame when `line`
    /// is the blank line that terminates it.
    pub fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.pending.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.pending));
        }

        if line.starts_with(':') {
            self.pending.comment = true;
            return None;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        self.pending.set(name, value);
        None
    }
}
