// Sectioned text format shared by the `desc`, `files` and sync entries:
//
//   %TITLE%
//   value or one list item per line
//   <blank line>

#[derive(Debug, Default)]
pub(crate) struct SectionWriter {
    blocks: Vec<String>,
}

impl SectionWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn value(&mut self, title: &str, value: &str) {
        self.blocks.push(format!("%{title}%\n{value}\n"));
    }

    pub(crate) fn optional(&mut self, title: &str, value: &str) {
        if !value.is_empty() {
            self.value(title, value);
        }
    }

    pub(crate) fn number(&mut self, title: &str, value: u64) {
        if value != 0 {
            self.value(title, &value.to_string());
        }
    }

    pub(crate) fn list<T: ToString>(&mut self, title: &str, values: &[T]) {
        if values.is_empty() {
            return;
        }
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        self.value(title, &joined);
    }

    pub(crate) fn flag(&mut self, title: &str, enabled: bool) {
        if enabled {
            self.value(title, "");
        }
    }

    pub(crate) fn finish(self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }
        let mut out = self.blocks.join("\n");
        out.push('\n');
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub(crate) title: String,
    pub(crate) lines: Vec<String>,
}

impl Section {
    pub(crate) fn first(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }
}

pub(crate) fn parse_sections(raw: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for line in raw.lines() {
        match current.as_mut() {
            Some(section) => {
                if line.is_empty() {
                    sections.extend(current.take());
                } else {
                    section.lines.push(line.to_string());
                }
            }
            None => {
                if let Some(title) = line
                    .strip_prefix('%')
                    .and_then(|rest| rest.strip_suffix('%'))
                    .filter(|title| !title.is_empty())
                {
                    current = Some(Section {
                        title: title.to_string(),
                        lines: Vec::new(),
                    });
                }
            }
        }
    }
    sections.extend(current);
    sections
}
