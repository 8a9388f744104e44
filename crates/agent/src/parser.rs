//! Assistant message parser: splits streamed text into content blocks.
//!
//! The model invokes a tool by writing XML-style tags:
//!
//! ```text
//! Let me look at the file.
//! <read_file>
//! <path>src/main.rs</path>
//! </read_file>
//! ```
//!
//! The whole accumulated buffer is re-parsed on every chunk. Blocks closed by
//! a tag never change afterwards; only the trailing block can be partial, so
//! the result depends on the text alone and not on how it was chunked.

use std::collections::{BTreeMap, HashSet};

/// One unit of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        content: String,
        partial: bool,
    },
    ToolUse {
        name: String,
        params: BTreeMap<String, String>,
        partial: bool,
    },
}

impl ContentBlock {
    pub fn is_partial(&self) -> bool {
        match self {
            ContentBlock::Text { partial, .. } | ContentBlock::ToolUse { partial, .. } => *partial,
        }
    }

    pub fn finalize(&mut self) {
        match self {
            ContentBlock::Text { partial, .. } | ContentBlock::ToolUse { partial, .. } => *partial = false,
        }
    }
}

/// Parser for a fixed set of tool names.
#[derive(Debug, Clone)]
pub struct AssistantMessageParser {
    tools: HashSet<String>,
}

impl AssistantMessageParser {
    pub fn new<I, S>(tool_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tool_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(&self, text: &str) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let mut text_start = 0;
        let mut tool: Option<(String, BTreeMap<String, String>)> = None;
        let mut param: Option<(String, usize)> = None;
        let mut i = 0;

        while i < text.len() {
            let rest = &text[i..];

            if let Some((tool_name, params)) = tool.as_mut() {
                if let Some((param_name, value_start)) = &param {
                    let close = format!("</{param_name}>");
                    if rest.starts_with(&close) {
                        params.insert(param_name.clone(), text[*value_start..i].trim().to_string());
                        i += close.len();
                        param = None;
                        continue;
                    }
                } else {
                    let close = format!("</{tool_name}>");
                    if rest.starts_with(&close) {
                        i += close.len();
                        if let Some((name, params)) = tool.take() {
                            blocks.push(ContentBlock::ToolUse { name, params, partial: false });
                        }
                        text_start = i;
                        continue;
                    }
                    if let Some(name) = open_tag(rest) {
                        let len = name.len() + 2;
                        param = Some((name.to_string(), i + len));
                        i += len;
                        continue;
                    }
                }
            } else if let Some(name) = open_tag(rest).filter(|n| self.tools.contains(*n)) {
                let preceding = text[text_start..i].trim();
                if !preceding.is_empty() {
                    blocks.push(ContentBlock::Text {
                        content: preceding.to_string(),
                        partial: false,
                    });
                }
                let len = name.len() + 2;
                tool = Some((name.to_string(), BTreeMap::new()));
                i += len;
                continue;
            }

            i += rest.chars().next().map_or(1, char::len_utf8);
        }

        match tool {
            Some((name, mut params)) => {
                if let Some((param_name, value_start)) = param {
                    params.insert(param_name, text[value_start..].trim().to_string());
                }
                blocks.push(ContentBlock::ToolUse { name, params, partial: true });
            }
            None => {
                let trailing = text[text_start..].trim();
                if !trailing.is_empty() {
                    blocks.push(ContentBlock::Text {
                        content: trailing.to_string(),
                        partial: true,
                    });
                }
            }
        }
        blocks
    }
}

/// Name of a complete `<name>` tag at the start of `s`.
fn open_tag(s: &str) -> Option<&str> {
    let body = s.strip_prefix('<')?;
    let end = body.find('>')?;
    let name = &body[..end];
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(name)
}

/// Text as shown to the operator: reasoning tags removed, and for partial
/// text an unfinished trailing tag cut off.
pub fn display_text(content: &str, partial: bool) -> String {
    let mut text = content.replace("<thinking>\n", "").replace("<thinking>", "");
    text = text.replace("\n</thinking>", "").replace("</thinking>", "");
    if partial {
        if let Some(pos) = text.rfind('<') {
            let unfinished = text[pos + 1..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/');
            if unfinished {
                text.truncate(pos);
            }
        }
    }
    text.trim().to_string()
}
