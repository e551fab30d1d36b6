//! Template loading: fenced script and schema blocks are pulled out of the
//! template text before it is rendered.
//!
//! Fence grammar (line based):
//! - an opening line starts with three or more backticks followed by an
//!   optional info string (the language tag)
//! - the block closes at the first line holding at least as many
//!   backticks and nothing else
//!
//! Tags: `schema` / `json:schema` carry the answer schema, `<lang>:pre`
//! runs before rendering, `<lang>` or `<lang>:post` runs after. Untagged
//! fences are ordinary template content and stay where they are.

use std::fmt;

use miette::{Diagnostic, SourceSpan};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::schema::Schema;

/// Fatal template-load errors.
#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    #[error("unclosed code fence opened on line {line}")]
    #[diagnostic(
        code(codeprompt::template::unclosed_fence),
        help("close the block with a line of backticks at least as long as the opening fence")
    )]
    UnclosedFence {
        line: usize,
        #[source_code]
        src: String,
        #[label("fence opened here")]
        span: SourceSpan,
    },

    #[error("schema block #{index} is not valid JSON")]
    #[diagnostic(
        code(codeprompt::template::invalid_schema),
        help("a schema block holds an example answer, e.g. {{\"summary\": \"short description\"}}")
    )]
    InvalidSchema {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema block #{second} repeats the schema already given by block #{first}")]
    #[diagnostic(
        code(codeprompt::template::duplicate_schema),
        help("keep a single `schema` block per template")
    )]
    DuplicateSchema { first: usize, second: usize },
}

/// Script dialects the runner knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Shell,
    /// Tagged but not executable; stripped and skipped.
    Other(String),
}

impl Language {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "js" | "javascript" | "node" | "mjs" | "cjs" => Language::JavaScript,
            "python" | "py" | "python3" => Language::Python,
            "bash" | "sh" | "shell" | "zsh" => Language::Shell,
            other => Language::Other(other.to_string()),
        }
    }

    pub fn is_executable(&self) -> bool {
        !matches!(self, Language::Other(_))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::JavaScript => f.write_str("javascript"),
            Language::Python => f.write_str("python"),
            Language::Shell => f.write_str("shell"),
            Language::Other(tag) => f.write_str(tag),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Post,
}

/// An executable block lifted from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptBlock {
    pub language: Language,
    pub phase: Phase,
    pub body: String,
    /// Position among all fenced blocks of the template (1-based)
    pub index: usize,
}

/// Any fenced block found in free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub lang: Option<String>,
    pub code: String,
}

/// Template text with every recognized block removed.
#[derive(Debug, Clone)]
pub struct ExtractedTemplate {
    pub template: String,
    pub blocks: Vec<ScriptBlock>,
    /// Inferred answer schema, unwrapped
    pub schema: Option<Schema>,
}

impl ExtractedTemplate {
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &ScriptBlock> {
        self.blocks
            .iter()
            .filter(move |b| b.phase == phase)
    }
}

/// One fence as seen by the scanner.
struct RawFence<'a> {
    /// Byte range of the whole block, fences included, without the
    /// newline that ends the closing fence
    start: usize,
    end: usize,
    info: &'a str,
    body: String,
}

fn fence_len(line: &str) -> usize {
    line.bytes()
        .take_while(|b| *b == b'`')
        .count()
}

struct OpenFence<'a> {
    start: usize,
    line: usize,
    width: usize,
    info: &'a str,
    body: Vec<&'a str>,
}

fn scan(text: &str) -> Result<Vec<RawFence<'_>>, TemplateError> {
    let mut fences = Vec::new();
    let mut offset = 0;
    let mut open: Option<OpenFence<'_>> = None;

    for (line_no, raw_line) in text.split_inclusive('\n').enumerate() {
        let line = raw_line.trim_end_matches(['\n', '\r']);
        let ticks = fence_len(line);

        if let Some(fence) = open.as_mut() {
            if ticks >= fence.width && line[ticks..].trim().is_empty() {
                if let Some(done) = open.take() {
                    fences.push(RawFence {
                        start: done.start,
                        end: offset + line.len(),
                        info: done.info,
                        body: done.body.join("\n"),
                    });
                }
            } else {
                fence.body.push(line);
            }
        } else if ticks >= 3 && !line[ticks..].contains('`') {
            open = Some(OpenFence {
                start: offset,
                line: line_no + 1,
                width: ticks,
                info: line[ticks..].trim(),
                body: Vec::new(),
            });
        }
        offset += raw_line.len();
    }

    if let Some(fence) = open {
        return Err(TemplateError::UnclosedFence {
            line: fence.line,
            src: text.to_string(),
            span: (fence.start, fence.width).into(),
        });
    }
    Ok(fences)
}

fn is_schema_tag(info: &str) -> bool {
    info == "schema" || info == "json:schema"
}

/// Split a template into renderable text, script blocks and schema.
pub fn extract(text: &str) -> Result<ExtractedTemplate, TemplateError> {
    let fences = scan(text)?;
    let mut blocks = Vec::new();
    let mut schema: Option<(usize, Schema)> = None;
    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0;

    for (i, fence) in fences.iter().enumerate() {
        let index = i + 1;
        if fence.info.is_empty() {
            continue;
        }

        if is_schema_tag(fence.info) {
            if let Some((first, _)) = &schema {
                return Err(TemplateError::DuplicateSchema {
                    first: *first,
                    second: index,
                });
            }
            let example: Value = serde_json::from_str(&fence.body)
                .map_err(|source| TemplateError::InvalidSchema { index, source })?;
            schema = Some((index, Schema::from_example(&example)));
        } else {
            let (tag, phase) = match fence.info.split_once(':') {
                Some((tag, "pre")) => (tag, Some(Phase::Pre)),
                Some((tag, "post")) => (tag, Some(Phase::Post)),
                Some((tag, _)) => (tag, None),
                None => (fence.info, Some(Phase::Post)),
            };
            // Suffixes other than pre/post still strip the block but never run it.
            let language = match phase {
                Some(_) => Language::from_tag(tag),
                None => Language::Other(fence.info.to_string()),
            };
            blocks.push(ScriptBlock {
                language,
                phase: phase.unwrap_or(Phase::Post),
                body: fence.body.clone(),
                index,
            });
        }

        stripped.push_str(&text[cursor..fence.start]);
        cursor = fence.end;
    }
    stripped.push_str(&text[cursor..]);

    Ok(ExtractedTemplate {
        template: stripped,
        blocks,
        schema: schema.map(|(_, s)| s),
    })
}

/// Every fenced block in `text`, tagged or not, e.g. from an LLM reply.
///
/// A trailing unclosed fence is ignored rather than reported.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let fences = match scan(text) {
        Ok(f) => f,
        Err(TemplateError::UnclosedFence { span, .. }) => {
            let head = &text[..span.offset()];
            scan(head).unwrap_or_default()
        }
        Err(_) => Vec::new(),
    };
    fences
        .into_iter()
        .map(|f| CodeBlock {
            lang: (!f.info.is_empty()).then(|| f.info.to_string()),
            code: f.body,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
Intro {{name}}

```js:pre
return { greeting: \"hi\" };
```

```
plain fence stays
```

```python
print(greeting)
```

```schema
{\"summary\": \"what changed\"}
```
Outro
";

    #[test]
    fn test_blocks_are_classified_in_source_order() {
        let out = extract(TEMPLATE).expect("extract");
        let got: Vec<(Language, Phase, usize)> = out
            .blocks
            .iter()
            .map(|b| (b.language.clone(), b.phase, b.index))
            .collect();
        assert_eq!(
            got,
            vec![
                (Language::JavaScript, Phase::Pre, 1),
                (Language::Python, Phase::Post, 3),
            ]
        );
        assert_eq!(out.blocks[0].body, "return { greeting: \"hi\" };");
        assert!(out.schema.is_some());
    }

    #[test]
    fn test_recognized_blocks_are_removed_verbatim() {
        let out = extract(TEMPLATE).expect("extract");
        assert!(!out.template.contains("greeting"));
        assert!(!out.template.contains("summary"));
        assert!(out.template.contains("```\nplain fence stays\n```"));
        assert!(out.template.starts_with("Intro {{name}}\n\n\n"));
        assert!(out.template.ends_with("\nOutro\n"));
    }

    #[test]
    fn test_all_script_template_strips_to_whitespace() {
        let out = extract("```bash:pre\necho A=1\n```\n").expect("extract");
        assert_eq!(out.blocks[0].language, Language::Shell);
        assert!(out.template.trim().is_empty());
    }

    #[test]
    fn test_unknown_suffix_and_dialect_are_not_executable() {
        let out = extract("```ruby\nputs 1\n```\n```js:later\n1\n```\n").expect("extract");
        assert!(out.blocks.iter().all(|b| !b.language.is_executable()));
        assert!(out.template.trim().is_empty());
    }

    #[test]
    fn test_unclosed_fence_reports_line() {
        let err = extract("a\nb\n```js\nreturn 1;\n").unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedFence { line: 3, .. }));
    }

    #[test]
    fn test_schema_errors() {
        let err = extract("```schema\n{not json\n```\n").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidSchema { index: 1, .. }));

        let twice = "```schema\n{}\n```\n```\nx\n```\n```json:schema\n{}\n```\n";
        let err = extract(twice).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::DuplicateSchema { first: 1, second: 3 }
        ));
    }

    #[test]
    fn test_longer_fences_nest_shorter_ones() {
        let text = "````md\n```js\ninner\n```\n````\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "```js\ninner\n```");
    }

    #[test]
    fn test_extract_code_blocks_from_reply() {
        let reply = "Here:\n```rust\nfn a() {}\n```\nand\n```\nraw\n```\n```py\ncut off";
        let blocks = extract_code_blocks(reply);
        assert_eq!(
            blocks,
            vec![
                CodeBlock {
                    lang: Some("rust".into()),
                    code: "fn a() {}".into()
                },
                CodeBlock {
                    lang: None,
                    code: "raw".into()
                },
            ]
        );
    }
}
