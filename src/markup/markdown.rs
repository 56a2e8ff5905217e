//! Discord markdown to Telegram HTML.
//!
//! Telegram's HTML subset does not allow arbitrary nesting, so the parse
//! tree is flattened on output: only the outermost inline node becomes a
//! tag and everything below it is rendered as plain text.

/// Block-level node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Paragraph(Vec<Inline>),
    Pre { language: Option<String>, code: String },
    /// Horizontal rule; keeps its source text.
    Rule(String),
}

/// Inline node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inline {
    Text(String),
    LineBreak,
    Bold(Vec<Inline>),
    Italic(Vec<Inline>),
    Underline(Vec<Inline>),
    Strikethrough(Vec<Inline>),
    Spoiler(Vec<Inline>),
    Code(String),
    Pre { language: Option<String>, code: String },
}

/// Translate Discord markdown into Telegram HTML.
///
/// Blocks are separated by exactly one blank line: runs of blank lines
/// collapse to one, and leading or trailing blank lines are dropped.
pub fn to_telegram_html(markdown: &str) -> String {
    let escaped = escape_html(markdown);
    parse_blocks(&escaped)
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Escape the characters Telegram's HTML parser reserves.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Block parsing
// ---------------------------------------------------------------------------

fn parse_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("```") {
            // A fence that also closes on its own line is inline pre.
            if !rest.contains("```") {
                if let Some(close) = (i + 1..lines.len()).find(|&j| lines[j].trim() == "```") {
                    flush_paragraph(&mut paragraph, &mut blocks);
                    let language = Some(rest.trim()).filter(|l| !l.is_empty()).map(str::to_string);
                    blocks.push(Block::Pre {
                        language,
                        code: lines[i + 1..close].join("\n"),
                    });
                    i = close + 1;
                    continue;
                }
            }
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else if is_rule(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Rule(trimmed.to_string()));
        } else {
            paragraph.push(line);
        }
        i += 1;
    }
    flush_paragraph(&mut paragraph, &mut blocks);

    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    blocks.push(Block::Paragraph(parse_inline(&paragraph.join("\n"))));
    paragraph.clear();
}

fn is_rule(line: &str) -> bool {
    let mut chars = line.chars();
    match chars.next() {
        Some(first @ ('-' | '*' | '_')) => line.chars().count() >= 3 && chars.all(|c| c == first),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Inline parsing
// ---------------------------------------------------------------------------

const PAIRED: &[(&str, fn(Vec<Inline>) -> Inline)] = &[
    ("**", Inline::Bold),
    ("__", Inline::Underline),
    ("~~", Inline::Strikethrough),
    ("||", Inline::Spoiler),
];

fn parse_inline(text: &str) -> Vec<Inline> {
    let mut nodes = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if let Some(after) = rest.strip_prefix('\\') {
            match after.chars().next() {
                Some(next) if next.is_ascii_punctuation() => {
                    literal.push(next);
                    i += 1 + next.len_utf8();
                }
                _ => {
                    literal.push('\\');
                    i += 1;
                }
            }
            continue;
        }

        if rest.starts_with("```") {
            if let Some(close) = find_plain(&rest[3..], "```") {
                flush_text(&mut literal, &mut nodes);
                nodes.push(inline_pre(&rest[3..3 + close]));
                i += 3 + close + 3;
                continue;
            }
            literal.push_str("```");
            i += 3;
            continue;
        }

        if rest.starts_with('`') {
            if let Some(close) = find_plain(&rest[1..], "`") {
                if close > 0 {
                    flush_text(&mut literal, &mut nodes);
                    nodes.push(Inline::Code(rest[1..1 + close].to_string()));
                    i += close + 2;
                    continue;
                }
            }
            literal.push('`');
            i += 1;
            continue;
        }

        if let Some((delim, build)) = PAIRED.iter().find(|(d, _)| rest.starts_with(*d)) {
            let inner = &rest[delim.len()..];
            match find_closing(inner, delim) {
                Some(close) if close > 0 => {
                    flush_text(&mut literal, &mut nodes);
                    nodes.push(build(parse_inline(&inner[..close])));
                    i += delim.len() * 2 + close;
                }
                _ => {
                    literal.push_str(delim);
                    i += delim.len();
                }
            }
            continue;
        }

        if let Some(marker) = rest.chars().next().filter(|c| *c == '*' || *c == '_') {
            let opens = marker == '*' || !text[..i].chars().next_back().is_some_and(char::is_alphanumeric);
            if opens {
                if let Some(close) = find_single(&rest[1..], marker) {
                    flush_text(&mut literal, &mut nodes);
                    nodes.push(Inline::Italic(parse_inline(&rest[1..1 + close])));
                    i += close + 2;
                    continue;
                }
            }
            literal.push(marker);
            i += 1;
            continue;
        }

        if rest.starts_with('\n') {
            flush_text(&mut literal, &mut nodes);
            nodes.push(Inline::LineBreak);
            i += 1;
            continue;
        }

        if let Some(c) = rest.chars().next() {
            literal.push(c);
            i += c.len_utf8();
        }
    }
    flush_text(&mut literal, &mut nodes);

    nodes
}

fn flush_text(literal: &mut String, nodes: &mut Vec<Inline>) {
    if !literal.is_empty() {
        nodes.push(Inline::Text(std::mem::take(literal)));
    }
}

/// Inline ```lang\ncode``` or ```code```.
fn inline_pre(body: &str) -> Inline {
    if let Some((first, code)) = body.split_once('\n') {
        let first = first.trim();
        if !first.is_empty() && !first.contains(char::is_whitespace) {
            return Inline::Pre {
                language: Some(first.to_string()),
                code: code.to_string(),
            };
        }
    }
    Inline::Pre {
        language: None,
        code: body.to_string(),
    }
}

/// Byte offset of `delim` in `text`, with no escape handling (code spans).
fn find_plain(text: &str, delim: &str) -> Option<usize> {
    text.find(delim)
}

/// Byte offset of the closing `delim`, skipping backslash escapes.
fn find_closing(text: &str, delim: &str) -> Option<usize> {
    let mut j = 0;
    while j < text.len() {
        let rest = &text[j..];
        if rest.starts_with('\\') {
            j += 1 + rest[1..].chars().next().map_or(0, char::len_utf8);
            continue;
        }
        if rest.starts_with(delim) {
            return Some(j);
        }
        j += rest.chars().next().map_or(1, char::len_utf8);
    }
    None
}

/// Closing single `*` / `_`, skipping escapes and doubled markers.
fn find_single(text: &str, marker: char) -> Option<usize> {
    let doubled: String = [marker, marker].iter().collect();
    let mut j = 0;
    while j < text.len() {
        let rest = &text[j..];
        if rest.starts_with('\\') {
            j += 1 + rest[1..].chars().next().map_or(0, char::len_utf8);
            continue;
        }
        if rest.starts_with(doubled.as_str()) {
            j += 2;
            continue;
        }
        if rest.starts_with(marker) {
            let closes = marker == '*' || !rest[1..].chars().next().is_some_and(char::is_alphanumeric);
            if j > 0 && closes {
                return Some(j);
            }
        }
        if rest.starts_with('\n') && text[j + 1..].starts_with('\n') {
            return None;
        }
        j += rest.chars().next().map_or(1, char::len_utf8);
    }
    None
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_block(block: &Block) -> String {
    match block {
        Block::Paragraph(nodes) => nodes.iter().map(render_inline).collect(),
        Block::Pre { language, code } => render_pre(language.as_deref(), code),
        Block::Rule(source) => source.clone(),
    }
}

fn render_inline(node: &Inline) -> String {
    match node {
        Inline::Text(text) => text.clone(),
        Inline::LineBreak => "\n".to_string(),
        Inline::Bold(children) => wrap("b", children),
        Inline::Italic(children) => wrap("i", children),
        Inline::Underline(children) => wrap("u", children),
        Inline::Strikethrough(children) => wrap("s", children),
        Inline::Spoiler(children) => wrap("tg-spoiler", children),
        Inline::Code(code) => format!("<code>{}</code>", code),
        Inline::Pre { language, code } => render_pre(language.as_deref(), code),
    }
}

fn render_pre(language: Option<&str>, code: &str) -> String {
    match language {
        Some(lang) => format!("<pre><code class=\"language-{}\">{}</code></pre>", lang, code),
        None => format!("<pre>{}</pre>", code),
    }
}

fn wrap(tag: &str, children: &[Inline]) -> String {
    format!("<{tag}>{}</{tag}>", plain_text(children))
}

fn plain_text(nodes: &[Inline]) -> String {
    nodes
        .iter()
        .map(|node| match node {
            Inline::Text(text) => text.clone(),
            Inline::LineBreak => "\n".to_string(),
            Inline::Bold(children)
            | Inline::Italic(children)
            | Inline::Underline(children)
            | Inline::Strikethrough(children)
            | Inline::Spoiler(children) => plain_text(children),
            Inline::Code(code) => code.clone(),
            Inline::Pre { code, .. } => code.clone(),
        })
        .collect()
}
