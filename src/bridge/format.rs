//! Headers, notices and chunking for relayed messages.
//!
//! Everything here produces markup for the *destination* side: Discord
//! markdown or Telegram HTML.

use crate::common::messages::{MemberEvent, ReplyRef};
use crate::common::types::Side;
use crate::markup::{escape_html, escape_markdown, DISCORD_MESSAGE_LIMIT};

/// Maximum length of a Discord embed description.
pub const DISCORD_EMBED_LIMIT: usize = 4096;

/// Maximum length of a Telegram text message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Characters of the replied message kept in an inline quote.
pub const QUOTE_MAX_CHARS: usize = 60;

/// Characters of content included in dispatch failure logs.
pub const LOG_CONTENT_CHARS: usize = 100;

/// Chunk size for a destination.
pub fn chunk_limit(destination: Side, as_embed: bool) -> usize {
    match destination {
        Side::Discord if as_embed => DISCORD_EMBED_LIMIT,
        Side::Discord => DISCORD_MESSAGE_LIMIT,
        Side::Telegram => TELEGRAM_MESSAGE_LIMIT,
    }
}

/// Escape user-supplied text for the destination markup.
pub fn escape_for(destination: Side, text: &str) -> String {
    match destination {
        Side::Discord => escape_markdown(text),
        Side::Telegram => escape_html(text),
    }
}

/// Bold sender name line.
pub fn name_header(destination: Side, name: &str) -> String {
    let name = escape_for(destination, name);
    match destination {
        Side::Discord => format!("**{}**\n", name),
        Side::Telegram => format!("<b>{}</b>\n", name),
    }
}

/// "Forwarded from" line.
pub fn forward_header(destination: Side, from: &str) -> String {
    let from = escape_for(destination, from);
    match destination {
        Side::Discord => format!("*Forwarded from {}*\n", from),
        Side::Telegram => format!("<i>Forwarded from {}</i>\n", from),
    }
}

/// Inline quote for a reply whose target was never relayed.
pub fn reply_quote(destination: Side, reply: &ReplyRef) -> String {
    let excerpt = excerpt(&reply.text, QUOTE_MAX_CHARS);
    let author = escape_for(destination, &reply.author);
    let excerpt = escape_for(destination, &excerpt);
    match destination {
        Side::Discord => format!("> **{}**: {}\n", author, excerpt),
        Side::Telegram => format!("<blockquote><b>{}</b>: {}</blockquote>\n", author, excerpt),
    }
}

/// Join/leave announcement.
pub fn member_notice(destination: Side, name: &str, event: MemberEvent) -> String {
    let verb = match event {
        MemberEvent::Joined => "joined",
        MemberEvent::Left => "left",
    };
    let name = escape_for(destination, name);
    match destination {
        Side::Discord => format!("**{}** {} the chat", name, verb),
        Side::Telegram => format!("<b>{}</b> {} the chat", name, verb),
    }
}

/// First line of `text`, cut to `max_chars` with an ellipsis.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Cut `text` for log output.
pub fn truncate_for_log(text: &str) -> String {
    if text.chars().count() <= LOG_CONTENT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(LOG_CONTENT_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Split markup into chunks of at most `max_chars` characters.
///
/// Splits prefer the last newline, then the last space, inside the window;
/// the whitespace stays at the end of the earlier chunk. An HTML tag is never
/// split. Elements still open at a split are closed at the end of that chunk
/// and reopened at the start of the next, so every chunk is well-formed on
/// its own. With those added tags removed, the chunks concatenate to the
/// input exactly.
pub fn chunk_markup(markup: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut open: Vec<OpenElement> = Vec::new();
    let mut remaining = markup;

    while !remaining.is_empty() {
        let reopen: String = open.iter().map(|e| e.tag.as_str()).collect();
        let reopen_chars = reopen.chars().count();
        let mut budget = max_chars.saturating_sub(reopen_chars).max(1);

        // Shrink the window until reopened and closing tags fit as well.
        let (cut, stack) = loop {
            let cut = absorb_closers(remaining, find_cut(remaining, budget));
            let mut stack = open.clone();
            track_elements(&remaining[..cut], &mut stack);
            let closing = if cut < remaining.len() { closers(&stack).chars().count() } else { 0 };
            let used = reopen_chars + remaining[..cut].chars().count() + closing;
            if used <= max_chars || budget == 1 {
                break (cut, stack);
            }
            budget = budget.saturating_sub(used - max_chars).max(1);
        };

        let mut chunk = reopen;
        chunk.push_str(&remaining[..cut]);
        if cut < remaining.len() {
            chunk.push_str(&closers(&stack));
        }
        chunks.push(chunk);
        remaining = &remaining[cut..];
        open = stack;
    }

    chunks
}

/// HTML element open at a chunk boundary.
#[derive(Debug, Clone)]
struct OpenElement {
    name: String,
    /// Opening tag as written, replayed at the start of the next chunk.
    tag: String,
}

/// Byte index to split `text` at, keeping at most `budget` characters.
///
/// Positions inside a tag, or before any text, are not split points. When
/// the window has none, the first one past it is used.
fn find_cut(text: &str, budget: usize) -> usize {
    if text.chars().count() <= budget {
        return text.len();
    }

    let mut in_tag = false;
    let mut seen_text = false;
    let mut prev = None;
    let (mut newline, mut space, mut safe) = (None, None, None);

    for (count, (idx, c)) in text.char_indices().enumerate() {
        let end = idx + c.len_utf8();
        if in_tag {
            in_tag = c != '>';
        } else if c == '<' && prev != Some('\\') {
            in_tag = true;
        } else {
            seen_text = true;
        }
        prev = Some(c);

        let boundary = !in_tag && seen_text;
        if count >= budget {
            if safe.is_some() {
                break;
            }
            if boundary {
                return end;
            }
            continue;
        }
        if boundary {
            safe = Some(end);
            match c {
                '\n' => newline = Some(end),
                ' ' => space = Some(end),
                _ => {}
            }
        }
    }

    newline.or(space).or(safe).unwrap_or(text.len())
}

/// Move `cut` past closing tags that directly follow it.
fn absorb_closers(text: &str, mut cut: usize) -> usize {
    while text[cut..].starts_with("</") {
        match text[cut..].find('>') {
            Some(gt) => cut += gt + 1,
            None => break,
        }
    }
    cut
}

/// Apply the opening and closing tags in `text` to `stack`.
fn track_elements(text: &str, stack: &mut Vec<OpenElement>) {
    let mut rest = text;
    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        if rest[..lt].ends_with('\\') {
            rest = after;
            continue;
        }
        let Some(gt) = after.find('>') else {
            break;
        };
        let body = &after[..gt];
        if let Some(name) = body.strip_prefix('/') {
            let name = name.trim();
            if let Some(pos) = stack.iter().rposition(|e| e.name == name) {
                stack.truncate(pos);
            }
        } else if let Some(name) = element_name(body) {
            stack.push(OpenElement {
                name: name.to_string(),
                tag: rest[lt..lt + gt + 2].to_string(),
            });
        }
        rest = &after[gt + 1..];
    }
}

/// Element name of an opening tag body. Discord tokens like `<@1>` or
/// `<https://...>` are not elements.
fn element_name(body: &str) -> Option<&str> {
    if body.ends_with('/') {
        return None;
    }
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(body.len());
    let name = &body[..end];
    let follows = body[end..].chars().next();
    (name.starts_with(|c: char| c.is_ascii_alphabetic()) && follows.map_or(true, char::is_whitespace)).then_some(name)
}

fn closers(stack: &[OpenElement]) -> String {
    stack.iter().rev().map(|e| format!("</{}>", e.name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::to_telegram_html;

    #[test]
    fn test_short_markup_is_single_chunk() {
        assert_eq!(chunk_markup("hello", 10), vec!["hello"]);
        assert!(chunk_markup("", 10).is_empty());
    }

    #[test]
    fn test_chunks_concatenate_to_input() {
        let text = "The quick brown fox jumps over the lazy dog.\nSecond line here, also long enough.";
        for limit in [5, 10, 17, 40] {
            let chunks = chunk_markup(text, limit);
            assert_eq!(chunks.concat(), text);
            assert!(chunks.iter().all(|c| c.chars().count() <= limit));
        }
    }

    #[test]
    fn test_prefers_newline_then_space() {
        assert_eq!(chunk_markup("aaa bbb\nccc ddd", 12), vec!["aaa bbb\n", "ccc ddd"]);
        assert_eq!(chunk_markup("aaa bbb ccc", 8), vec!["aaa bbb ", "ccc"]);
    }

    #[test]
    fn test_hard_split_without_whitespace() {
        assert_eq!(chunk_markup("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_characters() {
        let chunks = chunk_markup("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_never_splits_inside_tag() {
        let chunks = chunk_markup("abc<b>bold</b>", 5);
        assert_eq!(chunks[0], "abc");
        assert!(chunks.iter().all(|c| c.matches('<').count() == c.matches('>').count()));
        assert_eq!(chunks.concat().replace("</b><b>", ""), "abc<b>bold</b>");
    }

    #[test]
    fn test_tag_at_window_start_is_kept_whole() {
        let markup = r#"<a href="https://example.com/a b">link</a> tail"#;
        let chunks = chunk_markup(markup, 10);
        assert!(chunks[0].starts_with(r#"<a href="https://example.com/a b">"#));
        assert!(chunks[0].ends_with("</a>"));
    }

    #[test]
    fn test_chunks_are_tag_balanced() {
        let html = to_telegram_html(&format!("**{}**", "word ".repeat(1000)));
        let chunks = chunk_markup(&html, TELEGRAM_MESSAGE_LIMIT);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= TELEGRAM_MESSAGE_LIMIT);
            assert!(chunk.starts_with("<b>"), "chunk opens with {:?}", &chunk[..10]);
            assert!(chunk.ends_with("</b>"));
            assert_eq!(chunk.matches("<b>").count(), chunk.matches("</b>").count());
        }
        assert_eq!(chunks.concat().replace("</b><b>", ""), html);
    }

    #[test]
    fn test_nested_elements_reopen_in_order() {
        let html = r#"<pre><code class="language-rust">let a = 1;
let b = 2;</code></pre>"#;
        let chunks = chunk_markup(html, 60);
        assert_eq!(
            chunks,
            vec![
                "<pre><code class=\"language-rust\">let a = 1;\n</code></pre>",
                "<pre><code class=\"language-rust\">let b = 2;</code></pre>",
            ]
        );
    }

    #[test]
    fn test_discord_tokens_are_not_elements() {
        let chunks = chunk_markup("hi <@111> and <#222> there", 12);
        assert_eq!(chunks.concat(), "hi <@111> and <#222> there");
        assert!(chunks.iter().all(|c| !c.contains("</")));
    }

    #[test]
    fn test_headers_escape_names() {
        assert_eq!(name_header(Side::Discord, "a_b"), "**a\\_b**\n");
        assert_eq!(name_header(Side::Telegram, "<x>"), "<b>&lt;x&gt;</b>\n");
        assert_eq!(forward_header(Side::Telegram, "News"), "<i>Forwarded from News</i>\n");
    }

    #[test]
    fn test_reply_quote_uses_first_line() {
        let reply = ReplyRef {
            id: 1,
            author: "bob".into(),
            text: format!("{}\nsecond", "x".repeat(80)),
        };
        let quote = reply_quote(Side::Discord, &reply);
        assert!(quote.starts_with("> **bob**: "));
        assert!(!quote.contains("second"));
        assert_eq!(excerpt(&reply.text, QUOTE_MAX_CHARS).chars().count(), QUOTE_MAX_CHARS);
    }

    #[test]
    fn test_member_notice() {
        assert_eq!(member_notice(Side::Discord, "ann", MemberEvent::Joined), "**ann** joined the chat");
        assert_eq!(member_notice(Side::Telegram, "ann", MemberEvent::Left), "<b>ann</b> left the chat");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short"), "short");
        assert_eq!(truncate_for_log(&"y".repeat(150)).len(), LOG_CONTENT_CHARS + 3);
    }
}
