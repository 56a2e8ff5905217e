//! Telegram entities to Discord markdown.
//!
//! Tags are never spliced into the text. Each entity contributes to two
//! overlays indexed by UTF-16 offset: `prefix[i]` is emitted before the
//! character at `i`, `suffix[i]` closes whatever ends there. A single scan
//! then interleaves overlays and (escaped) characters.

use tracing::debug;

use crate::bridge::state::EmbedPolicy;
use crate::common::types::{EntityKind, TextEntity};

/// Maximum length of a plain Discord message.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Characters with markdown meaning on Discord. A leading `<` would start a
/// mention or channel token.
const MARKDOWN_SPECIALS: &[char] = &['\\', '*', '_', '~', '|', '`', '<'];

/// Mass mentions Discord expands from plain text.
const MASS_MENTIONS: &[&str] = &["@everyone", "@here"];

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Looks up Discord objects by the names users type on Telegram.
///
/// Lookups are synchronous; implementations answer from a local cache.
pub trait NameResolver: Send + Sync {
    fn find_user_by_display_name(&self, name: &str) -> Option<u64>;
    fn find_channel_by_name(&self, name: &str) -> Option<u64>;
}

/// Resolver that never finds anything; references stay literal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl NameResolver for NoResolver {
    fn find_user_by_display_name(&self, _name: &str) -> Option<u64> {
        None
    }

    fn find_channel_by_name(&self, _name: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions {
    pub embeds: EmbedPolicy,
}

/// Result of a Telegram to Discord translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub markup: String,
    /// Whether the markup should be sent as an embed description.
    pub use_embed: bool,
    /// Users whose mention tokens were emitted; the only ones allowed to be pinged.
    pub mentions: Vec<u64>,
}

/// Per-offset overlay state for one message.
struct Overlay {
    prefix: Vec<String>,
    suffix: Vec<String>,
    /// Characters emitted without markdown escaping.
    verbatim: Vec<bool>,
    /// Characters replaced by a resolved mention token.
    suppressed: Vec<bool>,
}

impl Overlay {
    fn new(len: usize) -> Self {
        Self {
            prefix: vec![String::new(); len + 1],
            suffix: vec![String::new(); len + 1],
            verbatim: vec![false; len],
            suppressed: vec![false; len],
        }
    }

    fn wrap(&mut self, begin: usize, end: usize, open: &str, close: &str) {
        self.prefix[begin].push_str(open);
        // Closers go ahead of what is already there so inner tags close first.
        self.suffix[end].insert_str(0, close);
    }

    fn mark(flags: &mut [bool], begin: usize, end: usize) {
        for flag in &mut flags[begin..end] {
            *flag = true;
        }
    }
}

/// Translate Telegram text plus entities into Discord markdown.
///
/// Never fails: unresolved mentions stay literal and out-of-range entities
/// are clamped to the text.
pub fn to_discord_markdown(
    text: &str,
    entities: &[TextEntity],
    resolver: &dyn NameResolver,
    options: TranslateOptions,
) -> Translated {
    let units: Vec<u16> = text.encode_utf16().collect();
    let len = units.len();
    let mut overlay = Overlay::new(len);
    let mut links = 0usize;
    let mut mentions: Vec<u64> = Vec::new();

    for entity in entities {
        let begin = entity.offset.min(len);
        let end = entity.end().min(len);
        if begin >= end {
            debug!(?entity.kind, offset = entity.offset, "Skipping empty entity");
            continue;
        }
        let covered = String::from_utf16_lossy(&units[begin..end]);

        match &entity.kind {
            EntityKind::Bold => overlay.wrap(begin, end, "**", "**"),
            EntityKind::Italic => {
                let tag = if overlay.prefix[begin].is_empty() { "*" } else { "_" };
                overlay.wrap(begin, end, tag, tag);
            }
            EntityKind::Underline => overlay.wrap(begin, end, "__", "__"),
            EntityKind::Strikethrough => overlay.wrap(begin, end, "~~", "~~"),
            EntityKind::Spoiler => overlay.wrap(begin, end, "||", "||"),
            EntityKind::Code => {
                overlay.wrap(begin, end, "`", "`");
                Overlay::mark(&mut overlay.verbatim, begin, end);
            }
            EntityKind::Pre => {
                let open = match entity.auxiliary.as_deref() {
                    Some(lang) if !lang.is_empty() => format!("```{}\n", lang),
                    _ => "```\n".to_string(),
                };
                overlay.wrap(begin, end, &open, "\n```");
                Overlay::mark(&mut overlay.verbatim, begin, end);
            }
            EntityKind::TextLink => match entity.auxiliary.as_deref() {
                Some(url) if !url.is_empty() => {
                    overlay.wrap(begin, end, "[", &format!("]({})", url));
                    links += 1;
                }
                _ => debug!(text = %covered, "Text link without URL"),
            },
            EntityKind::Url => {
                Overlay::mark(&mut overlay.verbatim, begin, end);
                links += 1;
            }
            EntityKind::Mention | EntityKind::TextMention => {
                let name = match (&entity.kind, entity.auxiliary.as_deref()) {
                    (EntityKind::TextMention, Some(display)) => display.to_string(),
                    _ => covered.trim_start_matches('@').to_string(),
                };
                match resolver.find_user_by_display_name(&name) {
                    Some(id) => {
                        overlay.prefix[begin].push_str(&format!("<@{}>", id));
                        Overlay::mark(&mut overlay.suppressed, begin, end);
                        if !mentions.contains(&id) {
                            mentions.push(id);
                        }
                    }
                    None => debug!(name = %name, "Unresolved user mention"),
                }
            }
            EntityKind::Hashtag => {
                let name = covered.trim_start_matches('#');
                match resolver.find_channel_by_name(name) {
                    Some(id) => {
                        overlay.prefix[begin].push_str(&format!("<#{}>", id));
                        Overlay::mark(&mut overlay.suppressed, begin, end);
                    }
                    None => debug!(name = %name, "Unresolved channel reference"),
                }
            }
            EntityKind::Other(_) => {}
        }
    }

    let markup = render(text, &overlay, len);
    let use_embed = match options.embeds {
        EmbedPolicy::Never => false,
        EmbedPolicy::Always => true,
        EmbedPolicy::Auto => links > 1 || markup.chars().count() > DISCORD_MESSAGE_LIMIT,
    };

    Translated {
        markup,
        use_embed,
        mentions,
    }
}

fn render(text: &str, overlay: &Overlay, len: usize) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut pos = 0usize;

    for (idx, c) in text.char_indices() {
        out.push_str(&overlay.suffix[pos]);
        out.push_str(&overlay.prefix[pos]);
        if !overlay.suppressed[pos] {
            if overlay.verbatim[pos] {
                out.push(c);
            } else {
                push_escaped(&mut out, c, &text[idx..]);
            }
        }

        let width = c.len_utf16();
        // Offsets that fall inside a surrogate pair move to the next boundary.
        for inner in pos + 1..pos + width {
            if inner < len {
                out.push_str(&overlay.suffix[inner]);
                out.push_str(&overlay.prefix[inner]);
            }
        }
        pos += width;
    }

    out.push_str(&overlay.suffix[len]);
    out.push_str(&overlay.prefix[len]);
    out
}

/// Escape markdown specials in text that carries no entities.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, c) in text.char_indices() {
        push_escaped(&mut out, c, &text[idx..]);
    }
    out
}

/// Push `c`, escaped so it cannot form markdown or a ping. `rest` is the
/// text starting at `c`.
fn push_escaped(out: &mut String, c: char, rest: &str) {
    if MARKDOWN_SPECIALS.contains(&c) {
        out.push('\\');
    }
    out.push(c);
    if c == '@' && MASS_MENTIONS.iter().any(|m| rest.starts_with(m)) {
        out.push(ZERO_WIDTH_SPACE);
    }
}
