//! Incremental markup scanner shared by the batch and streaming sanitizers.
//!
//! The scanner walks its input left to right. At each position it either
//! removes a complete match, emits one character, or (when more input may
//! still arrive) stops and keeps the undecided tail for the next call.

use std::sync::LazyLock;

use regex::Regex;

use carebot_shared::SanitizerMode;

/// Longest span examined for a single tag or special token.
pub(crate) const MAX_MARKUP_LEN: usize = 512;

/// Legacy denylist, removed wherever it occurs.
const COMPAT_DENYLIST: &[&str] = &[
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
    "<",
    ">",
    "b",
    "span",
    "style",
    "font-size",
    "18pt",
    ";",
    "\"",
    "=",
    "/",
];

static SPECIAL_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\|[A-Za-z0-9_\-]{0,32}\|>").expect("valid regex"));

static SPECIAL_TOKEN_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(?:\|[A-Za-z0-9_\-]{0,32}\|?)?\z").expect("valid regex"));

/// Element names treated as markup. Anything else in angle brackets is prose.
const TAG_NAMES: &str = "a|abbr|b|big|blockquote|br|center|code|del|div|em|font|h[1-6]|hr|i|img|ins|\
                         li|mark|ol|p|pre|s|small|span|strike|strong|style|sub|sup|table|tbody|td|\
                         th|thead|tr|tt|u|ul";

// Attributes must carry a value, so `<b and c>` is not a tag.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"^(?i)</?(?:{TAG_NAMES})(?:\s+[a-z_:][-a-z0-9_:.]*\s*=\s*(?:"[^"<>]*"|'[^'<>]*'|[^\s"'=<>]+))*\s*/?>"#
    ))
    .expect("valid regex")
});

static TAG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^</?(?:[A-Za-z][A-Za-z0-9\-]*(?:\s[^<>]*)?/?)?\z").expect("valid regex")
});

/// Outcome of matching at one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Match {
    /// No markup starts here.
    None,
    /// Markup of this many bytes starts here and is final.
    Full(usize),
    /// The remaining input is a proper prefix of some markup.
    Partial,
}

/// Match markup at the start of `rest`. With `eos` set no more input follows.
pub(crate) fn match_at(rest: &str, mode: SanitizerMode, eos: bool) -> Match {
    match mode {
        SanitizerMode::Scoped => match_scoped(rest, eos),
        SanitizerMode::Compat => match_compat(rest, eos),
    }
}

fn match_scoped(rest: &str, eos: bool) -> Match {
    if !rest.starts_with('<') {
        return Match::None;
    }

    let window = &rest[..floor_boundary(rest, MAX_MARKUP_LEN)];
    if let Some(m) = SPECIAL_TOKEN_RE.find(window) {
        return Match::Full(m.end());
    }
    if let Some(m) = TAG_RE.find(window) {
        return Match::Full(m.end());
    }

    if !eos
        && rest.len() < MAX_MARKUP_LEN
        && (SPECIAL_TOKEN_PREFIX_RE.is_match(rest) || TAG_PREFIX_RE.is_match(rest))
    {
        return Match::Partial;
    }
    Match::None
}

fn match_compat(rest: &str, eos: bool) -> Match {
    let full = COMPAT_DENYLIST
        .iter()
        .filter(|token| rest.starts_with(*token))
        .map(|token| token.len())
        .max()
        .unwrap_or(0);

    let longer_pending = !eos
        && COMPAT_DENYLIST
            .iter()
            .any(|token| token.len() > full && token.len() > rest.len() && token.starts_with(rest));

    if longer_pending {
        Match::Partial
    } else if full > 0 {
        Match::Full(full)
    } else {
        Match::None
    }
}

/// Largest char boundary of `s` that is `<= max`.
fn floor_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Whitespace trimming
// ---------------------------------------------------------------------------

/// Drops leading whitespace and holds trailing whitespace until more text follows.
#[derive(Debug, Default)]
pub(crate) struct Trim {
    started: bool,
    held: String,
}

impl Trim {
    pub(crate) fn push(&mut self, c: char, out: &mut String) {
        if c.is_whitespace() {
            if self.started {
                self.held.push(c);
            }
            return;
        }
        if !self.held.is_empty() {
            out.push_str(&self.held);
            self.held.clear();
        }
        out.push(c);
        self.started = true;
    }

    /// Whether any visible character has been emitted.
    pub(crate) fn started(&self) -> bool {
        self.started
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Markup scanner with a carry-over buffer for undecided input.
#[derive(Debug)]
pub(crate) struct Scanner {
    mode: SanitizerMode,
    pending: String,
    trim: Trim,
}

impl Scanner {
    pub(crate) fn new(mode: SanitizerMode) -> Self {
        Self {
            mode,
            pending: String::new(),
            trim: Trim::default(),
        }
    }

    /// Append input and return whatever text is now decided.
    pub(crate) fn feed(&mut self, input: &str, eos: bool) -> String {
        self.pending.push_str(input);

        let mut out = String::new();
        let mut i = 0;
        while i < self.pending.len() {
            let rest = &self.pending[i..];
            match match_at(rest, self.mode, eos) {
                Match::Full(len) => i += len,
                Match::Partial => break,
                Match::None => {
                    let Some(c) = rest.chars().next() else { break };
                    self.trim.push(c, &mut out);
                    i += c.len_utf8();
                }
            }
        }
        self.pending.drain(..i);
        out
    }

    pub(crate) fn has_output(&self) -> bool {
        self.trim.started()
    }

    /// Bytes currently held back waiting for more input.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
