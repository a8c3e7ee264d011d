//! Response sanitization for generated text.
//!
//! Raw model output can leak chat-template role markers and markup. This crate
//! scrubs it into client-safe text, either in one call ([`sanitize`]) or
//! fragment by fragment as a reply streams in ([`StreamSanitizer`]). Both paths
//! share one scanner, so for the same input they produce the same text
//! regardless of how it was fragmented.
//!
//! Two modes are available (see [`SanitizerMode`]):
//! - `Scoped` removes role markers, `<|...|>` special tokens and complete tags
//!   of known HTML elements whose attributes all carry values. Other
//!   bracketed text such as `a<b and c>d` is left alone.
//! - `Compat` applies the legacy denylist: role markers, `<`, `>`, `b`,
//!   `span`, `style`, `font-size`, `18pt`, `;`, `"`, `=`, `/` are deleted
//!   wherever they appear, in one left-to-right longest-match pass.
//!
//! Compat is not byte-for-byte equal to the legacy chained replacements.
//! Deleted text is never rescanned, so whenever a deletion joins its
//! neighbours into a new denylisted token, that token survives here: `sbpan`
//! yields `span` and `1b8pt` yields `18pt`, where the legacy output dropped
//! both.

mod scan;

use tracing::debug;

pub use carebot_shared::SanitizerMode;

use scan::Scanner;

/// Substituted when sanitization leaves nothing to show.
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I couldn't generate a response. Please try rephrasing your question.";

/// Sanitize a complete response.
///
/// Returns [`FALLBACK_MESSAGE`] when the cleaned text is empty or is itself the
/// fallback sentinel.
pub fn sanitize(raw: &str, mode: SanitizerMode) -> String {
    let mut stream = StreamSanitizer::new(mode);
    let mut out = stream.push(raw);
    out.push_str(&stream.finish());
    out
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Incremental sanitizer for a fragment stream.
///
/// Each [`push`](Self::push) returns the text that is final so far. A possible
/// marker split across fragments is held back until it is resolved, and
/// trailing whitespace is held until more visible text arrives.
/// [`finish`](Self::finish) flushes the remainder.
#[derive(Debug)]
pub struct StreamSanitizer {
    scanner: Scanner,
}

impl StreamSanitizer {
    pub fn new(mode: SanitizerMode) -> Self {
        Self {
            scanner: Scanner::new(mode),
        }
    }

    /// Feed one fragment; returns newly decided output (possibly empty).
    pub fn push(&mut self, fragment: &str) -> String {
        self.scanner.feed(fragment, false)
    }

    /// End of stream. Returns the last piece of output, or the fallback message
    /// if nothing visible was ever produced.
    pub fn finish(mut self) -> String {
        let tail = self.scanner.feed("", true);
        if self.scanner.has_output() {
            tail
        } else {
            debug!("sanitized response empty, substituting fallback");
            FALLBACK_MESSAGE.to_string()
        }
    }

    /// Bytes currently held back at a fragment boundary.
    pub fn held_back(&self) -> usize {
        self.scanner.pending_len()
    }
}

/// Lazily sanitize a sequence of fragments.
///
/// Yields only non-empty pieces; the last item carries the flushed tail (or
/// the fallback message).
pub fn sanitize_stream<I>(fragments: I, mode: SanitizerMode) -> SanitizedFragments<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    SanitizedFragments {
        inner: fragments.into_iter(),
        sanitizer: Some(StreamSanitizer::new(mode)),
    }
}

/// Iterator returned by [`sanitize_stream`].
#[derive(Debug)]
pub struct SanitizedFragments<I> {
    inner: I,
    sanitizer: Option<StreamSanitizer>,
}

impl<I> Iterator for SanitizedFragments<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let sanitizer = self.sanitizer.as_mut()?;
            match self.inner.next() {
                Some(fragment) => {
                    let piece = sanitizer.push(fragment.as_ref());
                    if !piece.is_empty() {
                        return Some(piece);
                    }
                }
                None => {
                    let tail = self.sanitizer.take()?.finish();
                    return (!tail.is_empty()).then_some(tail);
                }
            }
        }
    }
}
