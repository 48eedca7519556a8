//! Regex-free extraction of elements from XML-ish text.
//!
//! The scanner locates the next opening tag by literal substring search and then scans forward
//! to the first matching closing tag. Nested elements with the *same* name are not supported
//! (the first closing tag always wins), unrelated nested elements are skipped over naturally.
//! No entity decoding is performed.

use std::{borrow::Cow, iter::FusedIterator};

use memchr::memmem;

/// Byte offsets of one element inside the scanned text.
///
/// `start..end` covers the whole element including its tags,
/// `inner_start..inner_end` only its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementSpan {
    start: usize,
    inner_start: usize,
    inner_end: usize,
    end: usize,
}

struct TagFinder {
    open: memmem::Finder<'static>,
    close: memmem::Finder<'static>,
}

impl TagFinder {
    /// Returns `None` for an empty tag name, which can never match.
    fn new(tag: &str) -> Option<Self> {
        if tag.is_empty() {
            return None;
        }

        Some(Self {
            open: memmem::Finder::new(format!("<{tag}").as_bytes()).into_owned(),
            close: memmem::Finder::new(format!("</{tag}>").as_bytes()).into_owned(),
        })
    }

    fn find_from(&self, text: &str, mut from: usize) -> Option<ElementSpan> {
        let bytes = text.as_bytes();

        while from < bytes.len() {
            let start = from + self.open.find(&bytes[from..])?;
            let after_name = start + self.open.needle().len();

            // `<id` must not match `<idx>`
            match bytes.get(after_name) {
                Some(b'>' | b'/') => {}
                Some(b) if b.is_ascii_whitespace() => {}
                _ => {
                    from = after_name;
                    continue;
                }
            }

            // unterminated opening tag, nothing can match after this point
            let open_end = after_name + memchr::memchr(b'>', &bytes[after_name..])? + 1;

            if bytes[open_end - 2] == b'/' {
                // self-closing element, e.g. `<minor/>` or `<contributor deleted="deleted" />`
                return Some(ElementSpan {
                    start,
                    inner_start: open_end,
                    inner_end: open_end,
                    end: open_end,
                });
            }

            match self.close.find(&bytes[open_end..]) {
                Some(offset) => {
                    let inner_end = open_end + offset;
                    return Some(ElementSpan {
                        start,
                        inner_start: open_end,
                        inner_end,
                        end: inner_end + self.close.needle().len(),
                    });
                }
                None => {
                    // no closing tag for this occurrence, a later self-closing one may still match
                    from = open_end;
                }
            }
        }

        None
    }
}

/// Lazy iterator over all top-level occurrences of one element, see [`extract_all`].
pub struct ExtractAll<'a> {
    text: &'a str,
    finder: Option<TagFinder>,
    pos: usize,
}

impl<'a> Iterator for ExtractAll<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let finder = self.finder.as_ref()?;

        match finder.find_from(self.text, self.pos) {
            Some(span) => {
                self.pos = span.end;
                Some(&self.text[span.start..span.end])
            }
            None => {
                self.finder = None;
                None
            }
        }
    }
}

impl FusedIterator for ExtractAll<'_> {}

/// Iterate over every non-overlapping occurrence of `<tag ...>...</tag>` in `text`, in document order.
///
/// Each item is the full element including its opening and closing tag. Attributes in the
/// opening tag and newlines in the body are allowed. An occurrence without a closing tag
/// produces no item.
///
/// # Example
///
/// ```
/// let page = "<page><revision><id>1</id></revision><revision><id>2</id></revision></page>";
/// let revisions: Vec<_> = revstats::utils::extract_all(page, "revision").collect();
/// assert_eq!(revisions, ["<revision><id>1</id></revision>", "<revision><id>2</id></revision>"]);
/// ```
pub fn extract_all<'a>(text: &'a str, tag: &str) -> ExtractAll<'a> {
    ExtractAll {
        text,
        finder: TagFinder::new(tag),
        pos: 0,
    }
}

/// Content of the first `tag` element in `xml`, `None` if there is none.
pub fn find_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    TagFinder::new(tag)
        .and_then(|finder| finder.find_from(xml, 0))
        .map(|span| &xml[span.inner_start..span.inner_end])
}

/// Return the content of the first `tag` element in `xml`, or `""` if there is none.
pub fn extract_text<'a>(xml: &'a str, tag: &str) -> &'a str {
    find_text(xml, tag).unwrap_or("")
}

/// Split `text` around the first `tag` element into `(before, element, after)`.
///
/// Lets callers look at the fields surrounding a child element without copying the text.
pub fn split_at_element<'a>(text: &'a str, tag: &str) -> Option<(&'a str, &'a str, &'a str)> {
    let span = TagFinder::new(tag)?.find_from(text, 0)?;
    Some((
        &text[..span.start],
        &text[span.start..span.end],
        &text[span.end..],
    ))
}

/// Remove every top-level `tag` element from `text`.
///
/// Used to look up fields of an outer element without picking up same-named fields of its children,
/// e.g. the page `<id>` vs. the `<id>` of its revisions.
///
/// This function is optimized for the case where nothing is removed and returns the input unchanged then.
pub fn strip_elements<'a>(text: &'a str, tag: &str) -> Cow<'a, str> {
    let Some(finder) = TagFinder::new(tag) else {
        return Cow::Borrowed(text);
    };

    let mut result = String::new();
    let mut last_end = 0;
    while let Some(span) = finder.find_from(text, last_end) {
        result.push_str(&text[last_end..span.start]);
        last_end = span.end;
    }

    if last_end == 0 {
        Cow::Borrowed(text)
    } else {
        result.push_str(&text[last_end..]);
        Cow::Owned(result)
    }
}
