//! Scanner that splits an HTML fragment into text runs, `<img>` tags and page markers.
//!
//! Only the pieces the rewriter cares about are recognized; everything else is passed through as
//! text byte for byte, so concatenating the tokens of a fragment yields the fragment again.

/// Marker that opens each page block in a multi-page fragment.
pub const PAGE_MARKER: &str = "<div data-key='single-page'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    /// A complete `<img ...>` tag, angle brackets included.
    Image(&'a str),
    PageMarker,
}

/// Lazy token iterator over a fragment. Cloning restarts from the clone's position.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

pub fn tokenize(html: &str) -> Tokens<'_> {
    Tokens { src: html, pos: 0 }
}

/// True if the fragment contains at least one complete `<img>` tag.
pub fn has_image_tag(html: &str) -> bool {
    tokenize(html).any(|t| matches!(t, Token::Image(_)))
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = &self.src[self.pos..];
        if rest.is_empty() {
            return None;
        }
        if rest.starts_with(PAGE_MARKER) {
            self.pos += PAGE_MARKER.len();
            return Some(Token::PageMarker);
        }
        if let Some(len) = image_tag_len(rest) {
            self.pos += len;
            return Some(Token::Image(&rest[..len]));
        }
        let end = rest
            .match_indices('<')
            .map(|(i, _)| i)
            .find(|&i| i > 0 && starts_token(&rest[i..]))
            .unwrap_or(rest.len());
        self.pos += end;
        Some(Token::Text(&rest[..end]))
    }
}

fn starts_token(s: &str) -> bool {
    s.starts_with(PAGE_MARKER) || image_tag_len(s).is_some()
}

/// Length of the `<img ...>` tag at the start of `s`, or None if `s` does not start with a
/// terminated image tag. A `>` inside a quoted attribute value does not close the tag.
fn image_tag_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 5 || !bytes[..4].eq_ignore_ascii_case(b"<img") {
        return None;
    }
    if !matches!(bytes[4], b' ' | b'\t' | b'\n' | b'\r' | b'/' | b'>') {
        return None;
    }
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(4) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    name: String,
    value: Option<String>,
    quote: Option<char>,
}

/// Attributes of one parsed `<img>` tag, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    attrs: Vec<Attribute>,
    self_closing: bool,
}

impl ImageTag {
    /// Parse a tag produced by [`Token::Image`]. Returns None if it is not an image tag.
    pub fn parse(tag: &str) -> Option<Self> {
        let len = image_tag_len(tag)?;
        let inner = &tag[4..len - 1];
        let trimmed = inner.trim_end();
        let self_closing = trimmed.ends_with('/');
        let inner = trimmed.strip_suffix('/').unwrap_or(trimmed);
        Some(Self {
            attrs: parse_attributes(inner),
            self_closing,
        })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    /// Numeric attribute value, 0 when absent or not a number.
    pub fn numeric_attr(&self, name: &str) -> u64 {
        self.attr(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Drop a `src` holding an inline `data:image/...` URI. Returns whether one was removed.
    pub fn strip_inline_src(&mut self) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|a| {
            !(a.name.eq_ignore_ascii_case("src")
                && a.value
                    .as_deref()
                    .is_some_and(|v| v.trim_start().starts_with("data:image")))
        });
        self.attrs.len() != before
    }

    /// Turn attribute `name` into `src` with the given value, dropping any existing `src`.
    pub fn promote_to_src(&mut self, name: &str, value: &str) {
        self.attrs.retain(|a| !a.name.eq_ignore_ascii_case("src"));
        if let Some(a) = self
            .attrs
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            a.name = "src".to_string();
            a.value = Some(value.to_string());
            a.quote = Some('"');
        } else {
            self.attrs.push(Attribute {
                name: "src".to_string(),
                value: Some(value.to_string()),
                quote: Some('"'),
            });
        }
    }

    pub fn set_self_closing(&mut self, self_closing: bool) {
        self.self_closing = self_closing;
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<img");
        for a in &self.attrs {
            out.push(' ');
            out.push_str(&a.name);
            if let Some(v) = &a.value {
                let q = a.quote.unwrap_or('"');
                out.push('=');
                out.push(q);
                out.push_str(v);
                out.push(q);
            }
        }
        out.push_str(if self.self_closing { "/>" } else { ">" });
        out
    }
}

fn parse_attributes(inner: &str) -> Vec<Attribute> {
    let mut attrs = Vec::new();
    let mut chars = inner.char_indices().peekable();
    loop {
        while chars.next_if(|(_, c)| c.is_whitespace() || *c == '/').is_some() {}
        let start = match chars.peek() {
            Some(&(i, _)) => i,
            None => break,
        };
        let mut end = inner.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == '=' || c == '/' {
                end = i;
                break;
            }
            chars.next();
        }
        let name = inner[start..end].to_string();
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next_if(|(_, c)| *c == '=').is_none() {
            attrs.push(Attribute {
                name,
                value: None,
                quote: None,
            });
            continue;
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let (value, quote) = match chars.peek() {
            Some(&(i, q)) if q == '"' || q == '\'' => {
                chars.next();
                let mut end = inner.len();
                for (j, c) in chars.by_ref() {
                    if c == q {
                        end = j;
                        break;
                    }
                }
                (inner[i + 1..end].to_string(), Some(q))
            }
            Some(&(i, _)) => {
                let mut end = inner.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_whitespace() {
                        end = j;
                        break;
                    }
                    chars.next();
                }
                (inner[i..end].to_string(), None)
            }
            None => (String::new(), None),
        };
        attrs.push(Attribute {
            name,
            value: Some(value),
            quote,
        });
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_concatenate_back_to_input() {
        let html = "<p>a</p><img src=\"x\"><div data-key='single-page'><p>b</p><IMG alt=1/>tail";
        let joined: String = tokenize(html)
            .map(|t| match t {
                Token::Text(s) | Token::Image(s) => s.to_string(),
                Token::PageMarker => PAGE_MARKER.to_string(),
            })
            .collect();
        assert_eq!(joined, html);
    }

    #[test]
    fn tokens_are_typed_in_order() {
        let html = "x<img a=\"1\">y<div data-key='single-page'>z";
        let tokens: Vec<Token<'_>> = tokenize(html).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Text("x"),
                Token::Image("<img a=\"1\">"),
                Token::Text("y"),
                Token::PageMarker,
                Token::Text(">z"),
            ]
        );
    }

    #[test]
    fn gt_inside_quotes_does_not_close_tag() {
        let html = "<img src=\"data:image/svg+xml;utf8,<svg></svg>\" data-original=\"u\">after";
        let first = tokenize(html).next();
        assert_eq!(
            first,
            Some(Token::Image(
                "<img src=\"data:image/svg+xml;utf8,<svg></svg>\" data-original=\"u\">"
            ))
        );
    }

    #[test]
    fn unterminated_img_is_text() {
        let tokens: Vec<Token<'_>> = tokenize("a<img src=\"x\"").collect();
        assert_eq!(tokens, vec![Token::Text("a<img src=\"x\"")]);
    }

    #[test]
    fn imgur_like_tags_are_not_images() {
        assert!(!has_image_tag("<imgur>text</imgur>"));
        assert!(has_image_tag("<p><img/></p>"));
    }

    #[test]
    fn tokenizer_restarts_from_clone() {
        let mut tokens = tokenize("a<img>b");
        tokens.next();
        let rest: Vec<Token<'_>> = tokens.clone().collect();
        let again: Vec<Token<'_>> = tokens.collect();
        assert_eq!(rest, again);
    }

    #[test]
    fn parse_reads_quoted_unquoted_and_bare_attributes() {
        let tag = ImageTag::parse("<img data-rawwidth=100 alt='a b' hidden data-original=\"u\">")
            .unwrap();
        assert_eq!(tag.numeric_attr("data-rawwidth"), 100);
        assert_eq!(tag.attr("alt"), Some("a b"));
        assert_eq!(tag.attr("hidden"), Some(""));
        assert_eq!(tag.attr("data-original"), Some("u"));
        assert_eq!(tag.attr("missing"), None);
    }

    #[test]
    fn numeric_attr_defaults_to_zero() {
        let tag = ImageTag::parse("<img data-rawheight=\"tall\">").unwrap();
        assert_eq!(tag.numeric_attr("data-rawheight"), 0);
        assert_eq!(tag.numeric_attr("data-rawwidth"), 0);
    }

    #[test]
    fn strip_inline_src_leaves_bare_tag() {
        let mut tag = ImageTag::parse("<img src=\"data:image/png;base64,AAAA\">").unwrap();
        assert!(tag.strip_inline_src());
        assert_eq!(tag.render(), "<img>");
    }

    #[test]
    fn promote_to_src_replaces_existing_src() {
        let mut tag =
            ImageTag::parse("<img src=\"old\" data-actualsrc=\"https://x.com/a.jpg\" class=\"c\"/>")
                .unwrap();
        tag.promote_to_src("data-actualsrc", "../image/a.jpg");
        assert_eq!(tag.render(), "<img src=\"../image/a.jpg\" class=\"c\"/>");
    }
}
