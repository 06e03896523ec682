//! Markup cleanup applied before image processing.

use regex::Regex;
use std::sync::OnceLock;

fn noscript_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<noscript>.*?</noscript>").expect("invalid noscript regex")
    })
}

fn line_break_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)<br\s*>").expect("invalid line break regex"))
}

fn scheme_less_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"href="//"#).expect("invalid link regex"))
}

/// Remove `<noscript>` blocks, normalize line breaks to `<br/>`, and give scheme-less external
/// links an explicit `https:` scheme.
pub fn remove_noise(html: &str) -> String {
    let html = html.replace("</br>", "");
    let html = line_break_pattern().replace_all(&html, "<br/>");
    let html = scheme_less_link_pattern().replace_all(&html, "href=\"https://");
    noscript_pattern().replace_all(&html, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_noscript_blocks_across_lines() {
        let html = "<p>a</p><noscript><img src=\"x\">\n</noscript><p>b</p><noscript>y</noscript>";
        assert_eq!(remove_noise(html), "<p>a</p><p>b</p>");
    }

    #[test]
    fn noscript_removal_is_not_greedy() {
        let html = "<noscript>1</noscript>keep<noscript>2</noscript>";
        assert_eq!(remove_noise(html), "keep");
    }

    #[test]
    fn normalizes_line_breaks() {
        assert_eq!(remove_noise("a<br>b</br>c<BR >d<br/>"), "a<br/>bc<br/>d<br/>");
    }

    #[test]
    fn repairs_scheme_less_links() {
        assert_eq!(
            remove_noise(r#"<a href="//link.zhihu.com/?target=x">x</a>"#),
            r#"<a href="https://link.zhihu.com/?target=x">x</a>"#
        );
    }

    #[test]
    fn leaves_absolute_links_alone() {
        let html = r#"<a href="https://example.com/">x</a>"#;
        assert_eq!(remove_noise(html), html);
    }
}
