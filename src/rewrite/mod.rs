//! Content rewriting: cleans an article fragment, points its images at the local image directory,
//! and records every remote image it finds in the document's [`AssetPool`].

mod noise;
mod tokenizer;

pub use noise::remove_noise;
pub use tokenizer::{has_image_tag, tokenize, ImageTag, Token, Tokens, PAGE_MARKER};

use crate::assets::{AssetNamer, AssetPool};
use crate::model::Document;
use tracing::{debug, warn};

/// Attribute holding the high-definition (reduced) image URL.
pub const HD_ATTRIBUTE: &str = "data-actualsrc";
/// Attribute holding the original, full-resolution image URL.
pub const ORIGINAL_ATTRIBUTE: &str = "data-original";
/// Container class that e-readers render as a single full-bleed image.
pub const IMAGE_CONTAINER_CLASS: &str = "duokan-image-single";
/// Image directory as seen from an article page.
pub const LOCAL_IMAGE_PREFIX: &str = "../image/";

/// Height/width ratio above which an image is shown at original quality. Long infographics
/// become unreadable when downscaled.
pub const DEFAULT_TALL_IMAGE_RATIO: u64 = 4;

/// Which source variant of an image to bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageQuality {
    HighDefinition,
    Original,
}

impl ImageQuality {
    pub fn attribute(self) -> &'static str {
        match self {
            ImageQuality::HighDefinition => HD_ATTRIBUTE,
            ImageQuality::Original => ORIGINAL_ATTRIBUTE,
        }
    }

    fn fallback(self) -> Self {
        match self {
            ImageQuality::HighDefinition => ImageQuality::Original,
            ImageQuality::Original => ImageQuality::HighDefinition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    pub tall_image_ratio: u64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            tall_image_ratio: DEFAULT_TALL_IMAGE_RATIO,
        }
    }
}

impl QualityPolicy {
    pub fn select(&self, width: u64, height: u64, prefer_raw: bool) -> ImageQuality {
        let tall = width > 0 && height > width.saturating_mul(self.tall_image_ratio);
        if tall || prefer_raw {
            ImageQuality::Original
        } else {
            ImageQuality::HighDefinition
        }
    }
}

/// Rewrites article fragments. Holds no per-document state; the pool is passed per call.
#[derive(Debug, Clone, Default)]
pub struct ContentRewriter {
    namer: AssetNamer,
    policy: QualityPolicy,
}

impl ContentRewriter {
    pub fn new(namer: AssetNamer, policy: QualityPolicy) -> Self {
        Self { namer, policy }
    }

    /// Rewrite one fragment, adding each bundled image URI to `pool`.
    ///
    /// Page markers split the fragment into independently processed pages and are emitted back
    /// verbatim. A malformed image tag only affects itself.
    pub fn rewrite(&self, raw_html: &str, prefer_raw: bool, pool: &AssetPool) -> String {
        let html = remove_noise(raw_html);
        if !has_image_tag(&html) {
            return html;
        }
        let mut out = String::with_capacity(html.len() + html.len() / 4);
        for token in tokenize(&html) {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::PageMarker => out.push_str(PAGE_MARKER),
                Token::Image(tag) => out.push_str(&self.rewrite_image(tag, prefer_raw, pool)),
            }
        }
        out
    }

    /// Rewrite every article body of `doc` in reading order. Title, author and metadata are
    /// carried over unchanged.
    pub fn rewrite_document(&self, doc: &Document, prefer_raw: bool, pool: &AssetPool) -> Document {
        let mut out = doc.clone();
        for article in &mut out.articles {
            article.body = self.rewrite(&article.body, prefer_raw, pool);
        }
        debug!(
            "Rewrote {} article(s), {} image(s) pooled",
            out.articles.len(),
            pool.len()
        );
        out
    }

    fn rewrite_image(&self, raw_tag: &str, prefer_raw: bool, pool: &AssetPool) -> String {
        let mut tag = match ImageTag::parse(raw_tag) {
            Some(tag) => tag,
            None => return raw_tag.to_string(),
        };
        let stripped = tag.strip_inline_src();
        let unchanged = |tag: &mut ImageTag| {
            if stripped {
                tag.set_self_closing(true);
                tag.render()
            } else {
                raw_tag.to_string()
            }
        };

        let width = tag.numeric_attr("data-rawwidth");
        let height = tag.numeric_attr("data-rawheight");
        let wanted = self.policy.select(width, height, prefer_raw);
        let (quality, uri) = match remote_uri(&tag, wanted) {
            Some(uri) => (wanted, uri),
            None => match remote_uri(&tag, wanted.fallback()) {
                Some(uri) => {
                    debug!(
                        "Image has no {} attribute, using {}",
                        wanted.attribute(),
                        wanted.fallback().attribute()
                    );
                    (wanted.fallback(), uri)
                }
                None => return unchanged(&mut tag),
            },
        };

        pool.add(uri.clone());
        let filename = self.namer.name(&uri);
        if filename.is_empty() {
            warn!("Cannot derive a local filename for {}", uri);
        } else {
            debug!(
                "Image {}x{} -> {:?} {} as {}",
                width, height, quality, uri, filename
            );
        }
        tag.promote_to_src(
            quality.attribute(),
            &format!("{}{}", LOCAL_IMAGE_PREFIX, filename),
        );
        tag.set_self_closing(true);
        format!(
            r#"<div class="{}">{}</div>"#,
            IMAGE_CONTAINER_CLASS,
            tag.render()
        )
    }
}

/// Remote URL held by the attribute for `quality`, with scheme-less URLs made `https:`.
fn remote_uri(tag: &ImageTag, quality: ImageQuality) -> Option<String> {
    let value = tag.attr(quality.attribute())?.trim();
    if let Some(rest) = value.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    if value.starts_with("https://") || value.starts_with("http://") {
        Some(value.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32, name: &str) -> String {
        format!(
            r#"<img src="data:image/svg+xml;utf8,<svg xmlns='http://www.w3.org/2000/svg'></svg>" data-rawwidth="{w}" data-rawheight="{h}" data-original="https://pic1.zhimg.com/v2-{n}_r.jpg" data-actualsrc="https://pic1.zhimg.com/v2-{n}_b.jpg">"#,
            w = width,
            h = height,
            n = name
        )
    }

    fn local_srcs(html: &str) -> usize {
        html.matches(r#"src="../image/"#).count()
    }

    #[test]
    fn fragment_without_images_only_loses_noise() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let html = "<p>plain<br>text</p><noscript>x</noscript>";
        assert_eq!(rewriter.rewrite(html, false, &pool), "<p>plain<br/>text</p>");
        assert!(pool.is_empty());
    }

    #[test]
    fn every_image_points_at_local_directory() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let html = format!(
            "<p>{}</p><p>{}</p><figure>{}</figure>",
            image(600, 400, "a"),
            image(600, 400, "b"),
            image(600, 400, "a")
        );
        let out = rewriter.rewrite(&html, false, &pool);
        assert_eq!(local_srcs(&out), 3);
        assert!(pool.len() <= 3);
        assert_eq!(pool.len(), 2);
        assert_eq!(out.matches(r#"<div class="duokan-image-single"><img "#).count(), 3);
        assert!(out.contains(r#"src="../image/v2-a_b.jpg""#));
        assert!(!out.contains("data:image"));
    }

    #[test]
    fn tall_image_uses_original_regardless_of_preference() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(&image(100, 500, "tall"), false, &pool);
        assert!(pool.contains("https://pic1.zhimg.com/v2-tall_r.jpg"));
        assert!(!pool.contains("https://pic1.zhimg.com/v2-tall_b.jpg"));
        assert!(out.contains("../image/v2-tall_r.jpg"));
    }

    #[test]
    fn wide_image_uses_high_definition_by_default() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(&image(500, 100, "wide"), false, &pool);
        assert!(pool.contains("https://pic1.zhimg.com/v2-wide_b.jpg"));
        assert!(out.contains("../image/v2-wide_b.jpg"));
    }

    #[test]
    fn raw_preference_selects_original() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        rewriter.rewrite(&image(500, 100, "wide"), true, &pool);
        assert_eq!(pool.uris(), vec!["https://pic1.zhimg.com/v2-wide_r.jpg"]);
    }

    #[test]
    fn ratio_boundary_is_exclusive_and_configurable() {
        let policy = QualityPolicy::default();
        assert_eq!(policy.select(100, 400, false), ImageQuality::HighDefinition);
        assert_eq!(policy.select(100, 401, false), ImageQuality::Original);
        assert_eq!(policy.select(0, 10_000, false), ImageQuality::HighDefinition);
        let strict = QualityPolicy {
            tall_image_ratio: 2,
        };
        assert_eq!(strict.select(100, 201, false), ImageQuality::Original);
    }

    #[test]
    fn inline_data_image_is_stripped_and_not_pooled() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(
            r#"<p><img src="data:image/png;base64,iVBORw0KGgo="></p>"#,
            false,
            &pool,
        );
        assert_eq!(out, "<p><img/></p>");
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn image_without_quality_attributes_is_unchanged() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let html = r#"<p><img src="https://static.zhihu.com/emoji.png" alt="smile"></p>"#;
        assert_eq!(rewriter.rewrite(html, false, &pool), html);
        assert!(pool.is_empty());
    }

    #[test]
    fn missing_variant_falls_back_to_other_attribute() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(
            r#"<img data-original="https://pic2.zhimg.com/v2-only.png">"#,
            false,
            &pool,
        );
        assert!(pool.contains("https://pic2.zhimg.com/v2-only.png"));
        assert!(out.contains(r#"src="../image/v2-only.png""#));
    }

    #[test]
    fn malformed_tag_does_not_affect_siblings() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let html = format!(
            r#"{}<img data-actualsrc="not a url">{}"#,
            image(10, 10, "one"),
            image(10, 10, "two")
        );
        let out = rewriter.rewrite(&html, false, &pool);
        assert_eq!(pool.len(), 2);
        assert_eq!(local_srcs(&out), 2);
        assert!(out.contains(r#"<img data-actualsrc="not a url">"#));
    }

    #[test]
    fn unnameable_uri_is_pooled_and_still_points_local() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(
            r#"<img data-actualsrc="https://images.example.net/x.jpg"><img data-actualsrc="https://pic1.zhimg.com/v2-a.jpg">"#,
            false,
            &pool,
        );
        assert!(pool.contains("https://images.example.net/x.jpg"));
        assert_eq!(local_srcs(&out), 2);
        assert!(out.contains(r#"src="../image/""#));
        assert!(!out.contains("images.example.net"));
    }

    #[test]
    fn stripped_inline_image_keeps_other_attributes_and_closes() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let out = rewriter.rewrite(
            r#"<img src="data:image/gif;base64,R0lGOD==" alt="dot">"#,
            false,
            &pool,
        );
        assert_eq!(out, r#"<img alt="dot"/>"#);
    }

    #[test]
    fn scheme_less_image_url_gets_https() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        rewriter.rewrite(r#"<img data-actualsrc="//pic3.zhimg.com/v2-c.jpg">"#, false, &pool);
        assert!(pool.contains("https://pic3.zhimg.com/v2-c.jpg"));
    }

    #[test]
    fn page_markers_survive_exactly_once_each() {
        let rewriter = ContentRewriter::default();
        let pool = AssetPool::new();
        let html = format!(
            "{img}<div data-key='single-page'>{img2}<p>x</p></div><div data-key='single-page'><p>y</p>{img3}</div>",
            img = image(10, 10, "p1"),
            img2 = image(10, 10, "p2"),
            img3 = image(10, 80, "p3")
        );
        let out = rewriter.rewrite(&html, false, &pool);
        assert_eq!(out.matches(PAGE_MARKER).count(), 2);
        assert_eq!(pool.len(), 3);
        assert!(pool.contains("https://pic1.zhimg.com/v2-p3_r.jpg"));
    }

    #[test]
    fn rewriting_is_deterministic() {
        let rewriter = ContentRewriter::default();
        let html = image(320, 240, "same");
        let a = rewriter.rewrite(&html, false, &AssetPool::new());
        let b = rewriter.rewrite(&html, false, &AssetPool::new());
        assert_eq!(a, b);
    }

    #[test]
    fn rewrite_document_keeps_order_and_shares_pool() {
        use crate::model::Article;
        let doc = Document {
            title: "T".to_string(),
            author: "A".to_string(),
            description: None,
            cover_url: None,
            source_url: None,
            articles: vec![
                Article {
                    title: "one".to_string(),
                    index: 1,
                    body: image(10, 10, "d1"),
                },
                Article {
                    title: "two".to_string(),
                    index: 2,
                    body: format!("<p>x</p>{}", image(10, 10, "d1")),
                },
            ],
        };
        let pool = AssetPool::new();
        let out = ContentRewriter::default().rewrite_document(&doc, false, &pool);
        assert_eq!(out.title, "T");
        assert_eq!(out.articles[0].title, "one");
        assert_eq!(out.articles[1].index, 2);
        assert!(out.articles[1].body.starts_with("<p>x</p>"));
        assert_eq!(local_srcs(&out.articles[0].body), 1);
        assert_eq!(pool.uris(), vec!["https://pic1.zhimg.com/v2-d1_b.jpg"]);
    }
}
