//! Mirrored HTML site: an index page, one page per article, and a single-file version.
//!
//! Article bodies must already be rewritten; their images point at `../image/`, which resolves
//! from both `html/` and `single/`.

use crate::model::{Article, Document};
use scraper::Html;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Characters of plain text shown under each entry of the index page.
const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("Cannot write site: document title is empty.")]
    EmptyTitle,

    #[error("Failed to write site page: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write site page: {0}")]
    Write(#[from] std::io::Error),
}

pub(crate) fn html_escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Strip HTML from an article body to plain text using scraper.
pub(crate) fn body_to_plain_text(body: &str) -> String {
    let fragment = Html::parse_fragment(body);
    let root = fragment.root_element();
    let text: String = root.text().collect();
    if text.trim().is_empty() {
        body.trim().to_string()
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn excerpt(body: &str) -> String {
    let text = body_to_plain_text(body);
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// File name of the article page at `position` (0-based reading order) inside the pages
/// directory. Matches the EPUB chapter numbering.
pub fn article_page_name(position: usize) -> String {
    format!("{:04}.html", position + 1)
}

fn create(path: &Path) -> Result<BufWriter<File>, SiteError> {
    let f = File::create(path).map_err(|e| SiteError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BufWriter::new(f))
}

fn stylesheet_names(stylesheets: &[PathBuf]) -> Vec<String> {
    stylesheets
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

fn write_head(
    f: &mut impl Write,
    title: &str,
    css_prefix: &str,
    stylesheets: &[String],
) -> std::io::Result<()> {
    writeln!(f, r#"<!DOCTYPE html>"#)?;
    writeln!(f, r#"<html>"#)?;
    writeln!(f, r#"<head>"#)?;
    writeln!(f, r#"  <meta charset="UTF-8"/>"#)?;
    writeln!(f, r#"  <title>{}</title>"#, html_escape_attr(title))?;
    for css in stylesheets {
        writeln!(
            f,
            r#"  <link rel="stylesheet" type="text/css" href="{}{}"/>"#,
            css_prefix, css
        )?;
    }
    writeln!(f, r#"</head>"#)?;
    writeln!(f, r#"<body>"#)
}

fn write_article(f: &mut impl Write, article: &Article) -> std::io::Result<()> {
    writeln!(f, r#"  <section class="article">"#)?;
    writeln!(
        f,
        r#"    <h2 class="article-title">{}</h2>"#,
        html_escape_attr(&article.title)
    )?;
    f.write_all(article.body.as_bytes())?;
    writeln!(f)?;
    writeln!(f, r#"  </section>"#)
}

/// Write the full site for an already rewritten document.
///
/// `site_dir` receives `index.html`, `pages_dir` one page per article, and `single_dir` a file
/// named `<name>.html` holding every article. Stylesheets are linked by file name from `css/`.
pub fn write_site(
    doc: &Document,
    name: &str,
    site_dir: &Path,
    pages_dir: &Path,
    single_dir: &Path,
    stylesheets: &[PathBuf],
) -> Result<(), SiteError> {
    if doc.title.trim().is_empty() {
        return Err(SiteError::EmptyTitle);
    }
    let css = stylesheet_names(stylesheets);

    for (i, article) in doc.articles.iter().enumerate() {
        let path = pages_dir.join(article_page_name(i));
        let mut f = create(&path)?;
        write_head(&mut f, &article.title, "../css/", &css)?;
        write_article(&mut f, article)?;
        writeln!(f, r#"  <p><a href="../index.html">{}</a></p>"#, html_escape_attr(&doc.title))?;
        writeln!(f, r#"</body>"#)?;
        writeln!(f, r#"</html>"#)?;
        f.flush()?;
    }

    let path = single_dir.join(format!("{}.html", name));
    let mut f = create(&path)?;
    write_head(&mut f, &doc.title, "../css/", &css)?;
    writeln!(f, r#"  <h1>{}</h1>"#, html_escape_attr(&doc.title))?;
    for article in &doc.articles {
        write_article(&mut f, article)?;
    }
    writeln!(f, r#"</body>"#)?;
    writeln!(f, r#"</html>"#)?;
    f.flush()?;

    let path = site_dir.join("index.html");
    let mut f = create(&path)?;
    write_head(&mut f, &doc.title, "css/", &css)?;
    writeln!(f, r#"  <header>"#)?;
    writeln!(f, r#"    <h1>{}</h1>"#, html_escape_attr(&doc.title))?;
    writeln!(
        f,
        r#"    <p class="article-meta">{}</p>"#,
        html_escape_attr(&doc.author)
    )?;
    if let Some(d) = doc.description.as_deref().filter(|d| !d.trim().is_empty()) {
        writeln!(f, r#"    <p class="description">{}</p>"#, html_escape_attr(d))?;
    }
    writeln!(f, r#"  </header>"#)?;
    writeln!(f, r#"  <ol class="toc">"#)?;
    for (i, article) in doc.articles.iter().enumerate() {
        writeln!(
            f,
            r#"    <li><a href="html/{}">{}</a><p class="article-meta">{}</p></li>"#,
            article_page_name(i),
            html_escape_attr(&article.title),
            html_escape_attr(&excerpt(&article.body))
        )?;
    }
    writeln!(f, r#"  </ol>"#)?;
    writeln!(
        f,
        r#"  <p><a href="single/{}.html">Single page</a></p>"#,
        html_escape_attr(name)
    )?;
    writeln!(f, r#"</body>"#)?;
    writeln!(f, r#"</html>"#)?;
    f.flush()?;

    Ok(())
}
