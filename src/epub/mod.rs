//! EPUB writer. Packages a rewritten [`Document`] with its bundled images and stylesheets as
//! EPUB 2 or EPUB 3.
//!
//! Layout inside the archive mirrors the HTML site so that rewritten `../image/` links resolve
//! unchanged: chapters live in `OEBPS/html/`, images in `OEBPS/image/`, stylesheets in
//! `OEBPS/css/`.

use crate::model::Document;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

/// EPUB format version.
///
/// Default is EPUB 3 (OPF 3.0, nav.xhtml). Use `Epub2` for legacy readers (OPF 2.0, NCX).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpubVersion {
    #[default]
    Epub3,
    Epub2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpubOptions {
    pub version: EpubVersion,
    /// Include toc.ncx in EPUB 3 for legacy readers. EPUB 2 always has it.
    pub include_ncx: bool,
    /// Visible table-of-contents page after the cover.
    pub include_toc_page: bool,
}

impl Default for EpubOptions {
    fn default() -> Self {
        Self {
            version: EpubVersion::Epub3,
            include_ncx: false,
            include_toc_page: true,
        }
    }
}

/// Files to package next to the chapters.
#[derive(Debug, Clone, Default)]
pub struct EpubAssets {
    pub images: Vec<PathBuf>,
    pub stylesheets: Vec<PathBuf>,
    /// Image shown on the cover page. Without one, a title-only cover page is written.
    pub cover_image: Option<PathBuf>,
}

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: document title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: document author is empty.")]
    EmptyAuthor,

    #[error("Cannot write EPUB: document has no articles.")]
    NoArticles,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";

#[derive(Debug)]
enum CoverOutcome {
    TitleOnly,
    Image { filename: String },
}

/// A packaged file: archive-relative name under OEBPS and its source on disk.
#[derive(Debug)]
struct Packaged {
    id: String,
    href: String,
    source: PathBuf,
    media_type: &'static str,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write `doc` (article bodies already rewritten) to an EPUB file at `path`.
pub fn write_epub(
    doc: &Document,
    path: &Path,
    assets: &EpubAssets,
    options: EpubOptions,
) -> Result<(), EpubError> {
    validate_document(doc)?;

    let mut image_paths = assets.images.clone();
    if let Some(cover) = &assets.cover_image {
        if !image_paths.contains(cover) {
            image_paths.push(cover.clone());
        }
    }
    let images: Vec<Packaged> = image_paths
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let name = file_name(p);
            Packaged {
                id: format!("img-{}", i + 1),
                media_type: image_media_type(&name),
                href: format!("image/{}", name),
                source: p.clone(),
            }
        })
        .collect();
    let stylesheets: Vec<Packaged> = assets
        .stylesheets
        .iter()
        .enumerate()
        .map(|(i, p)| Packaged {
            id: format!("css-{}", i + 1),
            href: format!("css/{}", file_name(p)),
            source: p.clone(),
            media_type: "text/css",
        })
        .collect();
    let cover = match &assets.cover_image {
        Some(p) => CoverOutcome::Image {
            filename: file_name(p),
        },
        None => CoverOutcome::TitleOnly,
    };

    let path = path.to_path_buf();
    let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
        path: path.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // 1. Mimetype first, uncompressed (OCF requirement)
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    // 2. Container
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    let css_names: Vec<String> = stylesheets
        .iter()
        .map(|s| file_name(&s.source))
        .collect();
    let ncx = options.version == EpubVersion::Epub2 || options.include_ncx;

    write_opf(
        doc,
        &cover,
        &images,
        &stylesheets,
        options,
        &mut zip,
        options_deflate,
    )?;
    if options.version == EpubVersion::Epub3 {
        write_nav_xhtml(doc, &mut zip, options_deflate)?;
    }
    if ncx {
        write_ncx(doc, &mut zip, options_deflate)?;
    }
    write_cover_xhtml(doc, &cover, options.version, &mut zip, options_deflate)?;
    if options.include_toc_page {
        write_toc_page_xhtml(doc, options.version, &mut zip, options_deflate)?;
    }
    write_chapters(doc, &css_names, options.version, &mut zip, options_deflate)?;

    // Images are already compressed; store them as-is.
    for item in images.iter().chain(stylesheets.iter()) {
        let data = std::fs::read(&item.source).map_err(|e| EpubError::Io {
            path: item.source.clone(),
            source: e,
        })?;
        let method = if item.media_type == "text/css" {
            options_deflate
        } else {
            options_stored
        };
        zip.start_file(format!("{}{}", OEBPS_PREFIX, item.href), method)?;
        zip.write_all(&data)?;
    }

    zip.finish()?;
    debug!(
        "Wrote EPUB {} ({} articles, {} images)",
        path.display(),
        doc.articles.len(),
        images.len()
    );
    Ok(())
}

fn validate_document(doc: &Document) -> Result<(), EpubError> {
    if doc.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if doc.author.trim().is_empty() {
        return Err(EpubError::EmptyAuthor);
    }
    if doc.articles.is_empty() {
        return Err(EpubError::NoArticles);
    }
    Ok(())
}

fn image_media_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}

fn identifier(doc: &Document) -> String {
    doc.source_url
        .as_deref()
        .unwrap_or("urn:articlepack:document")
        .to_string()
}

fn chapter_href(i: usize) -> String {
    format!("html/chapter-{}.xhtml", i + 1)
}

fn write_opf(
    doc: &Document,
    cover: &CoverOutcome,
    images: &[Packaged],
    stylesheets: &[Packaged],
    options: EpubOptions,
    zip: &mut ZipWriter<impl Write + Seek>,
    zip_options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let epub3 = options.version == EpubVersion::Epub3;
    let include_ncx = !epub3 || options.include_ncx;
    let id = xml_escape(&identifier(doc));
    let title = xml_escape(&doc.title);
    let creator = xml_escape(&doc.author);
    let description = doc
        .description
        .as_ref()
        .map(|d| xml_escape(d))
        .unwrap_or_default();

    let cover_item = match cover {
        CoverOutcome::Image { filename } => images
            .iter()
            .find(|i| i.href == format!("image/{}", filename))
            .map(|i| i.id.clone()),
        CoverOutcome::TitleOnly => None,
    };

    let mut manifest = String::new();
    if epub3 {
        manifest.push_str(
            r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
"#,
        );
    }
    if include_ncx {
        manifest.push_str(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
    }
    manifest.push_str(
        r#"    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
"#,
    );
    if options.include_toc_page {
        manifest.push_str(
            r#"    <item id="toc-page" href="toc.xhtml" media-type="application/xhtml+xml"/>
"#,
        );
    }
    for (i, _) in doc.articles.iter().enumerate() {
        manifest.push_str(&format!(
            r#"    <item id="chapter-{}" href="{}" media-type="application/xhtml+xml"/>
"#,
            i + 1,
            chapter_href(i)
        ));
    }
    for item in images.iter().chain(stylesheets.iter()) {
        let properties = if epub3 && cover_item.as_deref() == Some(item.id.as_str()) {
            r#" properties="cover-image""#
        } else {
            ""
        };
        manifest.push_str(&format!(
            r#"    <item id="{}" href="{}" media-type="{}"{}/>
"#,
            item.id,
            xml_escape(&item.href),
            item.media_type,
            properties
        ));
    }

    // Spine: reading order only (cover, optional toc page, then chapters). Nav is not in spine.
    let mut spine = String::from(r#"    <itemref idref="cover"/>"#);
    if options.include_toc_page {
        spine.push_str("\n    <itemref idref=\"toc-page\"/>");
    }
    for (i, _) in doc.articles.iter().enumerate() {
        spine.push_str(&format!("\n    <itemref idref=\"chapter-{}\"/>", i + 1));
    }

    let mut metadata = format!(
        r#"    <dc:identifier id="book-id">{}</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
    <dc:language>zh</dc:language>
"#,
        id, title, creator
    );
    if !description.is_empty() {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            description
        ));
    }
    if let (false, Some(cover_id)) = (epub3, &cover_item) {
        metadata.push_str(&format!(
            "    <meta name=\"cover\" content=\"{}\"/>\n",
            cover_id
        ));
    }

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="{version}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{toc}>
{spine}
  </spine>
  <guide>
    <reference type="cover" href="cover.xhtml" title="Cover"/>
  </guide>
</package>
"#,
        version = if epub3 { "3.0" } else { "2.0" },
        metadata = metadata,
        manifest = manifest,
        toc = if include_ncx { r#" toc="ncx""# } else { "" },
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), zip_options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn toc_items(doc: &Document) -> String {
    let mut items = String::new();
    for (i, article) in doc.articles.iter().enumerate() {
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            chapter_href(i),
            xml_escape(&article.title)
        ));
    }
    items
}

/// XHTML prologue. EPUB 2 content documents are XHTML 1.1 with a doctype.
fn xhtml_head(version: EpubVersion, title: &str, extra_ns: &str, links: &str) -> String {
    let doctype = match version {
        EpubVersion::Epub3 => "<!DOCTYPE html>",
        EpubVersion::Epub2 => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
{doctype}
<html xmlns="http://www.w3.org/1999/xhtml"{extra_ns}>
<head>
  <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8"/>
  <title>{title}</title>
{links}</head>
"#,
        doctype = doctype,
        extra_ns = extra_ns,
        title = xml_escape(title),
        links = links
    )
}

fn write_nav_xhtml(
    doc: &Document,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let nav = format!(
        r#"{head}<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        head = xhtml_head(
            EpubVersion::Epub3,
            "Table of Contents",
            r#" xmlns:epub="http://www.idpf.org/2007/ops""#,
            ""
        ),
        items = toc_items(doc)
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

/// Writes a visible table-of-contents page (toc.xhtml) for the reading spine. Placed after the cover.
fn write_toc_page_xhtml(
    doc: &Document,
    version: EpubVersion,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let toc_xhtml = format!(
        r#"{head}<body>
  <h1>Table of Contents</h1>
    <ol>
{items}    </ol>
</body>
</html>
"#,
        head = xhtml_head(version, "Table of Contents", "", ""),
        items = toc_items(doc)
    );
    zip.start_file(format!("{}toc.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(toc_xhtml.as_bytes())?;
    Ok(())
}

fn write_ncx(
    doc: &Document,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let title = xml_escape(&doc.title);
    let mut nav_points = String::new();
    for (i, article) in doc.articles.iter().enumerate() {
        let label = xml_escape(&article.title);
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
            i + 1,
            i + 1,
            label,
            chapter_href(i)
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}
  </navMap>
</ncx>
"#,
        xml_escape(&identifier(doc)),
        title,
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_cover_xhtml(
    doc: &Document,
    cover: &CoverOutcome,
    version: EpubVersion,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let body = match cover {
        CoverOutcome::TitleOnly => {
            let title = xml_escape(&doc.title);
            let author = xml_escape(&doc.author);
            format!(
                r#"  <div style="text-align: center; font-family: serif; margin-top: 3em;">
    <h1 style="font-size: 1.5em;">{}</h1>
    <p style="margin-top: 1em;">{}</p>
  </div>"#,
                title, author
            )
        }
        CoverOutcome::Image { filename } => format!(
            r#"  <div style="text-align: center;">
    <img src="image/{}" alt="Cover" style="max-width: 100%; height: auto;"/>
  </div>"#,
            xml_escape(filename)
        ),
    };
    let cover_xhtml = format!(
        "{}<body>\n{}\n</body>\n</html>\n",
        xhtml_head(version, "Cover", "", ""),
        body
    );
    zip.start_file(format!("{}cover.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(cover_xhtml.as_bytes())?;
    Ok(())
}

fn write_chapters(
    doc: &Document,
    css_names: &[String],
    version: EpubVersion,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let links: String = css_names
        .iter()
        .map(|n| {
            format!(
                "  <link rel=\"stylesheet\" type=\"text/css\" href=\"../css/{}\"/>\n",
                xml_escape(n)
            )
        })
        .collect();
    for (i, article) in doc.articles.iter().enumerate() {
        let html = format!(
            r#"{head}<body>
  <h2 class="article-title">{title}</h2>
{body}
</body>
</html>
"#,
            head = xhtml_head(version, &article.title, "", &links),
            title = xml_escape(&article.title),
            body = article.body
        );
        zip.start_file(format!("{}{}", OEBPS_PREFIX, chapter_href(i)), options)?;
        zip.write_all(html.as_bytes())?;
    }
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
