//! Static HTML export sink
//!
//! Renders every harvested post into paginated HTML under
//! `<out>/html/page<N>.html`, with the images the posts embed copied to
//! `<out>/images/` and `@@PLUGINFILE@@` placeholder references rewritten
//! to relative paths. This sink never talks to the catalog.

use crate::files::ImageMap;
use crate::model::Post;
use crate::sanitize::{escape_attr, escape_text};
use chrono::FixedOffset;
use harvest_common::Result;
use std::path::Path;
use tracing::info;

/// Fixed page size of the export.
pub const POSTS_PER_PAGE: usize = 50;

/// Forum timestamps are rendered in the course's local timezone.
const PAGE_UTC_OFFSET_HOURS: i32 = 2;

/// Render all posts into `<out_dir>/html`, 50 per page.
pub fn render(posts: &[Post], images: &ImageMap, out_dir: &Path) -> Result<()> {
    let html_dir = out_dir.join("html");
    std::fs::create_dir_all(&html_dir)?;

    let total_pages = posts.len().div_ceil(POSTS_PER_PAGE).max(1);

    for (index, chunk) in posts.chunks(POSTS_PER_PAGE).enumerate() {
        let page_num = index + 1;
        let page = render_page(chunk, images, page_num, total_pages);
        std::fs::write(html_dir.join(format!("page{}.html", page_num)), page)?;
    }
    if posts.is_empty() {
        let page = render_page(&[], images, 1, 1);
        std::fs::write(html_dir.join("page1.html"), page)?;
    }

    info!(posts = posts.len(), pages = total_pages, out = %out_dir.display(), "HTML export complete");
    Ok(())
}

fn render_page(posts: &[Post], images: &ImageMap, page_num: usize, total_pages: usize) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang='en'>\n<head>\n");
    html.push_str("  <meta charset='UTF-8'>\n");
    html.push_str("  <meta name='viewport' content='width=device-width, initial-scale=1.0'>\n");
    html.push_str(&format!("  <title>Forum Page {}</title>\n", page_num));
    html.push_str("  <style>\n");
    html.push_str("    body { font-family: Arial, sans-serif; margin: 20px; }\n");
    html.push_str("    .post { border-bottom: 1px solid #ccc; margin-bottom: 20px; padding-bottom: 10px; }\n");
    html.push_str("    .subject { font-weight: bold; font-size: 1.1em; }\n");
    html.push_str("    .meta { font-size: 0.9em; color: #555; }\n");
    html.push_str("    .message img { max-width: 90%; height: auto; display: block; margin: 10px 0; }\n");
    html.push_str("  </style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>Forum Discussions - Page {}</h1>\n", page_num));

    for post in posts {
        html.push_str("<div class='post'>\n");
        html.push_str(&format!(
            "  <div class='subject'>{}</div>\n",
            escape_text(&post.subject)
        ));
        html.push_str(&format!(
            "  <div class='meta'>User ID: {} | Post ID: {} | Created: {}</div>\n",
            post.author_id,
            post.id,
            format_created(post)
        ));
        html.push_str(&format!(
            "  <div class='message'>{}</div>\n",
            rewrite_pluginfile(&post.message, post.id, images)
        ));
        html.push_str("</div>\n");
    }

    html.push_str("<div class='navigation'>\n");
    if page_num > 1 {
        html.push_str(&format!("<a href='page{}.html'>Previous</a>\n", page_num - 1));
    }
    if page_num < total_pages {
        html.push_str(&format!(
            "<a href='page{}.html' style='margin-left:20px;'>Next</a>\n",
            page_num + 1
        ));
    }
    html.push_str("</div>\n</body></html>\n");
    html
}

fn format_created(post: &Post) -> String {
    match FixedOffset::east_opt(PAGE_UTC_OFFSET_HOURS * 3600) {
        Some(offset) => post
            .created
            .with_timezone(&offset)
            .format("%d.%m.%Y. %H:%M:%S")
            .to_string(),
        None => post.created.format("%d.%m.%Y. %H:%M:%S").to_string(),
    }
}

/// Replace `@@PLUGINFILE@@/<name>` tokens with the relative path of the
/// copied image. Three spellings of each filename are handled: raw,
/// percent-encoded, and entity-escaped (the sanitizer re-serializes
/// `src` values, so a literal `&` arrives here as `&amp;`).
fn rewrite_pluginfile(message: &str, post_id: i64, images: &ImageMap) -> String {
    let Some(post_images) = images.get(&post_id) else {
        return message.to_string();
    };

    let mut rewritten = message.to_string();
    for (original_name, relative_path) in post_images {
        let encoded = urlencoding::encode(original_name);
        let escaped = escape_attr(original_name);
        rewritten = rewritten.replace(&format!("@@PLUGINFILE@@/{}", original_name), relative_path);
        rewritten = rewritten.replace(&format!("@@PLUGINFILE@@/{}", encoded), relative_path);
        if escaped != *original_name {
            rewritten = rewritten.replace(&format!("@@PLUGINFILE@@/{}", escaped), relative_path);
        }
    }
    rewritten
}
