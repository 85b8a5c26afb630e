//! Book content preparation
//!
//! Walks a documentation tree, parses frontmatter, cleans and chunks
//! the markdown, and turns each chunk into a document ready for the
//! gateway's ingestion endpoint.

use anyhow::{Context, Result};
use bookchat_common::chunker::{chunk, clean_markdown, ChunkerConfig};
use bookchat_common::config::RetrievalConfig;
use bookchat_common::rag::IngestDocument;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Frontmatter fields we care about
#[derive(Debug, Default, PartialEq)]
pub struct Frontmatter {
    pub id: Option<String>,
    pub title: Option<String>,
}

/// Parse the leading `---` block, if present. Only simple `key: value`
/// lines are read; anything else in the block is ignored.
pub fn parse_frontmatter(content: &str) -> Frontmatter {
    let mut meta = Frontmatter::default();

    let rest = match content.strip_prefix("---") {
        Some(rest) => rest,
        None => return meta,
    };
    let end = match rest.find("\n---") {
        Some(end) => end,
        None => return meta,
    };

    for line in rest[..end].lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "id" => meta.id = Some(value.to_string()),
                "title" => meta.title = Some(value.to_string()),
                _ => {}
            }
        }
    }
    meta
}

/// First markdown heading in the cleaned body, used as a title fallback
fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
}

fn collect_markdown_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown_files(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("mdx")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

fn slug_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
        .replace(' ', "-")
}

fn url_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    format!("/docs/{}", relative.with_extension("").display())
}

/// Prepare one file's chunks as ingestion documents
pub fn prepare_file(
    root: &Path,
    path: &Path,
    config: &ChunkerConfig,
) -> Result<Vec<IngestDocument>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;

    let meta = parse_frontmatter(&content);
    let body = clean_markdown(&content);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let slug = meta.id.unwrap_or_else(|| slug_for(root, path));
    let title = meta
        .title
        .or_else(|| first_heading(&body))
        .unwrap_or_else(|| slug.clone());
    let url = url_for(root, path);

    let chunks = chunk(&body, &slug, config);
    let total = chunks.len();

    Ok(chunks
        .into_iter()
        .map(|c| IngestDocument {
            id: format!("{}-part-{}", slug, c.sequence_index + 1),
            title: if total > 1 {
                format!("{} - Part {}", title, c.sequence_index + 1)
            } else {
                title.clone()
            },
            content: c.text,
            chapter_id: Some(slug.clone()),
            url: Some(url.clone()),
        })
        .collect())
}

/// Prepare all markdown files under `root` for ingestion
pub fn prepare_documents(root: &Path, settings: &RetrievalConfig) -> Result<Vec<IngestDocument>> {
    let config = ChunkerConfig {
        chunk_size: settings.chunk_size,
        overlap: settings.chunk_overlap,
    };

    let mut files = Vec::new();
    collect_markdown_files(root, &mut files)?;
    files.sort();

    let mut documents = Vec::new();
    for path in &files {
        match prepare_file(root, path, &config) {
            Ok(mut docs) => {
                debug!(path = %path.display(), chunks = docs.len(), "Prepared file");
                documents.append(&mut docs);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping file"),
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bookchat-ingestion-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_frontmatter() {
        let content = "---\nid: intro-ros2\ntitle: \"Introduction to ROS 2\"\nsidebar_position: 1\n---\n\n# Heading\nBody.";
        let meta = parse_frontmatter(content);
        assert_eq!(meta.id.as_deref(), Some("intro-ros2"));
        assert_eq!(meta.title.as_deref(), Some("Introduction to ROS 2"));
    }

    #[test]
    fn test_parse_frontmatter_absent() {
        assert_eq!(parse_frontmatter("# Just a heading\n"), Frontmatter::default());
    }

    #[test]
    fn test_prepare_file_single_chunk() {
        let dir = scratch_dir("single");
        let path = dir.join("intro.md");
        fs::write(
            &path,
            "---\nid: intro\ntitle: Intro\n---\n\n# Intro\nROS 2 is a middleware.",
        )
        .unwrap();

        let docs = prepare_file(&dir, &path, &ChunkerConfig::default()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "intro-part-1");
        assert_eq!(docs[0].title, "Intro");
        assert_eq!(docs[0].chapter_id.as_deref(), Some("intro"));
        assert_eq!(docs[0].url.as_deref(), Some("/docs/intro"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prepare_file_multiple_parts_are_numbered() {
        let dir = scratch_dir("parts");
        let path = dir.join("long.md");
        let body: String = (0..30).map(|i| format!("word{} ", i)).collect();
        fs::write(&path, format!("---\ntitle: Long Chapter\n---\n\n{}", body)).unwrap();

        let config = ChunkerConfig {
            chunk_size: 10,
            overlap: 2,
        };
        let docs = prepare_file(&dir, &path, &config).unwrap();
        assert!(docs.len() > 1);
        assert_eq!(docs[0].title, "Long Chapter - Part 1");
        assert_eq!(docs[1].title, "Long Chapter - Part 2");
        // All parts belong to the same chapter.
        assert!(docs.iter().all(|d| d.chapter_id.as_deref() == Some("long")));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prepare_documents_walks_subdirectories() {
        let dir = scratch_dir("walk");
        fs::create_dir_all(dir.join("module1")).unwrap();
        fs::write(dir.join("module1/a.md"), "# A\nContent about topic A.").unwrap();
        fs::write(dir.join("b.mdx"), "# B\nContent about topic B.").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let docs = prepare_documents(&dir, &RetrievalConfig::default()).unwrap();
        assert_eq!(docs.len(), 2);
        // Sorted walk: b.mdx at the root comes after module1/a.md.
        assert_eq!(docs[0].chapter_id.as_deref(), Some("b"));
        assert_eq!(docs[1].chapter_id.as_deref(), Some("module1-a"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_title_falls_back_to_heading() {
        let dir = scratch_dir("fallback");
        let path = dir.join("untitled.md");
        fs::write(&path, "# Heading Title\nSome content.").unwrap();

        let docs = prepare_file(&dir, &path, &ChunkerConfig::default()).unwrap();
        assert_eq!(docs[0].title, "Heading Title");

        fs::remove_dir_all(&dir).unwrap();
    }
}
