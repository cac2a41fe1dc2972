use std::path::Path;

use rusqlite::Connection;

use crate::config::Config;
use crate::data::repository;
use crate::error::AppError;
use crate::models::search::{total_pages, SearchMode, SearchPage, SearchRequest};
use crate::services::discovery_service::{canonical_path, discover_images, folder_prefix};

fn page_of(paths: Vec<String>, page: usize, page_size: usize) -> Vec<String> {
    paths
        .into_iter()
        .skip(page.saturating_mul(page_size))
        .take(page_size)
        .collect()
}

/// One page of images under `request.folder`.
///
/// A non-empty query searches the index. An empty query with a tag type lists
/// discovered files that have no tag of that type. An empty query without a
/// tag type lists every discovered file. A zero page size falls back to the
/// configured default.
pub fn list_images(
    conn: &Connection,
    config: &Config,
    request: &SearchRequest,
) -> Result<SearchPage, AppError> {
    let page_size = match request.page_size {
        0 => config.default_page_size,
        size => size,
    };
    if page_size == 0 {
        return Err(AppError::InvalidInput("page_size must be positive".to_string()));
    }

    let root = canonical_path(Path::new(&request.folder));
    let prefix = folder_prefix(&root);
    let terms = request.terms();
    let restriction = request.restriction();

    let (mode, images, total_images) = if !terms.is_empty() {
        let total = repository::count_search_results(conn, &prefix, &terms, &restriction)?;
        let images = repository::search_images(
            conn,
            &prefix,
            &terms,
            &restriction,
            request.page,
            page_size,
        )?;
        (SearchMode::Terms, images, total)
    } else if !restriction.is_any() {
        let tagged = repository::tagged_paths(conn, &prefix, &restriction)?;
        let untagged: Vec<String> = discover_images(&root, config)
            .into_iter()
            .filter(|path| !tagged.contains(path))
            .collect();
        let total = untagged.len();
        (
            SearchMode::Untagged,
            page_of(untagged, request.page, page_size),
            total,
        )
    } else {
        let all = discover_images(&root, config);
        let total = all.len();
        (
            SearchMode::All,
            page_of(all, request.page, page_size),
            total,
        )
    };

    Ok(SearchPage {
        folder: root.to_string_lossy().to_string(),
        mode,
        images,
        page: request.page,
        page_size,
        total_images,
        total_pages: total_pages(total_images, page_size),
    })
}
