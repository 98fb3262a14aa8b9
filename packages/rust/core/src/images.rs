//! Image attachment: one photo per article, shared by all of its rows.

use std::collections::HashMap;
use std::sync::LazyLock;

use feedpress_clients::{ImageSearch, with_retry};
use feedpress_shared::{ArticleId, ExportRow, Result, RetryPolicy, write_atomic};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::Workspace;

/// Words too common to be useful search terms.
const COMMON_WORDS: &[&str] = &[
    "the", "and", "to", "of", "in", "on", "with", "for", "a", "is", "are",
];

/// Terms that always make a good property photo query when mentioned.
const PROPERTY_KEYWORDS: &[&str] = &[
    "property",
    "house",
    "home",
    "real estate",
    "apartment",
    "mortgage",
    "landlord",
    "tenant",
    "rent",
    "housing",
    "market",
];

const FALLBACK_KEYWORDS: &[&str] = &["property", "real estate"];

const MAX_KEYWORDS: usize = 3;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("valid word regex"));

/// Up to three search keywords: distinctive title words first, then property
/// terms found in the title or content.
pub fn extract_keywords(title: &str, content: &str) -> Vec<String> {
    let title = title.to_lowercase();
    let content = content.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for word in WORD_RE.find_iter(&title).map(|m| m.as_str()) {
        if word.chars().count() > 3
            && !COMMON_WORDS.contains(&word)
            && !keywords.iter().any(|k| k == word)
        {
            keywords.push(word.to_string());
        }
    }

    for term in PROPERTY_KEYWORDS {
        if (title.contains(term) || content.contains(term)) && !keywords.iter().any(|k| k == term) {
            keywords.push(term.to_string());
        }
    }

    if keywords.is_empty() {
        return FALLBACK_KEYWORDS.iter().map(|s| s.to_string()).collect();
    }
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

/// Counters for one image pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageStats {
    pub attached: usize,
    pub reused: usize,
    pub missing: usize,
}

/// Resolved image for an article: workspace-relative path and credit.
#[derive(Debug, Clone)]
struct Attached {
    path: String,
    attribution: String,
}

/// Find, download and attach an image for every article in `rows`. Rows that
/// already point at an image on disk are kept. A miss or failure leaves the
/// image columns empty; the row itself is never dropped.
#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn attach_images(
    rows: &mut [ExportRow],
    search: &dyn ImageSearch,
    workspace: &Workspace,
    policy: &RetryPolicy,
) -> Result<ImageStats> {
    let mut stats = ImageStats::default();
    let mut resolved: HashMap<ArticleId, Option<Attached>> = HashMap::new();

    for i in 0..rows.len() {
        let id = rows[i].article_id.clone();

        if !resolved.contains_key(&id) {
            let existing = rows
                .iter()
                .find(|r| r.article_id == id && !r.image_path.is_empty())
                .filter(|r| workspace.resolve(&r.image_path).is_file())
                .map(|r| Attached {
                    path: r.image_path.clone(),
                    attribution: r.image_attribution.clone(),
                });

            let outcome = match existing {
                Some(found) => {
                    stats.reused += 1;
                    Some(found)
                }
                None => {
                    let query = extract_keywords(&rows[i].title, &rows[i].content).join(" ");
                    match fetch_image(&id, &query, search, workspace, policy).await {
                        Ok(Some(found)) => {
                            stats.attached += 1;
                            Some(found)
                        }
                        Ok(None) => {
                            info!(%id, %query, "no image found");
                            stats.missing += 1;
                            None
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(%id, %query, error = %e, "image lookup failed");
                            stats.missing += 1;
                            None
                        }
                    }
                }
            };
            resolved.insert(id.clone(), outcome);
        }

        let row = &mut rows[i];
        match resolved.get(&id).and_then(Option::as_ref) {
            Some(found) => {
                row.image_path = found.path.clone();
                row.image_attribution = found.attribution.clone();
            }
            None => {
                row.image_path.clear();
                row.image_attribution.clear();
            }
        }
    }

    info!(
        attached = stats.attached,
        reused = stats.reused,
        missing = stats.missing,
        "images resolved"
    );
    Ok(stats)
}

async fn fetch_image(
    id: &ArticleId,
    query: &str,
    search: &dyn ImageSearch,
    workspace: &Workspace,
    policy: &RetryPolicy,
) -> Result<Option<Attached>> {
    let Some(hit) = with_retry(policy, "image search", || search.search(query)).await? else {
        return Ok(None);
    };
    let bytes = with_retry(policy, "image download", || search.download(&hit)).await?;
    if bytes.is_empty() {
        return Ok(None);
    }

    let rel = Workspace::image_rel_path(id);
    write_atomic(&workspace.resolve(&rel), &bytes)?;
    debug!(%id, photo = %hit.id, size = bytes.len(), "image saved");

    Ok(Some(Attached {
        path: rel,
        attribution: hit.attribution,
    }))
}
