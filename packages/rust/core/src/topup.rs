//! Top-up generation: when a day's feeds yield fewer unseen articles than
//! the social schedule needs, write the missing ones from a topic list.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use feedpress_clients::Prompt;
use feedpress_shared::{Article, ArticleId, EnhancedArticle, EnrichmentSource, GenerationConfig};
use feedpress_history::ProcessedHistory;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::enhance::{EnhanceStats, Enhancer, strip_code_fences};

/// Cache task name for top-up articles.
pub const TOPUP_TASK: &str = "topup_article";

/// Characters of body used for the summary when the reply has none.
const SUMMARY_CHARS: usize = 150;

const TOPUP_SYSTEM: &str = "You are a property market journalist writing for UK \
property investors, landlords and industry professionals. Write in a factual, \
informative tone.";

/// `needed` topics starting at an offset derived from `date`, so consecutive
/// days cover different topics. Never repeats a topic within one day.
pub fn topics_for(topics: &[String], date: NaiveDate, needed: usize) -> Vec<String> {
    if topics.is_empty() {
        return Vec::new();
    }
    let offset = date.num_days_from_ce().unsigned_abs() as usize % topics.len();
    topics
        .iter()
        .cycle()
        .skip(offset)
        .take(needed.min(topics.len()))
        .cloned()
        .collect()
}

/// Synthetic URL for a generated article. Built from the date and topic
/// only, so a topic's article has the same id on every same-day run.
pub fn synthetic_url(base: &str, date: NaiveDate, topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let base = base.trim_end_matches('/');
    format!("{base}/article/{}/{slug}", date.format("%Y-%m-%d"))
}

/// The stored form of a generated article.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTopup {
    title: String,
    summary: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct TopupReply {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

fn build_prompt(topic: &str, date: NaiveDate) -> Prompt {
    let user = format!(
        "Write a news article for {date} about this UK property market topic: {topic}.\n\n\
         Respond with a JSON object with three keys: \"title\" (a headline of at \
         most 12 words), \"summary\" (two sentences) and \"body\" (a 300 to 400 \
         word article covering recent trends and what they mean for investors).",
        date = date.format("%d %B %Y"),
    );
    Prompt {
        system: Some(TOPUP_SYSTEM.to_string()),
        user,
        json_response: true,
    }
}

fn clean_title(line: &str) -> String {
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '"' || c == '*')
        .trim()
        .to_string()
}

fn summary_from(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(SUMMARY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Read a reply as title, summary and body. Non-JSON replies use their first
/// line as the title and the rest as the body.
fn parse_reply(text: &str) -> Option<(String, String, String)> {
    let text = strip_code_fences(text);

    let (title, summary, body) = match serde_json::from_str::<TopupReply>(text) {
        Ok(reply) => (
            reply.title.unwrap_or_default(),
            reply.summary.unwrap_or_default(),
            reply.body.unwrap_or_default(),
        ),
        Err(_) => {
            let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
            (first.to_string(), String::new(), rest.trim().to_string())
        }
    };

    let title = clean_title(&title);
    let body = body.trim().to_string();
    if title.is_empty() || body.is_empty() {
        return None;
    }
    let summary = match summary.trim() {
        "" => summary_from(&body),
        s => s.to_string(),
    };
    Some((title, summary, body))
}

/// Generate up to `needed` articles for `date`. Failures and articles the
/// history already knows (a same-day re-run after commit) are skipped.
pub async fn generate_topups(
    enhancer: &Enhancer<'_>,
    config: &GenerationConfig,
    history: &ProcessedHistory,
    date: NaiveDate,
    now: DateTime<Utc>,
    needed: usize,
    stats: &mut EnhanceStats,
) -> Vec<EnhancedArticle> {
    let topics = topics_for(&config.topics, date, needed);
    let base = config.synthetic_base_url.trim_end_matches('/');
    let mut out = Vec::with_capacity(topics.len());

    for topic in topics {
        let prompt = build_prompt(&topic, date);
        let reply = match enhancer.generate_cached(TOPUP_TASK, &prompt, stats).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%topic, error = %e, "top-up generation failed");
                stats.skipped += 1;
                continue;
            }
        };

        // Cached replies are stored articles; fresh ones still need parsing.
        let (stored, fresh) = match serde_json::from_str::<StoredTopup>(&reply.text) {
            Ok(stored) if reply.cached => (stored, false),
            _ => match parse_reply(&reply.text) {
                Some((title, summary, body)) => (
                    StoredTopup {
                        title,
                        summary,
                        body,
                    },
                    true,
                ),
                None => {
                    warn!(%topic, "top-up reply had no usable title or body");
                    stats.skipped += 1;
                    continue;
                }
            },
        };

        if fresh {
            enhancer.store(TOPUP_TASK, &prompt, &stored).await;
        }

        let url = synthetic_url(base, date, &topic);
        let article = Article {
            id: ArticleId::derive(base, &url),
            title: stored.title,
            source: config.synthetic_source.clone(),
            feed_url: base.to_string(),
            url,
            guid: None,
            published_at: now,
            raw_summary: stored.summary.clone(),
            ai_generated: true,
            topic: Some(topic.clone()),
        };

        if history.has_seen(&article) {
            info!(%topic, id = %article.id, "top-up article already processed");
            continue;
        }

        if fresh {
            stats.generated += 1;
        } else {
            stats.cached += 1;
        }

        out.push(EnhancedArticle {
            article,
            ai_body: Some(stored.body),
            ai_summary: Some(stored.summary),
            enrichment: if fresh {
                EnrichmentSource::Generated
            } else {
                EnrichmentSource::Cached
            },
        });
    }

    info!(generated = out.len(), needed, "top-up complete");
    out
}
