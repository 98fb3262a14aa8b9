//! Content enhancement: AI summary and body for each unseen article.
//!
//! Replies are cached in storage keyed by `(task, prompt hash, model)`, so
//! re-running a day after a partial failure only pays for what is missing.
//! A generation failure never fails the batch: the article keeps its raw
//! feed data and is marked `skipped`.

use feedpress_clients::{Prompt, TextGenerator, with_retry};
use feedpress_shared::{Article, EnhancedArticle, EnrichmentSource, Result, RetryPolicy};
use feedpress_storage::Storage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Cache task name for article rewrites.
pub const ENHANCE_TASK: &str = "enhance_article";

/// Raw summaries longer than this are cut before prompting.
const MAX_PROMPT_CHARS: usize = 6_000;

const ENHANCE_SYSTEM: &str = "You are a senior editor at a UK property news service. \
You write factual, neutral commentary for property investors and industry professionals. \
Never invent figures that are not in the source material.";

/// Counters for one enhancement pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnhanceStats {
    pub generated: usize,
    pub cached: usize,
    pub skipped: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Outcome of a cached generation.
pub(crate) struct Reply {
    pub text: String,
    pub cached: bool,
}

/// Wraps a generator with the generation cache and retry policy.
pub struct Enhancer<'a> {
    generator: &'a dyn TextGenerator,
    storage: Option<&'a Storage>,
    policy: RetryPolicy,
}

impl<'a> Enhancer<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        storage: Option<&'a Storage>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            storage,
            policy,
        }
    }

    /// Enhance one article. Always returns an [`EnhancedArticle`]; failures
    /// fall back to the raw data.
    pub async fn enhance(&self, article: Article, stats: &mut EnhanceStats) -> EnhancedArticle {
        let prompt = build_prompt(&article);

        let reply = match self.generate_cached(ENHANCE_TASK, &prompt, stats).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    id = %article.id,
                    title = %article.title,
                    error = %e,
                    "enhancement failed, keeping raw article"
                );
                stats.skipped += 1;
                return EnhancedArticle::raw(article);
            }
        };

        let (summary, body) = parse_reply(&reply.text);
        if body.is_none() && summary.is_none() {
            warn!(id = %article.id, "enhancement reply was empty, keeping raw article");
            stats.skipped += 1;
            return EnhancedArticle::raw(article);
        }

        let enrichment = if reply.cached {
            stats.cached += 1;
            EnrichmentSource::Cached
        } else {
            stats.generated += 1;
            EnrichmentSource::Generated
        };

        EnhancedArticle {
            article,
            ai_body: body,
            ai_summary: summary,
            enrichment,
        }
    }

    /// Generate `prompt` under `task`, consulting the cache first. Cache
    /// failures are logged and treated as misses.
    pub(crate) async fn generate_cached(
        &self,
        task: &str,
        prompt: &Prompt,
        stats: &mut EnhanceStats,
    ) -> Result<Reply> {
        let model = self.generator.model();
        let hash = prompt_hash(&prompt_key(prompt), task);

        if let Some(storage) = self.storage {
            match storage.get_cached_generation(task, &hash, model).await {
                Ok(Some(text)) => {
                    debug!(task, hash = %&hash[..12], "generation cache hit");
                    return Ok(Reply { text, cached: true });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "generation cache lookup failed"),
            }
        }

        let generation = with_retry(&self.policy, task, || self.generator.generate(prompt)).await?;
        stats.tokens_in += generation.tokens_in;
        stats.tokens_out += generation.tokens_out;

        if let Some(storage) = self.storage {
            if let Err(e) = storage
                .set_cached_generation(task, &hash, model, &generation.text)
                .await
            {
                warn!(error = %e, "failed to cache generation");
            }
        }

        Ok(Reply {
            text: generation.text,
            cached: false,
        })
    }

    /// Replace the cached reply for `prompt` with `value` serialized as JSON.
    pub(crate) async fn store<T: Serialize>(&self, task: &str, prompt: &Prompt, value: &T) {
        let Some(storage) = self.storage else {
            return;
        };
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                warn!(task, error = %e, "failed to serialize cache entry");
                return;
            }
        };
        let hash = prompt_hash(&prompt_key(prompt), task);
        if let Err(e) = storage
            .set_cached_generation(task, &hash, self.generator.model(), &text)
            .await
        {
            warn!(task, error = %e, "failed to cache generation");
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt / reply helpers
// ---------------------------------------------------------------------------

fn build_prompt(article: &Article) -> Prompt {
    let user = format!(
        "Rewrite the following property news item for our readers.\n\n\
         Title: {title}\n\
         Source: {source}\n\
         URL: {url}\n\n\
         Original text:\n{text}\n\n\
         Respond with a JSON object with two keys: \"summary\" (two or three \
         sentences) and \"body\" (a 300 to 400 word article with analysis of \
         what this means for property investors).",
        title = article.title,
        source = article.source,
        url = article.url,
        text = truncate_content(&article.raw_summary, MAX_PROMPT_CHARS),
    );

    Prompt {
        system: Some(ENHANCE_SYSTEM.to_string()),
        user,
        json_response: true,
    }
}

fn prompt_key(prompt: &Prompt) -> String {
    match &prompt.system {
        Some(system) => format!("{system}\n\n{}", prompt.user),
        None => prompt.user.clone(),
    }
}

/// SHA-256 over content and task, hex-encoded.
pub(crate) fn prompt_hash(content: &str, task: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(task.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cut `content` to at most `max_chars` characters, marking the cut.
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((byte_idx, _)) => format!("{} [...]", &content[..byte_idx]),
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Deserialize)]
struct EnhancementReply {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Split a reply into `(summary, body)`. JSON replies are read by key;
/// anything else uses the first paragraph as summary and the whole text as
/// body.
pub(crate) fn parse_reply(text: &str) -> (Option<String>, Option<String>) {
    let text = strip_code_fences(text);

    if let Ok(reply) = serde_json::from_str::<EnhancementReply>(text) {
        return (non_empty(reply.summary), non_empty(reply.body));
    }

    let body = non_empty(Some(text.to_string()));
    let summary = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string);
    (summary, body)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use feedpress_clients::Generation;
    use feedpress_shared::{ArticleId, FeedpressError};

    use super::*;

    struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model(&self) -> &str {
            "test-model"
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<Generation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().remove(0);
            next.map(|text| Generation {
                text,
                tokens_in: 10,
                tokens_out: 5,
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    fn article() -> Article {
        Article {
            id: ArticleId::from("abc123"),
            title: "Rents climb in the North West".into(),
            source: "Property Reporter".into(),
            feed_url: "https://feeds.example/rss".into(),
            url: "https://news.example/rents".into(),
            guid: None,
            published_at: Utc.with_ymd_and_hms(2025, 3, 14, 7, 0, 0).unwrap(),
            raw_summary: "Average rents rose 8% year on year.".into(),
            ai_generated: false,
            topic: None,
        }
    }

    #[test]
    fn prompt_hash_differs_by_task() {
        assert_eq!(prompt_hash("hello", "a"), prompt_hash("hello", "a"));
        assert_ne!(prompt_hash("hello", "a"), prompt_hash("hello", "b"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_content("short", 100), "short");
        let long = "£".repeat(10);
        assert_eq!(truncate_content(&long, 4), "££££ [...]");
    }

    #[test]
    fn parse_reply_reads_fenced_json() {
        let text = "```json\n{\"summary\": \"Rents up.\", \"body\": \"Full body.\"}\n```";
        let (summary, body) = parse_reply(text);
        assert_eq!(summary.as_deref(), Some("Rents up."));
        assert_eq!(body.as_deref(), Some("Full body."));
    }

    #[test]
    fn parse_reply_falls_back_to_paragraphs() {
        let text = "Rents are rising.\n\nLandlords face new rules.";
        let (summary, body) = parse_reply(text);
        assert_eq!(summary.as_deref(), Some("Rents are rising."));
        assert_eq!(body.as_deref(), Some(text));
    }

    #[tokio::test]
    async fn enhance_uses_generated_json() {
        let generator = ScriptedGenerator::new(vec![Ok(
            r#"{"summary": "Rents rose 8%.",
                "body": "Tenants in the North West pay more."}"#
                .into(),
        )]);
        let enhancer = Enhancer::new(&generator, None, fast_policy());
        let mut stats = EnhanceStats::default();

        let enhanced = enhancer.enhance(article(), &mut stats).await;
        assert_eq!(enhanced.enrichment, EnrichmentSource::Generated);
        assert_eq!(enhanced.ai_summary.as_deref(), Some("Rents rose 8%."));
        assert_eq!(enhanced.word_count(), Some(7));
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.tokens_in, 10);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let generator = ScriptedGenerator::new(vec![
            Err(FeedpressError::generation("HTTP 503").retryable()),
            Ok(r#"{"summary": "s", "body": "b"}"#.into()),
        ]);
        let enhancer = Enhancer::new(&generator, None, fast_policy());
        let mut stats = EnhanceStats::default();

        let enhanced = enhancer.enhance(article(), &mut stats).await;
        assert_eq!(enhanced.enrichment, EnrichmentSource::Generated);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_keeps_raw_article() {
        let generator =
            ScriptedGenerator::new(vec![Err(FeedpressError::generation("HTTP 401: bad key"))]);
        let enhancer = Enhancer::new(&generator, None, fast_policy());
        let mut stats = EnhanceStats::default();

        let enhanced = enhancer.enhance(article(), &mut stats).await;
        assert_eq!(enhanced.enrichment, EnrichmentSource::Skipped);
        assert_eq!(enhanced.summary(), "Average rents rose 8% year on year.");
        assert_eq!(stats.skipped, 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_pass_is_served_from_cache() {
        let db = std::env::temp_dir()
            .join(format!("feedpress_enhance_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let generator = ScriptedGenerator::new(vec![Ok(r#"{"summary": "s", "body": "b"}"#.into())]);
        let enhancer = Enhancer::new(&generator, Some(&storage), fast_policy());

        let mut stats = EnhanceStats::default();
        let first = enhancer.enhance(article(), &mut stats).await;
        let second = enhancer.enhance(article(), &mut stats).await;

        assert_eq!(first.enrichment, EnrichmentSource::Generated);
        assert_eq!(second.enrichment, EnrichmentSource::Cached);
        assert_eq!(second.ai_body, first.ai_body);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.cached, 1);

        drop(storage);
        let _ = std::fs::remove_file(&db);
    }
}
