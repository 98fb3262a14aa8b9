//! Template-based social copy.
//!
//! Every choice (intro line, emoji, hashtag) is picked from a hash of the
//! article id, so the same article always gets the same text.

use std::collections::HashMap;

use chrono::NaiveDate;
use feedpress_shared::{EnhancedArticle, Platform, SocialConfig, SocialMode, SocialPost};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Hard limit for a tweet.
pub const TWITTER_MAX_CHARS: usize = 280;

/// Characters of summary quoted in a LinkedIn post.
const LINKEDIN_SUMMARY_CHARS: usize = 150;

/// Budget the tweet title is cut to before link, emoji and hashtag.
const TWITTER_TITLE_BUDGET: usize = 200;

const LINKEDIN_INTROS: &[&str] = &[
    "Industry experts highlight that",
    "Latest data indicates",
    "Market intelligence suggests",
    "Property professionals should note that",
    "New developments in the sector reveal",
    "Industry insights reveal that",
    "Market analysis shows",
    "Property market update:",
];

const INSTAGRAM_INTROS: &[&str] = &[
    "🏠 Hot off the press!",
    "🔑 Property alert!",
    "🏘️ Trending in real estate:",
    "🏢 Breaking property news:",
    "📊 Market update:",
    "🏡 Property insight:",
    "💼 Real estate buzz:",
];

const EMOJIS: &[&str] = &[
    "🏠", "🔑", "🏘️", "🏢", "📊", "🏡", "💼", "🌆", "📈", "📉", "💰", "🔍", "📱",
];

const INSTAGRAM_HASHTAGS: &[&str] = &[
    "#propertymarket",
    "#realestate",
    "#propertyinvestment",
    "#ukproperty",
    "#propertyinvestor",
    "#propertydevelopment",
    "#housingmarket",
    "#property",
    "#investment",
    "#realestateinvesting",
    "#propertymanagement",
    "#landlord",
];

const TWITTER_HASHTAGS: &[&str] = &[
    "#PropertyMarket",
    "#RealEstate",
    "#UKProperty",
    "#Housing",
    "#PropTech",
    "#Investment",
    "#Property",
    "#Landlord",
    "#HousingMarket",
];

/// Deterministic index into a list of `len` items for `seed` and `salt`.
fn pick(seed: &str, salt: &str, len: usize) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % len as u64) as usize
}

/// Two different entries of `items`.
fn pick_two<'a>(seed: &str, salt: &str, items: &[&'a str]) -> (&'a str, &'a str) {
    let first = pick(seed, salt, items.len());
    let mut second = pick(seed, &format!("{salt}-2"), items.len() - 1);
    if second >= first {
        second += 1;
    }
    (items[first], items[second])
}

/// First `max` characters of `text`, with `...` when it was cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head.trim_end())
}

fn linkedin_post(article: &EnhancedArticle) -> String {
    let a = &article.article;
    let intro = LINKEDIN_INTROS[pick(a.id.as_str(), "linkedin-intro", LINKEDIN_INTROS.len())];
    let title = a.title.trim_end_matches('.');
    let summary: String = article
        .summary()
        .chars()
        .take(LINKEDIN_SUMMARY_CHARS)
        .collect();

    format!(
        "{intro} {title}. {summary}...\n\n\
         Read the full article to learn more about the implications for property \
         investors and industry professionals: {link}",
        summary = summary.trim(),
        link = a.url,
    )
}

fn instagram_post(article: &EnhancedArticle) -> String {
    let a = &article.article;
    let seed = a.id.as_str();
    let intro = INSTAGRAM_INTROS[pick(seed, "instagram-intro", INSTAGRAM_INTROS.len())];
    let (emoji1, emoji2) = pick_two(seed, "instagram-emoji", EMOJIS);
    let (tag1, tag2) = pick_two(seed, "instagram-tags", INSTAGRAM_HASHTAGS);

    format!(
        "{intro} {title} {emoji1}\n\n\
         Stay updated with the latest trends in the UK property market! {emoji2}\n\n\
         {tag1} {tag2} #proptech",
        title = a.title,
    )
}

fn twitter_post(article: &EnhancedArticle) -> String {
    let a = &article.article;
    let seed = a.id.as_str();
    let emoji = EMOJIS[pick(seed, "twitter-emoji", EMOJIS.len())];
    let hashtag = TWITTER_HASHTAGS[pick(seed, "twitter-tag", TWITTER_HASHTAGS.len())];

    let fixed = a.url.chars().count() + hashtag.chars().count() + emoji.chars().count() + 5;
    let title = truncate_chars(&a.title, TWITTER_TITLE_BUDGET.saturating_sub(fixed));
    let post = format!("{emoji} {title} {link} {hashtag}", link = a.url);

    // Only an oversized link can push past the limit.
    if post.chars().count() > TWITTER_MAX_CHARS {
        truncate_chars(&post, TWITTER_MAX_CHARS - 3)
    } else {
        post
    }
}

/// Write the post for one article on one platform.
pub fn compose(article: &EnhancedArticle, platform: Platform, date: NaiveDate) -> SocialPost {
    let text = match platform {
        Platform::LinkedIn => linkedin_post(article),
        Platform::Instagram => instagram_post(article),
        Platform::Twitter => twitter_post(article),
    };
    SocialPost {
        article_id: article.article.id.clone(),
        platform,
        text,
        title: article.article.title.clone(),
        link: article.article.url.clone(),
        source: article.article.source.clone(),
        date,
        word_count: article.word_count(),
    }
}

/// Posts for a batch of articles, in article order.
///
/// `rotate` gives article `i` to platform `i % n`; `every` writes all
/// platforms for each article. Either way each platform gets at most
/// `posts_per_platform` posts (0 means no cap).
pub fn generate_posts(
    articles: &[EnhancedArticle],
    config: &SocialConfig,
    date: NaiveDate,
) -> Vec<SocialPost> {
    let platforms = &config.platforms;
    if platforms.is_empty() {
        return Vec::new();
    }
    let cap = config.posts_per_platform;
    let mut counts: HashMap<Platform, usize> = HashMap::new();
    let mut posts = Vec::new();

    let mut emit = |article: &EnhancedArticle, platform: Platform, posts: &mut Vec<SocialPost>| {
        let count = counts.entry(platform).or_insert(0);
        if cap > 0 && *count >= cap {
            return;
        }
        *count += 1;
        posts.push(compose(article, platform, date));
    };

    match config.mode {
        SocialMode::Rotate => {
            for (i, article) in articles.iter().enumerate() {
                if cap > 0 && i >= cap * platforms.len() {
                    break;
                }
                emit(article, platforms[i % platforms.len()], &mut posts);
            }
        }
        SocialMode::Every => {
            for article in articles {
                for &platform in platforms {
                    emit(article, platform, &mut posts);
                }
            }
        }
    }

    debug!(articles = articles.len(), posts = posts.len(), "social copy generated");
    posts
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use feedpress_shared::{Article, ArticleId, EnrichmentSource};

    use super::*;

    fn enhanced(n: usize) -> EnhancedArticle {
        EnhancedArticle {
            article: Article {
                id: ArticleId::derive(
                    "https://feeds.example/rss",
                    &format!("https://news.example/{n}"),
                ),
                title: format!("Landlords brace for rental reform number {n}"),
                source: "Property Reporter".into(),
                feed_url: "https://feeds.example/rss".into(),
                url: format!("https://news.example/{n}"),
                guid: None,
                published_at: Utc.with_ymd_and_hms(2025, 3, 14, 7, 0, 0).unwrap(),
                raw_summary: "Raw feed summary.".into(),
                ai_generated: false,
                topic: None,
            },
            ai_body: Some("Body words here".into()),
            ai_summary: Some(
                "The Renters' Rights Bill moves to its final stage in Parliament.".into(),
            ),
            enrichment: EnrichmentSource::Generated,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn linkedin_has_intro_summary_and_link() {
        let post = compose(&enhanced(1), Platform::LinkedIn, date());
        assert!(LINKEDIN_INTROS.iter().any(|i| post.text.starts_with(i)));
        assert!(post.text.contains("Landlords brace for rental reform number 1."));
        assert!(post.text.contains("The Renters' Rights Bill"));
        assert!(post.text.ends_with(": https://news.example/1"));
        assert_eq!(post.word_count, Some(3));
    }

    #[test]
    fn instagram_uses_two_distinct_hashtags() {
        let post = compose(&enhanced(2), Platform::Instagram, date());
        let last_line = post.text.lines().last().unwrap();
        let tags: Vec<&str> = last_line.split(' ').collect();
        assert_eq!(tags.len(), 3);
        assert_ne!(tags[0], tags[1]);
        assert_eq!(tags[2], "#proptech");
        assert!(post.text.contains("Stay updated with the latest trends"));
    }

    #[test]
    fn twitter_never_exceeds_limit() {
        let mut article = enhanced(3);
        article.article.title = "Very long headline ".repeat(30);
        let post = compose(&article, Platform::Twitter, date());
        assert!(post.text.chars().count() <= TWITTER_MAX_CHARS);
        assert!(post.text.contains("https://news.example/3"));
        assert!(post.text.contains("..."));

        article.article.url = format!("https://news.example/{}", "x".repeat(400));
        let post = compose(&article, Platform::Twitter, date());
        assert!(post.text.chars().count() <= TWITTER_MAX_CHARS);
    }

    #[test]
    fn copy_is_deterministic() {
        for platform in Platform::ALL {
            assert_eq!(
                compose(&enhanced(4), platform, date()).text,
                compose(&enhanced(4), platform, date()).text
            );
        }
    }

    #[test]
    fn rotate_mode_round_robins_with_cap() {
        let articles: Vec<_> = (0..10).map(enhanced).collect();
        let config = SocialConfig::default();
        let posts = generate_posts(&articles, &config, date());

        assert_eq!(posts.len(), 6);
        let platforms: Vec<Platform> = posts.iter().map(|p| p.platform).collect();
        assert_eq!(
            platforms,
            vec![
                Platform::LinkedIn,
                Platform::Instagram,
                Platform::Twitter,
                Platform::LinkedIn,
                Platform::Instagram,
                Platform::Twitter
            ]
        );
        assert_eq!(posts[3].article_id, articles[3].article.id);
    }

    #[test]
    fn every_mode_covers_all_platforms_until_cap() {
        let articles: Vec<_> = (0..3).map(enhanced).collect();
        let config = SocialConfig {
            mode: SocialMode::Every,
            posts_per_platform: 2,
            platforms: vec![Platform::LinkedIn, Platform::Twitter],
        };
        let posts = generate_posts(&articles, &config, date());
        assert_eq!(posts.len(), 4);
        assert!(posts.iter().all(|p| p.article_id != articles[2].article.id));

        let unlimited = SocialConfig {
            posts_per_platform: 0,
            ..config
        };
        assert_eq!(generate_posts(&articles, &unlimited, date()).len(), 6);
    }
}
