use chrono::{DateTime, Utc};

/// Scored news article, written by the news collaborator and only read here.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsArticle {
    pub id: i64,
    pub symbol: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub sentiment_score: f32,
}
