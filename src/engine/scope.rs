// src/engine/scope.rs

//! Scope resolution: topic → law sections → articles → questions.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::EngineError,
    models::{question::Difficulty, scope::ScopeRequest},
    store::{ArticleSelector, Catalog, ContentFilter},
};

/// One way of naming questions in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeSource {
    Topic(i32),
    Law(i64),
    Articles { law_id: i64, from: i32, to: i32 },
}

/// Normalized scope: a non-empty, deduplicated list of sources plus
/// content flags. Built once from the wire request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDescriptor {
    sources: Vec<ScopeSource>,
    filter: ContentFilter,
}

impl ScopeDescriptor {
    pub fn new(
        sources: impl IntoIterator<Item = ScopeSource>,
        filter: ContentFilter,
    ) -> Result<Self, EngineError> {
        let sources: BTreeSet<ScopeSource> = sources.into_iter().collect();
        if sources.is_empty() {
            return Err(EngineError::ScopeEmpty);
        }
        for source in &sources {
            if let ScopeSource::Articles { law_id, from, to } = source {
                if from > to {
                    return Err(EngineError::InvalidRequest(format!(
                        "article range {}..{} of law {} is inverted",
                        from, to, law_id
                    )));
                }
            }
        }
        Ok(Self {
            sources: sources.into_iter().collect(),
            filter,
        })
    }

    pub fn from_request(req: &ScopeRequest) -> Result<Self, EngineError> {
        let topics = req
            .topic_numbers
            .iter()
            .flatten()
            .map(|t| ScopeSource::Topic(*t));
        let laws = req.law_ids.iter().flatten().map(|l| ScopeSource::Law(*l));
        let ranges = req
            .article_ranges
            .iter()
            .flatten()
            .map(|r| ScopeSource::Articles {
                law_id: r.law_id,
                from: r.from,
                to: r.to,
            });

        let filter = ContentFilter {
            official_exam_only: req.official_exam_only.unwrap_or(false),
            exclude_reserva: req.exclude_reserva.unwrap_or(false),
        };

        Self::new(topics.chain(laws).chain(ranges), filter)
    }

    pub fn topics(topics: &[i32]) -> Result<Self, EngineError> {
        Self::new(
            topics.iter().map(|t| ScopeSource::Topic(*t)),
            ContentFilter::default(),
        )
    }

    pub fn sources(&self) -> &[ScopeSource] {
        &self.sources
    }

    pub fn filter(&self) -> ContentFilter {
        self.filter
    }

    fn topic_numbers(&self) -> Vec<i32> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                ScopeSource::Topic(t) => Some(*t),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedQuestion {
    pub difficulty: Difficulty,
    /// Requested topics this question was reached through.
    pub topics: BTreeSet<i32>,
}

/// Canonical eligible set: question id → difficulty and topic attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScope {
    questions: BTreeMap<i64, ScopedQuestion>,
    topics: BTreeSet<i32>,
}

impl ResolvedScope {
    /// Builds a scope from already-eligible questions.
    pub fn from_questions(questions: impl IntoIterator<Item = (i64, ScopedQuestion)>) -> Self {
        let questions: BTreeMap<i64, ScopedQuestion> = questions.into_iter().collect();
        let topics = questions
            .values()
            .flat_map(|q| q.topics.iter().copied())
            .collect();
        Self { questions, topics }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn contains(&self, question_id: i64) -> bool {
        self.questions.contains_key(&question_id)
    }

    pub fn get(&self, question_id: i64) -> Option<&ScopedQuestion> {
        self.questions.get(&question_id)
    }

    /// Ascending question ids.
    pub fn question_ids(&self) -> Vec<i64> {
        self.questions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &ScopedQuestion)> {
        self.questions.iter().map(|(id, q)| (*id, q))
    }

    /// Topics with at least one question in the scope.
    pub fn topics(&self) -> &BTreeSet<i32> {
        &self.topics
    }
}

/// Resolves a descriptor against the catalog.
///
/// At most `max_candidates` articles and `max_candidates` questions are
/// materialized; a broader scope fails with `ScopeTooBroad` instead of
/// growing without bound.
pub async fn resolve_scope(
    catalog: &dyn Catalog,
    descriptor: &ScopeDescriptor,
    max_candidates: usize,
) -> Result<ResolvedScope, EngineError> {
    // (selector, topic it came from)
    let mut selectors: Vec<(ArticleSelector, Option<i32>)> = Vec::new();

    let topic_numbers = descriptor.topic_numbers();
    if !topic_numbers.is_empty() {
        for section in catalog.topic_sections(&topic_numbers).await? {
            selectors.push((
                ArticleSelector {
                    law_id: section.law_id,
                    from: section.article_from,
                    to: section.article_to,
                },
                Some(section.topic_number),
            ));
        }
    }

    for source in descriptor.sources() {
        match *source {
            ScopeSource::Topic(_) => {}
            ScopeSource::Law(law_id) => selectors.push((
                ArticleSelector {
                    law_id,
                    from: None,
                    to: None,
                },
                None,
            )),
            ScopeSource::Articles { law_id, from, to } => selectors.push((
                ArticleSelector {
                    law_id,
                    from: Some(from),
                    to: Some(to),
                },
                None,
            )),
        }
    }

    let unique: Vec<ArticleSelector> = selectors
        .iter()
        .map(|(s, _)| *s)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if unique.is_empty() {
        tracing::debug!(?descriptor, "scope resolved to no article selectors");
        return Ok(ResolvedScope::default());
    }

    let fetch_limit = max_candidates.saturating_add(1);
    let articles = catalog.articles_matching(&unique, fetch_limit).await?;
    if articles.len() > max_candidates {
        tracing::warn!(limit = max_candidates, "scope exceeds article limit");
        return Err(EngineError::ScopeTooBroad {
            limit: max_candidates,
        });
    }

    let mut article_topics: BTreeMap<i64, BTreeSet<i32>> = BTreeMap::new();
    for article in &articles {
        let entry = article_topics.entry(article.id).or_default();
        for (selector, topic) in &selectors {
            if let Some(topic) = topic {
                if selector.matches(article) {
                    entry.insert(*topic);
                }
            }
        }
    }

    let article_ids: Vec<i64> = article_topics.keys().copied().collect();
    if article_ids.is_empty() {
        return Ok(ResolvedScope::default());
    }

    let metas = catalog
        .questions_for_articles(&article_ids, descriptor.filter(), fetch_limit)
        .await?;

    if metas.len() > max_candidates {
        tracing::warn!(limit = max_candidates, "scope exceeds candidate limit");
        return Err(EngineError::ScopeTooBroad {
            limit: max_candidates,
        });
    }

    let scope = ResolvedScope::from_questions(metas.into_iter().map(|meta| {
        let topics = article_topics
            .get(&meta.article_id)
            .cloned()
            .unwrap_or_default();
        (
            meta.id,
            ScopedQuestion {
                difficulty: meta.difficulty,
                topics,
            },
        )
    }));

    tracing::debug!(
        selectors = unique.len(),
        articles = article_ids.len(),
        questions = scope.len(),
        "scope resolved"
    );

    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scope::ArticleRangeRequest;
    use crate::store::memory::{CatalogData, MemoryStore};

    /// Law 1 has articles 1..=4, law 2 has articles 1..=2.
    /// Topic 1 = law 1 articles 1..=2 plus all of law 2.
    /// Topic 2 = law 1 articles 2..=4, overlapping topic 1 on article 2.
    fn fixture() -> (MemoryStore, Vec<i64>) {
        let mut data = CatalogData::default();
        let l1: Vec<i64> = (1..=4).map(|n| data.add_article(1, n)).collect();
        let l2: Vec<i64> = (1..=2).map(|n| data.add_article(2, n)).collect();
        data.add_topic_section(1, 1, Some(1), Some(2));
        data.add_topic_section(1, 2, None, None);
        data.add_topic_section(2, 1, Some(2), Some(4));

        let mut ids = Vec::new();
        for article in l1.iter().chain(l2.iter()) {
            ids.push(data.add_question(*article, Difficulty::Medium));
        }
        (MemoryStore::new(data), ids)
    }

    #[test]
    fn test_empty_descriptor_is_scope_empty() {
        let req = ScopeRequest::default();
        assert!(matches!(
            ScopeDescriptor::from_request(&req),
            Err(EngineError::ScopeEmpty)
        ));

        let req = ScopeRequest {
            topic_numbers: Some(vec![]),
            official_exam_only: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            ScopeDescriptor::from_request(&req),
            Err(EngineError::ScopeEmpty)
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let req = ScopeRequest {
            article_ranges: Some(vec![ArticleRangeRequest {
                law_id: 1,
                from: 9,
                to: 3,
            }]),
            ..Default::default()
        };
        assert!(matches!(
            ScopeDescriptor::from_request(&req),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_topics_are_deduplicated() {
        let (store, ids) = fixture();
        let descriptor = ScopeDescriptor::topics(&[1, 2]).unwrap();

        let scope = resolve_scope(&store, &descriptor, 100).await.unwrap();

        assert_eq!(scope.len(), ids.len());
        // Law 1 article 2 is reachable through both topics.
        let shared = scope.get(ids[1]).unwrap();
        assert_eq!(shared.topics, BTreeSet::from([1, 2]));
        assert_eq!(scope.topics(), &BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_topic_and_law_overlap() {
        let (store, ids) = fixture();
        let descriptor = ScopeDescriptor::new(
            [ScopeSource::Topic(2), ScopeSource::Law(2)],
            ContentFilter::default(),
        )
        .unwrap();

        let scope = resolve_scope(&store, &descriptor, 100).await.unwrap();

        // Topic 2: law 1 articles 2..=4 (3 questions), law 2: 2 questions.
        assert_eq!(scope.len(), 5);
        assert!(!scope.contains(ids[0]));
        assert!(scope.get(ids[4]).unwrap().topics.is_empty());
    }

    #[tokio::test]
    async fn test_article_range_scope() {
        let (store, ids) = fixture();
        let descriptor = ScopeDescriptor::new(
            [ScopeSource::Articles {
                law_id: 1,
                from: 3,
                to: 10,
            }],
            ContentFilter::default(),
        )
        .unwrap();

        let scope = resolve_scope(&store, &descriptor, 100).await.unwrap();
        assert_eq!(scope.question_ids(), vec![ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn test_inactive_and_flagged_questions_excluded() {
        let mut data = CatalogData::default();
        let article = data.add_article(7, 1);
        let plain = data.add_question(article, Difficulty::Easy);
        let official = data.add_question(article, Difficulty::Easy);
        let reserva = data.add_question(article, Difficulty::Easy);
        let inactive = data.add_question(article, Difficulty::Easy);
        data.question_mut(official).unwrap().is_official_exam = true;
        {
            let q = data.question_mut(reserva).unwrap();
            q.is_official_exam = true;
            q.is_reserva = true;
        }
        data.question_mut(inactive).unwrap().is_active = false;
        let store = MemoryStore::new(data);

        let all = ScopeDescriptor::new([ScopeSource::Law(7)], ContentFilter::default()).unwrap();
        let scope = resolve_scope(&store, &all, 100).await.unwrap();
        assert_eq!(scope.question_ids(), vec![plain, official, reserva]);

        let official_only = ScopeDescriptor::new(
            [ScopeSource::Law(7)],
            ContentFilter {
                official_exam_only: true,
                exclude_reserva: true,
            },
        )
        .unwrap();
        let scope = resolve_scope(&store, &official_only, 100).await.unwrap();
        assert_eq!(scope.question_ids(), vec![official]);
    }

    #[tokio::test]
    async fn test_scope_too_broad() {
        let (store, _) = fixture();
        let descriptor = ScopeDescriptor::topics(&[1, 2]).unwrap();

        let result = resolve_scope(&store, &descriptor, 3).await;
        assert!(matches!(result, Err(EngineError::ScopeTooBroad { limit: 3 })));
    }

    #[tokio::test]
    async fn test_article_step_is_bounded() {
        let mut data = CatalogData::default();
        for n in 1..=10 {
            data.add_article(5, n);
        }
        let article = data.add_article(5, 11);
        data.add_question(article, Difficulty::Easy);
        let store = MemoryStore::new(data);
        let descriptor =
            ScopeDescriptor::new([ScopeSource::Law(5)], ContentFilter::default()).unwrap();

        // One question, but eleven articles to walk through.
        let result = resolve_scope(&store, &descriptor, 5).await;
        assert!(matches!(result, Err(EngineError::ScopeTooBroad { limit: 5 })));
        assert_eq!(resolve_scope(&store, &descriptor, 11).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_limit_does_not_overflow() {
        let (store, ids) = fixture();
        let descriptor = ScopeDescriptor::topics(&[1, 2]).unwrap();

        let scope = resolve_scope(&store, &descriptor, usize::MAX).await.unwrap();
        assert_eq!(scope.len(), ids.len());
    }

    #[tokio::test]
    async fn test_unknown_topic_resolves_empty() {
        let (store, _) = fixture();
        let descriptor = ScopeDescriptor::topics(&[99]).unwrap();

        let scope = resolve_scope(&store, &descriptor, 100).await.unwrap();
        assert!(scope.is_empty());
    }
}
