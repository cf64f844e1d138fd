//! Keyword-first category classification with an AI fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::AiClassifier;
use crate::domain::{Category, Classification, ClassificationMethod, Taxonomy};

/// Assigns a category to a subject and its generated content
pub struct CategoryClassifier {
    taxonomy: Taxonomy,
    ai: Option<Arc<dyn AiClassifier>>,
}

impl CategoryClassifier {
    pub fn new(taxonomy: Taxonomy, ai: Option<Arc<dyn AiClassifier>>) -> Self {
        Self { taxonomy, ai }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Score every category: the number of its keywords found as a
    /// case-insensitive substring of `subject + " " + content`.
    pub fn scores(&self, subject: &str, content: &str) -> Vec<(u32, usize)> {
        let text = format!("{} {}", subject, content).to_lowercase();

        self.taxonomy
            .categories()
            .iter()
            .map(|category| (category.id, keyword_score(category, &text)))
            .collect()
    }

    /// Deterministic keyword result, or `None` when nothing matched.
    ///
    /// Highest score wins; equal scores go to the lowest id.
    pub fn keyword_match(&self, subject: &str, content: &str) -> Option<Classification> {
        self.scores(subject, content)
            .into_iter()
            .filter(|(_, score)| *score > 0)
            .min_by(|(a_id, a_score), (b_id, b_score)| {
                b_score.cmp(a_score).then(a_id.cmp(b_id))
            })
            .map(|(category_id, score)| Classification {
                category_id,
                score,
                method: ClassificationMethod::Keyword,
            })
    }

    /// Classify a subject. Never fails: the fallback category is the floor.
    pub async fn classify(&self, subject: &str, content: &str) -> Classification {
        if let Some(found) = self.keyword_match(subject, content) {
            debug!(subject, category = found.category_id, score = found.score, "Keyword classification");
            return found;
        }

        if let Some(ai) = &self.ai {
            match ai
                .ai_classify(subject, content, self.taxonomy.categories())
                .await
            {
                Ok(label) => match self.taxonomy.resolve_label(&label) {
                    Some(category) => {
                        info!(subject, category = category.id, "AI classification");
                        return Classification {
                            category_id: category.id,
                            score: 0,
                            method: ClassificationMethod::Ai,
                        };
                    }
                    None => warn!(subject, %label, "AI returned an unknown category"),
                },
                Err(e) => warn!(subject, error = %e, "AI classification failed"),
            }
        }

        let fallback = self.taxonomy.fallback();
        info!(subject, category = fallback.id, "Using fallback category");
        Classification {
            category_id: fallback.id,
            score: 0,
            method: ClassificationMethod::Fallback,
        }
    }
}

fn keyword_score(category: &Category, text: &str) -> usize {
    category
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && text.contains(k.as_str()))
        .count()
}
