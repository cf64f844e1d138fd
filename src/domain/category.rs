//! Category taxonomy used to file posts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A blog category with the keywords that select it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,

    /// Matched case-insensitively as substrings
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Category {
    pub fn new(id: u32, name: &str, keywords: &[&str]) -> Self {
        Self {
            id,
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Errors found while validating a taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    #[error("Taxonomy has no categories")]
    Empty,

    #[error("Duplicate category id: {0}")]
    DuplicateId(u32),

    #[error("Category {id} ('{name}') has no keywords")]
    NoKeywords { id: u32, name: String },

    #[error("Fallback category {0} is not in the taxonomy")]
    MissingFallback(u32),
}

/// The validated, immutable set of categories for a run
#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: Vec<Category>,
    fallback_id: u32,
}

impl Taxonomy {
    /// Validate and build a taxonomy.
    ///
    /// Ids must be unique, the fallback id must exist, and every category
    /// except the fallback needs at least one keyword.
    pub fn new(categories: Vec<Category>, fallback_id: u32) -> Result<Self, TaxonomyError> {
        if categories.is_empty() {
            return Err(TaxonomyError::Empty);
        }

        let mut seen = HashSet::new();
        for category in &categories {
            if !seen.insert(category.id) {
                return Err(TaxonomyError::DuplicateId(category.id));
            }
            let has_keywords = category.keywords.iter().any(|k| !k.trim().is_empty());
            if category.id != fallback_id && !has_keywords {
                return Err(TaxonomyError::NoKeywords {
                    id: category.id,
                    name: category.name.clone(),
                });
            }
        }

        if !seen.contains(&fallback_id) {
            return Err(TaxonomyError::MissingFallback(fallback_id));
        }

        Ok(Self {
            categories,
            fallback_id,
        })
    }

    /// Categories in configured order
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, id: u32) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn fallback(&self) -> &Category {
        // Presence is checked in `new`
        self.get(self.fallback_id)
            .unwrap_or(&self.categories[0])
    }

    pub fn fallback_id(&self) -> u32 {
        self.fallback_id
    }

    /// Resolve a free-form label (an id or a category name) to a category
    pub fn resolve_label(&self, label: &str) -> Option<&Category> {
        let label = label
            .trim()
            .trim_matches(|c: char| c == '.' || c == '"' || c == '\'');
        if label.is_empty() {
            return None;
        }

        if let Ok(id) = label.parse::<u32>() {
            return self.get(id);
        }

        let lower = label.to_lowercase();
        self.categories
            .iter()
            .find(|c| c.name.to_lowercase() == lower)
            .or_else(|| {
                self.categories
                    .iter()
                    .find(|c| c.name.to_lowercase().contains(&lower))
            })
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            fallback_id: DEFAULT_FALLBACK_ID,
        }
    }
}

/// Fallback category for the built-in taxonomy ("Đồ chơi giấy", paper toys)
pub const DEFAULT_FALLBACK_ID: u32 = 3;

/// Built-in taxonomy used when the config file defines none
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new(1, "CubeCraft", &["cube", "minecraft", "block"]),
        Category::new(2, "Dạng thiết kế", &["design", "template", "pattern"]),
        Category::new(3, "Đồ chơi giấy", &["toy", "plaything", "đồ chơi"]),
        Category::new(4, "Động vật", &["animal", "pet", "zoo", "động vật"]),
        Category::new(5, "Game", &["game", "character", "gaming"]),
        Category::new(6, "Gundam", &["gundam", "robot", "mecha"]),
        Category::new(7, "Hoạt hình | Anime", &["anime", "manga", "cartoon"]),
        Category::new(8, "Hướng dẫn", &["tutorial", "guide", "instruction"]),
        Category::new(9, "Khí tài Quân sự", &["military", "tank", "soldier"]),
        Category::new(10, "Mô hình Chibi", &["chibi", "cute", "kawaii"]),
        Category::new(11, "Mô hình động", &["moving", "mechanical", "motion"]),
        Category::new(12, "Ngày Lễ/Tết", &["holiday", "festival", "celebration"]),
        Category::new(13, "Nhà cửa | Sa bàn", &["house", "building", "architecture"]),
        Category::new(14, "Phương tiện giao thông", &["car", "plane", "train", "vehicle"]),
        Category::new(15, "Việt Nam", &["vietnam", "vietnamese", "việt nam"]),
    ]
}
