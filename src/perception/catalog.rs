use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonsterCategory {
    Biblop,
    Blop,
    RoyalBlop,
}

impl MonsterCategory {
    /// Directory the category's images live in under the assets root.
    pub fn asset_dir(&self) -> &'static str {
        match self {
            MonsterCategory::Biblop => "biblops",
            MonsterCategory::Blop => "blops",
            MonsterCategory::RoyalBlop => "royal_blops",
        }
    }
}

/// Reference entity the matcher can recognise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterAsset {
    pub id: String,
    pub category: MonsterCategory,
    /// Path relative to the assets root, an absolute path, or an `http(s)://` URL.
    pub image_path: String,
}

impl MonsterAsset {
    pub fn new(id: impl Into<String>, category: MonsterCategory) -> Self {
        let id = id.into();
        let image_path = format!("{}/{}.webp", category.asset_dir(), id);
        Self {
            id,
            category,
            image_path,
        }
    }
}

/// Catalog shipped with the application, in matching priority order.
pub fn builtin_catalog() -> Vec<MonsterAsset> {
    use MonsterCategory::*;
    [
        ("166", Biblop),
        ("167", Biblop),
        ("168", Biblop),
        ("169", Biblop),
        ("162", Blop),
        ("163", Blop),
        ("164", Blop),
        ("165", Blop),
        ("645", RoyalBlop),
        ("646", RoyalBlop),
        ("647", RoyalBlop),
        ("648", RoyalBlop),
    ]
    .into_iter()
    .map(|(id, category)| MonsterAsset::new(id, category))
    .collect()
}
