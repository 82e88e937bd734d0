use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

use crate::emotion::domain::emotion::Emotion;
use crate::recommendation::product::Product;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("product id {0} is defined twice with different contents")]
    ConflictingId(u32),
    #[error("mood {0} is listed twice")]
    DuplicateMood(Emotion),
}

/// Products grouped by the mood they are recommended for.
///
/// Loaded once at startup and read-only afterwards. Moods keep the order
/// they were listed in. The same product may appear under several moods as
/// long as every copy is identical.
#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    moods: Vec<(Emotion, Vec<Product>)>,
}

impl Catalog {
    pub fn new(moods: Vec<(Emotion, Vec<Product>)>) -> Result<Self, CatalogError> {
        check_moods(&moods)?;
        check_ids(&moods)?;
        Ok(Self { moods })
    }

    /// Two products for each of happy, sad, angry and neutral.
    pub fn builtin() -> Self {
        let moods = vec![
            (
                Emotion::Happy,
                vec![
                    Product::new(1, "Product A", "Electronics"),
                    Product::new(2, "Product B", "Books"),
                ],
            ),
            (
                Emotion::Sad,
                vec![
                    Product::new(3, "Product C", "Clothing"),
                    Product::new(4, "Product D", "Books"),
                ],
            ),
            (
                Emotion::Angry,
                vec![
                    Product::new(5, "Product E", "Electronics"),
                    Product::new(6, "Product F", "Clothing"),
                ],
            ),
            (
                Emotion::Neutral,
                vec![
                    Product::new(7, "Product G", "Accessories"),
                    Product::new(8, "Product H", "Home Goods"),
                ],
            ),
        ];
        Self { moods }
    }

    /// Parses `{"happy": [{"id": 1, "name": "...", "category": "..."}], ...}`,
    /// keeping the moods in document order.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let MoodTable(moods) = serde_json::from_str(json)?;
        Self::new(moods)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&json)?;
        log::info!(
            "Loaded catalog from {} ({} products)",
            path.display(),
            catalog.all().len()
        );
        Ok(catalog)
    }

    pub fn products_for(&self, emotion: Emotion) -> Option<&[Product]> {
        self.moods
            .iter()
            .find(|(mood, _)| *mood == emotion)
            .map(|(_, products)| products.as_slice())
    }

    /// Every distinct product, in mood order then listing order.
    pub fn all(&self) -> Vec<&Product> {
        let mut seen = HashSet::new();
        self.products()
            .filter(|p| seen.insert(p.id))
            .collect()
    }

    pub fn find(&self, id: u32) -> Option<&Product> {
        self.products().find(|p| p.id == id)
    }

    /// Products whose id is in `ids`, in catalog order. Unknown ids are
    /// ignored.
    pub fn select<'a>(&self, ids: impl IntoIterator<Item = &'a u32>) -> Vec<Product> {
        let wanted: HashSet<u32> = ids.into_iter().copied().collect();
        self.all()
            .into_iter()
            .filter(|p| wanted.contains(&p.id))
            .cloned()
            .collect()
    }

    fn products(&self) -> impl Iterator<Item = &Product> {
        self.moods.iter().flat_map(|(_, products)| products)
    }
}

fn check_moods(moods: &[(Emotion, Vec<Product>)]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for (mood, _) in moods {
        if !seen.insert(*mood) {
            return Err(CatalogError::DuplicateMood(*mood));
        }
    }
    Ok(())
}

fn check_ids(moods: &[(Emotion, Vec<Product>)]) -> Result<(), CatalogError> {
    let mut seen: HashMap<u32, &Product> = HashMap::new();
    for product in moods.iter().flat_map(|(_, products)| products) {
        if let Some(existing) = seen.insert(product.id, product) {
            if existing != product {
                return Err(CatalogError::ConflictingId(product.id));
            }
        }
    }
    Ok(())
}

/// JSON object of mood to products, read entry by entry so document order
/// survives.
struct MoodTable(Vec<(Emotion, Vec<Product>)>);

impl<'de> Deserialize<'de> for MoodTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MoodTableVisitor;

        impl<'de> Visitor<'de> for MoodTableVisitor {
            type Value = MoodTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping moods to product lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MoodTable, A::Error> {
                let mut moods = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((mood, products)) = map.next_entry::<Emotion, Vec<Product>>()? {
                    if moods.iter().any(|(seen, _)| *seen == mood) {
                        return Err(de::Error::custom(format!("mood {mood} is listed twice")));
                    }
                    moods.push((mood, products));
                }
                Ok(MoodTable(moods))
            }
        }

        deserializer.deserialize_map(MoodTableVisitor)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
