use std::sync::Arc;

use serde::Serialize;

use crate::emotion::domain::emotion::Emotion;
use crate::recommendation::catalog::Catalog;
use crate::recommendation::product::Product;
use crate::recommendation::selection_context::SelectionSnapshot;

pub const HAPPY_MESSAGE: &str =
    "It seems like you're in a great mood! Check out these exciting products!";
pub const SAD_MESSAGE: &str = "I'm here to help. Maybe these products can improve your mood.";
pub const ANGRY_MESSAGE: &str =
    "I understand your frustration. Here are some items that might help.";
pub const DEFAULT_MESSAGE: &str = "Here are some products you might like.";

/// Payload pushed to subscribers once per processed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecommendationEvent {
    pub emotion: Emotion,
    pub recommendations: Vec<Product>,
    pub message: String,
    /// Recommended product ids the client already has selected.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub in_cart: Vec<u32>,
}

/// Turns a dominant emotion into a product list and a message.
///
/// Emotions missing from the catalog fall back to the neutral products, so
/// every emotion yields a recommendation as long as neutral is stocked.
#[derive(Clone)]
pub struct RecommendationMapper {
    catalog: Arc<Catalog>,
}

impl RecommendationMapper {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn products_for(&self, emotion: Emotion) -> &[Product] {
        self.catalog
            .products_for(emotion)
            .or_else(|| self.catalog.products_for(Emotion::Neutral))
            .unwrap_or(&[])
    }

    /// Same emotion and catalog always give the same products and message;
    /// the selection only fills `in_cart`.
    pub fn map(&self, emotion: Emotion, selection: &SelectionSnapshot) -> RecommendationEvent {
        let recommendations = self.products_for(emotion).to_vec();
        let in_cart = recommendations
            .iter()
            .map(|p| p.id)
            .filter(|id| selection.contains(id))
            .collect();
        RecommendationEvent {
            emotion,
            recommendations,
            message: message_for(emotion).to_string(),
            in_cart,
        }
    }
}

pub fn message_for(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Happy => HAPPY_MESSAGE,
        Emotion::Sad => SAD_MESSAGE,
        Emotion::Angry => ANGRY_MESSAGE,
        _ => DEFAULT_MESSAGE,
    }
}
