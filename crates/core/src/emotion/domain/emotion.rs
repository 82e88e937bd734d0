use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Facial-expression labels understood by the pipeline.
///
/// The first seven are the FER label set; `Contempt` is only produced by
/// FER+ style models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
    Contempt,
}

impl Emotion {
    pub const ALL: &'static [Emotion] = &[
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
        Emotion::Contempt,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Contempt => "contempt",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Emotion::ALL
            .iter()
            .copied()
            .find(|e| e.label() == lower)
            .ok_or(UnknownEmotion(s.to_string()))
    }
}

/// Per-face confidence scores, kept in insertion order.
///
/// Order matters: ties for the strongest emotion go to the label inserted
/// first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmotionScores {
    entries: Vec<(Emotion, f32)>,
}

impl EmotionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the score for `emotion`, keeping its original position when it
    /// is already present.
    pub fn insert(&mut self, emotion: Emotion, score: f32) {
        match self.entries.iter_mut().find(|(e, _)| *e == emotion) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((emotion, score)),
        }
    }

    pub fn get(&self, emotion: Emotion) -> Option<f32> {
        self.entries
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label with the highest score; the first maximum encountered wins.
    /// NaN scores never win.
    pub fn strongest(&self) -> Option<Emotion> {
        let mut best: Option<(Emotion, f32)> = None;
        for (emotion, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((emotion, score)),
            }
        }
        best.map(|(emotion, _)| emotion)
    }
}

impl FromIterator<(Emotion, f32)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (Emotion, f32)>>(iter: I) -> Self {
        let mut scores = EmotionScores::new();
        for (emotion, score) in iter {
            scores.insert(emotion, score);
        }
        scores
    }
}
