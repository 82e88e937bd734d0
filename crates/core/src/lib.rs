pub mod annotation;
pub mod broadcast;
pub mod emotion;
pub mod pipeline;
pub mod recommendation;
pub mod shared;
pub mod video;
