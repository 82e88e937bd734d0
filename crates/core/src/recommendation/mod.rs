pub mod catalog;
pub mod product;
pub mod recommendation_mapper;
pub mod selection_context;
