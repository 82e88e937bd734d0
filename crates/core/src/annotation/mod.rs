pub mod frame_annotator;
mod glyphs;
