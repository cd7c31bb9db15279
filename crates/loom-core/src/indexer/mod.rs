pub mod chunker;
pub mod filesystem;
pub mod git;
pub mod history;
pub mod imports;
pub mod languages;
pub mod metadata;
pub mod pipeline;
