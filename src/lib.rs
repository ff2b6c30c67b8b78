pub mod assembly;
pub mod chapters;
pub mod config;
pub mod glossary;
pub mod markers;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod retrieval;
pub mod textutil;
pub mod tokens;
