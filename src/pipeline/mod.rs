pub mod config;
pub mod context;
pub mod prompts;
pub mod report;
pub mod state;
pub mod trace;
pub mod translator;
pub mod window;

pub use config::{init_default_config, CliOverrides, PipelineConfig};
pub use report::{write_report, RunReport};
pub use translator::{ChapterTranslator, Services, TranslatorSettings};
