use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::textutil::sanitize_filename;

/// Dumps prompts and raw responses for inspection. A disabled writer does nothing.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(sanitize_filename(name, false));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    pub fn write_chapter_text(
        &self,
        ordinal: usize,
        attempt: u32,
        pass: &str,
        kind: &str,
        text: &str,
    ) {
        if !self.enabled {
            return;
        }
        let name = format!("ch_{ordinal:04}.a{attempt}.{pass}.{kind}.txt");
        if let Err(err) = self.write_named_text(&name, text) {
            tracing::warn!("{err:#}");
        }
    }
}
