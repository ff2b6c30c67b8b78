use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_DRAFT: &str = "draft.txt";
pub const DEFAULT_FINAL: &str = "final.txt";
pub const DEFAULT_TITLES: &str = "titles.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    /// Pass 1: draft translation plus glossary candidates.
    pub draft: String,
    /// Pass 2: glossary-enforced final translation, plain prose out.
    pub final_pass: String,
    pub titles: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            draft: DEFAULT_DRAFT_TEXT.to_string(),
            final_pass: DEFAULT_FINAL_TEXT.to_string(),
            titles: DEFAULT_TITLES_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    pub fn load(config_path: &Path, p: &PromptsSection) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            draft: read_prompt(config_dir, "draft", p.draft.as_deref(), DEFAULT_DRAFT)?,
            final_pass: read_prompt(config_dir, "final", p.final_pass.as_deref(), DEFAULT_FINAL)?,
            titles: read_prompt(config_dir, "titles", p.titles.as_deref(), DEFAULT_TITLES)?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    key: &str,
    configured: Option<&str>,
    default_filename: &str,
) -> anyhow::Result<String> {
    let rel = format!("{DEFAULT_PROMPTS_DIR}/{default_filename}");
    let mut p = PathBuf::from(configured.unwrap_or(&rel));
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: novel-translator --init-config)",
            p.display()
        ));
    }
    let text =
        std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(text)
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_DRAFT, DEFAULT_DRAFT_TEXT),
        (DEFAULT_FINAL, DEFAULT_FINAL_TEXT),
        (DEFAULT_TITLES, DEFAULT_TITLES_TEXT),
    ]
}

pub const DEFAULT_DRAFT_TEXT: &str = r#"INSTRUCTIONS:
You are an expert translator of {{source_lang}} web novels into {{target_lang}}. Your tasks:
1. Translate the text in [CURRENT_CHAPTER] accurately and in a literary register. Keep the style of the original.
2. Analyse the ORIGINAL text in [CURRENT_CHAPTER] and propose KEY terms for the glossary. Include only:
   - proper names (people, organisations, places);
   - names of techniques, artifacts, concepts, titles and factions.
   Do NOT include common words, adjectives or verbs unless they are part of a fixed term.
   For each term give the most suitable {{target_lang}} translation.
3. Output STRICTLY in this format:

[TRANSLATION_START]
(ONLY the full {{target_lang}} translation of [CURRENT_CHAPTER])
[TRANSLATION_END]

[GLOSSARY_CANDIDATES_START]
(One 'OriginalTerm: ProposedTranslation' pair per line. Leave empty if there are none.)
[GLOSSARY_CANDIDATES_END]

CURRENT GLOSSARY (use it, do not propose its terms again):
{{glossary}}

PREVIOUS CONTEXT (similar passages and recent chapters):
{{context}}

TEXT TO TRANSLATE AND ANALYSE:
[CURRENT_CHAPTER: {{chapter_name}}]
{{chapter_text}}
[/CURRENT_CHAPTER]

RESULT:
"#;

pub const DEFAULT_FINAL_TEXT: &str = r#"INSTRUCTIONS:
You are a professional translator of {{source_lang}} web novels into {{target_lang}}. Translate the text in [CURRENT_CHAPTER] as precisely as possible.
- STRICTLY follow the translations of names and terms given in [GLOSSARY]. Do not invent other renderings for them.
- Use [PREVIOUS_CONTEXT] to follow the plot and the style.
- Do not add anything that is not in [CURRENT_CHAPTER] and do not leave anything out.
- Answer with ONLY the final {{target_lang}} translation, without explanations, headings or section markers.
- Separate paragraphs with a blank line.

[GLOSSARY] (mandatory):
{{glossary}}

[PREVIOUS_CONTEXT]:
{{context}}

TEXT TO TRANSLATE:
[CURRENT_CHAPTER: {{chapter_name}}]
{{chapter_text}}
[/CURRENT_CHAPTER]

FINAL TRANSLATION:
"#;

pub const DEFAULT_TITLES_TEXT: &str = r#"Translate the following {{count}} {{source_lang}} chapter titles into {{target_lang}}.
Keep the numbering: answer with exactly one line per title, in the form "N. translated title".
Do not add comments.

{{titles}}
"#;
