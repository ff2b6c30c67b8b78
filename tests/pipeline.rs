use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use novel_translator::chapters::ChapterStore;
use novel_translator::glossary::Glossary;
use novel_translator::markers::TRANSLATION_START;
use novel_translator::models::{CallError, GenerateRequest, LlmClient, Pause};
use novel_translator::pipeline::prompts::PromptSet;
use novel_translator::pipeline::{ChapterTranslator, RunReport, Services, TranslatorSettings};
use novel_translator::retrieval::{ContextRetriever, Passage, RetrievedPassage};
use novel_translator::tokens::CharRatioEstimator;
use tempfile::TempDir;

type Script = Box<dyn Fn(&str, u8, usize) -> Result<String, CallError>>;

/// LLM double: picks the chapter out of the prompt and answers from a script keyed by
/// (chapter file, pass, how many times that pair was asked before).
struct FakeLlm {
    calls: Mutex<Vec<(String, u8)>>,
    prompts: Mutex<Vec<String>>,
    script: Script,
}

impl FakeLlm {
    fn new(script: impl Fn(&str, u8, usize) -> Result<String, CallError> + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    fn well_behaved() -> Self {
        Self::new(|ch, pass, _| Ok(good_reply(ch, pass)))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn calls_for(&self, chapter: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|(c, _)| c == chapter)
            .count()
    }

    fn prompt(&self, chapter: &str, pass: u8) -> String {
        let calls = self.calls.lock().expect("lock");
        let prompts = self.prompts.lock().expect("lock");
        calls
            .iter()
            .zip(prompts.iter())
            .filter(|((c, p), _)| c == chapter && *p == pass)
            .map(|(_, prompt)| prompt.clone())
            .last()
            .expect("prompt recorded")
    }
}

impl LlmClient for FakeLlm {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, CallError> {
        let chapter = request
            .prompt
            .split("[CURRENT_CHAPTER: ")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .unwrap_or("?")
            .to_string();
        let pass = if request.prompt.contains(TRANSLATION_START) {
            1
        } else {
            2
        };
        let nth = {
            let mut calls = self.calls.lock().expect("lock");
            let nth = calls
                .iter()
                .filter(|(c, p)| *c == chapter && *p == pass)
                .count();
            calls.push((chapter.clone(), pass));
            nth
        };
        self.prompts
            .lock()
            .expect("lock")
            .push(request.prompt.to_string());
        (self.script)(&chapter, pass, nth)
    }
}

fn good_reply(chapter: &str, pass: u8) -> String {
    if pass == 1 {
        format!(
            "[TRANSLATION_START]\nЧерновик {chapter}\n[TRANSLATION_END]\n\n[GLOSSARY_CANDIDATES_START]\n林风: Линь Фэн\n[GLOSSARY_CANDIDATES_END]"
        )
    } else {
        final_text(chapter)
    }
}

fn final_text(chapter: &str) -> String {
    format!("Перевод {chapter}.\n\nВторой абзац.\n\nТретий абзац.")
}

#[derive(Default)]
struct RecordingPause(Mutex<Vec<Duration>>);

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.0.lock().expect("lock").push(duration);
    }
}

impl RecordingPause {
    fn pauses(&self) -> Vec<Duration> {
        self.0.lock().expect("lock").clone()
    }
}

struct FakeRetriever {
    queries: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeRetriever {
    fn new(fail: bool) -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail,
        }
    }
}

impl ContextRetriever for FakeRetriever {
    fn similar(
        &self,
        _query: &str,
        _k: usize,
        exclude_source: &str,
    ) -> anyhow::Result<Vec<RetrievedPassage>> {
        self.queries
            .lock()
            .expect("lock")
            .push(exclude_source.to_string());
        if self.fail {
            anyhow::bail!("retriever offline");
        }
        Ok(vec![RetrievedPassage {
            text: "林风曾在山中修炼。".to_string(),
            source: "0000_archive.txt".to_string(),
            distance: 0.25,
        }])
    }

    fn indexed_sources(&self) -> anyhow::Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn index(&self, _source: &str, _passages: &[Passage]) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    store: ChapterStore,
    glossary_path: PathBuf,
}

fn fixture(chapters: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("chapters_original");
    std::fs::create_dir_all(&src).expect("mkdir");
    for (name, body) in chapters {
        std::fs::write(src.join(name), body).expect("write chapter");
    }
    let store = ChapterStore::new(src, dir.path().join("chapters_translated"), "_ru");
    let glossary_path = dir.path().join("glossary.json");
    Fixture {
        _dir: dir,
        store,
        glossary_path,
    }
}

fn three_chapters() -> Fixture {
    fixture(&[
        ("0001_a.txt", "林风走进了城门。"),
        ("0002_b.txt", "林风见到了师父。"),
        ("0003_c.txt", "林风离开了山谷。"),
    ])
}

fn run(
    fx: &Fixture,
    llm: &FakeLlm,
    retriever: Option<&dyn ContextRetriever>,
    pause: &RecordingPause,
    configure: impl FnOnce(&mut TranslatorSettings),
) -> (RunReport, Vec<String>) {
    let mut settings = TranslatorSettings::new(fx.glossary_path.clone());
    configure(&mut settings);
    let estimator = CharRatioEstimator;
    let services = Services {
        llm,
        retriever,
        estimator: &estimator,
        pause,
    };
    let mut translator = ChapterTranslator::new(settings, PromptSet::default(), services);
    let report = translator.run(&fx.store).expect("run");
    let window = translator
        .window()
        .ids()
        .into_iter()
        .map(str::to_string)
        .collect();
    (report, window)
}

fn target(fx: &Fixture, name: &str) -> PathBuf {
    fx.store.target_dir().join(name)
}

#[test]
fn three_chapters_translate_in_order() {
    let fx = three_chapters();
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt", "0002_b.txt", "0003_c.txt"]);
    assert!(!report.needs_attention());
    assert_eq!(llm.call_count(), 6);
    for (src, dst) in [
        ("0001_a.txt", "0001_a_ru.txt"),
        ("0002_b.txt", "0002_b_ru.txt"),
        ("0003_c.txt", "0003_c_ru.txt"),
    ] {
        let written = std::fs::read_to_string(target(&fx, dst)).expect("target");
        assert_eq!(written, final_text(src));
    }
    assert_eq!(window, ["0001_a.txt", "0002_b.txt", "0003_c.txt"]);

    let glossary = Glossary::load(&fx.glossary_path);
    assert_eq!(glossary.get("林风"), Some("Линь Фэн"));
    assert_eq!(report.glossary_entries, 1);
    assert_eq!(report.glossary_added, 1);

    // Chapter 1 mined the term, so chapter 1's own final pass already enforces it.
    assert!(llm.prompt("0001_a.txt", 2).contains("林风: Линь Фэн"));
    let third = llm.prompt("0003_c.txt", 1);
    assert!(third.contains("full N-1: 0002_b.txt"));
    assert!(third.contains("林风见到了师父。"));
    assert!(third.contains("end of N-2: 0001_a.txt"));

    // One inter-request delay per chapter, no backoff.
    assert_eq!(pause.pauses(), vec![Duration::from_millis(1500); 3]);
}

#[test]
fn blocked_chapter_is_fatal_and_the_run_continues() {
    let fx = three_chapters();
    let llm = FakeLlm::new(|ch, pass, _| {
        if ch == "0002_b.txt" {
            Err(CallError::Blocked("SAFETY".to_string()))
        } else {
            Ok(good_reply(ch, pass))
        }
    });
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(llm.calls_for("0002_b.txt"), 1);
    assert_eq!(report.call_errors.len(), 1);
    assert_eq!(report.call_errors[0].chapter, "0002_b.txt");
    assert!(!target(&fx, "0002_b_ru.txt").exists());
    assert_eq!(report.translated, ["0001_a.txt", "0003_c.txt"]);
    assert_eq!(window, ["0001_a.txt", "0003_c.txt"]);
    assert!(report.needs_attention());
}

#[test]
fn transient_failures_are_retried_with_backoff() {
    let fx = fixture(&[("0001_a.txt", "林风走进了城门。")]);
    let llm = FakeLlm::new(|ch, pass, nth| {
        if pass == 1 && nth < 2 {
            Err(CallError::RateLimited("quota".to_string()))
        } else {
            Ok(good_reply(ch, pass))
        }
    });
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt"]);
    assert_eq!(llm.call_count(), 4);
    assert_eq!(
        pause.pauses(),
        [
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_millis(1500)
        ]
    );
}

#[test]
fn exhausted_retries_abandon_the_chapter() {
    let fx = fixture(&[("0001_a.txt", "林风走进了城门。")]);
    let llm = FakeLlm::new(|_, _, _| Err(CallError::Unavailable("503".to_string())));
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |s| s.retry.max_retries = 2);

    assert_eq!(llm.call_count(), 3);
    assert_eq!(report.call_errors.len(), 1);
    assert!(report.translated.is_empty());
}

#[test]
fn rerun_is_idempotent_and_makes_no_calls() {
    let fx = three_chapters();
    let pause = RecordingPause::default();
    run(&fx, &FakeLlm::well_behaved(), None, &pause, |_| {});
    let before: Vec<Vec<u8>> = ["0001_a_ru.txt", "0002_b_ru.txt", "0003_c_ru.txt"]
        .iter()
        .map(|n| std::fs::read(target(&fx, n)).expect("read"))
        .collect();

    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(llm.call_count(), 0);
    assert!(pause.pauses().is_empty());
    assert_eq!(report.skipped_existing.len(), 3);
    assert!(report.translated.is_empty());
    let after: Vec<Vec<u8>> = ["0001_a_ru.txt", "0002_b_ru.txt", "0003_c_ru.txt"]
        .iter()
        .map(|n| std::fs::read(target(&fx, n)).expect("read"))
        .collect();
    assert_eq!(before, after);
    // Skipped chapters still feed the recent-context window.
    assert_eq!(window, ["0001_a.txt", "0002_b.txt", "0003_c.txt"]);
}

#[test]
fn window_keeps_the_four_most_recent_chapters() {
    let names: Vec<String> = (1..=6).map(|i| format!("{i:04}_ch.txt")).collect();
    let chapters: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "林风继续前行。")).collect();
    let fx = fixture(&chapters);
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &FakeLlm::well_behaved(), None, &pause, |_| {});

    assert_eq!(report.translated.len(), 6);
    assert_eq!(window, names[2..].to_vec());
}

#[test]
fn defective_output_is_retried_once_then_skipped() {
    let fx = three_chapters();
    let llm = FakeLlm::new(|ch, pass, _| {
        if ch == "0001_a.txt" && pass == 2 {
            Ok("林风走进了城门。".to_string())
        } else {
            Ok(good_reply(ch, pass))
        }
    });
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(llm.calls_for("0001_a.txt"), 4);
    assert_eq!(report.defect_skipped.len(), 1);
    assert_eq!(report.defect_skipped[0].chapter, "0001_a.txt");
    assert!(!target(&fx, "0001_a_ru.txt").exists());
    assert_eq!(report.translated, ["0002_b.txt", "0003_c.txt"]);
    assert_eq!(window, ["0002_b.txt", "0003_c.txt"]);
    assert_eq!(pause.pauses()[0], Duration::from_secs(3));
}

#[test]
fn defect_on_first_attempt_can_recover() {
    let fx = fixture(&[("0001_a.txt", "林风走进了城门。")]);
    let llm = FakeLlm::new(|ch, pass, nth| {
        if pass == 2 && nth == 0 {
            Ok(String::new())
        } else {
            Ok(good_reply(ch, pass))
        }
    });
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt"]);
    assert_eq!(llm.call_count(), 4);
}

#[test]
fn first_translation_of_a_term_wins() {
    let fx = fixture(&[
        ("0001_a.txt", "林风走进了城门。"),
        ("0002_b.txt", "林风见到了师父。"),
    ]);
    let llm = FakeLlm::new(|ch, pass, _| {
        if ch == "0002_b.txt" && pass == 1 {
            Ok("[TRANSLATION_START]\nЧерновик\n[TRANSLATION_END]\n[GLOSSARY_CANDIDATES_START]\n林风: Лин Фен\n城门: Lin\n[GLOSSARY_CANDIDATES_END]".to_string())
        } else {
            Ok(good_reply(ch, pass))
        }
    });
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |_| {});

    let glossary = Glossary::load(&fx.glossary_path);
    assert_eq!(glossary.get("林风"), Some("Линь Фэн"));
    assert_eq!(glossary.get("城门"), Some("Lin"));
    assert_eq!(report.glossary_conflicts, 1);
    assert_eq!(report.glossary_added, 2);
}

#[test]
fn retrieval_runs_once_per_chapter_and_feeds_both_passes() {
    let fx = fixture(&[("0001_a.txt", "林风走进了城门。")]);
    let llm = FakeLlm::well_behaved();
    let retriever = FakeRetriever::new(false);
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, Some(&retriever), &pause, |_| {});

    assert_eq!(report.translated.len(), 1);
    assert_eq!(*retriever.queries.lock().expect("lock"), ["0001_a.txt"]);
    for pass in [1, 2] {
        let prompt = llm.prompt("0001_a.txt", pass);
        assert!(prompt.contains("### Context from 0000_archive.txt (similarity: 0.75):"));
    }
}

#[test]
fn retrieval_outage_degrades_to_no_context() {
    let fx = fixture(&[("0001_a.txt", "林风走进了城门。")]);
    let llm = FakeLlm::well_behaved();
    let retriever = FakeRetriever::new(true);
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, Some(&retriever), &pause, |_| {});

    assert_eq!(report.translated.len(), 1);
    assert!(!llm.prompt("0001_a.txt", 1).contains("### Context from"));
}

#[test]
fn empty_sources_are_skipped_without_calls() {
    let fx = fixture(&[("0001_a.txt", "  \n\n "), ("0002_b.txt", "林风见到了师父。")]);
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.skipped_empty, ["0001_a.txt"]);
    assert_eq!(llm.calls_for("0001_a.txt"), 0);
    assert_eq!(report.translated, ["0002_b.txt"]);
}

#[test]
fn chapter_limit_leaves_the_rest_for_later() {
    let fx = three_chapters();
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |s| s.max_chapters = Some(1));

    assert_eq!(report.translated, ["0001_a.txt"]);
    assert_eq!(report.not_attempted, ["0002_b.txt", "0003_c.txt"]);
    assert_eq!(llm.call_count(), 2);
}

#[test]
fn tight_budget_drops_context_but_still_translates() {
    let fx = three_chapters();
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |s| {
        s.max_prompt_tokens = 2010;
        s.pass1_margin = 2000;
        s.pass2_margin = 2000;
    });

    assert_eq!(report.translated.len(), 3);
    assert!(!llm.prompt("0003_c.txt", 1).contains("Recent context"));
}

#[test]
fn unreadable_source_is_recorded_and_the_run_continues() {
    let fx = three_chapters();
    let vanishing = fx.store.source_dir().join("0002_b.txt");
    let llm = FakeLlm::new(move |ch, pass, _| {
        if ch == "0001_a.txt" && pass == 2 {
            std::fs::remove_file(&vanishing).expect("remove chapter");
        }
        Ok(good_reply(ch, pass))
    });
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt", "0003_c.txt"]);
    assert_eq!(report.unreadable.len(), 1);
    assert_eq!(report.unreadable[0].chapter, "0002_b.txt");
    assert!(report.needs_attention());
    assert_eq!(llm.calls_for("0002_b.txt"), 0);
    assert_eq!(window, ["0001_a.txt", "0003_c.txt"]);
    assert_eq!(pause.pauses(), [Duration::from_millis(1500); 2]);
}

#[test]
fn failed_translation_write_is_not_used_as_context() {
    let fx = three_chapters();
    std::fs::create_dir_all(target(&fx, "0002_b_ru.txt.part")).expect("block staging file");
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, window) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt", "0003_c.txt"]);
    assert_eq!(report.write_failures.len(), 1);
    assert_eq!(report.write_failures[0].chapter, "0002_b.txt");
    assert!(!target(&fx, "0002_b_ru.txt").exists());
    assert_eq!(window, ["0001_a.txt", "0003_c.txt"]);

    let third = llm.prompt("0003_c.txt", 1);
    assert!(third.contains("full N-1: 0001_a.txt"));
    assert!(!third.contains("0002_b.txt"));

    // The next run picks the chapter up again.
    std::fs::remove_dir(target(&fx, "0002_b_ru.txt.part")).expect("unblock");
    let (again, _) = run(&fx, &llm, None, &pause, |_| {});
    assert_eq!(again.translated, ["0002_b.txt"]);
    assert_eq!(
        std::fs::read_to_string(target(&fx, "0002_b_ru.txt")).expect("target"),
        final_text("0002_b.txt")
    );
}

#[test]
fn unsaved_glossary_stays_in_use_for_later_chapters() {
    let mut fx = three_chapters();
    let blocker = fx.store.source_dir().with_file_name("not_a_dir");
    std::fs::write(&blocker, "x").expect("write blocker");
    fx.glossary_path = blocker.join("glossary.json");
    let llm = FakeLlm::well_behaved();
    let pause = RecordingPause::default();
    let (report, _) = run(&fx, &llm, None, &pause, |_| {});

    assert_eq!(report.translated, ["0001_a.txt", "0002_b.txt", "0003_c.txt"]);
    assert_eq!(report.glossary_entries, 1);
    assert!(!fx.glossary_path.exists());
    assert!(llm.prompt("0001_a.txt", 2).contains("林风: Линь Фэн"));
    assert!(llm.prompt("0003_c.txt", 1).contains("林风: Линь Фэн"));
}
