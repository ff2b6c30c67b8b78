use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use novel_translator::assembly::{run_assembly, TitleTranslator};
use novel_translator::chapters::prune::{delete_files, find_defective_translations, find_empty_chapters};
use novel_translator::chapters::split::{split_novel, SplitOptions};
use novel_translator::chapters::ChapterStore;
use novel_translator::models::{build_client, ThreadPause};
use novel_translator::pipeline::trace::TraceWriter;
use novel_translator::pipeline::{
    init_default_config, write_report, ChapterTranslator, CliOverrides, PipelineConfig, Services,
};
use novel_translator::progress::ConsoleProgress;
use novel_translator::retrieval::{index_missing_chapters, ContextRetriever, HttpRetriever};
use novel_translator::tokens::{select_estimator, TokenEstimator};

#[derive(Parser, Debug)]
#[command(name = "novel-translator")]
#[command(about = "Chapter-by-chapter LLM translation of long web novels", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Config file path (default: search for novel-translator.toml upwards)
    #[arg(long, env = "NOVEL_TRANSLATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Input novel (default: paths.input_novel from the config)
    #[arg(value_name = "NOVEL")]
    input: Option<PathBuf>,

    /// Only split the novel into chapter files
    #[arg(long, conflicts_with_all = ["translate_only", "assemble_only"])]
    split_only: bool,

    /// Only translate already split chapters
    #[arg(long, conflicts_with = "assemble_only")]
    translate_only: bool,

    /// Only translate titles and write titled chapters + book.json
    #[arg(long)]
    assemble_only: bool,

    /// Do not query or update the similarity retrieval service
    #[arg(long)]
    no_retrieval: bool,

    /// Translate at most N chapters in this run (dev-only)
    #[arg(long)]
    max_chapters: Option<usize>,

    /// List whitespace-only source chapters, then exit
    #[arg(long)]
    list_empty: bool,

    /// Delete whitespace-only source chapters (dry run unless --apply), then exit
    #[arg(long)]
    delete_empty: bool,

    /// Find translations that fail the defect check (deleted with --apply), then exit
    #[arg(long)]
    cleanup_defects: bool,

    /// Actually delete files in --delete-empty / --cleanup-defects
    #[arg(long)]
    apply: bool,

    /// Write every prompt and raw response to the trace directory
    #[arg(long)]
    trace_prompts: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let cfg = PipelineConfig::from_paths_and_args(&CliOverrides {
        config: args.config.clone(),
        input: args.input.clone(),
        no_retrieval: args.no_retrieval,
        max_chapters: args.max_chapters,
        trace_prompts: args.trace_prompts,
    })
    .context("build config")?;
    init_logging(&cfg);
    tracing::info!("config: {}", cfg.config_path.display());
    tracing::info!("data dir: {}", cfg.data_dir.display());

    let store = ChapterStore::new(
        cfg.source_dir.clone(),
        cfg.target_dir.clone(),
        &cfg.book.target_suffix,
    );

    if args.list_empty || args.delete_empty {
        let empty = find_empty_chapters(&cfg.source_dir)?;
        for p in &empty {
            println!("{}", p.display());
        }
        progress.info(format!("{} empty chapter file(s)", empty.len()));
        if args.delete_empty {
            let n = delete_files(&empty, !args.apply);
            if args.apply {
                progress.info(format!("deleted {n} file(s)"));
            } else {
                progress.info(format!("dry run: {n} file(s) would be deleted; add --apply"));
            }
        }
        return Ok(());
    }

    if args.cleanup_defects {
        let chapters = store.list()?;
        let found = find_defective_translations(&store, &chapters, &cfg.defect_policy);
        for d in &found {
            println!(
                "{}\t{}\t{}",
                d.chapter.target_path.display(),
                d.defect.flag(),
                d.defect
            );
        }
        let paths: Vec<PathBuf> = found.iter().map(|d| d.chapter.target_path.clone()).collect();
        let n = delete_files(&paths, !args.apply);
        if args.apply {
            progress.info(format!("deleted {n} defective translation(s)"));
        } else {
            progress.info(format!("{n} defective translation(s); add --apply to delete"));
        }
        return Ok(());
    }

    let only = args.split_only || args.translate_only || args.assemble_only;
    let do_split = args.split_only || !only;
    let do_translate = args.translate_only || !only;
    let do_assemble = args.assemble_only || !only;

    if do_split {
        progress.stage("Split");
        run_split(&cfg, args.split_only, &progress)?;
    }
    if !(do_translate || do_assemble) {
        return Ok(());
    }

    let estimator = select_estimator(cfg.tokenizer);
    if do_translate {
        progress.stage("Translate");
        run_translate(&cfg, &store, estimator.as_ref(), &progress)?;
    }
    if do_assemble {
        progress.stage("Assemble");
        run_assemble(&cfg, &store, estimator.as_ref(), &progress)?;
    }
    Ok(())
}

fn init_logging(cfg: &PipelineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = cfg
        .log_file
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&cfg.log_file)
        })
        .map_err(|err| eprintln!("log file {} unavailable: {err}", cfg.log_file.display()))
        .ok()
        .map(|f| fmt::layer().with_ansi(false).with_writer(Mutex::new(f)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn run_split(cfg: &PipelineConfig, required: bool, progress: &ConsoleProgress) -> anyhow::Result<()> {
    if !cfg.input_novel.exists() {
        if required {
            return Err(anyhow!("input novel not found: {}", cfg.input_novel.display()));
        }
        tracing::warn!(
            "input novel {} not found; using existing chapters in {}",
            cfg.input_novel.display(),
            cfg.source_dir.display()
        );
        return Ok(());
    }
    let opts = SplitOptions::new(&cfg.header_regex, &cfg.encoding)?;
    let report = split_novel(&cfg.input_novel, &cfg.source_dir, &opts)?;
    progress.info(format!(
        "{} chapter(s): {} written, {} kept, {} empty",
        report.chapters, report.written, report.kept_existing, report.empty
    ));
    Ok(())
}

fn run_translate(
    cfg: &PipelineConfig,
    store: &ChapterStore,
    estimator: &dyn TokenEstimator,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let llm = build_client(&cfg.llm_settings()?)?;

    let retriever = if cfg.retrieval.enabled {
        match HttpRetriever::new(&cfg.retrieval.base_url, cfg.retrieval.timeout) {
            Ok(r) => Some(r),
            Err(err) => {
                tracing::warn!("retrieval disabled: {err:#}");
                None
            }
        }
    } else {
        None
    };
    if let Some(r) = retriever.as_ref() {
        let chapters = store.list()?;
        index_missing_chapters(r, store, &chapters);
    }

    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)?;
    if cfg.trace_prompts {
        tracing::info!("tracing prompts to {}", trace.dir().display());
    }
    let services = Services {
        llm: llm.as_ref(),
        retriever: retriever.as_ref().map(|r| r as &dyn ContextRetriever),
        estimator,
        pause: &ThreadPause,
    };
    let mut translator =
        ChapterTranslator::new(cfg.translator_settings(), cfg.prompts.clone(), services)
            .with_trace(trace)
            .with_progress(ConsoleProgress::new(true));
    let report = translator.run(store)?;

    if let Err(err) = write_report(&cfg.report_path, &report) {
        tracing::error!("{err:#}");
    }
    for line in report.summary_lines() {
        progress.info(&line);
        tracing::info!("{line}");
    }
    if report.needs_attention() {
        tracing::warn!("some chapters need attention, see {}", cfg.report_path.display());
    }
    Ok(())
}

fn run_assemble(
    cfg: &PipelineConfig,
    store: &ChapterStore,
    estimator: &dyn TokenEstimator,
    progress: &ConsoleProgress,
) -> anyhow::Result<()> {
    let llm = build_client(&cfg.llm_settings()?)?;
    let titles = TitleTranslator {
        llm: llm.as_ref(),
        estimator,
        pause: &ThreadPause,
        retry: cfg.llm.retry.clone(),
        template: &cfg.prompts.titles,
        source_lang: &cfg.book.source_lang,
        target_lang: &cfg.book.target_lang,
        temperature: cfg.llm.temperature,
        max_prompt_tokens: cfg.book.title_batch_max_tokens,
    };
    let report = run_assembly(store, &titles, &cfg.book, &cfg.titled_dir, &cfg.output_dir)?;
    progress.info(format!(
        "{} title(s) translated, {} chapter(s) prepared",
        report.titles_requested, report.prepared
    ));
    if let Some(p) = report.manifest_path {
        progress.info(format!("manifest: {}", p.display()));
    }
    Ok(())
}
