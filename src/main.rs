use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use failsift::applier::{
    ApplyOptions, ConfirmDecision, ConfirmPrompt, DocumentStore, FixApplier, FsDocumentStore,
    ShellCommandSink,
};
use failsift::classifier::{create_failure_summary, FailureClassifier};
use failsift::config::EngineConfig;
use failsift::escalation::{AssistantSuggestion, EscalationGateway, FallbackSink};
use failsift::failure::{ErrorType, FixFeedback, TestFailure, UserRating};
use failsift::fixgen::{FixCandidate, FixGenerator};
use failsift::learning::{LearningStats, LearningStore};
use failsift::parser;

#[derive(Parser)]
#[command(
    name = "failsift",
    version,
    about = "Analyze test failures, propose ranked fixes, and learn from their outcomes."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Parse a test report, classify failures, and propose ranked fixes
    Analyze(AnalyzeArgs),
    /// Record the outcome of a fix attempt into the learning store
    Record(RecordArgs),
    /// Show learning-store statistics
    Stats(StoreArgs),
    /// List reliable patterns and patterns needing more data
    Patterns(PatternsArgs),
    /// Export the learning store as JSON
    Export(ExportArgs),
    /// Import a previously exported learning store
    Import(ImportArgs),
    /// Delete all learned patterns
    Clear(StoreArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Test report file: structured JSON or free-form runner output
    input: PathBuf,

    #[arg(long, default_value = "auto", help = "Input format: auto | structured | freeform")]
    format: String,

    #[arg(long, default_value = ".", help = "Workspace root for sources and the store")]
    workspace: PathBuf,

    #[arg(long, help = "Explicit learning-store path")]
    store: Option<PathBuf>,

    #[arg(long, default_value = "unknown", help = "File attributed to freeform failures")]
    default_file: String,

    #[arg(long, default_value_t = false, help = "Apply generated fixes")]
    apply: bool,

    #[arg(long, default_value_t = false, help = "Apply without per-fix confirmation")]
    yes: bool,

    #[arg(long, default_value_t = false, help = "Build hand-off context for top failures")]
    escalate: bool,

    #[arg(long, help = "Write full report JSON to this file")]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Only print JSON report")]
    json_only: bool,
}

#[derive(Args, Debug)]
struct RecordArgs {
    #[arg(long, value_parser = parse_error_type, help = "Error type of the failure signature")]
    error_type: ErrorType,

    #[arg(long, help = "The failure's error message")]
    message: String,

    #[arg(long, help = "Description of the fix that was tried")]
    fix: String,

    #[arg(long, default_value_t = false, help = "The fix worked")]
    success: bool,

    #[arg(long, value_parser = parse_rating, help = "Rating: helpful | partially_helpful | unhelpful")]
    rating: Option<UserRating>,

    #[arg(long, help = "Free-form notes about the outcome")]
    notes: Option<String>,

    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PatternsArgs {
    #[arg(long, default_value_t = 10, help = "Max reliable patterns listed")]
    top: usize,

    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long, help = "Write export JSON here instead of stdout")]
    out: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Export JSON produced by `failsift export`
    input: PathBuf,

    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        CliCommand::Analyze(args) => run_analyze(args),
        CliCommand::Record(args) => run_record(args),
        CliCommand::Stats(args) => run_stats(args),
        CliCommand::Patterns(args) => run_patterns(args),
        CliCommand::Export(args) => run_export(args),
        CliCommand::Import(args) => run_import(args),
        CliCommand::Clear(args) => run_clear(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/* ---------- analyze ---------- */

#[derive(Serialize)]
struct FailureReport {
    failure: TestFailure,
    fixes: Vec<FixCandidate>,
}

#[derive(Serialize)]
struct AnalysisReport {
    generated_at: String,
    input: String,
    total_tests: Option<u32>,
    failed_tests: Option<u32>,
    duration_ms: Option<u64>,
    summary: String,
    failures: Vec<FailureReport>,
    escalations: Vec<AssistantSuggestion>,
    learning: LearningStats,
}

struct PrintSink;

impl FallbackSink for PrintSink {
    fn publish(&mut self, document: &str) {
        println!("--- hand-off context ---\n{document}");
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<(), Box<dyn Error>> {
    let raw = fs::read_to_string(&args.input)?;
    let config = EngineConfig::load(&args.workspace)?;

    let mut store = open_store(&args.workspace, args.store.clone());
    store.configure(&config);

    let (mut failures, totals) = match args.format.as_str() {
        "structured" => split_summary(parser::parse_structured(&raw)?),
        "freeform" => (parser::parse_freeform(&raw, &args.default_file), None),
        "auto" => {
            if raw.trim_start().starts_with('{') {
                split_summary(parser::parse_structured(&raw)?)
            } else {
                (parser::parse_freeform(&raw, &args.default_file), None)
            }
        }
        other => {
            return Err(
                format!("invalid --format '{other}'; expected auto|structured|freeform").into(),
            )
        }
    };

    let classifier = FailureClassifier::new();
    classifier.classify_all(&mut failures);
    let summary = create_failure_summary(&failures);

    let mut docs = FsDocumentStore::new(&args.workspace);
    let generator = FixGenerator::with_store(&store);
    let reports: Vec<FailureReport> = failures
        .iter()
        .map(|failure| {
            let source = docs.load(&failure.test_file).ok();
            FailureReport {
                fixes: generator.generate_fixes(failure, source.as_deref()),
                failure: failure.clone(),
            }
        })
        .collect();

    let mut applied_count = 0;
    let mut failed_count = 0;
    if args.apply {
        (applied_count, failed_count) = apply_all(&args, &reports, &mut docs, &mut store);
    }

    let escalations = if args.escalate {
        let mut gateway = EscalationGateway::new(config).with_fallback(Box::new(PrintSink));
        gateway.analyze_top_failures(&failures)
    } else {
        Vec::new()
    };

    let report = AnalysisReport {
        generated_at: Utc::now().to_rfc3339(),
        input: args.input.display().to_string(),
        total_tests: totals.map(|t| t.0),
        failed_tests: totals.map(|t| t.1),
        duration_ms: totals.map(|t| t.2),
        summary: summary.clone(),
        failures: reports,
        escalations,
        learning: store.get_learning_stats(),
    };

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = args.out.as_ref() {
        fs::write(path, &json)?;
    }

    if args.json_only {
        println!("{json}");
        return Ok(());
    }

    println!("{summary}");
    let fix_total: usize = report.failures.iter().map(|r| r.fixes.len()).sum();
    println!("proposed fixes: {fix_total}");
    if args.apply {
        println!("applied: {applied_count}  failed: {failed_count}");
    }
    if let Some(path) = args.out.as_ref() {
        println!("report written to: {}", path.display());
    }

    Ok(())
}

fn split_summary(
    summary: failsift::TestResultSummary,
) -> (Vec<TestFailure>, Option<(u32, u32, u64)>) {
    let totals = (summary.total_tests, summary.failed_tests, summary.duration_ms);
    (summary.failures, Some(totals))
}

/// Runs the applier over every generated candidate, in ranked order per
/// failure, and records each outcome back into the learning store.
fn apply_all(
    args: &AnalyzeArgs,
    reports: &[FailureReport],
    docs: &mut FsDocumentStore,
    store: &mut LearningStore,
) -> (usize, usize) {
    let mut commands = ShellCommandSink::new(&args.workspace);
    let mut prompt = StdinPrompt;
    let mut applied_count = 0;
    let mut failed_count = 0;

    for report in reports {
        if report.fixes.is_empty() {
            continue;
        }

        let outcome = FixApplier::new(docs, &mut commands).apply_fixes(
            report.fixes.clone(),
            ApplyOptions { confirm: !args.yes },
            Some(&mut prompt),
        );

        for fix in &outcome.applied {
            store.record_fix_attempt(&report.failure, &fix.title, true, None);
        }
        for failed in &outcome.failed {
            store.record_fix_attempt(&report.failure, &failed.candidate.title, false, None);
        }

        applied_count += outcome.applied.len();
        failed_count += outcome.failed.len();
    }

    (applied_count, failed_count)
}

struct StdinPrompt;

impl ConfirmPrompt for StdinPrompt {
    fn confirm(&mut self, candidate: &FixCandidate) -> ConfirmDecision {
        print!(
            "{} ({}) [{:.0}%] apply/skip/cancel? [a/s/c] ",
            candidate.title,
            candidate.target_file,
            candidate.confidence * 100.0
        );
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return ConfirmDecision::Cancel;
        }

        match line.trim().to_lowercase().as_str() {
            "a" | "apply" | "y" | "yes" => ConfirmDecision::Apply,
            "s" | "skip" | "n" | "no" => ConfirmDecision::Skip,
            _ => ConfirmDecision::Cancel,
        }
    }
}

/* ---------- learning subcommands ---------- */

fn run_record(args: RecordArgs) -> Result<(), Box<dyn Error>> {
    let mut store = open_store(&args.workspace, args.store.clone());

    let mut failure = TestFailure::new("recorded", "unknown", &args.message);
    failure.error_type = args.error_type;

    let feedback = FixFeedback {
        user_rating: args.rating,
        notes: args.notes.clone(),
    };
    store.record_fix_attempt(&failure, &args.fix, args.success, Some(&feedback));

    let stats = store.get_learning_stats();
    println!(
        "recorded {} attempt for '{}' ({} pattern(s), {} attempt(s) total)",
        if args.success { "successful" } else { "failed" },
        args.error_type.as_str(),
        stats.total_patterns,
        stats.total_attempts
    );
    Ok(())
}

fn run_stats(args: StoreArgs) -> Result<(), Box<dyn Error>> {
    let store = open_store(&args.workspace, args.store);
    let stats = store.get_learning_stats();

    println!("store: {}", store.path().display());
    println!("patterns: {}", stats.total_patterns);
    println!("reliable: {}", stats.reliable_patterns);
    println!("attempts: {}", stats.total_attempts);
    println!("average success rate: {:.2}", stats.average_success_rate);
    Ok(())
}

fn run_patterns(args: PatternsArgs) -> Result<(), Box<dyn Error>> {
    let store = open_store(&args.workspace, args.store);

    println!("most reliable:");
    for pattern in store.get_most_reliable_patterns(args.top) {
        println!(
            "  [{:.2} over {:>3}] {}: {}",
            pattern.success_rate,
            pattern.total_attempts,
            pattern.error_type.as_str(),
            pattern.error_pattern
        );
    }

    println!("needing data:");
    for pattern in store.get_patterns_needing_data() {
        println!(
            "  [{} attempt(s)] {}: {}",
            pattern.total_attempts,
            pattern.error_type.as_str(),
            pattern.error_pattern
        );
    }
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<(), Box<dyn Error>> {
    let store = open_store(&args.workspace, args.store);
    let json = store.export_learning_data()?;

    match args.out {
        Some(path) => {
            fs::write(&path, &json)?;
            println!("exported to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<(), Box<dyn Error>> {
    let raw = fs::read_to_string(&args.input)?;
    let mut store = open_store(&args.workspace, args.store);
    let count = store.import_learning_data(&raw)?;
    println!("imported {count} pattern(s)");
    Ok(())
}

fn run_clear(args: StoreArgs) -> Result<(), Box<dyn Error>> {
    let mut store = open_store(&args.workspace, args.store);
    let before = store.len();
    store.clear_learning_data();
    println!("cleared {before} pattern(s)");
    Ok(())
}

/* ---------- helpers ---------- */

fn open_store(workspace: &PathBuf, explicit: Option<PathBuf>) -> LearningStore {
    match explicit {
        Some(path) => LearningStore::open(path),
        None => LearningStore::open_workspace(workspace),
    }
}

fn parse_error_type(s: &str) -> Result<ErrorType, String> {
    match s {
        "assertion_mismatch" => Ok(ErrorType::AssertionMismatch),
        "null_reference" => Ok(ErrorType::NullReference),
        "missing_import" => Ok(ErrorType::MissingImport),
        "test_timeout" => Ok(ErrorType::TestTimeout),
        "mock_assertion" => Ok(ErrorType::MockAssertion),
        "type_error" => Ok(ErrorType::TypeError),
        "unknown" => Ok(ErrorType::Unknown),
        other => Err(format!("unknown error type '{other}'")),
    }
}

fn parse_rating(s: &str) -> Result<UserRating, String> {
    match s {
        "helpful" => Ok(UserRating::Helpful),
        "partially_helpful" => Ok(UserRating::PartiallyHelpful),
        "unhelpful" => Ok(UserRating::Unhelpful),
        other => Err(format!("unknown rating '{other}'")),
    }
}
