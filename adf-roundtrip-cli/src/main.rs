use adf_roundtrip::{
    BackupStore, BackupTimestamp, ChangeRecord, Document, DocumentMetadata, EditOutcome,
    EditSession, FsBackupStore, FsDocumentStore, MacroMode, MatchWarning, RoundtripConfig,
    SessionError, SessionOptions, apply_changes, detect_changes, detect_macros_with_content,
    extract_text_nodes, render, rollback_document, validate,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

const EXIT_ROLLED_BACK: i32 = 3;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding pre-edit backups
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    /// Backups kept per document
    #[arg(long, global = true)]
    retention: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Checks that a document is well-formed ADF
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Lists the editable text nodes with their paths
    Extract {
        file: PathBuf,
        #[arg(long)]
        include_macro_bodies: bool,
        #[arg(long)]
        json: bool,
    },
    /// Prints the editable text of a document
    Render {
        file: PathBuf,
        #[arg(long)]
        include_macro_bodies: bool,
    },
    /// Lists macros whose bodies contain text
    Macros {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Shows the changes an edited rendering would make
    Diff {
        file: PathBuf,
        edited: PathBuf,
        #[arg(long)]
        include_macro_bodies: bool,
        #[arg(long)]
        json: bool,
    },
    /// Applies a JSON list of change records to a document
    Patch {
        file: PathBuf,
        changes: PathBuf,
        #[arg(long)]
        include_macro_bodies: bool,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Runs a full edit session against a page store
    Edit {
        #[arg(long)]
        store: PathBuf,
        document_id: String,
        edited: PathBuf,
        #[arg(long)]
        include_macro_bodies: bool,
        #[arg(long)]
        json: bool,
    },
    /// Lists the backups kept for a document
    Backups {
        document_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Restores a document from a backup (latest by default)
    Rollback {
        #[arg(long)]
        store: PathBuf,
        document_id: String,
        #[arg(long)]
        timestamp: Option<BackupTimestamp>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match RoundtripConfig::from_env() {
        Ok(config) => config,
        Err(err) => fail(err),
    };
    if let Some(dir) = cli.backup_dir {
        config.backup_dir = dir;
    }
    if let Some(retention) = cli.retention {
        if retention == 0 {
            fail("--retention must be at least 1");
        }
        config.retention_limit = retention;
    }

    match cli.command {
        Commands::Validate { file, json } => validate_command(&config, &file, json),
        Commands::Extract {
            file,
            include_macro_bodies,
            json,
        } => extract_command(&config, &file, mode(&config, include_macro_bodies), json),
        Commands::Render {
            file,
            include_macro_bodies,
        } => render_command(&config, &file, mode(&config, include_macro_bodies)),
        Commands::Macros { file, json } => macros_command(&config, &file, json),
        Commands::Diff {
            file,
            edited,
            include_macro_bodies,
            json,
        } => diff_command(
            &config,
            &file,
            &edited,
            mode(&config, include_macro_bodies),
            json,
        ),
        Commands::Patch {
            file,
            changes,
            include_macro_bodies,
            output,
        } => patch_command(
            &config,
            &file,
            &changes,
            mode(&config, include_macro_bodies),
            output.as_deref(),
        ),
        Commands::Edit {
            store,
            document_id,
            edited,
            include_macro_bodies,
            json,
        } => edit_command(
            &config,
            &store,
            &document_id,
            &edited,
            include_macro_bodies,
            json,
        ),
        Commands::Backups { document_id, json } => backups_command(&config, &document_id, json),
        Commands::Rollback {
            store,
            document_id,
            timestamp,
        } => rollback_command(&config, &store, &document_id, timestamp),
    }
}

fn fail(err: impl Display) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(1);
}

fn mode(config: &RoundtripConfig, include_macro_bodies: bool) -> MacroMode {
    if include_macro_bodies {
        MacroMode::IncludeBodies
    } else {
        config.macro_mode()
    }
}

/// Reads a bare ADF document or a page envelope carrying one under `body`.
fn load_document(path: &Path) -> Document {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => fail(format!("{}: {err}", path.display())),
    };
    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => fail(format!("{}: {err}", path.display())),
    };
    let value = match value {
        Value::Object(mut map) if !map.contains_key("type") && map.contains_key("body") => {
            map.remove("body").unwrap_or(Value::Null)
        }
        other => other,
    };
    match Document::from_value(value) {
        Ok(doc) => doc,
        Err(err) => fail(format!("{}: {err}", path.display())),
    }
}

fn read_text(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => fail(format!("{}: {err}", path.display())),
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => fail(err),
    }
}

fn describe_warning(warning: &MatchWarning) -> String {
    match warning {
        MatchWarning::AmbiguousMatch {
            text, best_score, ..
        } => format!(
            "no confident match for {text:?} (best overlap {:.0}%), left unchanged",
            best_score.as_ratio() * 100.0
        ),
        MatchWarning::UnplacedText { text } => {
            format!("edited text {text:?} has no original to replace, ignored")
        }
        MatchWarning::SpansMultipleNodes { old_text, .. } => {
            format!("edit to {old_text:?} crosses formatting boundaries, left unchanged")
        }
    }
}

fn validate_command(config: &RoundtripConfig, file: &Path, json: bool) {
    let doc = load_document(file);
    let issues = validate(&doc, &config.denylist);
    if json {
        let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
        print_json(&serde_json::json!({
            "valid": issues.is_empty(),
            "issues": messages,
        }));
    } else if issues.is_empty() {
        println!("Document is valid.");
    } else {
        for issue in &issues {
            println!("{issue}");
        }
    }
    if !issues.is_empty() {
        std::process::exit(1);
    }
}

fn extract_command(config: &RoundtripConfig, file: &Path, mode: MacroMode, json: bool) {
    let doc = load_document(file);
    let nodes = extract_text_nodes(&doc, &config.denylist, mode);
    if json {
        print_json(&nodes);
    } else {
        for node in nodes {
            println!("{}\t{}", node.path, node.text);
        }
    }
}

fn render_command(config: &RoundtripConfig, file: &Path, mode: MacroMode) {
    let doc = load_document(file);
    print!("{}", render(&doc, &config.denylist, mode).text);
}

fn macros_command(config: &RoundtripConfig, file: &Path, json: bool) {
    let doc = load_document(file);
    let macros = detect_macros_with_content(&doc, &config.denylist);
    if json {
        print_json(&macros);
    } else if macros.is_empty() {
        println!("No macros with editable content.");
    } else {
        for info in macros {
            println!(
                "{} ({}) at {}: {} text node(s): {}",
                info.label, info.node_type, info.path, info.text_count, info.preview
            );
        }
    }
}

fn diff_command(config: &RoundtripConfig, file: &Path, edited: &Path, mode: MacroMode, json: bool) {
    let doc = load_document(file);
    let edited = read_text(edited);
    let rendering = render(&doc, &config.denylist, mode);
    let found = detect_changes(&rendering.fragments, &edited, &config.matching);

    if json {
        print_json(&found);
        return;
    }
    for warning in &found.warnings {
        eprintln!("warning: {}", describe_warning(warning));
    }
    if found.is_empty() {
        println!("No changes.");
    }
    for change in &found.changes {
        println!("{}: {:?} -> {:?}", change.path, change.old_text, change.new_text);
    }
}

fn patch_command(
    config: &RoundtripConfig,
    file: &Path,
    changes: &Path,
    mode: MacroMode,
    output: Option<&Path>,
) {
    let doc = load_document(file);
    let records: Vec<ChangeRecord> = match serde_json::from_str(&read_text(changes)) {
        Ok(records) => records,
        Err(err) => fail(format!("{}: {err}", changes.display())),
    };
    let patched = match apply_changes(&doc, &records, &config.denylist, mode) {
        Ok(patched) => patched,
        Err(err) => fail(err),
    };
    let text = match patched.to_json_pretty() {
        Ok(text) => text,
        Err(err) => fail(err),
    };
    match output {
        Some(path) => {
            if let Err(err) = fs::write(path, format!("{text}\n")) {
                fail(format!("{}: {err}", path.display()));
            }
            println!("Applied {} change(s) to {}", records.len(), path.display());
        }
        None => println!("{text}"),
    }
}

fn edit_command(
    config: &RoundtripConfig,
    store_dir: &Path,
    document_id: &str,
    edited: &Path,
    include_macro_bodies: bool,
    json: bool,
) {
    let edited = read_text(edited);
    let store = match FsDocumentStore::open(store_dir) {
        Ok(store) => store,
        Err(err) => fail(err),
    };
    let backups = match FsBackupStore::open(&config.backup_dir) {
        Ok(backups) => backups,
        Err(err) => fail(err),
    };

    let session = EditSession::new(&store, &backups, config);
    let options = SessionOptions {
        include_macro_bodies,
    };
    let prepared = match session.begin(document_id, options) {
        Ok(prepared) => prepared,
        Err(err) => fail(err),
    };
    if prepared.mode() == MacroMode::Safe {
        for info in prepared.macros() {
            eprintln!(
                "note: {} macro at {} is protected ({} text node(s) not editable)",
                info.label, info.path, info.text_count
            );
        }
    }

    let report = match prepared.apply(&edited) {
        Ok(report) => report,
        Err(err @ SessionError::WriteFailed { .. }) => {
            eprintln!("Error: {err}");
            std::process::exit(EXIT_ROLLED_BACK);
        }
        Err(err) => fail(err),
    };

    if json {
        print_json(&report);
        return;
    }
    for warning in &report.warnings {
        eprintln!("warning: {}", describe_warning(warning));
    }
    match report.outcome {
        EditOutcome::NoChanges => println!("No changes."),
        EditOutcome::Written { new_version } => println!(
            "Wrote {} change(s) to {document_id} (version {new_version}, backup {})",
            report.changes.len(),
            report.backup
        ),
    }
}

#[derive(Serialize)]
struct BackupSummary {
    timestamp: BackupTimestamp,
    version: u64,
    #[serde(flatten)]
    metadata: DocumentMetadata,
}

fn backups_command(config: &RoundtripConfig, document_id: &str, json: bool) {
    let backups = match FsBackupStore::open(&config.backup_dir) {
        Ok(backups) => backups,
        Err(err) => fail(err),
    };
    let timestamps = match backups.list(document_id) {
        Ok(timestamps) => timestamps,
        Err(err) => fail(err),
    };
    let mut summaries = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        match backups.load(document_id, timestamp) {
            Ok(record) => summaries.push(BackupSummary {
                timestamp,
                version: record.version,
                metadata: record.metadata,
            }),
            Err(err) => fail(err),
        }
    }

    if json {
        print_json(&serde_json::json!({
            "document_id": document_id,
            "backups": summaries,
        }));
    } else if summaries.is_empty() {
        println!("No backups for {document_id}.");
    } else {
        for summary in summaries {
            println!(
                "{}  version {}  {}",
                summary.timestamp, summary.version, summary.metadata.title
            );
        }
    }
}

fn rollback_command(
    config: &RoundtripConfig,
    store_dir: &Path,
    document_id: &str,
    timestamp: Option<BackupTimestamp>,
) {
    let store = match FsDocumentStore::open(store_dir) {
        Ok(store) => store,
        Err(err) => fail(err),
    };
    let backups = match FsBackupStore::open(&config.backup_dir) {
        Ok(backups) => backups,
        Err(err) => fail(err),
    };
    match rollback_document(&store, &backups, document_id, timestamp) {
        Ok(restored) => println!(
            "Restored {document_id} from backup {} (taken at version {})",
            restored.backup, restored.version
        ),
        Err(err) => fail(err),
    }
}
