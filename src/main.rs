// SMS Ledger CLI - batch driver
// Reads SMS messages from a CSV file, runs the extraction pipeline, and
// writes canonical records as JSON lines (or into a SQLite store).

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use sms_ledger::{
    file_modified_time, AccountRegistry, BankRecognizer, Categorizer, PromoClassifier,
    RawMessage, SchemaNormalizer, SmsPipeline, TemplateEngine, TemplateLibrary,
    TransactionRecord, TransactionState, TransactionStore,
};

struct Args {
    input: PathBuf,
    templates: Option<PathBuf>,
    accounts: Option<PathBuf>,
    rules: Option<PathBuf>,
    keywords: Option<PathBuf>,
    banks: Option<PathBuf>,
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let pipeline = build_pipeline(&args)?;
    let messages = load_messages(&args.input)?;
    eprintln!("✓ Loaded {} messages from {}", messages.len(), args.input.display());

    let records = pipeline.process_batch(&messages);

    match &args.db {
        Some(db_path) => {
            let store = TransactionStore::open(db_path)?;
            let inserted = store.insert_batch(&records)?;
            println!("✓ Inserted {} new records into {}", inserted, db_path.display());
            println!("✓ Store now contains {} records", store.count()?);
        }
        None => {
            use std::io::Write;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for record in &records {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
        }
    }

    print_summary(&records);
    Ok(())
}

fn parse_args() -> Result<Args> {
    let mut input = None;
    let mut templates = None;
    let mut accounts = None;
    let mut rules = None;
    let mut keywords = None;
    let mut banks = None;
    let mut db = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--templates" => templates = Some(expect_value(&mut iter, "--templates")?),
            "--accounts" => accounts = Some(expect_value(&mut iter, "--accounts")?),
            "--rules" => rules = Some(expect_value(&mut iter, "--rules")?),
            "--keywords" => keywords = Some(expect_value(&mut iter, "--keywords")?),
            "--banks" => banks = Some(expect_value(&mut iter, "--banks")?),
            "--db" => db = Some(expect_value(&mut iter, "--db")?),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option: {}", other),
            other => {
                if input.is_some() {
                    bail!("only one input file is supported");
                }
                input = Some(PathBuf::from(other));
            }
        }
    }

    let input = match input {
        Some(path) => path,
        None => {
            print_usage();
            bail!("missing input CSV file");
        }
    };

    Ok(Args {
        input,
        templates,
        accounts,
        rules,
        keywords,
        banks,
        db,
    })
}

fn expect_value(iter: &mut impl Iterator<Item = String>, option: &str) -> Result<PathBuf> {
    match iter.next() {
        Some(value) => Ok(PathBuf::from(value)),
        None => bail!("{} requires a file path", option),
    }
}

fn print_usage() {
    eprintln!("Usage: sms-ledger [OPTIONS] <messages.csv>");
    eprintln!();
    eprintln!("CSV columns: text (required), bank_id (optional)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --templates <file>  bank template config (JSON); default: built-in set");
    eprintln!("  --accounts <file>   account metadata config (JSON)");
    eprintln!("  --rules <file>      category rules (JSON); enables categorization");
    eprintln!("  --keywords <file>   promotional keywords (JSON)");
    eprintln!("  --banks <file>      bank patterns (JSON); enables bank recognition");
    eprintln!("  --db <file>         insert records into a SQLite store instead of stdout");
}

fn build_pipeline(args: &Args) -> Result<SmsPipeline> {
    let library = match &args.templates {
        Some(path) => TemplateLibrary::from_file(path)?,
        None => TemplateLibrary::builtin(),
    };
    let engine = TemplateEngine::new(library);

    let promo = match &args.keywords {
        Some(path) => PromoClassifier::from_file(path),
        None => PromoClassifier::new(),
    };

    let accounts = match &args.accounts {
        Some(path) => AccountRegistry::from_file(path)?,
        None => AccountRegistry::empty(),
    };
    let normalizer = SchemaNormalizer::new(std::sync::Arc::new(accounts));

    let mut pipeline = SmsPipeline::new(engine, promo, normalizer);

    if let Some(path) = &args.rules {
        pipeline = pipeline.with_categorizer(Categorizer::from_file(path)?);
    }
    if let Some(path) = &args.banks {
        pipeline = pipeline.with_bank_recognizer(BankRecognizer::from_file(path)?);
    }

    Ok(pipeline)
}

fn load_messages(path: &Path) -> Result<Vec<RawMessage>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open messages file: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let text_idx = headers
        .iter()
        .position(|h| h == "text")
        .context("messages CSV must have a 'text' column")?;
    let bank_idx = headers.iter().position(|h| h == "bank_id");

    let file_modified_at = file_modified_time(path);
    let mut messages = Vec::new();

    for row in reader.records() {
        let row = row?;
        let text = row.get(text_idx).unwrap_or("").to_string();
        let bank_id = bank_idx
            .and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        messages.push(RawMessage {
            text,
            bank_id,
            ingested_at: None,
            file_modified_at,
        });
    }

    Ok(messages)
}

fn print_summary(records: &[TransactionRecord]) {
    let monetary = records
        .iter()
        .filter(|r| r.transaction_state == TransactionState::Monetary)
        .count();
    let skipped = records
        .iter()
        .filter(|r| {
            matches!(
                r.transaction_state,
                TransactionState::Promo | TransactionState::Otp
            )
        })
        .count();

    eprintln!(
        "✓ Processed {} messages: {} monetary, {} promo/otp, {} other",
        records.len(),
        monetary,
        skipped,
        records.len() - monetary - skipped
    );
}
