use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rpctrace::analysis::{Analysis, Analyzer};
use rpctrace::cli::{Cli, OutputFormat};
use rpctrace::config::AnalyzerConfig;
use rpctrace::csv_output::CsvTallyOutput;
use rpctrace::filter::RecordFilter;
use rpctrace::json_output::JsonOutput;
use rpctrace::log_stream::LogStream;
use rpctrace::text_output;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Defaults, then the config file, then the environment, then flags
fn load_config(args: &Cli) -> Result<AnalyzerConfig> {
    let mut config = match &args.config {
        Some(path) => AnalyzerConfig::from_file(path)?,
        None => AnalyzerConfig::default(),
    }
    .with_env()?;

    if args.verbose {
        config.verbose_state_transitions = true;
    }
    if args.quiet_log {
        config.verbose_log = false;
    }
    if args.pid_index.is_some() {
        config.pid_index = args.pid_index;
    }
    config.validate()?;
    Ok(config)
}

/// Print records matching a filter expression
fn dump_records<W: Write>(out: &mut W, stream: &LogStream, expr: &str) -> Result<()> {
    let filter = RecordFilter::from_expr(expr)?;
    for record in stream.iter(filter)? {
        writeln!(out, "{}", record.render(false))?;
    }
    Ok(())
}

fn write_report<W: Write>(
    out: &mut W,
    format: OutputFormat,
    stream: &LogStream,
    analysis: &Analysis,
    verbose: bool,
) -> Result<()> {
    match format {
        OutputFormat::Text => text_output::write_analysis(out, analysis, verbose)?,
        OutputFormat::Json => {
            let json = JsonOutput::new(analysis)
                .with_records(stream.len(), stream.pids())
                .to_json()?;
            writeln!(out, "{}", json)?;
        }
        OutputFormat::Csv => {
            let Some(rpc) = &analysis.rpc else {
                bail!("CSV output requires the RPC report (--report rpc or all)");
            };
            let csv = CsvTallyOutput::new(rpc);
            write!(out, "{}", csv.to_csv())?;
            if verbose {
                write!(out, "\n{}", csv.findings_csv())?;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let stream = LogStream::load(&args.logfile)
        .with_context(|| format!("Failed to load {}", args.logfile.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.list_pids {
        for pid in stream.pids() {
            writeln!(out, "{}", pid)?;
        }
        return Ok(());
    }

    if let Some(expr) = &args.filter {
        return dump_records(&mut out, &stream, expr);
    }

    let verbose = config.verbose_state_transitions;
    let analysis = Analyzer::new(&stream, config)
        .run(args.report.sections(), args.descriptor.as_deref())?;
    write_report(&mut out, args.format, &stream, &analysis, verbose)?;
    out.flush()?;

    if args.strict && analysis.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
