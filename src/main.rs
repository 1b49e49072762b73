use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snpstream::checkpoint::{checkpoint_channel, CheckpointCoordinator, CheckpointOutcome};
use snpstream::config::{CallerConfig, PersistenceMode};
use snpstream::genomics::{
    write_vcf, BamFeed, FeedError, IndexedFastaReference, JsonLinesFeed, ReadMessage,
    ReferenceWindow,
};
use snpstream::store::{LocusSink, SharedLoci, SqliteStore, WriteBackSink, WriteThroughSink};
use snpstream::stream::{run_with_checkpoints, ConsumerStats, DecodedReads, StreamConsumer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snpstream", about = "Streaming SNV genotype-likelihood accumulation")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume aligned reads and accumulate per-locus genotype likelihoods.
    Stream {
        /// Reference genome (FASTA).
        #[arg(long)]
        reference: PathBuf,
        /// Contig the reads are aligned to.
        #[arg(long)]
        contig: String,
        /// Newline-delimited JSON read messages (`-` for stdin).
        #[arg(long, conflicts_with = "bam", required_unless_present = "bam")]
        json: Option<PathBuf>,
        /// BAM file; reads on other contigs are ignored.
        #[arg(long)]
        bam: Option<PathBuf>,
        /// Persistence mode.
        #[arg(long, value_enum, default_value_t = PersistenceMode::WriteBack)]
        mode: PersistenceMode,
        /// SQLite database receiving the loci.
        #[arg(long)]
        db: PathBuf,
        /// Reads per write-back merge.
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        /// Seconds between checkpoint runs.
        #[arg(long, default_value_t = 60)]
        checkpoint_interval: u64,
        /// Per-site heterozygosity used for genotype priors.
        #[arg(long, default_value_t = snpstream::genomics::DEFAULT_HETEROZYGOSITY)]
        heterozygosity: f64,
        /// First reference position to consider (0-based).
        #[arg(long, default_value_t = 0)]
        window_start: u64,
        /// Exclusive end of the reference window (defaults to contig end).
        #[arg(long)]
        window_stop: Option<u64>,
    },
    /// Print a VCF of the variant loci stored in a database.
    Report {
        /// SQLite database written by `stream`.
        #[arg(long)]
        db: PathBuf,
        /// Contig name for the CHROM column.
        #[arg(long)]
        contig: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Stream {
            reference,
            contig,
            json,
            bam,
            mode,
            db,
            batch_size,
            checkpoint_interval,
            heterozygosity,
            window_start,
            window_stop,
        } => {
            let config = CallerConfig::default()
                .with_mode(mode)
                .with_batch_size(batch_size)
                .with_checkpoint_interval(Duration::from_secs(checkpoint_interval))
                .with_heterozygosity(heterozygosity)
                .with_window(window_start, window_stop);
            config.validate().context("invalid configuration")?;
            let feed = open_feed(json.as_deref(), bam.as_deref(), &contig)?;
            run_stream(&config, &reference, &contig, feed, &db)?;
        }
        Commands::Report { db, contig } => run_report(&db, &contig)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

type Feed = Box<dyn Iterator<Item = Result<ReadMessage, FeedError>>>;

fn open_feed(json: Option<&Path>, bam: Option<&Path>, contig: &str) -> Result<Feed> {
    match (json, bam) {
        (Some(path), _) if path == Path::new("-") => {
            Ok(Box::new(JsonLinesFeed::new(io::stdin().lock())))
        }
        (Some(path), _) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open read feed {}", path.display()))?;
            Ok(Box::new(JsonLinesFeed::new(BufReader::new(file))))
        }
        (None, Some(path)) => {
            let feed = BamFeed::from_path(path, contig)
                .with_context(|| format!("failed to open BAM file {}", path.display()))?;
            Ok(Box::new(feed))
        }
        (None, None) => anyhow::bail!("one of --json or --bam is required"),
    }
}

fn run_stream(
    config: &CallerConfig,
    reference_path: &Path,
    contig: &str,
    feed: Feed,
    db: &Path,
) -> Result<()> {
    let fasta = IndexedFastaReference::from_path(reference_path).with_context(|| {
        format!("failed to read reference from {}", reference_path.display())
    })?;
    let window = ReferenceWindow::fetch(&fasta, contig, config.window_start, config.window_stop)
        .with_context(|| format!("failed to build reference window on {contig}"))?;
    info!(
        contig,
        start = window.start(),
        stop = window.stop(),
        mode = ?config.mode,
        "reference window loaded"
    );

    let store = SqliteStore::open(db)
        .with_context(|| format!("failed to open database {}", db.display()))?;
    let mut reads = DecodedReads::new(feed);

    match config.mode {
        PersistenceMode::WriteBack => {
            let shared = SharedLoci::new();
            let (driver, coordinator_link) = checkpoint_channel();
            let handle = CheckpointCoordinator::new(shared.clone(), store, coordinator_link)
                .spawn(config.checkpoint_interval)
                .context("failed to start checkpoint coordinator")?;

            let sink = WriteBackSink::new(shared, config.priors(), config.batch_size);
            let mut consumer = StreamConsumer::new(sink, &window)
                .with_checkpoint_link(driver)
                .with_log_every(config.log_every);
            let run = run_with_checkpoints(&mut consumer, handle, &mut reads)
                .context("checkpoint coordinator did not shut down cleanly")?;

            let checkpoints = run.coordinator.stats();
            info!(
                saved = checkpoints.saved,
                failed = checkpoints.failed,
                "checkpoint coordinator stopped"
            );
            let stats = run.stream.context("stream processing failed")?;
            let last = run.last.context("final checkpoint failed")?;
            if let CheckpointOutcome::Saved { loci, .. } = last {
                info!(loci, "final checkpoint written");
            }
            print_summary(&stats);
        }
        PersistenceMode::WriteThrough => {
            let sink = WriteThroughSink::new(store, config.priors());
            let stats = consume(sink, &window, &mut reads, config.log_every)?;
            print_summary(&stats);
        }
    }

    if reads.undecodable() > 0 {
        warn!(dropped = reads.undecodable(), "undecodable read messages were skipped");
    }
    if let Some(err) = reads.into_failure() {
        return Err(anyhow::Error::new(err).context("read feed failed before end of input"));
    }
    Ok(())
}

fn consume<S: LocusSink>(
    sink: S,
    window: &ReferenceWindow,
    reads: impl Iterator<Item = ReadMessage>,
    log_every: u64,
) -> Result<ConsumerStats> {
    StreamConsumer::new(sink, window)
        .with_log_every(log_every)
        .run(reads)
        .context("stream processing failed")
}

fn run_report(db: &Path, contig: &str) -> Result<()> {
    let store = SqliteStore::open(db)
        .with_context(|| format!("failed to open database {}", db.display()))?;
    let loci = store.load_all().context("failed to load loci")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_vcf(&mut out, contig, &loci).context("failed to write VCF")?;
    Ok(())
}

fn print_summary(stats: &ConsumerStats) {
    println!(
        "reads={}\tskipped={}\tevidence={}\tnotifications={}",
        stats.reads_processed,
        stats.reads_skipped,
        stats.evidence_recorded,
        stats.notifications_sent
    );
}
