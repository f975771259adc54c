use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use kmeans_stepper::session::{SessionRegistry, DEFAULT_DIM, DEFAULT_SAMPLES};
use kmeans_stepper::{
    generate_blobs, DataLoader, FitOutcome, InitMethod, InitStrategy, KMeans, KMeansConfig,
    PointSet, Result as KMeansResult, Snapshot, DEFAULT_MAX_ITERATIONS,
};

#[derive(Parser, Debug)]
#[command(name = "kmeans-stepper")]
#[command(about = "Step-by-step k-means with pluggable centroid seeding", long_about = None)]
struct Cli {
    /// Verbosity: set RUST_LOG style level (info, debug, warn)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cluster a point set once and write a JSON summary
    Run(RunArgs),
    /// Read line-delimited JSON commands on stdin, answer on stdout
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of clusters
    #[arg(short, long, default_value_t = 3)]
    k: usize,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = DEFAULT_SAMPLES)]
    points: usize,

    /// Dimensionality of points when generating
    #[arg(short, long, default_value_t = DEFAULT_DIM)]
    dim: usize,

    /// Maximum number of Update-then-Assign cycles
    #[arg(short, long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    iterations: usize,

    /// RNG seed
    #[arg(long, default_value_t = 42u64)]
    seed: u64,

    /// Input dataset (headered CSV)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Initialization method
    #[arg(long, value_parser = parse_init_strategy, default_value = "kmeans++")]
    init: InitStrategy,

    /// JSON file of explicit centroids, required by --init manual
    #[arg(long)]
    centroids: Option<PathBuf>,

    /// Take this many single steps (recording each) instead of running to convergence
    #[arg(long)]
    steps: Option<usize>,

    /// Output file for centroids and stats (JSON)
    #[arg(short, long, default_value = "kmeans_result.json")]
    output: PathBuf,

    /// Optional file containing per-sample cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Seed from which every session's random source is derived
    #[arg(long, default_value_t = 42u64)]
    seed: u64,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Serve(args) => serve(args),
    };
    if let Err(err) = result {
        error!(error = %err, status = err.status_code(), "kmeans-stepper failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_writer(io::stderr)
        .with_max_level(match level {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: RunArgs) -> KMeansResult<()> {
    info!(
        k = args.k,
        init = %args.init,
        max_iterations = args.iterations,
        seed = args.seed,
        "starting kmeans run"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let points = load_points(&args, &mut rng)?;
    let explicit = args
        .centroids
        .as_deref()
        .map(DataLoader::load_centroids_json)
        .transpose()?;
    let method = InitMethod::from_strategy(args.init, explicit)?;

    let mut model = KMeans::new(KMeansConfig {
        k: args.k,
        max_iterations: args.iterations,
    });
    model.initialize(&points, &method, &mut rng)?;

    let start = Instant::now();
    let progress = match args.steps {
        Some(steps) => {
            let mut trace = Vec::with_capacity(steps + 1);
            trace.push(model.snapshot()?);
            for _ in 0..steps {
                trace.push(model.step(&points)?);
            }
            Progress::Stepped(trace)
        }
        None => Progress::Fitted(model.fit(&points)?),
    };
    let elapsed = start.elapsed();

    let snapshot = model.snapshot()?;
    if let Progress::Fitted(outcome) = &progress {
        info!(
            inertia = outcome.inertia,
            iterations = outcome.iterations,
            converged = outcome.converged,
            took_seconds = elapsed.as_secs_f64(),
            "kmeans run finished"
        );
        info!(?outcome.cluster_sizes, "cluster population counts");
    }

    write_result(&args, &points, &snapshot, &progress, elapsed.as_secs_f64())?;

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, &snapshot)?;
    }
    Ok(())
}

enum Progress {
    Stepped(Vec<Snapshot>),
    Fitted(FitOutcome),
}

fn load_points(args: &RunArgs, rng: &mut ChaCha8Rng) -> KMeansResult<PointSet> {
    if let Some(path) = args.input.as_deref() {
        info!(path = ?path, "loading input data");
        DataLoader::load_csv(path)
    } else {
        info!(
            points = args.points,
            dim = args.dim,
            "generating synthetic blob data"
        );
        generate_blobs(args.points, args.dim, args.k, rng)
    }
}

fn write_result(
    args: &RunArgs,
    points: &PointSet,
    snapshot: &Snapshot,
    progress: &Progress,
    elapsed_secs: f64,
) -> KMeansResult<()> {
    let mut dump = json!({
        "k": args.k,
        "dim": points.dim(),
        "rows": points.len(),
        "init": args.init,
        "seed": args.seed,
        "elapsed_seconds": elapsed_secs,
        "config": {
            "max_iterations": args.iterations,
        },
        "centroids": snapshot.centroids,
        "labels": snapshot.labels,
        "data_source": match args.input.as_ref() {
            Some(path) => json!({
                "type": "file",
                "path": path.display().to_string(),
            }),
            None => json!({
                "type": "synthetic",
                "points": args.points,
                "dim": args.dim,
            }),
        },
        "assignments_path": args.assignments.as_ref().map(|p| p.display().to_string()),
    });
    match progress {
        Progress::Stepped(trace) => {
            dump["steps"] = json!(trace.len() - 1);
            dump["trace"] = serde_json::to_value(trace)?;
        }
        Progress::Fitted(outcome) => {
            dump["fit"] = serde_json::to_value(outcome)?;
        }
    }

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote clustering summary");
    Ok(())
}

fn write_assignments(path: &Path, snapshot: &Snapshot) -> KMeansResult<()> {
    let Some(labels) = snapshot.labels.as_ref() else {
        info!("labels not computed yet; skipping assignments CSV");
        return Ok(());
    };
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in labels.iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

fn serve(args: ServeArgs) -> KMeansResult<()> {
    let mut registry = SessionRegistry::new(args.seed);
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    info!(seed = args.seed, "serving commands on stdin");

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = registry.handle_line(&line);
        serde_json::to_writer(&mut stdout, &response)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }
    info!(sessions = registry.len(), "stdin closed; shutting down");
    Ok(())
}

fn parse_init_strategy(raw: &str) -> Result<InitStrategy, String> {
    InitStrategy::from_str(raw).map_err(|err| err.to_string())
}
