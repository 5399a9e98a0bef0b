mod reports;
mod sim;
mod storage;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use relicforge_engine::{Profile, ProgressionEngine, Rarity, Relicforge};
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use reports::Report;
use sim::{MergeScenario, SessionPolicy};
use storage::{JsonConfigLoader, JsonFileStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RarityArg {
    Common,
    Uncommon,
    Rare,
    Epic,
}

impl From<RarityArg> for Rarity {
    fn from(value: RarityArg) -> Self {
        match value {
            RarityArg::Common => Self::Common,
            RarityArg::Uncommon => Self::Uncommon,
            RarityArg::Rare => Self::Rare,
            RarityArg::Epic => Self::Epic,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "relicforge-sim", version)]
#[command(about = "Monte-Carlo simulator and QA harness for the Relicforge progression engine")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Engine seed
    #[arg(long, global = true, default_value_t = 1337)]
    seed: u64,

    /// Engine configuration JSON (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output report format
    #[arg(long, global = true, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Optional path to write the report output instead of stdout
    #[arg(long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print tier distributions for a sweep of session lengths
    Rarity {
        /// Session lengths in minutes (comma-separated)
        #[arg(long, value_delimiter = ',', default_values_t = [5.0, 30.0, 60.0, 90.0, 120.0, 180.0, 240.0])]
        minutes: Vec<f64>,

        /// Drop luck in percentage points
        #[arg(long, default_value_t = 0.0)]
        luck: f64,
    },
    /// Resolve many identical merges and summarise the outcomes
    Merge {
        /// Number of inputs per merge
        #[arg(long, default_value_t = 2)]
        inputs: usize,

        /// Rarity of every input
        #[arg(long, value_enum, default_value_t = RarityArg::Rare)]
        rarity: RarityArg,

        /// Pay for the success boost
        #[arg(long)]
        boost: bool,

        /// Number of merges to resolve
        #[arg(long, default_value_t = 10_000)]
        trials: usize,
    },
    /// Play a seeded run of focus sessions with greedy merging
    Session {
        /// Number of focus sessions
        #[arg(long, default_value_t = 100)]
        sessions: u32,

        /// Shortest session in minutes
        #[arg(long, default_value_t = 25)]
        min_minutes: u32,

        /// Longest session in minutes
        #[arg(long, default_value_t = 120)]
        max_minutes: u32,

        /// Chance of paying for the boost on each merge
        #[arg(long, default_value_t = 0.25)]
        boost_chance: f64,

        /// Items offered to each merge
        #[arg(long, default_value_t = 3)]
        merge_batch: usize,

        /// Seed for player behaviour (defaults to the engine seed)
        #[arg(long)]
        behaviour_seed: Option<u64>,

        /// Directory for saved profiles
        #[arg(long, default_value = "target/relicforge-profiles")]
        profile_dir: PathBuf,

        /// Load and save this profile name; the run starts fresh when absent
        #[arg(long)]
        profile: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.report == ReportFormat::Console && args.output.is_none() {
        announce_banner();
    }

    let start_time = Instant::now();
    let report = run_command(&args)?;
    write_report(&args, &report, start_time)
}

fn announce_banner() {
    println!("{}", "⚒️  Relicforge Simulator".bright_cyan().bold());
    println!("{}", "========================".cyan());
}

fn run_command(args: &Args) -> Result<Report> {
    let loader = JsonConfigLoader::new(args.config.clone());
    match &args.command {
        Command::Rarity { minutes, luck } => {
            let host = Relicforge::new(loader, JsonFileStorage::new("."));
            let engine = host.start(args.seed).context("failed to start engine")?;
            let rows = sim::rarity_sweep(engine.config(), minutes, *luck)?;
            Ok(Report::Rarity {
                seed: args.seed,
                rows,
            })
        }
        Command::Merge {
            inputs,
            rarity,
            boost,
            trials,
        } => {
            let host = Relicforge::new(loader, JsonFileStorage::new("."));
            let mut engine = host.start(args.seed).context("failed to start engine")?;
            let scenario = MergeScenario {
                inputs: *inputs,
                rarity: (*rarity).into(),
                boost: *boost,
                trials: *trials,
            };
            let summary = sim::merge_trials(&mut engine, scenario)?;
            Ok(Report::Merge {
                seed: args.seed,
                scenario,
                summary,
            })
        }
        Command::Session {
            sessions,
            min_minutes,
            max_minutes,
            boost_chance,
            merge_batch,
            behaviour_seed,
            profile_dir,
            profile,
        } => {
            if !(0.0..=1.0).contains(boost_chance) {
                bail!("--boost-chance must lie in [0, 1], got {boost_chance}");
            }
            if min_minutes > max_minutes {
                bail!("--min-minutes ({min_minutes}) exceeds --max-minutes ({max_minutes})");
            }
            let policy = SessionPolicy {
                sessions: *sessions,
                min_minutes: *min_minutes,
                max_minutes: *max_minutes,
                boost_chance: *boost_chance,
                merge_batch: (*merge_batch).max(2),
            };
            let host = Relicforge::new(loader, JsonFileStorage::new(profile_dir));
            let mut engine = host.start(args.seed).context("failed to start engine")?;
            let mut state = match profile {
                Some(name) => host
                    .load_profile(name)
                    .with_context(|| format!("failed to load profile {name}"))?
                    .unwrap_or_default(),
                None => Profile::default(),
            };
            let summary = run_session(
                &mut engine,
                &mut state,
                policy,
                behaviour_seed.unwrap_or(args.seed),
            )?;
            if let Some(name) = profile {
                host.save_profile(name, &state)
                    .with_context(|| format!("failed to save profile {name}"))?;
            }
            Ok(Report::Session {
                seed: args.seed,
                policy,
                summary,
            })
        }
    }
}

fn run_session(
    engine: &mut ProgressionEngine,
    profile: &mut Profile,
    policy: SessionPolicy,
    behaviour_seed: u64,
) -> Result<sim::SessionSummary> {
    sim::run_sessions(engine, profile, policy, behaviour_seed)
}

fn write_report(args: &Args, report: &Report, start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;
    match args.report {
        ReportFormat::Json => reports::generate_json_report(&mut output_target, report)?,
        ReportFormat::Markdown => reports::generate_markdown_report(&mut output_target, report)?,
        ReportFormat::Console => {
            reports::generate_console_report(&mut output_target, report, start_time.elapsed())?;
        }
    }
    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}
