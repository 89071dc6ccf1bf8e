//! pagetier - NUMA memory-tiering daemon for a target process.

use clap::Parser;
use pagetier::core::class::BASE_PAGE_SHIFT;
use pagetier::core::config::{MigrateWhat, TierConfig};
use pagetier::core::controller::TierController;
use pagetier::monitor::TickHistory;
use pagetier::probe::OccupancyProbe;
use pagetier::scan::IdleScanner;
use pagetier::sys::vmstat::ProcVmstat;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "pagetier")]
#[command(about = "Tier a process's pages across NUMA nodes by access frequency", long_about = None)]
struct Cli {
    /// The PID to scan and migrate
    #[arg(short, long)]
    pid: i32,

    /// Idle-bit dwell per sweep, in seconds
    #[arg(short, long, default_value = "1.0")]
    interval: f64,

    /// Seconds to sleep between scan rounds
    #[arg(short, long, default_value = "5.0")]
    sleep: f64,

    /// Number of scan rounds; 0 runs forever
    #[arg(short = 'l', long = "loop", default_value = "1")]
    nr_loops: u64,

    /// Report file; defaults to refs-count-<pid>
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target DRAM percent of total tiered memory
    #[arg(short, long)]
    dram: Option<u8>,

    /// Migrate what: 0|none, 1|hot, 2|cold, 3|both
    #[arg(short, long, default_value = "none")]
    migrate: String,

    /// Show debug info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Unknown migrate values fall back to none; numeric and named forms are
/// both accepted.
fn parse_migrate(value: &str) -> MigrateWhat {
    match value.parse() {
        Ok(what) => what,
        Err(err) => {
            eprintln!("{}", err);
            MigrateWhat::None
        }
    }
}

fn process_name(pid: i32) -> Option<String> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid as u32)]), true);
    system
        .process(Pid::from_u32(pid as u32))
        .map(|proc| proc.name().to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let Some(name) = process_name(cli.pid) else {
        error!("no such process: {}", cli.pid);
        std::process::exit(1);
    };
    info!("targeting pid {} ({})", cli.pid, name);

    let mut cfg = TierConfig::default();
    cfg.dram_percent = cli.dram;
    cfg.migrate_what = parse_migrate(&cli.migrate);
    if let Err(reason) = cfg.validate() {
        error!("bad configuration: {}", reason);
        std::process::exit(1);
    }

    let output = cli
        .output
        .unwrap_or_else(|| PathBuf::from(format!("refs-count-{}", cli.pid)));
    let mut report_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&output)?;

    let dwell = Duration::from_secs_f64(cli.interval);
    let mut scanner = IdleScanner::new(cli.pid, cfg.nr_walks, dwell);
    let mut controller = TierController::new(cfg, cli.pid);
    let mut history = TickHistory::new(3600);

    let mut round = 0u64;
    loop {
        round += 1;
        run_round(
            &mut scanner,
            &mut controller,
            &mut history,
            &mut report_file,
            cli.verbose,
        );

        if cli.nr_loops != 0 && round >= cli.nr_loops {
            break;
        }
        tokio::time::sleep(Duration::from_secs_f64(cli.sleep)).await;
    }

    let stats = history.stats();
    info!(
        "done: {} rounds, {} pages submitted, worst error {}%",
        stats.ticks, stats.total_pages_submitted, stats.worst_error_percent
    );
    Ok(())
}

fn run_round(
    scanner: &mut IdleScanner,
    controller: &mut TierController,
    history: &mut TickHistory,
    report_file: &mut std::fs::File,
    verbose: u8,
) {
    let hists = match scanner.scan() {
        Ok(hists) => hists,
        Err(err) => {
            error!("scan failed: {}", err);
            return;
        }
    };

    let vmstat = match ProcVmstat::load() {
        Ok(vmstat) => {
            info!("{}", vmstat.anon_occupancy(1 << BASE_PAGE_SHIFT));
            vmstat
        }
        Err(err) => {
            warn!("vmstat unavailable: {}", err);
            ProcVmstat::default()
        }
    };

    match controller.tick(&hists, &vmstat) {
        Ok(report) => {
            history.record(&report);
            match serde_json::to_string(&report) {
                Ok(line) => {
                    if let Err(err) = writeln!(report_file, "{}", line) {
                        warn!("writing report: {}", err);
                    }
                }
                Err(err) => warn!("serializing report: {}", err),
            }
        }
        Err(err) => error!("round failed: {}", err),
    }

    if verbose >= 2 {
        let mut probe = OccupancyProbe::new(controller.migrator_mut());
        match probe.probe_task() {
            Ok(occupancies) => {
                for occupancy in occupancies {
                    info!("{}", occupancy);
                }
            }
            Err(err) => warn!("occupancy probe: {}", err),
        }
    }
}
