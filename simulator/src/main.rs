//! Simulate a software-defined network control plane under random link failures.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use pilo_control::controller::{self, Strategy};
use pilo_simulator::{
    topology::{Parameters, Topology},
    trace, Config, Error, Report, Simulation,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

const STANDARD: &str = "standard";
const TE: &str = "te";
const COORDINATED: &str = "coordinated";

fn value<T: Clone + Send + Sync + 'static>(
    matches: &ArgMatches,
    id: &'static str,
) -> Result<T, Error> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or(Error::MissingArgument(id))
}

/// Translate command-line arguments into a simulation [Config].
fn configure(matches: &ArgMatches) -> Result<Config, Error> {
    let limit = value::<usize>(matches, "limit")?;
    let (strategy, coordinated) = match value::<String>(matches, "controller")?.as_str() {
        TE => (Strategy::LoadAware { limit }, false),
        COORDINATED => (Strategy::ShortestPath, true),
        _ => (Strategy::ShortestPath, false),
    };

    // Drops apply at links unless asked to apply at controllers
    let success = 1.0 - value::<f64>(matches, "drop")?;
    let (link_success, controller_success) = if matches.get_flag("cdrop") {
        (1.0, success)
    } else {
        (success, 1.0)
    };

    let network = pilo_control::Config {
        bandwidth: value(matches, "bandwidth")?,
        link_success,
        controller_success,
        controller: controller::Config {
            refresh: value(matches, "refresh")?,
            gossip: value(matches, "gossip")?,
            audit: matches.get_one::<f64>("audit").copied(),
            strategy,
        },
        coordinated,
        ..Default::default()
    };
    Ok(Config {
        seed: value(matches, "seed")?,
        end: value(matches, "end")?,
        measure: value(matches, "measure")?,
        utilization: matches.get_flag("te"),
        fastforward: matches.get_flag("fastforward"),
        network,
        trace: trace::Config {
            mttf: value(matches, "mttf")?,
            mttr: value(matches, "mttr")?,
            single: matches.get_flag("one"),
            critical: matches.get_flag("critlinks"),
            link: matches.get_one::<String>("fail").cloned(),
        },
    })
}

fn summarize(report: &Report) {
    println!("initial {}", report.initial);
    for change in &report.trace {
        println!("{:.5}  {}  {:?}", change.time, change.link, change.state);
    }
    println!("convergence");
    for sample in &report.samples {
        match sample.max_load {
            Some(load) => println!(" !  {:.5} {:.5} {load}", sample.time, sample.converged),
            None => println!(" !  {:.5} {:.5}", sample.time, sample.converged),
        }
    }
    println!("bandwidth");
    for (link, usage) in &report.bandwidth {
        for (kind, bits) in usage {
            println!("{link} {} {bits}", kind.as_str());
        }
    }
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let topology = Topology::load(&value::<PathBuf>(matches, "topology")?)?;
    let parameters = Parameters::load(&value::<PathBuf>(matches, "configuration")?)?;
    let cfg = configure(matches)?;
    info!(
        seed = cfg.seed,
        end = cfg.end,
        nodes = topology.nodes.len(),
        links = topology.links.len(),
        "starting simulation"
    );

    let simulation = Simulation::new(&topology, &parameters, cfg)?;
    let mut registry = Registry::default();
    simulation.register(&mut registry);
    let report = simulation.run()?;
    summarize(&report);

    if matches.get_flag("metrics") {
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_ok() {
            print!("{buffer}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Parse arguments
    let matches = Command::new("pilo-simulator")
        .version(crate_version())
        .about("Simulate a software-defined network control plane under random link failures.")
        .arg(
            Arg::new("topology")
                .short('t')
                .long("topology")
                .required(true)
                .help("Path to YAML topology file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("configuration")
                .short('c')
                .long("configuration")
                .required(true)
                .help("Path to YAML configuration file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .default_value("42")
                .help("Random seed")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh")
                .short('p')
                .long("refresh")
                .default_value("300")
                .help("Seconds between controller polls of switches")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("gossip")
                .short('g')
                .long("gossip")
                .default_value("600")
                .help("Seconds between gossip rounds")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .help("Seconds between switch table audits (disabled if unset)")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("bandwidth")
                .short('b')
                .long("bandwidth")
                .default_value("1e10")
                .help("Link bandwidth (bits per second)")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("end")
                .short('e')
                .long("end")
                .default_value("36000")
                .help("End time (seconds)")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("measure")
                .short('m')
                .long("measure")
                .default_value("10")
                .help("Seconds between measurements")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("mttf")
                .short('f')
                .long("mttf")
                .default_value("600")
                .help("Mean time to failure (seconds)")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("mttr")
                .short('r')
                .long("mttr")
                .default_value("300")
                .help("Mean time to recovery (seconds)")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("one")
                .short('o')
                .long("one")
                .help("Fail a single link without recovery")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("critlinks")
                .short('i')
                .long("critlinks")
                .help("Only fail critical (switch to switch) links")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fail")
                .long("fail")
                .help("Fail a specific link without recovery")
                .value_parser(value_parser!(String)),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .default_value("100")
                .help("Routes admitted per link by the load-aware controller")
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
        )
        .arg(
            Arg::new("drop")
                .short('d')
                .long("drop")
                .default_value("0.0")
                .help("Probability of dropping a packet")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("cdrop")
                .short('w')
                .long("cdrop")
                .help("Drop at controllers rather than links")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fastforward")
                .long("fastforward")
                .help("Start measuring at the first failure")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("te")
                .long("te")
                .help("Measure link utilization")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("controller")
                .long("controller")
                .default_value(STANDARD)
                .help("Controller behavior")
                .value_parser([STANDARD, TE, COORDINATED]),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Maximum log level")
                .value_parser(value_parser!(Level)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Emit logs as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .help("Print metrics after the run")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Create logger
    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    if matches.get_flag("json") {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(err) = run(&matches) {
        error!(?err, "simulation failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
