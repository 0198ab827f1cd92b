//! Replay link-failure traces against a simulated software-defined network control plane.
//!
//! A [Simulation] loads a [topology::Topology] into a [pilo_control::Network], brings every
//! link up silently, installs converged routes, then schedules a randomly drawn failure
//! [trace] and periodic measurements of how many host pairs can still reach each other.
//!
//! # Example
//!
//! ```rust
//! use pilo_simulator::{
//!     topology::{Parameters, Topology},
//!     Config, Simulation,
//! };
//!
//! let topology = Topology::parse(
//!     "h1: {type: Host}\nh2: {type: Host}\ns1: {type: Switch}\ns2: {type: Switch}\n\
//!      s3: {type: Switch}\nc1: {type: Control}\n\
//!      links: [h1-s1, s1-s2, s2-s3, s3-s1, s3-h2, c1-s1]\n",
//! )
//! .unwrap();
//! let parameters = Parameters::parse("data_link_latency: {distro: constant, mean: 1.0}").unwrap();
//! let cfg = Config {
//!     end: 3_600.0,
//!     measure: 60.0,
//!     ..Default::default()
//! };
//! let report = Simulation::new(&topology, &parameters, cfg).unwrap().run().unwrap();
//! assert_eq!(report.initial, 1.0);
//! assert_eq!(report.samples.len(), 60);
//! ```

pub mod topology;
pub mod trace;

use pilo_control::{packet::Kind, Event, Network, Sample};
use pilo_runtime::{Config as SConfig, Scheduler, Time};
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use thiserror::Error;
use topology::{Parameters, Topology};
use trace::Failure;
use tracing::info;

/// Errors that can occur when loading or running a [Simulation].
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid node {name}: {source}")]
    InvalidNode {
        name: String,
        source: serde_yaml::Error,
    },
    #[error("link {0} joins unknown node {1}")]
    UnknownEndpoint(String, String),
    #[error("unknown link: {0}")]
    UnknownLink(String),
    #[error("no links to fail")]
    NoLinks,
    #[error("invalid interval: {0}")]
    InvalidInterval(Time),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("control error: {0}")]
    Control(#[from] pilo_control::Error),
    #[error("runtime error: {0}")]
    Runtime(#[from] pilo_runtime::Error),
}

/// Configuration for a [Simulation].
#[derive(Clone, Debug)]
pub struct Config {
    /// Seed for every random choice in the run.
    pub seed: u64,

    /// Time at which the run stops (seconds).
    pub end: Time,

    /// Seconds between measurements.
    pub measure: Time,

    /// Whether measurements include the largest per-link rule count.
    pub utilization: bool,

    /// Start measuring at the first failure rather than after `measure`.
    pub fastforward: bool,

    /// Network configuration (link latency is taken from [Parameters]).
    pub network: pilo_control::Config,

    pub trace: trace::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            end: 36_000.0,
            measure: 10.0,
            utilization: false,
            fastforward: false,
            network: pilo_control::Config::default(),
            trace: trace::Config::default(),
        }
    }
}

/// Outcome of a [Simulation].
#[derive(Clone, Debug)]
pub struct Report {
    /// Fraction of host pairs connected before the run started.
    pub initial: f64,
    pub trace: Vec<Failure>,
    pub samples: Vec<Sample>,
    /// Bits delivered over each link, by packet kind.
    pub bandwidth: BTreeMap<String, BTreeMap<Kind, u64>>,
    /// Events processed.
    pub processed: u64,
    /// Digest of every processed event (equal across runs with equal inputs).
    pub audit: String,
}

/// A network ready to run, with its failure trace and measurements scheduled.
pub struct Simulation {
    network: Network,
    scheduler: Scheduler<Event>,
    trace: Vec<Failure>,
    initial: f64,
}

impl Simulation {
    pub fn new(topology: &Topology, parameters: &Parameters, cfg: Config) -> Result<Self, Error> {
        if !cfg.measure.is_finite() || cfg.measure <= 0.0 {
            return Err(Error::InvalidInterval(cfg.measure));
        }
        let mut network_cfg = cfg.network;
        network_cfg.latency = parameters.data_link_latency.clone();
        let mut network = topology.build(network_cfg, cfg.seed)?;

        // Start from a converged state
        network.set_all_links_up_silent();
        network.install_all_routes()?;
        let initial = network.check_routes();
        info!(converged = initial, "installed initial routes");

        let mut scheduler = Scheduler::init(SConfig { end: cfg.end })?;
        network.start(&mut scheduler);
        let trace = trace::generate(&mut network, topology, &cfg.trace, cfg.end)?;
        for change in &trace.changes {
            network.schedule_link(&mut scheduler, change.time, &change.link, change.state)?;
        }

        let mut time = match trace.first {
            Some(first) if cfg.fastforward => first,
            _ => cfg.measure,
        };
        while time <= cfg.end {
            scheduler.schedule_absolute(
                time,
                Event::Measure {
                    utilization: cfg.utilization,
                },
            );
            time += cfg.measure;
        }

        Ok(Self {
            network,
            scheduler,
            trace: trace.changes,
            initial,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Link changes that will be applied during the run.
    pub fn trace(&self) -> &[Failure] {
        &self.trace
    }

    /// Register network and scheduler metrics with the provided registry.
    pub fn register(&self, registry: &mut Registry) {
        self.network
            .register(registry.sub_registry_with_prefix("network"));
        self.scheduler
            .register(registry.sub_registry_with_prefix("scheduler"));
    }

    /// Run until the configured end time.
    pub fn run(mut self) -> Result<Report, Error> {
        let processed = self.scheduler.run(&mut self.network)?;
        let audit = self.scheduler.auditor().state();
        info!(
            processed,
            now = self.scheduler.now(),
            packets = self.network.packets(),
            audit,
            "finished run"
        );
        let bandwidth = self
            .network
            .bandwidth_used()
            .map(|(link, usage)| (link.to_string(), usage.clone()))
            .collect();
        Ok(Report {
            initial: self.initial,
            trace: self.trace,
            samples: self.network.samples().to_vec(),
            bandwidth,
            processed,
            audit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilo_control::controller::{self, Strategy};
    use pilo_macros::test_traced;

    /// Two paths between s1 and s3, with controllers at both ends.
    const RING: &str = r#"
h1: {type: Host}
h3: {type: Host}
s1: {type: Switch}
s2: {type: Switch}
s3: {type: Switch}
s4: {type: Switch}
c1: {type: Control}
c2: {type: Control}
links: [h1-s1, s1-s2, s2-s3, s3-s4, s4-s1, s3-h3, c1-s1, c2-s3]
"#;

    fn parameters() -> Parameters {
        Parameters::parse("data_link_latency: {distro: constant, mean: 1.0}").unwrap()
    }

    #[test_traced]
    fn test_run() {
        let topology = Topology::parse(RING).unwrap();
        let cfg = Config {
            end: 7_200.0,
            measure: 100.0,
            utilization: true,
            ..Default::default()
        };
        let simulation = Simulation::new(&topology, &parameters(), cfg).unwrap();
        assert!(!simulation.trace().is_empty());
        let report = simulation.run().unwrap();

        assert_eq!(report.initial, 1.0);
        assert_eq!(report.samples.len(), 72);
        assert_eq!(report.samples[0].time, 100.0);
        assert!(report.samples.iter().all(|sample| sample.max_load.is_some()));
        assert!(report
            .samples
            .iter()
            .all(|sample| (0.0..=1.0).contains(&sample.converged)));
        assert_eq!(report.bandwidth.len(), 8);
        assert!(report.processed > 0);
    }

    #[test]
    fn test_fastforward() {
        let topology = Topology::parse(RING).unwrap();
        let cfg = Config {
            measure: 1_000.0,
            fastforward: true,
            trace: trace::Config {
                link: Some("s1-s2".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let report = Simulation::new(&topology, &parameters(), cfg)
            .unwrap()
            .run()
            .unwrap();
        let failure = report.trace[0].time;
        assert_eq!(report.samples[0].time, failure);

        // With one failure and an alternate path, the network ends converged
        assert_eq!(report.samples.last().map(|sample| sample.converged), Some(1.0));
    }

    #[test]
    fn test_deterministic() {
        let topology = Topology::parse(RING).unwrap();
        let run = |seed| {
            let mut cfg = Config {
                seed,
                end: 3_600.0,
                ..Default::default()
            };
            cfg.network.link_success = 0.95;
            cfg.network.controller = controller::Config {
                strategy: Strategy::LoadAware { limit: 2 },
                ..Default::default()
            };
            Simulation::new(&topology, &parameters(), cfg)
                .unwrap()
                .run()
                .unwrap()
        };
        let first = run(7);
        let second = run(7);
        assert_eq!(first.audit, second.audit);
        assert_eq!(first.trace, second.trace);
        assert_eq!(first.samples, second.samples);
        assert_ne!(first.trace, run(8).trace);
    }

    #[test]
    fn test_invalid_measure() {
        let topology = Topology::parse(RING).unwrap();
        let cfg = Config {
            measure: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            Simulation::new(&topology, &parameters(), cfg),
            Err(Error::InvalidInterval(_))
        ));
    }
}
