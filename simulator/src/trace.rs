//! Link-failure traces.
//!
//! Failures arrive as a Poisson process: gaps between successive failures are exponential
//! with mean `mttf`, and each failed link recovers after an exponential delay with mean
//! `mttr`. Failures keep coming until one lands at or past the end of the run.

use crate::{topology::Topology, Error};
use pilo_control::{link::State, LinkId, Network};
use pilo_runtime::{
    distribution::{Exponential, UniformInt},
    Distribution, Time,
};
use tracing::{debug, info};

/// Configuration for [generate].
#[derive(Clone, Debug)]
pub struct Config {
    /// Mean time between failures (seconds).
    pub mttf: Time,

    /// Mean time to recovery (seconds).
    pub mttr: Time,

    /// Fail a single link, once, without recovery.
    pub single: bool,

    /// Only fail critical links (the topology's `crit_links`, or else every link joining
    /// two switches).
    pub critical: bool,

    /// Fail this link, once, without recovery (overrides every other selection).
    pub link: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mttf: 600.0,
            mttr: 300.0,
            single: false,
            critical: false,
            link: None,
        }
    }
}

/// A scheduled change of link state.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub time: Time,
    pub link: String,
    pub state: State,
}

/// Generated link changes, in generation order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trace {
    pub changes: Vec<Failure>,
    /// Time of the first failure.
    pub first: Option<Time>,
}

/// Links eligible to fail.
fn candidates(network: &Network, topology: &Topology, cfg: &Config) -> Result<Vec<LinkId>, Error> {
    let listed = |links: &[String]| -> Result<Vec<LinkId>, Error> {
        links
            .iter()
            .map(|link| network.link_id(link).map_err(Error::from))
            .collect()
    };
    if cfg.critical {
        if topology.crit_links.is_empty() {
            return Ok(network.switch_links());
        }
        return listed(&topology.crit_links);
    }
    if !topology.fail_links.is_empty() {
        return listed(&topology.fail_links);
    }
    Ok((0..network.links().len()).collect())
}

fn name(network: &Network, link: LinkId) -> Result<String, Error> {
    network
        .links()
        .get(link)
        .map(|link| link.name().to_string())
        .ok_or(Error::Control(pilo_control::Error::InvalidLink(link)))
}

/// Draw a trace for `network`, consuming randomness from its generator.
pub fn generate(
    network: &mut Network,
    topology: &Topology,
    cfg: &Config,
    end: Time,
) -> Result<Trace, Error> {
    for interval in [cfg.mttf, cfg.mttr] {
        if !interval.is_finite() || interval <= 0.0 {
            return Err(Error::InvalidInterval(interval));
        }
    }
    let mut failures = Exponential::with_mean(cfg.mttf, network.rng())?;
    let mut repairs = Exponential::with_mean(cfg.mttr, network.rng())?;

    // A specific link fails once
    if let Some(link) = &cfg.link {
        network.link_id(link)?;
        let time = failures.next();
        debug!(time, link, "scheduled failure");
        return Ok(Trace {
            changes: vec![Failure {
                time,
                link: link.clone(),
                state: State::Down,
            }],
            first: Some(time),
        });
    }

    let eligible = candidates(network, topology, cfg)?;
    if eligible.is_empty() {
        return Err(Error::NoLinks);
    }
    let mut picker = UniformInt::new(0, eligible.len() - 1, network.rng())?;
    let mut trace = Trace::default();
    let mut last = 0.0;
    loop {
        let link = eligible.get(picker.next()).copied().ok_or(Error::NoLinks)?;
        let link = name(network, link)?;
        last += failures.next();
        trace.first.get_or_insert(last);
        let recovery = last + repairs.next();
        debug!(time = last, recovery, link = %link, "scheduled failure");
        trace.changes.push(Failure {
            time: last,
            link: link.clone(),
            state: State::Down,
        });
        if cfg.single {
            break;
        }
        trace.changes.push(Failure {
            time: recovery,
            link,
            state: State::Up,
        });
        if last >= end {
            break;
        }
    }
    info!(changes = trace.changes.len(), first = ?trace.first, "generated trace");
    Ok(trace)
}
