//! Builds the stage list from configuration.

use crate::context::Context;
use crate::error::{PlannerError, Result};
use crate::queue_handler::QueueHandler;
use crate::stage::{Enqueue, Schedule, Sinks, Stage, TaskStage};
use crate::stages::{
    NetlistEnum, ServiceDisco, SixDisco, StorageCleanup, StorageLoader, StorageLoaderRolling, StorageRescan,
    StorageServiceList, StorageSixTargetlist,
};
use scanfleet_core::interval::serde_interval;
use scanfleet_core::net::parse_networks;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target list sink of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    NetlistEnum {
        lockname: String,
        #[serde(with = "serde_interval")]
        interval: Duration,
        netlist: Vec<String>,
        next: Vec<SinkConfig>,
    },
    StorageSixTargetlist {
        lockname: String,
        #[serde(with = "serde_interval")]
        interval: Duration,
        next: Vec<SinkConfig>,
    },
    SixDisco {
        queue: String,
        #[serde(default)]
        filternets: Vec<String>,
        next: Vec<SinkConfig>,
    },
    ServiceDisco {
        queue: String,
        #[serde(default)]
        filternets: Vec<String>,
        next: Vec<SinkConfig>,
    },
    StorageLoader {
        queue: String,
    },
    StorageLoaderRolling {
        queue: String,
        xtype_prefix: String,
    },
    StorageRescan {
        lockname: String,
        #[serde(with = "serde_interval")]
        interval: Duration,
        #[serde(with = "serde_interval")]
        host_interval: Duration,
        #[serde(with = "serde_interval")]
        service_interval: Duration,
        servicedisco: Vec<SinkConfig>,
        servicescan: Vec<SinkConfig>,
    },
    StorageCleanup {
        lockname: String,
        #[serde(with = "serde_interval")]
        interval: Duration,
    },
    StorageServiceList {
        lockname: String,
        #[serde(with = "serde_interval")]
        interval: Duration,
        #[serde(default)]
        ports: Vec<u16>,
        #[serde(default)]
        names: Vec<String>,
        next: Vec<SinkConfig>,
    },
}

fn sinks(configs: &[SinkConfig]) -> Sinks {
    configs.iter().map(|s| Box::new(Enqueue::new(&s.queue)) as Box<dyn TaskStage>).collect()
}

fn scheduled<S: Stage + 'static>(lockname: &str, interval: Duration, inner: S) -> Box<dyn Stage> {
    Box::new(Schedule::new(lockname, interval, inner))
}

fn networks(nets: &[String]) -> Result<Vec<ipnet::IpNet>> {
    parse_networks(nets).map_err(|e| PlannerError::Config(e.to_string()))
}

/// Instantiate configured stages in order. Queue handlers resolve their queues here,
/// so a stage naming a missing queue fails the whole build.
pub fn build(ctx: &Context, configs: &[StageConfig], tarpit_threshold: usize) -> Result<Vec<Box<dyn Stage>>> {
    configs
        .iter()
        .map(|config| {
            let stage: Box<dyn Stage> = match config {
                StageConfig::NetlistEnum { lockname, interval, netlist, next } => scheduled(
                    lockname,
                    *interval,
                    NetlistEnum { netlist: netlist.clone(), next: sinks(next) },
                ),
                StageConfig::StorageSixTargetlist { lockname, interval, next } => {
                    scheduled(lockname, *interval, StorageSixTargetlist { next: sinks(next) })
                }
                StageConfig::SixDisco { queue, filternets, next } => Box::new(SixDisco {
                    handler: QueueHandler::new(ctx, queue)?,
                    filternets: networks(filternets)?,
                    next: sinks(next),
                }),
                StageConfig::ServiceDisco { queue, filternets, next } => Box::new(ServiceDisco {
                    handler: QueueHandler::new(ctx, queue)?,
                    filternets: networks(filternets)?,
                    tarpit_threshold,
                    next: sinks(next),
                }),
                StageConfig::StorageLoader { queue } => Box::new(StorageLoader { handler: QueueHandler::new(ctx, queue)? }),
                StageConfig::StorageLoaderRolling { queue, xtype_prefix } => Box::new(StorageLoaderRolling {
                    handler: QueueHandler::new(ctx, queue)?,
                    xtype_prefix: xtype_prefix.clone(),
                }),
                StageConfig::StorageRescan { lockname, interval, host_interval, service_interval, servicedisco, servicescan } => {
                    scheduled(
                        lockname,
                        *interval,
                        StorageRescan {
                            host_interval: *host_interval,
                            service_interval: *service_interval,
                            servicedisco: sinks(servicedisco),
                            servicescan: sinks(servicescan),
                        },
                    )
                }
                StageConfig::StorageCleanup { lockname, interval } => scheduled(lockname, *interval, StorageCleanup),
                StageConfig::StorageServiceList { lockname, interval, ports, names, next } => scheduled(
                    lockname,
                    *interval,
                    StorageServiceList { ports: ports.clone(), names: names.clone(), next: sinks(next) },
                ),
            };
            Ok::<_, PlannerError>(stage)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;

    const PIPELINE: &str = r#"
- stage: netlist_enum
  lockname: netlist
  interval: 12h
  netlist: [127.0.0.0/30]
  next:
    - queue: disco
- stage: service_disco
  queue: disco
  filternets: [127.0.0.0/8]
  next:
    - queue: scan
- stage: storage_loader
  queue: scan
- stage: storage_loader_rolling
  queue: scan
  xtype_prefix: "nuclei."
- stage: storage_rescan
  lockname: rescan
  interval: 1h
  host_interval: 7days
  service_interval: 7days
  servicedisco:
    - queue: disco
  servicescan:
    - queue: scan
- stage: storage_cleanup
  lockname: cleanup
  interval: 1h
- stage: storage_six_targetlist
  lockname: six
  interval: 1d
  next: [{queue: six}]
- stage: six_disco
  queue: six
  next: [{queue: disco}]
- stage: storage_service_list
  lockname: tls
  interval: 1d
  ports: [443]
  names: [https]
  next: [{queue: scan}]
"#;

    #[test]
    fn builds_every_stage_kind() {
        let env = TestEnv::new();
        for (name, module) in [("disco", "portscan"), ("scan", "portscan"), ("six", "sixenum")] {
            env.create_queue(name, module);
        }
        let configs: Vec<StageConfig> = serde_yaml::from_str(PIPELINE).unwrap();
        let ctx = env.context();
        let stages = build(&ctx, &configs, 200).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "netlist",
                "service_disco",
                "storage_loader",
                "storage_loader_rolling",
                "rescan",
                "cleanup",
                "six",
                "six_disco",
                "tls"
            ]
        );
    }

    #[test]
    fn missing_queue_fails_build() {
        let env = TestEnv::new();
        let configs: Vec<StageConfig> = serde_yaml::from_str("- stage: storage_loader\n  queue: nx\n").unwrap();
        let ctx = env.context();
        assert!(matches!(build(&ctx, &configs, 200), Err(PlannerError::QueueNotFound(_))));
    }
}
