//! `scanfleet scheduler ...` operator commands working directly on the database.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use scanfleet_core::net::{enumerate_network, range_to_cidrs};
use scanfleet_scheduler::Scheduler;
use scanfleet_store::NewQueue;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Subcommand)]
pub enum SchedulerCmd {
    /// Create a queue
    QueueAdd {
        name: String,
        /// Queue config as JSON, e.g. '{"module": "portscan", "ports": "1-1024"}'
        #[arg(long)]
        config: String,
        #[arg(long, default_value_t = 1)]
        group_size: i64,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Create the queue disabled
        #[arg(long, default_value_t = false)]
        inactive: bool,
        /// Capability tags an agent must advertise to work this queue
        #[arg(long, num_args = 1..)]
        reqs: Vec<String>,
    },
    /// List queues (JSON lines)
    QueueList,
    /// Add targets to a queue, one per line, from a file or stdin ("-")
    QueueEnqueue {
        queue: String,
        #[arg(default_value = "-")]
        file: PathBuf,
    },
    /// Remove all pending targets of a queue
    QueueFlush { queue: String },
    /// Delete all jobs of a queue and their output archives
    QueuePrune { queue: String },
    /// Print every address of the given networks
    Enumips {
        networks: Vec<String>,
        /// File with newline-delimited networks
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Summarize an address range into CIDR networks
    Rangetocidr { start: String, end: String },
    /// Close a job whose agent never reported back
    JobReconcile { id: String },
    /// Put the targets of a job back into its queue
    JobRepeat { id: String },
    /// Delete a job and its output archive
    JobDelete { id: String },
    /// Print the current heatmap (JSON)
    Heatmap,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(path)?))
    };
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

/// Commands that need no database.
fn run_offline(cmd: &SchedulerCmd, out: &mut impl Write) -> Result<bool> {
    match cmd {
        SchedulerCmd::Enumips { networks, file } => {
            let mut specs = networks.clone();
            if let Some(path) = file {
                specs.extend(read_lines(path)?);
            }
            if specs.is_empty() {
                return Err(anyhow!("provide networks or --file <FILE>"));
            }
            for spec in specs {
                for addr in enumerate_network(&spec)? {
                    writeln!(out, "{addr}")?;
                }
            }
        }
        SchedulerCmd::Rangetocidr { start, end } => {
            for net in range_to_cidrs(start, end)? {
                writeln!(out, "{net}")?;
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

pub fn run(scheduler: impl FnOnce() -> Result<Scheduler>, cmd: SchedulerCmd, out: &mut impl Write) -> Result<()> {
    if run_offline(&cmd, out)? {
        return Ok(());
    }
    let scheduler = scheduler()?;
    let mut db = scheduler.connect()?;
    match cmd {
        SchedulerCmd::QueueAdd { name, config, group_size, priority, inactive, reqs } => {
            let queue = scheduler.queue_create(
                &mut db,
                &NewQueue { name, config, group_size, priority, active: !inactive, reqs },
            )?;
            writeln!(out, "{}", serde_json::to_string(&queue)?)?;
        }
        SchedulerCmd::QueueList => {
            for queue in scheduler.queue_list(&db)? {
                writeln!(out, "{}", serde_json::to_string(&queue)?)?;
            }
        }
        SchedulerCmd::QueueEnqueue { queue, file } => {
            let count = scheduler.queue_enqueue(&mut db, &queue, &read_lines(&file)?)?;
            writeln!(out, "enqueued {count}")?;
        }
        SchedulerCmd::QueueFlush { queue } => {
            let count = scheduler.queue_flush(&mut db, &queue)?;
            writeln!(out, "flushed {count}")?;
        }
        SchedulerCmd::QueuePrune { queue } => {
            let count = scheduler.queue_prune(&mut db, &queue)?;
            writeln!(out, "pruned {count}")?;
        }
        SchedulerCmd::JobReconcile { id } => scheduler.reconcile(&mut db, &id)?,
        SchedulerCmd::JobRepeat { id } => {
            let count = scheduler.repeat(&mut db, &id)?;
            writeln!(out, "requeued {count}")?;
        }
        SchedulerCmd::JobDelete { id } => scheduler.job_delete(&mut db, &id)?,
        SchedulerCmd::Heatmap => {
            writeln!(out, "{}", serde_json::to_string_pretty(&scheduler.heatmap_check(&db)?)?)?;
        }
        SchedulerCmd::Enumips { .. } | SchedulerCmd::Rangetocidr { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfleet_scheduler::SchedulerConfig;

    fn run_cmd(dir: &std::path::Path, cmd: SchedulerCmd) -> Result<String> {
        let config = SchedulerConfig {
            db: dir.join("fleet.db"),
            output_dir: dir.join("output"),
            ..Default::default()
        };
        let mut out = Vec::new();
        run(|| Ok(Scheduler::new(config)?), cmd, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn network_tools_skip_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_cmd(dir.path(), SchedulerCmd::Enumips { networks: vec!["10.0.0.0/31".into()], file: None }).unwrap();
        assert_eq!(out, "10.0.0.0\n10.0.0.1\n");
        let out = run_cmd(dir.path(), SchedulerCmd::Rangetocidr { start: "10.0.0.0".into(), end: "10.0.0.2".into() }).unwrap();
        assert_eq!(out, "10.0.0.0/31\n10.0.0.2/32\n");
        assert!(!dir.path().join("fleet.db").exists());
    }

    #[test]
    fn queue_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let targets = dir.path().join("targets.txt");
        std::fs::write(&targets, "# comment\n10.0.0.1\n\n10.0.0.2\n").unwrap();

        let out = run_cmd(
            dir.path(),
            SchedulerCmd::QueueAdd {
                name: "disco".into(),
                config: r#"{"module": "hostdisco"}"#.into(),
                group_size: 2,
                priority: 5,
                inactive: false,
                reqs: vec![],
            },
        )
        .unwrap();
        assert!(out.contains(r#""name":"disco""#));
        let out = run_cmd(dir.path(), SchedulerCmd::QueueEnqueue { queue: "disco".into(), file: targets }).unwrap();
        assert_eq!(out, "enqueued 2\n");
        let out = run_cmd(dir.path(), SchedulerCmd::QueueFlush { queue: "disco".into() }).unwrap();
        assert_eq!(out, "flushed 2\n");
        assert!(run_cmd(dir.path(), SchedulerCmd::JobReconcile { id: "missing".into() }).is_err());
    }
}
