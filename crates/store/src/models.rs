use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub type QueueId = i64;
pub type HostId = i64;
pub type ServiceId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    /// JSON object; at least `{"module": ...}`.
    pub config: String,
    pub group_size: i64,
    pub priority: i64,
    pub active: bool,
    pub reqs: Vec<String>,
}

impl Queue {
    pub const COLUMNS: &'static str = "id, name, config, group_size, priority, active, reqs";

    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        let reqs: String = r.get(6)?;
        Ok(Queue {
            id: r.get(0)?,
            name: r.get(1)?,
            config: r.get(2)?,
            group_size: r.get(3)?,
            priority: r.get(4)?,
            active: r.get(5)?,
            reqs: serde_json::from_str(&reqs).unwrap_or_default(),
        })
    }

    /// Whether an agent advertising `caps` may work this queue.
    pub fn accepts_caps(&self, caps: &[String]) -> bool {
        self.reqs.iter().all(|req| caps.contains(req))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueue {
    pub name: String,
    pub config: String,
    pub group_size: i64,
    pub priority: i64,
    pub active: bool,
    pub reqs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRow {
    pub id: i64,
    pub queue_id: QueueId,
    pub target: String,
    pub hashval: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue_id: QueueId,
    /// Assignment exactly as handed to the agent.
    pub assignment: String,
    pub time_start: i64,
    pub time_end: Option<i64>,
    pub retval: Option<i32>,
    /// Path of the stored output archive.
    pub output: Option<String>,
}

impl Job {
    pub const COLUMNS: &'static str = "id, queue_id, assignment, time_start, time_end, retval, output";

    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Job {
            id: r.get(0)?,
            queue_id: r.get(1)?,
            assignment: r.get(2)?,
            time_start: r.get(3)?,
            time_end: r.get(4)?,
            retval: r.get(5)?,
            output: r.get(6)?,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.retval.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapEntry {
    pub hashval: String,
    pub count: i64,
    pub updated_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub address: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub comment: Option<String>,
    pub rescan_ms: Option<i64>,
}

impl Host {
    pub const COLUMNS: &'static str = "id, address, hostname, os, comment, rescan_ms";

    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Host {
            id: r.get(0)?,
            address: r.get(1)?,
            hostname: r.get(2)?,
            os: r.get(3)?,
            comment: r.get(4)?,
            rescan_ms: r.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub host_id: HostId,
    pub proto: String,
    pub port: u16,
    pub state: String,
    pub name: Option<String>,
    pub info: Option<String>,
    pub rescan_ms: Option<i64>,
}

impl Service {
    pub const COLUMNS: &'static str = "id, host_id, proto, port, state, name, info, rescan_ms";

    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Service {
            id: r.get(0)?,
            host_id: r.get(1)?,
            proto: r.get(2)?,
            port: r.get(3)?,
            state: r.get(4)?,
            name: r.get(5)?,
            info: r.get(6)?,
            rescan_ms: r.get(7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub host_id: HostId,
    pub service_id: Option<ServiceId>,
    pub via_target: Option<String>,
    pub xtype: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vuln {
    pub id: i64,
    pub host_id: HostId,
    pub service_id: Option<ServiceId>,
    pub via_target: Option<String>,
    pub xtype: String,
    pub name: String,
    pub severity: String,
    pub descr: String,
    pub data: String,
    pub refs: Vec<String>,
}

impl Vuln {
    pub const COLUMNS: &'static str = "id, host_id, service_id, via_target, xtype, name, severity, descr, data, refs";

    pub fn from_row(r: &Row) -> rusqlite::Result<Self> {
        let refs: String = r.get(9)?;
        Ok(Vuln {
            id: r.get(0)?,
            host_id: r.get(1)?,
            service_id: r.get(2)?,
            via_target: r.get(3)?,
            xtype: r.get(4)?,
            name: r.get(5)?,
            severity: r.get(6)?,
            descr: r.get(7)?,
            data: r.get(8)?,
            refs: serde_json::from_str(&refs).unwrap_or_default(),
        })
    }
}

/// Natural key of a note or vuln row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationKey {
    pub host_id: HostId,
    pub service_id: Option<ServiceId>,
    pub via_target: Option<String>,
    pub xtype: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnFields {
    pub name: String,
    pub severity: String,
    pub descr: String,
    pub data: String,
    pub refs: Vec<String>,
}
