use crate::context::Context;
use crate::error::Result;
use crate::stage::{forward, Sinks, Stage};
use scanfleet_core::net::enumerate_network;
use std::collections::HashSet;

/// Expands configured networks into single addresses.
pub struct NetlistEnum {
    pub netlist: Vec<String>,
    pub next: Sinks,
}

impl Stage for NetlistEnum {
    fn name(&self) -> &str {
        "netlist_enum"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for net in &self.netlist {
            for addr in enumerate_network(net)? {
                if seen.insert(addr.clone()) {
                    targets.push(addr);
                }
            }
        }
        forward(ctx, &mut self.next, &targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{DummyStage, Schedule};
    use crate::testutil::TestEnv;
    use std::time::Duration;

    fn stage(dummy: &DummyStage) -> Schedule<NetlistEnum> {
        let inner = NetlistEnum {
            netlist: vec!["127.0.0.0/31".into(), "127.0.0.1".into()],
            next: vec![Box::new(dummy.clone())],
        };
        Schedule::new("dummylock", Duration::from_secs(600), inner)
    }

    #[test]
    fn enumerates_once_per_schedule() {
        let env = TestEnv::new();
        let mut ctx = env.context();
        let dummy = DummyStage::default();
        stage(&dummy).run(&mut ctx).unwrap();
        // not due yet, must not reach the sink
        stage(&dummy).run(&mut ctx).unwrap();
        assert_eq!(dummy.task_count(), 1);
        assert_eq!(dummy.task_args(), vec!["127.0.0.0", "127.0.0.1"]);
    }
}
