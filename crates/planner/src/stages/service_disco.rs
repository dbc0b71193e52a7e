use crate::context::Context;
use crate::error::Result;
use crate::projections::{filter_tarpits, project_services};
use crate::queue_handler::QueueHandler;
use crate::stage::{forward, Sinks, Stage};
use ipnet::IpNet;
use scanfleet_core::net::in_networks;
use scanfleet_core::ParsedResults;

/// Service states that never become service scan targets.
const UNINTERESTING_STATES: &[&str] = &["filtered", "closed"];

/// Consumes finished discovery jobs and forwards the interesting services they found.
pub struct ServiceDisco {
    pub handler: QueueHandler,
    /// Only services on these networks are forwarded; empty means no restriction.
    pub filternets: Vec<IpNet>,
    pub tarpit_threshold: usize,
    pub next: Sinks,
}

fn service_targets(results: &ParsedResults, filternets: &[IpNet], tarpit_threshold: usize) -> Vec<String> {
    let mut results = filter_tarpits(results, tarpit_threshold);
    results.services.retain(|s| {
        !UNINTERESTING_STATES.contains(&s.state_class()) && (filternets.is_empty() || in_networks(&s.address, filternets))
    });
    project_services(&results)
}

impl Stage for ServiceDisco {
    fn name(&self) -> &str {
        "service_disco"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let Self { handler, filternets, tarpit_threshold, next } = self;
        handler.drain(ctx, |ctx, _job, results| {
            let targets = service_targets(&results, filternets.as_slice(), *tarpit_threshold);
            forward(ctx, next, &targets)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_handler::RETVAL_UNPARSEABLE;
    use crate::stage::DummyStage;
    use crate::testutil::TestEnv;
    use scanfleet_core::results::ParsedService;
    use scanfleet_store::count_rows;

    fn service(address: &str, port: u16, state: &str) -> ParsedService {
        ParsedService { address: address.into(), proto: "tcp".into(), port, state: state.into(), ..Default::default() }
    }

    fn discovery_results() -> ParsedResults {
        let mut results = ParsedResults::default();
        results.add_host("127.0.0.1");
        results.services = vec![
            service("127.0.0.1", 22, "open:syn-ack"),
            service("127.0.0.1", 25, "open:syn-ack"),
            service("127.0.0.1", 139, "open:syn-ack"),
            service("127.0.0.1", 445, "open:syn-ack"),
            service("127.0.0.1", 80, "closed:reset"),
            service("127.0.0.1", 81, "filtered:no-response"),
            service("::1", 631, "open:syn-ack"),
        ];
        results
    }

    fn stage(ctx: &crate::context::Context, dummy: &DummyStage) -> ServiceDisco {
        ServiceDisco {
            handler: QueueHandler::new(ctx, "disco").unwrap(),
            filternets: Vec::new(),
            tarpit_threshold: 200,
            next: vec![Box::new(dummy.clone())],
        }
    }

    #[test]
    fn forwards_open_services() {
        let env = TestEnv::new();
        env.create_queue("disco", "portscan");
        let job_id = env.complete_job("disco", &["127.0.0.1", "::1"], &discovery_results());

        let mut ctx = env.context();
        let dummy = DummyStage::default();
        stage(&ctx, &dummy).run(&mut ctx).unwrap();

        assert_eq!(dummy.task_count(), 1);
        let args = dummy.task_args();
        assert_eq!(args.len(), 5);
        assert!(args.contains(&"tcp://127.0.0.1:139".to_string()));
        assert!(args.contains(&"tcp://[::1]:631".to_string()));
        assert_eq!(count_rows(&ctx.db.conn, "job").unwrap(), 0);
        assert!(env.config.archive_dir.join("disco").join(format!("{job_id}.zip")).exists());
    }

    #[test]
    fn unparseable_jobs_are_kept_and_marked() {
        let env = TestEnv::new();
        env.create_queue("disco", "dummy");
        let bad = env.complete_job_raw("disco", &["127.0.0.1"], b"{\"hosts\": [");
        env.complete_job("disco", &["127.0.0.2"], &discovery_results());

        let mut ctx = env.context();
        let dummy = DummyStage::default();
        stage(&ctx, &dummy).run(&mut ctx).unwrap();

        assert_eq!(count_rows(&ctx.db.conn, "job").unwrap(), 1);
        assert_eq!(env.scheduler.job_get(&ctx.db, &bad).unwrap().retval, Some(RETVAL_UNPARSEABLE));
        assert_eq!(dummy.task_count(), 1);
    }

    #[test]
    fn jobs_without_parser_are_left_alone() {
        let env = TestEnv::new();
        env.create_queue("disco", "nmap");
        env.complete_job("disco", &["127.0.0.1"], &discovery_results());
        let mut ctx = env.context();
        let dummy = DummyStage::default();
        stage(&ctx, &dummy).run(&mut ctx).unwrap();
        assert_eq!(count_rows(&ctx.db.conn, "job").unwrap(), 1);
        assert_eq!(dummy.task_count(), 0);
    }

    #[test]
    fn tarpits_and_foreign_networks_dropped() {
        let env = TestEnv::new();
        env.create_queue("disco", "portscan");
        let mut results = discovery_results();
        results.services.extend((1000..1010).map(|p| service("127.0.0.9", p, "open")));
        env.complete_job("disco", &["127.0.0.0/24"], &results);

        let mut ctx = env.context();
        let dummy = DummyStage::default();
        let mut disco = stage(&ctx, &dummy);
        disco.tarpit_threshold = 9;
        disco.filternets = scanfleet_core::net::parse_networks(&["127.0.0.0/8"]).unwrap();
        disco.run(&mut ctx).unwrap();
        assert_eq!(dummy.task_args().len(), 4);
    }

    #[test]
    fn unknown_queue_is_an_error() {
        let env = TestEnv::new();
        let ctx = env.context();
        assert!(matches!(
            QueueHandler::new(&ctx, "nx queue"),
            Err(crate::error::PlannerError::QueueNotFound(_))
        ));
    }
}
