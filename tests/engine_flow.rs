//! Library-level flows through the engine, the queue and the scheduler tick.

use std::cell::RefCell;

use chrono::{Duration, Utc};
use serde_json::json;

use crmflow::crm::{Outbox, Record, RecordStore};
use crmflow::error::CrmError;
use crmflow::features::automation::{
    Action, AutomationEngine, Condition, RecordEvent, Rule, RuleStorage, RunStatus, Schedule,
    Trigger, WebhookRequest, WebhookResponse, WebhookSender,
};
use crmflow::features::scheduler::{JobQueue, JobStatus, SchedulerTick, TickConfig};
use crmflow::storage::Database;

/// Records every request and answers with a fixed status.
struct RecordingSender {
    status: u16,
    requests: RefCell<Vec<WebhookRequest>>,
}

impl RecordingSender {
    fn new(status: u16) -> Self {
        Self {
            status,
            requests: RefCell::new(Vec::new()),
        }
    }
}

impl WebhookSender for RecordingSender {
    fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, CrmError> {
        self.requests.borrow_mut().push(request.clone());
        Ok(WebhookResponse {
            status: self.status,
            body: String::new(),
        })
    }
}

fn save_rule(db: &Database, rule: Rule) -> i64 {
    let mut rule = rule.for_organization("acme");
    RuleStorage::new(db).create(&mut rule).unwrap()
}

fn save_record(db: &Database, record: Record) -> Record {
    let mut record = record;
    RecordStore::new(db).create(&mut record).unwrap();
    record
}

#[test]
fn test_wait_resumes_on_later_tick() {
    let db = Database::open_in_memory().unwrap();
    let sender = RecordingSender::new(200);
    let engine = AutomationEngine::new(&db, &sender);

    save_rule(
        &db,
        Rule::new("nurture", Trigger::on_create())
            .with_action(Action::webhook("https://hooks.example.com/lead"))
            .with_action(Action::wait(30))
            .with_action(Action::update_field("status", "contacted")),
    );
    let record = save_record(
        &db,
        Record::new("acme", "lead").with_data(json!({ "email": "ann@example.com" })),
    );

    let result = engine.handle_event(&RecordEvent::Created, &record, &[]).unwrap();
    assert_eq!(result.runs[0].status, RunStatus::Waiting);

    let requests = sender.requests.borrow().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body["data"]["email"], "ann@example.com");

    let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

    let early = tick.run(Utc::now()).unwrap();
    assert_eq!(early.due, 0);

    let later = tick.run(Utc::now() + Duration::minutes(31)).unwrap();
    assert_eq!(later.completed, 1);

    let record = RecordStore::new(&db)
        .require("acme", record.id.unwrap())
        .unwrap();
    assert_eq!(record.status.as_deref(), Some("contacted"));
    assert_eq!(sender.requests.borrow().len(), 1);
}

#[test]
fn test_failing_webhook_retries_then_fails() {
    let db = Database::open_in_memory().unwrap();
    let sender = RecordingSender::new(500);
    let engine = AutomationEngine::new(&db, &sender);

    let rule_id = save_rule(
        &db,
        Rule::new("sync", Trigger::manual()).with_action(Action::webhook("https://hooks.example.com")),
    );
    let record = save_record(&db, Record::new("acme", "deal"));

    let queue = JobQueue::new(&db);
    let job_id = queue
        .enqueue(&mut crmflow::features::scheduler::Job::run_rule(
            "acme",
            rule_id,
            record.id.unwrap(),
            2,
        ))
        .unwrap();

    let tick = SchedulerTick::new(&db, &engine, TickConfig::default());

    let first = tick.run(Utc::now()).unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(queue.get(job_id).unwrap().unwrap().status, JobStatus::Pending);

    let second = tick.run(Utc::now()).unwrap();
    assert_eq!(second.failed, 1);

    let job = queue.get(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.is_some());

    queue.retry("acme", job_id).unwrap();
    assert_eq!(queue.get(job_id).unwrap().unwrap().attempts, 0);
}

#[test]
fn test_scheduled_rule_sweeps_matching_records() {
    let db = Database::open_in_memory().unwrap();
    let sender = RecordingSender::new(200);
    let engine = AutomationEngine::new(&db, &sender);

    save_rule(
        &db,
        Rule::new("stale leads", Trigger::scheduled(Schedule::every_minutes(60)))
            .with_entity_type("lead")
            .with_condition(Condition::equals("status", "new"))
            .with_action(Action::send_email("{email}", "Still interested?", "Hi {name}")),
    );
    save_record(
        &db,
        Record::new("acme", "lead")
            .with_status("new")
            .with_data(json!({ "name": "Ann", "email": "ann@example.com" })),
    );
    save_record(&db, Record::new("acme", "lead").with_status("won"));
    save_record(&db, Record::new("acme", "deal").with_status("new"));

    let tick = SchedulerTick::new(&db, &engine, TickConfig::default());
    let result = tick.run(Utc::now()).unwrap();
    assert_eq!(result.scheduled_enqueued, 1);
    assert_eq!(result.completed, 1);

    let queued = Outbox::new(&db).queued("acme").unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].recipient, "ann@example.com");
    assert_eq!(queued[0].body, "Hi Ann");

    // Not due again within the interval.
    let again = tick.run(Utc::now()).unwrap();
    assert_eq!(again.scheduled_enqueued, 0);
}

#[test]
fn test_rules_never_cross_organizations() {
    let db = Database::open_in_memory().unwrap();
    let sender = RecordingSender::new(200);
    let engine = AutomationEngine::new(&db, &sender);

    save_rule(
        &db,
        Rule::new("tag", Trigger::on_create()).with_action(Action::add_tags(vec!["acme".into()])),
    );
    let other = save_record(&db, Record::new("globex", "lead"));

    let result = engine.handle_event(&RecordEvent::Created, &other, &[]).unwrap();
    assert_eq!(result.rules_evaluated, 0);

    let rule = RuleStorage::new(&db).find("acme", "tag").unwrap();
    let err = engine
        .run_rule("globex", rule.id.unwrap(), other.id.unwrap())
        .unwrap_err();
    assert!(matches!(err, CrmError::NotFound(_)));
}
