use cucumber::{then, when};
use loyalty_engine::{
    db_types::{EventType, Points, RawLoyaltyEvent, ReferralStatus},
    LedgerManagement,
    MembershipManagement,
    ProcessEventError,
    ReferralManagement,
};
use serde_json::json;

use crate::cucumber::LoyaltyWorld;

async fn process(world: &mut LoyaltyWorld, source_event_id: &str, event: RawLoyaltyEvent) {
    let outcome = world.system().api.process_event(event).await;
    match outcome {
        Ok(result) => world.results.push((source_event_id.to_string(), result)),
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[when(expr = "member {string} visits with event {word}")]
async fn visit(world: &mut LoyaltyWorld, member: String, event_id: String) {
    let m = world.member(&member).id;
    let t = world.system().tenant.id;
    let event = RawLoyaltyEvent::new(t, EventType::Visit, &event_id).for_membership(m).with_payload(json!({}));
    process(world, &event_id, event).await;
}

#[when(expr = "member {string} makes purchase {word} of {float}")]
async fn purchase(world: &mut LoyaltyWorld, member: String, event_id: String, amount: f64) {
    let m = world.member(&member).id;
    let t = world.system().tenant.id;
    let payload = json!({
        "orderId": event_id,
        "netAmount": amount,
        "grossAmount": amount,
        "currency": "EUR",
        "items": [{ "sku": "SOURDOUGH", "qty": 1, "unitPrice": amount }]
    });
    let event = RawLoyaltyEvent::new(t, EventType::Purchase, &event_id).for_membership(m).with_payload(payload);
    process(world, &event_id, event).await;
}

#[when(expr = "member {string} sends a visit without a source event id")]
async fn anonymous_visit(world: &mut LoyaltyWorld, member: String) {
    let m = world.member(&member).id;
    let t = world.system().tenant.id;
    let event = RawLoyaltyEvent::new(t, EventType::Visit, "   ").for_membership(m).with_payload(json!({}));
    let outcome = world.system().api.process_event(event).await;
    match outcome {
        Ok(result) => panic!("Event without a source id was accepted: {result:?}"),
        Err(ProcessEventError::Normalization(e)) => world.last_error = Some(e.field),
        Err(e) => panic!("Unexpected error: {e}"),
    }
}

#[then(expr = "event {word} awarded {int} points")]
async fn awarded(world: &mut LoyaltyWorld, event_id: String, points: i64) {
    let result = world.last_run_of(&event_id);
    assert_eq!(result.total_points_awarded, Points::from(points), "Points awarded are incorrect");
}

#[then(expr = "event {word} created {int} ledger row(s)")]
async fn rows_created(world: &mut LoyaltyWorld, event_id: String, count: usize) {
    let result = world.last_run_of(&event_id);
    assert_eq!(result.transactions_created.len(), count, "Transaction count is incorrect");
}

#[then(expr = "every run of event {word} reports the same transactions")]
async fn same_transactions(world: &mut LoyaltyWorld, event_id: String) {
    let runs = world.runs_of(&event_id);
    assert!(runs.len() > 1, "Event {event_id} was only processed once");
    for run in &runs[1..] {
        assert_eq!(run.transactions_created, runs[0].transactions_created);
        assert_eq!(run.total_points_awarded, runs[0].total_points_awarded);
    }
}

#[then(expr = "event {word} was processed under programs {string}")]
async fn processed_under(world: &mut LoyaltyWorld, event_id: String, programs: String) {
    let mut expected = programs.split(',').map(|name| world.program(name.trim()).id).collect::<Vec<_>>();
    let mut actual = world.last_run_of(&event_id).programs_processed.clone();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected, "Programs processed are incorrect");
}

#[then(expr = "member {string} has {int} ledger row(s)")]
async fn ledger_rows(world: &mut LoyaltyWorld, member: String, count: usize) {
    let m = world.member(&member).id;
    let rows = world.system().db.fetch_transactions_for_membership(m).await.expect("Error fetching ledger");
    assert_eq!(rows.len(), count, "Ledger row count is incorrect");
}

/// Checks the ledger sum and the cached projection together, since they must never disagree.
#[then(expr = "member {string} has a balance of {int} points")]
async fn balance(world: &mut LoyaltyWorld, member: String, points: i64) {
    let m = world.member(&member).id;
    let db = &world.system().db;
    let ledger = db.calculate_balance(m).await.expect("Error calculating balance");
    assert_eq!(ledger, Points::from(points), "Ledger balance is incorrect");
    let cached = db.fetch_membership(m).await.expect("Error fetching membership").expect("Membership missing");
    assert_eq!(cached.points, ledger, "Cached points disagree with the ledger");
}

#[then(expr = "the referral of {string} by {string} is completed")]
async fn referral_completed(world: &mut LoyaltyWorld, referred: String, referrer: String) {
    let referred = world.member(&referred).id;
    let referrer = world.member(&referrer).id;
    let db = &world.system().db;
    let referral = db
        .fetch_active_referral_between(referrer, referred)
        .await
        .expect("Error fetching referral")
        .expect("No referral between the members");
    assert_eq!(referral.status, ReferralStatus::Completed, "Referral status is incorrect");
    assert!(referral.first_purchase_completed, "First purchase was not recorded");
    assert!(referral.reward_granted, "Referrer reward was not recorded");
}

#[then(expr = "the event is rejected for its {word}")]
async fn rejected(world: &mut LoyaltyWorld, field: String) {
    assert_eq!(world.last_error.as_deref(), Some(field.as_str()), "Wrong rejection");
}
