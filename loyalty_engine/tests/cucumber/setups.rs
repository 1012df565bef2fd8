use chrono::{Duration, Utc};
use cucumber::given;
use loyalty_engine::{
    db_types::{
        ConflictSettings,
        EventType,
        NewCustomerTier,
        NewLoyaltyProgram,
        NewMembership,
        NewRewardRule,
        PeriodType,
        PointsFormula,
        ProgramType,
        Rounding,
        RuleLimits,
        StackPolicy,
    },
    MembershipManagement,
};

use crate::cucumber::{LoyaltySystem, LoyaltyWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut LoyaltyWorld) {
    let system = LoyaltySystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a {word} program {string} earning {word}")]
async fn program(world: &mut LoyaltyWorld, program_type: String, name: String, domains: String) {
    let program_type = program_type.parse::<ProgramType>().expect("Not a program type");
    let domains = domains.split(',').collect::<Vec<_>>();
    let sys = world.system_mut();
    let program = NewLoyaltyProgram::new(sys.tenant.id, &name, program_type, &domains, 10);
    let program = sys.seeder.program(program).await;
    sys.programs.insert(name, program);
}

#[given(expr = "member {string} is enrolled in {string}")]
async fn enrolled_member(world: &mut LoyaltyWorld, member: String, program: String) {
    let program_id = world.program(&program).id;
    let sys = world.system_mut();
    let membership = match sys.members.get(&member) {
        Some(m) => m.clone(),
        None => {
            let user_id = 1_000 + sys.members.len() as i64;
            let joined = Utc::now() - Duration::days(90);
            let m = sys.seeder.membership(NewMembership::new(user_id, sys.tenant.id).with_joined_date(joined)).await;
            sys.members.insert(member, m.clone());
            m
        },
    };
    sys.seeder.enroll(membership.id, program_id).await;
}

#[given(expr = "a tier {string} from {int} points with multiplier {float}")]
async fn tier(world: &mut LoyaltyWorld, name: String, min_points: i64, multiplier: f64) {
    let sys = world.system_mut();
    let priority = sys.tiers.len() as i32 + 1;
    let tier = NewCustomerTier::new(sys.tenant.id, &name, min_points, None, priority).with_multiplier(multiplier);
    let tier = sys.seeder.tier(tier).await;
    sys.tiers.insert(name, tier);
}

#[given(expr = "member {string} is in tier {string}")]
async fn member_in_tier(world: &mut LoyaltyWorld, member: String, tier: String) {
    let sys = world.system_mut();
    let tier_id = sys.tiers.get(&tier).expect("Unknown tier").id;
    let membership = sys.members.get_mut(&member).expect("Unknown member");
    sys.db.assign_tier(membership.id, Some(tier_id)).await.expect("Error assigning tier");
    membership.tier_id = Some(tier_id);
}

#[given(expr = "program {string} awards {int} points per {word} under {word}")]
async fn fixed_rule(world: &mut LoyaltyWorld, program: String, points: i64, trigger: String, domain: String) {
    let rule = fixed(world, &program, points, &trigger, &domain);
    world.system().seeder.rule(rule).await;
}

#[given(expr = "program {string} awards {int} points per {word} under {word}, capped at {int} points per {int} days")]
async fn capped_rule(
    world: &mut LoyaltyWorld,
    program: String,
    points: i64,
    trigger: String,
    domain: String,
    cap: i64,
    days: i64,
) {
    let limits = RuleLimits {
        per_period_cap: Some(cap),
        period_type: Some(PeriodType::Rolling),
        period_days: Some(days),
        ..Default::default()
    };
    let rule = fixed(world, &program, points, &trigger, &domain).with_limits(limits);
    world.system().seeder.rule(rule).await;
}

#[given(expr = "program {string} awards {float} points per unit spent under {word} with {word} rounding as {word}")]
async fn rate_rule(
    world: &mut LoyaltyWorld,
    program: String,
    rate: f64,
    domain: String,
    rounding: String,
    policy: String,
) {
    let program_id = world.program(&program).id;
    let rounding = rounding.parse::<Rounding>().expect("Not a rounding mode");
    let policy = policy.parse::<StackPolicy>().expect("Not a stack policy");
    let conflict = ConflictSettings::new(&domain, policy, 1);
    let formula = PointsFormula::rate(rate, rounding);
    let rule = NewRewardRule::new(program_id, "Spend", EventType::Purchase, formula, conflict, &domain);
    world.system().seeder.rule(rule).await;
}

#[given(expr = "member {string} was referred by {string}")]
async fn referred(world: &mut LoyaltyWorld, referred_name: String, referrer: String) {
    let referred = world.member(&referred_name).id;
    let referrer = world.member(&referrer).id;
    let sys = world.system();
    sys.seeder.referral(sys.tenant.id, referrer, referred, Utc::now() - Duration::days(2)).await;
}

fn fixed(world: &LoyaltyWorld, program: &str, points: i64, trigger: &str, domain: &str) -> NewRewardRule {
    let program_id = world.program(program).id;
    let trigger = trigger.to_uppercase().parse::<EventType>().expect("Not an event type");
    let conflict = ConflictSettings::new(domain, StackPolicy::Stack, 1);
    let name = format!("{points} per {trigger}");
    NewRewardRule::new(program_id, &name, trigger, PointsFormula::fixed(points), conflict, domain)
}
