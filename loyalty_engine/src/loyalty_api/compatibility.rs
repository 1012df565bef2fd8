//! Decides which of a membership's programs may earn for an event.
//!
//! Programs are grouped by type and each group follows a fixed rule, so that two programs with the same commercial
//! intent never both grant points for one event:
//!
//! | Type           | Survivors                                                                  |
//! |----------------|----------------------------------------------------------------------------|
//! | `BASE`         | the single highest `priority_rank` (lowest id on a tie)                    |
//! | `PROMO`        | the top [`MAX_PROMO_PROGRAMS_PER_EVENT`] by `priority_rank`                |
//! | `PARTNER`      | the single highest `priority_rank`                                         |
//! | `SUBSCRIPTION` | every program not sharing a base earning domain with BASE/PROMO/PARTNER    |
//! | `EXPERIMENTAL` | every program not sharing a base earning domain with anything selected     |
use std::{cmp::Reverse, collections::HashSet};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{LoyaltyProgram, ProgramType, BASE_PURCHASE},
    traits::{ProgramError, ProgramManagement},
};

pub const MAX_PROMO_PROGRAMS_PER_EVENT: usize = 1;

/// Loads the membership's effective enrollments and returns the programs that may evaluate rules for an event at
/// `now`, in selection order.
pub async fn resolve_compatible_programs<B: ProgramManagement>(
    db: &B,
    membership_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<LoyaltyProgram>, ProgramError> {
    let enrollments = db.fetch_active_enrollments(membership_id, now).await?;
    if enrollments.is_empty() {
        trace!("🎯️ Membership #{membership_id} has no active enrollments");
        return Ok(Vec::new());
    }
    let ids = enrollments.iter().map(|e| e.program_id).collect::<Vec<_>>();
    let programs = db.fetch_programs(&ids).await?.into_iter().filter(|p| p.is_active(now)).collect::<Vec<_>>();
    let selected = select_compatible(programs);
    trace!(
        "🎯️ Membership #{membership_id} may earn under programs {:?}",
        selected.iter().map(|p| p.id).collect::<Vec<_>>()
    );
    Ok(selected)
}

/// The pure selection step of [`resolve_compatible_programs`].
pub fn select_compatible(programs: Vec<LoyaltyProgram>) -> Vec<LoyaltyProgram> {
    let by_type = |t: ProgramType| {
        let mut group = programs.iter().filter(|p| p.program_type == t).cloned().collect::<Vec<_>>();
        // Highest rank first, then lowest id, so that selection never depends on load order
        group.sort_by_key(|p| (Reverse(p.priority_rank), p.id));
        group
    };
    let base = by_type(ProgramType::Base);
    let promo = by_type(ProgramType::Promo);
    let partner = by_type(ProgramType::Partner);
    let subscription = by_type(ProgramType::Subscription);
    let experimental = by_type(ProgramType::Experimental);

    let mut selected = Vec::new();
    selected.extend(base.into_iter().take(1));
    selected.extend(promo.into_iter().take(MAX_PROMO_PROGRAMS_PER_EVENT));
    selected.extend(partner.into_iter().take(1));

    let compatible_subscriptions =
        subscription.into_iter().filter(|p| !shares_base_domain(p, &selected)).collect::<Vec<_>>();
    selected.extend(compatible_subscriptions);

    let compatible_experiments =
        experimental.into_iter().filter(|p| !shares_base_domain(p, &selected)).collect::<Vec<_>>();
    selected.extend(compatible_experiments);

    let base_purchase_count = selected.iter().filter(|p| p.has_earning_domain(BASE_PURCHASE)).count();
    if base_purchase_count > 1 {
        warn!(
            "🎯️ {base_purchase_count} selected programs declare {BASE_PURCHASE}: {:?}. Program configuration should \
             prevent this.",
            selected.iter().filter(|p| p.has_earning_domain(BASE_PURCHASE)).map(|p| p.id).collect::<Vec<_>>()
        );
    }
    selected
}

fn shares_base_domain(program: &LoyaltyProgram, others: &[LoyaltyProgram]) -> bool {
    let domains = program.conflicting_base_domains().collect::<HashSet<_>>();
    if domains.is_empty() {
        return false;
    }
    others.iter().any(|other| other.conflicting_base_domains().any(|d| domains.contains(d)))
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::{
        db_types::{
            EnrollmentStatus,
            NewEnrollment,
            NewLoyaltyProgram,
            NewMembership,
            NewTenant,
            ProgramStatus,
            BASE_SUBSCRIPTION,
            BASE_VISIT,
            BONUS_CATEGORY,
        },
        test_utils::{
            prepare_env::fresh_database,
            seed::{program_with_id, Seeder},
        },
    };

    fn program(id: i64, program_type: ProgramType, domains: &[&str], rank: i32) -> LoyaltyProgram {
        program_with_id(id, NewLoyaltyProgram::new(1, &format!("P{id}"), program_type, domains, rank))
    }

    fn ids(programs: &[LoyaltyProgram]) -> Vec<i64> {
        programs.iter().map(|p| p.id).collect()
    }

    #[test]
    fn one_base_program_survives() {
        let selected = select_compatible(vec![
            program(3, ProgramType::Base, &[BASE_PURCHASE], 5),
            program(2, ProgramType::Base, &[BASE_PURCHASE], 9),
            program(1, ProgramType::Base, &[BASE_PURCHASE], 9),
        ]);
        assert_eq!(ids(&selected), vec![1]);
    }

    #[test]
    fn promo_and_partner_keep_the_top_rank() {
        let selected = select_compatible(vec![
            program(1, ProgramType::Promo, &[BONUS_CATEGORY], 1),
            program(2, ProgramType::Promo, &[BONUS_CATEGORY], 4),
            program(3, ProgramType::Partner, &["PARTNER_MILES"], 2),
            program(4, ProgramType::Partner, &["PARTNER_MILES"], 8),
        ]);
        assert_eq!(ids(&selected), vec![2, 4]);
    }

    #[test]
    fn subscription_and_experimental_avoid_base_domain_overlap() {
        let selected = select_compatible(vec![
            program(1, ProgramType::Base, &[BASE_PURCHASE, BASE_VISIT], 10),
            program(2, ProgramType::Subscription, &[BASE_SUBSCRIPTION], 1),
            program(3, ProgramType::Subscription, &[BASE_VISIT], 1),
            program(4, ProgramType::Experimental, &[BASE_SUBSCRIPTION], 1),
            program(5, ProgramType::Experimental, &[BONUS_CATEGORY], 1),
        ]);
        assert_eq!(ids(&selected), vec![1, 2, 5]);
    }

    #[test]
    fn subscriptions_do_not_exclude_each_other() {
        let selected = select_compatible(vec![
            program(1, ProgramType::Subscription, &[BASE_SUBSCRIPTION], 1),
            program(2, ProgramType::Subscription, &[BASE_SUBSCRIPTION], 1),
        ]);
        assert_eq!(ids(&selected), vec![1, 2]);
    }

    #[tokio::test]
    async fn only_effective_enrollments_in_active_programs_count() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let tenant = seeder.tenant(NewTenant::new("Gym")).await;
        let m = seeder.membership(NewMembership::new(1, tenant.id)).await;
        let base = seeder.program(NewLoyaltyProgram::new(tenant.id, "Base", ProgramType::Base, &[BASE_VISIT], 1)).await;
        let draft = seeder
            .program(
                NewLoyaltyProgram::new(tenant.id, "Draft", ProgramType::Promo, &[BONUS_CATEGORY], 1)
                    .with_status(ProgramStatus::Draft),
            )
            .await;
        let paused = seeder
            .program(NewLoyaltyProgram::new(tenant.id, "Paused", ProgramType::Partner, &["MILES"], 1))
            .await;
        let ended = seeder
            .program(NewLoyaltyProgram::new(tenant.id, "Ended", ProgramType::Experimental, &["X"], 1))
            .await;
        seeder.enroll(m.id, base.id).await;
        seeder.enroll(m.id, draft.id).await;
        seeder.enrollment(NewEnrollment::new(m.id, paused.id).with_status(EnrollmentStatus::Paused)).await;
        let now = Utc::now();
        seeder
            .enrollment(
                NewEnrollment::new(m.id, ended.id)
                    .with_window(now - Duration::days(10), Some(now - Duration::days(1))),
            )
            .await;
        let selected = resolve_compatible_programs(&db, m.id, now).await.unwrap();
        assert_eq!(ids(&selected), vec![base.id]);
    }
}
