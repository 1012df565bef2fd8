use log::*;

use crate::{
    db_types::{CustomerMembership, MembershipRef},
    loyalty_api::errors::MembershipResolutionError,
    traits::MembershipManagement,
};

/// Looks up the membership a reference points at. Exactly one repository lookup is made.
pub async fn resolve_membership<B: MembershipManagement>(
    db: &B,
    membership_ref: &MembershipRef,
) -> Result<CustomerMembership, MembershipResolutionError> {
    let (found, description) = match membership_ref {
        MembershipRef::MembershipId(id) => {
            if *id <= 0 {
                return Err(MembershipResolutionError::InvalidReference);
            }
            (db.fetch_membership(*id).await?, format!("membership id {id}"))
        },
        MembershipRef::Customer { customer_id, tenant_id } => (
            db.fetch_membership_for_customer(*customer_id, *tenant_id).await?,
            format!("customer {customer_id} of tenant {tenant_id}"),
        ),
        MembershipRef::QrCode(code) => {
            if code.trim().is_empty() {
                return Err(MembershipResolutionError::InvalidReference);
            }
            (db.fetch_membership_by_qr_code(code.trim()).await?, format!("QR code {code}"))
        },
    };
    found.ok_or_else(|| {
        debug!("🎯️ No membership found for {description}");
        MembershipResolutionError::NotFound(description)
    })
}

/// As [`resolve_membership`], but an inactive membership is an error.
pub async fn resolve_active_membership<B: MembershipManagement>(
    db: &B,
    membership_ref: &MembershipRef,
) -> Result<CustomerMembership, MembershipResolutionError> {
    let membership = resolve_membership(db, membership_ref).await?;
    if !membership.is_active() {
        return Err(MembershipResolutionError::Inactive(membership.id));
    }
    Ok(membership)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::{MembershipStatus, NewMembership, NewTenant},
        test_utils::{prepare_env::fresh_database, seed::Seeder},
    };

    #[tokio::test]
    async fn every_lookup_path() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let tenant = seeder.tenant(NewTenant::new("Bakery")).await;
        let m = seeder.membership(NewMembership::new(42, tenant.id).with_qr_code("QR-42")).await;

        let by_id = resolve_membership(&db, &MembershipRef::MembershipId(m.id)).await.unwrap();
        assert_eq!(by_id.id, m.id);
        let by_customer = resolve_membership(&db, &MembershipRef::Customer { customer_id: 42, tenant_id: tenant.id })
            .await
            .unwrap();
        assert_eq!(by_customer.id, m.id);
        let by_qr = resolve_membership(&db, &MembershipRef::QrCode("QR-42".into())).await.unwrap();
        assert_eq!(by_qr.id, m.id);

        let err = resolve_membership(&db, &MembershipRef::QrCode("nope".into())).await.unwrap_err();
        assert!(matches!(err, MembershipResolutionError::NotFound(_)));
        let err = resolve_membership(&db, &MembershipRef::MembershipId(0)).await.unwrap_err();
        assert!(matches!(err, MembershipResolutionError::InvalidReference));
    }

    #[tokio::test]
    async fn inactive_memberships_are_rejected() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let tenant = seeder.tenant(NewTenant::new("Bakery")).await;
        let m = seeder.membership(NewMembership::new(7, tenant.id).with_status(MembershipStatus::Inactive)).await;
        let r = MembershipRef::MembershipId(m.id);
        assert!(resolve_membership(&db, &r).await.is_ok());
        let err = resolve_active_membership(&db, &r).await.unwrap_err();
        assert!(matches!(err, MembershipResolutionError::Inactive(id) if id == m.id));
    }
}
