use super::{
    LedgerError,
    LedgerManagement,
    MembershipManagement,
    ProgramManagement,
    ReferralManagement,
    RewardManagement,
    TenantManagement,
};

/// This trait defines the highest level of behaviour for backends supporting the loyalty engine.
///
/// A backend implementing `LoyaltyDatabase` can serve every API in the engine. The individual repository traits are
/// kept separate so that narrower APIs (e.g. the balance projection) can be used with narrower backends.
#[allow(async_fn_in_trait)]
pub trait LoyaltyDatabase:
    Clone
    + MembershipManagement
    + ProgramManagement
    + LedgerManagement
    + TenantManagement
    + ReferralManagement
    + RewardManagement
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}
