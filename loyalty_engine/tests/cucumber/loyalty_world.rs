use std::{collections::HashMap, fmt::Debug};

use cucumber::World;
use log::*;
use loyalty_engine::{
    db_types::{CustomerMembership, CustomerTier, LoyaltyProgram, NewTenant, Tenant},
    test_utils::{
        prepare_env::{create_database, random_db_path, run_migrations},
        seed::Seeder,
    },
    EngineConfig,
    EventProducers,
    LoyaltyEventApi,
    ProcessEventResult,
    SqliteDatabase,
    ThresholdTierPolicy,
};

pub type EventApi = LoyaltyEventApi<SqliteDatabase, ThresholdTierPolicy<SqliteDatabase>>;

#[derive(Default, Debug, World)]
pub struct LoyaltyWorld {
    pub system: Option<LoyaltySystem>,
    /// Every pipeline run, in order, keyed by source event id.
    pub results: Vec<(String, ProcessEventResult)>,
    pub last_error: Option<String>,
}

pub struct LoyaltySystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub seeder: Seeder,
    pub api: EventApi,
    pub tenant: Tenant,
    pub members: HashMap<String, CustomerMembership>,
    pub programs: HashMap<String, LoyaltyProgram>,
    pub tiers: HashMap<String, CustomerTier>,
}

impl Debug for LoyaltySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoyaltySystem ({}, tenant #{})", self.db_path, self.tenant.id)
    }
}

impl LoyaltyWorld {
    pub fn system(&self) -> &LoyaltySystem {
        self.system.as_ref().expect("Loyalty system not initialised")
    }

    pub fn system_mut(&mut self) -> &mut LoyaltySystem {
        self.system.as_mut().expect("Loyalty system not initialised")
    }

    pub fn member(&self, name: &str) -> &CustomerMembership {
        self.system().members.get(name).unwrap_or_else(|| panic!("No member called {name}"))
    }

    pub fn program(&self, name: &str) -> &LoyaltyProgram {
        self.system().programs.get(name).unwrap_or_else(|| panic!("No program called {name}"))
    }

    pub fn runs_of(&self, source_event_id: &str) -> Vec<&ProcessEventResult> {
        self.results.iter().filter(|(id, _)| id == source_event_id).map(|(_, r)| r).collect()
    }

    pub fn last_run_of(&self, source_event_id: &str) -> &ProcessEventResult {
        self.runs_of(source_event_id)
            .pop()
            .unwrap_or_else(|| panic!("Event {source_event_id} has not been processed"))
    }
}

impl LoyaltySystem {
    pub async fn new() -> Self {
        let db_path = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&db_path, 1).await.expect("Error creating connection to database");
        debug!("🚀️ Created database: {db_path}");
        let seeder = Seeder::new(&db);
        let tenant = seeder.tenant(NewTenant::new("Corner Bakery")).await;
        let tiers = ThresholdTierPolicy::new(db.clone());
        let api = LoyaltyEventApi::new(db.clone(), tiers, EventProducers::default(), &EngineConfig::default());
        Self {
            db_path,
            db,
            seeder,
            api,
            tenant,
            members: HashMap::new(),
            programs: HashMap::new(),
            tiers: HashMap::new(),
        }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
