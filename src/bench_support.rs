use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use tempfile::TempDir;
use tracing::debug;

pub use reseller_quota_ledger;
pub use reseller_quota_sweeper;

use reseller_quota_ledger::{
    AccountStore, ChildAccount, MemoryStore, Quota, QuotaLedger, Reseller,
};
use reseller_quota_sweeper::AccountDatabase;

/// Provisioning surface shared by the stores so fixtures can seed either.
pub trait SeedStore {
    fn seed_reseller(&self, reseller: Reseller) -> Result<()>;
    fn seed_child(&self, child: ChildAccount) -> Result<()>;
}

impl SeedStore for MemoryStore {
    fn seed_reseller(&self, reseller: Reseller) -> Result<()> {
        self.insert_reseller(reseller);
        Ok(())
    }

    fn seed_child(&self, child: ChildAccount) -> Result<()> {
        self.insert_child(child);
        Ok(())
    }
}

impl SeedStore for AccountDatabase {
    fn seed_reseller(&self, reseller: Reseller) -> Result<()> {
        self.upsert_reseller(&reseller)
            .with_context(|| format!("seeding reseller {}", reseller.id))
    }

    fn seed_child(&self, child: ChildAccount) -> Result<()> {
        self.upsert_child(&child)
            .with_context(|| format!("seeding child {}", child.id))
    }
}

pub fn random_reseller_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    format!("{}-{}", prefix, rng.gen::<u32>())
}

/// Seeds `resellers` quota-bearing resellers, each owning
/// `children_per_reseller` children with random consumption below
/// `max_child_bytes`. Returns the reseller ids.
pub fn seed_random<S: SeedStore + ?Sized>(
    store: &S,
    resellers: usize,
    children_per_reseller: usize,
    quota: Quota,
    max_child_bytes: u64,
) -> Result<Vec<String>> {
    let mut rng = rand::thread_rng();
    let mut ids = Vec::with_capacity(resellers);

    for r in 0..resellers {
        let reseller_id = format!("reseller-{r:04}");
        store.seed_reseller(Reseller::new(&reseller_id, format!("Reseller {r}")).with_quota(quota))?;
        for c in 0..children_per_reseller {
            let consumed = rng.gen_range(0..=max_child_bytes);
            store.seed_child(ChildAccount::new(
                format!("{reseller_id}-child-{c:04}"),
                Some(reseller_id.as_str()),
                consumed,
            ))?;
        }
        ids.push(reseller_id);
    }

    debug!(resellers, children_per_reseller, "seeded random ledger fixture");
    Ok(ids)
}

pub struct LedgerFixture {
    pub store: Arc<MemoryStore>,
    pub ledger: QuotaLedger,
    pub reseller_ids: Vec<String>,
}

impl LedgerFixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ledger = QuotaLedger::new(Arc::clone(&store) as Arc<dyn AccountStore>);
        Self {
            store,
            ledger,
            reseller_ids: Vec::new(),
        }
    }

    pub fn populated(
        resellers: usize,
        children_per_reseller: usize,
        quota: Quota,
        max_child_bytes: u64,
    ) -> Result<Self> {
        let mut fixture = Self::new();
        fixture.reseller_ids = seed_random(
            fixture.store.as_ref(),
            resellers,
            children_per_reseller,
            quota,
            max_child_bytes,
        )?;
        Ok(fixture)
    }
}

impl Default for LedgerFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SqliteFixture {
    pub database: Arc<AccountDatabase>,
    pub ledger: QuotaLedger,
    pub temp_dir: TempDir,
}

impl SqliteFixture {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new().context("creating temp dir for sqlite fixture")?;
        let database = Arc::new(
            AccountDatabase::new(temp_dir.path().to_path_buf())
                .context("opening sqlite fixture database")?,
        );
        let ledger = QuotaLedger::new(Arc::clone(&database) as Arc<dyn AccountStore>);
        Ok(Self {
            database,
            ledger,
            temp_dir,
        })
    }
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
