use chrono::Utc;

use signoff_core::domain::flow::{
    ApprovalModule, Assignee, FlowDraft, FlowId, FlowScope, RoleKey, StepDraft, UserId,
};

use crate::connection::DbPool;
use crate::repositories::{FlowRepository, RepositoryError, SqlFlowRepository};

/// Demo flows installed by `signoff seed`.
const SEED_FLOWS: &[SeedFlowContract] = &[
    SeedFlowContract {
        module: ApprovalModule::CustomerApplication,
        name: "Customer application approval",
        description: "Supervisor review followed by sign-off from the CCD head",
        steps: &[(1, SeedAssignee::Role("ccd_supervisor")), (2, SeedAssignee::User("U42"))],
    },
    SeedFlowContract {
        module: ApprovalModule::InspectionApproval,
        name: "Inspection approval",
        description: "Single-step review of field inspection results",
        steps: &[(1, SeedAssignee::Role("inspection_supervisor"))],
    },
];

/// Deterministic, idempotent demo flow definitions.
pub struct DemoFlowSeed;

impl DemoFlowSeed {
    /// Creates every demo flow whose scope is still free.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repo = SqlFlowRepository::new(pool.clone());
        let mut flows_seeded = Vec::with_capacity(SEED_FLOWS.len());

        for seed in SEED_FLOWS {
            let (flow_id, created) = match repo.find_by_scope(&seed.scope()).await? {
                Some(existing) => (existing.id, false),
                None => (repo.create(seed.draft(), Utc::now()).await?.id, true),
            };
            flows_seeded.push(FlowSeedInfo {
                module: seed.module.as_str(),
                name: seed.name,
                flow_id,
                created,
            });
        }

        Ok(SeedResult { flows_seeded })
    }

    /// Checks that each demo scope has a flow with the expected step layout.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let repo = SqlFlowRepository::new(pool.clone());
        let mut checks = Vec::with_capacity(SEED_FLOWS.len());

        for seed in SEED_FLOWS {
            let expected: Vec<(u32, Assignee)> =
                seed.draft().steps.into_iter().map(|step| (step.order, step.assignee)).collect();
            let matches = match repo.find_by_scope(&seed.scope()).await? {
                Some(flow) => {
                    let actual: Vec<(u32, Assignee)> =
                        flow.steps.into_iter().map(|step| (step.order, step.assignee)).collect();
                    actual == expected
                }
                None => false,
            };
            checks.push((seed.module.as_str(), matches));
        }

        Ok(VerificationResult { all_present: checks.iter().all(|(_, ok)| *ok), checks })
    }

    /// Removes the demo flows; subjects still in flight keep them in place.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let repo = SqlFlowRepository::new(pool.clone());
        for seed in SEED_FLOWS {
            if let Some(flow) = repo.find_by_scope(&seed.scope()).await? {
                repo.delete(flow.id).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum SeedAssignee {
    Role(&'static str),
    User(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct SeedFlowContract {
    module: ApprovalModule,
    name: &'static str,
    description: &'static str,
    steps: &'static [(u32, SeedAssignee)],
}

impl SeedFlowContract {
    fn scope(&self) -> FlowScope {
        FlowScope::new(self.module, None)
    }

    fn draft(&self) -> FlowDraft {
        FlowDraft {
            scope: self.scope(),
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            steps: self
                .steps
                .iter()
                .map(|(order, assignee)| StepDraft {
                    order: *order,
                    assignee: match assignee {
                        SeedAssignee::Role(role) => Assignee::Role(RoleKey::new(*role)),
                        SeedAssignee::User(user) => Assignee::User(UserId::new(*user)),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub flows_seeded: Vec<FlowSeedInfo>,
}

#[derive(Debug)]
pub struct FlowSeedInfo {
    pub module: &'static str,
    pub name: &'static str,
    pub flow_id: FlowId,
    /// `false` when a flow already owned the scope.
    pub created: bool,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::DemoFlowSeed;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn load_is_idempotent_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = DemoFlowSeed::load(&pool).await.expect("first load");
        assert!(first.flows_seeded.iter().all(|flow| flow.created));

        let second = DemoFlowSeed::load(&pool).await.expect("second load");
        assert!(second.flows_seeded.iter().all(|flow| !flow.created));
        let first_ids: Vec<_> = first.flows_seeded.iter().map(|flow| flow.flow_id).collect();
        let second_ids: Vec<_> = second.flows_seeded.iter().map(|flow| flow.flow_id).collect();
        assert_eq!(first_ids, second_ids);

        let verification = DemoFlowSeed::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn verify_reports_missing_flows_after_clean() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoFlowSeed::load(&pool).await.expect("load");

        DemoFlowSeed::clean(&pool).await.expect("clean");

        let verification = DemoFlowSeed::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert_eq!(verification.checks.len(), 2);
    }
}
