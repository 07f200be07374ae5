use std::sync::Arc;

use agent_protocol::{Harness, NotificationSource};
use agent_protocol_mock::{MockHarness, MOCK_HARNESS_ID};

pub const DEFAULT_HARNESS_ID: &str = MOCK_HARNESS_ID;
pub const HARNESS_ENV_VAR: &str = "CODING_AGENT_HARNESS";

/// One harness seen through both of its contracts.
#[derive(Clone)]
pub struct SelectedHarness {
    pub harness: Arc<dyn Harness>,
    pub notifications: Arc<dyn NotificationSource>,
}

impl SelectedHarness {
    pub fn new<H>(harness: Arc<H>) -> Self
    where
        H: Harness + NotificationSource,
    {
        Self {
            harness: Arc::clone(&harness) as Arc<dyn Harness>,
            notifications: harness,
        }
    }

    pub fn id(&self) -> &str {
        self.harness.harness_id()
    }
}

pub fn harness_from_env() -> Result<SelectedHarness, String> {
    let harness_id = std::env::var(HARNESS_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    harness_for_id(harness_id.as_deref().unwrap_or(DEFAULT_HARNESS_ID))
}

pub fn harness_for_id(harness_id: &str) -> Result<SelectedHarness, String> {
    match harness_id {
        DEFAULT_HARNESS_ID => Ok(SelectedHarness::new(Arc::new(MockHarness::default()))),
        unknown => Err(format!(
            "Unsupported harness '{unknown}'. Available harnesses: {DEFAULT_HARNESS_ID}"
        )),
    }
}
