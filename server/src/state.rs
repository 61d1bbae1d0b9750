use std::sync::Arc;

use crate::admission::policy::AttendeePolicy;
use crate::admission::{AdmissionController, RetryPolicy};
use crate::projections::RegistrationQueries;
use crate::store::RegistrationStore;
use crate::verification::Verifier;

#[derive(Clone)]
pub struct AppState {
    pub admissions: AdmissionController,
    pub queries: RegistrationQueries,
    pub verifier: Verifier,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        policy: Arc<dyn AttendeePolicy>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            admissions: AdmissionController::new(Arc::clone(&store), policy, retry),
            queries: RegistrationQueries::new(Arc::clone(&store)),
            verifier: Verifier::new(store),
        }
    }
}
