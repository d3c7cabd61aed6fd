use hangar_orchestrator::BuildOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BuildOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: BuildOrchestrator) -> Self {
        Self { orchestrator }
    }
}
