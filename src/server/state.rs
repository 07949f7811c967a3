use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::broadcast::BroadcastDispatcher;
use crate::config::Settings;
use crate::presence::TypingRegistry;
use crate::session::SessionRegistry;

/// Shared application state. The registries are constructor-injected here
/// rather than process-wide globals, so tests can build isolated instances.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<SessionRegistry>,
    pub typing: Arc<TypingRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(SessionRegistry::new());
        let typing = Arc::new(TypingRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone()));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            typing,
            dispatcher,
            start_time: Instant::now(),
        }
    }
}
