use crate::auth::Authenticator;
use crate::providers::Provider;
use crate::settings::Settings;

/// Shared state of the OCR function. `provider` is a configured template that
/// is cloned for every request.
#[derive(Debug, Clone)]
pub struct ServerState<A, P> {
    pub settings: Settings,
    pub auth: A,
    pub provider: P,
}

impl<A: Authenticator, P: Provider> ServerState<A, P> {
    pub fn new(settings: Settings, auth: A, provider: P) -> Self {
        Self {
            settings,
            auth,
            provider,
        }
    }
}
