use crate::api::ApiContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    /// Adds `Secure` to the session cookie.
    pub(crate) secure_cookies: bool,
}
